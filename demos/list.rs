fn main() {
    env_logger::init();
    for dev in usbpipe::list_devices().unwrap() {
        println!(
            "{:04x}:{:04x} rev {:04x} at {}",
            dev.vendor_id(),
            dev.product_id(),
            dev.revision(),
            dev.os_id()
        );
        match dev.serial_number() {
            Ok(serial) => println!("  serial number: {serial}"),
            Err(e) => println!("  {e}"),
        }
    }
}
