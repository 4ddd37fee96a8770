#[cfg(any(target_os = "linux", target_os = "android"))]
fn main() {
    use std::{thread, time::Duration};

    use usbpipe::{GenericHandle, GenericInterface};

    env_logger::init();
    let device = usbpipe::find_device_with_vid_pid(0x59e3, 0x0a23)
        .unwrap()
        .expect("device should be connected");

    println!("Device: {device:?}");

    let interface = GenericInterface::new(&device, 0, false).unwrap();
    let handle = GenericHandle::open(&interface).unwrap();
    handle.set_timeout(0x02, 1000).unwrap();
    handle.write_pipe(0x02, &[1, 2, 3, 4, 5]).unwrap();

    let mut pipe = handle.open_async_in_pipe(0x81).unwrap();
    pipe.allocate_transfers(8, 4096).unwrap();
    pipe.start_endless_transfers().unwrap();

    let mut buf = vec![0; 4096];
    let mut received = 0;
    while received < 1 << 20 {
        pipe.handle_events().unwrap();
        while let Some(completion) = pipe.handle_finished_transfer(Some(&mut buf)).unwrap() {
            if let Some(err) = completion.error {
                println!("{err}");
                return;
            }
            received += completion.transferred;
        }
        thread::sleep(Duration::from_millis(1));
    }
    println!("Received {received} bytes");

    pipe.cancel_transfers().unwrap();
    while pipe.has_pending_transfers() {
        pipe.handle_events().unwrap();
        while pipe.handle_finished_transfer(None).unwrap().is_some() {}
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn main() {
    println!("Opening a `GenericHandle` is currently only supported on Linux and Android.");
}
