use std::fs;
use std::io;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use log::warn;

use super::error_from_io;
use crate::{Device, Error, ErrorCode};

#[derive(Debug, Clone)]
pub struct SysfsPath(pub(crate) PathBuf);

#[derive(Debug)]
pub struct SysfsError(PathBuf, SysfsErrorKind);

#[derive(Debug)]
enum SysfsErrorKind {
    Io(io::Error),
    Parse(String),
}

impl std::fmt::Display for SysfsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to read sysfs attribute {}: ", self.0.display())?;
        match &self.1 {
            SysfsErrorKind::Io(e) => write!(f, "{e}."),
            SysfsErrorKind::Parse(v) => write!(f, "could not parse value {:?}.", v.trim()),
        }
    }
}

impl std::error::Error for SysfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.1 {
            SysfsErrorKind::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<SysfsError> for Error {
    fn from(value: SysfsError) -> Self {
        Error::new(value.to_string())
    }
}

impl SysfsPath {
    fn parse_attr<T, E>(
        &self,
        attr: &str,
        parse: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<T, SysfsError> {
        let attr_path = self.0.join(attr);
        fs::read_to_string(&attr_path)
            .map_err(SysfsErrorKind::Io)
            .and_then(|v| parse(v.trim()).map_err(|_| SysfsErrorKind::Parse(v)))
            .map_err(|e| SysfsError(attr_path, e))
    }

    pub(crate) fn read_attr<T: FromStr>(&self, attr: &str) -> Result<T, SysfsError> {
        self.parse_attr(attr, |s| s.parse())
    }

    fn read_attr_hex<T: FromHexStr>(&self, attr: &str) -> Result<T, SysfsError> {
        self.parse_attr(attr, |s| T::from_hex_str(s.strip_prefix("0x").unwrap_or(s)))
    }

    fn children(&self) -> impl Iterator<Item = SysfsPath> {
        fs::read_dir(&self.0)
            .ok()
            .into_iter()
            .flat_map(|x| x)
            .filter_map(|f| f.ok())
            .filter(|f| f.file_type().ok().is_some_and(|t| t.is_dir()))
            .map(|f| SysfsPath(f.path()))
    }

    /// Name of the kernel driver bound here, if any.
    fn driver(&self) -> Option<String> {
        let link = fs::read_link(self.0.join("driver")).ok()?;
        Some(link.file_name()?.to_string_lossy().into_owned())
    }
}

trait FromHexStr: Sized {
    fn from_hex_str(s: &str) -> Result<Self, ParseIntError>;
}

impl FromHexStr for u8 {
    fn from_hex_str(s: &str) -> Result<Self, ParseIntError> {
        u8::from_str_radix(s, 16)
    }
}

impl FromHexStr for u16 {
    fn from_hex_str(s: &str) -> Result<Self, ParseIntError> {
        u16::from_str_radix(s, 16)
    }
}

const SYSFS_USB_PREFIX: &str = "/sys/bus/usb/devices/";

pub fn list_devices() -> Result<Vec<Device>, Error> {
    let entries = fs::read_dir(SYSFS_USB_PREFIX)
        .map_err(|e| error_from_io(&e, "Failed to list USB devices."))?;

    Ok(entries
        .flat_map(|entry| {
            let path = entry.ok()?.path();
            let name = path.file_name()?;

            // Device names look like `1-6` or `1-6.4.2`
            // We'll ignore:
            //  * root hubs (`usb1`) -- they're not useful to talk to
            //  * interfaces (`1-6:1.0`)
            if !name
                .as_encoded_bytes()
                .iter()
                .all(|c| matches!(c, b'0'..=b'9' | b'-' | b'.'))
            {
                return None;
            }

            probe_device(SysfsPath(path))
                .inspect_err(|e| warn!("{e} Ignoring device."))
                .ok()
        })
        .collect())
}

pub fn probe_device(path: SysfsPath) -> Result<Device, SysfsError> {
    debug!("Probing device {:?}", path.0);

    Ok(Device {
        busnum: path.read_attr("busnum")?,
        device_address: path.read_attr("devnum")?,
        vendor_id: path.read_attr_hex("idVendor")?,
        product_id: path.read_attr_hex("idProduct")?,
        revision: path.read_attr_hex("bcdDevice")?,
        serial_number: path.read_attr("serial").ok(),
        os_id: path.0.to_string_lossy().into_owned(),
    })
}

/// Find the sysfs directory of an interface and the device node used to
/// open it. Returns `(interface syspath, device node)`.
pub fn find_interface(device: &Device, interface_number: u8) -> Result<(String, String), Error> {
    let device_path = SysfsPath(PathBuf::from(device.os_id()));

    let interface = device_path
        .children()
        .filter(|i| {
            i.0.file_name()
                .unwrap_or_default()
                .as_encoded_bytes()
                .contains(&b':')
        })
        .find(|i| i.read_attr_hex::<u8>("bInterfaceNumber").ok() == Some(interface_number))
        .ok_or_else(|| {
            Error::new(format!("Could not find interface {interface_number}."))
                .with_code(ErrorCode::NotReady)
        })?;

    check_driver(interface.driver().as_deref())?;

    let filename = format!(
        "/dev/bus/usb/{:03}/{:03}",
        device.busnum(),
        device.device_address()
    );
    check_existence(Path::new(&filename))?;

    debug!(
        "Interface {interface_number} of {} is {:?}, opened through {filename}",
        device.os_id(),
        interface.0
    );
    Ok((interface.0.to_string_lossy().into_owned(), filename))
}

/// Only interfaces without a kernel driver, or with one that leaves usbfs
/// access working, can be used.
fn check_driver(driver: Option<&str>) -> Result<(), Error> {
    match driver {
        None | Some("usbfs") | Some("cp210x") => Ok(()),
        Some(driver) => Err(Error::new(format!(
            "Device is attached to an incorrect driver: {driver}."
        ))),
    }
}

/// Check that the device node exists, without checking permissions. A
/// missing node may just not have been created yet.
fn check_existence(path: &Path) -> Result<(), Error> {
    match fs::metadata(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::new(format!(
            "File does not exist: {}.",
            path.display()
        ))
        .with_code(ErrorCode::NotReady)),
        Err(e) => Err(error_from_io(
            &e,
            &format!("Failed to check file: {}.", path.display()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_drivers() {
        assert!(check_driver(None).is_ok());
        assert!(check_driver(Some("usbfs")).is_ok());
        assert!(check_driver(Some("cp210x")).is_ok());
        assert_eq!(
            check_driver(Some("usbhid")).unwrap_err().message(),
            "Device is attached to an incorrect driver: usbhid."
        );
    }

    #[test]
    fn missing_node_is_not_ready() {
        let err = check_existence(Path::new("/dev/bus/usb/999/999")).unwrap_err();
        assert_eq!(err.message(), "File does not exist: /dev/bus/usb/999/999.");
        assert!(err.has_code(ErrorCode::NotReady));
    }

    #[test]
    fn missing_interface_is_not_ready() {
        let mut device = Device::for_test(1, 2, 3, None);
        device.os_id = "/nonexistent/usb/1-2".into();
        let err = find_interface(&device, 3).unwrap_err();
        assert_eq!(err.message(), "Could not find interface 3.");
        assert!(err.has_code(ErrorCode::NotReady));
    }

    #[test]
    fn sysfs_error_message() {
        let err: Error = SysfsPath(PathBuf::from("/nonexistent"))
            .read_attr::<u8>("busnum")
            .unwrap_err()
            .into();
        assert!(err
            .message()
            .starts_with("Failed to read sysfs attribute /nonexistent/busnum: "));
    }
}
