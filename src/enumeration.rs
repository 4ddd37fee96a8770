use crate::{Error, ErrorCode};

/// A USB device found by [`list_devices`].
///
/// This is a snapshot taken at enumeration time; it stays valid after the
/// device is unplugged and can be copied freely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub(crate) os_id: String,
    pub(crate) busnum: u8,
    pub(crate) device_address: u8,
    pub(crate) vendor_id: u16,
    pub(crate) product_id: u16,
    pub(crate) revision: u16,
    pub(crate) serial_number: Option<String>,
}

impl Device {
    /// `idVendor` from the device descriptor.
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    /// `idProduct` from the device descriptor.
    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// `bcdDevice` from the device descriptor.
    pub fn revision(&self) -> u16 {
        self.revision
    }

    /// The serial number string.
    ///
    /// Fails with [`ErrorCode::NoSerialNumber`] if the device does not have
    /// one.
    pub fn serial_number(&self) -> Result<&str, Error> {
        self.serial_number.as_deref().ok_or_else(|| {
            Error::new("Device does not have a serial number.")
                .with_code(ErrorCode::NoSerialNumber)
        })
    }

    /// Identifier of the device in the OS. On Linux this is its sysfs path.
    pub fn os_id(&self) -> &str {
        &self.os_id
    }

    pub fn busnum(&self) -> u8 {
        self.busnum
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        vendor_id: u16,
        product_id: u16,
        revision: u16,
        serial_number: Option<&str>,
    ) -> Device {
        Device {
            os_id: "/sys/bus/usb/devices/1-2".into(),
            busnum: 1,
            device_address: 7,
            vendor_id,
            product_id,
            revision,
            serial_number: serial_number.map(Into::into),
        }
    }
}

/// One interface of a [`Device`], resolved to the OS node used to open it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericInterface {
    pub(crate) device: Device,
    pub(crate) interface_number: u8,
    pub(crate) os_id: String,
    pub(crate) os_filename: String,
}

impl GenericInterface {
    /// Resolve interface `interface_number` of `device`.
    ///
    /// `composite` tells whether the device has more than one interface;
    /// Linux ignores it. Fails with [`ErrorCode::NotReady`] if the OS has
    /// not finished setting the interface up yet, in which case retrying
    /// after a short delay may succeed.
    pub fn new(
        device: &Device,
        interface_number: u8,
        composite: bool,
    ) -> Result<GenericInterface, Error> {
        let _ = composite;
        Self::resolve(device, interface_number)
            .map_err(|e| e.context("Failed to initialize generic interface."))
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn resolve(device: &Device, interface_number: u8) -> Result<GenericInterface, Error> {
        let (os_id, os_filename) = crate::platform::find_interface(device, interface_number)?;
        Ok(GenericInterface {
            device: device.clone(),
            interface_number,
            os_id,
            os_filename,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn resolve(_device: &Device, _interface_number: u8) -> Result<GenericInterface, Error> {
        Err(Error::new(
            "Generic interfaces are not supported on this platform.",
        ))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn interface_number(&self) -> u8 {
        self.interface_number
    }

    /// Identifier of the interface in the OS. On Linux this is its sysfs
    /// path.
    pub fn os_id(&self) -> &str {
        &self.os_id
    }

    /// The file opened to talk to the interface, such as
    /// `/dev/bus/usb/001/007`.
    pub fn os_filename(&self) -> &str {
        &self.os_filename
    }
}

/// List the USB devices currently attached.
///
/// A device that cannot be read is left out of the list rather than failing
/// the whole call.
pub fn list_devices() -> Result<Vec<Device>, Error> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        crate::platform::list_devices()
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        Err(Error::new("Listing devices is not supported on this platform."))
    }
}

/// Find the first attached device with the given vendor and product IDs.
pub fn find_device_with_vid_pid(vendor_id: u16, product_id: u16) -> Result<Option<Device>, Error> {
    Ok(list_devices()?
        .into_iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_number() {
        let d = Device::for_test(1, 2, 3, Some("00012345"));
        assert_eq!(d.serial_number().unwrap(), "00012345");

        let d = Device::for_test(1, 2, 3, None);
        let err = d.serial_number().unwrap_err();
        assert_eq!(err.message(), "Device does not have a serial number.");
        assert!(err.has_code(ErrorCode::NoSerialNumber));
    }

    #[test]
    fn device_is_copyable() {
        let d = Device::for_test(0x1ffb, 0x00b0, 0x0102, None);
        let copy = d.clone();
        drop(d);
        assert_eq!(copy.vendor_id(), 0x1ffb);
        assert_eq!(copy.product_id(), 0x00b0);
        assert_eq!(copy.revision(), 0x0102);
    }
}
