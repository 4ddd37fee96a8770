//! The USB device descriptor, used to confirm the identity of an opened device.

use std::fmt::Debug;

use crate::Error;

pub(crate) const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub(crate) const DESCRIPTOR_LEN_DEVICE: u8 = 18;

macro_rules! descriptor_fields {
    (impl $tname:ident {
        $(
            $(#[$attr:meta])*
            $vis:vis fn $name:ident at $pos:literal -> $ty:ty;
        )*
    }) => {
        impl $tname {
            $(
                $(#[$attr])*
                #[inline]
                $vis fn $name(&self) -> $ty {
                    let mut bytes = [0; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&self.0[$pos..$pos + std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(bytes)
                }
            )*
        }
    }
}

/// The 18-byte device descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceDescriptor([u8; DESCRIPTOR_LEN_DEVICE as usize]);

impl DeviceDescriptor {
    /// Parse a device descriptor from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        let len = DESCRIPTOR_LEN_DEVICE as usize;
        if buf.len() < len {
            return Err(Error::new(format!(
                "Failed to read device descriptor.  \
                 Expected {len}-byte device descriptor, read {} bytes.",
                buf.len()
            )));
        }

        if (buf[0] as usize) < len || buf[1] != DESCRIPTOR_TYPE_DEVICE {
            return Err(Error::new(format!(
                "Invalid device descriptor: bLength {}, bDescriptorType {}.",
                buf[0], buf[1]
            )));
        }

        let mut bytes = [0; DESCRIPTOR_LEN_DEVICE as usize];
        bytes.copy_from_slice(&buf[..len]);
        Ok(DeviceDescriptor(bytes))
    }

    /// Get the bytes of the descriptor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[allow(unused)]
    pub(crate) fn from_ids(vendor_id: u16, product_id: u16, device_version: u16) -> Self {
        let [vl, vh] = vendor_id.to_le_bytes();
        let [pl, ph] = product_id.to_le_bytes();
        let [dl, dh] = device_version.to_le_bytes();
        DeviceDescriptor([
            DESCRIPTOR_LEN_DEVICE,
            DESCRIPTOR_TYPE_DEVICE,
            0x00,
            0x02,
            0,
            0,
            0,
            64,
            vl,
            vh,
            pl,
            ph,
            dl,
            dh,
            0,
            0,
            0,
            1,
        ])
    }
}

descriptor_fields! {
    impl DeviceDescriptor {
        /// `bcdUSB` descriptor field: USB Specification Number.
        #[doc(alias = "bcdUSB")]
        pub fn usb_version at 2 -> u16;

        /// `bDeviceClass` descriptor field: Class code, assigned by USB-IF.
        #[doc(alias = "bDeviceClass")]
        pub fn class at 4 -> u8;

        /// `bMaxPacketSize0` descriptor field: Maximum packet size for 0 Endpoint.
        #[doc(alias = "bMaxPacketSize0")]
        pub fn max_packet_size_0 at 7 -> u8;

        /// `idVendor` descriptor field: Vendor ID, assigned by USB-IF.
        #[doc(alias = "idVendor")]
        pub fn vendor_id at 8 -> u16;

        /// `idProduct` descriptor field: Product ID, assigned by the manufacturer.
        #[doc(alias = "idProduct")]
        pub fn product_id at 10 -> u16;

        /// `bcdDevice` descriptor field: Device release number.
        #[doc(alias = "bcdDevice")]
        pub fn device_version at 12 -> u16;

        fn serial_number_string_index_raw at 16 -> u8;

        /// `bNumConfigurations` descriptor field: Number of configurations
        #[doc(alias = "bNumConfigurations")]
        pub fn num_configurations at 17 -> u8;
    }
}

impl DeviceDescriptor {
    /// `iSerialNumber` descriptor field: Index for serial number string.
    pub fn serial_number_string_index(&self) -> Option<u8> {
        Some(self.serial_number_string_index_raw()).filter(|&i| i != 0)
    }
}

impl Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("usb_version", &format_args!("0x{:04X}", self.usb_version()))
            .field("class", &format_args!("0x{:02X}", self.class()))
            .field("max_packet_size_0", &self.max_packet_size_0())
            .field("vendor_id", &format_args!("0x{:04X}", self.vendor_id()))
            .field("product_id", &format_args!("0x{:04X}", self.product_id()))
            .field(
                "device_version",
                &format_args!("0x{:04X}", self.device_version()),
            )
            .field(
                "serial_number_string_index",
                &self.serial_number_string_index(),
            )
            .field("num_configurations", &self.num_configurations())
            .finish()
    }
}
