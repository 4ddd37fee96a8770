use crate::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Direction {
    /// Host to device
    Out = 0,

    /// Device to host
    In = 1,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ControlType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// The eight bytes sent in the SETUP stage of a control transfer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SetupPacket {
    #[doc(alias = "bmRequestType")]
    pub request_type: u8,

    #[doc(alias = "bRequest")]
    pub request: u8,

    #[doc(alias = "wValue")]
    pub value: u16,

    #[doc(alias = "wIndex")]
    pub index: u16,

    #[doc(alias = "wLength")]
    pub length: u16,
}

impl SetupPacket {
    pub fn direction(&self) -> Direction {
        if self.request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn to_bytes(&self) -> [u8; SETUP_PACKET_SIZE] {
        let [value_lo, value_hi] = self.value.to_le_bytes();
        let [index_lo, index_hi] = self.index.to_le_bytes();
        let [length_lo, length_hi] = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value_lo,
            value_hi,
            index_lo,
            index_hi,
            length_lo,
            length_hi,
        ]
    }
}

pub struct ControlOut<'a> {
    #[doc(alias = "bmRequestType")]
    pub control_type: ControlType,

    #[doc(alias = "bmRequestType")]
    pub recipient: Recipient,

    #[doc(alias = "bRequest")]
    pub request: u8,

    #[doc(alias = "wValue")]
    pub value: u16,

    #[doc(alias = "wIndex")]
    pub index: u16,

    #[doc(alias = "wLength")]
    pub data: &'a [u8],
}

impl ControlOut<'_> {
    pub(crate) fn setup_packet(&self) -> Result<SetupPacket, Error> {
        let length = u16::try_from(self.data.len())
            .map_err(|_| Error::new("Transfer size is too large."))?;
        Ok(SetupPacket {
            request_type: request_type(Direction::Out, self.control_type, self.recipient),
            request: self.request,
            value: self.value,
            index: self.index,
            length,
        })
    }
}

pub struct ControlIn {
    #[doc(alias = "bmRequestType")]
    pub control_type: ControlType,

    #[doc(alias = "bmRequestType")]
    pub recipient: Recipient,

    #[doc(alias = "bRequest")]
    pub request: u8,

    #[doc(alias = "wValue")]
    pub value: u16,

    #[doc(alias = "wIndex")]
    pub index: u16,

    #[doc(alias = "wLength")]
    pub length: u16,
}

impl ControlIn {
    pub(crate) fn setup_packet(&self) -> SetupPacket {
        SetupPacket {
            request_type: request_type(Direction::In, self.control_type, self.recipient),
            request: self.request,
            value: self.value,
            index: self.index,
            length: self.length,
        }
    }
}

pub(crate) const SETUP_PACKET_SIZE: usize = 8;

fn request_type(direction: Direction, control_type: ControlType, recipient: Recipient) -> u8 {
    ((direction as u8) << 7) | ((control_type as u8) << 5) | (recipient as u8)
}
