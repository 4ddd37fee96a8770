use std::fmt;

use crate::Error;

/// Highest endpoint number a pipe ID may name.
pub const MAX_ENDPOINT_NUMBER: u8 = 15;

/// Identifies a pipe: an endpoint address with the direction in bit 7.
///
/// Bit 7 set means IN (device to host), the low nibble is the endpoint number,
/// and bits 4..=6 must be clear. `0x80` (endpoint 0 IN) is not a valid pipe.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(u8);

impl PipeId {
    /// Validate a raw pipe ID byte.
    pub fn new(id: u8) -> Result<PipeId, Error> {
        if id & 0x70 != 0 || id == 0x80 {
            return Err(Error::new(format!("Invalid pipe ID 0x{id:02x}.")));
        }
        Ok(PipeId(id))
    }

    /// Validate a raw pipe ID byte that must refer to an IN pipe.
    pub fn new_in(id: u8) -> Result<PipeId, Error> {
        let pipe = PipeId::new(id)?;
        if !pipe.is_in() {
            return Err(Error::new(format!(
                "Invalid pipe ID 0x{id:02x}.  Expected an IN pipe."
            )));
        }
        Ok(pipe)
    }

    /// Validate a raw pipe ID byte that must refer to an OUT pipe.
    pub fn new_out(id: u8) -> Result<PipeId, Error> {
        let pipe = PipeId::new(id)?;
        if pipe.is_in() {
            return Err(Error::new(format!(
                "Invalid pipe ID 0x{id:02x}.  Expected an OUT pipe."
            )));
        }
        Ok(pipe)
    }

    pub fn is_in(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn endpoint_number(self) -> u8 {
        self.0 & MAX_ENDPOINT_NUMBER
    }

    /// The raw byte, as used in endpoint descriptors.
    pub fn address(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeId(0x{:02x})", self.0)
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Check that `id` is a valid pipe ID.
pub fn check_pipe_id(id: u8) -> Result<(), Error> {
    PipeId::new(id).map(drop)
}

/// Check that `id` is a valid IN pipe ID.
pub fn check_pipe_id_in(id: u8) -> Result<(), Error> {
    PipeId::new_in(id).map(drop)
}

/// Check that `id` is a valid OUT pipe ID.
pub fn check_pipe_id_out(id: u8) -> Result<(), Error> {
    PipeId::new_out(id).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        for id in (0x00..=0x0F).chain(0x81..=0x8F) {
            assert!(check_pipe_id(id).is_ok(), "0x{id:02x}");
        }
    }

    #[test]
    fn rejects_invalid_ids() {
        for id in (0x10..=0x7F).chain([0x80]).chain(0x90..=0xFF) {
            let err = check_pipe_id(id).unwrap_err();
            assert_eq!(err.message(), format!("Invalid pipe ID 0x{id:02x}."));
        }
    }

    #[test]
    fn direction_checks() {
        assert!(check_pipe_id_in(0x82).is_ok());
        assert!(check_pipe_id_out(0x02).is_ok());
        assert!(check_pipe_id_out(0x00).is_ok());

        assert_eq!(
            check_pipe_id_in(0x02).unwrap_err().message(),
            "Invalid pipe ID 0x02.  Expected an IN pipe."
        );
        assert_eq!(
            check_pipe_id_out(0x82).unwrap_err().message(),
            "Invalid pipe ID 0x82.  Expected an OUT pipe."
        );
        assert_eq!(
            check_pipe_id_in(0x80).unwrap_err().message(),
            "Invalid pipe ID 0x80."
        );
    }

    #[test]
    fn fields() {
        let p = PipeId::new(0x8F).unwrap();
        assert!(p.is_in());
        assert_eq!(p.endpoint_number(), 15);
        assert_eq!(p.address(), 0x8F);
        assert_eq!(p.to_string(), "0x8f");
        assert!(!PipeId::new(0x01).unwrap().is_in());
    }
}
