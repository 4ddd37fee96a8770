use std::{
    ffi::{c_int, c_void},
    mem::ManuallyDrop,
    slice,
};

use crate::{
    platform::PlatformTransfer,
    transfer::Completion,
    Error, PipeId,
};

use super::{
    error_from_urb_status,
    usbfs::{Urb, USBDEVFS_URB_TYPE_BULK},
};

/// An asynchronous bulk or interrupt IN request block and its buffer.
///
/// This logically contains a `Vec` with urb.buffer and capacity. It also owns
/// the `urb` allocation itself, which is stored out-of-line so that its
/// address stays fixed while the kernel holds it, even if the owning arena
/// moves this struct.
pub struct UsbfsTransfer {
    urb: *mut Urb,
    capacity: usize,
}

unsafe impl Send for UsbfsTransfer {}

impl UsbfsTransfer {
    /// `key` comes back in the URB's user context when it is reaped.
    pub(super) fn new(pipe: PipeId, size: usize, key: usize) -> Result<UsbfsTransfer, Error> {
        // usbdevfs_urb uses ints to represent sizes.
        let buffer_length =
            c_int::try_from(size).map_err(|_| Error::new("Transfer size is too large."))?;

        let mut v = Vec::new();
        v.try_reserve_exact(size).map_err(|_| Error::no_memory())?;
        v.resize(size, 0u8);
        let mut v = ManuallyDrop::new(v);

        Ok(UsbfsTransfer {
            urb: Box::into_raw(Box::new(Urb {
                ep_type: USBDEVFS_URB_TYPE_BULK,
                endpoint: pipe.address(),
                status: 0,
                flags: 0,
                buffer: v.as_mut_ptr(),
                buffer_length,
                actual_length: 0,
                start_frame: 0,
                number_of_packets_or_stream_id: 0,
                error_count: 0,
                signr: 0,
                usercontext: key as *mut c_void,
            })),
            capacity: v.capacity(),
        })
    }

    #[inline]
    pub(super) fn urb(&self) -> &Urb {
        unsafe { &*self.urb }
    }

    #[inline]
    pub(super) fn urb_mut(&mut self) -> &mut Urb {
        unsafe { &mut *self.urb }
    }

    #[inline]
    pub(super) fn urb_ptr(&self) -> *mut Urb {
        self.urb
    }

    /// Clear the results of a previous run before resubmitting.
    pub(super) fn reset(&mut self) {
        let urb = self.urb_mut();
        urb.status = 0;
        urb.actual_length = 0;
        urb.error_count = 0;
    }

    /// Decode the results the kernel wrote into a reaped URB.
    pub(super) fn completion(&self) -> Completion {
        let urb = self.urb();
        let mut error = error_from_urb_status(urb.status);

        if error.is_none() && urb.error_count != 0 {
            error = Some(Error::new(format!(
                "Non-zero error count for USB request: {}.",
                urb.error_count
            )));
        }

        Completion {
            transferred: usize::try_from(urb.actual_length).unwrap_or(0),
            error,
        }
    }
}

impl PlatformTransfer for UsbfsTransfer {
    fn buffer(&self) -> &[u8] {
        let len = usize::try_from(self.urb().buffer_length).unwrap_or(0);
        unsafe { slice::from_raw_parts(self.urb().buffer, len) }
    }
}

impl Drop for UsbfsTransfer {
    fn drop(&mut self) {
        unsafe {
            drop(Vec::from_raw_parts((*self.urb).buffer, 0, self.capacity));
            drop(Box::from_raw(self.urb));
        }
    }
}

/// Recover the arena key stored in a reaped URB.
pub(super) fn urb_key(urb: *mut Urb) -> usize {
    unsafe { (*urb).usercontext as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    fn transfer(size: usize, key: usize) -> UsbfsTransfer {
        UsbfsTransfer::new(PipeId::new(0x81).unwrap(), size, key).unwrap()
    }

    #[test]
    fn new_transfer() {
        let t = transfer(4, 9);
        assert_eq!(urb_key(t.urb_ptr()), 9);
        assert_eq!(t.urb().endpoint, 0x81);
        assert_eq!(t.urb().buffer_length, 4);
        assert_eq!(t.buffer(), &[0; 4]);
    }

    #[test]
    fn too_large() {
        let pipe = PipeId::new(0x81).unwrap();
        for size in [usize::MAX, c_int::MAX as usize + 1] {
            let Err(err) = UsbfsTransfer::new(pipe, size, 0) else {
                panic!("transfer of {size} bytes was allocated");
            };
            assert_eq!(err.message(), "Transfer size is too large.");
        }
    }

    #[test]
    fn completion_success() {
        let mut t = transfer(4, 1);
        t.urb_mut().actual_length = 3;
        assert_eq!(
            t.completion(),
            Completion {
                transferred: 3,
                error: None
            }
        );
    }

    #[test]
    fn completion_error_count() {
        let mut t = transfer(4, 1);
        t.urb_mut().actual_length = 100;
        t.urb_mut().error_count = 2;
        let c = t.completion();
        assert_eq!(c.transferred, 100);
        assert_eq!(
            c.error.unwrap().message(),
            "Non-zero error count for USB request: 2."
        );
    }

    #[test]
    fn completion_status_wins_over_error_count() {
        let mut t = transfer(4, 1);
        t.urb_mut().actual_length = 100;
        t.urb_mut().error_count = 2;
        t.urb_mut().status = -104; // ECONNRESET
        let c = t.completion();
        assert_eq!(c.transferred, 100);
        let err = c.error.unwrap();
        assert!(err.has_code(ErrorCode::Cancelled));
        assert!(err.message().starts_with("The operation was cancelled."));
    }

    #[test]
    fn negative_length_is_zero() {
        let mut t = transfer(4, 1);
        t.urb_mut().actual_length = -5;
        assert_eq!(t.completion().transferred, 0);
    }

    #[test]
    fn reset_clears_results() {
        let mut t = transfer(4, 1);
        t.urb_mut().actual_length = 4;
        t.urb_mut().error_count = 1;
        t.urb_mut().status = -32;
        t.reset();
        assert_eq!(
            t.completion(),
            Completion {
                transferred: 0,
                error: None
            }
        );
    }
}
