use std::{
    ffi::{c_uint, c_void},
    fs::File,
    io::{Read, Seek, SeekFrom},
    mem::ManuallyDrop,
    path::{Path, PathBuf},
};

use log::debug;
use rustix::{
    fd::{AsRawFd, FromRawFd, OwnedFd},
    fs::{Mode, OFlags},
    io::Errno,
};

use super::{
    error_from_io, error_from_rustix,
    transfer::{urb_key, UsbfsTransfer},
    usbfs::{self, BulkTransfer, CtrlTransfer},
};
use crate::{
    descriptors::{DeviceDescriptor, DESCRIPTOR_LEN_DEVICE},
    platform::{Backend, CancelGranularity, DataStage},
    transfer::Completion,
    Error, PipeId, SetupPacket,
};

/// A usbfs device node (`/dev/bus/usb/BBB/DDD`) opened for reading and
/// writing.
///
/// Closing the node makes the kernel kill and forget every URB still
/// submitted on it.
pub struct UsbfsBackend {
    fd: OwnedFd,
    path: PathBuf,
}

impl UsbfsBackend {
    pub fn open(path: &Path) -> Result<UsbfsBackend, Error> {
        debug!("Opening usbfs device {}", path.display());
        let fd = rustix::fs::open(path, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty())
            .map_err(|e| {
                error_from_rustix(
                    e,
                    &format!("Failed to open USB device {}.", path.display()),
                )
            })?;
        Ok(UsbfsBackend {
            fd,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for UsbfsBackend {
    type Transfer = UsbfsTransfer;

    fn cancel_granularity(&self) -> CancelGranularity {
        CancelGranularity::Individual
    }

    fn alloc_transfer(&self, pipe: PipeId, size: usize, key: usize) -> Result<UsbfsTransfer, Error> {
        UsbfsTransfer::new(pipe, size, key)
    }

    unsafe fn submit_transfer(&self, transfer: &mut UsbfsTransfer) -> Result<(), Error> {
        transfer.reset();
        let urb = transfer.urb_ptr();
        let ep = transfer.urb().endpoint;
        match unsafe { usbfs::submit_urb(&self.fd, urb) } {
            Ok(()) => {
                debug!("Submitted URB {urb:?} on ep {ep:x}");
                Ok(())
            }
            Err(e) => {
                debug!("Failed to submit URB {urb:?} on ep {ep:x}: {e}");
                Err(error_from_rustix(e, "Submitting USB request block failed."))
            }
        }
    }

    fn reap(&self) -> Result<Option<usize>, Error> {
        match usbfs::reap_urb_ndelay(&self.fd) {
            Ok(urb) => {
                let key = urb_key(urb);
                debug!("Reaped URB {urb:?} for transfer {key}");
                Ok(Some(key))
            }
            Err(Errno::AGAIN) => Ok(None),
            Err(e) => Err(error_from_rustix(
                e,
                "Failed to reap an asynchronous transfer.",
            )),
        }
    }

    fn finish_transfer(&self, transfer: &mut UsbfsTransfer) -> Completion {
        let urb = transfer.urb();
        debug!(
            "URB {:?} for ep {:x} completed, status={} actual_length={}",
            transfer.urb_ptr(),
            urb.endpoint,
            urb.status,
            urb.actual_length
        );
        transfer.completion()
    }

    fn cancel_transfer(&self, transfer: &mut UsbfsTransfer) -> Result<(), Error> {
        let urb = transfer.urb_ptr();
        match unsafe { usbfs::discard_urb(&self.fd, urb) } {
            Ok(()) => {
                debug!("Requested cancellation of URB {urb:?}");
                Ok(())
            }
            // The URB already completed.
            Err(Errno::INVAL) => Ok(()),
            Err(e) => Err(error_from_rustix(
                e,
                "Failed to cancel asynchronous transfer.",
            )),
        }
    }

    fn device_descriptor(&self) -> Result<DeviceDescriptor, Error> {
        // The node reads as the device descriptor followed by the
        // configuration descriptors.
        let mut file = unsafe { ManuallyDrop::new(File::from_raw_fd(self.fd.as_raw_fd())) };
        file.seek(SeekFrom::Start(0))
            .map_err(|e| error_from_io(&e, "Failed to go to beginning of USB device file."))?;

        let mut buf = Vec::with_capacity(DESCRIPTOR_LEN_DEVICE as usize);
        Read::by_ref(&mut *file)
            .take(DESCRIPTOR_LEN_DEVICE as u64)
            .read_to_end(&mut buf)
            .map_err(|e| error_from_io(&e, "Failed to read device descriptor."))?;

        DeviceDescriptor::parse(&buf)
    }

    fn control_transfer(
        &self,
        setup: SetupPacket,
        timeout: u32,
        data: DataStage,
    ) -> Result<usize, Error> {
        let ptr = match data {
            DataStage::In(buf) => buf.as_mut_ptr(),
            DataStage::Out(buf) => buf.as_ptr().cast_mut(),
        };
        let transfer = CtrlTransfer {
            bRequestType: setup.request_type,
            bRequest: setup.request,
            wValue: setup.value,
            wIndex: setup.index,
            wLength: setup.length,
            timeout,
            data: ptr as *mut c_void,
        };

        let n = unsafe { usbfs::control(&self.fd, transfer) }
            .map_err(|e| error_from_rustix(e, "Control transfer failed."))?;
        debug!(
            "Control transfer {:02x} {:02x} completed with {n} bytes",
            setup.request_type, setup.request
        );
        Ok(n)
    }

    fn bulk_transfer(&self, pipe: PipeId, timeout: u32, data: DataStage) -> Result<usize, Error> {
        let len = bulk_transfer_len(pipe, data.len())?;

        let ptr = match data {
            DataStage::In(buf) => buf.as_mut_ptr(),
            DataStage::Out(buf) => buf.as_ptr().cast_mut(),
        };
        let transfer = BulkTransfer {
            ep: pipe.address().into(),
            len,
            timeout,
            data: ptr as *mut c_void,
        };

        unsafe { usbfs::bulk(&self.fd, transfer) }.map_err(|e| error_from_rustix(e, ""))
    }
}

/// Length field of a synchronous bulk request for `len` bytes on `pipe`.
fn bulk_transfer_len(pipe: PipeId, len: usize) -> Result<c_uint, Error> {
    // A zero-length IN request can leave the kernel driver in a state
    // where every later request times out.
    if len == 0 && pipe.is_in() {
        return Err(Error::new("Transfer size 0 is not allowed."));
    }
    c_uint::try_from(len).map_err(|_| Error::new("Transfer size is too large."))
}

impl Drop for UsbfsBackend {
    fn drop(&mut self) {
        debug!("Closing usbfs device {}", self.path.display());
    }
}
