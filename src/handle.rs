use std::cell::{Cell, RefCell};

use log::debug;
use slab::Slab;

use crate::{
    descriptors::DeviceDescriptor,
    pipe_id::MAX_ENDPOINT_NUMBER,
    platform::{Backend, DataStage},
    transfer::{internal::Transfer, AsyncInPipe, ControlIn, ControlOut, Direction},
    Device, Error, PipeId, ResultExt, SetupPacket,
};

const ENDPOINTS: usize = MAX_ENDPOINT_NUMBER as usize + 1;

/// An open channel to one interface of a USB device.
///
/// The handle owns the OS channel and an arena holding every asynchronous
/// transfer allocated through it. Pipes opened with
/// [`open_async_in_pipe`][Self::open_async_in_pipe] borrow the handle, so the
/// handle cannot be closed while a pipe is alive.
///
/// A handle is meant to be used from one thread at a time.
pub struct GenericHandle<B: Backend> {
    // Dropped before `transfers`, so the OS has let go of every buffer by the
    // time the arena frees them.
    backend: B,
    transfers: RefCell<Slab<Transfer<B::Transfer>>>,

    /// Milliseconds, 0 waits forever.
    in_timeout: [Cell<u32>; ENDPOINTS],
    out_timeout: [Cell<u32>; ENDPOINTS],
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl GenericHandle<crate::platform::UsbfsBackend> {
    /// Open the device node of `interface` and check that it is still the
    /// device that was enumerated.
    pub fn open(interface: &crate::GenericInterface) -> Result<Self, Error> {
        let backend =
            crate::platform::UsbfsBackend::open(std::path::Path::new(interface.os_filename()))?;
        let handle = GenericHandle::with_backend(backend);
        handle.check_device(interface.device())?;
        Ok(handle)
    }
}

impl<B: Backend> GenericHandle<B> {
    pub fn with_backend(backend: B) -> Self {
        GenericHandle {
            backend,
            transfers: RefCell::new(Slab::new()),
            in_timeout: Default::default(),
            out_timeout: Default::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read the live device descriptor and compare it against the identity
    /// recorded for `device` when it was enumerated.
    pub fn check_device(&self, device: &Device) -> Result<(), Error> {
        let descriptor = self.backend.device_descriptor()?;
        check_device_descriptor(&descriptor, device)
    }

    /// Set the timeout for synchronous transfers on a pipe, in milliseconds.
    /// 0, the default, waits forever.
    ///
    /// The timeout of pipe 0x00 also applies to control transfers.
    pub fn set_timeout(&self, pipe_id: u8, timeout: u32) -> Result<(), Error> {
        let pipe = PipeId::new(pipe_id)?;
        self.timeout_cell(pipe).set(timeout);
        Ok(())
    }

    pub fn timeout(&self, pipe: PipeId) -> u32 {
        self.timeout_cell(pipe).get()
    }

    fn timeout_cell(&self, pipe: PipeId) -> &Cell<u32> {
        let n = pipe.endpoint_number() as usize;
        if pipe.is_in() {
            &self.in_timeout[n]
        } else {
            &self.out_timeout[n]
        }
    }

    /// Perform a control transfer. The direction of `data` must match
    /// bit 7 of `setup.request_type` and hold at least `setup.length` bytes.
    pub fn control_transfer(&self, setup: SetupPacket, data: DataStage) -> Result<usize, Error> {
        let length = setup.length as usize;
        if data.len() < length {
            return Err(Error::new(format!(
                "Control transfer buffer holds {} bytes but wLength is {length}.",
                data.len()
            )));
        }

        let data = match (setup.direction(), data) {
            (Direction::In, DataStage::In(buf)) => DataStage::In(&mut buf[..length]),
            (Direction::Out, DataStage::Out(buf)) => DataStage::Out(&buf[..length]),
            _ => {
                return Err(Error::new(
                    "Control transfer data direction does not match bmRequestType.",
                ))
            }
        };

        self.backend
            .control_transfer(setup, self.out_timeout[0].get(), data)
    }

    /// Perform an IN control transfer into `buf`, which must hold at least
    /// `request.length` bytes.
    pub fn control_in(&self, request: ControlIn, buf: &mut [u8]) -> Result<usize, Error> {
        self.control_transfer(request.setup_packet(), DataStage::In(buf))
    }

    pub fn control_out(&self, request: ControlOut) -> Result<usize, Error> {
        let setup = request.setup_packet()?;
        self.control_transfer(setup, DataStage::Out(request.data))
    }

    /// Read from a bulk or interrupt IN pipe, blocking for at most the
    /// pipe's timeout. A short read is not an error.
    pub fn read_pipe(&self, pipe_id: u8, buf: &mut [u8]) -> Result<usize, Error> {
        PipeId::new_in(pipe_id)
            .and_then(|pipe| {
                self.backend
                    .bulk_transfer(pipe, self.timeout(pipe), DataStage::In(buf))
            })
            .context("Failed to read from pipe.")
    }

    /// Write to a bulk or interrupt OUT pipe, blocking for at most the
    /// pipe's timeout.
    pub fn write_pipe(&self, pipe_id: u8, data: &[u8]) -> Result<usize, Error> {
        PipeId::new_out(pipe_id)
            .and_then(|pipe| {
                self.backend
                    .bulk_transfer(pipe, self.timeout(pipe), DataStage::Out(data))
            })
            .context("Failed to write to pipe.")
    }

    /// Open an asynchronous pipe for an IN endpoint.
    pub fn open_async_in_pipe(&self, pipe_id: u8) -> Result<AsyncInPipe<'_, B>, Error> {
        let pipe = PipeId::new(pipe_id)?;
        if !pipe.is_in() {
            return Err(Error::new(
                "Asynchronous pipes for OUT endpoints are not supported.",
            ));
        }
        self.backend.prepare_async_in_pipe(pipe)?;
        Ok(AsyncInPipe::new(self, pipe))
    }

    /// Collect every completion the OS has ready, without blocking, and
    /// record it on the transfer it belongs to.
    pub fn handle_events(&self) -> Result<(), Error> {
        while let Some(key) = self.backend.reap()? {
            let mut transfers = self.transfers.borrow_mut();
            let Some(transfer) = transfers.get_mut(key) else {
                return Err(Error::new(
                    "A completed asynchronous transfer was not recognized.",
                )
                .log_error());
            };

            let completion = self.backend.finish_transfer(transfer.platform_mut());
            if transfer.is_orphaned() {
                debug!("Freeing orphaned transfer {key}");
                transfers.remove(key);
            } else {
                transfer.handle_completion(completion);
            }
        }

        // Backends that report completion per transfer never reap, so poll
        // the orphans here.
        self.transfers.borrow_mut().retain(|key, transfer| {
            if transfer.is_orphaned() && !transfer.pending(&self.backend) {
                debug!("Freeing orphaned transfer {key}");
                return false;
            }
            true
        });

        Ok(())
    }

    /// Allocate `count` transfers of `size` bytes for `pipe`, returning their
    /// arena keys. Nothing stays allocated if any allocation fails.
    pub(crate) fn alloc_transfers(
        &self,
        pipe: PipeId,
        count: usize,
        size: usize,
    ) -> Result<Vec<usize>, Error> {
        let mut keys = Vec::new();
        keys.try_reserve_exact(count).map_err(|_| Error::no_memory())?;

        let mut transfers = self.transfers.borrow_mut();
        for _ in 0..count {
            let key = transfers.vacant_key();
            match self.backend.alloc_transfer(pipe, size, key) {
                Ok(platform) => {
                    transfers.insert(Transfer::new(platform, size));
                    keys.push(key);
                }
                Err(e) => {
                    for key in keys {
                        transfers.remove(key);
                    }
                    return Err(e);
                }
            }
        }

        debug!("Allocated {count} transfers of {size} bytes for pipe {pipe}");
        Ok(keys)
    }

    pub(crate) fn with_transfer<R>(
        &self,
        key: usize,
        f: impl FnOnce(&mut Transfer<B::Transfer>, &B) -> R,
    ) -> R {
        let mut transfers = self.transfers.borrow_mut();
        f(&mut transfers[key], &self.backend)
    }

    /// Give up the transfers of a closed pipe. Idle ones are freed now;
    /// pending ones once the OS reports them complete.
    pub(crate) fn release_transfers(&self, keys: &[usize]) {
        let mut transfers = self.transfers.borrow_mut();
        for &key in keys {
            if transfers[key].is_pending() {
                transfers[key].orphan();
            } else {
                transfers.remove(key);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn transfer_count(&self) -> usize {
        self.transfers.borrow().len()
    }
}

/// Detect a device that was swapped for another between enumeration and
/// open.
pub(crate) fn check_device_descriptor(
    descriptor: &DeviceDescriptor,
    device: &Device,
) -> Result<(), Error> {
    if descriptor.vendor_id() != device.vendor_id() {
        return Err(Error::new(format!(
            "Vendor ID mismatch: 0x{:04x} != 0x{:04x}.",
            descriptor.vendor_id(),
            device.vendor_id()
        )));
    }
    if descriptor.product_id() != device.product_id() {
        return Err(Error::new(format!(
            "Product ID mismatch: 0x{:04x} != 0x{:04x}.",
            descriptor.product_id(),
            device.product_id()
        )));
    }
    if descriptor.device_version() != device.revision() {
        return Err(Error::new(format!(
            "Device revision mismatch: 0x{:04x} != 0x{:04x}.",
            descriptor.device_version(),
            device.revision()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::mock::MockBackend,
        transfer::{ControlType, Recipient},
        ErrorCode,
    };

    fn device() -> Device {
        Device::for_test(0x1ffb, 0x00b0, 0x0102, Some("0001"))
    }

    #[test]
    fn descriptor_matches() {
        let desc = DeviceDescriptor::from_ids(0x1ffb, 0x00b0, 0x0102);
        assert!(check_device_descriptor(&desc, &device()).is_ok());
    }

    #[test]
    fn descriptor_mismatch() {
        let desc = DeviceDescriptor::from_ids(0x1ffc, 0x00b0, 0x0102);
        assert_eq!(
            check_device_descriptor(&desc, &device())
                .unwrap_err()
                .message(),
            "Vendor ID mismatch: 0x1ffc != 0x1ffb."
        );

        let desc = DeviceDescriptor::from_ids(0x1ffb, 0x00b1, 0x0102);
        assert_eq!(
            check_device_descriptor(&desc, &device())
                .unwrap_err()
                .message(),
            "Product ID mismatch: 0x00b1 != 0x00b0."
        );

        let desc = DeviceDescriptor::from_ids(0x1ffb, 0x00b0, 0x0100);
        assert_eq!(
            check_device_descriptor(&desc, &device())
                .unwrap_err()
                .message(),
            "Device revision mismatch: 0x0100 != 0x0102."
        );
    }

    #[test]
    fn check_device_reads_descriptor() {
        let mock = MockBackend::new();
        mock.set_descriptor(DeviceDescriptor::from_ids(0x1ffb, 0x00b0, 0x0102));
        let handle = GenericHandle::with_backend(mock);
        assert!(handle.check_device(&device()).is_ok());
    }

    #[test]
    fn timeouts() {
        let handle = GenericHandle::with_backend(MockBackend::new());
        let ep1_in = PipeId::new(0x81).unwrap();
        let ep1_out = PipeId::new(0x01).unwrap();
        assert_eq!(handle.timeout(ep1_in), 0);

        handle.set_timeout(0x81, 350).unwrap();
        assert_eq!(handle.timeout(ep1_in), 350);
        assert_eq!(handle.timeout(ep1_out), 0);

        assert_eq!(
            handle.set_timeout(0x80, 1).unwrap_err().message(),
            "Invalid pipe ID 0x80."
        );
    }

    #[test]
    fn read_pipe_uses_in_timeout() {
        let handle = GenericHandle::with_backend(MockBackend::new());
        handle.set_timeout(0x82, 20).unwrap();
        let mut buf = [0; 5];
        assert_eq!(handle.read_pipe(0x82, &mut buf).unwrap(), 5);
        assert_eq!(handle.backend().last_sync(), Some((0x82, 20, 5)));
    }

    #[test]
    fn pipe_direction_errors() {
        let handle = GenericHandle::with_backend(MockBackend::new());
        let mut buf = [0; 4];
        assert_eq!(
            handle.read_pipe(0x02, &mut buf).unwrap_err().message(),
            "Failed to read from pipe.  Invalid pipe ID 0x02.  Expected an IN pipe."
        );
        assert_eq!(
            handle.write_pipe(0x82, &buf).unwrap_err().message(),
            "Failed to write to pipe.  Invalid pipe ID 0x82.  Expected an OUT pipe."
        );
        assert_eq!(
            handle.write_pipe(0x20, &buf).unwrap_err().message(),
            "Failed to write to pipe.  Invalid pipe ID 0x20."
        );
    }

    #[test]
    fn sync_transfer_failure_gets_context() {
        let handle = GenericHandle::with_backend(MockBackend::new());
        handle
            .backend()
            .fail_sync(Error::new("The operation timed out.").with_code(ErrorCode::Timeout));
        let err = handle.write_pipe(0x03, &[1, 2]).unwrap_err();
        assert_eq!(
            err.message(),
            "Failed to write to pipe.  The operation timed out."
        );
        assert!(err.has_code(ErrorCode::Timeout));
    }

    #[test]
    fn control_transfers() {
        let handle = GenericHandle::with_backend(MockBackend::new());
        handle.set_timeout(0x00, 100).unwrap();

        let mut buf = [0; 16];
        let n = handle
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: 0x81,
                    value: 0,
                    index: 0,
                    length: 8,
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(handle.backend().last_sync(), Some((0x00, 100, 8)));

        let n = handle
            .control_out(ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: 0x92,
                value: 1,
                index: 0,
                data: &[],
            })
            .unwrap();
        assert_eq!(n, 0);

        let err = handle
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: 0x81,
                    value: 0,
                    index: 0,
                    length: 32,
                },
                &mut buf,
            )
            .unwrap_err();
        assert_eq!(
            err.message(),
            "Control transfer buffer holds 16 bytes but wLength is 32."
        );
    }

    #[test]
    fn async_pipe_must_be_in() {
        let handle = GenericHandle::with_backend(MockBackend::new());
        assert_eq!(
            handle.open_async_in_pipe(0x02).err().unwrap().message(),
            "Asynchronous pipes for OUT endpoints are not supported."
        );
        assert_eq!(
            handle.open_async_in_pipe(0x80).err().unwrap().message(),
            "Invalid pipe ID 0x80."
        );
        assert!(handle.open_async_in_pipe(0x82).is_ok());
    }

    #[test]
    fn unknown_completion() {
        let handle = GenericHandle::with_backend(MockBackend::new());
        handle.backend().push_reaped(7);
        assert_eq!(
            handle.handle_events().unwrap_err().message(),
            "A completed asynchronous transfer was not recognized."
        );
    }
}
