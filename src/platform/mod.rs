//! The seam between the portable transfer engine and an OS USB stack.

use crate::{descriptors::DeviceDescriptor, transfer::Completion, Error, PipeId, SetupPacket};

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux_usbfs;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux_usbfs::*;

#[cfg(test)]
pub(crate) mod mock;

/// How a backend aborts the asynchronous transfers of a pipe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CancelGranularity {
    /// Every pending transfer must be cancelled on its own.
    Individual,

    /// A single request aborts every pending transfer on the pipe.
    WholePipe,
}

/// The data stage of a synchronous transfer.
#[derive(Debug)]
pub enum DataStage<'a> {
    In(&'a mut [u8]),
    Out(&'a [u8]),
}

impl DataStage<'_> {
    pub fn len(&self) -> usize {
        match self {
            DataStage::In(buf) => buf.len(),
            DataStage::Out(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backend-owned state of one asynchronous IN transfer.
pub trait PlatformTransfer {
    /// The transfer's data buffer. Only meaningful while the transfer is not
    /// pending.
    fn buffer(&self) -> &[u8];
}

/// An open channel to a USB interface through a native USB stack.
///
/// The asynchronous operations are driven by [`GenericHandle`][crate::GenericHandle]
/// and [`AsyncInPipe`][crate::AsyncInPipe]; a backend never calls back into
/// them. Completion is discovered either by [`reap`][Backend::reap] (which
/// names the finished transfer by the key it was allocated with) or by
/// [`poll_transfer`][Backend::poll_transfer]; either way the result is
/// decoded by [`finish_transfer`][Backend::finish_transfer].
pub trait Backend {
    type Transfer: PlatformTransfer;

    fn cancel_granularity(&self) -> CancelGranularity;

    /// Prepare `pipe` for asynchronous reads. Called once per pipe.
    fn prepare_async_in_pipe(&self, pipe: PipeId) -> Result<(), Error> {
        let _ = pipe;
        Ok(())
    }

    /// Allocate a transfer of `size` bytes for `pipe`. The `key` must be
    /// returned by [`reap`][Backend::reap] when the transfer completes.
    fn alloc_transfer(&self, pipe: PipeId, size: usize, key: usize)
        -> Result<Self::Transfer, Error>;

    /// Start an asynchronous read into the transfer's buffer.
    ///
    /// # Safety
    ///
    /// On success, the transfer must not be dropped until it has been
    /// reaped, polled to completion, or this backend has been dropped.
    unsafe fn submit_transfer(&self, transfer: &mut Self::Transfer) -> Result<(), Error>;

    /// Check a pending transfer for completion without blocking, for stacks
    /// that report completion per transfer rather than through
    /// [`reap`][Backend::reap].
    fn poll_transfer(&self, transfer: &mut Self::Transfer) -> Option<Completion> {
        let _ = transfer;
        None
    }

    /// Take the key of one completed transfer without blocking, or `None` if
    /// no completion is waiting.
    fn reap(&self) -> Result<Option<usize>, Error>;

    /// Decode the results of a transfer that [`reap`][Backend::reap] reported
    /// as complete.
    fn finish_transfer(&self, transfer: &mut Self::Transfer) -> Completion;

    /// Request cancellation of one transfer. Cancelling a transfer that has
    /// already completed succeeds.
    fn cancel_transfer(&self, transfer: &mut Self::Transfer) -> Result<(), Error>;

    /// Request cancellation of every transfer on `pipe`.
    fn cancel_pipe(&self, pipe: PipeId) -> Result<(), Error> {
        let _ = pipe;
        Err(Error::new(
            "Cancelling all transfers on a pipe is not supported by this backend.",
        ))
    }

    /// Read the device descriptor of the opened device.
    fn device_descriptor(&self) -> Result<DeviceDescriptor, Error>;

    /// Perform a control transfer on endpoint 0, blocking for at most
    /// `timeout` milliseconds (0 waits forever).
    fn control_transfer(
        &self,
        setup: SetupPacket,
        timeout: u32,
        data: DataStage,
    ) -> Result<usize, Error>;

    /// Perform a bulk or interrupt transfer, blocking for at most `timeout`
    /// milliseconds (0 waits forever).
    fn bulk_transfer(&self, pipe: PipeId, timeout: u32, data: DataStage)
        -> Result<usize, Error>;
}
