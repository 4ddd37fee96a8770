use crate::{
    platform::{Backend, PlatformTransfer},
    Error,
};

use super::Completion;

/// One asynchronous IN transfer: idle, pending, or completed with a result.
///
/// While `pending` is set the OS may write into the platform buffer at any
/// time, so nothing here touches it until the completion has been observed.
pub(crate) struct Transfer<T> {
    platform: T,
    size: usize,
    pending: bool,
    error: Option<Error>,
    actual_length: usize,

    /// The owning pipe is gone. The arena frees the slot once the OS is done
    /// with it.
    orphaned: bool,
}

impl<T: PlatformTransfer> Transfer<T> {
    pub(crate) fn new(platform: T, size: usize) -> Transfer<T> {
        Transfer {
            platform,
            size,
            pending: false,
            error: None,
            actual_length: 0,
            orphaned: false,
        }
    }

    pub(crate) fn platform_mut(&mut self) -> &mut T {
        &mut self.platform
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    pub(crate) fn orphan(&mut self) {
        self.orphaned = true;
    }

    /// Start reading into the buffer. If the OS refuses the request, the
    /// transfer completes immediately with that error.
    pub(crate) fn submit<B: Backend<Transfer = T>>(&mut self, backend: &B) {
        debug_assert!(!self.pending, "transfer submitted while pending");

        self.error = None;
        self.actual_length = 0;
        self.pending = true;

        // SAFETY: the transfer lives in the handle's arena, which keeps it
        // until the completion is observed or the backend is dropped.
        if let Err(e) = unsafe { backend.submit_transfer(&mut self.platform) } {
            self.pending = false;
            self.error = Some(e);
        }
    }

    /// Check whether the transfer is still pending, polling the backend for
    /// a completion first if it reports them that way.
    pub(crate) fn pending<B: Backend<Transfer = T>>(&mut self, backend: &B) -> bool {
        if self.pending {
            if let Some(completion) = backend.poll_transfer(&mut self.platform) {
                self.handle_completion(completion);
            }
        }
        self.pending
    }

    /// Record the result of a completed transfer.
    pub(crate) fn handle_completion(&mut self, completion: Completion) {
        self.pending = false;
        self.actual_length = completion.transferred;
        self.error = completion
            .error
            .map(|e| e.context("Asynchronous IN transfer failed."));
    }

    /// Copy the received data into `buffer` and return the byte count and a
    /// copy of the transfer's error.
    ///
    /// The count is clamped to the requested size, whatever the OS reported.
    pub(crate) fn get_results(&self, buffer: Option<&mut [u8]>) -> Result<Completion, Error> {
        debug_assert!(!self.pending, "results read while pending");

        let data = self.platform.buffer();
        let transferred = self.actual_length.min(self.size).min(data.len());

        if let Some(buffer) = buffer {
            let Some(dest) = buffer.get_mut(..transferred) else {
                return Err(Error::new(format!(
                    "Buffer is too small: {} bytes were received but the buffer holds {}.",
                    transferred,
                    buffer.len()
                )));
            };
            dest.copy_from_slice(&data[..transferred]);
        }

        Ok(Completion {
            transferred,
            error: self.error.as_ref().map(Error::copy),
        })
    }

    /// Ask the OS to abort the transfer. Does nothing if it is not pending.
    pub(crate) fn cancel<B: Backend<Transfer = T>>(&mut self, backend: &B) -> Result<(), Error> {
        if !self.pending {
            return Ok(());
        }
        backend.cancel_transfer(&mut self.platform)
    }
}
