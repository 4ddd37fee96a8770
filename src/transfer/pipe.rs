use crate::{
    platform::{Backend, CancelGranularity},
    Error, GenericHandle, PipeId, ResultExt,
};

use super::Completion;

/// Streams data from an IN endpoint through a fixed ring of asynchronous
/// transfers.
///
/// To keep the host controller busy in every frame, several transfers must
/// be pending with the OS at all times, and each must be resubmitted as soon
/// as its data has been taken. The pipe allocates its transfers once with
/// [`allocate_transfers`][Self::allocate_transfers] and reuses them for its
/// whole life.
///
/// Completions are delivered strictly in submission order: only the oldest
/// pending transfer is ever checked, so a later transfer that finished first
/// waits until the ones before it are done.
///
/// Nothing happens in the background. Call
/// [`handle_events`][Self::handle_events] and then
/// [`handle_finished_transfer`][Self::handle_finished_transfer] periodically;
/// neither blocks.
///
/// When the pipe is dropped, its pending transfers are cancelled. Their memory
/// stays with the handle until the OS reports them complete.
///
/// ### Example
///
/// ```no_run
/// # #[cfg(not(any(target_os = "linux", target_os = "android")))]
/// # fn main() {}
/// # #[cfg(any(target_os = "linux", target_os = "android"))]
/// # fn main() -> Result<(), usbpipe::Error> {
/// # fn handle_data(_: &[u8]) {}
/// let device = usbpipe::find_device_with_vid_pid(0x1209, 0x6d00)?.expect("device not found");
/// let interface = usbpipe::GenericInterface::new(&device, 0, true)?;
/// let handle = usbpipe::GenericHandle::open(&interface)?;
///
/// let mut pipe = handle.open_async_in_pipe(0x82)?;
/// pipe.allocate_transfers(8, 4096)?;
/// pipe.start_endless_transfers()?;
///
/// let mut buf = vec![0; 4096];
/// loop {
///     pipe.handle_events()?;
///     while let Some(completion) = pipe.handle_finished_transfer(Some(&mut buf))? {
///         if let Some(err) = completion.error {
///             return Err(err);
///         }
///         handle_data(&buf[..completion.transferred]);
///     }
///     std::thread::sleep(std::time::Duration::from_millis(1));
/// }
/// # }
/// ```
pub struct AsyncInPipe<'h, B: Backend> {
    handle: &'h GenericHandle<B>,
    pipe_id: PipeId,

    /// Arena keys of the transfers, in ring order. Empty until allocated.
    slots: Vec<usize>,
    transfer_size: usize,

    endless: bool,

    /// Transfers submitted but not yet handed to the caller, whether or not
    /// the OS has finished them. Tells a fully idle ring from a fully
    /// pending one.
    pending_count: usize,

    /// The slot that must finish next. Pending if `pending_count > 0`.
    next_finish: usize,

    /// The slot to submit next. Idle if `pending_count < slots.len()`.
    next_submit: usize,
}

impl<'h, B: Backend> AsyncInPipe<'h, B> {
    pub(crate) fn new(handle: &'h GenericHandle<B>, pipe_id: PipeId) -> Self {
        AsyncInPipe {
            handle,
            pipe_id,
            slots: Vec::new(),
            transfer_size: 0,
            endless: false,
            pending_count: 0,
            next_finish: 0,
            next_submit: 0,
        }
    }

    pub fn pipe_id(&self) -> PipeId {
        self.pipe_id
    }

    /// Number of transfers in the ring, 0 before allocation.
    pub fn transfer_count(&self) -> usize {
        self.slots.len()
    }

    pub fn transfer_size(&self) -> usize {
        self.transfer_size
    }

    /// Allocate `transfer_count` transfers of `transfer_size` bytes each.
    ///
    /// This can only be done once per pipe. If any transfer cannot be
    /// allocated, none are kept.
    pub fn allocate_transfers(
        &mut self,
        transfer_count: usize,
        transfer_size: usize,
    ) -> Result<(), Error> {
        if !self.slots.is_empty() {
            return Err(Error::new("Transfers were already allocated for this pipe."));
        }
        if transfer_count == 0 {
            return Err(Error::new("Transfer count cannot be zero."));
        }
        if transfer_size == 0 {
            return Err(Error::new("Transfer size cannot be zero."));
        }

        self.slots = self
            .handle
            .alloc_transfers(self.pipe_id, transfer_count, transfer_size)
            .context("Failed to allocate transfers for asynchronous IN pipe.")?;
        self.transfer_size = transfer_size;
        Ok(())
    }

    /// Submit every idle transfer and keep resubmitting each one as soon as
    /// its results are taken, until [`cancel_transfers`][Self::cancel_transfers].
    pub fn start_endless_transfers(&mut self) -> Result<(), Error> {
        if self.slots.is_empty() {
            return Err(Error::new("Pipe transfers have not been allocated yet."));
        }

        self.endless = true;
        while self.pending_count < self.slots.len() {
            self.submit_next_transfer();
        }
        Ok(())
    }

    fn submit_next_transfer(&mut self) {
        debug_assert!(self.pending_count < self.slots.len());

        let key = self.slots[self.next_submit];
        self.handle
            .with_transfer(key, |transfer, backend| transfer.submit(backend));

        self.pending_count += 1;
        self.next_submit = wrapping_increment(self.next_submit, self.slots.len());
    }

    /// Collect completions reported by the OS for the whole handle. Does not
    /// block.
    pub fn handle_events(&self) -> Result<(), Error> {
        self.handle.handle_events()
    }

    /// Take the results of the oldest pending transfer if it has finished.
    ///
    /// Returns `Ok(None)` if no transfer is pending or the oldest one is not
    /// done yet. Otherwise the received data is copied into `buffer` (which
    /// must hold the received bytes; pass `None` to discard them) and the
    /// transfer's outcome is returned. A failed transfer is still a finished
    /// one: its error is in [`Completion::error`], not in the `Err` of this
    /// method.
    ///
    /// In endless mode, the transfer is resubmitted immediately.
    pub fn handle_finished_transfer(
        &mut self,
        buffer: Option<&mut [u8]>,
    ) -> Result<Option<Completion>, Error> {
        if self.pending_count == 0 {
            return Ok(None);
        }

        let key = self.slots[self.next_finish];
        let results = self.handle.with_transfer(key, |transfer, backend| {
            if transfer.pending(backend) {
                None
            } else {
                Some(transfer.get_results(buffer))
            }
        });

        let Some(results) = results else {
            return Ok(None);
        };
        let completion = results?;

        self.pending_count -= 1;
        self.next_finish = wrapping_increment(self.next_finish, self.slots.len());

        if self.endless {
            self.submit_next_transfer();
        }

        Ok(Some(completion))
    }

    /// Stop endless mode and ask the OS to abort every pending transfer.
    ///
    /// Cancellation is asynchronous: keep calling
    /// [`handle_events`][Self::handle_events] and
    /// [`handle_finished_transfer`][Self::handle_finished_transfer] until
    /// [`has_pending_transfers`][Self::has_pending_transfers] is false to
    /// collect the cancelled transfers.
    pub fn cancel_transfers(&mut self) -> Result<(), Error> {
        self.endless = false;

        if self.slots.is_empty() {
            return Ok(());
        }

        match self.handle.backend().cancel_granularity() {
            CancelGranularity::Individual => {
                // Newest first, so that a later transfer can't start while
                // an earlier one is being cancelled.
                for i in (0..self.pending_count).rev() {
                    let key = self.slots[(self.next_finish + i) % self.slots.len()];
                    self.handle
                        .with_transfer(key, |transfer, backend| transfer.cancel(backend))?;
                }
                Ok(())
            }
            CancelGranularity::WholePipe => self.handle.backend().cancel_pipe(self.pipe_id),
        }
    }

    /// True if any transfer has been submitted and its results not yet
    /// taken.
    pub fn has_pending_transfers(&self) -> bool {
        self.pending_count > 0
    }

    #[cfg(test)]
    pub(crate) fn ring_state(&self) -> (usize, usize, usize) {
        (self.pending_count, self.next_finish, self.next_submit)
    }

    #[cfg(test)]
    pub(crate) fn slot_keys(&self) -> &[usize] {
        &self.slots
    }
}

impl<B: Backend> Drop for AsyncInPipe<'_, B> {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        if self.pending_count > 0 {
            let pipe_id = self.pipe_id;
            let _ = self.cancel_transfers().map_err(|e| {
                e.context(&format!("Failed to cancel transfers on pipe {pipe_id}."))
                    .log_debug()
            });
        }
        self.handle.release_transfers(&self.slots);
    }
}

fn wrapping_increment(n: usize, bound: usize) -> usize {
    if n + 1 >= bound {
        0
    } else {
        n + 1
    }
}
