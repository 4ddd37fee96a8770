//! An in-memory backend for exercising the transfer engine.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
};

use crate::{
    descriptors::DeviceDescriptor,
    platform::{Backend, CancelGranularity, DataStage, PlatformTransfer},
    transfer::Completion,
    Error, ErrorCode, PipeId, SetupPacket,
};

pub(crate) struct MockTransfer {
    key: usize,
    pipe: PipeId,
    buffer: Vec<u8>,
}

impl PlatformTransfer for MockTransfer {
    fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

/// What the fake device will report for a transfer.
struct Staged {
    data: Vec<u8>,
    reported_len: usize,
    error: Option<Error>,
}

#[derive(Default)]
struct MockState {
    submitted: Vec<usize>,
    in_flight: Vec<(usize, PipeId)>,
    staged: HashMap<usize, Staged>,
    reap_queue: VecDeque<usize>,
    cancelled: Vec<usize>,
    cancelled_pipes: Vec<u8>,
    allocs: usize,
    fail_alloc_after: Option<usize>,
    fail_submit: bool,
    fail_sync: Option<Error>,
    last_sync: Option<(u8, u32, usize)>,
    descriptor: Option<DeviceDescriptor>,
}

pub(crate) struct MockBackend {
    granularity: CancelGranularity,
    polled: bool,
    state: RefCell<MockState>,
}

impl MockBackend {
    pub(crate) fn new() -> MockBackend {
        MockBackend {
            granularity: CancelGranularity::Individual,
            polled: false,
            state: RefCell::new(MockState::default()),
        }
    }

    pub(crate) fn with_granularity(mut self, granularity: CancelGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Report completions through `poll_transfer` instead of `reap`.
    pub(crate) fn with_polled_completion(mut self) -> Self {
        self.polled = true;
        self
    }

    pub(crate) fn set_descriptor(&self, descriptor: DeviceDescriptor) {
        self.state.borrow_mut().descriptor = Some(descriptor);
    }

    pub(crate) fn fail_alloc_after(&self, n: usize) {
        self.state.borrow_mut().fail_alloc_after = Some(n);
    }

    pub(crate) fn fail_submit(&self, fail: bool) {
        self.state.borrow_mut().fail_submit = fail;
    }

    pub(crate) fn fail_sync(&self, error: Error) {
        self.state.borrow_mut().fail_sync = Some(error);
    }

    /// Keys in the order they were submitted, including resubmissions.
    pub(crate) fn submitted(&self) -> Vec<usize> {
        self.state.borrow().submitted.clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<usize> {
        self.state.borrow().cancelled.clone()
    }

    pub(crate) fn cancelled_pipes(&self) -> Vec<u8> {
        self.state.borrow().cancelled_pipes.clone()
    }

    /// (pipe address, timeout, length) of the last synchronous transfer.
    pub(crate) fn last_sync(&self) -> Option<(u8, u32, usize)> {
        self.state.borrow().last_sync
    }

    /// Make `key` show up in the next reap without staging a result.
    pub(crate) fn push_reaped(&self, key: usize) {
        self.state.borrow_mut().reap_queue.push_back(key);
    }

    pub(crate) fn complete(&self, key: usize, data: &[u8]) {
        self.finish(key, data, data.len(), None);
    }

    /// Complete `key` with `data`, but claim `reported_len` bytes arrived.
    pub(crate) fn complete_reporting(&self, key: usize, data: &[u8], reported_len: usize) {
        self.finish(key, data, reported_len, None);
    }

    pub(crate) fn fail(&self, key: usize, error: Error) {
        self.finish(key, &[], 0, Some(error));
    }

    fn finish(&self, key: usize, data: &[u8], reported_len: usize, error: Option<Error>) {
        let mut state = self.state.borrow_mut();
        let pos = state
            .in_flight
            .iter()
            .position(|&(k, _)| k == key)
            .expect("completing a transfer that is not in flight");
        state.in_flight.remove(pos);
        state.staged.insert(
            key,
            Staged {
                data: data.to_vec(),
                reported_len,
                error,
            },
        );
        if !self.polled {
            state.reap_queue.push_back(key);
        }
    }

    fn cancelled_error() -> Error {
        Error::new("The operation was cancelled.").with_code(ErrorCode::Cancelled)
    }

    fn take_result(&self, transfer: &mut MockTransfer) -> Option<Completion> {
        let staged = self.state.borrow_mut().staged.remove(&transfer.key)?;
        let n = staged.data.len().min(transfer.buffer.len());
        transfer.buffer[..n].copy_from_slice(&staged.data[..n]);
        Some(Completion {
            transferred: staged.reported_len,
            error: staged.error,
        })
    }
}

impl Backend for MockBackend {
    type Transfer = MockTransfer;

    fn cancel_granularity(&self) -> CancelGranularity {
        self.granularity
    }

    fn alloc_transfer(&self, pipe: PipeId, size: usize, key: usize) -> Result<MockTransfer, Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_alloc_after.is_some_and(|n| state.allocs >= n) {
            return Err(Error::no_memory());
        }
        state.allocs += 1;
        Ok(MockTransfer {
            key,
            pipe,
            buffer: vec![0; size],
        })
    }

    unsafe fn submit_transfer(&self, transfer: &mut MockTransfer) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_submit {
            return Err(Error::new("Submitting USB request block failed."));
        }
        state.submitted.push(transfer.key);
        state.in_flight.push((transfer.key, transfer.pipe));
        Ok(())
    }

    fn poll_transfer(&self, transfer: &mut MockTransfer) -> Option<Completion> {
        if !self.polled {
            return None;
        }
        self.take_result(transfer)
    }

    fn reap(&self) -> Result<Option<usize>, Error> {
        if self.polled {
            return Ok(None);
        }
        Ok(self.state.borrow_mut().reap_queue.pop_front())
    }

    fn finish_transfer(&self, transfer: &mut MockTransfer) -> Completion {
        self.take_result(transfer).unwrap_or(Completion {
            transferred: 0,
            error: None,
        })
    }

    fn cancel_transfer(&self, transfer: &mut MockTransfer) -> Result<(), Error> {
        let in_flight = {
            let mut state = self.state.borrow_mut();
            state.cancelled.push(transfer.key);
            state.in_flight.iter().any(|&(k, _)| k == transfer.key)
        };
        if in_flight {
            self.finish(transfer.key, &[], 0, Some(Self::cancelled_error()));
        }
        Ok(())
    }

    fn cancel_pipe(&self, pipe: PipeId) -> Result<(), Error> {
        let keys: Vec<usize> = {
            let mut state = self.state.borrow_mut();
            state.cancelled_pipes.push(pipe.address());
            state
                .in_flight
                .iter()
                .filter(|&&(_, p)| p == pipe)
                .map(|&(k, _)| k)
                .collect()
        };
        for key in keys {
            self.finish(key, &[], 0, Some(Self::cancelled_error()));
        }
        Ok(())
    }

    fn device_descriptor(&self) -> Result<DeviceDescriptor, Error> {
        self.state
            .borrow()
            .descriptor
            .clone()
            .ok_or_else(|| Error::new("Failed to read device descriptor."))
    }

    fn control_transfer(
        &self,
        setup: SetupPacket,
        timeout: u32,
        data: DataStage,
    ) -> Result<usize, Error> {
        self.sync_transfer(0x00, timeout, data)
            .map_err(|e| e.context(&format!("Control transfer {:02x} failed.", setup.request)))
    }

    fn bulk_transfer(&self, pipe: PipeId, timeout: u32, data: DataStage) -> Result<usize, Error> {
        self.sync_transfer(pipe.address(), timeout, data)
    }
}

impl MockBackend {
    fn sync_transfer(&self, address: u8, timeout: u32, data: DataStage) -> Result<usize, Error> {
        let mut state = self.state.borrow_mut();
        state.last_sync = Some((address, timeout, data.len()));
        if let Some(e) = state.fail_sync.take() {
            return Err(e);
        }
        match data {
            DataStage::In(buf) => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = i as u8;
                }
                Ok(buf.len())
            }
            DataStage::Out(buf) => Ok(buf.len()),
        }
    }
}
