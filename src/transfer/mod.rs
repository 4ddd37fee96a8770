//! Transfer-related types.
//!
//! Use the methods on a [`GenericHandle`][crate::GenericHandle] for
//! synchronous transfers, or open an [`AsyncInPipe`] to stream from an IN
//! endpoint.

mod control;
pub use control::{ControlIn, ControlOut, ControlType, Direction, Recipient, SetupPacket};

pub(crate) mod internal;

mod pipe;
pub use pipe::AsyncInPipe;

use crate::Error;

/// Outcome of one asynchronous transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Bytes received, which may be fewer than requested.
    pub transferred: usize,

    /// Why the transfer failed, if it did. Data received before the failure
    /// is still counted in `transferred`.
    pub error: Option<Error>,
}
