//! Talk to USB devices through their generic interfaces.
//!
//! Find a device with [`list_devices`] or [`find_device_with_vid_pid`],
//! resolve one of its interfaces with [`GenericInterface::new`], and open it
//! as a [`GenericHandle`]. The handle does control transfers and
//! synchronous pipe reads and writes, and opens [`AsyncInPipe`]s that keep a
//! ring of IN transfers in flight.
//!
//! Every fallible operation returns an [`Error`]: a human readable message
//! built up from the innermost failure outwards, plus a set of
//! [`ErrorCode`]s for programs to match on.
//!
//! Events are never delivered on a background thread. Call
//! [`GenericHandle::handle_events`] (or [`AsyncInPipe::handle_events`]) and
//! then drain finished transfers with
//! [`AsyncInPipe::handle_finished_transfer`].

mod error;
pub use error::{add_code, add_context, has_code, message, Error, ErrorCode, ResultExt};

mod pipe_id;
pub use pipe_id::{check_pipe_id, check_pipe_id_in, check_pipe_id_out, PipeId};

mod descriptors;
pub use descriptors::DeviceDescriptor;

mod enumeration;
pub use enumeration::{find_device_with_vid_pid, list_devices, Device, GenericInterface};

mod handle;
pub use handle::GenericHandle;

pub mod platform;

pub mod transfer;
pub use transfer::{AsyncInPipe, Completion, ControlIn, ControlOut, SetupPacket};
