mod transfer;
mod usbfs;

mod enumeration;
pub use enumeration::{find_interface, list_devices};

mod device;
pub use device::UsbfsBackend;
pub use transfer::UsbfsTransfer;

use std::io;

use rustix::io::Errno;

use crate::{Error, ErrorCode};

/// Translate an OS error number into an [`Error`].
///
/// The root of the message is always "Error code N.", preceded by a
/// description of the error and then by `context`, if not empty.
pub(crate) fn error_from_errno(errno: i32, context: &str) -> Error {
    let mut error = Error::new(format!("Error code {errno}."));
    let mut skip_os_message = false;

    match Errno::from_raw_os_error(errno) {
        Errno::ACCESS => error = error.with_code(ErrorCode::AccessDenied),
        Errno::NOMEM => error = error.with_code(ErrorCode::Memory),
        Errno::PIPE => {
            skip_os_message = true;
            error = error
                .context("The request was invalid or there was an I/O problem.")
                .with_code(ErrorCode::Stall)
                .with_code(ErrorCode::DeviceDisconnected);
        }
        Errno::NODEV | Errno::SHUTDOWN => {
            skip_os_message = true;
            error = error
                .context("The device was removed.")
                .with_code(ErrorCode::DeviceDisconnected);
        }
        Errno::PROTO | Errno::TIME => error = error.with_code(ErrorCode::DeviceDisconnected),
        Errno::TIMEDOUT => {
            skip_os_message = true;
            error = error
                .context("The operation timed out.")
                .with_code(ErrorCode::Timeout);
        }
        Errno::OVERFLOW => {
            skip_os_message = true;
            error = error
                .context("The transfer overflowed.")
                .with_code(ErrorCode::Overflow);
        }
        Errno::ILSEQ => {
            skip_os_message = true;
            error = error
                .context(
                    "Illegal byte sequence: the device may have been disconnected \
                     or the request may have been cancelled.",
                )
                .with_code(ErrorCode::DeviceDisconnected)
                .with_code(ErrorCode::Cancelled);
        }
        _ => {}
    }

    if !skip_os_message {
        if let Some(description) = os_description(errno) {
            error = error.context(&format!("{description}."));
        }
    }

    error.context(context)
}

/// The C library's description of an error number, without Rust's
/// " (os error N)" suffix.
fn os_description(errno: i32) -> Option<String> {
    let text = io::Error::from_raw_os_error(errno).to_string();
    let text = match text.rfind(" (os error ") {
        Some(pos) => &text[..pos],
        None => &text,
    };
    if text.is_empty() || text.starts_with("Unknown error") {
        return None;
    }
    Some(text.to_owned())
}

pub(crate) fn error_from_rustix(errno: Errno, context: &str) -> Error {
    error_from_errno(errno.raw_os_error(), context)
}

pub(crate) fn error_from_io(err: &io::Error, context: &str) -> Error {
    match err.raw_os_error() {
        Some(errno) => error_from_errno(errno, context),
        None => Error::new(format!("{err}.")).context(context),
    }
}

/// Translate the status of a reaped URB. The kernel reports it as a negative
/// error number.
pub(crate) fn error_from_urb_status(status: i32) -> Option<Error> {
    let errno = status.abs();
    if errno == 0 {
        return None;
    }
    match Errno::from_raw_os_error(errno) {
        Errno::NOENT | Errno::CONNRESET => Some(
            Error::new(format!("Error code {errno}."))
                .context("The operation was cancelled.")
                .with_code(ErrorCode::Cancelled),
        ),
        _ => Some(error_from_errno(errno, "")),
    }
}
