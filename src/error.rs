//! The error value returned by every fallible operation.
//!
//! An [`Error`] is a chain of human-readable sentences, most specific context
//! first and root cause last, plus an ordered list of [`ErrorCode`]s that
//! classify the failure. "No error" is expressed as `None` / `Ok`, never as an
//! error with an empty message.
//!
//! Building or growing an error never aborts on allocation failure: if memory
//! for a new message cannot be obtained, one of two static sentinels is
//! returned instead, and both carry [`ErrorCode::Memory`].

use std::{fmt, io, ptr};

/// Classification attached to an [`Error`] in addition to its message.
///
/// The numeric values are stable and may be stored or transmitted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorCode {
    /// Memory could not be allocated.
    Memory = 1,

    /// The device or interface exists but is not ready yet. Retrying after a
    /// short delay may succeed.
    NotReady = 2,

    /// Access was denied, typically because of file permissions or because
    /// another program is using the device.
    AccessDenied = 3,

    /// The device has no serial number.
    NoSerialNumber = 4,

    /// The operation timed out.
    Timeout = 5,

    /// The device was probably disconnected.
    DeviceDisconnected = 6,

    /// The device responded with a STALL packet, or the request was
    /// malformed. Some platforms cannot tell this apart from a disconnect.
    Stall = 7,

    /// The operation was cancelled.
    Cancelled = 8,

    /// The device sent more data than the transfer buffer could hold.
    Overflow = 9,
}

impl ErrorCode {
    /// Get the stable numeric value of this code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up a code by its numeric value.
    pub fn from_u32(value: u32) -> Option<ErrorCode> {
        Some(match value {
            1 => ErrorCode::Memory,
            2 => ErrorCode::NotReady,
            3 => ErrorCode::AccessDenied,
            4 => ErrorCode::NoSerialNumber,
            5 => ErrorCode::Timeout,
            6 => ErrorCode::DeviceDisconnected,
            7 => ErrorCode::Stall,
            8 => ErrorCode::Cancelled,
            9 => ErrorCode::Overflow,
            _ => return None,
        })
    }
}

/// Immutable, process-wide error value. Never freed, compared by address.
#[derive(Debug)]
struct StaticError {
    message: &'static str,
    codes: &'static [ErrorCode],
}

static NO_MEMORY: StaticError = StaticError {
    message: "Failed to allocate memory.",
    codes: &[ErrorCode::Memory],
};

static MASKED_BY_NO_MEMORY: StaticError = StaticError {
    message: "Failed to allocate memory for reporting an error.",
    codes: &[ErrorCode::Memory],
};

static BLANK: StaticError = StaticError {
    message: "",
    codes: &[],
};

#[derive(Debug)]
enum Repr {
    Static(&'static StaticError),
    Owned { message: String, codes: Vec<ErrorCode> },
}

/// Error returned from `usbpipe` operations.
///
/// Use [`Error::message`] for the full chain of context and
/// [`Error::has_code`] to classify it. Cloning an error goes through
/// [`Error::copy`], so the clone is always an owned, independently mutable
/// value.
pub struct Error {
    repr: Repr,
}

#[derive(Debug)]
struct AllocFailed;

#[cfg(test)]
thread_local! {
    static FAIL_ALLOCATIONS: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Run `f` with every error allocation on this thread failing.
#[cfg(test)]
pub(crate) fn with_failing_allocations<T>(f: impl FnOnce() -> T) -> T {
    FAIL_ALLOCATIONS.with(|fail| fail.set(true));
    let result = f();
    FAIL_ALLOCATIONS.with(|fail| fail.set(false));
    result
}

fn check_failpoint() -> Result<(), AllocFailed> {
    #[cfg(test)]
    if FAIL_ALLOCATIONS.with(|fail| fail.get()) {
        return Err(AllocFailed);
    }
    Ok(())
}

fn try_string(capacity: usize) -> Result<String, AllocFailed> {
    check_failpoint()?;
    let mut s = String::new();
    s.try_reserve_exact(capacity).map_err(|_| AllocFailed)?;
    Ok(s)
}

fn try_copy_codes(codes: &[ErrorCode], extra: usize) -> Result<Vec<ErrorCode>, AllocFailed> {
    check_failpoint()?;
    let mut v = Vec::new();
    v.try_reserve_exact(codes.len() + extra).map_err(|_| AllocFailed)?;
    v.extend_from_slice(codes);
    Ok(v)
}

impl Error {
    /// Create an error with a root-cause message and no codes.
    pub fn new(message: impl AsRef<str>) -> Error {
        add_context(None, message.as_ref())
    }

    /// Create an error, or nothing if there is no message.
    pub fn create(message: Option<&str>) -> Option<Error> {
        message.map(Error::new)
    }

    /// The shared "Failed to allocate memory." error.
    pub fn no_memory() -> Error {
        Error {
            repr: Repr::Static(&NO_MEMORY),
        }
    }

    fn masked_by_no_memory() -> Error {
        Error {
            repr: Repr::Static(&MASKED_BY_NO_MEMORY),
        }
    }

    /// Prepend `message` as outer context, separated by two spaces.
    pub fn context(self, message: &str) -> Error {
        add_context(Some(self), message)
    }

    /// Append a classification code.
    pub fn with_code(self, code: ErrorCode) -> Error {
        add_code(Some(self), code)
    }

    /// Get the full message, most specific context first.
    pub fn message(&self) -> &str {
        match &self.repr {
            Repr::Static(s) => s.message,
            Repr::Owned { message, .. } => message,
        }
    }

    /// Get the codes in the order they were added. Duplicates are kept.
    pub fn codes(&self) -> &[ErrorCode] {
        match &self.repr {
            Repr::Static(s) => s.codes,
            Repr::Owned { codes, .. } => codes,
        }
    }

    /// Check whether `code` was attached to this error.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.codes().contains(&code)
    }

    /// True for the process-wide static errors, which are never mutated in
    /// place. Adding context or codes to one of them produces a new error.
    pub fn is_immutable(&self) -> bool {
        matches!(self.repr, Repr::Static(_))
    }

    /// True if this is the shared "Failed to allocate memory." error itself.
    pub fn is_no_memory_sentinel(&self) -> bool {
        matches!(self.repr, Repr::Static(s) if ptr::eq(s, &NO_MEMORY))
    }

    /// Make an owned copy.
    ///
    /// The result is always mutable, unless memory for the copy could not be
    /// allocated, in which case it is the "masked by no memory" error.
    pub fn copy(&self) -> Error {
        let message = self.message();
        let copied = try_string(message.len()).and_then(|mut s| {
            s.push_str(message);
            Ok((s, try_copy_codes(self.codes(), 0)?))
        });
        match copied {
            Ok((message, codes)) => Error {
                repr: Repr::Owned { message, codes },
            },
            Err(AllocFailed) => Error::masked_by_no_memory(),
        }
    }

    /// Get a mutable version of this error, copying a static one.
    fn into_mutable(self) -> Error {
        match self.repr {
            Repr::Static(_) => self.copy(),
            Repr::Owned { .. } => self,
        }
    }

    /// Log at error level and pass the error on.
    #[track_caller]
    pub(crate) fn log_error(self) -> Self {
        log::error!("{}", self);
        self
    }

    #[track_caller]
    pub(crate) fn log_debug(self) -> Self {
        log::debug!("{}", self);
        self
    }
}

/// Prepend context to `error`, starting a new error if there is none.
///
/// The outer and inner messages are joined with two spaces; if either is
/// empty no separator is added. The previous codes are kept.
pub fn add_context(error: Option<Error>, message: &str) -> Error {
    let error = error
        .unwrap_or(Error {
            repr: Repr::Static(&BLANK),
        })
        .into_mutable();

    let Repr::Owned {
        message: inner,
        codes,
    } = error.repr
    else {
        return error;
    };

    let separator = if !message.is_empty() && !inner.is_empty() {
        "  "
    } else {
        ""
    };

    let Ok(mut combined) = try_string(message.len() + separator.len() + inner.len()) else {
        return Error::masked_by_no_memory();
    };
    combined.push_str(message);
    combined.push_str(separator);
    combined.push_str(&inner);

    Error {
        repr: Repr::Owned {
            message: combined,
            codes,
        },
    }
}

/// Append `code` to `error`, starting a new error with an empty message if
/// there is none.
pub fn add_code(error: Option<Error>, code: ErrorCode) -> Error {
    let error = error
        .unwrap_or(Error {
            repr: Repr::Static(&BLANK),
        })
        .into_mutable();

    let Repr::Owned { message, mut codes } = error.repr else {
        return error;
    };

    if check_failpoint().is_err() || codes.try_reserve(1).is_err() {
        return Error::masked_by_no_memory();
    }
    codes.push(code);

    Error {
        repr: Repr::Owned { message, codes },
    }
}

/// Get the message of a possibly-absent error.
pub fn message(error: Option<&Error>) -> &str {
    error.map_or("No error.", Error::message)
}

/// Check for a code on a possibly-absent error. Always false for `None`.
pub fn has_code(error: Option<&Error>, code: ErrorCode) -> bool {
    error.is_some_and(|e| e.has_code(code))
}

/// Adds [`Error::context`] to the error path of a `Result`.
pub trait ResultExt<T> {
    /// Prepend `message` to the error, if any.
    fn context(self, message: &str) -> Result<T, Error>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn context(self, message: &str) -> Result<T, Error> {
        self.map_err(|e| e.into().context(message))
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("message", &self.message())
            .field("codes", &self.codes())
            .field("immutable", &self.is_immutable())
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.message() == other.message() && self.codes() == other.codes()
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = if err.has_code(ErrorCode::DeviceDisconnected) {
            io::ErrorKind::NotConnected
        } else if err.has_code(ErrorCode::AccessDenied) {
            io::ErrorKind::PermissionDenied
        } else if err.has_code(ErrorCode::Timeout) {
            io::ErrorKind::TimedOut
        } else if err.has_code(ErrorCode::Memory) {
            io::ErrorKind::OutOfMemory
        } else if err.has_code(ErrorCode::NotReady) {
            io::ErrorKind::NotFound
        } else if err.has_code(ErrorCode::Cancelled) {
            io::ErrorKind::Interrupted
        } else {
            io::ErrorKind::Other
        };
        io::Error::new(kind, err)
    }
}
