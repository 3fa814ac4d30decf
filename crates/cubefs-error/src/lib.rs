//! Error taxonomy shared by every layer of the client: transport, metadata,
//! master and the extent streaming engine all return `cubefs_error::Error`
//! so that recovery policy can be decided once, at the boundary that owns
//! retries, instead of re-derived at each call site.

use std::fmt;
use std::io;
use std::time::Duration;

/// The stable set of failure kinds the client distinguishes.
///
/// Recovery policy lives with the kind, not the call site: `Io`/`Timeout`
/// are retried by the writer/reader recovery state machine up to
/// `REQUEST_RETRY_MAX`; `BadMessage` and `QuotaExceeded` are never retried;
/// `NotFound` returned from a revalidation is handled by the caller (dentry
/// invalidation) rather than surfaced as an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("bad message: {0}")]
    BadMessage(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("out of memory")]
    OutOfMemory,

    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// `Io`/`Timeout` are the only kinds the writer/reader recovery state
    /// machine treats as transient; everything else is terminal for the
    /// current attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Timeout(_))
    }

    pub fn bad_message(msg: impl Into<String>) -> Self {
        Error::BadMessage(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Error::PermissionDenied(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Error::Timeout(Duration::ZERO),
            io::ErrorKind::OutOfMemory => Error::OutOfMemory,
            _ => Error::Io(err.to_string()),
        }
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(err: std::array::TryFromSliceError) -> Self {
        Error::BadMessage(err.to_string())
    }
}

/// POSIX error-number mapping used at the VFS adaptation boundary (out of
/// scope for this crate beyond this single conversion point). Kept here
/// because it is the one place every error kind funnels through on its way
/// to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

impl From<&Error> for Errno {
    fn from(err: &Error) -> Self {
        match err {
            Error::NotFound => Errno(libc_enoent()),
            Error::AlreadyExists => Errno(libc_eexist()),
            Error::PermissionDenied(_) => Errno(libc_eacces()),
            Error::QuotaExceeded(_) => Errno(libc_edquot()),
            Error::BadMessage(_) => Errno(libc_eproto()),
            Error::Io(_) => Errno(libc_eio()),
            Error::Timeout(_) => Errno(libc_etimedout()),
            Error::OutOfMemory => Errno(libc_enomem()),
            Error::NotSupported(_) => Errno(libc_enotsup()),
        }
    }
}

// Numeric values match Linux's asm-generic/errno.h; we avoid a libc
// dependency for nine constants.
const fn libc_enoent() -> i32 {
    2
}
const fn libc_eio() -> i32 {
    5
}
const fn libc_enomem() -> i32 {
    12
}
const fn libc_eacces() -> i32 {
    13
}
const fn libc_eexist() -> i32 {
    17
}
const fn libc_enotsup() -> i32 {
    95
}
const fn libc_eproto() -> i32 {
    71
}
const fn libc_etimedout() -> i32 {
    110
}
const fn libc_edquot() -> i32 {
    122
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::Io("x".into()).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!Error::BadMessage("x".into()).is_retryable());
        assert!(!Error::QuotaExceeded("x".into()).is_retryable());
    }

    #[test]
    fn errno_mapping_is_stable() {
        assert_eq!(Errno::from(&Error::NotFound).0, 2);
        assert_eq!(Errno::from(&Error::Io("x".into())).0, 5);
    }
}
