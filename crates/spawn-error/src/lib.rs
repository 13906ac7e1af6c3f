//! Tagged error taxonomy and structured logging shared by every `spawn` crate.
//!
//! Mirrors the source's error kinds: `Invalid`, `NoMem`, `NotFound`, `Malformed`,
//! `Timeout`, `Io`, `NotImplemented`, `Fault`. Unlike the source, a `Fault` never
//! aborts the process directly -- it propagates to `main`, which logs it and exits
//! non-zero. Every other component treats it as any other error.

pub mod logging;

use thiserror::Error;

/// The taxonomy of errors that can cross a component boundary in this crate family.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad arguments, bad configuration, malformed invocation.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Allocation failure (buffer pool growth, etc).
    #[error("out of memory: {0}")]
    NoMem(String),

    /// A queue or table lookup came up empty.
    #[error("not found: {0}")]
    NotFound(String),

    /// A wire frame failed to decode.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A blocking wait exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A transient or terminal I/O failure.
    #[error("i/o error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A feature is recognized but not implemented (out-of-scope collaborator).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// An internal invariant was violated. In the source this is fatal; here it
    /// propagates to `main` rather than aborting the process directly.
    #[error("invariant violated: {0}")]
    Fault(String),
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io { context: context.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Construct a [`Error::Fault`], logging it at `error!` level first -- the
/// propagate-don't-abort analogue of the source's "log then abort" policy for
/// invariant violations.
#[macro_export]
macro_rules! fault {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::error!("invariant violated: {}", msg);
        $crate::Error::Fault(msg)
    }};
}
