//! Unified error type for the Pluton engine.
//!
//! Every call that can be rejected synchronously funnels into [`Error`].
//! The variant says *what kind* of mistake it was; the wrapped
//! [`FaultInfo`] carries the stable code and the text.
//!
//! Per-request transport and remote faults are NOT errors: they are recorded
//! on the `ClientRequest` so one request's failure never aborts its siblings.

use core::fmt;

use crate::fault::{FaultCode, FaultInfo};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Programming error: wrong state, double initialize, reuse while
    /// InProgress.  Indicates a caller bug rather than a runtime condition.
    Usage(FaultInfo),
    /// Bad argument (service key, reserved context key, oversized payload).
    /// State is left unchanged.
    Validation(FaultInfo),
    /// Fatal session-level transport failure.
    Transport(FaultInfo),
}

impl Error {
    pub fn usage(code: FaultCode, text: impl Into<String>) -> Self {
        Self::Usage(FaultInfo::new(code, text))
    }

    pub fn validation(code: FaultCode, text: impl Into<String>) -> Self {
        Self::Validation(FaultInfo::new(code, text))
    }

    pub fn transport(code: FaultCode, text: impl Into<String>) -> Self {
        Self::Transport(FaultInfo::new(code, text))
    }

    pub fn fault(&self) -> &FaultInfo {
        match self {
            Self::Usage(f) | Self::Validation(f) | Self::Transport(f) => f,
        }
    }

    pub fn code(&self) -> FaultCode {
        self.fault().code()
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(e) => write!(f, "usage: {e}"),
            Self::Validation(e) => write!(f, "validation: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for FaultInfo {
    fn from(e: Error) -> Self {
        match e {
            Error::Usage(f) | Error::Validation(f) | Error::Transport(f) => f,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
