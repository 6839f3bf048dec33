//! Crate-wide error taxonomy.
//!
//! Mirrors the `XxxError`/`XxxErrorCode` idiom used across the component
//! boundaries of this crate: a stable, namespaced code string for logging
//! and for the `LOG` bus event, plus the handful of extra fields each
//! failure class actually needs.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// The five error classes the part-driving loop and its callers branch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Non-recoverable at the current layer (initiate/complete failed,
    /// unrecognized server response). Never retried.
    Fatal,
    /// Transport error, timeout, or a retry-eligible status code.
    Retryable,
    /// Distinguished cancellation; never retried, never surfaced as an error.
    Cancelled,
    /// Missing ETag or otherwise malformed server response.
    Protocol,
    /// Persistence Store I/O failure.
    Storage,
}

impl EngineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorKind::Fatal => "upload-engine/fatal",
            EngineErrorKind::Retryable => "upload-engine/retryable",
            EngineErrorKind::Cancelled => "upload-engine/cancelled",
            EngineErrorKind::Protocol => "upload-engine/protocol",
            EngineErrorKind::Storage => "upload-engine/storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineErrorKind::Retryable)
    }
}

#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    message: String,
    pub part_number: Option<u32>,
    pub status: Option<u16>,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            part_number: None,
            status: None,
        }
    }

    pub fn with_part_number(mut self, part_number: u32) -> Self {
        self.part_number = Some(part_number);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn code_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, EngineErrorKind::Cancelled)
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.part_number, self.status) {
            (Some(part), Some(status)) => {
                write!(f, "{} ({}, part {part}, status {status})", self.message, self.code_str())
            }
            (Some(part), None) => write!(f, "{} ({}, part {part})", self.message, self.code_str()),
            (None, Some(status)) => {
                write!(f, "{} ({}, status {status})", self.message, self.code_str())
            }
            (None, None) => write!(f, "{} ({})", self.message, self.code_str()),
        }
    }
}

impl Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

pub fn fatal(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::Fatal, message)
}

pub fn retryable(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::Retryable, message)
}

pub fn cancelled() -> EngineError {
    EngineError::new(EngineErrorKind::Cancelled, "operation was cancelled")
}

pub fn protocol_error(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::Protocol, message)
}

pub fn storage_error(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::Storage, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kind_reports_retryable() {
        let err = retryable("transient failure").with_part_number(3).with_status(503);
        assert!(err.is_retryable());
        assert!(!err.is_cancelled());
        assert_eq!(err.code_str(), "upload-engine/retryable");
        assert_eq!(err.part_number, Some(3));
    }

    #[test]
    fn fatal_kind_is_not_retryable() {
        let err = fatal("initiate failed");
        assert!(!err.is_retryable());
    }

    #[test]
    fn cancelled_helper_is_distinguished() {
        let err = cancelled();
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
    }
}
