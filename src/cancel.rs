//! A single-upload cancellation signal (§5): "the cancel token is a small
//! `CancelToken` wrapping an `Arc<AtomicBool>`; it is checked at every
//! suspension point ... and converted to `EngineError::Cancelled` when
//! fired."

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{cancelled, EngineResult};

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Converts a fired token into `EngineError::Cancelled`; call at every
    /// suspension point named in §5 (before a persistence call, before an
    /// HTTP request, after a backoff sleep).
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(cancelled())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
    }

    #[test]
    fn firing_is_observed_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.fire();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }
}
