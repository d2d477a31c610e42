//! Cooperative cancellation shared across worker pipelines.
//!
//! Every batch operation runs under a [`CancelToken`]. The first worker that
//! fails stores its error as the cause and flips the cancelled flag; sibling
//! workers observe the flag between channel operations and between candidate
//! batches and abort with [`Error::Cancelled`]. The parent retrieves the
//! original cause once all workers have stopped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    cause: Mutex<Option<Error>>,
}

/// Shared cancellation token carrying the first error cause.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Creates a fresh, non-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token with the given cause. The first cause wins;
    /// subsequent calls only flip the flag.
    pub fn cancel(&self, cause: Error) {
        {
            let mut slot = self.inner.cause.lock();
            if slot.is_none() {
                *slot = Some(cause);
            }
        }
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns `Err(Cancelled)` if the token has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] after [`CancelToken::cancel`] was called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled("sibling worker failed".into()))
        } else {
            Ok(())
        }
    }

    /// Takes the stored cause, leaving the token cancelled.
    ///
    /// Returns `None` when the token was never cancelled or the cause was
    /// already taken by another caller.
    #[must_use]
    pub fn take_cause(&self) -> Option<Error> {
        self.inner.cause.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
        assert!(token.take_cause().is_none());
    }

    #[test]
    fn test_first_cause_wins() {
        let token = CancelToken::new();
        token.cancel(Error::Storage("first".into()));
        token.cancel(Error::Storage("second".into()));
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
        let cause = token.take_cause().unwrap();
        assert!(cause.to_string().contains("first"));
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel(Error::Internal("boom".into()));
        assert!(token.is_cancelled());
    }
}
