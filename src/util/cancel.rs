//! Cooperative cancellation for multi-step operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{AttachError, Result};

/// Shared flag checked between steps; an in-flight step always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled { stage }` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once [`CancelToken::cancel`] has been called.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(AttachError::cancelled(stage))
        } else {
            Ok(())
        }
    }
}
