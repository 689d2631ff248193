//! Cooperative cancellation for pipeline runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::PipelineError;

/// Clonable stop flag checked between records by the map engines.
///
/// Cancellation is cooperative: workers finish their current record and then
/// observe the flag. The first `cancel` call wins; later reasons are ignored.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation with a reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        let mut guard = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(reason.into());
        }
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The error a cancelled run fails with.
    pub fn error(&self) -> PipelineError {
        let reason = self
            .inner
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .unwrap_or_else(|| "cancelled".to_string());
        PipelineError::cancelled(reason)
    }

    /// `Err(Cancelled)` once the flag is set, `Ok(())` otherwise.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
    }
}
