use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::JobError;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Cooperative cancellation token, checked by every job at batch
/// boundaries. Cloning shares the underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Fire the token. The first reason wins; later calls are no-ops.
    pub fn cancel(&self, reason: impl Into<String>) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            let mut slot = self
                .inner
                .reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some(reason.into());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Error out when cancelled, for use at batch boundaries.
    pub fn check(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled(
                self.reason().unwrap_or_else(|| "cancelled".to_string()),
            ))
        } else {
            Ok(())
        }
    }
}
