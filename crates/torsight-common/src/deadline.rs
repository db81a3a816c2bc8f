//! Request-scoped deadlines with cooperative cancellation.
//!
//! Every pipeline stage calls [`Deadline::check`] before doing work, so an
//! expired or cancelled request stops at the next stage boundary and no
//! partial result escapes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, TorsightError};

#[derive(Debug, Clone, Default)]
pub struct Deadline {
    expires_at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// A deadline that never expires on its own.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal cancellation to every clone of this deadline.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_expired() {
            Err(TorsightError::DeadlineExceeded { stage })
        } else {
            Ok(())
        }
    }
}
