//! Cooperative cancellation for sync runs.
//!
//! One token per run, cloned into every download worker. Workers poll it at
//! least once per chunk write, so cancellation latency is bounded by a
//! single chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SyncError};

/// A cancellation token shared across the workers of one sync run.
///
/// Cloning is cheap; all clones observe a `cancel()` issued on any of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `SyncError::Cancelled` if cancellation has been requested.
    pub fn bail(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
