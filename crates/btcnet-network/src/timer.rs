//! # Deadline Timer
//!
//! One-shot, strand-delivered timer. Each successful `start` produces
//! exactly one callback invocation: `Ok(())` when the duration elapses, or
//! `Err(OperationCanceled)` when `stop` (or a restart) lands first.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::error::{Completion, Error};
use crate::strand::Strand;

type TimerHandler = Box<dyn FnOnce(Completion) + Send + 'static>;

/// One pending invocation; whichever of fire/cancel takes the handler first
/// reports the outcome.
struct Pending {
    handler: Mutex<Option<TimerHandler>>,
}

/// Strand-scoped one-shot timer with idempotent cancel.
pub struct Deadline {
    strand: Strand,
    handle: Handle,
    pending: Mutex<Option<Arc<Pending>>>,
}

impl Deadline {
    pub fn new(strand: Strand, handle: Handle) -> Self {
        Self {
            strand,
            handle,
            pending: Mutex::new(None),
        }
    }

    /// Schedule the handler after `duration`. A pending start is canceled
    /// first (its handler observes `OperationCanceled`).
    pub fn start(
        &self,
        duration: Duration,
        handler: impl FnOnce(Completion) + Send + 'static,
    ) {
        self.stop();

        let pending = Arc::new(Pending {
            handler: Mutex::new(Some(Box::new(handler))),
        });
        *self.pending.lock() = Some(Arc::clone(&pending));

        let strand = self.strand.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(handler) = pending.handler.lock().take() {
                strand.post(move || handler(Ok(())));
            }
        });
    }

    /// Cancel the pending invocation, if any. Safe to call repeatedly and
    /// from any thread.
    pub fn stop(&self) {
        if let Some(pending) = self.pending.lock().take() {
            if let Some(handler) = pending.handler.lock().take() {
                self.strand.post(move || handler(Err(Error::OperationCanceled)));
            }
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.stop();
    }
}
