//! # Threadpool
//!
//! The worker pool backing every strand, socket, and timer. One pool per
//! network instance; strands layer serial execution on top of it.

use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::warn;

/// Owns the tokio runtime for a network instance.
///
/// Work is accepted until [`Threadpool::join`]; joining blocks the calling
/// thread, so it must never run on a pool thread.
pub struct Threadpool {
    runtime: Option<Runtime>,
}

impl Threadpool {
    /// Grace period for in-flight tasks to observe their stop signals.
    const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(threads: u32) -> Self {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1) as usize)
            .thread_name("btcnet-worker")
            .enable_io()
            .enable_time()
            .build()
            .expect("runtime construction");

        Self {
            runtime: Some(runtime),
        }
    }

    /// Handle for spawning work; valid until `join`.
    pub fn handle(&self) -> Handle {
        self.runtime
            .as_ref()
            .expect("threadpool joined")
            .handle()
            .clone()
    }

    pub fn joined(&self) -> bool {
        self.runtime.is_none()
    }

    /// Shut the pool down and block until its threads exit.
    ///
    /// All work is expected to self-terminate once stop signals land; the
    /// grace period only bounds a misbehaving task.
    pub fn join(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Self::JOIN_TIMEOUT);
        } else {
            warn!("threadpool joined twice");
        }
    }
}

impl Drop for Threadpool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Self::JOIN_TIMEOUT);
        }
    }
}
