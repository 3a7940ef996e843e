//! # Strand
//!
//! A serial execution queue over the shared worker pool. Jobs posted to the
//! same strand run in submission order and never concurrently; jobs on
//! different strands run in parallel. Every mutable state container in the
//! engine is pinned to exactly one strand, and mutation sites assert
//! [`Strand::stranded`] in debug builds.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_STRAND_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Stack of strand ids executing on this thread. A stack, not a single
    // slot, because dispatch() may run one strand's job inline from another
    // strand's job.
    static ACTIVE: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

struct ActiveGuard;

impl ActiveGuard {
    fn enter(id: u64) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(id));
        Self
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

/// A serial dispatch queue; clones share the queue.
#[derive(Clone)]
pub struct Strand {
    id: u64,
    sender: mpsc::UnboundedSender<Job>,
}

impl Strand {
    /// Create a strand draining on the given pool.
    pub fn new(handle: &Handle) -> Self {
        let id = NEXT_STRAND_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                let _guard = ActiveGuard::enter(id);
                job();
            }
        });

        Self { id, sender }
    }

    /// Queue a job; always defers, even when already on this strand.
    ///
    /// Jobs posted after the owning pool shuts down are dropped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.sender.send(Box::new(job));
    }

    /// Run inline when already on this strand, otherwise queue.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.stranded() {
            job();
        } else {
            self.post(job);
        }
    }

    /// True when the calling thread is currently executing this strand.
    pub fn stranded(&self) -> bool {
        ACTIVE.with(|active| active.borrow().contains(&self.id))
    }

    /// Bridge for async callers: run a job on the strand and await its
    /// value. Returns `None` if the strand drained before the job ran
    /// (pool shutdown).
    pub async fn run<R, F>(&self, job: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.post(move || {
            let _ = sender.send(job());
        });
        receiver.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threadpool::Threadpool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    fn wait(rx: &std_mpsc::Receiver<()>) {
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_jobs_run_in_submission_order() {
        let pool = Threadpool::new(4);
        let strand = Strand::new(&pool.handle());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (tx, rx) = std_mpsc::channel();

        for index in 0..100usize {
            let order = Arc::clone(&order);
            let tx = tx.clone();
            strand.post(move || {
                order.lock().push(index);
                if index == 99 {
                    tx.send(()).unwrap();
                }
            });
        }

        wait(&rx);
        let observed = order.lock().clone();
        assert_eq!(observed, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_jobs_never_overlap() {
        let pool = Threadpool::new(4);
        let strand = Strand::new(&pool.handle());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std_mpsc::channel();

        for index in 0..200usize {
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            let tx = tx.clone();
            strand.post(move || {
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                inside.fetch_sub(1, Ordering::SeqCst);
                if index == 199 {
                    tx.send(()).unwrap();
                }
            });
        }

        wait(&rx);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stranded_inside_job_only() {
        let pool = Threadpool::new(2);
        let strand = Strand::new(&pool.handle());
        assert!(!strand.stranded());

        let (tx, rx) = std_mpsc::channel();
        let probe = strand.clone();
        strand.post(move || {
            tx.send(probe.stranded()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_dispatch_runs_inline_on_own_strand() {
        let pool = Threadpool::new(2);
        let strand = Strand::new(&pool.handle());
        let (tx, rx) = std_mpsc::channel();

        let inner = strand.clone();
        strand.post(move || {
            let ran_inline = Arc::new(AtomicUsize::new(0));
            let flag = Arc::clone(&ran_inline);
            inner.dispatch(move || {
                flag.store(1, Ordering::SeqCst);
            });
            // Inline execution means the effect is visible immediately.
            tx.send(ran_inline.load(Ordering::SeqCst)).unwrap();
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_distinct_strands_do_not_share_identity() {
        let pool = Threadpool::new(2);
        let first = Strand::new(&pool.handle());
        let second = Strand::new(&pool.handle());
        let (tx, rx) = std_mpsc::channel();

        let probe = second.clone();
        first.post(move || {
            tx.send(probe.stranded()).unwrap();
        });
        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn test_run_returns_job_value() {
        let pool = Threadpool::new(2);
        let strand = Strand::new(&pool.handle());
        let value = pool
            .handle()
            .block_on(async { strand.run(|| 6 * 7).await });
        assert_eq!(value, Some(42));
    }
}
