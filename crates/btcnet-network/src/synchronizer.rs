//! # Event Synchronizer
//!
//! Aggregates N sub-events into one completion: the handler fires after
//! `required` successes, or immediately on the first failure code. Used by
//! the seed protocol to gate completion on its three sub-events.

use parking_lot::Mutex;

use crate::error::{Completion, Error};

type CompleteHandler = Box<dyn FnOnce(Completion) + Send>;

struct State {
    remaining: usize,
    handler: Option<CompleteHandler>,
}

/// Counts success events toward a threshold; any error short-circuits.
pub struct Synchronizer {
    state: Mutex<State>,
}

impl Synchronizer {
    pub fn new(required: usize, handler: impl FnOnce(Completion) + Send + 'static) -> Self {
        Self {
            state: Mutex::new(State {
                remaining: required,
                handler: Some(Box::new(handler)),
            }),
        }
    }

    /// Record one sub-event. Events after completion are dropped.
    pub fn event(&self, result: Result<(), Error>) {
        let handler = {
            let mut state = self.state.lock();
            if state.handler.is_none() {
                return;
            }
            match result {
                Err(_) => state.handler.take(),
                Ok(()) => {
                    state.remaining = state.remaining.saturating_sub(1);
                    if state.remaining == 0 {
                        state.handler.take()
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(handler) = handler {
            handler(result);
        }
    }

    pub fn complete(&self) -> bool {
        self.state.lock().handler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_completes_after_required_successes() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let synchronizer = Synchronizer::new(3, move |result| sink.lock().push(result));

        synchronizer.event(Ok(()));
        synchronizer.event(Ok(()));
        assert!(!synchronizer.complete());

        synchronizer.event(Ok(()));
        assert!(synchronizer.complete());
        assert_eq!(outcomes.lock().clone(), vec![Ok(())]);
    }

    #[test]
    fn test_first_error_short_circuits() {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let synchronizer = Synchronizer::new(3, move |result| sink.lock().push(result));

        synchronizer.event(Ok(()));
        synchronizer.event(Err(Error::ChannelTimeout));
        assert!(synchronizer.complete());

        // Late events are dropped.
        synchronizer.event(Ok(()));
        synchronizer.event(Err(Error::ChannelStopped));
        assert_eq!(outcomes.lock().clone(), vec![Err(Error::ChannelTimeout)]);
    }

    #[test]
    fn test_handler_runs_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let synchronizer = Synchronizer::new(1, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        synchronizer.event(Ok(()));
        synchronizer.event(Ok(()));
        synchronizer.event(Err(Error::Unknown));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
