//! # Subscribers
//!
//! Strand-scoped fan-out of typed events. [`Subscriber`] keeps an ordered
//! handler list; [`Unsubscriber`] keys each handler for O(1) removal and
//! single-key notification. Stop is terminal: every handler observes the
//! stop code exactly once, and later subscriptions are refused with the
//! stored code.
//!
//! Handlers receive `Ok(&event)` for user notifications and `Err(code)` for
//! terminal ones, and return `true` to stay subscribed.

use parking_lot::Mutex;

use crate::error::Error;

type EventHandler<T> = Box<dyn FnMut(Result<&T, Error>) -> bool + Send>;

struct State<T> {
    handlers: Vec<EventHandler<T>>,
    stopped: Option<Error>,
}

/// Ordered fan-out of one event type to N handlers.
pub struct Subscriber<T> {
    state: Mutex<State<T>>,
}

impl<T> Default for Subscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscriber<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                handlers: Vec::new(),
                stopped: None,
            }),
        }
    }

    /// Append a handler. When already stopped the handler is invoked
    /// immediately with the stop code and `SubscriberStopped` is returned.
    pub fn subscribe(
        &self,
        mut handler: impl FnMut(Result<&T, Error>) -> bool + Send + 'static,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let Some(code) = state.stopped {
            drop(state);
            handler(Err(code));
            return Err(Error::SubscriberStopped);
        }
        state.handlers.push(Box::new(handler));
        Ok(())
    }

    /// Notify every handler in subscription order; handlers returning
    /// `false` are removed.
    ///
    /// Handlers run outside the lock so they may subscribe re-entrantly;
    /// handlers added during a notification do not observe it.
    pub fn notify(&self, event: Result<&T, Error>) {
        let handlers = {
            let mut state = self.state.lock();
            if state.stopped.is_some() {
                return;
            }
            std::mem::take(&mut state.handlers)
        };

        let mut kept: Vec<EventHandler<T>> = Vec::with_capacity(handlers.len());
        for mut handler in handlers {
            if handler(event) {
                kept.push(handler);
            }
        }

        let mut state = self.state.lock();
        if let Some(code) = state.stopped {
            // Stopped while notifying: the stop pass saw an empty list, so
            // the surviving handlers take their terminal code here.
            drop(state);
            for mut handler in kept {
                handler(Err(code));
            }
            return;
        }
        let added = std::mem::take(&mut state.handlers);
        kept.extend(added);
        state.handlers = kept;
    }

    /// Notify all handlers with the stop code, clear, and refuse further
    /// subscriptions. Idempotent.
    pub fn stop(&self, code: Error) {
        let handlers = {
            let mut state = self.state.lock();
            if state.stopped.is_some() {
                return;
            }
            state.stopped = Some(code);
            std::mem::take(&mut state.handlers)
        };
        for mut handler in handlers {
            handler(Err(code));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().handlers.len()
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().stopped.is_some()
    }
}

struct KeyedState<T> {
    handlers: Vec<(u64, EventHandler<T>)>,
    stopped: Option<Error>,
}

/// Keyed fan-out: unique key per handler, removable and addressable alone.
pub struct Unsubscriber<T> {
    state: Mutex<KeyedState<T>>,
}

impl<T> Default for Unsubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Unsubscriber<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KeyedState {
                handlers: Vec::new(),
                stopped: None,
            }),
        }
    }

    /// Append a handler under a unique key.
    pub fn subscribe(
        &self,
        mut handler: impl FnMut(Result<&T, Error>) -> bool + Send + 'static,
        key: u64,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let Some(code) = state.stopped {
            drop(state);
            handler(Err(code));
            return Err(Error::SubscriberStopped);
        }
        if state.handlers.iter().any(|(existing, _)| *existing == key) {
            return Err(Error::SubscriberExists);
        }
        state.handlers.push((key, Box::new(handler)));
        Ok(())
    }

    /// Notify every handler in subscription order.
    pub fn notify(&self, event: Result<&T, Error>) {
        let handlers = {
            let mut state = self.state.lock();
            if state.stopped.is_some() {
                return;
            }
            std::mem::take(&mut state.handlers)
        };

        let mut kept: Vec<(u64, EventHandler<T>)> = Vec::with_capacity(handlers.len());
        for (key, mut handler) in handlers {
            if handler(event) {
                kept.push((key, handler));
            }
        }

        let mut state = self.state.lock();
        if let Some(code) = state.stopped {
            drop(state);
            for (_, mut handler) in kept {
                handler(Err(code));
            }
            return;
        }
        let added = std::mem::take(&mut state.handlers);
        kept.extend(added);
        state.handlers = kept;
    }

    /// Notify just the keyed handler; removed unless it returns `true`.
    /// Unknown keys are ignored.
    pub fn notify_one(&self, key: u64, event: Result<&T, Error>) {
        let entry = {
            let mut state = self.state.lock();
            if state.stopped.is_some() {
                return;
            }
            let position = state.handlers.iter().position(|(k, _)| *k == key);
            position.map(|index| state.handlers.remove(index))
        };

        if let Some((key, mut handler)) = entry {
            if handler(event) {
                let mut state = self.state.lock();
                match state.stopped {
                    Some(code) => {
                        drop(state);
                        handler(Err(code));
                    }
                    None => state.handlers.push((key, handler)),
                }
            }
        }
    }

    pub fn stop(&self, code: Error) {
        let handlers = {
            let mut state = self.state.lock();
            if state.stopped.is_some() {
                return;
            }
            state.stopped = Some(code);
            std::mem::take(&mut state.handlers)
        };
        for (_, mut handler) in handlers {
            handler(Err(code));
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_notify_in_subscription_order() {
        let subscriber = Subscriber::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for index in 0..3usize {
            let seen = Arc::clone(&seen);
            subscriber
                .subscribe(move |event| {
                    seen.lock().push((index, event.copied().ok()));
                    true
                })
                .unwrap();
        }

        subscriber.notify(Ok(&7));
        let observed = seen.lock().clone();
        assert_eq!(
            observed,
            vec![(0, Some(7)), (1, Some(7)), (2, Some(7))]
        );
    }

    #[test]
    fn test_false_return_desubscribes() {
        let subscriber = Subscriber::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        subscriber
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            })
            .unwrap();

        subscriber.notify(Ok(&1));
        subscriber.notify(Ok(&2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(subscriber.is_empty());
    }

    #[test]
    fn test_stop_delivers_code_once_and_clears() {
        let subscriber = Subscriber::<u32>::new();
        let stops = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&stops);
        subscriber
            .subscribe(move |event| {
                seen.lock().push(event.copied());
                true
            })
            .unwrap();

        subscriber.stop(Error::ServiceStopped);
        subscriber.stop(Error::ChannelStopped);

        let observed = stops.lock().clone();
        assert_eq!(observed, vec![Err(Error::ServiceStopped)]);
        assert!(subscriber.stopped());
        assert!(subscriber.is_empty());
    }

    #[test]
    fn test_subscribe_after_stop_gets_stop_code() {
        let subscriber = Subscriber::<u32>::new();
        subscriber.stop(Error::ChannelExpired);

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let result = subscriber.subscribe(move |event| {
            *slot.lock() = Some(event.copied());
            true
        });

        assert_eq!(result, Err(Error::SubscriberStopped));
        assert_eq!(*seen.lock(), Some(Err(Error::ChannelExpired)));
        assert!(subscriber.is_empty());
    }

    #[test]
    fn test_notify_after_stop_is_silent() {
        let subscriber = Subscriber::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        subscriber
            .subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })
            .unwrap();

        subscriber.stop(Error::ServiceStopped);
        subscriber.notify(Ok(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_subscribe_misses_current_notification() {
        let subscriber = Arc::new(Subscriber::<u32>::new());
        let nested_calls = Arc::new(AtomicUsize::new(0));

        let outer = Arc::clone(&subscriber);
        let nested = Arc::clone(&nested_calls);
        subscriber
            .subscribe(move |_| {
                let count = Arc::clone(&nested);
                let _ = outer.subscribe(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    true
                });
                false
            })
            .unwrap();

        subscriber.notify(Ok(&1));
        assert_eq!(nested_calls.load(Ordering::SeqCst), 0);

        subscriber.notify(Ok(&2));
        assert_eq!(nested_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keyed_duplicate_rejected() {
        let unsubscriber = Unsubscriber::<u32>::new();
        unsubscriber.subscribe(|_| true, 1).unwrap();
        assert_eq!(
            unsubscriber.subscribe(|_| true, 1),
            Err(Error::SubscriberExists)
        );
        assert_eq!(unsubscriber.len(), 1);
    }

    #[test]
    fn test_notify_one_targets_single_key() {
        let unsubscriber = Unsubscriber::<u32>::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        unsubscriber
            .subscribe(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    false
                },
                1,
            )
            .unwrap();
        let counter = Arc::clone(&second);
        unsubscriber
            .subscribe(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    false
                },
                2,
            )
            .unwrap();

        unsubscriber.notify_one(1, Err(Error::Desubscribed));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(unsubscriber.len(), 1);
    }

    #[test]
    fn test_notify_one_unknown_key_ignored() {
        let unsubscriber = Unsubscriber::<u32>::new();
        unsubscriber.subscribe(|_| true, 1).unwrap();
        unsubscriber.notify_one(9, Ok(&0));
        assert_eq!(unsubscriber.len(), 1);
    }

    #[test]
    fn test_keyed_retention_on_true() {
        let unsubscriber = Unsubscriber::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        unsubscriber
            .subscribe(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                },
                5,
            )
            .unwrap();

        unsubscriber.notify_one(5, Ok(&1));
        unsubscriber.notify_one(5, Ok(&2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
