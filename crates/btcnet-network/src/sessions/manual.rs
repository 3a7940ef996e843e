//! # Manual Session
//!
//! Maintains a connection to each configured or runtime-added peer
//! endpoint. Connect failures retry on a randomized delay; channel stops
//! reconnect immediately, except `AddressInUse` (already connected), which
//! ends the cycle for that host.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::Endpoint;
use crate::connect::Connector;
use crate::error::{Completion, Error};
use crate::net::NetworkInner;
use crate::sessions::{attach_protocols, SessionCore};
use crate::timer::Deadline;

type ChannelHandler = Box<dyn FnOnce(Result<Arc<Channel>, Error>) + Send>;

/// First-outcome slot: the caller's handler sees only the initial attempt.
type FirstOutcome = Arc<Mutex<Option<ChannelHandler>>>;

fn report_first(slot: &FirstOutcome, result: Result<Arc<Channel>, Error>) {
    if let Some(handler) = slot.lock().take() {
        handler(result);
    }
}

fn silent_slot() -> FirstOutcome {
    Arc::new(Mutex::new(None))
}

pub struct SessionManual {
    weak_self: Weak<SessionManual>,
    core: SessionCore,
    connector: Mutex<Option<Arc<Connector>>>,
    retry_timers: Mutex<HashMap<String, Arc<Deadline>>>,
}

impl SessionManual {
    pub(crate) fn new(net: Arc<NetworkInner>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            core: SessionCore::new(net),
            connector: Mutex::new(None),
            retry_timers: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn start(&self, handler: impl FnOnce(Completion) + Send + 'static) {
        let net = self.core.net();
        debug_assert!(net.strand().stranded());

        let connector = Connector::new(
            Arc::clone(net.settings()),
            net.strand().clone(),
            net.handle().clone(),
            net.pool().clone(),
        );
        *self.connector.lock() = Some(Arc::clone(&connector));
        self.core.on_stop(move || connector.stop());

        handler(Ok(()))
    }

    /// Connect and keep reconnecting; outcomes are logged only.
    pub fn connect(&self, endpoint: Endpoint) {
        self.start_connect(endpoint, silent_slot());
    }

    /// Connect with a caller handler observing the first attempt's outcome
    /// (later cycles are logged only).
    pub fn connect_with(
        &self,
        endpoint: Endpoint,
        handler: impl FnOnce(Result<Arc<Channel>, Error>) + Send + 'static,
    ) {
        let slot: FirstOutcome = Arc::new(Mutex::new(Some(Box::new(handler))));
        self.start_connect(endpoint, slot);
    }

    fn start_connect(&self, endpoint: Endpoint, slot: FirstOutcome) {
        debug_assert!(self.core.net().strand().stranded());

        if self.core.stopped() {
            debug!(peer = %endpoint, "manual connection suspended");
            report_first(&slot, Err(Error::ServiceStopped));
            return;
        }

        let Some(connector) = self.connector.lock().clone() else {
            report_first(&slot, Err(Error::ServiceStopped));
            return;
        };
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        let target = endpoint.clone();
        connector.connect(endpoint, move |result| {
            session.handle_connect(result, target, slot);
        });
    }

    fn handle_connect(
        &self,
        result: Result<Arc<Channel>, Error>,
        endpoint: Endpoint,
        slot: FirstOutcome,
    ) {
        let channel = match result {
            Err(code) => {
                warn!(peer = %endpoint, %code, "manual connect failed");
                report_first(&slot, Err(code));
                self.schedule_retry(endpoint);
                return;
            }
            Ok(channel) => channel,
        };

        info!(peer = %endpoint, authority = %channel.authority(), "manual channel connected");

        let Some(session) = self.weak_self.upgrade() else {
            return;
        };
        let starting = Arc::clone(&channel);
        let started_slot = Arc::clone(&slot);
        let stopped_endpoint = endpoint.clone();

        self.core.start_channel(
            channel,
            true,
            move |result| match result {
                Ok(()) => report_first(&started_slot, Ok(starting)),
                Err(code) => {
                    info!(peer = %starting.authority(), %code, "manual channel failed to start");
                }
            },
            move |code| session.handle_channel_stop(code, stopped_endpoint),
            attach_protocols,
        );
    }

    fn handle_channel_stop(&self, code: Error, endpoint: Endpoint) {
        debug!(peer = %endpoint, %code, "manual channel stopped");

        // Already connected elsewhere; do not fight over the host.
        if code == Error::AddressInUse || self.core.stopped() {
            return;
        }

        self.start_connect(endpoint, silent_slot());
    }

    /// Retry after 50-100% of the configured timeout.
    fn schedule_retry(&self, endpoint: Endpoint) {
        if self.core.stopped() {
            return;
        }
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        let net = self.core.net();
        let timer = Arc::clone(
            self.retry_timers
                .lock()
                .entry(endpoint.to_target())
                .or_insert_with(|| {
                    Arc::new(Deadline::new(net.strand().clone(), net.handle().clone()))
                }),
        );

        let configured = net.settings().retry_timeout();
        let delay = rand::thread_rng().gen_range(configured / 2..=configured);

        timer.start(delay, move |result| {
            if result.is_err() || session.core.stopped() {
                return;
            }
            session.start_connect(endpoint, silent_slot());
        });
    }

    pub(crate) fn stop(&self) {
        self.core.stop();
        for (_, timer) in self.retry_timers.lock().drain() {
            timer.stop();
        }
    }
}
