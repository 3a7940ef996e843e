//! # Inbound Session
//!
//! Binds the configured authorities and admits incoming channels.
//! Admission is accept-then-reject: the connection is taken from the
//! backlog, then screened against the blacklist, whitelist, and the
//! inbound cap before the handshake runs.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::accept::Acceptor;
use crate::channel::Channel;
use crate::error::{Completion, Error};
use crate::net::NetworkInner;
use crate::sessions::{attach_protocols, SessionCore};
use crate::synchronizer::Synchronizer;

pub struct SessionInbound {
    weak_self: Weak<SessionInbound>,
    core: SessionCore,
    acceptors: Mutex<Vec<Arc<Acceptor>>>,
}

impl SessionInbound {
    pub(crate) fn new(net: Arc<NetworkInner>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            core: SessionCore::new(net),
            acceptors: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn start(&self, handler: impl FnOnce(Completion) + Send + 'static) {
        let net = self.core.net();
        debug_assert!(net.strand().stranded());

        let settings = net.settings();
        if !settings.inbound_enabled() {
            debug!("inbound session disabled");
            handler(Ok(()));
            return;
        }
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        let binds = settings.binds.clone();
        let binding = Arc::new(Synchronizer::new(binds.len(), move |result| {
            if result.is_ok() {
                for acceptor in session.acceptors.lock().iter() {
                    session.accept_next(Arc::clone(acceptor));
                }
            }
            handler(result);
        }));

        for bind in binds {
            let acceptor = Acceptor::new(
                Arc::clone(net.settings()),
                net.strand().clone(),
                net.handle().clone(),
                net.pool().clone(),
            );
            self.acceptors.lock().push(Arc::clone(&acceptor));
            {
                let held = Arc::clone(&acceptor);
                self.core.on_stop(move || held.stop());
            }

            let events = Arc::clone(&binding);
            acceptor.start(bind, move |result| events.event(result));
        }
    }

    /// One accept at a time per listener; admission is quick, so serial
    /// accepts keep up with the backlog.
    fn accept_next(&self, acceptor: Arc<Acceptor>) {
        if self.core.stopped() || acceptor.stopped() {
            return;
        }
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        let again = Arc::clone(&acceptor);
        acceptor.accept(move |result| {
            match result {
                Err(Error::ServiceStopped) => return,
                Err(code) => debug!(%code, "accept failed"),
                Ok(channel) => session.handle_accept(channel),
            }
            session.accept_next(again);
        });
    }

    fn handle_accept(&self, channel: Arc<Channel>) {
        let net = self.core.net();
        debug_assert!(net.strand().stranded());

        if self.core.stopped() {
            channel.stop(Error::ServiceStopped);
            return;
        }

        let authority = channel.authority();
        let settings = net.settings();

        if settings.blacklisted(&authority) || !settings.whitelisted(&authority) {
            debug!(peer = %authority, "inbound peer blocked");
            channel.stop(Error::AddressBlocked);
            return;
        }

        if net.inbound_channel_count() >= usize::from(settings.inbound_connections) {
            debug!(peer = %authority, "inbound oversubscribed");
            channel.stop(Error::Oversubscribed);
            return;
        }

        info!(peer = %authority, "inbound channel accepted");

        self.core.start_channel(
            channel,
            true,
            move |result| {
                if let Err(code) = result {
                    debug!(peer = %authority, %code, "inbound channel failed to start");
                }
            },
            move |code| {
                debug!(peer = %authority, %code, "inbound channel stopped");
            },
            attach_protocols,
        );
    }

    pub(crate) fn stop(&self) {
        self.core.stop();
    }
}
