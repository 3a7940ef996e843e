//! # Outbound Session
//!
//! Maintains `outbound_connections` slots. Each slot races a batch of
//! `connect_batch_size` connectors, every connector dialing its own pool
//! address; the first success stops its siblings and becomes the slot's
//! channel. A failed batch retries immediately, or on the retry timer when
//! the pool is dry; a stopped channel restores its address and re-opens the
//! slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use btcnet_messages::AddressItem;

use crate::channel::Channel;
use crate::config::Authority;
use crate::connect::Connector;
use crate::error::{Completion, Error};
use crate::net::NetworkInner;
use crate::sessions::{attach_protocols, SessionCore};
use crate::timer::Deadline;

/// One racing batch; the first success claims `won`.
struct Batch {
    won: AtomicBool,
    remaining: AtomicUsize,
    connectors: Mutex<Vec<Arc<Connector>>>,
}

pub struct SessionOutbound {
    weak_self: Weak<SessionOutbound>,
    core: SessionCore,
    retry_timers: Mutex<HashMap<usize, Arc<Deadline>>>,
}

impl SessionOutbound {
    pub(crate) fn new(net: Arc<NetworkInner>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            core: SessionCore::new(net),
            retry_timers: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn start(&self, handler: impl FnOnce(Completion) + Send + 'static) {
        let net = self.core.net();
        debug_assert!(net.strand().stranded());

        let settings = net.settings();
        if !settings.outbound_enabled() {
            debug!("outbound session disabled");
            handler(Ok(()));
            return;
        }

        if settings.host_pool_capacity == 0 {
            debug!("outbound session requires a host pool");
            handler(Err(Error::AddressNotFound));
            return;
        }

        for slot in 0..usize::from(settings.outbound_connections) {
            self.start_batch(slot);
        }
        handler(Ok(()))
    }

    fn start_batch(&self, slot: usize) {
        debug_assert!(self.core.net().strand().stranded());

        if self.core.stopped() {
            return;
        }
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        let net = self.core.net();
        let size = usize::from(net.settings().connect_batch_size.max(1));
        let batch = Arc::new(Batch {
            won: AtomicBool::new(false),
            remaining: AtomicUsize::new(size),
            connectors: Mutex::new(Vec::with_capacity(size)),
        });

        for _ in 0..size {
            let connector = Connector::new(
                Arc::clone(net.settings()),
                net.strand().clone(),
                net.handle().clone(),
                net.pool().clone(),
            );
            batch.connectors.lock().push(Arc::clone(&connector));
            {
                let weak = Arc::downgrade(&connector);
                self.core.on_stop(move || {
                    if let Some(connector) = weak.upgrade() {
                        connector.stop();
                    }
                });
            }

            let racer = Arc::clone(&session);
            let racing = Arc::clone(&batch);
            match net.hosts().take() {
                Ok(item) => {
                    let authority = Authority::from(&item);
                    let dialed = Arc::clone(&connector);
                    connector.connect_authority(authority, move |result| {
                        racer.handle_batch(slot, result, Some(item), &racing, &dialed);
                    });
                }
                Err(code) => {
                    self.handle_batch(slot, Err(code), None, &batch, &connector);
                }
            }
        }
    }

    fn handle_batch(
        &self,
        slot: usize,
        result: Result<Arc<Channel>, Error>,
        item: Option<AddressItem>,
        batch: &Arc<Batch>,
        connector: &Arc<Connector>,
    ) {
        debug_assert!(self.core.net().strand().stranded());

        match result {
            Ok(channel) => {
                if batch.won.swap(true, Ordering::AcqRel) {
                    // A sibling already claimed the slot.
                    channel.stop(Error::ChannelStopped);
                    if let Some(item) = item {
                        self.core.net().hosts().restore(item);
                    }
                    return;
                }

                for sibling in batch.connectors.lock().drain(..) {
                    if !Arc::ptr_eq(&sibling, connector) {
                        sibling.stop();
                    }
                }

                info!(slot, peer = %channel.authority(), "outbound channel connected");
                self.start_slot_channel(slot, channel, item);
            }
            Err(code) => {
                if batch.remaining.fetch_sub(1, Ordering::AcqRel) == 1
                    && !batch.won.load(Ordering::Acquire)
                {
                    // Whole batch failed.
                    debug!(slot, %code, "outbound batch failed");
                    if code == Error::AddressNotFound {
                        // Pool is dry; wait for seeding or address relay.
                        self.schedule_retry(slot);
                    } else {
                        self.start_batch(slot);
                    }
                }
            }
        }
    }

    fn start_slot_channel(&self, slot: usize, channel: Arc<Channel>, item: Option<AddressItem>) {
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };
        let starting = Arc::clone(&channel);

        self.core.start_channel(
            channel,
            true,
            move |result| {
                if let Err(code) = result {
                    debug!(slot, peer = %starting.authority(), %code, "outbound channel failed to start");
                }
            },
            move |code| {
                debug!(slot, %code, "outbound channel stopped");
                if let Some(item) = item {
                    session.core.net().hosts().restore(item);
                }
                if !session.core.stopped() {
                    session.start_batch(slot);
                }
            },
            attach_protocols,
        );
    }

    fn schedule_retry(&self, slot: usize) {
        if self.core.stopped() {
            return;
        }
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        let net = self.core.net();
        let timer = Arc::clone(self.retry_timers.lock().entry(slot).or_insert_with(|| {
            Arc::new(Deadline::new(net.strand().clone(), net.handle().clone()))
        }));

        timer.start(net.settings().retry_timeout(), move |result| {
            if result.is_err() || session.core.stopped() {
                return;
            }
            session.start_batch(slot);
        });
    }

    pub(crate) fn stop(&self) {
        self.core.stop();
        for (_, timer) in self.retry_timers.lock().drain() {
            timer.stop();
        }
    }
}
