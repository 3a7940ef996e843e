//! # Seed Session
//!
//! Populates the host pool when it is below the minimum address count:
//! dials every configured seed concurrently, runs the handshake plus the
//! seed protocol on each, and completes as soon as the pool meets the
//! threshold or every seed has finished. Seed channels are quiet; they
//! never count toward the connection totals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::config::Endpoint;
use crate::connect::Connector;
use crate::error::{Completion, Error};
use crate::net::NetworkInner;
use crate::protocols::ProtocolSeed31402;
use crate::sessions::SessionCore;

type CompleteHandler = Box<dyn FnOnce(Completion) + Send>;

struct Seeding {
    remaining: AtomicUsize,
    start_count: usize,
    handler: Mutex<Option<CompleteHandler>>,
}

pub struct SessionSeed {
    weak_self: Weak<SessionSeed>,
    core: SessionCore,
}

impl SessionSeed {
    pub(crate) fn new(net: Arc<NetworkInner>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            core: SessionCore::new(net),
        })
    }

    /// Completion codes: success when the pool grew, `SeedingComplete`
    /// when the pool was already sufficient (callers treat it as success),
    /// `SeedingUnsuccessful` when every seed finished without producing.
    pub(crate) fn start(&self, handler: impl FnOnce(Completion) + Send + 'static) {
        let net = self.core.net();
        debug_assert!(net.strand().stranded());

        let settings = net.settings();
        if !settings.outbound_enabled() {
            debug!("seeding not required");
            handler(Ok(()));
            return;
        }

        let start_count = net.hosts().count();
        if start_count >= settings.minimum_address_count() {
            debug!(count = start_count, "host pool already sufficient");
            handler(Err(Error::SeedingComplete));
            return;
        }

        if settings.seeds.is_empty() || settings.host_pool_capacity == 0 {
            debug!("no seeds configured");
            handler(Err(Error::SeedingUnsuccessful));
            return;
        }

        let seeds = settings.seeds.clone();
        info!(seeds = seeds.len(), count = start_count, "seeding host pool");

        let seeding = Arc::new(Seeding {
            remaining: AtomicUsize::new(seeds.len()),
            start_count,
            handler: Mutex::new(Some(Box::new(handler))),
        });

        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        for seed in seeds {
            let connector = Connector::new(
                Arc::clone(net.settings()),
                net.strand().clone(),
                net.handle().clone(),
                net.pool().clone(),
            );
            {
                let held = Arc::clone(&connector);
                self.core.on_stop(move || held.stop());
            }

            let dialer = Arc::clone(&session);
            let progress = Arc::clone(&seeding);
            let target = seed.clone();
            connector.connect(seed, move |result| {
                dialer.handle_connect(result, target, progress);
            });
        }
    }

    fn handle_connect(
        &self,
        result: Result<Arc<Channel>, Error>,
        seed: Endpoint,
        seeding: Arc<Seeding>,
    ) {
        let channel = match result {
            Err(code) => {
                debug!(%seed, %code, "seed connect failed");
                self.seed_finished(&seeding);
                return;
            }
            Ok(channel) => channel,
        };

        // Seed channels never count toward the connection totals.
        channel.set_quiet();

        let Some(session) = self.weak_self.upgrade() else {
            return;
        };
        let progress = Arc::clone(&seeding);
        let finished_seed = seed.clone();

        self.core.start_channel(
            channel,
            false,
            move |result| {
                if let Err(code) = result {
                    debug!(%seed, %code, "seed channel failed to start");
                }
            },
            move |code| {
                debug!(seed = %finished_seed, %code, "seed channel stopped");
                session.seed_finished(&progress);
            },
            |net, channel| {
                let seeded = channel.authority();
                ProtocolSeed31402::attach(
                    Arc::clone(channel),
                    Arc::clone(net),
                    move |result| {
                        debug!(seed = %seeded, outcome = ?result, "seed protocol finished");
                    },
                );
            },
        );
    }

    /// One seed finished (connect failure or channel stop). Completes the
    /// session when the pool is sufficient or every seed is done.
    fn seed_finished(&self, seeding: &Arc<Seeding>) {
        let net = self.core.net();
        debug_assert!(net.strand().stranded());

        let count = net.hosts().count();
        let minimum = net.settings().minimum_address_count();

        if count >= minimum {
            if let Some(handler) = seeding.handler.lock().take() {
                info!(count, "seeding complete");
                handler(Ok(()));
            }
            // Remaining seed channels have nothing left to contribute.
            self.stop();
            return;
        }

        if seeding.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(handler) = seeding.handler.lock().take() {
                if count > seeding.start_count {
                    info!(count, "seeding finished below minimum");
                    handler(Ok(()));
                } else {
                    debug!(count, "seeding unsuccessful");
                    handler(Err(Error::SeedingUnsuccessful));
                }
            }
        }
    }

    pub(crate) fn stop(&self) {
        self.core.stop();
    }
}
