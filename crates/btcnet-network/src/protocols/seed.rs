//! # Seed Protocol
//!
//! Handshake-time protocol used only by seed sessions: optionally advertise
//! our own address, request the seed's address batch, store it into the
//! pool, then stop the channel. Completion aggregates three sub-events
//! (own-address send, `getaddr` send, batch store) under a germination
//! timeout; the terminal store event carries `ChannelStopped`, which the
//! session reads as a finished seed.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use btcnet_messages::{Address, GetAddress};

use crate::channel::Channel;
use crate::error::{Completion, Error};
use crate::net::NetworkInner;
use crate::protocols::{attach, Protocol};
use crate::synchronizer::Synchronizer;
use crate::timer::Deadline;

pub struct ProtocolSeed31402 {
    channel: Arc<Channel>,
    net: Arc<NetworkInner>,
    synchronizer: Arc<Synchronizer>,
    germination: Deadline,
}

impl ProtocolSeed31402 {
    pub fn attach(
        channel: Arc<Channel>,
        net: Arc<NetworkInner>,
        handler: impl FnOnce(Completion) + Send + 'static,
    ) {
        let completing = Arc::clone(&channel);
        let synchronizer = Arc::new(Synchronizer::new(3, move |result| {
            // The channel served its purpose either way; the code reaching
            // the session tells it whether addresses landed.
            let code = result.err().unwrap_or(Error::ChannelStopped);
            completing.stop(code);
            handler(result);
        }));

        let germination = Deadline::new(channel.strand().clone(), net.handle().clone());

        attach(Arc::new(Self {
            channel,
            net,
            synchronizer,
            germination,
        }));
    }

    fn send_own_address(&self) {
        let Some(own) = self.net.settings().first_self() else {
            // Nothing to advertise; this sub-event completes immediately.
            self.synchronizer.event(Ok(()));
            return;
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or_default();
        let message = Address {
            addresses: vec![own.to_address_item(timestamp, self.net.settings().services_maximum)],
        };

        let events = Arc::clone(&self.synchronizer);
        self.channel.send(&message, move |result| {
            events.event(result);
        });
    }

    fn handle_address(&self, event: Result<&Arc<Address>, Error>) -> bool {
        let message = match event {
            Err(code) => {
                self.synchronizer.event(Err(code));
                return false;
            }
            Ok(message) => Arc::clone(message),
        };

        let net = Arc::clone(&self.net);
        let events = Arc::clone(&self.synchronizer);
        let peer = self.authority();
        self.net.strand().post(move || {
            let stored = net.hosts().save(&message.addresses);
            debug!(
                seed = %peer,
                received = message.addresses.len(),
                stored,
                "seed addresses stored"
            );
            // Terminal sub-event; ChannelStopped marks the seed finished.
            events.event(Err(Error::ChannelStopped));
        });

        false
    }
}

impl Protocol for ProtocolSeed31402 {
    const NAME: &'static str = "seed";

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn start(self: Arc<Self>) {
        debug_assert!(self.channel.strand().stranded());

        if self.net.settings().host_pool_capacity == 0 {
            self.synchronizer.event(Err(Error::AddressNotFound));
            return;
        }

        let events = Arc::clone(&self.synchronizer);
        self.germination
            .start(self.net.settings().channel_germination(), move |result| {
                if result.is_ok() {
                    events.event(Err(Error::ChannelTimeout));
                }
            });

        let batches = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe::<Address>(move |event| batches.handle_address(event));

        self.send_own_address();

        let events = Arc::clone(&self.synchronizer);
        self.channel.send(&GetAddress, move |result| {
            events.event(result);
        });
    }

    fn stopping(&self, code: Error) {
        self.germination.stop();
        self.synchronizer.event(Err(code));
    }
}
