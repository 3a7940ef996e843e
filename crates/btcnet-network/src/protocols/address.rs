//! # Address Exchange
//!
//! Gossip plumbing for the host pool: stores incoming `addr` batches (up to
//! pool capacity), answers `getaddr` with a random sample, and optionally
//! advertises our own address on start. Pool mutation is posted to the
//! network strand; everything else runs on the channel strand.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use btcnet_messages::{Address, GetAddress};

use crate::channel::Channel;
use crate::error::Error;
use crate::net::NetworkInner;
use crate::protocols::{attach, Protocol};

/// Addresses returned in one `getaddr` reply.
const FETCH_LIMIT: usize = 1000;

pub struct ProtocolAddress31402 {
    channel: Arc<Channel>,
    net: Arc<NetworkInner>,
}

impl ProtocolAddress31402 {
    pub fn attach(channel: Arc<Channel>, net: Arc<NetworkInner>) {
        attach(Arc::new(Self { channel, net }));
    }

    fn advertise(&self) {
        let Some(own) = self.net.settings().first_self() else {
            return;
        };

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or_default();
        let services = self.net.settings().services_maximum;

        let message = Address {
            addresses: vec![own.to_address_item(timestamp, services)],
        };
        self.channel.send(&message, |_| {});
    }

    fn handle_address(&self, event: Result<&Arc<Address>, Error>) -> bool {
        let Ok(message) = event else { return false };
        if self.stopped() {
            return false;
        }

        let addresses = Arc::clone(message);
        let net = Arc::clone(&self.net);
        let peer = self.authority();
        self.net.strand().post(move || {
            let stored = net.hosts().save(&addresses.addresses);
            debug!(
                %peer,
                received = addresses.addresses.len(),
                stored,
                "addresses stored"
            );
        });
        true
    }

    fn handle_get_address(&self, event: Result<&Arc<GetAddress>, Error>) -> bool {
        if event.is_err() || self.stopped() {
            return false;
        }

        let net = Arc::clone(&self.net);
        let channel = Arc::clone(&self.channel);
        self.net.strand().post(move || {
            let addresses = net.hosts().fetch(FETCH_LIMIT);
            channel.send(&Address { addresses }, |_| {});
        });
        true
    }
}

impl Protocol for ProtocolAddress31402 {
    const NAME: &'static str = "address";

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn start(self: Arc<Self>) {
        debug_assert!(self.channel.strand().stranded());

        if self.net.settings().advertise_enabled() {
            self.advertise();
        }

        let stores = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe::<Address>(move |event| stores.handle_address(event));

        let replies = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe::<GetAddress>(move |event| replies.handle_get_address(event));
    }
}
