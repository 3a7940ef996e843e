//! # Ping Protocols
//!
//! Keep-alive on the channel heartbeat. The 31402 variant sends bare pings
//! and ignores incoming ones; the 60001 (BIP 31) variant carries a nonce,
//! answers incoming pings with matching pongs, and terminates peers that
//! fail to echo in time.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use btcnet_messages::{Ping, Pong};

use crate::channel::Channel;
use crate::error::Error;
use crate::protocols::{attach, Protocol};

/// Pre-BIP31 keep-alive: empty pings on the heartbeat, incoming ignored.
pub struct ProtocolPing31402 {
    channel: Arc<Channel>,
}

impl ProtocolPing31402 {
    pub fn attach(channel: Arc<Channel>) {
        attach(Arc::new(Self { channel }));
    }
}

impl Protocol for ProtocolPing31402 {
    const NAME: &'static str = "ping";

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn start(self: Arc<Self>) {
        debug_assert!(self.channel.strand().stranded());

        let beats = Arc::clone(&self);
        let _ = self.channel.subscribe_heartbeat(move |event| {
            if event.is_err() || beats.stopped() {
                return false;
            }
            beats.channel.send(&Ping { nonce: 0 }, |_| {});
            true
        });

        // Subscribed so incoming pings are parsed and dropped, not fatal.
        let _ = self.channel.subscribe::<Ping>(|event| event.is_ok());
    }
}

/// BIP 31 keep-alive with nonce tracking.
pub struct ProtocolPing60001 {
    channel: Arc<Channel>,
    pending: Mutex<Option<u64>>,
}

impl ProtocolPing60001 {
    pub fn attach(channel: Arc<Channel>) {
        attach(Arc::new(Self {
            channel,
            pending: Mutex::new(None),
        }));
    }

    fn handle_heartbeat(&self) -> bool {
        if self.stopped() {
            return false;
        }

        let mut pending = self.pending.lock();
        if pending.is_some() {
            // The previous ping was never answered.
            debug!(peer = %self.authority(), "ping unanswered");
            drop(pending);
            self.stop(Error::ChannelInactive);
            return false;
        }

        let nonce = rand::thread_rng().gen_range(1..u64::MAX);
        *pending = Some(nonce);
        drop(pending);

        trace!(peer = %self.authority(), nonce, "sending ping");
        self.channel.send(&Ping { nonce }, |_| {});
        true
    }

    fn handle_ping(&self, event: Result<&Arc<Ping>, Error>) -> bool {
        let Ok(ping) = event else { return false };
        if self.stopped() {
            return false;
        }

        self.channel.send(&Pong { nonce: ping.nonce }, |_| {});
        true
    }

    fn handle_pong(&self, event: Result<&Arc<Pong>, Error>) -> bool {
        let Ok(pong) = event else { return false };
        if self.stopped() {
            return false;
        }

        let expected = self.pending.lock().take();
        match expected {
            Some(nonce) if nonce == pong.nonce => {
                trace!(peer = %self.authority(), nonce, "pong matched");
                true
            }
            _ => {
                // Unsolicited or mismatched; the peer is not speaking the
                // protocol we negotiated.
                debug!(
                    peer = %self.authority(),
                    received = pong.nonce,
                    "pong nonce mismatch"
                );
                self.stop(Error::ProtocolViolation);
                false
            }
        }
    }
}

impl Protocol for ProtocolPing60001 {
    const NAME: &'static str = "ping";

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn start(self: Arc<Self>) {
        debug_assert!(self.channel.strand().stranded());

        let beats = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe_heartbeat(move |event| event.is_ok() && beats.handle_heartbeat());

        let pings = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe::<Ping>(move |event| pings.handle_ping(event));

        let pongs = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe::<Pong>(move |event| pongs.handle_pong(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_channel;
    use std::sync::mpsc;
    use std::time::Duration;

    fn make_protocol(pending: Option<u64>) -> (crate::threadpool::Threadpool, Arc<ProtocolPing60001>) {
        let fixture = make_channel(|_| {}, false);
        let protocol = Arc::new(ProtocolPing60001 {
            channel: fixture.channel,
            pending: Mutex::new(pending),
        });
        (fixture.pool, protocol)
    }

    #[test]
    fn test_matching_pong_clears_pending() {
        let (_pool, protocol) = make_protocol(Some(7));

        let retained = protocol.handle_pong(Ok(&Arc::new(Pong { nonce: 7 })));
        assert!(retained);
        assert!(protocol.pending.lock().is_none());
        assert!(!protocol.channel.stopped());
    }

    #[test]
    fn test_mismatched_pong_is_protocol_violation() {
        let (_pool, protocol) = make_protocol(Some(7));
        let (tx, rx) = mpsc::channel();
        protocol
            .channel
            .subscribe_stop(move |code| tx.send(code).unwrap())
            .unwrap();

        let retained = protocol.handle_pong(Ok(&Arc::new(Pong { nonce: 5 })));
        assert!(!retained);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Error::ProtocolViolation
        );
        // The stop subscription fires once; no second delivery.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_unsolicited_pong_is_protocol_violation() {
        let (_pool, protocol) = make_protocol(None);
        let (tx, rx) = mpsc::channel();
        protocol
            .channel
            .subscribe_stop(move |code| tx.send(code).unwrap())
            .unwrap();

        assert!(!protocol.handle_pong(Ok(&Arc::new(Pong { nonce: 9 }))));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Error::ProtocolViolation
        );
    }

    #[test]
    fn test_unanswered_ping_is_channel_inactive() {
        let (_pool, protocol) = make_protocol(Some(3));
        let (tx, rx) = mpsc::channel();
        protocol
            .channel
            .subscribe_stop(move |code| tx.send(code).unwrap())
            .unwrap();

        assert!(!protocol.handle_heartbeat());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Error::ChannelInactive
        );
    }

    #[test]
    fn test_heartbeat_sends_and_tracks_nonce() {
        let (_pool, protocol) = make_protocol(None);
        assert!(protocol.handle_heartbeat());
        assert!(protocol.pending.lock().is_some());
    }
}
