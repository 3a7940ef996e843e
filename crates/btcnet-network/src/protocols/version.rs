//! # Version Handshake
//!
//! Exchanges `version`/`verack`, enforces the negotiation policy (minimum
//! protocol level, required and invalid service masks, timestamp skew), and
//! records the negotiated level on the channel. The completion handler
//! observes exactly one outcome.
//!
//! Two attachment levels: 31402 completes silently on policy failure;
//! 70002 additionally sends a `reject` notice first when enabled.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, trace};

use btcnet_messages::{NetworkAddress, Payload, Reject, RejectCode, Version, VersionAcknowledge};

use crate::channel::Channel;
use crate::error::{Completion, Error};
use crate::protocols::{attach, Protocol};
use crate::settings::Settings;

type CompleteHandler = Box<dyn FnOnce(Completion) + Send>;

struct Handshake {
    received_version: bool,
    received_acknowledge: bool,
    handler: Option<CompleteHandler>,
}

/// The handshake protocol for one channel.
pub struct ProtocolVersion {
    channel: Arc<Channel>,
    settings: Arc<Settings>,
    send_rejects: bool,
    state: Mutex<Handshake>,
}

impl ProtocolVersion {
    /// Attach the baseline handshake (no reject notices).
    pub fn attach_31402(
        channel: Arc<Channel>,
        settings: Arc<Settings>,
        handler: impl FnOnce(Completion) + Send + 'static,
    ) {
        attach(Self::new(channel, settings, false, handler));
    }

    /// Attach the BIP 61 handshake: policy failures are answered with a
    /// `reject` notice when `enable_reject` is configured.
    pub fn attach_70002(
        channel: Arc<Channel>,
        settings: Arc<Settings>,
        handler: impl FnOnce(Completion) + Send + 'static,
    ) {
        attach(Self::new(channel, settings, true, handler));
    }

    fn new(
        channel: Arc<Channel>,
        settings: Arc<Settings>,
        send_rejects: bool,
        handler: impl FnOnce(Completion) + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            settings,
            send_rejects,
            state: Mutex::new(Handshake {
                received_version: false,
                received_acknowledge: false,
                handler: Some(Box::new(handler)),
            }),
        })
    }

    fn now_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default()
    }

    fn own_version(&self) -> Version {
        let peer = self.channel.authority();
        let own = self.settings.first_self();

        Version {
            value: self.settings.protocol_maximum,
            services: self.settings.services_maximum,
            timestamp: Self::now_timestamp(),
            address_receiver: NetworkAddress {
                services: 0,
                ip: peer.ip,
                port: peer.port,
            },
            address_sender: match own {
                Some(authority) => NetworkAddress {
                    services: self.settings.services_maximum,
                    ip: authority.ip,
                    port: authority.port,
                },
                None => NetworkAddress {
                    services: 0,
                    ip: std::net::Ipv6Addr::UNSPECIFIED.into(),
                    port: 0,
                },
            },
            nonce: self.channel.nonce(),
            user_agent: self.settings.user_agent.clone(),
            start_height: self.channel.start_height(),
            relay: self.settings.enable_relay,
        }
    }

    fn handle_version(&self, event: Result<&Arc<Version>, Error>) -> bool {
        let version = match event {
            Err(code) => {
                self.complete(Err(code));
                return false;
            }
            Ok(version) => Arc::clone(version),
        };

        if std::mem::replace(&mut self.state.lock().received_version, true) {
            self.fail(Error::ProtocolViolation, "duplicate version");
            return false;
        }

        if let Err(code) = validate(&self.settings, &version) {
            self.fail(code, "version rejected");
            return false;
        }

        let negotiated = self.settings.protocol_maximum.min(version.value);
        trace!(
            peer = %self.authority(),
            peer_version = version.value,
            negotiated,
            agent = %version.user_agent,
            "version received"
        );
        self.channel.set_peer_version(version);
        self.channel.set_negotiated_version(negotiated);

        // A failed write stops the channel, which completes the handshake
        // with the failure code through the stop cascade.
        self.channel.send(&VersionAcknowledge, |_| {});

        self.try_complete();
        false
    }

    fn handle_acknowledge(&self, event: Result<&Arc<VersionAcknowledge>, Error>) -> bool {
        if let Err(code) = event {
            self.complete(Err(code));
            return false;
        }

        if std::mem::replace(&mut self.state.lock().received_acknowledge, true) {
            self.fail(Error::ProtocolViolation, "duplicate verack");
            return false;
        }

        self.try_complete();
        false
    }

    /// Handshake failure: optionally notify the peer, then report.
    fn fail(&self, code: Error, reason: &'static str) {
        debug!(peer = %self.authority(), %code, reason, "handshake failed");

        if self.send_rejects && self.settings.enable_reject {
            let notice = Reject {
                message: Version::command().to_owned(),
                code: RejectCode::Obsolete,
                reason: reason.to_owned(),
                data: Vec::new(),
            };
            self.channel.send(&notice, |_| {});
        }

        self.complete(Err(code));
    }

    fn try_complete(&self) {
        let done = {
            let state = self.state.lock();
            state.received_version && state.received_acknowledge
        };
        if done {
            self.complete(Ok(()));
        }
    }

    fn complete(&self, result: Completion) {
        if let Some(handler) = self.state.lock().handler.take() {
            handler(result);
        }
    }
}

/// Negotiation policy: minimum level, required and invalid service masks,
/// and bounded timestamp skew.
fn validate(settings: &Settings, version: &Version) -> Result<(), Error> {
    if version.value < settings.protocol_minimum {
        return Err(Error::PeerUnsupported);
    }

    let required = settings.services_minimum;
    if version.services & required != required {
        return Err(Error::PeerInsufficient);
    }

    if version.services & settings.invalid_services != 0 {
        return Err(Error::PeerInsufficient);
    }

    let skew = (ProtocolVersion::now_timestamp() - version.timestamp).unsigned_abs();
    if skew > settings.maximum_skew().as_secs() {
        return Err(Error::PeerTimestamp);
    }

    Ok(())
}

impl Protocol for ProtocolVersion {
    const NAME: &'static str = "version";

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn start(self: Arc<Self>) {
        debug_assert!(self.channel.strand().stranded());

        let versions = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe::<Version>(move |event| versions.handle_version(event));

        let acknowledges = Arc::clone(&self);
        let _ = self
            .channel
            .subscribe::<VersionAcknowledge>(move |event| acknowledges.handle_acknowledge(event));

        // Send failures surface through the channel stop cascade.
        let own = self.own_version();
        self.channel.send(&own, |_| {});
    }

    fn stopping(&self, code: Error) {
        self.complete(Err(code));
    }
}
