//! # Sessions
//!
//! Channel lifecycle managers. Each variant (manual, seed, inbound,
//! outbound) produces channels its own way; the shared core here performs
//! the common start sequence: loopback nonce registration, stop wiring,
//! handshake with timeout, channel counting, protocol attachment, and the
//! mirrored teardown.
//!
//! All session logic runs on the network strand.

pub mod inbound;
pub mod manual;
pub mod outbound;
pub mod seed;

pub use inbound::SessionInbound;
pub use manual::SessionManual;
pub use outbound::SessionOutbound;
pub use seed::SessionSeed;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use btcnet_messages::level;

use crate::channel::Channel;
use crate::error::{Completion, Error};
use crate::net::NetworkInner;
use crate::protocols::{
    ProtocolAddress31402, ProtocolAlert311, ProtocolPing31402, ProtocolPing60001,
    ProtocolReject70002, ProtocolVersion,
};
use crate::subscribe::Subscriber;
use crate::timer::Deadline;

/// Lifecycle state shared by every session variant.
pub(crate) struct SessionCore {
    net: Arc<NetworkInner>,
    stopped: AtomicBool,
    stop_subscriber: Subscriber<()>,
}

impl SessionCore {
    pub fn new(net: Arc<NetworkInner>) -> Self {
        Self {
            net,
            stopped: AtomicBool::new(false),
            stop_subscriber: Subscriber::new(),
        }
    }

    pub fn net(&self) -> &Arc<NetworkInner> {
        &self.net
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the session: every registered teardown closure runs once.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.stop_subscriber.stop(Error::ServiceStopped);
        }
    }

    /// Register a teardown closure; runs immediately when the session is
    /// already stopped.
    pub fn on_stop(&self, teardown: impl FnOnce() + Send + 'static) {
        let mut slot = Some(teardown);
        let _ = self.stop_subscriber.subscribe(move |event| {
            if event.is_err() {
                if let Some(teardown) = slot.take() {
                    teardown();
                }
            }
            true
        });
    }

    /// The common channel start sequence.
    ///
    /// Wires the channel's stop subscription (so `on_stop` fires exactly
    /// once with the terminal code), registers the outbound nonce for
    /// loopback detection, runs the version handshake under its timeout,
    /// counts the channel, and on success notifies connect subscribers,
    /// invokes `on_start`, attaches the steady-state protocols, once.
    /// The read loop is resumed exactly once, as the handshake begins.
    pub fn start_channel(
        &self,
        channel: Arc<Channel>,
        notify: bool,
        on_start: impl FnOnce(Completion) + Send + 'static,
        on_stop: impl FnOnce(Error) + Send + 'static,
        attach: impl FnOnce(&Arc<NetworkInner>, &Arc<Channel>) + Send + 'static,
    ) {
        let net = Arc::clone(&self.net);
        debug_assert!(net.strand().stranded());

        channel.set_start_height(net.start_height());

        let counted = Arc::new(AtomicBool::new(false));
        let stored = Arc::new(AtomicBool::new(false));

        // Session stop reaps the channel.
        {
            let weak = Arc::downgrade(&channel);
            let _ = self.stop_subscriber.subscribe(move |event| {
                if event.is_err() {
                    if let Some(channel) = weak.upgrade() {
                        channel.stop(Error::ServiceStopped);
                    }
                }
                true
            });
        }

        // Teardown mirror of the start sequence, on the network strand.
        {
            let net = Arc::clone(&net);
            let channel = Arc::clone(&channel);
            let counted = Arc::clone(&counted);
            let stored = Arc::clone(&stored);
            let _ = channel.clone().subscribe_stop(move |code| {
                net.strand().post({
                    let net = Arc::clone(&net);
                    move || {
                        if stored.load(Ordering::Acquire) {
                            net.unstore_nonce(&channel);
                        }
                        if counted.load(Ordering::Acquire) {
                            net.uncount_channel(&channel);
                        }
                        on_stop(code);
                    }
                });
            });
        }

        // Loopback detection needs the outbound nonce registered before
        // our version message carries it.
        if net.store_nonce(&channel) {
            stored.store(true, Ordering::Release);
        } else {
            channel.stop(Error::ChannelConflict);
            on_start(Err(Error::ChannelConflict));
            return;
        }

        let timeout = Arc::new(Deadline::new(net.strand().clone(), net.handle().clone()));
        {
            let weak = Arc::downgrade(&channel);
            timeout.start(net.settings().channel_handshake(), move |result| {
                if result.is_ok() {
                    if let Some(channel) = weak.upgrade() {
                        debug!(peer = %channel.authority(), "handshake timed out");
                        channel.stop(Error::ChannelTimeout);
                    }
                }
            });
        }

        // Handshake completion: back onto the network strand for counting
        // and steady-state attachment.
        let completion = {
            let net = Arc::clone(&net);
            let channel = Arc::clone(&channel);
            let counted = Arc::clone(&counted);
            move |result: Completion| {
                net.strand().post({
                    let net = Arc::clone(&net);
                    move || {
                        timeout.stop();

                        let outcome = result.and_then(|()| {
                            net.count_channel(&channel)
                                .map(|()| counted.store(true, Ordering::Release))
                        });

                        match outcome {
                            Ok(()) => {
                                debug!(
                                    peer = %channel.authority(),
                                    version = channel.negotiated_version(),
                                    inbound = channel.inbound(),
                                    "channel started"
                                );
                                if notify {
                                    net.notify_connect(&channel);
                                }
                                on_start(Ok(()));
                                attach(&net, &channel);
                            }
                            Err(code) => {
                                channel.stop(code);
                                on_start(Err(code));
                            }
                        }
                    }
                });
            }
        };

        // Attach the handshake on the channel strand, then resume reading
        // so the peer's version can arrive.
        let settings = Arc::clone(net.settings());
        let handshaking = Arc::clone(&channel);
        channel.strand().post(move || {
            if settings.protocol_maximum >= level::BIP61 {
                ProtocolVersion::attach_70002(Arc::clone(&handshaking), settings, completion);
            } else {
                ProtocolVersion::attach_31402(Arc::clone(&handshaking), settings, completion);
            }
        });
        channel.resume();
    }
}

/// Steady-state protocol set shared by manual, inbound, and outbound
/// sessions; variants chosen by the negotiated level and feature toggles.
pub(crate) fn attach_protocols(net: &Arc<NetworkInner>, channel: &Arc<Channel>) {
    let settings = net.settings();
    let negotiated = channel.negotiated_version();

    if negotiated >= level::BIP31 {
        ProtocolPing60001::attach(Arc::clone(channel));
    } else {
        ProtocolPing31402::attach(Arc::clone(channel));
    }

    if negotiated >= level::BIP61 && settings.enable_reject {
        ProtocolReject70002::attach(Arc::clone(channel));
    }

    if settings.enable_alert {
        ProtocolAlert311::attach(Arc::clone(channel));
    }

    if settings.enable_address {
        ProtocolAddress31402::attach(Arc::clone(channel), Arc::clone(net));
    }
}
