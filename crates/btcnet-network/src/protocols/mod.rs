//! # Protocols
//!
//! Per-channel behavior modules. A protocol is attached by a session,
//! started on the channel strand, and torn down through the channel's stop
//! subscription: the subscription closure holds the protocol's strong
//! reference, so protocols live exactly as long as their channel is
//! unstopped and are released in the stop cascade.

pub mod address;
pub mod alert;
pub mod ping;
pub mod reject;
pub mod seed;
pub mod version;

pub use address::ProtocolAddress31402;
pub use alert::ProtocolAlert311;
pub use ping::{ProtocolPing31402, ProtocolPing60001};
pub use reject::ProtocolReject70002;
pub use seed::ProtocolSeed31402;
pub use version::ProtocolVersion;

use std::sync::Arc;

use tracing::debug;

use crate::channel::Channel;
use crate::config::Authority;
use crate::error::Error;

/// A per-channel behavior module.
pub trait Protocol: Send + Sync + Sized + 'static {
    const NAME: &'static str;

    fn channel(&self) -> &Arc<Channel>;

    /// Subscribe and send initial messages; runs on the channel strand.
    fn start(self: Arc<Self>);

    /// Invoked once with the channel's terminal code, on the channel
    /// strand.
    fn stopping(&self, _code: Error) {}

    fn stopped(&self) -> bool {
        self.channel().stopped()
    }

    fn stop(&self, code: Error) {
        self.channel().stop(code);
    }

    fn authority(&self) -> Authority {
        self.channel().authority()
    }
}

/// Wire a protocol to its channel: register the stop subscription (which
/// holds the protocol alive) and start it on the channel strand.
pub fn attach<P: Protocol>(protocol: Arc<P>) {
    let held = Arc::clone(&protocol);
    let subscribed = protocol
        .channel()
        .subscribe_stop(move |code| held.stopping(code));

    if subscribed.is_err() {
        // Channel already stopped; stopping ran inline with the stored
        // code and there is nothing to start.
        return;
    }

    debug!(
        protocol = P::NAME,
        peer = %protocol.authority(),
        "protocol attached"
    );

    let starter = Arc::clone(&protocol);
    protocol
        .channel()
        .strand()
        .dispatch(move || starter.start());
}
