//! # Reject Logging (BIP 61)
//!
//! Observes peer-reported rejections. Purely diagnostic.

use std::sync::Arc;

use tracing::debug;

use btcnet_messages::Reject;

use crate::channel::Channel;
use crate::protocols::{attach, Protocol};

pub struct ProtocolReject70002 {
    channel: Arc<Channel>,
}

impl ProtocolReject70002 {
    pub fn attach(channel: Arc<Channel>) {
        attach(Arc::new(Self { channel }));
    }
}

impl Protocol for ProtocolReject70002 {
    const NAME: &'static str = "reject";

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn start(self: Arc<Self>) {
        debug_assert!(self.channel.strand().stranded());

        let logger = Arc::clone(&self);
        let _ = self.channel.subscribe::<Reject>(move |event| {
            let Ok(reject) = event else { return false };
            debug!(
                peer = %logger.authority(),
                message = %reject.message,
                code = ?reject.code,
                reason = %reject.reason,
                "peer rejection"
            );
            true
        });
    }
}
