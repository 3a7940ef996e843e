//! # Alert Logging (deprecated)
//!
//! The alert system was retired upstream in 2016; messages are logged and
//! otherwise dropped.

use std::sync::Arc;

use tracing::debug;

use btcnet_messages::Alert;

use crate::channel::Channel;
use crate::protocols::{attach, Protocol};

pub struct ProtocolAlert311 {
    channel: Arc<Channel>,
}

impl ProtocolAlert311 {
    pub fn attach(channel: Arc<Channel>) {
        attach(Arc::new(Self { channel }));
    }
}

impl Protocol for ProtocolAlert311 {
    const NAME: &'static str = "alert";

    fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn start(self: Arc<Self>) {
        debug_assert!(self.channel.strand().stranded());

        let logger = Arc::clone(&self);
        let _ = self.channel.subscribe::<Alert>(move |event| {
            let Ok(alert) = event else { return false };
            debug!(
                peer = %logger.authority(),
                bytes = alert.payload.len(),
                "deprecated alert received"
            );
            true
        });
    }
}
