//! # Channel
//!
//! One peer connection: framing read loop, typed send, per-channel timers,
//! and the idempotent stop cascade. All mutable channel state is pinned to
//! the socket's strand; `stop` alone is thread safe.
//!
//! A channel is created paused. `resume` (once, by the owning session)
//! starts the read loop and arms the timers; from then on every received
//! payload flows through the distributor on the channel strand.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use btcnet_messages::{serialize_message, Heading, Payload, Version, HEADING_SIZE};

use crate::config::Authority;
use crate::distributor::{Dispatch, Distributor};
use crate::error::{Completion, Error};
use crate::memory::BufferPool;
use crate::settings::Settings;
use crate::socket::Socket;
use crate::strand::Strand;
use crate::subscribe::Subscriber;
use crate::timer::Deadline;

type SendJob = (Vec<u8>, Box<dyn FnOnce(Completion) + Send>);

/// A Bitcoin peer channel.
pub struct Channel {
    // Back-reference for closures spawned from `&self` methods; always
    // upgradable while a caller holds the channel.
    weak_self: Weak<Channel>,
    nonce: u64,
    inbound: bool,
    quiet: AtomicBool,
    settings: Arc<Settings>,
    socket: Arc<Socket>,
    handle: Handle,
    distributor: Distributor,
    stop_subscriber: Subscriber<()>,
    heartbeat_subscriber: Subscriber<()>,
    expire: Deadline,
    inactivity: Deadline,
    heartbeat: Deadline,
    stopped: AtomicBool,
    resumed: AtomicBool,
    negotiated_version: AtomicU32,
    peer_version: Mutex<Option<Arc<Version>>>,
    start_height: AtomicU32,
    // Sends are funneled through one writer task, serializing them in
    // submission order.
    send_queue: mpsc::UnboundedSender<SendJob>,
}

impl Channel {
    pub fn new(
        socket: Arc<Socket>,
        settings: Arc<Settings>,
        pool: BufferPool,
        handle: Handle,
        inbound: bool,
    ) -> Arc<Self> {
        let strand = socket.strand().clone();
        let protocol_maximum = settings.protocol_maximum;
        let (send_queue, send_receiver) = mpsc::unbounded_channel();

        let channel = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            nonce: rand::thread_rng().gen_range(1..u64::MAX),
            inbound,
            quiet: AtomicBool::new(false),
            settings,
            distributor: Distributor::new(pool),
            stop_subscriber: Subscriber::new(),
            heartbeat_subscriber: Subscriber::new(),
            expire: Deadline::new(strand.clone(), handle.clone()),
            inactivity: Deadline::new(strand.clone(), handle.clone()),
            heartbeat: Deadline::new(strand, handle.clone()),
            handle,
            socket,
            stopped: AtomicBool::new(false),
            resumed: AtomicBool::new(false),
            negotiated_version: AtomicU32::new(protocol_maximum),
            peer_version: Mutex::new(None),
            start_height: AtomicU32::new(0),
            send_queue,
        });

        let weak = Arc::downgrade(&channel);
        channel.handle.spawn(async move {
            Self::write_loop(weak, send_receiver).await;
        });

        channel
    }

    // Identity.

    /// Channel identifier, also the nonce of our outbound version message.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn authority(&self) -> Authority {
        self.socket.authority()
    }

    pub fn inbound(&self) -> bool {
        self.inbound
    }

    /// Quiet channels (seed connections) are excluded from the total count.
    pub fn quiet(&self) -> bool {
        self.quiet.load(Ordering::Acquire)
    }

    pub fn set_quiet(&self) {
        self.quiet.store(true, Ordering::Release);
    }

    pub fn strand(&self) -> &Strand {
        self.socket.strand()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // Version negotiation (written only during handshake).

    pub fn negotiated_version(&self) -> u32 {
        self.negotiated_version.load(Ordering::Acquire)
    }

    pub fn set_negotiated_version(&self, value: u32) {
        debug_assert!(self.strand().stranded());
        self.negotiated_version.store(value, Ordering::Release);
    }

    pub fn is_negotiated(&self, level: u32) -> bool {
        self.negotiated_version() >= level
    }

    pub fn peer_version(&self) -> Option<Arc<Version>> {
        self.peer_version.lock().clone()
    }

    pub fn set_peer_version(&self, version: Arc<Version>) {
        debug_assert!(self.strand().stranded());
        *self.peer_version.lock() = Some(version);
    }

    pub fn start_height(&self) -> u32 {
        self.start_height.load(Ordering::Acquire)
    }

    pub fn set_start_height(&self, height: u32) {
        self.start_height.store(height, Ordering::Release);
    }

    // Subscriptions (require the channel strand).

    /// Subscribe to one typed message stream.
    pub fn subscribe<T: Dispatch>(
        &self,
        handler: impl FnMut(Result<&Arc<T>, Error>) -> bool + Send + 'static,
    ) -> Result<(), Error> {
        debug_assert!(self.strand().stranded());
        self.distributor.subscribe(handler)
    }

    /// Subscribe to the terminal stop code; delivered exactly once, on the
    /// channel strand. When the channel is already stopped the handler runs
    /// immediately with the stored code.
    pub fn subscribe_stop(
        &self,
        handler: impl FnOnce(Error) + Send + 'static,
    ) -> Result<(), Error> {
        let mut slot = Some(handler);
        self.stop_subscriber.subscribe(move |event| {
            if let Err(code) = event {
                if let Some(handler) = slot.take() {
                    handler(code);
                }
            }
            true
        })
    }

    /// Subscribe to heartbeat ticks (the ping protocol's clock).
    pub fn subscribe_heartbeat(
        &self,
        handler: impl FnMut(Result<&(), Error>) -> bool + Send + 'static,
    ) -> Result<(), Error> {
        debug_assert!(self.strand().stranded());
        self.heartbeat_subscriber.subscribe(handler)
    }

    // Sending.

    /// Serialize and queue a message; writes run in submission order and
    /// the handler observes the outcome on the channel strand. A failed
    /// write stops the channel with the failure code.
    pub fn send<T: Payload>(&self, message: &T, handler: impl FnOnce(Completion) + Send + 'static) {
        if self.stopped() {
            self.strand().post(move || handler(Err(Error::ChannelStopped)));
            return;
        }

        let wire = serialize_message(message, self.settings.identifier, self.negotiated_version());
        trace!(
            peer = %self.authority(),
            command = T::command(),
            bytes = wire.len(),
            "sending message"
        );

        if let Err(unsent) = self.send_queue.send((wire, Box::new(handler))) {
            // Writer already terminated.
            let (_, handler) = unsent.0;
            self.strand().post(move || handler(Err(Error::ChannelStopped)));
        }
    }

    /// Drains the send queue onto the socket; exits on the first failed
    /// write (reporting `ChannelStopped` to any queued senders) or when the
    /// channel is released.
    async fn write_loop(
        weak: Weak<Channel>,
        mut receiver: mpsc::UnboundedReceiver<SendJob>,
    ) {
        while let Some((wire, handler)) = receiver.recv().await {
            let Some(channel) = weak.upgrade() else {
                return;
            };

            let result = channel.socket.write_all(&wire).await;
            match result {
                Ok(()) => channel.signal_activity(),
                Err(code) => channel.stop(code),
            }
            channel.strand().post(move || handler(result));

            if result.is_err() {
                // Flush remaining senders with the terminal code.
                while let Ok((_, handler)) = receiver.try_recv() {
                    channel.strand().post(move || handler(Err(Error::ChannelStopped)));
                }
                return;
            }
        }
    }

    // Lifecycle.

    /// Start the read loop and arm the timers. Effective once; later calls
    /// are ignored.
    pub fn resume(&self) {
        if self.resumed.swap(true, Ordering::AcqRel) {
            warn!(peer = %self.authority(), "channel resumed twice");
            return;
        }
        if self.stopped() {
            return;
        }
        let Some(channel) = self.weak_self.upgrade() else {
            return;
        };

        self.arm_expiration();
        self.signal_activity();
        Self::arm_heartbeat(&channel);

        self.handle.spawn(async move {
            channel.read_loop().await;
        });
    }

    /// Stop the channel. Thread safe; only the first caller's code is
    /// reported. Cancels timers, closes the socket, and delivers the
    /// terminal code to the distributor and stop subscribers on the strand.
    pub fn stop(&self, code: Error) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(peer = %self.authority(), %code, "channel stopping");
        self.expire.stop();
        self.inactivity.stop();
        self.heartbeat.stop();
        self.socket.stop();

        // Upgrade cannot fail while a caller holds the channel; if it ever
        // does there is nobody left to notify.
        if let Some(channel) = self.weak_self.upgrade() {
            self.strand().post(move || channel.stopping(code));
        }
    }

    /// Strand-bound tail of `stop`: terminal notifications, in a fixed
    /// order, after which protocol references held by the subscribers are
    /// released.
    fn stopping(&self, code: Error) {
        debug_assert!(self.strand().stranded());
        self.distributor.stop(code);
        self.heartbeat_subscriber.stop(code);
        self.stop_subscriber.stop(code);
    }

    // Timers.

    /// Expiration is randomized to half-to-full of the configured duration
    /// so a burst of simultaneous connects does not expire in lockstep.
    fn arm_expiration(&self) {
        let configured = self.settings.channel_expiration();
        let duration = rand::thread_rng().gen_range(configured / 2..=configured);

        let weak = self.weak_self.clone();
        self.expire.start(duration, move |result| {
            if result.is_err() {
                return;
            }
            if let Some(channel) = weak.upgrade() {
                channel.stop(Error::ChannelExpired);
            }
        });
    }

    /// Reset the inactivity window; called on every successful read and
    /// write.
    fn signal_activity(&self) {
        if self.stopped() {
            return;
        }
        let weak = self.weak_self.clone();
        self.inactivity
            .start(self.settings.channel_inactivity(), move |result| {
                if result.is_err() {
                    return;
                }
                if let Some(channel) = weak.upgrade() {
                    channel.stop(Error::ChannelInactive);
                }
            });
    }

    fn arm_heartbeat(channel: &Arc<Self>) {
        let weak = Arc::downgrade(channel);
        channel
            .heartbeat
            .start(channel.settings.channel_heartbeat(), move |result| {
                if result.is_err() {
                    return;
                }
                if let Some(channel) = weak.upgrade() {
                    if !channel.stopped() {
                        channel.heartbeat_subscriber.notify(Ok(&()));
                        Self::arm_heartbeat(&channel);
                    }
                }
            });
    }

    // Read loop.

    async fn read_loop(self: Arc<Self>) {
        let mut heading_buffer = [0u8; HEADING_SIZE];

        loop {
            if self.stopped() {
                return;
            }

            if let Err(code) = self.socket.read_exact(&mut heading_buffer).await {
                self.stop(code);
                return;
            }

            let heading = match Heading::deserialize(&heading_buffer) {
                Ok(heading) => heading,
                Err(_) => {
                    self.stop(Error::InvalidHeading);
                    return;
                }
            };

            if heading.magic != self.settings.identifier {
                warn!(
                    peer = %self.authority(),
                    magic = format_args!("{:#010x}", heading.magic),
                    "invalid magic"
                );
                self.stop(Error::InvalidMagic);
                return;
            }

            let payload_size = heading.payload_size as usize;
            if payload_size > self.settings.maximum_payload() {
                warn!(
                    peer = %self.authority(),
                    command = %heading.command,
                    size = payload_size,
                    "oversized payload"
                );
                self.stop(Error::OversizedPayload);
                return;
            }

            let mut payload = self.distributor.pool().get();
            payload.resize(payload_size, 0);
            if payload_size > 0 {
                if let Err(code) = self.socket.read_exact(&mut payload).await {
                    self.stop(code);
                    return;
                }
            }

            if self.settings.validate_checksum && !heading.verify_checksum(&payload) {
                warn!(peer = %self.authority(), command = %heading.command, "invalid checksum");
                self.stop(Error::InvalidChecksum);
                return;
            }

            let id = heading.identifier();
            let version = self.negotiated_version();
            let channel = Arc::clone(&self);
            let outcome = self
                .strand()
                .run(move || channel.distributor.notify(id, version, &payload))
                .await;

            match outcome {
                None => return,
                Some(Err(Error::UnknownMessage)) => {
                    // Unrecognized commands are dropped, not fatal.
                    debug!(peer = %self.authority(), command = %heading.command, "unknown message");
                }
                Some(Err(code)) => {
                    self.stop(code);
                    return;
                }
                Some(Ok(())) => {
                    trace!(peer = %self.authority(), command = %heading.command, "dispatched");
                }
            }

            self.signal_activity();
        }
    }
}
