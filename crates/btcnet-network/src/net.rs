//! # Network Supervisor
//!
//! Owns the threadpool, the network strand, the host pool, the connect and
//! close subscription registries, the channel counters, and the outbound
//! nonce set for loopback detection. Sessions are attached here and stopped
//! through the close cascade; `close` blocks until every pool thread has
//! joined and the host pool is persisted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::config::Endpoint;
use crate::error::{Completion, Error};
use crate::hosts::Hosts;
use crate::memory::BufferPool;
use crate::sessions::{SessionInbound, SessionManual, SessionOutbound, SessionSeed};
use crate::settings::Settings;
use crate::strand::Strand;
use crate::subscribe::{Subscriber, Unsubscriber};
use crate::threadpool::Threadpool;

/// Shared supervisor state; sessions and protocols hold this.
pub struct NetworkInner {
    settings: Arc<Settings>,
    handle: Handle,
    strand: Strand,
    pool: BufferPool,
    hosts: Hosts,
    session_stop: Subscriber<()>,
    connect_subscriber: Unsubscriber<Arc<Channel>>,
    close_subscriber: Unsubscriber<()>,
    total_channels: AtomicUsize,
    inbound_channels: AtomicUsize,
    nonces: Mutex<HashSet<u64>>,
    manual: Mutex<Option<Arc<SessionManual>>>,
    closed: AtomicBool,
    keys: AtomicU64,
    start_height: AtomicU32,
}

impl NetworkInner {
    fn new(settings: Arc<Settings>, handle: Handle) -> Arc<Self> {
        let strand = Strand::new(&handle);
        Arc::new(Self {
            hosts: Hosts::new(Arc::clone(&settings), strand.clone()),
            settings,
            handle,
            strand,
            pool: BufferPool::new(),
            session_stop: Subscriber::new(),
            connect_subscriber: Unsubscriber::new(),
            close_subscriber: Unsubscriber::new(),
            total_channels: AtomicUsize::new(0),
            inbound_channels: AtomicUsize::new(0),
            nonces: Mutex::new(HashSet::new()),
            manual: Mutex::new(None),
            closed: AtomicBool::new(false),
            keys: AtomicU64::new(0),
            start_height: AtomicU32::new(0),
        })
    }

    pub(crate) fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn strand(&self) -> &Strand {
        &self.strand
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn hosts(&self) -> &Hosts {
        &self.hosts
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn inbound_channel_count(&self) -> usize {
        self.inbound_channels.load(Ordering::Acquire)
    }

    pub(crate) fn channel_count(&self) -> usize {
        self.total_channels.load(Ordering::Acquire)
    }

    pub(crate) fn start_height(&self) -> u32 {
        self.start_height.load(Ordering::Acquire)
    }

    /// Keys for connect/close subscriptions; unique for the process life.
    pub(crate) fn create_key(&self) -> u64 {
        self.keys.fetch_add(1, Ordering::Relaxed) + 1
    }

    // Loopback detection.

    /// Register an outbound channel's version nonce. A collision means a
    /// conflicting channel is in flight.
    pub(crate) fn store_nonce(&self, channel: &Channel) -> bool {
        debug_assert!(self.strand.stranded());

        if self.settings.enable_loopback || channel.inbound() {
            return true;
        }
        self.nonces.lock().insert(channel.nonce())
    }

    pub(crate) fn unstore_nonce(&self, channel: &Channel) {
        debug_assert!(self.strand.stranded());

        if self.settings.enable_loopback || channel.inbound() {
            return;
        }
        if !self.nonces.lock().remove(&channel.nonce()) {
            warn!(peer = %channel.authority(), "nonce was not stored");
        }
    }

    /// An inbound channel whose peer nonce matches one of our outbound
    /// nonces is our own connection coming back.
    fn is_loopback(&self, channel: &Channel) -> bool {
        debug_assert!(self.strand.stranded());

        if self.settings.enable_loopback || !channel.inbound() {
            return false;
        }
        match channel.peer_version() {
            Some(version) => self.nonces.lock().contains(&version.nonce),
            None => false,
        }
    }

    // Channel counting with address deconfliction. Count and uncount must
    // stay mirrored for the counters and reservations to balance.

    pub(crate) fn count_channel(&self, channel: &Channel) -> Result<(), Error> {
        debug_assert!(self.strand.stranded());

        if self.closed() {
            return Err(Error::ServiceStopped);
        }

        if self.is_loopback(channel) {
            warn!(peer = %channel.authority(), "loopback detected");
            return Err(Error::AcceptFailed);
        }

        if channel.inbound() && self.inbound_channels.load(Ordering::Acquire) == usize::MAX {
            return Err(Error::ChannelOverflow);
        }

        if !channel.quiet() && self.total_channels.load(Ordering::Acquire) == usize::MAX {
            return Err(Error::ChannelOverflow);
        }

        if !self.hosts.reserve(channel.authority()) {
            debug!(peer = %channel.authority(), "duplicate connection");
            return Err(Error::AddressInUse);
        }

        if channel.inbound() {
            self.inbound_channels.fetch_add(1, Ordering::AcqRel);
        }
        if !channel.quiet() {
            self.total_channels.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    pub(crate) fn uncount_channel(&self, channel: &Channel) {
        debug_assert!(self.strand.stranded());

        self.hosts.unreserve(channel.authority());

        if channel.inbound() {
            if self.inbound_channels.load(Ordering::Acquire) == 0 {
                warn!("inbound channel count underflow");
            } else {
                self.inbound_channels.fetch_sub(1, Ordering::AcqRel);
            }
        }

        if !channel.quiet() {
            if self.total_channels.load(Ordering::Acquire) == 0 {
                warn!("total channel count underflow");
            } else {
                self.total_channels.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Announce a started channel to connect subscribers.
    pub(crate) fn notify_connect(&self, channel: &Arc<Channel>) {
        debug_assert!(self.strand.stranded());
        self.connect_subscriber.notify(Ok(channel));
    }

    fn do_close(&self) {
        debug_assert!(self.strand.stranded());

        // Release the manual session reference (also held by the stop
        // subscriber until it fires below).
        *self.manual.lock() = None;

        // Stop every session; sessions stop their connectors, acceptors,
        // timers, and channels.
        self.session_stop.stop(Error::ServiceStopped);

        self.connect_subscriber.stop(Error::ServiceStopped);
        self.close_subscriber.stop(Error::ServiceStopped);
    }
}

/// The public peer-to-peer network service.
pub struct Network {
    threadpool: Threadpool,
    inner: Arc<NetworkInner>,
}

impl Network {
    pub fn new(settings: Settings) -> Self {
        let threadpool = Threadpool::new(settings.threads);
        let inner = NetworkInner::new(Arc::new(settings), threadpool.handle());
        Self { threadpool, inner }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    // Start sequence: manual session, host pool, seed session.

    pub fn start(&self, handler: impl FnOnce(Completion) + Send + 'static) {
        let inner = Arc::clone(&self.inner);
        self.inner.strand.post(move || Self::do_start(inner, handler));
    }

    fn do_start(inner: Arc<NetworkInner>, handler: impl FnOnce(Completion) + Send + 'static) {
        debug_assert!(inner.strand.stranded());

        let manual = SessionManual::new(Arc::clone(&inner));
        *inner.manual.lock() = Some(Arc::clone(&manual));
        Self::subscribe_session(&inner, {
            let manual = Arc::clone(&manual);
            move || manual.stop()
        });

        let starting = Arc::clone(&inner);
        manual.start(move |result| {
            if let Err(code) = result {
                handler(Err(code));
                return;
            }

            // Host population always precedes seeding.
            if let Err(code) = starting.hosts.start() {
                warn!(%code, "hosts file failed to load");
                handler(Err(code));
                return;
            }

            let seed = SessionSeed::new(Arc::clone(&starting));
            Self::subscribe_session(&starting, {
                let seed = Arc::clone(&seed);
                move || seed.stop()
            });
            seed.start(move |result| {
                // An already-sufficient pool is success.
                handler(match result {
                    Err(Error::SeedingComplete) => Ok(()),
                    other => other,
                });
            });
        });
    }

    // Run sequence: manual peers, inbound session, outbound session.
    // Seeding may still be in flight when this completes.

    pub fn run(&self, handler: impl FnOnce(Completion) + Send + 'static) {
        if self.inner.closed() {
            handler(Err(Error::ServiceStopped));
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.strand.post(move || Self::do_run(inner, handler));
    }

    fn do_run(inner: Arc<NetworkInner>, handler: impl FnOnce(Completion) + Send + 'static) {
        debug_assert!(inner.strand.stranded());

        if inner.closed() {
            handler(Err(Error::ServiceStopped));
            return;
        }

        if let Some(manual) = inner.manual.lock().clone() {
            for peer in inner.settings.peers.clone() {
                manual.connect(peer);
            }
        }

        let inbound = SessionInbound::new(Arc::clone(&inner));
        Self::subscribe_session(&inner, {
            let inbound = Arc::clone(&inbound);
            move || inbound.stop()
        });

        let running = Arc::clone(&inner);
        inbound.start(move |result| {
            if let Err(code) = result {
                handler(Err(code));
                return;
            }

            let outbound = SessionOutbound::new(Arc::clone(&running));
            Self::subscribe_session(&running, {
                let outbound = Arc::clone(&outbound);
                move || outbound.stop()
            });
            outbound.start(handler);
        });
    }

    fn subscribe_session(inner: &Arc<NetworkInner>, stop: impl FnOnce() + Send + 'static) {
        let mut slot = Some(stop);
        let _ = inner.session_stop.subscribe(move |event| {
            if event.is_err() {
                if let Some(stop) = slot.take() {
                    stop();
                }
            }
            true
        });
    }

    // Manual connections.

    /// Maintain a connection to the endpoint; outcomes are logged.
    pub fn connect(&self, endpoint: Endpoint) {
        let inner = Arc::clone(&self.inner);
        self.inner.strand.dispatch(move || {
            if let Some(manual) = inner.manual.lock().clone() {
                manual.connect(endpoint);
            }
        });
    }

    /// Maintain a connection to the endpoint; the handler observes the
    /// first attempt's outcome.
    pub fn connect_with(
        &self,
        endpoint: Endpoint,
        handler: impl FnOnce(Result<Arc<Channel>, Error>) + Send + 'static,
    ) {
        if self.inner.closed() {
            handler(Err(Error::ServiceStopped));
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.strand.dispatch(move || {
            match inner.manual.lock().clone() {
                Some(manual) => manual.connect_with(endpoint, handler),
                None => handler(Err(Error::ServiceStopped)),
            }
        });
    }

    // Subscriptions. The completer reports the subscription key, usable
    // for keyed unsubscription.

    pub fn subscribe_connect(
        &self,
        handler: impl FnMut(Result<&Arc<Channel>, Error>) -> bool + Send + 'static,
        completer: impl FnOnce(Result<u64, Error>) + Send + 'static,
    ) {
        if self.inner.closed() {
            completer(Err(Error::ServiceStopped));
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.strand.post(move || {
            let key = inner.create_key();
            match inner.connect_subscriber.subscribe(handler, key) {
                Ok(()) => completer(Ok(key)),
                Err(code) => completer(Err(code)),
            }
        });
    }

    pub fn unsubscribe_connect(&self, key: u64) {
        let inner = Arc::clone(&self.inner);
        self.inner.strand.post(move || {
            inner.connect_subscriber.notify_one(key, Err(Error::Desubscribed));
        });
    }

    pub fn subscribe_close(
        &self,
        handler: impl FnMut(Result<&(), Error>) -> bool + Send + 'static,
        completer: impl FnOnce(Result<u64, Error>) + Send + 'static,
    ) {
        if self.inner.closed() {
            completer(Err(Error::ServiceStopped));
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.strand.post(move || {
            let key = inner.create_key();
            match inner.close_subscriber.subscribe(handler, key) {
                Ok(()) => completer(Ok(key)),
                Err(code) => completer(Err(code)),
            }
        });
    }

    pub fn unsubscribe_close(&self, key: u64) {
        let inner = Arc::clone(&self.inner);
        self.inner.strand.post(move || {
            inner.close_subscriber.notify_one(key, Err(Error::Desubscribed));
        });
    }

    // Properties.

    pub fn address_count(&self) -> usize {
        self.inner.hosts.count()
    }

    pub fn reserved_count(&self) -> usize {
        self.inner.hosts.reserved_count()
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channel_count()
    }

    pub fn inbound_channel_count(&self) -> usize {
        self.inner.inbound_channel_count()
    }

    /// Height advertised in outgoing version messages.
    pub fn set_start_height(&self, height: u32) {
        self.inner.start_height.store(height, Ordering::Release);
    }

    // Shutdown. Blocks joining the pool threads; must not be called from a
    // pool thread.

    pub fn close(&mut self) {
        if self.threadpool.joined() {
            return;
        }

        info!("network closing");
        self.inner.closed.store(true, Ordering::Release);

        // The close cascade must run before the pool is torn down.
        let (done_sender, done_receiver) = std::sync::mpsc::channel();
        let inner = Arc::clone(&self.inner);
        self.inner.strand.post(move || {
            inner.do_close();
            let _ = done_sender.send(());
        });
        if done_receiver.recv_timeout(Duration::from_secs(10)).is_err() {
            warn!("close cascade did not complete in time");
        }

        self.threadpool.join();

        if let Err(code) = self.inner.hosts.stop() {
            warn!(%code, "hosts file failed to save");
        }
        info!("network closed");
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.close();
    }
}
