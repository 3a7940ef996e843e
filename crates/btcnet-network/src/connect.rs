//! # Connector
//!
//! One-shot outbound dial: resolve the endpoint, race the TCP connect
//! against a randomized connect timeout, and wrap the winning socket in a
//! channel. The timer, the dial task, and `stop` coordinate through a
//! first-taker-wins handler slot so exactly one outcome is reported.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tracing::debug;

use crate::channel::Channel;
use crate::config::{Authority, Endpoint};
use crate::error::Error;
use crate::memory::BufferPool;
use crate::settings::Settings;
use crate::socket::Socket;
use crate::strand::Strand;
use crate::timer::Deadline;

type ConnectHandler = Box<dyn FnOnce(Result<Arc<Channel>, Error>) + Send>;

/// Whichever of dial-success, timer, or stop takes the slot first reports.
struct Pending {
    handler: Mutex<Option<ConnectHandler>>,
}

impl Pending {
    fn take(&self) -> Option<ConnectHandler> {
        self.handler.lock().take()
    }
}

/// Dials one endpoint at a time; reusable after each outcome.
pub struct Connector {
    weak_self: Weak<Connector>,
    settings: Arc<Settings>,
    strand: Strand,
    handle: Handle,
    pool: BufferPool,
    timer: Deadline,
    pending: Mutex<Option<Arc<Pending>>>,
}

impl Connector {
    pub fn new(
        settings: Arc<Settings>,
        strand: Strand,
        handle: Handle,
        pool: BufferPool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            settings,
            timer: Deadline::new(strand.clone(), handle.clone()),
            strand,
            handle,
            pool,
            pending: Mutex::new(None),
        })
    }

    /// Dial an authority (already resolved).
    pub fn connect_authority(
        &self,
        authority: Authority,
        handler: impl FnOnce(Result<Arc<Channel>, Error>) + Send + 'static,
    ) {
        self.connect(Endpoint::from(authority), handler);
    }

    /// Dial an endpoint, resolving its host first. The handler is invoked
    /// exactly once, on the connector's strand, with the channel or the
    /// first failure: `ResolveFailed`, `ConnectFailed`, `ChannelTimeout`,
    /// or `ChannelStopped` on cancel.
    pub fn connect(
        &self,
        endpoint: Endpoint,
        handler: impl FnOnce(Result<Arc<Channel>, Error>) + Send + 'static,
    ) {
        let Some(this) = self.weak_self.upgrade() else {
            handler(Err(Error::OperationFailed));
            return;
        };

        let pending = Arc::new(Pending {
            handler: Mutex::new(Some(Box::new(handler))),
        });

        {
            let mut slot = self.pending.lock();
            if slot.as_ref().is_some_and(|prior| prior.handler.lock().is_some()) {
                // One dial at a time; a second is a caller bug.
                debug_assert!(false, "connector already dialing");
                drop(slot);
                self.finish(&pending, Err(Error::OperationFailed));
                return;
            }
            *slot = Some(Arc::clone(&pending));
        }

        // Randomized 50-100% of the configured timeout, decorrelating
        // simultaneous batch dials.
        let configured = self.settings.connect_timeout();
        let timeout = rand::thread_rng().gen_range(configured / 2..=configured);

        let connector = Arc::clone(&this);
        let timer_pending = Arc::clone(&pending);
        self.timer.start(timeout, move |result| {
            if result.is_ok() {
                connector.finish(&timer_pending, Err(Error::ChannelTimeout));
            }
        });

        let connector = this;
        let enable_ipv6 = self.settings.enable_ipv6;
        self.handle.spawn(async move {
            let target = endpoint.to_target();

            let resolved = match tokio::net::lookup_host(&target).await {
                Ok(addresses) => {
                    let mut addresses = addresses.filter(|a| enable_ipv6 || a.is_ipv4());
                    addresses.next()
                }
                Err(_) => None,
            };

            let Some(address) = resolved else {
                debug!(%endpoint, "resolve failed");
                connector.finish(&pending, Err(Error::ResolveFailed));
                return;
            };

            match TcpStream::connect(address).await {
                Ok(stream) => {
                    // Claim the outcome before constructing; a timeout or
                    // stop that won the race closes the stream here.
                    let Some(handler) = pending.take() else {
                        return;
                    };
                    connector.timer.stop();

                    let strand = Strand::new(&connector.handle);
                    let socket = Arc::new(Socket::new(stream, Authority::from(address), strand));
                    let channel = Channel::new(
                        socket,
                        Arc::clone(&connector.settings),
                        connector.pool.clone(),
                        connector.handle.clone(),
                        false,
                    );
                    connector.strand.post(move || handler(Ok(channel)));
                }
                Err(error) => {
                    debug!(%endpoint, %error, "connect failed");
                    connector.finish(&pending, Err(Error::from_connect_io(&error)));
                }
            }
        });
    }

    /// Cancel the in-flight dial; its handler observes `ChannelStopped`.
    /// Idempotent; a no-op when nothing is pending.
    pub fn stop(&self) {
        let pending = self.pending.lock().take();
        if let Some(pending) = pending {
            if let Some(handler) = pending.take() {
                self.timer.stop();
                self.strand.post(move || handler(Err(Error::ChannelStopped)));
            }
        }
    }

    fn finish(&self, pending: &Arc<Pending>, result: Result<Arc<Channel>, Error>) {
        if let Some(handler) = pending.take() {
            self.timer.stop();
            self.strand.post(move || handler(result));
        }
    }
}
