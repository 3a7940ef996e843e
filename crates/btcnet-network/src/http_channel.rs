//! # HTTP Channel (half-duplex variant)
//!
//! One in-flight request at a time: after a request is dispatched, reads
//! stay suspended until the responding protocol calls [`HttpChannel::
//! read_request`], exactly once per request, after completing its sends.
//! Failing to call it stalls the channel; calling twice is safe but
//! logged. Request delimiting and body parsing belong to the attached
//! protocol; this channel carries raw request bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::Authority;
use crate::error::{Completion, Error};
use crate::settings::Settings;
use crate::socket::Socket;
use crate::strand::Strand;
use crate::subscribe::Subscriber;
use crate::timer::Deadline;

/// Request head bound.
const MAX_HEAD: usize = 16 * 1024;

/// Request body bound.
const MAX_BODY: usize = 1024 * 1024;

/// Read-loop gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Reads permitted.
    Reading,
    /// A dispatched request awaits `read_request`.
    Responding,
}

pub struct HttpChannel {
    weak_self: Weak<HttpChannel>,
    socket: Arc<Socket>,
    settings: Arc<Settings>,
    handle: Handle,
    request_subscriber: Subscriber<Arc<Vec<u8>>>,
    stop_subscriber: Subscriber<()>,
    inactivity: Deadline,
    stopped: AtomicBool,
    resumed: AtomicBool,
    mode: Mutex<Mode>,
    gate_sender: watch::Sender<u64>,
}

impl HttpChannel {
    pub fn new(socket: Arc<Socket>, settings: Arc<Settings>, handle: Handle) -> Arc<Self> {
        let strand = socket.strand().clone();
        let (gate_sender, _) = watch::channel(0);
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            socket,
            settings,
            inactivity: Deadline::new(strand, handle.clone()),
            handle,
            request_subscriber: Subscriber::new(),
            stop_subscriber: Subscriber::new(),
            stopped: AtomicBool::new(false),
            resumed: AtomicBool::new(false),
            mode: Mutex::new(Mode::Reading),
            gate_sender,
        })
    }

    pub fn authority(&self) -> Authority {
        self.socket.authority()
    }

    pub fn strand(&self) -> &Strand {
        self.socket.strand()
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Subscribe to raw request payloads.
    pub fn subscribe_request(
        &self,
        handler: impl FnMut(Result<&Arc<Vec<u8>>, Error>) -> bool + Send + 'static,
    ) -> Result<(), Error> {
        self.request_subscriber.subscribe(handler)
    }

    /// Subscribe to the terminal stop code.
    pub fn subscribe_stop(&self, handler: impl FnOnce(Error) + Send + 'static) -> Result<(), Error> {
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

    /// Write a response body; a failed write stops the channel.
    pub fn send(&self, response: Vec<u8>, handler: impl FnOnce(Completion) + Send + 'static) {
        let Some(channel) = self.weak_self.upgrade() else {
            return;
        };
        self.handle.spawn(async move {
            let result = channel.socket.write_all(&response).await;
            if let Err(code) = result {
                channel.stop(code);
            } else {
                channel.signal_activity();
            }
            channel.strand().post(move || handler(result));
        });
    }

    /// Permit the next request read. Required exactly once per dispatched
    /// request, from the handler, after any sends.
    pub fn read_request(&self) {
        let mut mode = self.mode.lock();
        match *mode {
            Mode::Responding => {
                *mode = Mode::Reading;
                drop(mode);
                self.gate_sender.send_modify(|generation| *generation += 1);
            }
            Mode::Reading => {
                // Redundant call; harmless by contract.
                warn!(peer = %self.authority(), "read_request while reading");
            }
        }
    }

    /// Begin the request loop. Effective once.
    pub fn resume(&self) {
        if self.resumed.swap(true, Ordering::AcqRel) || self.stopped() {
            return;
        }
        let Some(channel) = self.weak_self.upgrade() else {
            return;
        };

        self.signal_activity();
        self.handle.spawn(async move {
            channel.read_loop().await;
        });
    }

    /// Thread safe and idempotent; first code wins.
    pub fn stop(&self, code: Error) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(peer = %self.authority(), %code, "http channel stopping");
        self.inactivity.stop();
        self.socket.stop();
        // Unblock a read loop parked on the response gate.
        self.gate_sender.send_modify(|generation| *generation += 1);

        match self.weak_self.upgrade() {
            Some(channel) => self.strand().post(move || {
                channel.request_subscriber.stop(code);
                channel.stop_subscriber.stop(code);
            }),
            None => {
                self.request_subscriber.stop(code);
                self.stop_subscriber.stop(code);
            }
        }
    }

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

    async fn read_loop(self: Arc<Self>) {
        let mut request_buffer = vec![0u8; MAX_HEAD + MAX_BODY];

        loop {
            if self.stopped() {
                return;
            }

            let count = match self.socket.read_some(&mut request_buffer).await {
                Ok(count) => count,
                Err(code) => {
                    self.stop(code);
                    return;
                }
            };

            // Dispatch and suspend until the responder releases the gate.
            *self.mode.lock() = Mode::Responding;
            let mut gate = self.gate_sender.subscribe();

            let request = Arc::new(request_buffer[..count].to_vec());
            let channel = Arc::clone(&self);
            let delivered = self
                .strand()
                .run(move || channel.request_subscriber.notify(Ok(&request)))
                .await;
            if delivered.is_none() {
                return;
            }

            self.signal_activity();

            if gate.changed().await.is_err() {
                return;
            }
        }
    }
}
