//! # Acceptor
//!
//! Binds a configured authority and produces one inbound channel per
//! accept. `stop` cancels the listener; pending accept handlers observe
//! `ServiceStopped` and the session's accept loop terminates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::config::Authority;
use crate::error::{Completion, Error};
use crate::memory::BufferPool;
use crate::settings::Settings;
use crate::socket::Socket;
use crate::strand::Strand;

/// Listens on one bound authority.
pub struct Acceptor {
    weak_self: Weak<Acceptor>,
    settings: Arc<Settings>,
    strand: Strand,
    handle: Handle,
    pool: BufferPool,
    listener: Mutex<Option<Arc<TcpListener>>>,
    stopped: AtomicBool,
    stop_sender: watch::Sender<bool>,
}

impl Acceptor {
    pub fn new(
        settings: Arc<Settings>,
        strand: Strand,
        handle: Handle,
        pool: BufferPool,
    ) -> Arc<Self> {
        let (stop_sender, _) = watch::channel(false);
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            settings,
            strand,
            handle,
            pool,
            listener: Mutex::new(None),
            stopped: AtomicBool::new(false),
            stop_sender,
        })
    }

    /// Bind the authority; the handler observes `ListenFailed` or success
    /// on the acceptor's strand.
    pub fn start(&self, authority: Authority, handler: impl FnOnce(Completion) + Send + 'static) {
        let Some(acceptor) = self.weak_self.upgrade() else {
            return;
        };
        self.handle.spawn(async move {
            let result = match TcpListener::bind(std::net::SocketAddr::from(authority)).await {
                Ok(listener) => {
                    if acceptor.stopped() {
                        // Stopped while binding; release the port.
                        drop(listener);
                        Err(Error::ServiceStopped)
                    } else {
                        info!(bind = %authority, "listening");
                        *acceptor.listener.lock() = Some(Arc::new(listener));
                        Ok(())
                    }
                }
                Err(error) => {
                    debug!(bind = %authority, %error, "bind failed");
                    Err(Error::from_accept_io(&error))
                }
            };
            acceptor.strand.post(move || handler(result));
        });
    }

    /// The port actually bound (for ephemeral-port binds in tests).
    pub fn local_authority(&self) -> Option<Authority> {
        self.listener
            .lock()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(Authority::from)
    }

    /// Accept one connection. The handler observes the inbound channel, a
    /// normalized accept failure, or `ServiceStopped` after `stop`.
    pub fn accept(&self, handler: impl FnOnce(Result<Arc<Channel>, Error>) + Send + 'static) {
        if self.stopped() {
            self.strand.post(move || handler(Err(Error::ServiceStopped)));
            return;
        }

        let Some(listener) = self.listener.lock().clone() else {
            self.strand.post(move || handler(Err(Error::AcceptFailed)));
            return;
        };

        let Some(acceptor) = self.weak_self.upgrade() else {
            return;
        };
        let mut canceled = self.stop_sender.subscribe();
        self.handle.spawn(async move {
            let result = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        let strand = Strand::new(&acceptor.handle);
                        let socket =
                            Arc::new(Socket::new(stream, Authority::from(address), strand));
                        Ok(Channel::new(
                            socket,
                            Arc::clone(&acceptor.settings),
                            acceptor.pool.clone(),
                            acceptor.handle.clone(),
                            true,
                        ))
                    }
                    Err(error) => Err(Error::from_accept_io(&error)),
                },
                _ = canceled.changed() => Err(Error::ServiceStopped),
            };
            acceptor.strand.post(move || handler(result));
        });
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Close the listener and cancel pending accepts. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stop_sender.send(true);
        *self.listener.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threadpool::Threadpool;
    use std::net::Ipv4Addr;
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio::net::TcpStream;

    fn fixture() -> (Threadpool, Arc<Acceptor>) {
        let pool = Threadpool::new(2);
        let strand = Strand::new(&pool.handle());
        let acceptor = Acceptor::new(
            Arc::new(Settings::for_testing()),
            strand,
            pool.handle(),
            BufferPool::new(),
        );
        (pool, acceptor)
    }

    fn loopback() -> Authority {
        Authority::new(Ipv4Addr::LOCALHOST.into(), 0)
    }

    fn start(acceptor: &Arc<Acceptor>) -> Authority {
        let (tx, rx) = mpsc::channel();
        acceptor.start(loopback(), move |result| tx.send(result).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        acceptor.local_authority().unwrap()
    }

    #[test]
    fn test_accept_produces_inbound_channel() {
        let (pool, acceptor) = fixture();
        let bound = start(&acceptor);

        let (tx, rx) = mpsc::channel();
        acceptor.accept(move |result| {
            tx.send(result.map(|channel| channel.inbound())).unwrap();
        });

        let _client = pool
            .handle()
            .block_on(async { TcpStream::connect(std::net::SocketAddr::from(bound)).await })
            .unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Ok(true)
        );
    }

    #[test]
    fn test_stop_cancels_pending_accept() {
        let (_pool, acceptor) = fixture();
        start(&acceptor);

        let (tx, rx) = mpsc::channel();
        acceptor.accept(move |result| {
            tx.send(result.map(|_| ())).unwrap();
        });
        acceptor.stop();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(Error::ServiceStopped)
        );
    }

    #[test]
    fn test_accept_after_stop_refused() {
        let (_pool, acceptor) = fixture();
        start(&acceptor);
        acceptor.stop();

        let (tx, rx) = mpsc::channel();
        acceptor.accept(move |result| {
            tx.send(result.map(|_| ())).unwrap();
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(Error::ServiceStopped)
        );
    }

    #[test]
    fn test_accept_before_start_fails() {
        let (_pool, acceptor) = fixture();
        let (tx, rx) = mpsc::channel();
        acceptor.accept(move |result| {
            tx.send(result.map(|_| ())).unwrap();
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(Error::AcceptFailed)
        );
    }

    #[test]
    fn test_bind_conflict_reports_listen_failed() {
        let (_pool, first) = fixture();
        let bound = start(&first);

        let (_pool2, second) = fixture();
        let (tx, rx) = mpsc::channel();
        second.start(bound, move |result| tx.send(result).unwrap());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(Error::ListenFailed)
        );
    }
}
