//! # Socket
//!
//! A TCP endpoint pinned to one strand. Reads and writes are async and
//! cancelable: a stop signal races every pending operation, and platform
//! failures are normalized to the engine's error codes at this boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::config::Authority;
use crate::error::Error;
use crate::strand::Strand;

/// One TCP connection with cancelable I/O.
pub struct Socket {
    authority: Authority,
    strand: Strand,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    stopped: AtomicBool,
    stop_sender: watch::Sender<bool>,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Socket {
    pub fn new(stream: TcpStream, authority: Authority, strand: Strand) -> Self {
        let (reader, writer) = stream.into_split();
        let (stop_sender, _) = watch::channel(false);
        Self {
            authority,
            strand,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            stopped: AtomicBool::new(false),
            stop_sender,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// The remote peer's resolved authority.
    pub fn authority(&self) -> Authority {
        self.authority
    }

    /// The strand owning this socket's state.
    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Cancel pending and future I/O. Thread safe and idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _ = self.stop_sender.send(true);
    }

    /// Fill `buffer` completely or fail.
    pub async fn read_exact(&self, buffer: &mut [u8]) -> Result<(), Error> {
        if self.stopped() {
            return Err(Error::ChannelStopped);
        }

        let mut canceled = self.stop_sender.subscribe();
        let mut reader = self.reader.lock().await;

        tokio::select! {
            result = reader.read_exact(buffer) => match result {
                Ok(count) => {
                    self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
                    Ok(())
                }
                Err(error) => Err(Error::from_channel_io(&error)),
            },
            _ = canceled.changed() => Err(Error::ChannelStopped),
        }
    }

    /// Read whatever is available, up to `buffer.len()` bytes. A zero
    /// return is a peer disconnect.
    pub async fn read_some(&self, buffer: &mut [u8]) -> Result<usize, Error> {
        if self.stopped() {
            return Err(Error::ChannelStopped);
        }

        let mut canceled = self.stop_sender.subscribe();
        let mut reader = self.reader.lock().await;

        tokio::select! {
            result = reader.read(buffer) => match result {
                Ok(0) => Err(Error::PeerDisconnect),
                Ok(count) => {
                    self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
                    Ok(count)
                }
                Err(error) => Err(Error::from_channel_io(&error)),
            },
            _ = canceled.changed() => Err(Error::ChannelStopped),
        }
    }

    /// Write `buffer` completely or fail. Concurrent writers are serialized
    /// in lock-acquisition (FIFO) order.
    pub async fn write_all(&self, buffer: &[u8]) -> Result<(), Error> {
        if self.stopped() {
            return Err(Error::ChannelStopped);
        }

        let mut canceled = self.stop_sender.subscribe();
        let mut writer = self.writer.lock().await;

        tokio::select! {
            result = writer.write_all(buffer) => match result {
                Ok(()) => {
                    self.bytes_written.fetch_add(buffer.len() as u64, Ordering::Relaxed);
                    Ok(())
                }
                Err(error) => Err(Error::from_channel_io(&error)),
            },
            _ = canceled.changed() => Err(Error::ChannelStopped),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}
