//! # Error Taxonomy
//!
//! The closed set of codes observable on the public API. Platform TCP and
//! resolver failures are normalized into this set at the socket boundary;
//! nothing above the socket ever sees a raw `std::io::Error`.

use std::io;

use thiserror::Error;

/// Every failure code the engine can surface.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    // Lifecycle.
    #[error("unknown error")]
    Unknown,
    #[error("service stopped")]
    ServiceStopped,
    #[error("service suspended")]
    ServiceSuspended,
    #[error("channel stopped")]
    ChannelStopped,
    #[error("operation canceled")]
    OperationCanceled,
    #[error("operation timed out")]
    OperationTimeout,
    #[error("operation failed")]
    OperationFailed,
    #[error("allocation failed")]
    BadAlloc,

    // Addressing.
    #[error("address invalid")]
    AddressInvalid,
    #[error("address not found")]
    AddressNotFound,
    #[error("address disabled")]
    AddressDisabled,
    #[error("address unsupported")]
    AddressUnsupported,
    #[error("address insufficient")]
    AddressInsufficient,
    #[error("address blocked")]
    AddressBlocked,
    #[error("address in use")]
    AddressInUse,
    #[error("seeding unsuccessful")]
    SeedingUnsuccessful,
    #[error("seeding complete")]
    SeedingComplete,

    // I/O.
    #[error("bad stream")]
    BadStream,
    #[error("not allowed")]
    NotAllowed,
    #[error("peer disconnected")]
    PeerDisconnect,
    #[error("peer protocol unsupported")]
    PeerUnsupported,
    #[error("peer services insufficient")]
    PeerInsufficient,
    #[error("peer timestamp out of range")]
    PeerTimestamp,
    #[error("protocol violation")]
    ProtocolViolation,
    #[error("channel counter overflow")]
    ChannelOverflow,
    #[error("channel counter underflow")]
    ChannelUnderflow,
    #[error("resolve failed")]
    ResolveFailed,
    #[error("connect failed")]
    ConnectFailed,
    #[error("listen failed")]
    ListenFailed,
    #[error("accept failed")]
    AcceptFailed,
    #[error("oversubscribed")]
    Oversubscribed,

    // Framing.
    #[error("invalid heading")]
    InvalidHeading,
    #[error("invalid magic")]
    InvalidMagic,
    #[error("oversized payload")]
    OversizedPayload,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("invalid message")]
    InvalidMessage,
    #[error("unknown message")]
    UnknownMessage,

    // Termination.
    #[error("channel timed out")]
    ChannelTimeout,
    #[error("channel conflict")]
    ChannelConflict,
    #[error("channel dropped")]
    ChannelDropped,
    #[error("channel expired")]
    ChannelExpired,
    #[error("channel inactive")]
    ChannelInactive,

    // Subscribers.
    #[error("subscriber key exists")]
    SubscriberExists,
    #[error("subscriber stopped")]
    SubscriberStopped,
    #[error("desubscribed")]
    Desubscribed,

    // File system.
    #[error("file load failed")]
    FileLoad,
    #[error("file save failed")]
    FileSave,
    #[error("file system error")]
    FileSystem,
    #[error("file exception")]
    FileException,
}

impl Error {
    /// True for the codes that terminate the whole service, not one channel.
    pub fn is_service_fatal(&self) -> bool {
        matches!(self, Error::ServiceStopped | Error::ServiceSuspended)
    }

    /// True for codes a session may retry with a timer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ChannelTimeout
                | Error::InvalidMagic
                | Error::ConnectFailed
                | Error::ResolveFailed
        )
    }

    /// Normalize a platform I/O error observed on a live channel.
    pub fn from_channel_io(error: &io::Error) -> Error {
        match error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Error::PeerDisconnect,
            io::ErrorKind::TimedOut => Error::OperationTimeout,
            io::ErrorKind::OutOfMemory => Error::BadAlloc,
            _ => Error::BadStream,
        }
    }

    /// Normalize a platform error observed while dialing.
    pub fn from_connect_io(error: &io::Error) -> Error {
        match error.kind() {
            io::ErrorKind::TimedOut => Error::ChannelTimeout,
            io::ErrorKind::AddrInUse => Error::AddressInUse,
            io::ErrorKind::AddrNotAvailable => Error::AddressInvalid,
            _ => Error::ConnectFailed,
        }
    }

    /// Normalize a platform error observed while binding or accepting.
    pub fn from_accept_io(error: &io::Error) -> Error {
        match error.kind() {
            io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied => Error::ListenFailed,
            _ => Error::AcceptFailed,
        }
    }
}

/// Completion alias used by every asynchronous operation.
pub type Completion = Result<(), Error>;
