use std::fmt;

use crate::{gatt::GattStatus, uuid::Uuid};

/// A result type hardwired to use [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type used throughout this library.
///
/// Errors either end a session (the session's terminal status carries one)
/// or reject a request made in the wrong phase; per-frame decode problems
/// are not errors and never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    /// Returns the cause of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Transport { op, status } => {
                write!(f, "{} failed with status {}", op, status.0)
            }
            ErrorKind::ServiceNotFound(uuid) => write!(f, "service {} not found", uuid),
            ErrorKind::CharacteristicNotFound(uuid) => {
                write!(f, "characteristic {} not found", uuid)
            }
            ErrorKind::DescriptorNotFound { characteristic, descriptor } => write!(
                f,
                "descriptor {} not found on characteristic {}",
                descriptor, characteristic
            ),
            ErrorKind::NotifyUnsupported(uuid) => {
                write!(f, "characteristic {} does not support notifications", uuid)
            }
            ErrorKind::SubscribeFailed { characteristic, status } => write!(
                f,
                "enabling delivery for characteristic {} failed with status {}",
                characteristic, status.0
            ),
            ErrorKind::SessionBusy => f.write_str("a session is already active"),
            ErrorKind::NotStreaming => f.write_str("session is not streaming"),
            ErrorKind::HistoryUnsupported => {
                f.write_str("peer does not expose a record access control point")
            }
        }
    }
}

impl std::error::Error for Error {}

/// The causes an [`Error`] distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport reported a non-success status for an operation.
    ///
    /// Fatal to the session; the connection is released.
    Transport { op: GattOp, status: GattStatus },

    /// The peer does not expose the expected service.
    ServiceNotFound(Uuid),

    /// The expected characteristic is missing from its service.
    CharacteristicNotFound(Uuid),

    /// A characteristic lacks the expected descriptor.
    DescriptorNotFound { characteristic: Uuid, descriptor: Uuid },

    /// The measurement characteristic cannot notify.
    NotifyUnsupported(Uuid),

    /// A CCCD write completed with a non-success status, so delivery for the
    /// characteristic never got enabled.
    SubscribeFailed { characteristic: Uuid, status: GattStatus },

    /// A connect request was made while a session is active.
    SessionBusy,

    /// A history request was made outside the streaming phase.
    NotStreaming,

    /// A history request was made, but the peer has no RACP characteristic.
    HistoryUnsupported,
}

/// The transport operation a [`ErrorKind::Transport`] error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattOp {
    Connection,
    DiscoverServices,
}

impl fmt::Display for GattOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GattOp::Connection => "connection",
            GattOp::DiscoverServices => "service discovery",
        };
        f.write_str(s)
    }
}
