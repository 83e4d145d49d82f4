use std::fmt;
use std::io::{self, ErrorKind};

use serde::Serialize;
use thiserror::Error;

/// High-level reason for a serial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    DeviceMissing,
    Busy,
    Timeout,
    Disconnected,
    Framing,
    Config,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::DeviceMissing => "device_missing",
            FailureKind::Busy => "busy",
            FailureKind::Timeout => "timeout",
            FailureKind::Disconnected => "disconnected",
            FailureKind::Framing => "framing",
            FailureKind::Config => "config",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_io_error(err: &io::Error) -> FailureKind {
    match err.kind() {
        ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
        ErrorKind::NotFound => FailureKind::DeviceMissing,
        ErrorKind::TimedOut | ErrorKind::WouldBlock => FailureKind::Timeout,
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => FailureKind::Disconnected,
        ErrorKind::InvalidInput => FailureKind::Config,
        ErrorKind::InvalidData => FailureKind::Framing,
        _ => match err.raw_os_error() {
            // 13 = EACCES, 16 = EBUSY, 6 = ENXIO, 19 = ENODEV, 5 = EIO, 110 = ETIMEDOUT
            Some(13) => FailureKind::PermissionDenied,
            Some(16) => FailureKind::Busy,
            Some(6) | Some(19) => FailureKind::DeviceMissing,
            Some(5) => FailureKind::Disconnected,
            Some(110) => FailureKind::Timeout,
            _ => FailureKind::Unknown,
        },
    }
}

pub fn classify_serial_error(err: &serialport::Error) -> FailureKind {
    match &err.kind {
        serialport::ErrorKind::NoDevice => FailureKind::DeviceMissing,
        serialport::ErrorKind::InvalidInput => FailureKind::Config,
        serialport::ErrorKind::Io(kind) => classify_io_error(&io::Error::from(*kind)),
        serialport::ErrorKind::Unknown => FailureKind::Unknown,
    }
}

/// The endpoint could not be opened.
#[derive(Debug, Error)]
#[error("cannot open {endpoint} ({kind}): {message}")]
pub struct ConnectionError {
    pub endpoint: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ConnectionError {
    pub fn from_serial(endpoint: &str, err: &serialport::Error) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            kind: classify_serial_error(err),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("serial exchange failed ({kind}): {source}")]
    Io {
        kind: FailureKind,
        #[source]
        source: io::Error,
    },
    #[error("reconnect failed: {0}")]
    Reopen(#[from] ConnectionError),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn io(source: io::Error) -> Self {
        Self::Io {
            kind: classify_io_error(&source),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Io { kind, .. } => *kind,
            TransportError::Reopen(err) => err.kind,
            TransportError::Closed => FailureKind::Disconnected,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("no response for {key}")]
    NoResponse { key: &'static str },
    #[error("invalid {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// A failed poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll failed: {0}")]
    Transport(#[from] TransportError),
    #[error("poll failed: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("poller not set up")]
    NotReady,
    #[error("poller closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("setup failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("poller already closed")]
    AlreadyClosed,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("device enumeration failed: {0}")]
    Enumerate(#[from] io::Error),
    #[error("serial port listing failed: {0}")]
    List(#[from] serialport::Error),
}
