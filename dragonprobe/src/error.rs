use std::fmt::Display;

use thiserror::Error;

/// Failures of the physical link to the device.
///
/// A transport error is fatal to the session that observed it. Nothing in this
/// crate retries automatically; callers reconnect if they want to.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no such device: {0}")]
    NotFound(String),

    #[error("device busy or not speaking this protocol: {0}")]
    Busy(String),

    #[error("connection string ambiguous: {0}")]
    Ambiguous(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("USB error: {0}")]
    Usb(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of a non-OK status byte sent by the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusKind {
    IllegalCommand,
    BadMode,
    NoSuchMode,
    BadArgument,
    IllegalState,
    Unknown(u8),
}

impl StatusKind {
    pub fn from_status(status: u8) -> StatusKind {
        match status {
            1 => StatusKind::IllegalCommand,
            2 => StatusKind::BadMode,
            3 => StatusKind::NoSuchMode,
            4 => StatusKind::BadArgument,
            5 => StatusKind::IllegalState,
            other => StatusKind::Unknown(other),
        }
    }

    /// Fallback description used when the device sent no error string.
    pub fn description(&self) -> String {
        match self {
            StatusKind::IllegalCommand => "Illegal/invalid/unknown command".to_string(),
            StatusKind::BadMode => "Bad mode for this command".to_string(),
            StatusKind::NoSuchMode => "No such mode exists or is available".to_string(),
            StatusKind::BadArgument => "Bad argument".to_string(),
            StatusKind::IllegalState => "Wrong state for command".to_string(),
            StatusKind::Unknown(status) => format!("Unknown status {}", status),
        }
    }
}

/// The device answered a command with a non-OK status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProtocolError {
    pub kind: StatusKind,
    /// What was being attempted, e.g. "get mode name".
    pub context: String,
    /// The device-supplied reason, or the default description of `kind`.
    pub message: String,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response length or framing is not what the command allows. The
    /// host and device are out of sync after this.
    #[error("framing error: {0}")]
    Framing(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The requested backend or operation is not available on this platform.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    /// The pinout scanner reported a status that is neither the scan in
    /// progress nor idle/done.
    #[error("unexpected scan status 0x{got:02x} while waiting for scan type {expected}")]
    ScanAnomaly { expected: u8, got: u8 },
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(value))
    }
}

impl Error {
    /// Returns the status kind if this is an error reported by the device.
    pub fn status_kind(&self) -> Option<StatusKind> {
        match self {
            Error::Protocol(err) => Some(err.kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
