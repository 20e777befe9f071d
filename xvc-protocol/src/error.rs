use std::{
    error::Error,
    fmt::Display,
    io::{self, ErrorKind},
    num::ParseIntError,
    str::Utf8Error,
};

/// Errors that may occur when reading a message from a stream.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    /// The peer closed the stream before sending the first byte of a message.
    Closed,
    /// A well-formed command token that this implementation does not know.
    /// The stream is still usable afterwards.
    UnknownCommand(String),
    /// Garbage where a command token was expected.
    InvalidCommand(String),
    UnsupportedVersion(String),
    InvalidFormat(String),
    TooManyBytes { max: usize, got: usize },
}

impl ReadError {
    /// Whether this error means the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ReadError::Closed => true,
            ReadError::IoError(err) => matches!(
                err.kind(),
                ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl From<Utf8Error> for ReadError {
    fn from(value: Utf8Error) -> Self {
        ReadError::InvalidFormat(format!("Invalid UTF8: {}", value))
    }
}

impl From<ParseIntError> for ReadError {
    fn from(value: ParseIntError) -> Self {
        ReadError::InvalidFormat(format!("Invalid integer: {}", value))
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) if error.kind() == ErrorKind::UnexpectedEof => {
                write!(f, "Connection closed in the middle of a message")
            }
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::Closed => write!(f, "Connection closed"),
            ReadError::UnknownCommand(cmd) => write!(f, "Unknown command '{}'", cmd),
            ReadError::InvalidCommand(cmd) => write!(f, "Received invalid command {}", cmd),
            ReadError::UnsupportedVersion(version) => write!(f, "Unsupported version {}", version),
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::TooManyBytes { max, got } => {
                write!(f, "Message too large! Maximum is {}, but got {}", max, got)
            }
        }
    }
}

impl Error for ReadError {}
