//! SFTP error types.
//!
//! Failures come in two layers. [`StatusError`] is the domain failure a
//! back-end or a remote peer reports through a STATUS message: it carries
//! one of the protocol status codes plus a human-readable message. Every
//! other failure (stream I/O, protocol violations, engine disposal) is a
//! [`skiff_platform::SkiffError`]. [`SftpError`] is the sum of both and is
//! what every fallible SFTP operation returns.

use std::fmt;

use skiff_platform::SkiffError;

use super::types::StatusCode;

/// A typed domain failure bearing a protocol status code.
///
/// Server back-ends return this to have the engine answer the request with
/// a STATUS response carrying the code; clients produce it when a request
/// is answered with a non-OK STATUS.
#[derive(Debug, Clone)]
pub struct StatusError {
    /// The protocol status code.
    pub code: StatusCode,
    /// Error message (UTF-8, possibly empty).
    pub message: String,
}

impl StatusError {
    /// Creates a status error with an explicit message.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a status error carrying the code's canonical message.
    pub fn from_code(code: StatusCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
        }
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SFTP status {}: {}", self.code as u32, self.message)
    }
}

impl std::error::Error for StatusError {}

/// Error type for SFTP operations.
#[derive(Debug)]
pub enum SftpError {
    /// The peer or back-end reported a typed status failure.
    Status(StatusError),
    /// The engine failed: stream I/O, protocol violation, or disposal.
    Engine(SkiffError),
}

impl SftpError {
    /// The status code, when this is a status failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            SftpError::Status(e) => Some(e.code),
            SftpError::Engine(_) => None,
        }
    }

    /// Whether the engine behind this error was disposed.
    pub fn is_disposed(&self) -> bool {
        matches!(self, SftpError::Engine(SkiffError::Disposed(_)))
    }
}

impl fmt::Display for SftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SftpError::Status(e) => write!(f, "{}", e),
            SftpError::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SftpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SftpError::Status(e) => Some(e),
            SftpError::Engine(e) => Some(e),
        }
    }
}

impl From<StatusError> for SftpError {
    fn from(err: StatusError) -> Self {
        SftpError::Status(err)
    }
}

impl From<SkiffError> for SftpError {
    fn from(err: SkiffError) -> Self {
        SftpError::Engine(err)
    }
}

impl From<std::io::Error> for SftpError {
    fn from(err: std::io::Error) -> Self {
        SftpError::Engine(SkiffError::Io(err))
    }
}

/// Result type for SFTP operations.
pub type SftpResult<T> = Result<T, SftpError>;
