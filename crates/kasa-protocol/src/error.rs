//! Error types for kasa-protocol.
//!
//! Every fallible operation in the crate returns [`Error`]. The retry loop in
//! [`crate::protocol`] does not match on variants directly; it asks
//! [`Error::kind`] which of the handling categories an error belongs to.

use thiserror::Error;

use crate::error_code::SmartErrorCode;

/// Error type for kasa-protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection to the device failed (refused, unreachable, reset).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Authentication failed during a handshake or login.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The device reported a transient condition; the request may succeed
    /// after the session has been re-established.
    #[error("retryable error: {message}")]
    Retryable {
        /// Device error code, when the condition came from the device.
        code: Option<SmartErrorCode>,
        /// Human readable description.
        message: String,
    },

    /// The device rejected the request with a non-retryable error code.
    #[error("device error {code:?}: {message}")]
    Device {
        /// Device error code.
        code: SmartErrorCode,
        /// Human readable description.
        message: String,
    },

    /// Protocol error (unexpected response format, bad framing, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Failed to parse device response.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The device family / encryption combination is not supported.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),
}

/// Handling category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network-level failure; retried after a transport reset.
    Connection,
    /// I/O timeout; retried after a fixed backoff.
    Timeout,
    /// Bad credentials or failed handshake; never retried.
    Authentication,
    /// Transient device condition; retried after a transport reset.
    Retryable,
    /// Anything else; surfaced immediately.
    Fatal,
}

impl Error {
    /// Returns the handling category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectionFailed(_) | Error::IoError(_) => ErrorKind::Connection,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::AuthenticationFailed(_) => ErrorKind::Authentication,
            Error::Retryable { .. } => ErrorKind::Retryable,
            Error::Device { .. }
            | Error::Protocol(_)
            | Error::ParseError(_)
            | Error::UnsupportedDevice(_) => ErrorKind::Fatal,
        }
    }

    /// Builds the error a device error code maps to.
    ///
    /// Retryable codes become [`Error::Retryable`], authentication codes
    /// [`Error::AuthenticationFailed`] and everything else [`Error::Device`].
    pub fn from_code(code: SmartErrorCode, context: impl std::fmt::Display) -> Self {
        let message = format!("{context}: {code:?} ({})", code.code());
        if code.is_retryable() {
            Error::Retryable {
                code: Some(code),
                message,
            }
        } else if code.is_auth_error() {
            Error::AuthenticationFailed(message)
        } else {
            Error::Device { code, message }
        }
    }

    /// Returns the device error code carried by this error, if any.
    pub fn code(&self) -> Option<SmartErrorCode> {
        match self {
            Error::Retryable { code, .. } => *code,
            Error::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::Timeout(err.to_string()),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::HostUnreachable
            | std::io::ErrorKind::NetworkUnreachable => Error::ConnectionFailed(err.to_string()),
            _ => Error::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError(err.to_string())
    }
}
