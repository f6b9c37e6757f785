//! Error types for the MJPEG streaming server library.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for MJPEG server operations.
pub type Result<T> = std::result::Result<T, MjpegError>;

/// Errors that can occur in MJPEG server operations.
///
/// `BindFailed`, `InvalidPort` and `AcceptLoop` belong to the server as a whole.
/// `CaptureUnavailable`, `EncodeFailed` and `TransportClosed` only ever end the
/// session that hit them.
#[derive(Debug, Error)]
pub enum MjpegError {
    /// The listening socket could not be created.
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        /// Address the server tried to bind.
        addr: SocketAddr,
        /// Underlying socket error.
        source: io::Error,
    },

    /// Port outside of 1-65535.
    #[error("Invalid port: {0}")]
    InvalidPort(u16),

    /// The display could not be captured.
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// A frame could not be compressed.
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    /// Writing to the client failed (broken pipe, reset, ...).
    #[error("Transport closed: {0}")]
    TransportClosed(#[source] io::Error),

    /// The listener failed while accepting connections.
    #[error("Accept loop failed: {0}")]
    AcceptLoop(#[source] io::Error),

    /// Malformed multipart stream (client side decoding).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid operation or state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MjpegError {
    /// Returns true if the error only affects a single client session.
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            Self::CaptureUnavailable(_) | Self::EncodeFailed(_) | Self::TransportClosed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_scoped_errors() {
        assert!(MjpegError::CaptureUnavailable("no display".into()).is_session_scoped());
        assert!(MjpegError::EncodeFailed("zero size".into()).is_session_scoped());
        assert!(MjpegError::TransportClosed(io::ErrorKind::BrokenPipe.into()).is_session_scoped());
        assert!(!MjpegError::InvalidPort(0).is_session_scoped());
        assert!(!MjpegError::AcceptLoop(io::ErrorKind::Other.into()).is_session_scoped());
    }

    #[test]
    fn test_bind_failed_display() {
        let err = MjpegError::BindFailed {
            addr: "0.0.0.0:8080".parse().unwrap(),
            source: io::ErrorKind::AddrInUse.into(),
        };
        assert!(err.to_string().starts_with("Failed to bind 0.0.0.0:8080"));
    }
}
