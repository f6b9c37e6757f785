//! Server events that can be received by the application.

use std::net::SocketAddr;

/// Events buffered for the application before new ones are dropped.
///
/// A receiver that is kept but never read costs at most this many events.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Events emitted by the MJPEG server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listener is bound and accepting connections.
    Listening {
        /// Bound local address.
        address: SocketAddr,
    },

    /// A client has connected to the server.
    ClientConnected {
        /// Unique client identifier.
        id: usize,
        /// Client's socket address.
        address: SocketAddr,
    },

    /// A client has disconnected from the server.
    ClientDisconnected {
        /// Unique client identifier.
        id: usize,
        /// Number of frames written to the client before it went away.
        frames_sent: u64,
        /// Why the session ended; `None` when it was closed by the server.
        error: Option<String>,
    },

    /// The accept loop has terminated and every session has been torn down.
    ServerStopped {
        /// Set when the loop died on a listener failure rather than a `stop()`.
        error: Option<String>,
    },
}
