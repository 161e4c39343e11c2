//! Error types for mdns-registry.

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
///
/// Absence of results is not an error: a lookup that nothing answers yields
/// an empty collection, since silence never proves absence on an open
/// network. Malformed records received from the segment are dropped below
/// the API surface; only failures of the caller's own operation propagate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record field cannot be represented within the 255-byte TXT chunk
    /// limit, or a node address is not `host:port`.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The multicast segment rejected a send or receive. Fatal to the call
    /// that triggered it.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The watcher has been stopped.
    #[error("watcher closed")]
    WatcherClosed,

    /// The registry was shut down while the call was in flight, or the
    /// call was made after shutdown.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create an encoding error.
    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }
}
