//! Tunnel layer - the per-connection relay core
//!
//! Provides:
//! - Connection lifecycle (listen, dial, establish, dispose)
//! - Bidirectional forwarding pumps
//! - Randomized keep-alive cycles
//! - Remote socket construction and hostname resolution

mod connection;
mod socket;

pub use connection::{Connection, ConnectionState, DisposedHook};
pub use socket::{default_remote_socket, new_remote_socket, resolve_endpoint};

use thiserror::Error;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Connection disposed")]
    Disposed,

    #[error("Connection already listening")]
    AlreadyListening,

    #[error("Remote socket already present")]
    RemoteAlreadySet,

    #[error("No async runtime available")]
    NoRuntime,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// Lower bound of the keep-alive delay in milliseconds
pub const KEEPALIVE_DELAY_MIN_MS: u64 = 100;

/// Upper bound (exclusive) of the keep-alive delay in milliseconds
pub const KEEPALIVE_DELAY_MAX_MS: u64 = 500;

/// Keep-alive payload block size
pub const KEEPALIVE_BLOCK: usize = 64;

/// Smallest keep-alive payload
pub const KEEPALIVE_PAYLOAD_MIN: usize = 8;
