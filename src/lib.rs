//! # Mirage Relay
//!
//! The per-connection core of a userspace TCP relay: it bridges an
//! already-accepted *inbound* logical transport to a freshly dialled
//! remote TCP endpoint, and forwards the remote's bytes back out through
//! an *outbound* logical transport.
//!
//! ## Features
//!
//! - **Obfuscated handshake**: channel ids agreed through a variable-length
//!   header hidden in case-randomized hex and printable-ASCII noise
//! - **Bidirectional forwarding**: two independent half-duplex pumps, one
//!   outstanding I/O per direction
//! - **Randomized keep-alive**: timer-driven noise writes with a reciprocal
//!   read drain, defeating idle-timeout termination on intermediaries
//! - **Pluggable transports**: the relay only sees the [`transport::Transport`]
//!   capability set, never the underlying framing
//!
//! ## Architecture
//!
//! ```text
//! inbound  --read_frame-->  [pump A]  --write-->  remote
//! remote   --read------->   [pump B]  --write_frame-->  outbound
//!     (optional) keep-alive drains outbound, timer-sends on inbound
//! ```

pub mod config;
pub mod handshake;
pub mod transport;
pub mod tunnel;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum bytes carried in one forwarding read (64 KB - 1)
pub const MAX_SEGMENT_SIZE: usize = 65535;

/// Smallest admissible handshake alignment
pub const MIN_ALIGNMENT: usize = 512;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake error: {0}")]
    Handshake(#[from] handshake::HandshakeError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
