//! Logical transport layer
//!
//! The relay consumes transports as a capability set: one framed read, one
//! framed write, an idempotent close. Implementations decide the framing
//! (plaintext TCP, obfuscated TCP, WebSocket-style, ...); the relay core is
//! strictly oblivious to it.

mod tcp;

pub use tcp::TcpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    Closed,
}

/// Trait for logical transport implementations
///
/// `read_frame` and `write_frame` may run concurrently, but at most one
/// reader and one writer are outstanding at a time.
///
/// A write borrows the caller's buffer for the duration of the call only;
/// implementations must not retain it past completion.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Receive the next frame. Any error stands in for end-of-stream.
    async fn read_frame(&self) -> Result<Bytes, TransportError>;

    /// Write one frame.
    async fn write_frame(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Idempotent, non-blocking; outstanding operations complete with failure.
    fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}
