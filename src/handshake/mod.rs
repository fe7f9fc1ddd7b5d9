//! Obfuscated channel handshake
//!
//! Peers agree on a non-zero channel id through a single variable-length
//! header that looks like printable-ASCII noise on the wire:
//!
//! ```text
//! byte 0:          random printable ASCII
//! bytes 1..4:      4 hex digits (case-random) = size
//! bytes 5..12:     8 hex digits (case-random) = channel_id ^ ((size<<16)|size)
//! bytes 13..size:  random printable ASCII padding
//! ```
//!
//! `size` is the whole header length. Hex digits parse identically in either
//! case, so randomizing the case changes every observable byte while
//! preserving the payload; a receiver rejects any frame whose length differs
//! from the decoded `size`.

use bytes::BytesMut;
use rand::{thread_rng, Rng};
use thiserror::Error;

use crate::transport::{Transport, TransportError};
use crate::{MAX_SEGMENT_SIZE, MIN_ALIGNMENT};

/// Handshake errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Invalid handshake argument")]
    InvalidArgument,

    #[error("Malformed handshake header")]
    Malformed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Fill `buf` with random printable ASCII (0x20..=0x7E)
pub fn fill_random_ascii(buf: &mut [u8]) {
    let mut rng = thread_rng();
    for b in buf.iter_mut() {
        *b = rng.gen_range(0x20..=0x7E);
    }
}

/// Build one handshake header for `channel_id`.
///
/// The header length is drawn uniformly from
/// `[512, min(alignment, MAX_SEGMENT_SIZE)]`. Returns `None` when
/// `alignment < 512` or `channel_id` is zero.
pub fn pack_headers(channel_id: u32, alignment: usize) -> Option<BytesMut> {
    if alignment < MIN_ALIGNMENT || channel_id == 0 {
        return None;
    }

    let upper = alignment.min(MAX_SEGMENT_SIZE);
    let size = thread_rng().gen_range(MIN_ALIGNMENT..=upper);

    let mut buf = BytesMut::zeroed(size);
    fill_random_ascii(&mut buf);

    let mask = ((size as u32) << 16) | size as u32;
    let header = format!("{:04X}{:08X}", size, channel_id ^ mask);
    buf[1..13].copy_from_slice(header.as_bytes());

    let mut rng = thread_rng();
    for b in buf[1..13].iter_mut() {
        *b = if rng.gen_bool(0.5) {
            b.to_ascii_lowercase()
        } else {
            b.to_ascii_uppercase()
        };
    }

    Some(buf)
}

/// Decode one handshake header.
///
/// Returns `(channel_id << 32) | size`, or 0 on any violation: short buffer,
/// non-hex fields, `size <= 13`, `size` different from the buffer length, or
/// a recovered channel id of zero.
pub fn unpack_headers(buf: &[u8]) -> u64 {
    if buf.len() < 13 {
        return 0;
    }

    let size = match parse_hex(&buf[1..5]) {
        Some(v) => v,
        None => return 0,
    };
    if size <= 13 || size != buf.len() as u64 {
        return 0;
    }

    let encoded = match parse_hex(&buf[5..13]) {
        Some(v) => v,
        None => return 0,
    };
    let channel_id = encoded ^ ((size << 16) | size);
    if channel_id == 0 {
        return 0;
    }

    (channel_id << 32) | size
}

fn parse_hex(bytes: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(bytes).ok()?;
    u64::from_str_radix(text, 16).ok()
}

/// Server side of the handshake: pack a header and write it as one frame.
pub async fn handshake_send(
    transport: &dyn Transport,
    alignment: usize,
    channel_id: u32,
) -> Result<u32, HandshakeError> {
    let headers = pack_headers(channel_id, alignment).ok_or(HandshakeError::InvalidArgument)?;
    transport.write_frame(&headers).await?;
    Ok(channel_id)
}

/// Client side of the handshake: read one frame and decode it.
pub async fn handshake_recv(transport: &dyn Transport) -> Result<u32, HandshakeError> {
    let frame = transport.read_frame().await?;
    let packed = unpack_headers(&frame);
    if packed == 0 {
        return Err(HandshakeError::Malformed);
    }
    Ok((packed >> 32) as u32)
}

/// Accept an inbound peer: measure a channel id for the transport, then send
/// the header carrying it. Requires `alignment >= 512` and a non-zero
/// measured id.
pub async fn accept<F>(
    inbound: &dyn Transport,
    alignment: usize,
    measure: F,
) -> Result<u32, HandshakeError>
where
    F: FnOnce(&dyn Transport) -> u32,
{
    if alignment < MIN_ALIGNMENT {
        return Err(HandshakeError::InvalidArgument);
    }
    let channel_id = measure(inbound);
    if channel_id == 0 {
        return Err(HandshakeError::InvalidArgument);
    }
    handshake_send(inbound, alignment, channel_id).await
}

/// Dialer-side counterpart of [`accept`]: announce an already-known channel
/// id to the outbound peer. The receiving side of either direction is
/// [`handshake_recv`].
pub async fn connect(
    outbound: &dyn Transport,
    alignment: usize,
    channel_id: u32,
) -> Result<u32, HandshakeError> {
    handshake_send(outbound, alignment, channel_id).await
}

/// One-shot probe: send a minimal-alignment header with a random non-zero
/// channel id. Closes the transport on failure.
pub async fn hello(outbound: &dyn Transport) -> Result<(), HandshakeError> {
    let channel_id = thread_rng().gen_range(1..=i32::MAX as u32);
    match handshake_send(outbound, MIN_ALIGNMENT, channel_id).await {
        Ok(_) => Ok(()),
        Err(e) => {
            outbound.close();
            Err(e)
        }
    }
}

/// Receive a one-shot probe. Closes the transport on failure.
pub async fn hello_ack(inbound: &dyn Transport) -> bool {
    match handshake_recv(inbound).await {
        Ok(_) => true,
        Err(_) => {
            inbound.close();
            false
        }
    }
}
