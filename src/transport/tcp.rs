//! Plaintext TCP transport (for testing and internal networks)

use super::{Transport, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Bytes fetched by one read
const READ_CHUNK: usize = 16 * 1024;

/// Raw TCP transport; one `read_buf` per delivered frame
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    closed: CancellationToken,
}

impl TcpTransport {
    /// Wrap an established stream
    pub fn new(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
        }
    }

    /// Dial and wrap
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_frame(&self) -> Result<Bytes, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut reader = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            guard = self.reader.lock() => guard,
        };

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            r = reader.read_buf(&mut buf) => r?,
        };
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(buf.freeze())
    }

    async fn write_frame(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut writer = tokio::select! {
            _ = self.closed.cancelled() => return Err(TransportError::Closed),
            guard = self.writer.lock() => guard,
        };

        tokio::select! {
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            r = writer.write_all(data) => Ok(r?),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
