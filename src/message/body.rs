//! Readable message payloads.

use std::fmt;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A one-shot readable body attached to an inbound message.
///
/// Tracks how much was read so the destination can tell whether the
/// pipeline consumed the request before it flushes the response.
pub struct BodyReader {
    inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
    bytes_read: u64,
    finished: bool,
    closed: Arc<AtomicBool>,
}

/// Closes a [`BodyReader`] from elsewhere, e.g. when the response to its
/// request is complete.
#[derive(Debug, Clone)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl BodyReader {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        Self {
            inner: Box::pin(reader),
            bytes_read: 0,
            finished: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Read into `buf`, returning 0 at end of stream or once closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.is_closed() || self.finished {
            return Ok(0);
        }
        let n = self.inner.read(buf).await?;
        if n == 0 && !buf.is_empty() {
            self.finished = true;
        }
        self.bytes_read += n as u64;
        Ok(n)
    }

    /// Read everything that is left.
    pub async fn read_to_end(&mut self) -> std::io::Result<Bytes> {
        let mut out = BytesMut::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out.freeze())
    }

    /// Discard up to `limit` bytes; returns how many were discarded.
    pub async fn drain(&mut self, limit: u64) -> std::io::Result<u64> {
        let mut discarded = 0u64;
        let mut chunk = [0u8; 4096];
        while discarded < limit {
            let want = chunk.len().min((limit - discarded) as usize);
            let n = self.read(&mut chunk[..want]).await?;
            if n == 0 {
                break;
            }
            discarded += n as u64;
        }
        Ok(discarded)
    }

    /// True once the stream reached its end or was closed.
    pub fn is_consumed(&self) -> bool {
        self.finished || self.is_closed()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Stop reading and release the underlying stream; later reads return
    /// end of stream.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.inner = Box::pin(tokio::io::empty());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// A handle that closes this reader when triggered.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(Arc::clone(&self.closed))
    }
}

impl fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader")
            .field("bytes_read", &self.bytes_read)
            .field("finished", &self.finished)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An attachment travelling with a message, read lazily from the request.
#[derive(Debug)]
pub struct Attachment {
    pub id: String,
    pub content_type: Option<String>,
    pub data: AttachmentData,
}

/// Attachment payload: still streaming, or cached in memory.
#[derive(Debug)]
pub enum AttachmentData {
    Streaming(BodyReader),
    Cached(Bytes),
}

impl Attachment {
    /// Pull a streaming attachment fully into memory.
    pub async fn cache(&mut self) -> std::io::Result<()> {
        if let AttachmentData::Streaming(reader) = &mut self.data {
            let bytes = reader.read_to_end().await?;
            self.data = AttachmentData::Cached(bytes);
        }
        Ok(())
    }
}
