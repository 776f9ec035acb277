//! SFTP wire codec.
//!
//! Every SFTP message travels in a frame:
//!
//! ```text
//! uint32    length     (big-endian, byte count of the payload)
//! byte[n]   payload    (first payload byte is the message type)
//! ```
//!
//! Payload bodies are built from a small set of primitive forms, all
//! big-endian: `u8`, `u32`, `u64`, `string` (a `u32` length followed by
//! UTF-8 bytes, no terminator) and `binary` (same encoding, opaque bytes).
//! Composite attribute and name records are encoded by their types in
//! [`super::types`] on top of these primitives.
//!
//! Reads are exact: a short read is retried until the requested count is
//! fulfilled, and an end-of-stream inside a frame is a typed protocol
//! error, never a silent zero-length result. The frame-length read is the
//! one place where end-of-stream is legal, so [`read_frame`] distinguishes
//! a clean close at a frame boundary (`Ok(None)`) from a truncated frame.

use bytes::{BufMut, BytesMut};
use skiff_platform::{SkiffError, SkiffResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default ceiling for a single frame payload (1 MiB).
///
/// Frames longer than the configured ceiling are rejected on read, and
/// attempting to buffer more than the ceiling on the write side is a fatal
/// encoder error.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024 * 1024;

fn stream_error(err: std::io::Error) -> SkiffError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        SkiffError::Protocol("unexpected end of stream inside a frame".to_string())
    } else {
        SkiffError::Io(err)
    }
}

/// Reads one frame and returns its payload.
///
/// Returns `Ok(None)` when the stream ends cleanly at a frame boundary or
/// the peer sends a zero-length frame; both mean the session is over. An
/// end-of-stream anywhere else is a protocol error.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> SkiffResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];

    // The first length byte is read separately: zero bytes here is a clean
    // close, zero bytes after it is a truncated frame.
    let n = reader.read(&mut len_buf[..1]).await.map_err(SkiffError::Io)?;
    if n == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut len_buf[1..])
        .await
        .map_err(stream_error)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Ok(None);
    }
    if len > max_size {
        return Err(SkiffError::Protocol(format!(
            "frame length {} exceeds maximum of {} bytes",
            len, max_size
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(stream_error)?;
    Ok(Some(payload))
}

/// Buffering frame writer.
///
/// The payload is staged in memory and emitted as `length || payload` in a
/// single write, so a frame is never interleaved with another writer's
/// bytes on the same stream.
pub struct FrameWriter<W> {
    writer: W,
    buf: BytesMut,
    max_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Creates a frame writer over `writer` with the given payload ceiling.
    pub fn new(writer: W, max_size: usize) -> Self {
        Self {
            writer,
            buf: BytesMut::new(),
            max_size,
        }
    }

    /// Writes `payload` as one frame and flushes the underlying stream.
    pub async fn send(&mut self, payload: &[u8]) -> SkiffResult<()> {
        if payload.len() > self.max_size {
            return Err(SkiffError::Protocol(format!(
                "encoded payload of {} bytes exceeds maximum of {} bytes",
                payload.len(),
                self.max_size
            )));
        }

        self.buf.clear();
        self.buf.reserve(4 + payload.len());
        self.buf.put_u32(payload.len() as u32);
        self.buf.put_slice(payload);

        self.writer
            .write_all(&self.buf)
            .await
            .map_err(SkiffError::Io)?;
        self.writer.flush().await.map_err(SkiffError::Io)?;
        Ok(())
    }

    /// Shuts down the underlying stream.
    pub async fn shutdown(&mut self) -> SkiffResult<()> {
        self.writer.shutdown().await.map_err(SkiffError::Io)?;
        Ok(())
    }
}

/// Cursor over a frame payload with bounds-checked primitive readers.
///
/// Decoders must not stop at embedded zero bytes; strings are read by
/// their length prefix alone.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> SkiffResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(SkiffError::Protocol(format!(
                "message truncated while reading {}",
                what
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads one byte.
    pub fn get_u8(&mut self) -> SkiffResult<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    /// Reads a big-endian `u32`.
    pub fn get_u32(&mut self) -> SkiffResult<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a big-endian `u64`.
    pub fn get_u64(&mut self) -> SkiffResult<u64> {
        let b = self.take(8, "u64")?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a length-prefixed opaque byte string.
    pub fn get_bytes(&mut self) -> SkiffResult<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len, "binary")?.to_vec())
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> SkiffResult<String> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len, "string")?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SkiffError::Protocol("string field is not valid UTF-8".to_string()))
    }

    /// Consumes and returns every remaining byte.
    pub fn get_rest(&mut self) -> Vec<u8> {
        let rest = self.buf[self.pos..].to_vec();
        self.pos = self.buf.len();
        rest
    }
}

/// Growable payload buffer with primitive writers.
#[derive(Default)]
pub struct PacketBuf {
    buf: BytesMut,
}

impl PacketBuf {
    /// Creates an empty payload buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one byte.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Appends a big-endian `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    /// Appends a big-endian `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    /// Appends a length-prefixed opaque byte string.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.put_u32(v.len() as u32);
        self.buf.put_slice(v);
    }

    /// Appends a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Appends raw bytes without a length prefix.
    pub fn put_raw(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    /// The encoded payload.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Encoded length so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been encoded yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
