//! Newline-delimited JSON framing for the child's stdio
//!
//! One JSON object per line, UTF-8, LF-terminated. Readers tolerate CRLF by
//! stripping the trailing CR. A line exceeding the configured cap fails with
//! `FrameTooLarge`; non-UTF-8 bytes are a protocol violation.

use sb_types::{AppError, AppResult};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on a single frame (4 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Buffered line-frame reader over the child's stdout
///
/// Partial lines are buffered across reads; each call to [`read_message`]
/// returns one parsed JSON object, `Ok(None)` on clean EOF.
///
/// [`read_message`]: FrameReader::read_message
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            max_frame_bytes,
        }
    }

    /// Read one complete frame
    ///
    /// Returns `Ok(None)` on EOF with no buffered partial line. A partial
    /// line at EOF, an oversized line, invalid UTF-8, or invalid JSON all
    /// surface as errors; the supervisor decides whether the child survives.
    pub async fn read_message(&mut self) -> AppResult<Option<Value>> {
        loop {
            // Scan buffered bytes for a complete line first
            while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = &line[..line.len() - 1];
                let line = line.strip_suffix(b"\r").unwrap_or(line);

                if line.is_empty() {
                    continue;
                }
                if line.len() > self.max_frame_bytes {
                    return Err(AppError::FrameTooLarge {
                        actual: line.len(),
                        limit: self.max_frame_bytes,
                    });
                }

                let text = std::str::from_utf8(line)
                    .map_err(|e| AppError::Frame(format!("invalid UTF-8 on stdout: {}", e)))?;
                let value: Value = serde_json::from_str(text)
                    .map_err(|e| AppError::Frame(format!("invalid JSON frame: {}", e)))?;
                return Ok(Some(value));
            }

            if self.buf.len() > self.max_frame_bytes {
                let actual = self.buf.len();
                self.buf.clear();
                return Err(AppError::FrameTooLarge {
                    actual,
                    limit: self.max_frame_bytes,
                });
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.iter().any(|&b| b != b'\r') {
                    self.buf.clear();
                    return Err(AppError::Frame(
                        "EOF in the middle of a frame".to_string(),
                    ));
                }
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Read a single frame from a plain stream with the default cap
pub async fn read_message<R: AsyncRead + Unpin>(stream: R) -> AppResult<Option<Value>> {
    FrameReader::new(stream, DEFAULT_MAX_FRAME_BYTES)
        .read_message()
        .await
}

/// Write one canonical frame: compact JSON + LF, flushed
///
/// serde_json's compact encoding never emits a raw newline, so the LF
/// terminator is unambiguous.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> AppResult<()> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
