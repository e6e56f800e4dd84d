//! Framed I/O over a single byte stream.
//!
//! One connection carries two encodings: `\n`-terminated UTF-8 text lines
//! (commands, chat, replies) and length-declared raw binary payloads (file
//! transfers). All stream access goes through [`FramedReader`] and
//! [`FramedWriter`] so a caller can never issue a text read while a declared
//! binary frame is partially consumed.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default cap on a single text line (bytes, excluding the terminator).
pub const DEFAULT_MAX_LINE: usize = 8 * 1024;

/// Errors surfaced by the framed channel. All of them leave the stream in an
/// indeterminate framing state and are terminal for the connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the stream in the middle of a frame (a partial text line
    /// or fewer bytes than a declared binary length).
    #[error("peer closed the stream mid-frame")]
    TruncatedStream,

    #[error("line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Buffered read half of a connection.
pub struct FramedReader<R> {
    inner: BufReader<R>,
    max_line: usize,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_line(inner, DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(inner: R, max_line: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_line,
        }
    }

    /// Read one `\n`-terminated line, stripping the terminator (and a
    /// preceding `\r` if present).
    ///
    /// Returns `Ok(None)` on clean EOF at a line boundary. EOF in the middle
    /// of a line is [`ChannelError::TruncatedStream`]: a half-sent command
    /// must not be delivered as if it were complete. The length cap is
    /// enforced while scanning, before the oversized line is fully buffered.
    pub async fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let buf = self.inner.fill_buf().await?;
            if buf.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(ChannelError::TruncatedStream);
            }

            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&buf[..pos]);
                    self.inner.consume(pos + 1);
                    if line.len() > self.max_line {
                        return Err(ChannelError::LineTooLong { max: self.max_line });
                    }
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    let text =
                        String::from_utf8(line).map_err(|_| ChannelError::InvalidUtf8)?;
                    return Ok(Some(text));
                }
                None => {
                    line.extend_from_slice(buf);
                    let consumed = buf.len();
                    self.inner.consume(consumed);
                    if line.len() > self.max_line {
                        return Err(ChannelError::LineTooLong { max: self.max_line });
                    }
                }
            }
        }
    }

    /// Read exactly `n` bytes of a declared binary frame.
    ///
    /// The caller must have learned `n` from preceding metadata; a short read
    /// is [`ChannelError::TruncatedStream`].
    pub async fn read_exact(&mut self, n: u64) -> Result<Vec<u8>, ChannelError> {
        let mut payload = vec![0u8; n as usize];
        self.inner.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ChannelError::TruncatedStream
            } else {
                ChannelError::Io(e)
            }
        })?;
        Ok(payload)
    }

    /// Mutable access to the underlying buffered stream, for decoding a
    /// length-declared record (e.g. file metadata) through the same buffer.
    pub fn get_mut(&mut self) -> &mut BufReader<R> {
        &mut self.inner
    }

    /// Consume the reader, returning the underlying stream half.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

/// Write half of a connection. Every write flushes immediately so interactive
/// peers never wait on a buffer.
pub struct FramedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one text line, appending the `\n` terminator.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }

    /// Write raw binary bytes (part of a declared-length frame).
    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await
    }

    /// Shut down the write half, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn read_line_splits_on_newline() {
        let mut reader = FramedReader::new(Cursor::new(b"hello\nworld\n".to_vec()));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("world"));
        assert!(reader.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_line_strips_carriage_return() {
        let mut reader = FramedReader::new(Cursor::new(b"hello\r\n".to_vec()));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn read_line_empty_line() {
        let mut reader = FramedReader::new(Cursor::new(b"\nrest\n".to_vec()));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("rest"));
    }

    #[tokio::test]
    async fn read_line_eof_mid_line_is_truncated() {
        let mut reader = FramedReader::new(Cursor::new(b"partial".to_vec()));
        let err = reader.read_line().await.unwrap_err();
        assert!(matches!(err, ChannelError::TruncatedStream));
    }

    #[tokio::test]
    async fn read_line_enforces_cap() {
        let mut reader = FramedReader::with_max_line(Cursor::new(vec![b'a'; 64]), 16);
        let err = reader.read_line().await.unwrap_err();
        assert!(matches!(err, ChannelError::LineTooLong { max: 16 }));
    }

    #[tokio::test]
    async fn read_line_rejects_invalid_utf8() {
        let mut reader = FramedReader::new(Cursor::new(vec![0xFF, 0xFE, b'\n']));
        let err = reader.read_line().await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidUtf8));
    }

    #[tokio::test]
    async fn read_exact_returns_declared_length() {
        let mut reader = FramedReader::new(Cursor::new(vec![1, 2, 3, 4, 5]));
        assert_eq!(reader.read_exact(5).await.unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn read_exact_short_stream_is_truncated() {
        let mut reader = FramedReader::new(Cursor::new(vec![1, 2, 3]));
        let err = reader.read_exact(5).await.unwrap_err();
        assert!(matches!(err, ChannelError::TruncatedStream));
    }

    #[tokio::test]
    async fn line_then_binary_then_line() {
        // Text and binary frames interleave on one stream; each must be
        // consumed fully before the next read.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"UPLOAD:a.bin|3\n");
        bytes.extend_from_slice(&[9, 8, 7]);
        bytes.extend_from_slice(b"next\n");
        let mut reader = FramedReader::new(Cursor::new(bytes));

        assert_eq!(
            reader.read_line().await.unwrap().as_deref(),
            Some("UPLOAD:a.bin|3")
        );
        assert_eq!(reader.read_exact(3).await.unwrap(), vec![9, 8, 7]);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn writer_appends_terminator() {
        let mut buf = Vec::new();
        {
            let mut writer = FramedWriter::new(&mut buf);
            writer.write_line("hello").await.unwrap();
            writer.write_all(&[1, 2, 3]).await.unwrap();
        }
        assert_eq!(buf, b"hello\n\x01\x02\x03");
    }
}
