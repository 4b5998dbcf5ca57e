//! Byte-stream transport for stdin/stdout and anything shaped like them
//!
//! Two framings are supported: one JSON document per line, or LSP-style
//! `Content-Length: N\r\n\r\n` headers followed by exactly `N` bytes.

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tracing::debug;

use crate::transport::{Inbound, ResponseOrder, Transport, TransportError};

pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const MAX_HEADER_BYTES: usize = 8 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Newline,
    ContentLength,
}

impl Framing {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newline => "newline",
            Self::ContentLength => "content-length",
        }
    }
}

/// What end of input means for requests that are still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EofPolicy {
    /// The peer is gone: abort in-flight work and write nothing.
    #[default]
    Cancel,
    /// The peer only stopped sending: finish in-flight work and write its responses.
    Drain,
}

impl EofPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Drain => "drain",
        }
    }

    fn inbound(self) -> Inbound {
        match self {
            Self::Cancel => Inbound::Disconnected,
            Self::Drain => Inbound::Finished,
        }
    }
}

pub struct LineTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    framing: Framing,
    eof: EofPolicy,
    /// Partial line (newline framing) or unparsed bytes (content-length framing).
    buffer: Vec<u8>,
    /// Newline framing: the rest of an oversized line is being thrown away.
    skip_line: bool,
    /// Content-length framing: body bytes of an oversized frame still to throw away.
    skip_bytes: usize,
}

impl LineTransport<Stdin, Stdout> {
    pub fn stdio(framing: Framing) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), framing)
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, framing: Framing) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            framing,
            eof: EofPolicy::default(),
            buffer: Vec::new(),
            skip_line: false,
            skip_bytes: 0,
        }
    }

    pub fn on_eof(mut self, eof: EofPolicy) -> Self {
        self.eof = eof;
        self
    }

    /// Next non-blank line without its terminator, `None` at end of input.
    ///
    /// Cancel safe: bytes already read stay in `buffer` and the next call resumes from there.
    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            // one byte over the limit tells an oversized line from one that just fits
            let limit = (MAX_FRAME_BYTES + 1).saturating_sub(self.buffer.len()) as u64;
            (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buffer)
                .await?;

            if self.buffer.last() != Some(&b'\n') {
                if self.buffer.len() <= MAX_FRAME_BYTES {
                    if !self.skip_line && !self.buffer.iter().all(u8::is_ascii_whitespace) {
                        debug!(bytes = self.buffer.len(), "discarding unterminated input at end of stream");
                    }
                    self.buffer.clear();
                    return Ok(None);
                }

                self.buffer.clear();
                if !std::mem::replace(&mut self.skip_line, true) {
                    return Err(TransportError::Framing(frame_too_large()));
                }
                continue;
            }

            let mut line = std::mem::take(&mut self.buffer);
            if std::mem::take(&mut self.skip_line) {
                continue;
            }

            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line));
        }
    }

    /// Next content-length frame body, `None` at end of input.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            if let Some(body) = self.next_frame()? {
                return Ok(Some(body));
            }

            let mut chunk = [0u8; READ_CHUNK_BYTES];
            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                if !self.buffer.iter().all(u8::is_ascii_whitespace) {
                    debug!(bytes = self.buffer.len(), "discarding incomplete frame at end of stream");
                }
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.skip_bytes > 0 {
            let skipped = self.skip_bytes.min(self.buffer.len());
            self.buffer.drain(..skipped);
            self.skip_bytes -= skipped;
            if self.skip_bytes > 0 {
                return Ok(None);
            }
        }

        let Some(header_end) = find_subslice(&self.buffer, b"\r\n\r\n") else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                self.buffer.clear();
                return Err(TransportError::Framing("frame header is too large".to_string()));
            }
            return Ok(None);
        };
        let body_start = header_end + 4;

        let Some(length) = parse_content_length(&self.buffer[..header_end]) else {
            self.buffer.drain(..body_start);
            return Err(TransportError::Framing(
                "missing or invalid Content-Length header".to_string(),
            ));
        };

        if length > MAX_FRAME_BYTES {
            self.buffer.drain(..body_start);
            self.skip_bytes = length;
            return Err(TransportError::Framing(frame_too_large()));
        }

        if self.buffer.len() < body_start + length {
            return Ok(None);
        }

        let body = self.buffer[body_start..body_start + length].to_vec();
        self.buffer.drain(..body_start + length);
        Ok(Some(body))
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        let frame = match self.framing {
            Framing::Newline => self.read_line().await?,
            Framing::ContentLength => self.read_frame().await?,
        };

        match frame {
            Some(bytes) => String::from_utf8(bytes)
                .map(Inbound::Message)
                .map_err(|_| TransportError::Framing("message is not valid UTF-8".to_string())),
            None => Ok(self.eof.inbound()),
        }
    }

    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        match self.framing {
            Framing::Newline => {
                self.writer.write_all(message.as_bytes()).await?;
                self.writer.write_all(b"\n").await?;
            }
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", message.len());
                self.writer.write_all(header.as_bytes()).await?;
                self.writer.write_all(message.as_bytes()).await?;
            }
        }
        self.writer.flush().await?;
        Ok(())
    }

    fn response_order(&self) -> ResponseOrder {
        ResponseOrder::Arrival
    }
}

fn frame_too_large() -> String {
    format!("message exceeds {MAX_FRAME_BYTES} bytes")
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
