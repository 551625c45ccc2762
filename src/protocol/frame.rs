//! Event socket frame reader
//!
//! A frame is a block of `Name: value` lines terminated by an empty line,
//! followed by exactly `Content-Length` bytes of body when that header is
//! present. The reader consumes whole frames so that a malformed header line
//! never desynchronizes the stream; only an unreadable length or an oversized
//! frame does.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::headers::Headers;
use crate::constants::buffer::{MAX_BODY, MAX_HEADER_LINE, MAX_HEADERS};
use crate::constants::headers::{CONTENT_LENGTH, CONTENT_TYPE};

/// Errors produced while reading or interpreting frames
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    #[error("I/O error while reading frame: {0}")]
    Io(#[from] std::io::Error),

    #[error("header line exceeds {max} bytes (read {0})", max = MAX_HEADER_LINE)]
    HeaderTooLong(usize),

    #[error("frame has more than {max} header lines", max = MAX_HEADERS)]
    TooManyHeaders,

    #[error("invalid Content-Length '{0}'")]
    InvalidContentLength(String),

    #[error("body of {0} bytes exceeds limit of {max} bytes", max = MAX_BODY)]
    BodyTooLarge(usize),

    #[error("stream ended in the middle of a frame")]
    UnexpectedEof,

    #[error("malformed header line '{0}'")]
    MalformedHeader(String),

    #[error("body is not valid UTF-8")]
    InvalidUtf8,

    #[error("event is missing the Event-Name header")]
    MissingEventName,
}

impl FrameError {
    /// Whether the stream is still aligned on a frame boundary after this error
    ///
    /// Recoverable errors concern the content of one complete frame; the
    /// caller drops that frame and keeps reading.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader(_) | Self::InvalidUtf8 | Self::MissingEventName
        )
    }
}

/// Frame content types the agent understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    AuthRequest,
    CommandReply,
    ApiResponse,
    EventPlain,
    DisconnectNotice,
    Other(String),
}

impl ContentType {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "auth/request" => Self::AuthRequest,
            "command/reply" => Self::CommandReply,
            "api/response" => Self::ApiResponse,
            "text/event-plain" => Self::EventPlain,
            "text/disconnect-notice" => Self::DisconnectNotice,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One complete frame from the wire
#[derive(Debug, Clone)]
pub struct Frame {
    pub headers: Headers,
    pub body: Option<String>,
    /// Header lines that could not be split into name and value
    pub malformed_lines: usize,
}

impl Frame {
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get(CONTENT_TYPE)
            .map(ContentType::parse)
            .unwrap_or_else(|| ContentType::Other(String::new()))
    }

    /// `Reply-Text` of a command reply, or the body of an api response
    #[must_use]
    pub fn reply_text(&self) -> &str {
        self.headers
            .get(crate::constants::headers::REPLY_TEXT)
            .or(self.body.as_deref())
            .unwrap_or("")
            .trim()
    }

    /// Whether a reply reports success (`+OK ...`)
    #[must_use]
    pub fn is_ok_reply(&self) -> bool {
        self.reply_text().starts_with("+OK")
    }
}

/// Parse a header block held in memory
///
/// Used for `text/event-plain` bodies, whose values are percent-encoded when
/// `decode` is set. Parsing stops at the first empty line; the byte offset just
/// past it is returned so the caller can locate a nested body.
pub fn parse_header_block(text: &str, decode: bool) -> Result<(Headers, usize), FrameError> {
    let mut headers = Headers::new();
    let mut offset = 0;

    for raw in text.split_inclusive('\n') {
        offset += raw.len();
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok((headers, offset));
        }
        let (name, value) = split_header(line)?;
        if decode {
            let decoded = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            headers.insert(name, decoded);
        } else {
            headers.insert(name, value);
        }
        if headers.len() > MAX_HEADERS {
            return Err(FrameError::TooManyHeaders);
        }
    }

    Ok((headers, offset))
}

fn split_header(line: &str) -> Result<(&str, &str), FrameError> {
    match line.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => Err(FrameError::MalformedHeader(line.to_string())),
    }
}

/// Incremental reader of frames from a buffered byte stream
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::with_capacity(256),
        }
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames. Blank lines
    /// before the first header of a frame are skipped.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut headers = Headers::new();
        let mut malformed_lines = 0;
        let mut started = false;

        loop {
            let Some(line) = self.read_line().await? else {
                return if started {
                    Err(FrameError::UnexpectedEof)
                } else {
                    Ok(None)
                };
            };

            if line.is_empty() {
                if started {
                    break;
                }
                continue;
            }
            started = true;

            match split_header(&line) {
                Ok((name, value)) => headers.insert(name, value),
                Err(_) => malformed_lines += 1,
            }
            if headers.len() + malformed_lines > MAX_HEADERS {
                return Err(FrameError::TooManyHeaders);
            }
        }

        let body = match headers.get(CONTENT_LENGTH) {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(raw.to_string()))?;
                if len > MAX_BODY {
                    return Err(FrameError::BodyTooLarge(len));
                }
                let mut buf = vec![0u8; len];
                self.inner.read_exact(&mut buf).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        FrameError::UnexpectedEof
                    } else {
                        FrameError::Io(e)
                    }
                })?;
                // Invalid UTF-8 is tolerated here and reported when the body is interpreted
                Some(String::from_utf8_lossy(&buf).into_owned())
            }
            None => None,
        };

        Ok(Some(Frame {
            headers,
            body,
            malformed_lines,
        }))
    }

    /// Read one line without its terminator, bounded by `MAX_HEADER_LINE`
    async fn read_line(&mut self) -> Result<Option<String>, FrameError> {
        self.line.clear();
        let limit = (MAX_HEADER_LINE + 1) as u64;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await?;

        if n == 0 {
            return Ok(None);
        }
        if self.line.last() != Some(&b'\n') {
            if n as u64 >= limit {
                return Err(FrameError::HeaderTooLong(n));
            }
            // EOF without newline: a truncated frame
            return Err(FrameError::UnexpectedEof);
        }

        while matches!(self.line.last(), Some(b'\n' | b'\r')) {
            self.line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.line).into_owned()))
    }

    /// Recover the underlying reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}
