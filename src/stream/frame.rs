// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! STOMP 1.2 frame codec.
//!
//! # Wire Format
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! <body>\0
//! ```
//!
//! The body ends at the NUL byte, never at `content-length`. The upstream
//! server sends `content-length` values that do not match the body, so the
//! header is dropped on decode and never emitted on encode. A lone EOL
//! (`\n` or `\r\n`) between frames is a heartbeat.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::FrameError;

const NUL: char = '\0';
const CONTENT_LENGTH: &str = "content-length";

/// Protocol version sent in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2";

/// Largest frame the decoder will buffer (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
    Other(String),
}

impl Command {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Other(s) => s,
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "CONNECT" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: Command,
    /// In wire order. Repeated headers keep the first value on lookup.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire text, including the trailing NUL.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
                continue;
            }
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Parse one frame from its text without the NUL terminator.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Err(FrameError::MissingCommand);
        }

        let (command_line, mut rest) = split_line(text).ok_or(FrameError::UnterminatedHeaders)?;
        if command_line.is_empty() {
            return Err(FrameError::MissingCommand);
        }
        let command = Command::parse(command_line);
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let (line, after) = split_line(rest).ok_or(FrameError::UnterminatedHeaders)?;
            rest = after;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            let (name, value) = if unescape {
                (unescape_header(name)?, unescape_header(value)?)
            } else {
                (name.to_string(), value.to_string())
            };
            if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
                debug!(command = %command, declared = %value, "Ignoring content-length header");
                continue;
            }
            headers.push((name, value));
        }

        Ok(Self {
            command,
            headers,
            body: rest.to_string(),
        })
    }
}

/// Split off one line, accepting `\n` or `\r\n`.
fn split_line(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('\n')?;
    let line = &s[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &s[idx + 1..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

/// Output of [`FrameDecoder::next_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Heartbeat,
    Frame(StompFrame),
}

/// Reassembles frames from transport messages.
///
/// A transport message may hold part of a frame, one frame, several frames,
/// or heartbeats mixed in between. Text is buffered until a NUL arrives, up
/// to a size limit.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: String,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }

    /// Decoder rejecting frames longer than `limit` bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    /// Bytes waiting for a terminator.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete unit, or `None` if more input is needed.
    ///
    /// A malformed frame is consumed, so decoding can continue after the error.
    /// Once more than `limit` bytes are pending without a terminator, the
    /// buffer is discarded and [`FrameError::TooLarge`] returned.
    pub fn next_frame(&mut self) -> Option<Result<Decoded, FrameError>> {
        if self.buf.starts_with("\r\n") {
            self.buf.drain(..2);
            return Some(Ok(Decoded::Heartbeat));
        }
        if self.buf.starts_with('\n') {
            self.buf.drain(..1);
            return Some(Ok(Decoded::Heartbeat));
        }

        let Some(end) = self.buf.find(NUL) else {
            if self.buf.len() > self.limit {
                self.buf.clear();
                return Some(Err(FrameError::TooLarge { limit: self.limit }));
            }
            return None;
        };
        let frame: String = self.buf.drain(..=end).collect();
        if end > self.limit {
            return Some(Err(FrameError::TooLarge { limit: self.limit }));
        }
        Some(StompFrame::parse(&frame[..end]).map(Decoded::Frame))
    }
}

/// `heart-beat` header value: `"<cx>,<cy>"` in milliseconds.
#[must_use]
pub fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Negotiated `(outgoing, incoming)` intervals in ms, 0 meaning none.
///
/// `client` is what we sent in CONNECT, `server` what came back in CONNECTED.
#[must_use]
pub fn negotiate_heart_beat(client: (u64, u64), server: (u64, u64)) -> (u64, u64) {
    let (cx, cy) = client;
    let (sx, sy) = server;
    let outgoing = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
    let incoming = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };
    (outgoing, incoming)
}

#[must_use]
pub fn connect_frame(heartbeat_ms: u64) -> StompFrame {
    StompFrame::new(Command::Connect)
        .header("accept-version", ACCEPT_VERSION)
        .header("heart-beat", format!("{},{}", heartbeat_ms, heartbeat_ms))
}

#[must_use]
pub fn subscribe_frame(id: &str, destination: &str, metadata: &BTreeMap<String, String>) -> StompFrame {
    let mut frame = StompFrame::new(Command::Subscribe)
        .header("id", id)
        .header("destination", destination);
    for (name, value) in metadata {
        frame = frame.header(name.as_str(), value.as_str());
    }
    frame
}

#[must_use]
pub fn disconnect_frame() -> StompFrame {
    StompFrame::new(Command::Disconnect)
}
