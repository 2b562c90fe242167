//! # Frame Codec
//!
//! Inbound frames are classified by their `Path` header, parsed from the
//! header block only. A body that happens to contain `Path: ssml` does not
//! turn a frame into an SSML frame.
//!
//! Outbound frames are encoded byte-exact to what readaloud clients expect:
//!
//! ```text
//! turn.start  (text)    Path: turn.start\r\nX-RequestId: <id>\r\nX-Timestamp: <ts>\r\n\r\n{}
//! audio       (binary)  [u16 BE header length][Path: audio\r\nContent-Type: audio/mpeg\r\n...\r\n\r\n][mp3]
//! turn.end    (text)    Path: turn.end\r\nX-RequestId: <id>\r\nX-Timestamp: <ts>\r\n\r\n{}
//! ```

use crate::error::SessionError;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use chrono::{DateTime, Utc};
use std::io::Cursor;

/// RFC 1123 timestamp layout, always rendered in GMT.
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Content type announced in the audio frame header.
pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// Declared name of an inbound frame (value of its `Path` header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePath {
    SpeechConfig,
    Ssml,
    Other(String),
}

impl FramePath {
    fn from_value(value: &str) -> Self {
        match value {
            "speech.config" => FramePath::SpeechConfig,
            "ssml" => FramePath::Ssml,
            other => FramePath::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FramePath::SpeechConfig => "speech.config",
            FramePath::Ssml => "ssml",
            FramePath::Other(other) => other,
        }
    }
}

/// A parsed inbound message: header lines plus the body behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    headers: Vec<(String, String)>,
    path: Option<FramePath>,
    body: String,
}

impl InboundFrame {
    /// Parse a text message.
    ///
    /// The header block ends at the first blank line (`\r\n\r\n`, or `\n\n`
    /// from sloppy clients). A message without a blank line is all header.
    pub fn parse(message: &str) -> Self {
        let (head, body) = split_header_block(message);
        Self::from_parts(head, body.to_string())
    }

    /// Parse a binary message using the 2-byte length-prefixed header layout.
    ///
    /// Returns `None` when the prefix is missing, points past the end of the
    /// message, or the header block is not UTF-8.
    pub fn parse_binary(data: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(data);
        let header_len = cursor.read_u16::<BigEndian>().ok()? as usize;
        let header = data.get(2..2 + header_len)?;
        let head = std::str::from_utf8(header).ok()?;
        let body = String::from_utf8_lossy(&data[2 + header_len..]).into_owned();
        Some(Self::from_parts(head, body))
    }

    fn from_parts(head: &str, body: String) -> Self {
        let headers: Vec<(String, String)> = head.lines().filter_map(parse_header_line).collect();
        let path = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Path"))
            .map(|(_, value)| FramePath::from_value(value));

        Self { headers, path, body }
    }

    pub fn path(&self) -> Option<&FramePath> {
        self.path.as_ref()
    }

    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

fn split_header_block(message: &str) -> (&str, &str) {
    let crlf = message.find("\r\n\r\n").map(|index| (index, 4));
    let lf = message.find("\n\n").map(|index| (index, 2));

    let separator = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match separator {
        Some((index, len)) => (&message[..index], &message[index + len..]),
        None => (message, ""),
    }
}

fn parse_header_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.trim_end_matches('\r').split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Encoded frame, ready to be written to the websocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// The three frames of a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    TurnStart {
        request_id: String,
        timestamp: DateTime<Utc>,
    },
    Audio {
        request_id: String,
        timestamp: DateTime<Utc>,
        content_type: String,
        payload: Vec<u8>,
    },
    TurnEnd {
        request_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundFrame {
    pub fn turn_start(request_id: impl Into<String>) -> Self {
        OutboundFrame::TurnStart {
            request_id: request_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn audio(request_id: impl Into<String>, payload: Vec<u8>) -> Self {
        OutboundFrame::Audio {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            content_type: AUDIO_CONTENT_TYPE.to_string(),
            payload,
        }
    }

    pub fn turn_end(request_id: impl Into<String>) -> Self {
        OutboundFrame::TurnEnd {
            request_id: request_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize the frame into its websocket message.
    ///
    /// Fails with `FrameTooLarge` when the audio header block does not fit
    /// the 16-bit length prefix (only reachable with an oversized request id).
    pub fn encode(&self) -> Result<WireMessage, SessionError> {
        match self {
            OutboundFrame::TurnStart { request_id, timestamp } => {
                Ok(WireMessage::Text(control_frame("turn.start", request_id, timestamp)))
            }
            OutboundFrame::TurnEnd { request_id, timestamp } => {
                Ok(WireMessage::Text(control_frame("turn.end", request_id, timestamp)))
            }
            OutboundFrame::Audio {
                request_id,
                timestamp,
                content_type,
                payload,
            } => {
                let header = format!(
                    "Path: audio\r\nContent-Type: {}\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\n\r\n",
                    content_type,
                    request_id,
                    format_timestamp(timestamp)
                );
                let header_len =
                    u16::try_from(header.len()).map_err(|_| SessionError::FrameTooLarge(header.len()))?;

                let mut prefix = [0u8; 2];
                BigEndian::write_u16(&mut prefix, header_len);

                let mut buf = Vec::with_capacity(2 + header.len() + payload.len());
                buf.extend_from_slice(&prefix);
                buf.extend_from_slice(header.as_bytes());
                buf.extend_from_slice(payload);
                Ok(WireMessage::Binary(buf))
            }
        }
    }
}

fn control_frame(path: &str, request_id: &str, timestamp: &DateTime<Utc>) -> String {
    format!(
        "Path: {}\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\n\r\n{{}}",
        path,
        request_id,
        format_timestamp(timestamp)
    )
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}
