//! # Readaloud Wire Protocol
//!
//! The Edge readaloud endpoint speaks a small header-framed protocol over
//! websocket messages:
//!
//! - **Inbound**: text frames made of `Name: value` header lines, a blank
//!   line, then a body. The `Path` header names the frame (`speech.config`,
//!   `ssml`). The `ssml` body is an SSML document.
//! - **Outbound**: `turn.start` (text), `audio` (binary, 2-byte big-endian
//!   header length + header + MP3 bytes), `turn.end` (text).
//!
//! ## Components:
//! - **frame**: inbound header parsing and outbound frame encoding
//! - **ssml**: extraction of voice, rate and text from the SSML body

pub mod frame;
pub mod ssml;

pub use frame::{FramePath, InboundFrame, OutboundFrame, WireMessage};
pub use ssml::SpeakRequest;

/// The single websocket endpoint readaloud clients connect to.
pub const READALOUD_PATH: &str = "/consumer/speech/synthesize/readaloud/edge/v1";
