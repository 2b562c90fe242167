//! # Readaloud Session State Machine
//!
//! Tracks the handshake of one websocket connection and decides when to
//! synthesize. The websocket actor owns one `Session` and feeds it inbound
//! frames one at a time.
//!
//! ## Session Lifecycle:
//! 1. **AwaitingHandshake**: waiting for `speech.config` and `ssml` (either order)
//! 2. **Synthesizing**: both frames seen, backend + transcoder running
//! 3. **Responding**: turn.start / audio / turn.end being written
//! 4. **Closed**: connection finished (success, error or peer disconnect)
//!
//! One turn per connection: after responding the session closes.

use crate::error::SessionError;
use crate::protocol::{ssml, FramePath, InboundFrame, OutboundFrame, SpeakRequest, WireMessage};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Synthesizing,
    Responding,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::AwaitingHandshake => "awaiting_handshake",
            SessionState::Synthesizing => "synthesizing",
            SessionState::Responding => "responding",
            SessionState::Closed => "closed",
        }
    }
}

/// A synthesis request released by the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub request_id: String,
    pub speak: SpeakRequest,
}

impl Turn {
    /// The three response frames, in the order they must be written.
    pub fn frames(&self, audio: Vec<u8>) -> [OutboundFrame; 3] {
        [
            OutboundFrame::turn_start(self.request_id.as_str()),
            OutboundFrame::audio(self.request_id.as_str(), audio),
            OutboundFrame::turn_end(self.request_id.as_str()),
        ]
    }

    /// Encode all three frames up front so that nothing is written when any
    /// of them fails to encode.
    pub fn encode(&self, audio: Vec<u8>) -> Result<Vec<WireMessage>, SessionError> {
        self.frames(audio).iter().map(OutboundFrame::encode).collect()
    }
}

/// Handshake state of one connection.
#[derive(Debug)]
pub struct Session {
    connection_id: String,
    state: SessionState,
    config_received: bool,
    speak: Option<SpeakRequest>,
    request_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            state: SessionState::AwaitingHandshake,
            config_received: false,
            speak: None,
            request_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config_received(&self) -> bool {
        self.config_received
    }

    pub fn ssml_received(&self) -> bool {
        self.speak.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Feed one inbound frame.
    ///
    /// Returns the turn to synthesize once both handshake frames have been
    /// seen, `None` otherwise. The SSML body is parsed as soon as it arrives;
    /// a malformed body is an error and ends the session. Frames without a
    /// recognised `Path`, and any frame after the handshake completed, are
    /// ignored.
    pub fn observe(&mut self, frame: &InboundFrame) -> Result<Option<Turn>, SessionError> {
        if self.state != SessionState::AwaitingHandshake {
            debug!(
                connection_id = %self.connection_id,
                state = self.state.as_str(),
                "Ignoring frame after handshake"
            );
            return Ok(None);
        }

        match frame.path() {
            Some(FramePath::SpeechConfig) => {
                debug!(connection_id = %self.connection_id, "Received speech.config");
                self.config_received = true;
            }
            Some(FramePath::Ssml) => {
                let speak = ssml::extract(frame.body())?;
                debug!(connection_id = %self.connection_id, voice = %speak.voice_name, "Received ssml");
                self.request_id = frame
                    .header("X-RequestId")
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                self.speak = Some(speak);
            }
            Some(other @ FramePath::Other(_)) => {
                debug!(connection_id = %self.connection_id, path = other.as_str(), "Ignoring frame");
                return Ok(None);
            }
            None => {
                debug!(connection_id = %self.connection_id, "Ignoring frame without Path header");
                return Ok(None);
            }
        }

        if !self.config_received {
            return Ok(None);
        }

        let speak = match &self.speak {
            Some(speak) => speak.clone(),
            None => return Ok(None),
        };

        self.state = SessionState::Synthesizing;
        let request_id = self
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        Ok(Some(Turn { request_id, speak }))
    }

    /// Synthesis succeeded; frames are about to be written.
    pub fn begin_response(&mut self) {
        if self.state == SessionState::Synthesizing {
            self.state = SessionState::Responding;
        }
    }

    /// Move to `Closed`. Returns `true` only for the first call.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        true
    }
}
