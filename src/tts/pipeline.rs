//! # Synthesis Pipeline
//!
//! Turns a parsed [`SpeakRequest`] into MP3 bytes, strictly in sequence:
//! rate parsing → backend synthesis → transcoding. The first failure ends
//! the pipeline; nothing is retried.

use crate::error::SessionError;
use crate::protocol::SpeakRequest;
use crate::tts::backend::SpeechBackend;
use crate::tts::transcoder::Transcoder;
use std::sync::Arc;
use tracing::debug;

/// Shared by every session; holds no per-session state.
#[derive(Clone)]
pub struct Synthesizer {
    backend: Arc<dyn SpeechBackend>,
    transcoder: Arc<dyn Transcoder>,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn SpeechBackend>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { backend, transcoder }
    }

    /// Produce the audio for one turn.
    ///
    /// The rate is parsed before the backend is called so an unusable rate
    /// costs no synthesis work.
    pub async fn render(&self, request: &SpeakRequest) -> Result<Vec<u8>, SessionError> {
        let speed = request.speed_multiplier()?;
        debug!(speed, "Parsed prosody rate");

        let waveform = self
            .backend
            .synthesize(&request.text, Some(&request.voice_name))
            .await?;

        self.transcoder.transcode(waveform, speed).await
    }
}
