//! # Backend TTS Client
//!
//! Fetches a synthesized waveform from the local text-to-speech service.
//!
//! ## HTTP Contract:
//! `GET <base>?text=<percent-encoded text>[&voice=<id>][&speaker=<id>]`
//! answers 2xx with the raw waveform (WAV) as the body. Anything else is an
//! error. One attempt per request, no retries.

use crate::config::BackendConfig;
use crate::error::SessionError;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

/// Source of synthesized waveforms.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Synthesize `text`, optionally asking for a specific voice.
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SessionError>;
}

/// `SpeechBackend` over the backend's URL-based HTTP API.
pub struct HttpSpeechBackend {
    client: reqwest::Client,
    base_url: String,
    voice: Option<String>,
    speaker: Option<String>,
    forward_ssml_voice: bool,
}

impl HttpSpeechBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.url.clone(),
            voice: config.voice.clone(),
            speaker: config.speaker.clone(),
            forward_ssml_voice: config.forward_ssml_voice,
        })
    }

    /// Build the request URL for `text`.
    ///
    /// Text is percent-encoded (space becomes `%20`). The SSML voice is only
    /// used when `forward_ssml_voice` is set; otherwise the configured voice
    /// (if any) is sent.
    pub fn request_url(&self, text: &str, ssml_voice: Option<&str>) -> String {
        let mut url = self.base_url.clone();
        url.push(if self.base_url.contains('?') { '&' } else { '?' });
        url.push_str("text=");
        url.push_str(&urlencoding::encode(text));

        let voice = if self.forward_ssml_voice {
            ssml_voice.or(self.voice.as_deref())
        } else {
            self.voice.as_deref()
        };

        if let Some(voice) = voice {
            url.push_str("&voice=");
            url.push_str(&urlencoding::encode(voice));
        }

        if let Some(speaker) = &self.speaker {
            url.push_str("&speaker=");
            url.push_str(&urlencoding::encode(speaker));
        }

        url
    }
}

#[async_trait]
impl SpeechBackend for HttpSpeechBackend {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>, SessionError> {
        let url = self.request_url(text, voice);
        let started = Instant::now();
        debug!(url = %url, "Requesting synthesis from backend");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| SessionError::BackendUnavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::BackendError(format!("backend answered HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| SessionError::BackendError(format!("failed to read backend response: {}", err)))?;

        if body.is_empty() {
            return Err(SessionError::BackendError("backend returned an empty body".to_string()));
        }

        info!(
            bytes = body.len(),
            duration_ms = %started.elapsed().as_millis(),
            "Backend synthesis completed"
        );

        Ok(body.to_vec())
    }
}
