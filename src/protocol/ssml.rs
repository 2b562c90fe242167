//! # SSML Extractor
//!
//! Pulls the voice name, prosody rate and text out of the body of an `ssml`
//! frame. Readaloud clients send documents shaped like:
//!
//! ```xml
//! <speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='en-US'>
//!   <voice name='en-US-AriaNeural'>
//!     <prosody pitch='+0Hz' rate='+0%' volume='+0%'>Hello world</prosody>
//!   </voice>
//! </speak>
//! ```
//!
//! Attributes other than `name` and `rate` are ignored. The first `voice`
//! under `speak` and the first `prosody` under that voice are used; any
//! further ones are skipped. Text inside nested markup such as
//! `<break/>` or `<emphasis>` is kept, the tags themselves are dropped.

use crate::error::SessionError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Display;
use tracing::debug;

/// The synthesis request carried by one SSML frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    pub voice_name: String,
    /// Raw `rate` attribute, see [`parse_rate`].
    pub prosody_rate: String,
    /// Prosody text with surrounding whitespace removed.
    pub text: String,
}

/// Role of an open element in the speak → voice → prosody chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Speak,
    Voice,
    Prosody,
    Other,
}

#[derive(Debug, Default)]
struct Collected {
    voice_name: Option<String>,
    rate: Option<String>,
    text: String,
    root_closed: bool,
}

fn malformed(err: impl Display) -> SessionError {
    SessionError::MalformedPayload(err.to_string())
}

fn required_attribute(element: &BytesStart, name: &str) -> Result<String, SessionError> {
    let attribute = element
        .try_get_attribute(name)
        .map_err(malformed)?
        .ok_or_else(|| {
            malformed(format!(
                "<{}> is missing the {} attribute",
                String::from_utf8_lossy(element.local_name().as_ref()),
                name
            ))
        })?;
    Ok(attribute.unescape_value().map_err(malformed)?.into_owned())
}

impl Collected {
    /// Classify a newly opened element given the scope of its parent.
    fn open(&mut self, parent: Option<Scope>, element: &BytesStart) -> Result<Scope, SessionError> {
        let name = element.local_name();
        let name = name.as_ref();

        match parent {
            None if self.root_closed => Err(malformed("content after the root element")),
            None if name == b"speak" => Ok(Scope::Speak),
            None => Err(malformed(format!(
                "root element is <{}>, expected <speak>",
                String::from_utf8_lossy(name)
            ))),
            Some(Scope::Speak) if name == b"voice" && self.voice_name.is_none() => {
                self.voice_name = Some(required_attribute(element, "name")?);
                Ok(Scope::Voice)
            }
            Some(Scope::Voice) if name == b"prosody" && self.rate.is_none() => {
                self.rate = Some(required_attribute(element, "rate")?);
                Ok(Scope::Prosody)
            }
            Some(Scope::Prosody) => Ok(Scope::Prosody),
            Some(_) => Ok(Scope::Other),
        }
    }
}

/// Parse the SSML body of a frame into a [`SpeakRequest`].
///
/// ## Errors:
/// `MalformedPayload` when the body is not well-formed XML, its root is not
/// `speak`, it lacks the speak → voice → prosody structure, or the prosody
/// carries no text.
pub fn extract(payload: &str) -> Result<SpeakRequest, SessionError> {
    let mut reader = Reader::from_str(payload.trim());
    let mut stack: Vec<Scope> = Vec::new();
    let mut collected = Collected::default();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(element) => {
                let scope = collected.open(stack.last().copied(), &element)?;
                stack.push(scope);
            }
            Event::Empty(element) => {
                collected.open(stack.last().copied(), &element)?;
                if stack.is_empty() {
                    collected.root_closed = true;
                }
            }
            Event::End(_) => {
                stack.pop();
                if stack.is_empty() {
                    collected.root_closed = true;
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?;
                if stack.last() == Some(&Scope::Prosody) {
                    collected.text.push_str(&text);
                } else if stack.is_empty() && !text.trim().is_empty() {
                    return Err(malformed("text outside the root element"));
                }
            }
            Event::CData(data) => {
                if stack.last() == Some(&Scope::Prosody) {
                    collected.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(malformed("document ends inside an open element"));
    }
    if !collected.root_closed {
        return Err(malformed("no <speak> element"));
    }

    let voice_name = collected.voice_name.ok_or_else(|| malformed("<speak> has no <voice> element"))?;
    let prosody_rate = collected.rate.ok_or_else(|| malformed("<voice> has no <prosody> element"))?;

    let text = collected.text.trim().to_string();
    if text.is_empty() {
        return Err(malformed("prosody element carries no text"));
    }

    let request = SpeakRequest {
        voice_name,
        prosody_rate,
        text,
    };

    debug!(
        voice = %request.voice_name,
        rate = %request.prosody_rate,
        text = %request.text,
        "Extracted speak request"
    );

    Ok(request)
}

impl SpeakRequest {
    /// Playback speed requested by the client, see [`parse_rate`].
    pub fn speed_multiplier(&self) -> Result<f64, SessionError> {
        parse_rate(&self.prosody_rate)
    }
}

/// Convert a prosody rate into a speed multiplier.
///
/// Accepts a plain multiplier (`1.0`, `1.25`) or the relative percentage
/// form Edge clients emit (`+0%`, `+50%` → 1.5, `-25%` → 0.75). The result
/// is not clamped here; the transcoder clamps to its supported range.
pub fn parse_rate(rate: &str) -> Result<f64, SessionError> {
    let trimmed = rate.trim();

    let value = match trimmed.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok().map(|pct| 1.0 + pct / 100.0),
        None => trimmed.parse::<f64>().ok(),
    };

    match value {
        Some(multiplier) if multiplier.is_finite() => Ok(multiplier),
        _ => Err(SessionError::RateParseFailed(rate.to_string())),
    }
}
