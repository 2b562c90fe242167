//! # Speech Synthesis
//!
//! Everything between a parsed SSML request and the MP3 bytes sent back to
//! the client.
//!
//! ## Key Components:
//! - **backend**: HTTP client for the local text-to-speech service
//! - **transcoder**: WAV → MP3 conversion with tempo adjustment (ffmpeg)
//! - **pipeline**: the sequential rate → synthesize → transcode chain

pub mod backend;
pub mod pipeline;
pub mod transcoder;

pub use backend::{HttpSpeechBackend, SpeechBackend};
pub use pipeline::Synthesizer;
pub use transcoder::{clamp_speed, FfmpegTranscoder, Transcoder};
