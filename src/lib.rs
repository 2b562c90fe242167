//! # Edge Readaloud Bridge
//!
//! A websocket server that speaks the Edge "readaloud" protocol and answers
//! with speech from a locally hosted text-to-speech service.
//!
//! ## Request flow:
//! 1. **websocket**: accepts the upgrade and owns one session per connection
//! 2. **session**: waits for `speech.config` + `ssml`, then releases a turn
//! 3. **protocol**: parses inbound frames and the SSML body, encodes replies
//! 4. **tts**: backend HTTP fetch → ffmpeg transcode with tempo adjustment
//!
//! ## Supporting modules:
//! - **config**: defaults, `config.toml` and `APP_*` environment overrides
//! - **state**: shared config, synthesizer and counters
//! - **server** / **tls**: route table, CORS policy and certificate loading
//! - **health** / **middleware**: `/health`, request logging and counting
//! - **error**: session and HTTP error types

pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
pub mod tls;
pub mod tts;
pub mod websocket;

pub use config::AppConfig;
pub use error::{AppError, SessionError};
pub use state::AppState;
