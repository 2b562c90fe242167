//! # Configuration Management
//!
//! Loads the bridge configuration from multiple sources:
//! - Default values (built into the code)
//! - An optional TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platform conventions)
//! 2. Environment variables (APP_SERVER__PORT, APP_BACKEND__URL, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The configuration is created once at startup and shared read-only with
//! every connection through the application state.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default bound on one inbound websocket frame (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub upgrade: UpgradeConfig,
    pub backend: BackendConfig,
    pub transcoder: TranscoderConfig,
}

/// Listener address.
///
/// The readaloud clients expect `wss://speech.platform.bing.com`, so the
/// production setup binds 443 and redirects the hostname locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// TLS termination settings.
///
/// ## Fields:
/// - `enabled`: serve `wss://` (true) or plain `ws://` (false, e.g. behind a proxy)
/// - `cert_path`: PEM certificate chain
/// - `key_path`: PEM private key (PKCS#8, PKCS#1 or SEC1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: String,
    pub key_path: String,
}

/// Websocket upgrade policy.
///
/// Edge clients connect from a browser extension origin, so the default
/// accepts any origin. Set `allow_any_origin = false` and list the
/// permitted origins to lock the endpoint down.
///
/// `max_frame_bytes` bounds a single inbound websocket frame. Long
/// articles arrive as one `ssml` frame, so the default is far above the
/// 64 KiB the websocket codec would otherwise allow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    pub allow_any_origin: bool,
    pub allowed_origins: Vec<String>,
    pub max_frame_bytes: usize,
}

/// Backend text-to-speech service.
///
/// ## Fields:
/// - `url`: endpoint receiving `?text=...` (may already carry a query)
/// - `voice` / `speaker`: optional fixed selection parameters
/// - `forward_ssml_voice`: send the voice name from the SSML request as `voice`
/// - `timeout_secs`: bound on the whole request including the body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub voice: Option<String>,
    pub speaker: Option<String>,
    pub forward_ssml_voice: bool,
    pub timeout_secs: u64,
}

/// External audio transcoder (ffmpeg compatible command line).
///
/// `quality` is the libmp3lame VBR quality (`-qscale:a`, 0 = best, 9 = worst).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub program: String,
    pub quality: u8,
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 443,
            },
            tls: TlsConfig {
                enabled: true,
                cert_path: "speech.platform.bing.com.pem".to_string(),
                key_path: "speech.platform.bing.com-key.pem".to_string(),
            },
            upgrade: UpgradeConfig {
                allow_any_origin: true,
                allowed_origins: Vec::new(),
                max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            },
            backend: BackendConfig {
                url: "http://localhost:5000/api/text-to-speech".to_string(),
                voice: None,
                speaker: None,
                forward_ssml_voice: false,
                timeout_secs: 30,
            },
            transcoder: TranscoderConfig {
                program: "ffmpeg".to_string(),
                quality: 2,
                timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8443`: override the listener port
    /// - `APP_TLS__ENABLED=false`: serve plain websockets
    /// - `APP_BACKEND__URL=http://tts:5000/api/text-to-speech`
    /// - `APP_BACKEND__VOICE=en_US-lessac-high`
    /// - `HOST=0.0.0.0` / `PORT=8443`: platform shortcuts
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("upgrade.allowed_origins"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings
            .build()
            .context("Failed to assemble configuration sources")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        Ok(config)
    }

    /// Check that the configuration can actually serve requests.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.tls.enabled && (self.tls.cert_path.is_empty() || self.tls.key_path.is_empty()) {
            return Err(anyhow!("TLS is enabled but cert_path or key_path is empty"));
        }

        if self.upgrade.max_frame_bytes == 0 {
            return Err(anyhow!("Upgrade max_frame_bytes must be greater than 0"));
        }

        reqwest::Url::parse(&self.backend.url)
            .with_context(|| format!("Invalid backend url {:?}", self.backend.url))?;

        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("Backend timeout must be greater than 0"));
        }

        if self.transcoder.program.trim().is_empty() {
            return Err(anyhow!("Transcoder program cannot be empty"));
        }

        if self.transcoder.quality > 9 {
            return Err(anyhow!(
                "Transcoder quality must be within 0..=9, got {}",
                self.transcoder.quality
            ));
        }

        if self.transcoder.timeout_secs == 0 {
            return Err(anyhow!("Transcoder timeout must be greater than 0"));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TranscoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl UpgradeConfig {
    /// Whether a websocket upgrade carrying this `Origin` header may proceed.
    ///
    /// Requests without an `Origin` header (native clients) are always allowed.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allow_any_origin => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
        }
    }
}
