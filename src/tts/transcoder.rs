//! # Audio Transcoder Adapter
//!
//! Converts the backend's WAV output into MP3 at the requested speed by
//! piping it through an external ffmpeg process:
//!
//! ```text
//! ffmpeg -y -f wav -i pipe:0 -filter:a atempo=<speed> -codec:a libmp3lame -qscale:a <q> -f mp3 pipe:1
//! ```
//!
//! ## Pipe handling:
//! stdin, stdout and stderr are all bounded pipes and ffmpeg converts
//! incrementally, so input is written while output is drained. Writing the
//! whole waveform first would stall once the stdout pipe fills up.

use crate::config::TranscoderConfig;
use crate::error::SessionError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

/// Slowest tempo passed to the conversion.
pub const MIN_SPEED: f64 = 0.5;
/// Fastest tempo passed to the conversion. A single `atempo` stage is not
/// reliable beyond this on the reference deployment.
pub const MAX_SPEED: f64 = 2.0;

/// Re-encodes a waveform at a given playback speed.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, waveform: Vec<u8>, speed: f64) -> Result<Vec<u8>, SessionError>;
}

/// Clamp a speed multiplier into `[MIN_SPEED, MAX_SPEED]`.
pub fn clamp_speed(speed: f64) -> f64 {
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

/// `Transcoder` backed by an ffmpeg-compatible executable.
pub struct FfmpegTranscoder {
    program: String,
    quality: u8,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            quality: config.quality,
            timeout: config.timeout(),
        }
    }

    /// Command line for one conversion. The speed is clamped first.
    pub fn args(&self, speed: f64) -> Vec<String> {
        let filter = format!("atempo={:.2}", clamp_speed(speed));
        let quality = self.quality.to_string();

        [
            "-y", "-f", "wav", "-i", "pipe:0", "-filter:a", filter.as_str(), "-codec:a", "libmp3lame",
            "-qscale:a", quality.as_str(), "-f", "mp3", "pipe:1",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, waveform: Vec<u8>, speed: f64) -> Result<Vec<u8>, SessionError> {
        let clamped = clamp_speed(speed);
        if clamped != speed {
            debug!(requested = speed, clamped, "Clamped playback speed");
        }

        let started = Instant::now();
        let input_len = waveform.len();
        let output = run_piped(&self.program, &self.args(clamped), waveform, self.timeout).await?;

        info!(
            input_bytes = input_len,
            output_bytes = output.len(),
            speed = clamped,
            duration_ms = %started.elapsed().as_millis(),
            "Transcoding completed"
        );

        Ok(output)
    }
}

/// Run `program`, feeding `input` to stdin while collecting stdout.
///
/// The child is killed if the timeout elapses or the future is dropped.
/// A non-zero exit wins over any pipe error so the diagnostic output from
/// stderr reaches the caller.
pub async fn run_piped(
    program: &str,
    args: &[String],
    input: Vec<u8>,
    timeout: Duration,
) -> Result<Vec<u8>, SessionError> {
    let failed = |exit_detail: String| SessionError::TranscodeFailed { exit_detail };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| failed(format!("failed to spawn {}: {}", program, err)))?;

    let mut stdin = child.stdin.take().ok_or_else(|| failed("stdin was not captured".to_string()))?;
    let mut stdout = child.stdout.take().ok_or_else(|| failed("stdout was not captured".to_string()))?;
    let mut stderr = child.stderr.take().ok_or_else(|| failed("stderr was not captured".to_string()))?;

    let writer = async move {
        let result = stdin.write_all(&input).await;
        // Dropping stdin closes the pipe so the child sees EOF.
        drop(stdin);
        result
    };

    let reader = async move {
        let mut output = Vec::new();
        stdout.read_to_end(&mut output).await.map(|_| output)
    };

    let diagnostics = async move {
        let mut output = Vec::new();
        stderr.read_to_end(&mut output).await.map(|_| output)
    };

    let conversion = async {
        let (written, output, diagnostics) = tokio::join!(writer, reader, diagnostics);
        let status = child.wait().await;
        (written, output, diagnostics, status)
    };

    let (written, output, diagnostics, status) = tokio::time::timeout(timeout, conversion)
        .await
        .map_err(|_| failed(format!("{} timed out after {:?}", program, timeout)))?;

    let status = status.map_err(|err| failed(format!("failed to wait for {}: {}", program, err)))?;
    let diagnostics = String::from_utf8_lossy(&diagnostics.unwrap_or_default()).trim().to_string();

    if !status.success() {
        return Err(failed(format!("{} ({}); stderr: {}", program, status, diagnostics)));
    }

    written.map_err(|err| failed(format!("failed to write input to {}: {}", program, err)))?;
    let output = output.map_err(|err| failed(format!("failed to read output of {}: {}", program, err)))?;

    if output.is_empty() {
        return Err(failed(format!("{} produced no output; stderr: {}", program, diagnostics)));
    }

    Ok(output)
}
