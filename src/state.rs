//! # Application State Management
//!
//! State shared by every HTTP request and websocket session.
//!
//! ## What is shared:
//! - **config**: created once at startup, read-only afterwards
//! - **synthesizer**: backend client + transcoder, stateless per request
//! - **metrics**: process-wide counters
//!
//! Sessions never share mutable state with each other; the only writes
//! here are counter updates, which are lock-free atomics.

use crate::config::AppConfig;
use crate::tts::Synthesizer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub synthesizer: Synthesizer,
    pub metrics: Arc<AppMetrics>,
    pub start_time: Instant,
}

/// Counters exposed on `/health`.
#[derive(Debug, Default)]
pub struct AppMetrics {
    request_count: AtomicU64,
    error_count: AtomicU64,
    active_sessions: AtomicU64,
    completed_turns: AtomicU64,
    failed_sessions: AtomicU64,
}

/// Point-in-time copy of [`AppMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: u64,
    pub completed_turns: u64,
    pub failed_sessions: u64,
}

impl AppState {
    pub fn new(config: AppConfig, synthesizer: Synthesizer) -> Self {
        Self {
            config: Arc::new(config),
            synthesizer,
            metrics: Arc::new(AppMetrics::default()),
            start_time: Instant::now(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn increment_request_count(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_error_count(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Never underflows, even if a close is reported twice.
    pub fn session_closed(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| active.checked_sub(1));
    }

    pub fn turn_completed(&self) {
        self.completed_turns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_failed(&self) {
        self.failed_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            completed_turns: self.completed_turns.load(Ordering::Relaxed),
            failed_sessions: self.failed_sessions.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Share of HTTP requests that ended in an error (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
