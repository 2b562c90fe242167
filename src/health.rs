use crate::state::{AppState, MetricsSnapshot};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics.snapshot();
    let config = &state.config;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port,
            "tls": config.tls.enabled
        },
        "metrics": metrics_json(&metrics),
        "memory": get_memory_info(),
        "synthesis": {
            "backend_url": config.backend.url,
            "backend_timeout_secs": config.backend.timeout_secs,
            "transcoder": config.transcoder.program,
            "transcoder_timeout_secs": config.transcoder.timeout_secs
        }
    }))
}

fn metrics_json(metrics: &MetricsSnapshot) -> serde_json::Value {
    json!({
        "total_requests": metrics.request_count,
        "total_errors": metrics.error_count,
        "error_rate": metrics.error_rate(),
        "active_sessions": metrics.active_sessions,
        "completed_turns": metrics.completed_turns,
        "failed_sessions": metrics.failed_sessions
    })
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map_or(0, |kb| kb * 1024)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}
