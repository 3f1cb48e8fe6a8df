use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let active_sessions = state.registry().active_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": active_sessions
        },
        "providers": {
            "transcription": {
                "model": config.providers.deepgram.model,
                "configured": !config.providers.deepgram.api_key.is_empty()
            },
            "generation": {
                "model": config.providers.openrouter.model,
                "configured": !config.providers.openrouter.api_key.is_empty()
            },
            "synthesis": {
                "model": config.providers.cartesia.model_id,
                "voice": config.providers.cartesia.voice_id,
                "configured": !config.providers.cartesia.api_key.is_empty()
            }
        },
        "system": get_system_status(&config, active_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let registry = state.registry();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let now = chrono::Utc::now();
    let mut session_stats = Vec::new();
    for session in registry.active_sessions() {
        session_stats.push(json!({
            "connection_id": session.connection_id,
            "created_at": session.created_at.to_rfc3339(),
            "age_seconds": (now - session.created_at).num_seconds()
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": now.to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": registry.active_count(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "sessions": session_stats,
        "limits": {
            "max_concurrent_sessions": state.get_config().session.max_concurrent_sessions
        }
    }))
}

fn get_system_status(config: &crate::config::AppConfig, active_sessions: usize) -> serde_json::Value {
    let session_usage = if config.session.max_concurrent_sessions > 0 {
        active_sessions as f64 / config.session.max_concurrent_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": config.session.max_concurrent_sessions,
        "current_sessions": active_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}
