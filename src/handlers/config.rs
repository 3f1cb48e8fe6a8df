use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Credentials are reported by presence only, never echoed back.
fn masked_key(key: &str) -> &'static str {
    if key.is_empty() {
        "unset"
    } else {
        "configured"
    }
}

fn config_view(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "session": {
            "max_concurrent_sessions": config.session.max_concurrent_sessions,
            "keepalive_interval_secs": config.session.keepalive_interval_secs,
            "min_audio_frame_bytes": config.session.min_audio_frame_bytes
        },
        "providers": {
            "deepgram": {
                "api_key": masked_key(&config.providers.deepgram.api_key),
                "model": config.providers.deepgram.model,
                "sample_rate": config.providers.deepgram.sample_rate,
                "channels": config.providers.deepgram.channels,
                "endpointing_ms": config.providers.deepgram.endpointing_ms,
                "utterance_end_ms": config.providers.deepgram.utterance_end_ms
            },
            "openrouter": {
                "api_key": masked_key(&config.providers.openrouter.api_key),
                "model": config.providers.openrouter.model
            },
            "cartesia": {
                "api_key": masked_key(&config.providers.cartesia.api_key),
                "model_id": config.providers.cartesia.model_id,
                "voice_id": config.providers.cartesia.voice_id,
                "language": config.providers.cartesia.language,
                "sample_rate": config.providers.cartesia.sample_rate,
                "convert_to_wav": config.providers.cartesia.convert_to_wav
            }
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_config_view_masks_credentials() {
        let mut config = AppConfig::default();
        config.providers.deepgram.api_key = "dg-secret".to_string();

        let view = config_view(&config);
        assert_eq!(view["providers"]["deepgram"]["api_key"], "configured");
        assert_eq!(view["providers"]["openrouter"]["api_key"], "unset");
        assert!(view.to_string().find("dg-secret").is_none());
    }
}
