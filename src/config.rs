//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! Provider credentials come from the conventional unprefixed variables
//! (`DEEPGRAM_API_KEY`, `OPENROUTER_API_KEY`, `CARTESIA_API_KEY`). Missing
//! credentials do not prevent the server from starting; they fail session
//! initialization instead, so health endpoints stay reachable.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, DEEPGRAM_API_KEY, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub providers: ProvidersConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Per-session behavior and limits.
///
/// ## Fields:
/// - `max_concurrent_sessions`: cap on simultaneously initialized voice sessions
/// - `keepalive_interval_secs`: how often the transcription keep-alive fires
/// - `min_audio_frame_bytes`: binary frames below this size are discarded as
///   non-audio control noise; must stay even so frames align to 16-bit samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_concurrent_sessions: usize,
    pub keepalive_interval_secs: u64,
    pub min_audio_frame_bytes: usize,
}

/// Settings for the three external providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub deepgram: DeepgramConfig,
    pub openrouter: OpenRouterConfig,
    pub cartesia: CartesiaConfig,
}

/// Live-transcription settings.
///
/// `endpointing_ms` controls how much trailing silence marks a speech-final
/// transcript; `utterance_end_ms` is the longer gap after which the provider
/// declares the whole utterance over even without a speech-final result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepgramConfig {
    pub api_key: String,
    pub model: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub endpointing_ms: u32,
    pub utterance_end_ms: u32,
}

/// Language-model generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
}

/// Speech-synthesis settings.
///
/// `convert_to_wav` wraps each raw PCM chunk in a WAV container before relay,
/// for clients that cannot play headerless `pcm_f32le`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartesiaConfig {
    pub api_key: String,
    pub version: String,
    pub model_id: String,
    pub voice_id: String,
    pub language: String,
    pub sample_rate: u32,
    pub convert_to_wav: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            session: SessionConfig {
                max_concurrent_sessions: 10,
                keepalive_interval_secs: 10,
                min_audio_frame_bytes: 100,
            },
            providers: ProvidersConfig {
                deepgram: DeepgramConfig {
                    api_key: String::new(),
                    model: "nova-3".to_string(),
                    sample_rate: 44100,
                    channels: 1,
                    endpointing_ms: 200,
                    utterance_end_ms: 1000,
                },
                openrouter: OpenRouterConfig {
                    api_key: String::new(),
                    model: "openai/gpt-4o".to_string(),
                },
                cartesia: CartesiaConfig {
                    api_key: String::new(),
                    version: "2024-06-10".to_string(),
                    model_id: "sonic-2".to_string(),
                    voice_id: "a0e99841-438c-4a64-b679-ae501e7d6091".to_string(),
                    language: "en".to_string(),
                    sample_rate: 44100,
                    convert_to_wav: false,
                },
            },
        }
    }
}

impl ProvidersConfig {
    /// Names of the credential environment variables that are still unset.
    /// Session initialization refuses to proceed while this is non-empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.deepgram.api_key.is_empty() {
            missing.push("DEEPGRAM_API_KEY");
        }
        if self.openrouter.api_key.is_empty() {
            missing.push("OPENROUTER_API_KEY");
        }
        if self.cartesia.api_key.is_empty() {
            missing.push("CARTESIA_API_KEY");
        }
        missing
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the unprefixed HOST/PORT and provider credential variables
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Example: APP_SERVER_HOST becomes server.host in the config
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Provider credentials follow each provider's conventional variable
        if let Ok(key) = env::var("DEEPGRAM_API_KEY") {
            settings = settings.set_override("providers.deepgram.api_key", key)?;
        }
        if let Ok(key) = env::var("OPENROUTER_API_KEY") {
            settings = settings.set_override("providers.openrouter.api_key", key)?;
        }
        if let Ok(key) = env::var("CARTESIA_API_KEY") {
            settings = settings.set_override("providers.cartesia.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        if self.session.keepalive_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Keep-alive interval must be greater than 0"
            ));
        }

        if self.session.min_audio_frame_bytes < 2 || self.session.min_audio_frame_bytes % 2 != 0 {
            return Err(anyhow::anyhow!(
                "Minimum audio frame size must be a positive even number of bytes"
            ));
        }

        if self.providers.deepgram.sample_rate == 0 || self.providers.cartesia.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.providers.deepgram.channels == 0 {
            return Err(anyhow::anyhow!("Channel count must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. Credentials are not
    /// updatable at runtime; they come from the environment only.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(session) = partial_config.get("session") {
            if let Some(sessions) = session
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.session.max_concurrent_sessions = sessions as usize;
            }
            if let Some(interval) = session
                .get("keepalive_interval_secs")
                .and_then(|v| v.as_u64())
            {
                self.session.keepalive_interval_secs = interval;
            }
        }

        if let Some(providers) = partial_config.get("providers") {
            if let Some(deepgram) = providers.get("deepgram") {
                if let Some(model) = deepgram.get("model").and_then(|v| v.as_str()) {
                    self.providers.deepgram.model = model.to_string();
                }
            }
            if let Some(openrouter) = providers.get("openrouter") {
                if let Some(model) = openrouter.get("model").and_then(|v| v.as_str()) {
                    self.providers.openrouter.model = model.to_string();
                }
            }
            if let Some(cartesia) = providers.get("cartesia") {
                if let Some(voice) = cartesia.get("voice_id").and_then(|v| v.as_str()) {
                    self.providers.cartesia.voice_id = voice.to_string();
                }
                if let Some(model) = cartesia.get("model_id").and_then(|v| v.as_str()) {
                    self.providers.cartesia.model_id = model.to_string();
                }
                if let Some(convert) = cartesia.get("convert_to_wav").and_then(|v| v.as_bool()) {
                    self.providers.cartesia.convert_to_wav = convert;
                }
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.providers.deepgram.model, "nova-3");
        assert_eq!(config.providers.deepgram.sample_rate, 44100);
        assert_eq!(config.providers.cartesia.version, "2024-06-10");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.min_audio_frame_bytes = 99;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{
            "server": {"port": 9090},
            "providers": {"cartesia": {"voice_id": "custom-voice", "convert_to_wav": true}}
        }"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.providers.cartesia.voice_id, "custom-voice");
        assert!(config.providers.cartesia.convert_to_wav);
        // Untouched fields keep their values
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.providers.openrouter.model, "openai/gpt-4o");
    }

    #[test]
    fn test_update_cannot_set_credentials() {
        let mut config = AppConfig::default();
        let json = r#"{"providers": {"deepgram": {"api_key": "sneaky"}}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert!(config.providers.deepgram.api_key.is_empty());
    }

    #[test]
    fn test_missing_credentials_reported_by_name() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.providers.missing_credentials(),
            vec!["DEEPGRAM_API_KEY", "OPENROUTER_API_KEY", "CARTESIA_API_KEY"]
        );

        config.providers.deepgram.api_key = "dg".to_string();
        config.providers.cartesia.api_key = "ca".to_string();
        assert_eq!(
            config.providers.missing_credentials(),
            vec!["OPENROUTER_API_KEY"]
        );
    }
}
