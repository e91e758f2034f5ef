use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Invalid endpoint URL in {var}: {reason}")]
    InvalidEndpoint { var: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

const DEFAULT_STT_ENDPOINT: &str = "https://api.voiceloop.dev/v1/transcribe";
const DEFAULT_TTS_ENDPOINT: &str = "https://api.voiceloop.dev/v1/synthesize";

/// Configuration for the remote speech services.
#[derive(Debug)]
pub struct ApiConfig {
    pub stt_key: SecretBox<String>,
    pub tts_key: SecretBox<String>,
    pub stt_endpoint: Url,
    pub tts_endpoint: Url,
}

impl ApiConfig {
    /// Load API configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let stt_key = Self::load_api_key("TRANSCRIBE_API_KEY", "Transcription")?;
        let tts_key = Self::load_api_key("TTS_API_KEY", "Text-to-speech")?;
        let stt_endpoint = Self::load_endpoint("TRANSCRIBE_ENDPOINT", DEFAULT_STT_ENDPOINT)?;
        let tts_endpoint = Self::load_endpoint("TTS_ENDPOINT", DEFAULT_TTS_ENDPOINT)?;

        Ok(Self {
            stt_key,
            tts_key,
            stt_endpoint,
            tts_endpoint,
        })
    }

    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }
        if key.len() < 10 {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key should be at least 10 characters".to_string(),
            });
        }

        Ok(SecretBox::new(Box::new(key)))
    }

    fn load_endpoint(env_var: &str, default: &str) -> Result<Url, ConfigError> {
        let raw = env::var(env_var).unwrap_or_else(|_| default.to_string());
        Url::parse(&raw).map_err(|e| ConfigError::InvalidEndpoint {
            var: env_var.to_string(),
            reason: e.to_string(),
        })
    }

    /// Transcription API key (use only when making API calls).
    pub fn stt_key(&self) -> &str {
        self.stt_key.expose_secret()
    }

    /// TTS API key (use only when making API calls).
    pub fn tts_key(&self) -> &str {
        self.tts_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development.
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// The user-facing configuration surface: auto-stop toggle, voice profile,
/// mute and volume. Serde-derived so host apps can persist it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub auto_stop: bool,
    pub voice: String,
    /// 0-100
    pub volume: u8,
    pub muted: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_stop: true,
            voice: crate::tts::VoiceProfile::default().to_string(),
            volume: 80,
            muted: false,
        }
    }
}
