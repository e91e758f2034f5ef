//! Remote text-to-speech client.
//!
//! POST `{ text, voice }`, binary audio back. A 402 from the endpoint means
//! the selected voice needs a paid tier; the playback controller treats
//! that as a fallback trigger, not a hard error, so it gets its own
//! variant here.

use serde_json::json;
use std::time::Duration;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Premium voice requires an active subscription")]
    EntitlementRequired,
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
}

/// Provider-defined synthesis voices. An immutable catalog; the user picks
/// one, the pipeline never invents identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum VoiceProfile {
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        VoiceProfile::Alloy
    }
}

impl VoiceProfile {
    /// The full catalog, for the host UI's voice selector.
    pub fn catalog() -> Vec<VoiceProfile> {
        VoiceProfile::iter().collect()
    }
}

/// Remote synthesis seam; production wires [`HttpTts`].
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: VoiceProfile) -> Result<Vec<u8>, TtsError>;
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub endpoint: Url,
    pub request_timeout: Duration,
}

impl TtsConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpTts {
    client: reqwest::Client,
    api_key: String,
    config: TtsConfig,
}

impl HttpTts {
    pub fn new(api_key: String, config: TtsConfig) -> Result<Self, TtsError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str, voice: VoiceProfile) -> Result<Vec<u8>, TtsError> {
        let payload = json!({
            "text": text,
            "voice": voice.to_string(),
        });

        let response = self
            .client
            .post(self.config.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "audio/wav")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            return Err(TtsError::EntitlementRequired);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TtsError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response.bytes().await?.to_vec();
        log::debug!(
            "TTS: synthesized {} bytes for voice '{}'",
            audio.len(),
            voice
        );
        Ok(audio)
    }
}
