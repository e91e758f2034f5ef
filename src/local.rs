//! On-device speech synthesis seam.
//!
//! When the remote TTS endpoint fails or rejects on entitlement, playback
//! falls back to whatever local engine the host injected. A runtime with
//! no engine reports `SynthesisUnsupported` upstream; that is the only
//! terminal playback error.

use async_trait::async_trait;
use tokio::process::Command;

/// Local synthesis engine. Returns WAV bytes for the default locale voice.
#[async_trait]
pub trait LocalSynthesizer: Send + Sync {
    /// True when the engine can synthesize in this runtime.
    async fn is_available(&self) -> bool;

    /// Synthesize `text` to WAV bytes. `None` means the engine failed and
    /// the caller should treat the runtime as unsupported.
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>>;
}

/// espeak-ng backed local synthesis, the default-locale voice of most
/// Linux installs. `--stdout` emits a WAV stream directly.
pub struct EspeakSynthesizer {
    binary: String,
}

impl EspeakSynthesizer {
    pub fn new() -> Self {
        Self {
            binary: "espeak-ng".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for EspeakSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalSynthesizer for EspeakSynthesizer {
    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        let output = match Command::new(&self.binary)
            .arg("--stdout")
            .arg(text)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Local synthesis: failed to spawn {}: {}", self.binary, e);
                return None;
            }
        };

        if !output.status.success() {
            log::warn!(
                "Local synthesis: {} exited with {}",
                self.binary,
                output.status
            );
            return None;
        }

        log::debug!("Local synthesis: {} bytes of WAV", output.stdout.len());
        Some(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let synth = EspeakSynthesizer::with_binary("definitely-not-a-tts-engine");
        assert!(!synth.is_available().await);
        assert_eq!(synth.synthesize("hello").await, None);
    }
}
