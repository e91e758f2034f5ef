//! Transcription client.
//!
//! Two modes against the same endpoint: partial (best-effort, errors
//! swallowed) and final (authoritative, errors terminal for the session).
//! Both refuse to upload audio below a minimum byte size — too short to
//! transcribe meaningfully — without touching the network.

use crate::recorder::{total_bytes, AudioChunk};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Uploads smaller than this (16-bit PCM payload) are rejected locally.
/// 16000 bytes = 500ms of mono 16kHz audio.
pub const MIN_AUDIO_BYTES: usize = 16_000;

/// Priority hint attached to each upload so the backend can shed partials
/// under load.
pub const PRIORITY_HEADER: &str = "x-transcription-priority";

#[derive(Error, Debug)]
pub enum SttError {
    #[error("Audio too short to transcribe ({got} bytes, need {need})")]
    TooShort { got: usize, need: usize },
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    Parse(String),
    #[error("Audio encoding error: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPriority {
    Partial,
    Final,
}

impl RequestPriority {
    fn header_value(self) -> &'static str {
        match self {
            RequestPriority::Partial => "partial",
            RequestPriority::Final => "final",
        }
    }
}

/// Transcription seam. The orchestrator only depends on this trait;
/// production wires [`HttpTranscriber`], tests wire fakes.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    /// Best-effort transcription of a partial buffer. Failures are logged
    /// and swallowed; a `None` must never interrupt recording.
    async fn transcribe_partial(&self, chunks: &[AudioChunk]) -> Option<String>;

    /// Authoritative transcription of the finalized buffer.
    async fn transcribe_final(&self, chunks: &[AudioChunk]) -> Result<String, SttError>;
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub endpoint: Url,
    pub language: Option<String>,
    pub request_timeout: Duration,
}

impl SttConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            language: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// HTTP transcription client: multipart WAV upload, `{ "text": ... }` back.
pub struct HttpTranscriber {
    client: reqwest::Client,
    api_key: String,
    config: SttConfig,
}

impl HttpTranscriber {
    pub fn new(api_key: String, config: SttConfig) -> Result<Self, SttError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    async fn upload(
        &self,
        chunks: &[AudioChunk],
        priority: RequestPriority,
    ) -> Result<String, SttError> {
        let got = total_bytes(chunks);
        if got < MIN_AUDIO_BYTES {
            return Err(SttError::TooShort {
                got,
                need: MIN_AUDIO_BYTES,
            });
        }

        let wav = encode_wav(chunks)?;
        log::debug!(
            "STT: uploading {} chunks ({} bytes WAV, priority {})",
            chunks.len(),
            wav.len(),
            priority.header_value()
        );

        let audio_part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Encode(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new().part("file", audio_part);
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(self.config.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(PRIORITY_HEADER, priority.header_value())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SttError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| SttError::Parse(e.to_string()))?;
        Ok(body.text)
    }
}

#[async_trait::async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe_partial(&self, chunks: &[AudioChunk]) -> Option<String> {
        match self.upload(chunks, RequestPriority::Partial).await {
            Ok(text) => Some(text),
            Err(SttError::TooShort { .. }) => None,
            Err(e) => {
                // Partial transcription is a display hint only; never
                // surface its failures.
                log::debug!("STT: partial transcription failed (ignored): {}", e);
                None
            }
        }
    }

    async fn transcribe_final(&self, chunks: &[AudioChunk]) -> Result<String, SttError> {
        self.upload(chunks, RequestPriority::Final).await
    }
}

/// Encode a chunk sequence as a mono 16kHz 16-bit WAV, in memory.
pub fn encode_wav(chunks: &[AudioChunk]) -> Result<Vec<u8>, SttError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: crate::capture::SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SttError::Encode(e.to_string()))?;
        for chunk in chunks {
            for &sample in &chunk.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| SttError::Encode(e.to_string()))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| SttError::Encode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: usize) -> AudioChunk {
        AudioChunk {
            samples: vec![100; samples],
        }
    }

    fn test_transcriber() -> HttpTranscriber {
        // Unroutable endpoint: any request that actually goes out fails,
        // which is exactly what the size-gate tests rely on not happening.
        let config = SttConfig::new(Url::parse("http://127.0.0.1:9/transcribe").unwrap());
        HttpTranscriber::new("test_key".to_string(), config).unwrap()
    }

    #[tokio::test]
    async fn final_rejects_short_audio_without_network() {
        let stt = test_transcriber();
        // 100 samples = 200 bytes, far below the threshold.
        let result = stt.transcribe_final(&[chunk(100)]).await;
        match result {
            Err(SttError::TooShort { got, need }) => {
                assert_eq!(got, 200);
                assert_eq!(need, MIN_AUDIO_BYTES);
            }
            other => panic!("expected TooShort, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn partial_swallows_short_audio() {
        let stt = test_transcriber();
        assert_eq!(stt.transcribe_partial(&[chunk(100)]).await, None);
    }

    #[tokio::test]
    async fn partial_swallows_network_errors() {
        let stt = test_transcriber();
        // Above the size gate, so this one does hit the (unroutable)
        // endpoint and must still come back as None.
        let chunks: Vec<_> = (0..3).map(|_| chunk(8000)).collect();
        assert_eq!(stt.transcribe_partial(&chunks).await, None);
    }

    #[test]
    fn wav_encoding_is_readable() {
        use std::io::Write;

        let chunks = vec![chunk(160), chunk(160)];
        let wav = encode_wav(&chunks).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&wav).unwrap();

        let mut reader = hound::WavReader::open(file.path()).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, crate::capture::SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.samples::<i16>().count(), 320);
    }

    #[test]
    fn priority_header_values() {
        assert_eq!(RequestPriority::Partial.header_value(), "partial");
        assert_eq!(RequestPriority::Final.header_value(), "final");
    }
}
