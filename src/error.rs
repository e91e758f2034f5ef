use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

/// Crate-level error, composed from the per-module errors.
///
/// Best-effort paths (partial transcription, visualization) never surface
/// through this type; everything here is something the host UI is expected
/// to show and recover from.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Capture error: {0}")]
    Capture(#[from] crate::capture::CaptureError),

    #[error("Recording too short to transcribe")]
    RecordingTooShort,

    #[error("Transcription failed: {0}")]
    Transcription(#[from] crate::stt::SttError),

    #[error("Playback error: {0}")]
    Playback(#[from] crate::playback::PlaybackError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
