pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod local;
pub mod orchestrator;
pub mod playback;
pub mod recorder;
pub mod stt;
pub mod tts;
pub mod vad;
pub mod visualizer;

pub use error::{Result, VoiceError};
