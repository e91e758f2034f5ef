//! Playback controller for assistant replies.
//!
//! Primary path is remote TTS; any transport failure or entitlement
//! rejection falls back to on-device synthesis. The controller owns an
//! injected [`PlaybackResource`] (never a global), enforces the
//! at-most-one-playing invariant by stopping any prior playback before a
//! new one starts, and routes all media callbacks through a single
//! [`PlaybackController::handle_media_event`] transition table.

pub mod sink;

pub use sink::CpalPlayback;

use crate::events::PipelineEvent;
use crate::tts::{SpeechSynthesizer, TtsError, VoiceProfile};
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("On-device speech synthesis is not supported in this runtime")]
    SynthesisUnsupported,
    #[error("Audio decode error: {0}")]
    Decode(String),
    #[error("Audio device error: {0}")]
    Device(String),
}

/// How a reply will be voiced. The caller branches exhaustively instead of
/// nesting error handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// Remote TTS succeeded; play these bytes.
    RemoteAudio(Vec<u8>),
    /// Remote path failed or was entitlement-rejected; speak locally.
    LocalSynthesis(String),
    /// Remote path failed and no local engine exists.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

/// Events from whichever backend is producing sound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Ended,
    Paused,
    Resumed,
    Errored(String),
}

/// The shared audio output element plus the optional on-device engine.
/// Owned by and injected into the controller so teardown and test fakes
/// stay clean.
#[async_trait::async_trait]
pub trait PlaybackResource: Send + Sync {
    /// Queue remote audio bytes (WAV) for playback, replacing anything
    /// already queued.
    async fn play_remote(&self, audio: &[u8]) -> Result<(), PlaybackError>;

    /// Synthesize and play `text` with the on-device engine.
    async fn speak_local(&self, text: &str) -> Result<(), PlaybackError>;

    /// Whether an on-device engine is usable in this runtime.
    async fn supports_local(&self) -> bool;

    async fn pause(&self);
    async fn resume(&self);

    /// Stop and clear whatever is playing.
    async fn stop(&self);

    /// Gain applied to whichever backend is active, 0.0..=1.0.
    fn set_volume(&self, volume: f32);
    fn set_muted(&self, muted: bool);
}

/// User-facing audio settings, applied at the start of every playback and
/// pushed live to the active backend when changed.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackSettings {
    /// 0-100
    pub volume: u8,
    pub muted: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: 80,
            muted: false,
        }
    }
}

struct ControllerState {
    status: PlaybackStatus,
    voice: VoiceProfile,
}

pub struct PlaybackController {
    remote: Arc<dyn SpeechSynthesizer>,
    resource: Arc<dyn PlaybackResource>,
    state: Mutex<ControllerState>,
    settings: Mutex<PlaybackSettings>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl PlaybackController {
    pub fn new(remote: Arc<dyn SpeechSynthesizer>, resource: Arc<dyn PlaybackResource>) -> Self {
        Self {
            remote,
            resource,
            state: Mutex::new(ControllerState {
                status: PlaybackStatus::Stopped,
                voice: VoiceProfile::default(),
            }),
            settings: Mutex::new(PlaybackSettings::default()),
            events: None,
        }
    }

    /// Attach the host UI's event channel (premium-voice notices).
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Speak `text` with `voice`. Stops any prior playback first.
    pub async fn play(&self, text: &str, voice: VoiceProfile) -> Result<(), PlaybackError> {
        // At most one playback is audible: replace whatever is active.
        self.resource.stop().await;
        self.state.lock().unwrap().status = PlaybackStatus::Stopped;

        // Volume and mute are sampled once here so every consumer hears the
        // same setting without re-reading it mid-stream.
        let settings = *self.settings.lock().unwrap();
        self.resource.set_volume(settings.volume as f32 / 100.0);
        self.resource.set_muted(settings.muted);

        match self.resolve(text, voice).await {
            SynthesisOutcome::RemoteAudio(audio) => {
                self.resource.play_remote(&audio).await?;
            }
            SynthesisOutcome::LocalSynthesis(text) => {
                self.resource.speak_local(&text).await?;
            }
            SynthesisOutcome::Unsupported => {
                return Err(PlaybackError::SynthesisUnsupported);
            }
        }

        let mut state = self.state.lock().unwrap();
        state.status = PlaybackStatus::Playing;
        state.voice = voice;
        Ok(())
    }

    /// Decide how `text` will be voiced. Transport errors and entitlement
    /// rejection both recover via local synthesis; only a missing local
    /// engine is unsupported.
    async fn resolve(&self, text: &str, voice: VoiceProfile) -> SynthesisOutcome {
        let fallback_reason = match self.remote.synthesize(text, voice).await {
            Ok(audio) => return SynthesisOutcome::RemoteAudio(audio),
            Err(TtsError::EntitlementRequired) => {
                self.emit(PipelineEvent::PremiumVoiceNotice(format!(
                    "Voice '{}' requires a subscription; using the device voice",
                    voice
                )));
                format!("entitlement required for voice '{}'", voice)
            }
            Err(e) => e.to_string(),
        };

        if self.resource.supports_local().await {
            log::warn!(
                "Playback: remote synthesis failed ({}), falling back to local synthesis",
                fallback_reason
            );
            SynthesisOutcome::LocalSynthesis(text.to_string())
        } else {
            log::error!(
                "Playback: remote synthesis failed ({}) and no local engine is available",
                fallback_reason
            );
            SynthesisOutcome::Unsupported
        }
    }

    pub async fn pause(&self) {
        let should_pause = self.state.lock().unwrap().status == PlaybackStatus::Playing;
        if should_pause {
            self.resource.pause().await;
            // A stop() may have landed while the backend call was in
            // flight; only commit if we are still Playing.
            let mut state = self.state.lock().unwrap();
            if state.status == PlaybackStatus::Playing {
                state.status = PlaybackStatus::Paused;
            }
        }
    }

    pub async fn resume(&self) {
        let should_resume = self.state.lock().unwrap().status == PlaybackStatus::Paused;
        if should_resume {
            self.resource.resume().await;
            let mut state = self.state.lock().unwrap();
            if state.status == PlaybackStatus::Paused {
                state.status = PlaybackStatus::Playing;
            }
        }
    }

    pub async fn stop(&self) {
        self.resource.stop().await;
        self.state.lock().unwrap().status = PlaybackStatus::Stopped;
    }

    /// Single dispatcher for backend media events; the whole transition
    /// table lives here instead of being scattered across callbacks.
    pub fn handle_media_event(&self, event: MediaEvent) {
        let mut state = self.state.lock().unwrap();
        state.status = match (state.status, &event) {
            (PlaybackStatus::Playing, MediaEvent::Ended) => PlaybackStatus::Stopped,
            (PlaybackStatus::Paused, MediaEvent::Ended) => PlaybackStatus::Stopped,
            (PlaybackStatus::Playing, MediaEvent::Paused) => PlaybackStatus::Paused,
            (PlaybackStatus::Paused, MediaEvent::Resumed) => PlaybackStatus::Playing,
            (status, MediaEvent::Errored(message)) => {
                log::warn!("Playback: backend error: {}", message);
                let _ = status;
                PlaybackStatus::Stopped
            }
            // Anything else is a stale or redundant event.
            (status, _) => status,
        };
    }

    pub fn set_volume(&self, volume: u8) {
        let volume = volume.min(100);
        self.settings.lock().unwrap().volume = volume;
        // Applies to whichever backend is currently producing sound.
        self.resource.set_volume(volume as f32 / 100.0);
    }

    pub fn set_muted(&self, muted: bool) {
        self.settings.lock().unwrap().muted = muted;
        self.resource.set_muted(muted);
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.lock().unwrap().status
    }

    pub fn voice(&self) -> VoiceProfile {
        self.state.lock().unwrap().voice
    }

    pub fn settings(&self) -> PlaybackSettings {
        *self.settings.lock().unwrap()
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSynth;

    #[async_trait::async_trait]
    impl SpeechSynthesizer for NullSynth {
        async fn synthesize(&self, _: &str, _: VoiceProfile) -> Result<Vec<u8>, TtsError> {
            Ok(vec![0u8; 64])
        }
    }

    struct NullResource;

    #[async_trait::async_trait]
    impl PlaybackResource for NullResource {
        async fn play_remote(&self, _: &[u8]) -> Result<(), PlaybackError> {
            Ok(())
        }
        async fn speak_local(&self, _: &str) -> Result<(), PlaybackError> {
            Ok(())
        }
        async fn supports_local(&self) -> bool {
            true
        }
        async fn pause(&self) {}
        async fn resume(&self) {}
        async fn stop(&self) {}
        fn set_volume(&self, _: f32) {}
        fn set_muted(&self, _: bool) {}
    }

    fn controller() -> PlaybackController {
        PlaybackController::new(Arc::new(NullSynth), Arc::new(NullResource))
    }

    #[tokio::test]
    async fn media_event_table() {
        let ctl = controller();
        ctl.play("hi", VoiceProfile::Alloy).await.unwrap();
        assert_eq!(ctl.status(), PlaybackStatus::Playing);

        ctl.handle_media_event(MediaEvent::Paused);
        assert_eq!(ctl.status(), PlaybackStatus::Paused);

        ctl.handle_media_event(MediaEvent::Resumed);
        assert_eq!(ctl.status(), PlaybackStatus::Playing);

        ctl.handle_media_event(MediaEvent::Ended);
        assert_eq!(ctl.status(), PlaybackStatus::Stopped);

        // Redundant events do not move the state.
        ctl.handle_media_event(MediaEvent::Ended);
        ctl.handle_media_event(MediaEvent::Resumed);
        assert_eq!(ctl.status(), PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn backend_error_stops_playback() {
        let ctl = controller();
        ctl.play("hi", VoiceProfile::Nova).await.unwrap();
        ctl.handle_media_event(MediaEvent::Errored("device lost".into()));
        assert_eq!(ctl.status(), PlaybackStatus::Stopped);
        assert_eq!(ctl.voice(), VoiceProfile::Nova);
    }

    #[tokio::test]
    async fn pause_and_resume_guard_on_status() {
        let ctl = controller();
        // Pausing while stopped is a no-op.
        ctl.pause().await;
        assert_eq!(ctl.status(), PlaybackStatus::Stopped);

        ctl.play("hi", VoiceProfile::Alloy).await.unwrap();
        ctl.pause().await;
        assert_eq!(ctl.status(), PlaybackStatus::Paused);
        ctl.resume().await;
        assert_eq!(ctl.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn volume_is_clamped() {
        let ctl = controller();
        ctl.set_volume(250);
        assert_eq!(ctl.settings().volume, 100);
        ctl.set_muted(true);
        assert!(ctl.settings().muted);
    }
}
