//! Events the pipeline surfaces to its host UI.

use crate::orchestrator::SessionStatus;

/// Everything the host UI may want to render during a voice session. All
/// events are advisory; the authoritative transcript only ever travels
/// through the orchestrator's send-message callback.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The session state machine moved.
    StateChanged(SessionStatus),
    /// Seconds elapsed since recording started, once per second.
    Elapsed(u64),
    /// Raw VAD level in dBFS at sampling cadence, for the visualizer.
    NoiseLevel(f32),
    /// Best-effort in-progress transcript. Display hint only; superseded
    /// by the final transcript and never merged into it.
    PartialTranscript(String),
    /// A user-visible session failure with a retry affordance.
    SessionError(String),
    /// Non-blocking notice that the selected voice needs a paid tier.
    PremiumVoiceNotice(String),
}
