//! Voice chat orchestrator.
//!
//! The state machine tying capture, VAD, the segment recorder and the
//! transcription client together:
//!
//! ```text
//! Idle --start()--> Recording --stop()/auto-stop--> Transcribing --ok--> Idle
//!                       |                                |
//!                       +------------ reset() <----------+--err--> Error
//! ```
//!
//! One RecordingSession exists at a time; its identity is an epoch counter.
//! Every background task (frame pump, flush interval, elapsed ticker) is
//! tied to a per-session CancellationToken, and every state update from an
//! async continuation re-checks the epoch so a response that resolves after
//! `reset()` is discarded instead of resurrecting a dead session.

use crate::capture::CaptureSource;
use crate::error::{Result, VoiceError};
use crate::events::PipelineEvent;
use crate::playback::PlaybackController;
use crate::recorder::SegmentRecorder;
use crate::stt::{SttError, Transcriber};
use crate::vad::{VadConfig, VadEvent, VoiceActivityDetector};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use strum::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Recording,
    Transcribing,
    Error,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Stop automatically once the VAD reports sustained silence.
    pub auto_stop: bool,
    pub vad: VadConfig,
    /// Chunk roll / partial-flush cadence.
    pub flush_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_stop: true,
            vad: VadConfig::default(),
            flush_interval: Duration::from_millis(1000),
        }
    }
}

/// Outbound contract to the host UI: invoked exactly once per completed
/// session with the final transcript.
pub type SendMessageFn = Arc<dyn Fn(String) + Send + Sync>;

struct SessionInner {
    status: SessionStatus,
    /// Bumped on every start and reset; async continuations compare against
    /// it before touching state.
    epoch: u64,
    started_at: Option<Instant>,
    elapsed_secs: u64,
    partial_transcript: Option<String>,
    last_error: Option<String>,
    cancel: Option<CancellationToken>,
}

pub struct VoiceChatOrchestrator {
    capture: Arc<dyn CaptureSource>,
    transcriber: Arc<dyn Transcriber>,
    recorder: SegmentRecorder,
    config: OrchestratorConfig,
    auto_stop: AtomicBool,
    inner: Mutex<SessionInner>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    on_send: SendMessageFn,
    playback: Option<Arc<PlaybackController>>,
}

impl VoiceChatOrchestrator {
    /// `playback` is optional so the pipeline can run record-only; when
    /// present, `reset()` stops active playback as part of teardown.
    pub fn new(
        capture: Arc<dyn CaptureSource>,
        transcriber: Arc<dyn Transcriber>,
        config: OrchestratorConfig,
        events: mpsc::UnboundedSender<PipelineEvent>,
        on_send: SendMessageFn,
        playback: Option<Arc<PlaybackController>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            capture,
            transcriber,
            recorder: SegmentRecorder::new(),
            auto_stop: AtomicBool::new(config.auto_stop),
            config,
            inner: Mutex::new(SessionInner {
                status: SessionStatus::Idle,
                epoch: 0,
                started_at: None,
                elapsed_secs: 0,
                partial_transcript: None,
                last_error: None,
                cancel: None,
            }),
            events,
            on_send,
            playback,
        })
    }

    /// Begin a recording session. A no-op while one is already active.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        // Claim the session before the first await point; a concurrent
        // start() sees Recording and backs off instead of acquiring the
        // device a second time.
        let cancel = CancellationToken::new();
        let epoch = {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != SessionStatus::Idle {
                log::debug!("Orchestrator: start() ignored in state {}", inner.status);
                return Ok(());
            }
            inner.status = SessionStatus::Recording;
            inner.epoch += 1;
            inner.started_at = Some(Instant::now());
            inner.elapsed_secs = 0;
            inner.partial_transcript = None;
            inner.last_error = None;
            inner.cancel = Some(cancel.clone());
            inner.epoch
        };

        let stream = match self.capture.acquire().await {
            Ok(stream) => stream,
            Err(crate::capture::CaptureError::PermissionDenied(reason)) => {
                self.abort_start(epoch);
                self.emit(PipelineEvent::SessionError(
                    "Microphone access denied".to_string(),
                ));
                return Err(VoiceError::PermissionDenied(reason));
            }
            Err(e) => {
                self.abort_start(epoch);
                self.emit(PipelineEvent::SessionError(e.to_string()));
                return Err(e.into());
            }
        };

        self.recorder.start();
        self.emit(PipelineEvent::StateChanged(SessionStatus::Recording));
        log::info!("Orchestrator: recording started (session {})", epoch);

        self.spawn_frame_pump(stream, cancel.clone(), epoch);
        self.spawn_flush_interval(cancel.clone(), epoch);
        self.spawn_elapsed_ticker(cancel, epoch);

        Ok(())
    }

    /// Roll a failed start back to Idle, cancelling the claimed session's
    /// token. Skipped when a reset() already moved the epoch on.
    fn abort_start(&self, expected_epoch: u64) {
        let cancel = {
            let mut inner = self.inner.lock().unwrap();
            if inner.epoch != expected_epoch {
                return;
            }
            inner.status = SessionStatus::Idle;
            inner.started_at = None;
            inner.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }

    /// Stop recording and run final transcription. A second stop while one
    /// is already finalizing is a no-op.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        let epoch = {
            let inner = self.inner.lock().unwrap();
            inner.epoch
        };
        self.stop_session(epoch).await
    }

    /// Return to Idle from any state: clears transcript, error and elapsed
    /// time, cancels session tasks, releases the microphone and stops any
    /// active playback. In-flight network calls are not force-cancelled;
    /// their results are discarded via the epoch guard. Idempotent.
    pub async fn reset(&self) {
        let cancel = {
            let mut inner = self.inner.lock().unwrap();
            inner.epoch += 1;
            inner.status = SessionStatus::Idle;
            inner.started_at = None;
            inner.elapsed_secs = 0;
            inner.partial_transcript = None;
            inner.last_error = None;
            inner.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        self.capture.release().await;
        if let Some(playback) = &self.playback {
            playback.stop().await;
        }

        self.emit(PipelineEvent::StateChanged(SessionStatus::Idle));
        log::debug!("Orchestrator: reset to idle");
    }

    async fn stop_session(self: &Arc<Self>, expected_epoch: u64) -> Result<()> {
        // Recording -> Transcribing happens atomically with the finalize
        // guard, so a concurrent stop (user + auto-stop racing) is a no-op.
        let cancel = {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != SessionStatus::Recording || inner.epoch != expected_epoch {
                log::debug!("Orchestrator: stop() ignored in state {}", inner.status);
                return Ok(());
            }
            inner.status = SessionStatus::Transcribing;
            inner.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        self.emit(PipelineEvent::StateChanged(SessionStatus::Transcribing));

        self.capture.release().await;

        let Some(chunks) = self.recorder.finalize() else {
            // Finalize already consumed by an earlier stop.
            return Ok(());
        };
        log::info!(
            "Orchestrator: finalizing session {} ({} chunks)",
            expected_epoch,
            chunks.len()
        );

        match self.transcriber.transcribe_final(&chunks).await {
            Ok(text) => {
                let stale = {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.epoch != expected_epoch {
                        true
                    } else {
                        inner.status = SessionStatus::Idle;
                        inner.partial_transcript = None;
                        inner.started_at = None;
                        false
                    }
                };
                if stale {
                    log::info!("Orchestrator: discarding transcript for stale session");
                    return Ok(());
                }
                self.emit(PipelineEvent::StateChanged(SessionStatus::Idle));
                (self.on_send)(text);
                Ok(())
            }
            Err(SttError::TooShort { .. }) => {
                // Non-fatal: back to Idle with a user-visible hint.
                let stale = self.back_to_idle_if_current(expected_epoch);
                if !stale {
                    self.emit(PipelineEvent::SessionError(
                        "Recording was too short".to_string(),
                    ));
                    self.emit(PipelineEvent::StateChanged(SessionStatus::Idle));
                    return Err(VoiceError::RecordingTooShort);
                }
                Ok(())
            }
            Err(e) => {
                let stale = {
                    let mut inner = self.inner.lock().unwrap();
                    if inner.epoch != expected_epoch {
                        true
                    } else {
                        inner.status = SessionStatus::Error;
                        inner.last_error = Some(e.to_string());
                        false
                    }
                };
                if stale {
                    log::debug!("Orchestrator: ignoring failure of stale transcription");
                    return Ok(());
                }
                self.emit(PipelineEvent::SessionError(e.to_string()));
                self.emit(PipelineEvent::StateChanged(SessionStatus::Error));
                Err(e.into())
            }
        }
    }

    /// Returns true when the epoch had moved on (state untouched).
    fn back_to_idle_if_current(&self, expected_epoch: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.epoch != expected_epoch {
            return true;
        }
        inner.status = SessionStatus::Idle;
        inner.partial_transcript = None;
        inner.started_at = None;
        false
    }

    fn spawn_frame_pump(
        self: &Arc<Self>,
        mut stream: crate::capture::FrameStream,
        cancel: CancellationToken,
        epoch: u64,
    ) {
        let orch = Arc::clone(self);
        tokio::spawn(async move {
            let mut vad = VoiceActivityDetector::new(orch.config.vad.clone());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = stream.next() => {
                        let Some(frame) = frame else { break };
                        orch.recorder.push_samples(&frame.samples);

                        let event = vad.process(&frame.samples, Instant::now());
                        orch.emit(PipelineEvent::NoiseLevel(vad.noise_level()));

                        if matches!(event, Some(VadEvent::SpeechEnd))
                            && orch.auto_stop.load(Ordering::Acquire)
                        {
                            log::info!("Orchestrator: auto-stop after sustained silence");
                            let orch = Arc::clone(&orch);
                            tokio::spawn(async move {
                                if let Err(e) = orch.stop_session(epoch).await {
                                    log::warn!("Orchestrator: auto-stop finalize failed: {}", e);
                                }
                            });
                        }
                    }
                }
            }
            vad.stop();
        });
    }

    fn spawn_flush_interval(self: &Arc<Self>, cancel: CancellationToken, epoch: u64) {
        let orch = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(orch.config.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // first tick fires immediately

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        orch.recorder.roll_chunk();

                        // Opportunistic partial transcription; the recorder's
                        // single-flight gate drops overlapping requests.
                        if let Some((chunks, guard)) = orch.recorder.try_partial_flush() {
                            let orch = Arc::clone(&orch);
                            tokio::spawn(async move {
                                let text = orch.transcriber.transcribe_partial(&chunks).await;
                                drop(guard);
                                if let Some(text) = text {
                                    orch.set_partial_transcript(epoch, text);
                                }
                            });
                        }
                    }
                }
            }
        });
    }

    fn spawn_elapsed_ticker(self: &Arc<Self>, cancel: CancellationToken, epoch: u64) {
        let orch = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let elapsed = {
                            let mut inner = orch.inner.lock().unwrap();
                            if inner.epoch != epoch || inner.status != SessionStatus::Recording {
                                break;
                            }
                            inner.elapsed_secs = inner
                                .started_at
                                .map(|t| t.elapsed().as_secs())
                                .unwrap_or(0);
                            inner.elapsed_secs
                        };
                        orch.emit(PipelineEvent::Elapsed(elapsed));
                    }
                }
            }
        });
    }

    /// Partial transcripts are display hints: only accepted while the same
    /// session is still recording, and cleared the moment the final
    /// transcript lands.
    fn set_partial_transcript(&self, epoch: u64, text: String) {
        let accepted = {
            let mut inner = self.inner.lock().unwrap();
            if inner.epoch == epoch && inner.status == SessionStatus::Recording {
                inner.partial_transcript = Some(text.clone());
                true
            } else {
                false
            }
        };
        if accepted {
            self.emit(PipelineEvent::PartialTranscript(text));
        }
    }

    pub fn set_auto_stop(&self, enabled: bool) {
        self.auto_stop.store(enabled, Ordering::Release);
    }

    pub fn auto_stop(&self) -> bool {
        self.auto_stop.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().unwrap().status
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.inner.lock().unwrap().elapsed_secs
    }

    pub fn partial_transcript(&self) -> Option<String> {
        self.inner.lock().unwrap().partial_transcript.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }
}
