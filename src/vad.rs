//! Amplitude-threshold voice activity detection.
//!
//! Frames are reduced to a dBFS level; a crossing above `min_decibels`
//! starts speech immediately, while speech only ends after
//! `silence_debounce` of sustained quiet. The debounce is tracked as a
//! deadline against caller-supplied timestamps rather than a wall-clock
//! timer, so short pauses never segment mid-sentence and the detector is
//! deterministic under test.

use std::time::{Duration, Instant};

/// Configuration for the amplitude VAD.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Level above which a frame counts as speech, in dBFS.
    pub min_decibels: f32,
    /// Sustained quiet required before speech is considered ended.
    pub silence_debounce: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_decibels: -45.0,
            silence_debounce: Duration::from_millis(1500),
        }
    }
}

/// Speech boundary events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    SpeechEnd,
}

/// Amplitude-threshold VAD with silence debounce.
pub struct VoiceActivityDetector {
    config: VadConfig,
    speaking: bool,
    last_speech_at: Option<Instant>,
    /// Pending debounce deadline; `Some` only while counting down silence.
    silence_deadline: Option<Instant>,
    last_level_db: f32,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            last_speech_at: None,
            silence_deadline: None,
            last_level_db: f32::NEG_INFINITY,
        }
    }

    /// Feed one frame. Returns a boundary event when one fires.
    pub fn process(&mut self, samples: &[i16], now: Instant) -> Option<VadEvent> {
        let level = rms_dbfs(samples);
        self.last_level_db = level;

        if level >= self.config.min_decibels {
            self.last_speech_at = Some(now);
            self.silence_deadline = None;
            if !self.speaking {
                self.speaking = true;
                log::debug!("VAD: speech start ({:.1} dBFS)", level);
                return Some(VadEvent::SpeechStart);
            }
            return None;
        }

        if self.speaking {
            match self.silence_deadline {
                None => {
                    self.silence_deadline = Some(now + self.config.silence_debounce);
                }
                Some(deadline) if now >= deadline => {
                    self.speaking = false;
                    self.silence_deadline = None;
                    log::debug!("VAD: speech end after debounce");
                    return Some(VadEvent::SpeechEnd);
                }
                Some(_) => {}
            }
        }

        None
    }

    /// Raw level of the most recent frame, for the visualizer feed.
    pub fn noise_level(&self) -> f32 {
        self.last_level_db
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn last_speech_at(&self) -> Option<Instant> {
        self.last_speech_at
    }

    /// Cancel any pending debounce and forget speech state. Must be called
    /// on every session exit so no stale deadline fires into the next
    /// session.
    pub fn stop(&mut self) {
        self.speaking = false;
        self.silence_deadline = None;
        self.last_speech_at = None;
        self.last_level_db = f32::NEG_INFINITY;
    }
}

/// RMS level of a PCM frame in dBFS. Silence maps to -inf.
pub fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let norm = s as f64 / i16::MAX as f64;
            norm * norm
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        f32::NEG_INFINITY
    } else {
        (20.0 * rms.log10()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_frame() -> Vec<i16> {
        vec![8000; 256]
    }

    fn quiet_frame() -> Vec<i16> {
        vec![0; 256]
    }

    #[test]
    fn speech_start_on_first_loud_frame() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        let now = Instant::now();
        assert_eq!(vad.process(&loud_frame(), now), Some(VadEvent::SpeechStart));
        assert!(vad.is_speaking());
        // Continuing speech emits nothing further.
        assert_eq!(vad.process(&loud_frame(), now), None);
    }

    #[test]
    fn speech_end_only_after_debounce() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();
        vad.process(&loud_frame(), t0);

        // Quiet frames inside the debounce window: still speaking.
        assert_eq!(vad.process(&quiet_frame(), t0 + Duration::from_millis(100)), None);
        assert_eq!(vad.process(&quiet_frame(), t0 + Duration::from_millis(1000)), None);
        assert!(vad.is_speaking());

        // Past the deadline: speech ends.
        assert_eq!(
            vad.process(&quiet_frame(), t0 + Duration::from_millis(1700)),
            Some(VadEvent::SpeechEnd)
        );
        assert!(!vad.is_speaking());
    }

    #[test]
    fn short_pause_does_not_segment() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();
        vad.process(&loud_frame(), t0);

        // A 500ms pause, then speech resumes: no SpeechEnd.
        assert_eq!(vad.process(&quiet_frame(), t0 + Duration::from_millis(200)), None);
        assert_eq!(vad.process(&loud_frame(), t0 + Duration::from_millis(700)), None);

        // The deadline from the earlier pause must not fire later.
        assert_eq!(vad.process(&quiet_frame(), t0 + Duration::from_millis(800)), None);
        assert_eq!(vad.process(&quiet_frame(), t0 + Duration::from_millis(2000)), None);
        assert_eq!(
            vad.process(&quiet_frame(), t0 + Duration::from_millis(2300)),
            Some(VadEvent::SpeechEnd)
        );
    }

    #[test]
    fn stop_clears_pending_debounce() {
        let mut vad = VoiceActivityDetector::new(VadConfig::default());
        let t0 = Instant::now();
        vad.process(&loud_frame(), t0);
        vad.process(&quiet_frame(), t0 + Duration::from_millis(100));

        vad.stop();
        assert!(!vad.is_speaking());
        // No stale SpeechEnd after stop, even well past the old deadline.
        assert_eq!(vad.process(&quiet_frame(), t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn rms_levels() {
        assert_eq!(rms_dbfs(&[]), f32::NEG_INFINITY);
        assert_eq!(rms_dbfs(&[0, 0, 0]), f32::NEG_INFINITY);
        // Full-scale square wave is 0 dBFS.
        let full: Vec<i16> = vec![i16::MAX; 64];
        assert!(rms_dbfs(&full).abs() < 0.01);
        // Quieter signal is strictly below.
        let half: Vec<i16> = vec![i16::MAX / 2; 64];
        assert!(rms_dbfs(&half) < rms_dbfs(&full));
    }
}
