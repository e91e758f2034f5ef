//! Smoothed amplitude bars for the recording UI.
//!
//! Purely cosmetic: levels in dBFS go in, a fixed number of 0..1 bar
//! heights come out. Nothing here can fail.

/// Default bar count matches a compact waveform strip.
pub const DEFAULT_BARS: usize = 24;

/// Floor below which a level renders as an empty bar.
const FLOOR_DB: f32 = -60.0;

pub struct VisualizerFeed {
    bars: Vec<f32>,
    smoothing: f32,
}

impl VisualizerFeed {
    pub fn new(bar_count: usize, smoothing: f32) -> Self {
        Self {
            bars: vec![0.0; bar_count.max(1)],
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    /// Push one noise level (dBFS). The newest bar carries the smoothed
    /// level; older bars shift left.
    pub fn push(&mut self, level_db: f32) {
        let normalized = ((level_db - FLOOR_DB) / -FLOOR_DB).clamp(0.0, 1.0);
        let previous = *self.bars.last().unwrap_or(&0.0);
        let smoothed = previous * self.smoothing + normalized * (1.0 - self.smoothing);

        self.bars.rotate_left(1);
        if let Some(last) = self.bars.last_mut() {
            *last = smoothed;
        }
    }

    /// Current bar heights, each in 0..1, oldest first.
    pub fn bars(&self) -> &[f32] {
        &self.bars
    }

    pub fn clear(&mut self) {
        self.bars.iter_mut().for_each(|b| *b = 0.0);
    }
}

impl Default for VisualizerFeed {
    fn default() -> Self {
        Self::new(DEFAULT_BARS, 0.6)
    }
}
