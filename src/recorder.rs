//! Segment recorder: buffers captured PCM into ordered chunks.
//!
//! Chunks are closed on a periodic flush boundary (the orchestrator drives
//! this, default 1000ms). Partial flushes snapshot what is buffered so far
//! for best-effort transcription without stopping the recording; a
//! single-flight gate drops overlapping partial requests instead of
//! queueing them. `finalize()` fires once per session and returns the
//! complete ordered chunk sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Minimum buffered chunks before a partial flush is worth uploading.
pub const MIN_PARTIAL_CHUNKS: usize = 3;

/// One flush interval's worth of mono 16kHz PCM.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
}

impl AudioChunk {
    /// Encoded payload size in bytes (16-bit PCM).
    pub fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }
}

#[derive(Default)]
struct RecorderInner {
    chunks: Vec<AudioChunk>,
    current: Vec<i16>,
    recording: bool,
    finalized: bool,
}

/// Releases the partial-flush single-flight gate when the request settles.
pub struct PartialFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for PartialFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SegmentRecorder {
    inner: Mutex<RecorderInner>,
    partial_in_flight: Arc<AtomicBool>,
}

impl SegmentRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RecorderInner::default()),
            partial_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Begin a fresh session, discarding anything from a previous one.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.chunks.clear();
        inner.current.clear();
        inner.recording = true;
        inner.finalized = false;
        self.partial_in_flight.store(false, Ordering::Release);
    }

    /// Append captured samples to the open chunk. Ignored when not
    /// recording, so late frames after finalize are harmless.
    pub fn push_samples(&self, samples: &[i16]) {
        let mut inner = self.inner.lock().unwrap();
        if inner.recording {
            inner.current.extend_from_slice(samples);
        }
    }

    /// Close the open chunk at the flush boundary.
    pub fn roll_chunk(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.recording && !inner.current.is_empty() {
            let samples = std::mem::take(&mut inner.current);
            inner.chunks.push(AudioChunk { samples });
            log::debug!("Recorder: rolled chunk ({} buffered)", inner.chunks.len());
        }
    }

    pub fn buffered_chunks(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    /// Snapshot the buffered chunks for a best-effort partial upload.
    ///
    /// Returns `None` unless at least [`MIN_PARTIAL_CHUNKS`] are buffered
    /// and no partial request is already in flight. The returned guard must
    /// live until the upload settles; dropping it reopens the gate.
    pub fn try_partial_flush(&self) -> Option<(Vec<AudioChunk>, PartialFlightGuard)> {
        let inner = self.inner.lock().unwrap();
        if !inner.recording || inner.chunks.len() < MIN_PARTIAL_CHUNKS {
            return None;
        }
        if self
            .partial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Overlapping partials are dropped, not queued.
            return None;
        }
        let snapshot = inner.chunks.clone();
        Some((
            snapshot,
            PartialFlightGuard {
                flag: Arc::clone(&self.partial_in_flight),
            },
        ))
    }

    /// Stop accumulation and hand over the complete ordered chunk
    /// sequence. Fires exactly once; later calls (a second concurrent stop)
    /// return `None`.
    pub fn finalize(&self) -> Option<Vec<AudioChunk>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.finalized {
            return None;
        }
        inner.finalized = true;
        inner.recording = false;
        if !inner.current.is_empty() {
            let samples = std::mem::take(&mut inner.current);
            inner.chunks.push(AudioChunk { samples });
        }
        Some(std::mem::take(&mut inner.chunks))
    }
}

impl Default for SegmentRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Total payload size of a chunk sequence in bytes.
pub fn total_bytes(chunks: &[AudioChunk]) -> usize {
    chunks.iter().map(AudioChunk::byte_len).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(recorder: &SegmentRecorder, chunks: usize) {
        for i in 0..chunks {
            recorder.push_samples(&vec![i as i16; 160]);
            recorder.roll_chunk();
        }
    }

    #[test]
    fn finalize_preserves_chunk_order() {
        let recorder = SegmentRecorder::new();
        recorder.start();
        fill(&recorder, 4);

        let chunks = recorder.finalize().expect("first finalize yields chunks");
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.samples[0], i as i16);
        }
    }

    #[test]
    fn finalize_fires_once() {
        let recorder = SegmentRecorder::new();
        recorder.start();
        fill(&recorder, 2);

        assert!(recorder.finalize().is_some());
        assert!(recorder.finalize().is_none());
        // Frames arriving after finalize are dropped.
        recorder.push_samples(&[1, 2, 3]);
        assert_eq!(recorder.buffered_chunks(), 0);
    }

    #[test]
    fn partial_flush_requires_min_chunks() {
        let recorder = SegmentRecorder::new();
        recorder.start();
        fill(&recorder, MIN_PARTIAL_CHUNKS - 1);
        assert!(recorder.try_partial_flush().is_none());

        fill(&recorder, 1);
        let (snapshot, _guard) = recorder.try_partial_flush().expect("gate open");
        assert_eq!(snapshot.len(), MIN_PARTIAL_CHUNKS);
    }

    #[test]
    fn partial_flush_is_single_flight() {
        let recorder = SegmentRecorder::new();
        recorder.start();
        fill(&recorder, 5);

        let first = recorder.try_partial_flush();
        assert!(first.is_some());
        // Second request while the first is in flight is dropped.
        assert!(recorder.try_partial_flush().is_none());

        drop(first);
        // Gate reopens once the request settles.
        assert!(recorder.try_partial_flush().is_some());
    }

    #[test]
    fn partial_flush_does_not_consume_chunks() {
        let recorder = SegmentRecorder::new();
        recorder.start();
        fill(&recorder, 3);

        let (snapshot, guard) = recorder.try_partial_flush().unwrap();
        assert_eq!(snapshot.len(), 3);
        drop(guard);

        let final_chunks = recorder.finalize().unwrap();
        assert_eq!(final_chunks.len(), 3);
    }

    #[test]
    fn start_resets_previous_session() {
        let recorder = SegmentRecorder::new();
        recorder.start();
        fill(&recorder, 3);
        recorder.finalize();

        recorder.start();
        assert_eq!(recorder.buffered_chunks(), 0);
        fill(&recorder, 1);
        assert_eq!(recorder.finalize().unwrap().len(), 1);
    }
}
