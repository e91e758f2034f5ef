//! Shared audio output element built on CPAL.
//!
//! One playback thread owns the output stream; audio is queued as f32
//! samples at its source rate and linearly interpolated to the device rate
//! in the output callback. The queue, pause flag and gain are shared so
//! `stop`/`pause`/`set_volume` take effect on the next callback. Queue
//! drain raises a single `MediaEvent::Ended` for the controller's
//! dispatcher.

use super::{MediaEvent, PlaybackError, PlaybackResource};
use crate::local::LocalSynthesizer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;

struct PlaybackQueue {
    samples: Vec<f32>,
    /// Sample rate of the queued audio.
    rate: u32,
    /// True from enqueue until the queue drains; gates the Ended event.
    active: bool,
}

struct SinkShared {
    queue: Mutex<PlaybackQueue>,
    paused: AtomicBool,
    muted: AtomicBool,
    /// f32 gain stored as bits; the audio callback must not lock.
    gain_bits: AtomicU32,
    events: mpsc::UnboundedSender<MediaEvent>,
}

impl SinkShared {
    fn gain(&self) -> f32 {
        if self.muted.load(Ordering::Acquire) {
            0.0
        } else {
            f32::from_bits(self.gain_bits.load(Ordering::Acquire))
        }
    }
}

pub struct CpalPlayback {
    shared: Arc<SinkShared>,
    local: Option<Arc<dyn LocalSynthesizer>>,
    shutdown_tx: std_mpsc::Sender<()>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalPlayback {
    /// Open the default output device and start the playback thread.
    /// `events` receives one `Ended` per completed playback.
    pub fn new(
        events: mpsc::UnboundedSender<MediaEvent>,
        local: Option<Arc<dyn LocalSynthesizer>>,
    ) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("No output device found".to_string()))?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        log::debug!("Playback sink: output config {:?}", supported_config);

        let output_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels() as usize;

        let shared = Arc::new(SinkShared {
            queue: Mutex::new(PlaybackQueue {
                samples: Vec::new(),
                rate: crate::capture::SAMPLE_RATE,
                active: false,
            }),
            paused: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            events,
        });
        let shared_cb = Arc::clone(&shared);

        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = thread::spawn(move || {
            let stream = match device.build_output_stream(
                &supported_config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if shared_cb.paused.load(Ordering::Acquire) {
                        data.fill(0.0);
                        return;
                    }

                    let gain = shared_cb.gain();
                    let mut queue = shared_cb.queue.lock().unwrap();
                    let step = queue.rate as f32 / output_rate as f32;

                    let mut pos: f32 = 0.0;
                    for frame in data.chunks_mut(output_channels) {
                        let sample = if !queue.samples.is_empty() {
                            let idx = pos.floor() as usize;
                            let next = idx + 1;
                            let fract = pos.fract();
                            let a = queue.samples.get(idx).copied().unwrap_or(0.0);
                            let b = queue.samples.get(next).copied().unwrap_or(0.0);
                            (a * (1.0 - fract) + b * fract) * gain
                        } else {
                            0.0
                        };

                        for channel in frame.iter_mut() {
                            *channel = sample;
                        }
                        pos += step;
                    }

                    let consumed = (pos.ceil() as usize).min(queue.samples.len());
                    queue.samples.drain(0..consumed);

                    if queue.active && queue.samples.is_empty() {
                        queue.active = false;
                        let _ = shared_cb.events.send(MediaEvent::Ended);
                    }
                },
                move |err| {
                    log::error!("Playback sink: stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Playback sink: failed to create output stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Playback sink: failed to start output stream: {}", e);
                return;
            }

            // Hold the stream alive until shutdown.
            let _ = shutdown_rx.recv();
            drop(stream);
            log::debug!("Playback sink: output stream stopped");
        });

        Ok(Self {
            shared,
            local,
            shutdown_tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn enqueue_wav(&self, bytes: &[u8]) -> Result<(), PlaybackError> {
        let (samples, rate) = decode_wav(bytes)?;
        let mut queue = self.shared.queue.lock().unwrap();
        queue.samples = samples;
        queue.rate = rate;
        queue.active = true;
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.lock().unwrap().take() {
            if thread.join().is_err() {
                log::error!("Playback sink: failed to join playback thread");
            }
        }
    }
}

#[async_trait::async_trait]
impl PlaybackResource for CpalPlayback {
    async fn play_remote(&self, audio: &[u8]) -> Result<(), PlaybackError> {
        self.enqueue_wav(audio)
    }

    async fn speak_local(&self, text: &str) -> Result<(), PlaybackError> {
        let engine = self
            .local
            .as_ref()
            .ok_or(PlaybackError::SynthesisUnsupported)?;
        let wav = engine
            .synthesize(text)
            .await
            .ok_or(PlaybackError::SynthesisUnsupported)?;
        self.enqueue_wav(&wav)
    }

    async fn supports_local(&self) -> bool {
        match &self.local {
            Some(engine) => engine.is_available().await,
            None => false,
        }
    }

    async fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    async fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    async fn stop(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.samples.clear();
        queue.active = false;
        self.shared.paused.store(false, Ordering::Release);
    }

    fn set_volume(&self, volume: f32) {
        self.shared
            .gain_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Release);
    }
}

/// Decode WAV bytes to mono f32 samples plus their sample rate.
fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32), PlaybackError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(e.to_string()))?,
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(e.to_string()))?,
        (format, bits) => {
            return Err(PlaybackError::Decode(format!(
                "Unsupported WAV format: {:?} @ {} bits",
                format, bits
            )))
        }
    };

    // Downmix to mono by averaging channels.
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], channels: u16, rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decode_mono_wav() {
        let bytes = wav_bytes(&[0, i16::MAX, i16::MIN + 1], 1, 22_050);
        let (samples, rate) = decode_wav(&bytes).unwrap();
        assert_eq!(rate, 22_050);
        assert_eq!(samples.len(), 3);
        assert!((samples[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn decode_downmixes_stereo() {
        let bytes = wav_bytes(&[1000, 3000, 2000, 4000], 2, 16_000);
        let (samples, _) = decode_wav(&bytes).unwrap();
        assert_eq!(samples.len(), 2);
        let expected = (1000.0 + 3000.0) / 2.0 / i16::MAX as f32;
        assert!((samples[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_wav(&[0u8; 16]).is_err());
    }

    #[cfg(feature = "test-audio")]
    #[tokio::test]
    #[serial_test::serial]
    async fn sink_roundtrip_on_device() {
        let (tx, _rx) = mpsc::unbounded_channel();
        match CpalPlayback::new(tx, None) {
            Ok(sink) => {
                let bytes = wav_bytes(&vec![2000i16; 16_000], 1, 16_000);
                sink.play_remote(&bytes).await.unwrap();
                sink.pause().await;
                sink.resume().await;
                sink.stop().await;
            }
            Err(e) => {
                println!(
                    "Audio device not available in test environment - this is expected: {}",
                    e
                );
            }
        }
    }
}
