//! Microphone capture source.
//!
//! The orchestrator owns exactly one capture source at a time. `acquire()`
//! opens the device and yields a stream of fixed-size PCM frames;
//! `release()` stops the underlying hardware stream and must run on every
//! exit path (stop, error, teardown) so the device is freed.
//!
//! The cpal stream handle is not `Send`, so a dedicated thread owns it and
//! hands frames out over a channel, the same shape as the playback sink.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::thread;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

pub const SAMPLE_RATE: u32 = 16_000;
/// 256 samples = 16ms at 16kHz, the cadence the VAD samples at.
pub const FRAME_SIZE: usize = 256;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// A fixed-size frame of mono PCM samples at 16kHz.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = AudioFrame> + Send>>;

/// Seam between the orchestrator and the microphone. Production uses
/// [`CpalCapture`]; tests inject a scripted source.
#[async_trait::async_trait]
pub trait CaptureSource: Send + Sync {
    /// Open the device and start delivering frames. Fails with
    /// `PermissionDenied` when the runtime refuses a usable input device.
    async fn acquire(&self) -> Result<FrameStream, CaptureError>;

    /// Stop the hardware stream and free the device. Idempotent.
    async fn release(&self);
}

/// Capture configuration.
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    /// Device name to capture from (None = default input device)
    pub device_id: Option<String>,
    /// Channel to capture (0-based index)
    pub channel: u32,
}

/// Audio device information, for the host UI's device picker.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u32,
}

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// Microphone capture via CPAL.
///
/// Echo cancellation / noise suppression / AGC are whatever the platform's
/// input path provides; CPAL exposes no knobs for them, so the device
/// defaults are left in place.
pub struct CpalCapture {
    config: CaptureConfig,
    worker: Mutex<Option<CaptureWorker>>,
}

impl CpalCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: Mutex::new(None),
        }
    }

    fn open_device(config: &CaptureConfig) -> Result<(Device, cpal::SupportedStreamConfig), CaptureError> {
        let host = cpal::default_host();

        let device = if let Some(id) = &config.device_id {
            host.input_devices()
                .map_err(|e| CaptureError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == *id).unwrap_or(false))
                .ok_or_else(|| CaptureError::Device(format!("Device not found: {}", id)))?
        } else {
            host.default_input_device().ok_or_else(|| {
                CaptureError::PermissionDenied("No default input device available".into())
            })?
        };

        let supported_configs = device
            .supported_input_configs()
            .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?;

        // Prefer a config that natively supports 16kHz; otherwise take the
        // device default and ask the backend for 16kHz anyway.
        let mut supported_config = None;
        for candidate in supported_configs {
            if candidate.min_sample_rate().0 <= SAMPLE_RATE
                && candidate.max_sample_rate().0 >= SAMPLE_RATE
            {
                supported_config = Some(candidate.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)));
                break;
            }
        }
        let supported_config = match supported_config {
            Some(c) => c,
            None => device
                .default_input_config()
                .map_err(|e| CaptureError::Config(e.to_string()))?,
        };

        if config.channel >= u32::from(supported_config.channels()) {
            return Err(CaptureError::Config(format!(
                "Selected channel {} is not available (device has {} channels)",
                config.channel,
                supported_config.channels()
            )));
        }

        Ok((device, supported_config))
    }

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        tx: mpsc::Sender<AudioFrame>,
        channel: u32,
        err_fn: impl FnMut(cpal::StreamError) + Send + 'static + Copy,
    ) -> Result<CpalStream, CaptureError>
    where
        T: Sample + SizedSample + Send + Sync + 'static,
        i16: FromSample<T>,
    {
        let mut buffer = Vec::with_capacity(FRAME_SIZE);
        let channels = config.channels as usize;

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks(channels) {
                        if let Some(sample) = frame.get(channel as usize) {
                            buffer.push(i16::from_sample(*sample));

                            if buffer.len() >= FRAME_SIZE {
                                let _ = tx.try_send(AudioFrame {
                                    samples: buffer.clone(),
                                });
                                buffer.clear();
                            }
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::Stream(e.to_string()))
    }

    /// Enumerate input devices for the host UI.
    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let mut result = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                let config = device
                    .default_input_config()
                    .map_err(|e| CaptureError::Config(e.to_string()))?;

                result.push(AudioDeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    channel_count: u32::from(config.channels()),
                    name,
                });
            }
        }

        Ok(result)
    }
}

#[async_trait::async_trait]
impl CaptureSource for CpalCapture {
    async fn acquire(&self) -> Result<FrameStream, CaptureError> {
        // Tear down any previous stream first; one device handle at a time.
        self.release().await;

        let (frame_tx, frame_rx) = mpsc::channel(32);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = thread::spawn(move || {
            let (device, supported_config) = match Self::open_device(&config) {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let stream_config = cpal::StreamConfig {
                channels: supported_config.channels(),
                sample_rate: cpal::SampleRate(SAMPLE_RATE),
                buffer_size: cpal::BufferSize::Default,
            };

            log::info!(
                "Capture configured: {} channels @ {}Hz (format: {:?})",
                stream_config.channels,
                SAMPLE_RATE,
                supported_config.sample_format()
            );

            let err_fn = move |err| {
                log::error!("Capture stream error: {}", err);
            };

            let stream = match supported_config.sample_format() {
                SampleFormat::I16 => {
                    Self::build_stream::<i16>(&device, &stream_config, frame_tx, config.channel, err_fn)
                }
                SampleFormat::U16 => {
                    Self::build_stream::<u16>(&device, &stream_config, frame_tx, config.channel, err_fn)
                }
                SampleFormat::F32 => {
                    Self::build_stream::<f32>(&device, &stream_config, frame_tx, config.channel, err_fn)
                }
                _ => Err(CaptureError::Config("Unsupported sample format".into())),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Hold the stream alive until release() signals.
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("Capture: input stream stopped");
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                *self.worker.lock().unwrap() = Some(CaptureWorker { stop_tx, thread });
                Ok(Box::pin(ReceiverStream::new(frame_rx)))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Stream("Capture thread exited early".into()))
            }
        }
    }

    async fn release(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(CaptureWorker { stop_tx, thread }) = worker {
            let _ = stop_tx.send(());
            // Join off the async executor; the capture thread may still be
            // inside a hardware callback.
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            log::debug!("Capture: released input device");
        }
    }
}
