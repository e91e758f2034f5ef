use anyhow::Context;
use clap::Parser;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use voiceloop::{
    capture::{CaptureConfig, CpalCapture},
    config::load_config,
    events::PipelineEvent,
    local::EspeakSynthesizer,
    orchestrator::{OrchestratorConfig, VoiceChatOrchestrator},
    playback::{CpalPlayback, PlaybackController},
    stt::{HttpTranscriber, SttConfig},
    tts::{HttpTts, TtsConfig, VoiceProfile},
    visualizer::VisualizerFeed,
};

#[derive(Parser, Debug)]
#[command(name = "voiceloop", about = "Voice chat pipeline demo: record, transcribe, speak back")]
struct Args {
    /// Input device name (default: system default)
    #[arg(long)]
    device: Option<String>,

    /// Synthesis voice
    #[arg(long, default_value = "alloy")]
    voice: String,

    /// Disable automatic stop on sustained silence
    #[arg(long)]
    no_auto_stop: bool,

    /// Playback volume, 0-100
    #[arg(long, default_value_t = 80)]
    volume: u8,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_devices {
        for device in CpalCapture::list_devices().context("Failed to list input devices")? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{} [{} ch]{}", device.name, device.channel_count, marker);
        }
        return Ok(());
    }

    // Check for API keys
    if env::var("TRANSCRIBE_API_KEY").is_err() {
        eprintln!("❌ TRANSCRIBE_API_KEY environment variable not set");
        eprintln!("   Please set it with: export TRANSCRIBE_API_KEY=your_key_here");
        std::process::exit(1);
    }
    if env::var("TTS_API_KEY").is_err() {
        eprintln!("❌ TTS_API_KEY environment variable not set");
        eprintln!("   Please set it with: export TTS_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let api_config = load_config()?;
    let voice = VoiceProfile::from_str(&args.voice)
        .with_context(|| format!("Unknown voice '{}'", args.voice))?;

    let capture = Arc::new(CpalCapture::new(CaptureConfig {
        device_id: args.device.clone(),
        channel: 0,
    }));
    let transcriber = Arc::new(HttpTranscriber::new(
        api_config.stt_key().to_string(),
        SttConfig::new(api_config.stt_endpoint.clone()),
    )?);
    log::info!("🎤 Transcription client initialized");

    let tts = Arc::new(HttpTts::new(
        api_config.tts_key().to_string(),
        TtsConfig::new(api_config.tts_endpoint.clone()),
    )?);

    let (media_tx, mut media_rx) = mpsc::unbounded_channel();
    let resource = Arc::new(
        CpalPlayback::new(media_tx, Some(Arc::new(EspeakSynthesizer::new())))
            .context("Failed to open audio output")?,
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let playback = Arc::new(
        PlaybackController::new(tts, resource).with_events(event_tx.clone()),
    );
    playback.set_volume(args.volume);
    log::info!("🔊 Playback initialized");

    let (sent_tx, mut sent_rx) = mpsc::unbounded_channel::<String>();
    let on_send: voiceloop::orchestrator::SendMessageFn = Arc::new(move |text: String| {
        let _ = sent_tx.send(text);
    });

    let orchestrator = VoiceChatOrchestrator::new(
        capture,
        transcriber,
        OrchestratorConfig {
            auto_stop: !args.no_auto_stop,
            ..Default::default()
        },
        event_tx,
        on_send,
        Some(Arc::clone(&playback)),
    );

    println!("🎧 Speak after the prompt; pause to finish a message");
    println!("   Press Ctrl+C to exit");
    orchestrator.start().await?;

    let mut visualizer = VisualizerFeed::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 Shutting down");
                orchestrator.reset().await;
                break;
            }
            Some(text) = sent_rx.recv() => {
                println!("📝 You said: \"{}\"", text);
                // No chat backend in the demo; speak the transcript back.
                if let Err(e) = playback.play(&format!("You said: {}", text), voice).await {
                    eprintln!("⚠️  Playback failed: {}", e);
                }
                orchestrator.start().await?;
            }
            Some(event) = media_rx.recv() => {
                playback.handle_media_event(event);
            }
            Some(event) = event_rx.recv() => {
                match event {
                    PipelineEvent::StateChanged(status) => log::info!("State: {}", status),
                    PipelineEvent::PartialTranscript(text) => println!("… {}", text),
                    PipelineEvent::SessionError(message) => eprintln!("⚠️  {}", message),
                    PipelineEvent::PremiumVoiceNotice(message) => println!("ℹ️  {}", message),
                    PipelineEvent::Elapsed(secs) => log::debug!("Recording: {}s", secs),
                    PipelineEvent::NoiseLevel(level) => {
                        visualizer.push(level);
                        log::trace!("Level: {:.1} dBFS {:?}", level, visualizer.bars());
                    }
                }
            }
        }
    }

    Ok(())
}
