//! realtime-tts-rs: speaks streaming chat replies through a remote TTS service.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use realtime_tts::config::{clamp_speed, Config, TransportKind};
use realtime_tts::reply_speaker::api::{self, SpeechApiState};
use realtime_tts::reply_speaker::client::{HttpSynthesizer, Synthesizer};
use realtime_tts::reply_speaker::playback::{AudioOutput, RodioOutput};
use realtime_tts::reply_speaker::upstream::UpstreamSynthesizer;
use realtime_tts::reply_speaker::voices::VoiceCatalog;
use realtime_tts::SpeechController;

#[derive(Parser, Debug)]
#[command(name = "realtime-tts-rs", about = "Real-time token-to-speech service")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Voice id (voice_type), overrides the config
    #[arg(long)]
    voice: Option<String>,

    /// Speed ratio (0.5 - 2.0), overrides the config
    #[arg(long)]
    speed: Option<f32>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("realtime-tts-rs starting");

    let mut config = Config::load(args.config.as_deref());
    if let Some(voice) = args.voice {
        config.tts.voice = Some(voice);
    }
    if let Some(speed) = args.speed {
        config.tts.speed = clamp_speed(speed);
    }

    let catalog = VoiceCatalog::load_configured(&config).await;
    if config.tts.voice.is_none() {
        config.tts.voice = catalog.default_voice().map(|v| v.voice_type.clone());
    }
    match &config.tts.voice {
        Some(voice) => info!("Voice: {voice}, speed: {:.2}", config.tts.speed),
        None => warn!("No voice configured; speech stays silent until one is set"),
    }

    let synthesizer: Arc<dyn Synthesizer> = match config.tts.transport {
        TransportKind::Http => {
            info!("Synthesizing via relay {}", config.tts.endpoint);
            Arc::new(HttpSynthesizer::new(&config.tts)?)
        }
        TransportKind::Websocket => {
            info!("Synthesizing via upstream {}", config.tts.upstream_url);
            Arc::new(UpstreamSynthesizer::new(&config.tts))
        }
    };

    let output = RodioOutput::open_default().map(|o| Box::new(o) as Box<dyn AudioOutput>);
    let mut controller = SpeechController::new(synthesizer, output, &config.tts);
    controller.on_status_change(Box::new(|status| {
        info!(
            "Status: streaming={} playing={} paused={} output={}",
            status.is_streaming, status.is_playing, status.is_paused, status.output_available
        );
    }));
    let speech = controller.spawn();

    if config.api.enabled {
        let state = SpeechApiState {
            speech: speech.clone(),
            catalog: Arc::new(catalog),
        };
        let addr = format!("{}:{}", config.api.host, config.api.port);
        if api::start_api(state, &addr).await.is_none() {
            warn!("Control API disabled");
        }
    } else {
        info!("Control API disabled in config");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    speech.stop().await?;

    Ok(())
}
