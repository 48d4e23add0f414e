use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ddsp_stream::config::{
    AudioConfig, ServerConfig, DEFAULT_FRAME_MS, DEFAULT_HOST, DEFAULT_MODEL_PATH, DEFAULT_PORT,
    DEFAULT_SAMPLE_RATE,
};
use ddsp_stream::control::{ControlState, Pitches};
use ddsp_stream::render::export_wav;
use ddsp_stream::server::Server;
use ddsp_stream::synth::DdspBackend;

/// ddsp-stream - DDSP voices streamed over WebSocket
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept WebSocket clients and stream audio (default)
    Serve(ServeArgs),
    /// Render a fixed pitch/loudness to a WAV file
    Render(RenderArgs),
}

#[derive(Args, Debug, Clone)]
struct AudioArgs {
    /// Output sample rate in Hz
    #[arg(long, env = "DDSP_SAMPLE_RATE", default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Frame length in milliseconds
    #[arg(long, env = "DDSP_FRAME_MS", default_value_t = DEFAULT_FRAME_MS)]
    frame_ms: u32,

    /// Timbre model (JSON)
    #[arg(long, env = "DDSP_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,
}

impl AudioArgs {
    fn audio(&self) -> Result<AudioConfig> {
        AudioConfig::new(self.sample_rate, self.frame_ms)
    }
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "DDSP_HOST", default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, env = "DDSP_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Require a hello message carrying this secret
    #[arg(long, env = "DDSP_SECRET")]
    secret: Option<String>,

    #[command(flatten)]
    audio: AudioArgs,
}

/// No subcommand: serve with flags taken from the environment
#[derive(Parser, Debug)]
struct DefaultServe {
    #[command(flatten)]
    args: ServeArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Comma-separated pitches in Hz, up to three voices
    #[arg(long, value_delimiter = ',', default_value = "440")]
    f0s: Vec<f32>,

    /// Normalized loudness 0..1
    #[arg(long, default_value_t = 0.5)]
    loudness: f32,

    /// Length of the render in seconds
    #[arg(long, default_value_t = 2.0)]
    seconds: f32,

    #[command(flatten)]
    audio: AudioArgs,

    /// Output WAV path
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Render(args)) => render(args),
        Some(Command::Serve(args)) => serve(args),
        None => serve(DefaultServe::parse_from(["ddsp-stream"]).args),
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        audio: args.audio.audio()?,
        model_path: args.audio.model,
        secret: args.secret.filter(|s| !s.is_empty()),
    };

    if !config.model_path.exists() {
        tracing::warn!(
            model = %config.model_path.display(),
            "model file missing, sessions will be refused until it exists"
        );
    }

    let backend = Arc::new(DdspBackend::new(config.model_path.clone()));
    let server = Server::bind(&config, backend)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("Failed to install Ctrl-C handler")?;

    server.run(shutdown)
}

fn render(args: RenderArgs) -> Result<()> {
    let audio = args.audio.audio()?;
    let state = ControlState {
        pitches: Pitches::from_values(args.f0s.iter().copied()),
        loudness: args.loudness,
    };
    if state.voice_count() < args.f0s.len() {
        tracing::warn!(
            given = args.f0s.len(),
            used = state.voice_count(),
            "extra or invalid pitches dropped"
        );
    }

    let backend = DdspBackend::new(args.audio.model.clone());
    let result = export_wav(&backend, audio, &state, args.seconds, &args.output)?;
    println!(
        "Wrote {} ({:.2}s, {} samples)",
        args.output.display(),
        result.duration_secs,
        result.samples
    );
    Ok(())
}
