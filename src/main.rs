//! Application entry point — voice-mixdown.
//!
//! # Startup sequence
//!
//! 1. Parse the command line.
//! 2. Initialise logging.
//! 3. Load [`AppConfig`] from disk (returns default on first run).
//! 4. Create the [`tokio`] runtime.
//! 5. Build the capture host and decoder from config.
//! 6. Run the requested subcommand through the pipeline orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use voice_mixdown::{
    audio::{AudioTrack, CpalHost, RenderRequest, SymphoniaDecoder, TrackSource},
    config::{AppConfig, AppPaths},
    pipeline::{PipelineCommand, PipelineError, PipelineEvent, PipelineOrchestrator},
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "voice-mixdown")]
#[command(about = "Record voice takes and mix tracks down to a WAV file")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "VOICE_MIXDOWN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mix the tracks of a request file (TOML or JSON) and/or --track sources
    Render {
        /// Request file describing tracks and output format
        request: Option<PathBuf>,

        /// Extra track (URL or path) at full gain, appended after the file's tracks
        #[arg(short, long = "track")]
        tracks: Vec<String>,

        /// Output file (defaults to the renders directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the asset summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record from the input device for a fixed time
    Record {
        /// Length of the take in seconds
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,

        /// Output file (defaults to the renders directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List input devices
    Devices,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a request file, choosing the format by extension.
fn load_request(path: &Path) -> Result<RenderRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;

    let mut request: RenderRequest = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON request {}", path.display()))?,
        _ => toml::from_str(&content)
            .with_context(|| format!("invalid TOML request {}", path.display()))?,
    };

    // Relative paths in a request file are relative to the file.
    if let Some(base) = path.parent() {
        for track in &mut request.tracks {
            if let TrackSource::Path(p) = &mut track.source {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
    }
    Ok(request)
}

fn parse_source(arg: &str) -> TrackSource {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        TrackSource::Url(arg.to_string())
    } else {
        TrackSource::Path(PathBuf::from(arg))
    }
}

fn default_output(config: &AppConfig, prefix: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    config
        .output
        .resolve_dir(&AppPaths::new())
        .join(format!("{prefix}-{stamp}.wav"))
}

fn report(err: &PipelineError) -> anyhow::Error {
    match err.remediation() {
        Some(hint) => anyhow::anyhow!("{err}\n  hint: {hint}"),
        None => anyhow::anyhow!("{err}"),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn render(
    config: AppConfig,
    request: Option<PathBuf>,
    tracks: Vec<String>,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let mut request = match request {
        Some(path) => load_request(&path)?,
        None => config.mix.request(Vec::new()),
    };
    request
        .tracks
        .extend(tracks.iter().map(|t| AudioTrack::new(parse_source(t))));
    if request.tracks.is_empty() && request.output_duration_secs.is_none() {
        bail!("nothing to render: give a request file or at least one --track");
    }

    let mut orchestrator = PipelineOrchestrator::new(
        config.clone(),
        Arc::new(CpalHost::new(config.recording.device.clone())),
        Arc::new(SymphoniaDecoder::from_config(&config.decoder)),
    );

    log::info!("rendering {} track(s)", request.tracks.len());
    orchestrator.mix(request).await.map_err(|e| report(&e))?;
    let asset = orchestrator
        .take_asset()
        .context("mix finished without an asset")?;

    let path = output.unwrap_or_else(|| default_output(&config, "mix"));
    asset
        .write_to(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if json {
        let summary = serde_json::json!({
            "path": path,
            "asset": asset,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} ({:.2}s, {} Hz, {} ch, {} bytes)",
            path.display(),
            asset.duration_secs,
            asset.sample_rate,
            asset.channel_count,
            asset.bytes.len()
        );
    }
    Ok(())
}

async fn record(config: AppConfig, seconds: f64, output: Option<PathBuf>) -> Result<()> {
    if !seconds.is_finite() || seconds <= 0.0 {
        bail!("--seconds must be a positive number");
    }

    let orchestrator = PipelineOrchestrator::new(
        config.clone(),
        Arc::new(CpalHost::new(config.recording.device.clone())),
        Arc::new(SymphoniaDecoder::from_config(&config.decoder)),
    );

    let (command_tx, command_rx) = mpsc::channel::<PipelineCommand>(16);
    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(16);
    let pipeline = tokio::spawn(orchestrator.run(command_rx, event_tx));

    command_tx.send(PipelineCommand::StartRecording).await?;
    match event_rx.recv().await {
        Some(PipelineEvent::RecordingStarted { session }) => {
            log::info!("recording session {session} for {seconds:.1}s");
        }
        Some(PipelineEvent::Error(e)) => return Err(report(&e)),
        other => bail!("unexpected pipeline event {other:?}"),
    }

    // A failure while recording arrives as an event before the timer ends.
    let take = tokio::select! {
        event = event_rx.recv() => match event {
            Some(PipelineEvent::RecordingFailed(e)) => return Err(report(&e)),
            other => bail!("unexpected pipeline event {other:?}"),
        },
        _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {
            command_tx.send(PipelineCommand::StopRecording).await?;
            match event_rx.recv().await {
                Some(PipelineEvent::RecordingStopped(take)) => take,
                Some(PipelineEvent::Error(e)) | Some(PipelineEvent::RecordingFailed(e)) => {
                    return Err(report(&e));
                }
                other => bail!("unexpected pipeline event {other:?}"),
            }
        }
    };

    drop(command_tx);
    pipeline.await.context("pipeline task failed")?;

    let path = output.unwrap_or_else(|| default_output(&config, "take"));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    take.write_to(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "{} ({:.2}s, {:?}, {} bytes)",
        path.display(),
        take.duration_secs,
        take.encoding,
        take.bytes.len()
    );
    Ok(())
}

fn devices() -> Result<()> {
    let names = CpalHost::input_device_names().map_err(|e| anyhow::anyhow!("{e}"))?;
    if names.is_empty() {
        println!("no input devices found");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice-mixdown starting up");

    // 2. Configuration
    let loaded = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    match cli.command {
        Command::Render {
            request,
            tracks,
            output,
            json,
        } => rt.block_on(render(config, request, tracks, output, json)),
        Command::Record { seconds, output } => rt.block_on(record(config, seconds, output)),
        Command::Devices => devices(),
    }
}
