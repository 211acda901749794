//! Audio Player (chirp-ap) - Main entry point
//!
//! Command-line front end for the playback engine:
//! - `play`: mix one or more files through the default output device
//! - `chirp`: play a test sweep
//! - `probe`: print what the engine would see in a file, as JSON

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chirp_ap::audio::AudioOutput;
use chirp_ap::playback::ChirpParams;
use chirp_ap::{AudioEngine, FillPump, StorageKind};
use chirp_common::EngineConfig;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fill pump period
const FILL_PERIOD: Duration = Duration::from_millis(5);

/// How often the front end checks whether playback has finished
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Command-line arguments for chirp-ap
#[derive(Parser, Debug)]
#[command(name = "chirp-ap")]
#[command(about = "Multi-stream audio player and mixer")]
#[command(version)]
struct Cli {
    /// Configuration file (overrides CHIRP_CONFIG and the default locations)
    #[arg(short, long, global = true, env = "CHIRP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play files concurrently, one slot each, until they finish
    Play {
        /// Paths relative to the storage root
        #[arg(required = true)]
        files: Vec<String>,

        /// Read from internal flash instead of the card
        #[arg(long)]
        flash: bool,

        /// Override the storage root directory
        #[arg(long)]
        root: Option<PathBuf>,

        /// Per-stream volume (0.0-1.0)
        #[arg(long, default_value_t = 1.0)]
        volume: f32,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Play a linear frequency sweep
    Chirp {
        #[arg(long, default_value_t = 500)]
        start_hz: u32,

        #[arg(long, default_value_t = 4000)]
        end_hz: u32,

        #[arg(long, default_value_t = 250)]
        duration_ms: u32,

        /// Amplitude 0-255
        #[arg(long, default_value_t = 128)]
        level: u8,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print header and container details of a file as JSON
    Probe {
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output device name (default device if omitted or not found)
    #[arg(long)]
    device: Option<String>,

    /// Print engine diagnostics as JSON when playback ends
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    let default_filter = format!("chirp_ap={level},chirp_common={level}", level = config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Probe { file } => {
            let report = chirp_ap::probe::probe_file(&file)
                .with_context(|| format!("Failed to probe {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Play {
            files,
            flash,
            root,
            volume,
            output,
        } => {
            let kind = if flash { StorageKind::Flash } else { StorageKind::Card };
            let mut config = config;
            if let Some(root) = root {
                match kind {
                    StorageKind::Card => config.card_root = root,
                    StorageKind::Flash => config.flash_root = root,
                }
            }
            play(config, &output, |engine| {
                if files.len() > engine.slot_count() {
                    warn!(
                        "{} files requested, only {} slots; extra files skipped",
                        files.len(),
                        engine.slot_count()
                    );
                }
                for (slot, file) in files.iter().take(engine.slot_count()).enumerate() {
                    engine
                        .start_stream(slot, file, kind)
                        .with_context(|| format!("Failed to start {} on {}", file, kind))?;
                    engine.set_volume(slot, volume)?;
                }
                Ok(())
            })
            .await
        }
        Command::Chirp {
            start_hz,
            end_hz,
            duration_ms,
            level,
            output,
        } => {
            let params = ChirpParams {
                start_hz,
                end_hz,
                duration_ms,
                volume: level,
            };
            play(config, &output, |engine| {
                engine.start_chirp(0, params).context("Failed to start chirp")
            })
            .await
        }
    }
}

/// Bring up engine, output and fill pump, run `start`, then wait until every
/// slot is idle or Ctrl+C arrives
async fn play<F>(config: EngineConfig, args: &OutputArgs, start: F) -> Result<()>
where
    F: FnOnce(&mut AudioEngine) -> Result<()>,
{
    let sample_rate = config.output_sample_rate;
    let engine = AudioEngine::new(config).context("Failed to initialize audio engine")?;

    let mut output = AudioOutput::new(args.device.as_deref(), sample_rate).context("Failed to open audio output")?;
    info!("Output device: {} ({} Hz)", output.device_name(), output.sample_rate());

    // Hold the output silent while streams are being started
    engine.set_audio_allowed(false);
    output.start(engine.mixer()).context("Failed to start audio output")?;

    let engine = Arc::new(Mutex::new(engine));
    {
        let mut guard = lock(&engine)?;
        start(&mut *guard)?;
        guard.set_audio_allowed(true);
    }
    let pump = FillPump::spawn(Arc::clone(&engine), FILL_PERIOD).context("Failed to start fill pump")?;

    tokio::select! {
        result = wait_idle(&engine) => result?,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping playback");
        }
    }

    pump.shutdown();
    let mut guard = lock(&engine)?;
    guard.stop_all();
    if args.stats {
        println!("{}", serde_json::to_string_pretty(&guard.diagnostics())?);
    }
    drop(guard);

    output.stop().context("Failed to stop audio output")?;
    info!("Playback finished");
    Ok(())
}

async fn wait_idle(engine: &Mutex<AudioEngine>) -> Result<()> {
    loop {
        if lock(engine)?.is_idle() {
            return Ok(());
        }
        tokio::time::sleep(IDLE_POLL).await;
    }
}

fn lock(engine: &Mutex<AudioEngine>) -> Result<MutexGuard<'_, AudioEngine>> {
    engine.lock().map_err(|_| anyhow!("Audio engine lock poisoned"))
}
