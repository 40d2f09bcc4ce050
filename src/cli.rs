//! CLI interface for voicebridge

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::audio::devices;
use crate::config::Config;
use crate::engine::{SubtitleSink, Translator};
use crate::health::HealthMonitor;
use crate::logging;

/// The engine may be recreated this many times if its run loop dies while
/// translation was supposed to continue.
const MAX_AUTO_RESTARTS: u32 = 3;

#[derive(Parser)]
#[command(name = "voicebridge")]
#[command(about = "Realtime speech-to-speech translation for meetings and calls", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory for rolling log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start realtime translation (default command)
    Run {
        /// Source language (zh or en)
        #[arg(long)]
        source_lang: Option<String>,
        /// Target language (zh or en)
        #[arg(long)]
        target_lang: Option<String>,
        /// Input device index (see `devices`)
        #[arg(long)]
        input_device: Option<usize>,
        /// Output device index (see `devices`)
        #[arg(long)]
        output_device: Option<usize>,
    },
    /// List audio devices with their indices
    Devices,
    /// Print a health snapshot as JSON
    Health,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_dir)?;

    match cli.command.unwrap_or(Commands::Run {
        source_lang: None,
        target_lang: None,
        input_device: None,
        output_device: None,
    }) {
        Commands::Run {
            source_lang,
            target_lang,
            input_device,
            output_device,
        } => run_engine(source_lang, target_lang, input_device, output_device).await,
        Commands::Devices => list_devices(),
        Commands::Health => print_health().await,
    }
}

/// Prints subtitle sentences to stdout as they arrive.
struct StdoutSubtitles;

impl SubtitleSink for StdoutSubtitles {
    fn on_source_sentence(&self, text: &str) {
        println!("[source] {text}");
    }
    fn on_translation_sentence(&self, text: &str) {
        println!("[translation] {text}");
    }
}

async fn run_engine(
    source_lang: Option<String>,
    target_lang: Option<String>,
    input_device: Option<usize>,
    output_device: Option<usize>,
) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(lang) = source_lang {
        config.translation.source_language = lang;
    }
    if let Some(lang) = target_lang {
        config.translation.target_language = lang;
    }
    if input_device.is_some() {
        config.audio.input_device = input_device;
    }
    if output_device.is_some() {
        config.audio.output_device = output_device;
    }
    config.validate()?;

    let health = HealthMonitor::global();
    let _sampler = health.spawn_sampler();

    let mut restarts = 0u32;
    loop {
        let engine = Translator::new(config.clone());
        engine.subscribe(Arc::new(StdoutSubtitles));
        engine.start().await?;
        info!(
            "translating {} → {}; press Ctrl+C to stop",
            config.translation.source_language, config.translation.target_language
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                engine.stop().await;
                return Ok(());
            }
            _ = engine.crashed() => {
                engine.stop().await;
                restarts += 1;
                if restarts > MAX_AUTO_RESTARTS {
                    anyhow::bail!(
                        "engine exited unexpectedly {MAX_AUTO_RESTARTS} times, giving up"
                    );
                }
                warn!("engine exited unexpectedly, restarting ({restarts}/{MAX_AUTO_RESTARTS})");
            }
        }
    }
}

fn list_devices() -> Result<()> {
    println!("Input devices:");
    for device in devices::list_input_devices()? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, marker);
    }
    println!("\nOutput devices:");
    for device in devices::list_output_devices()? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, marker);
    }
    Ok(())
}

async fn print_health() -> Result<()> {
    let monitor = HealthMonitor::global();
    let sampler = monitor.spawn_sampler();
    // Give the sampler one pass over the process metrics.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    sampler.abort();

    println!("{}", serde_json::to_string_pretty(&monitor.snapshot())?);
    Ok(())
}
