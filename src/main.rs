use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use sleepguard::config::AppConfig;
use sleepguard::diagnostics::{event_types, FanoutSink, MemorySink, TracingSink};
use sleepguard::logging::{init_logging, LogLevel};
use sleepguard::{replay, DistressMonitor, ProtocolEvent, SilentAudio};

/// SleepGuard - Night distress detection
///
/// Replays recorded sleep biometrics through the distress detector and
/// reports detected episodes, calming cues and recoveries.
#[derive(Parser)]
#[command(name = "sleepguard")]
#[command(author = "SleepGuard Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Night distress detection", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detector over a recorded night (CSV)
    Replay {
        /// Recording path
        #[arg(short, long)]
        file: PathBuf,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Inspect or create the configuration file
    Config {
        /// Write the default configuration
        #[arg(long)]
        init: bool,

        /// Print the active configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_or_default(),
    };

    let mut log_config = config.logging.clone();
    if cli.verbose > 0 {
        log_config.level = LogLevel::from_verbosity(cli.verbose);
    }
    init_logging(&log_config)?;

    match cli.command {
        Commands::Replay { file, json } => run_replay(&config, file, json).await,
        Commands::Config { init, show } => {
            let path = cli.config.unwrap_or_else(AppConfig::default_config_path);
            if init {
                AppConfig::default().save_to_file(&path)?;
                println!("{} {}", "✓ Wrote default configuration to".green(), path.display());
            }
            if show || !init {
                println!("{}", format!("# {}", path.display()).dimmed());
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
    }
}

async fn run_replay(config: &AppConfig, file: PathBuf, json: bool) -> Result<()> {
    let source = replay::open_csv(&file)?;

    let memory = MemorySink::new();
    let sink = FanoutSink::new()
        .with_sink(Arc::new(TracingSink))
        .with_sink(Arc::new(memory.clone()));
    let monitor = DistressMonitor::from_app_config(config, Arc::new(sink));

    if !json {
        println!("{}", "Replaying recording...".cyan().bold());
        println!("  File: {}", file.display());
        println!("  Session: {}", monitor.session_id());
    }

    let mut events = monitor.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        loop {
            match events.recv().await {
                Ok(event) => {
                    print_event(&event, json)?;
                    printed += 1;
                }
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("{}", format!("⚠️  {} events dropped", missed).yellow());
                }
                Err(RecvError::Closed) => break,
            }
        }
        anyhow::Ok(printed)
    });

    monitor.start(source, Arc::new(SilentAudio));
    monitor.wait_until_detached().await;
    monitor.settle().await;
    monitor.stop();
    drop(monitor);

    let printed = printer.await.context("event printer panicked")??;

    if !json {
        println!();
        println!("{}", "📊 Replay Summary:".bold());
        println!("   Events: {}", printed);
        println!(
            "   Episodes: {}",
            memory.count_of(event_types::DISTRESS_DETECTED)
        );
        println!(
            "   Suppressed by cooldown: {}",
            memory.count_of(event_types::DETECTION_SUPPRESSED)
        );
        println!("   Recoveries: {}", memory.count_of(event_types::RECOVERED));
        let source_errors = memory.count_of(event_types::SOURCE_ERROR);
        if source_errors > 0 {
            println!(
                "   {}",
                format!("Skipped rows: {}", source_errors).yellow()
            );
        }
    }

    Ok(())
}

fn print_event(event: &ProtocolEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let line = event.to_string();
    match event {
        ProtocolEvent::DetectedDistress { .. } => println!("{}", line.red().bold()),
        ProtocolEvent::CuePlayed { .. } => println!("{}", line.blue()),
        ProtocolEvent::Recovered { .. } => println!("{}", line.green()),
    }
    Ok(())
}
