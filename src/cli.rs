use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::info;

use airsentry::capture::{self, FrameQueue};
use airsentry::pipeline::PipelineReport;
use airsentry::{Config, ConsoleSink, Pipeline, RuleClassifier};

#[derive(Parser)]
#[command(name = "airsentry")]
#[command(author, version, about = "Passive 802.11 attack detection")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor a wireless interface in real time
    Run {
        /// Interface to capture from (overrides the config file)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Run detection over a recorded capture file
    Replay {
        /// Path to a .pcap recording of monitor-mode traffic
        pcap: PathBuf,
    },

    /// Validate the configuration and exit
    CheckConfig,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Run { interface } => {
            let mut config = config;
            if let Some(interface) = interface {
                config.capture.interface = interface;
            }
            config.validate()?;
            run_live(config).await
        }
        Commands::Replay { pcap } => {
            config.validate()?;
            run_replay(config, pcap).await
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("{}", "configuration ok".green());
            Ok(())
        }
    }
}

async fn run_live(config: Config) -> Result<()> {
    let pipeline = Pipeline::new(config.clone(), Box::new(RuleClassifier::default()));
    let (queue, frame_rx) = FrameQueue::bounded(config.capture.queue_capacity, pipeline.stats());

    let capture_stop = Arc::new(AtomicBool::new(false));
    let capture_handle = capture::spawn_live(&config.capture, queue, capture_stop.clone())
        .with_context(|| {
            format!(
                "cannot start capture on '{}' (monitor mode and CAP_NET_RAW required)",
                config.capture.interface
            )
        })?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let (report, _sink) = pipeline.run(frame_rx, ConsoleSink, shutdown_rx).await?;

    capture_stop.store(true, Ordering::SeqCst);
    let _ = capture_handle.join();

    print_report(&report);
    Ok(())
}

async fn run_replay(config: Config, pcap: PathBuf) -> Result<()> {
    let pipeline = Pipeline::new(config.clone(), Box::new(RuleClassifier::default()));
    // Replay must not shed load: size the queue generously and block the
    // reader instead of evicting.
    let (queue, frame_rx) = FrameQueue::bounded(65_536, pipeline.stats());

    let reader = std::thread::spawn(move || capture::replay_file(&pcap, &queue));

    let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let (report, _sink) = pipeline.run(frame_rx, ConsoleSink, shutdown_rx).await?;

    let delivered = reader
        .join()
        .map_err(|_| anyhow::anyhow!("replay reader panicked"))??;
    info!(frames = delivered, "replay finished");

    print_report(&report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    let s = &report.stats;
    println!();
    println!("{}", "detection summary".bold());
    println!("  frames captured:    {}", s.frames_captured);
    println!("  frames dropped:     {}", s.frames_dropped);
    println!("  late frames:        {}", s.late_frames);
    println!("  windows sealed:     {}", s.windows_sealed);
    println!("  classifier errors:  {}", s.classifier_errors);
    println!("  capture errors:     {}", s.capture_errors);
    println!("  alerts emitted:     {}", s.alerts_emitted);
    for (attack, alerts) in report.alerts_per_attack.iter() {
        println!(
            "    {:13} alerts: {:3}  filtered: {:5}  suppressed: {:5}",
            attack,
            alerts,
            report.filtered.get(attack),
            report.suppressed.get(attack)
        );
    }
}
