use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{DirectorySink, EmbeddingStore, SessionSummary};
use rollcall_hw::Camera;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod surface;

use config::{Config, Overrides};
use surface::PreviewSurface;

#[derive(Parser)]
#[command(name = "rollcall", about = "Live face-recognition attendance")]
struct Cli {
    /// TOML config file (default: $ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// V4L2 device path, or a directory of images to replay
    #[arg(long, global = true)]
    source: Option<String>,
    /// JSON roster of enrolled embeddings
    #[arg(long, global = true)]
    roster: Option<PathBuf>,
    /// Directory for attendance reports
    #[arg(long, global = true)]
    record_dir: Option<PathBuf>,
    /// Cosine similarity threshold for a match
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Run detection on every Nth frame
    #[arg(long, global = true)]
    process_every: Option<usize>,
    /// Write a periodic JPEG preview of the overlay here
    #[arg(long, global = true)]
    preview: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance until the source ends or you press q / Ctrl-C (default)
    Run,
    /// Show the enrolled roster
    Roster,
    /// List V4L2 capture devices
    Devices,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            source: self.source.clone(),
            roster: self.roster.clone(),
            record_dir: self.record_dir.clone(),
            threshold: self.threshold,
            process_every: self.process_every,
            preview: self.preview.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Devices) => list_devices(),
        Some(Commands::Roster) => show_roster(&Config::load(&cli.overrides())?),
        Some(Commands::Run) | None => run(Config::load(&cli.overrides())?).await,
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(source = %config.source, roster = %config.roster_path.display(), "rollcall starting");

    let stop = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let session = engine::build_session(&config, Arc::clone(&stop), events_tx)
        .context("failed to start attendance session")?;
    let notifier = engine::spawn_notifier(events_rx)?;

    let source = engine::open_source(&config);
    let surface = PreviewSurface::new(config.preview_path.clone(), config.preview_every, Arc::clone(&stop));
    let sink = DirectorySink::new(&config.record_dir);
    let handle = engine::spawn_session(session, source, Box::new(surface), Box::new(sink))?;

    watch_ctrl_c(Arc::clone(&stop));
    watch_stdin(Arc::clone(&stop));

    let summary = tokio::task::spawn_blocking(move || engine::join_session(handle))
        .await
        .context("session join task failed")??;

    // The session (and its event sender) is gone, so the notifier drains and exits.
    if notifier.join().is_err() {
        tracing::warn!("notifier thread panicked");
    }

    print_summary(&summary);
    Ok(())
}

fn watch_ctrl_c(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping session");
            stop.store(true, Ordering::Relaxed);
        }
    });
}

/// Stop on a `q` line. Runs on a plain thread: a blocking stdin read
/// would otherwise hold up runtime shutdown.
fn watch_stdin(stop: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    tracing::info!("quit requested, stopping session");
                    stop.store(true, Ordering::Relaxed);
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "keyboard quit unavailable");
    }
}

fn print_summary(summary: &SessionSummary) {
    println!(
        "Session {}: {} frames read, {} processed, {} present",
        summary.session_id,
        summary.frames_read,
        summary.frames_processed,
        summary.present.len()
    );
    match &summary.report {
        Some(path) => println!("Attendance written to {}", path.display()),
        None if summary.present.is_empty() => println!("No attendance recorded"),
        None => println!("Attendance report could not be written (see log)"),
    }
}

fn show_roster(config: &Config) -> Result<()> {
    let store = EmbeddingStore::load(&config.roster_path)?;
    println!(
        "{}: {} identities, {} embeddings of dimension {}",
        config.roster_path.display(),
        store.known_identities().len(),
        store.len(),
        store.dimension()
    );
    for (identity, count) in store.entry_counts() {
        println!("  {identity:<24} {count}");
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for device in devices {
        println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
    }
    Ok(())
}
