//! Ambient LED driver
//!
//! Samples screen regions and streams the colors to LED strip controllers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ambient_led::capture::{SharedBackend, StaticCapture};
use ambient_led::color::Color;
use ambient_led::config::{ConfigDirectory, InstanceConfig};
use ambient_led::device::SystemConnectors;
use ambient_led::pipeline::Scheduler;
use ambient_led::registry::InstanceRegistry;

mod cli;
use cli::{CaptureKind, Cli, Commands, RunArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(EnvFilter::from_default_env())?)
        .init();

    match cli.command {
        None | Some(Commands::Run) => run(cli.run),
        Some(Commands::Check { files }) => check(&files),
        Some(Commands::Ports) => ports(),
    }
}

/// Info logs from this crate and the transports on top of `base`
fn log_filter(base: EnvFilter) -> Result<EnvFilter> {
    Ok(base
        .add_directive("ambient_led=info".parse()?)
        .add_directive("ambient_transport=info".parse()?))
}

fn check(files: &[std::path::PathBuf]) -> Result<()> {
    let mut failed = 0;
    for file in files {
        match InstanceConfig::load_from_file(file) {
            Ok(config) => println!(
                "{}: ok ({} strips, {} tasks)",
                file.display(),
                config.strips.len(),
                config.task_count()
            ),
            Err(e) => {
                println!("{}: {e}", file.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} configurations invalid", files.len());
    }
    Ok(())
}

fn ports() -> Result<()> {
    let ports = ambient_led::transport::list_ports().context("Listing serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for (name, description) in ports {
        println!("{name:<20} {description}");
    }
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let workers = args.workers.max(1);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(workers)
        .thread_name("ambient-led")
        .build()
        .context("Building runtime")?;

    runtime.block_on(serve(args, workers))
}

/// Install a Ctrl+C handler that flips the returned watch to true
fn setup_interrupt_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(true);
    }) {
        warn!("Cannot install Ctrl+C handler: {e}");
    }
    rx
}

async fn capture_backend(args: &RunArgs) -> Result<SharedBackend> {
    match args.capture {
        CaptureKind::Static => Ok(Arc::new(StaticCapture::new(Color::from_packed(
            args.static_color,
        )))),
        #[cfg(feature = "screen-capture")]
        CaptureKind::Pipewire => {
            let backend = ambient_led::capture::pipewire::PipewireCapture::start(args.capture_fps)
                .await
                .context("Starting PipeWire capture")?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "screen-capture"))]
        CaptureKind::Pipewire => {
            bail!("built without the `screen-capture` feature, use --capture static")
        }
    }
}

async fn serve(args: RunArgs, workers: usize) -> Result<()> {
    let shutdown = setup_interrupt_handler();
    let backend = capture_backend(&args).await?;
    info!(
        backend = backend.name(),
        workers,
        config_dir = %args.config_dir.display(),
        "Starting"
    );

    let scheduler = Scheduler::current(workers);
    let mut registry = InstanceRegistry::new(backend, Arc::new(SystemConnectors), scheduler);
    if args.paused {
        registry.set_paused(true);
    }

    let (events_tx, events_rx) = mpsc::channel(16);
    let poll = Duration::from_millis(args.poll_ms.max(10));
    let mut directory = ConfigDirectory::new(&args.config_dir);
    let mut poll_shutdown = shutdown.clone();

    let poller = tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = poll_shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            let events = match directory.scan() {
                Ok(events) => events,
                Err(e) => {
                    warn!(dir = %directory.path().display(), "Cannot scan config directory: {e}");
                    continue;
                }
            };
            for event in events {
                if events_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    });

    registry.run(events_rx, shutdown).await;
    if let Err(e) = poller.await {
        error!("Config poller failed: {e}");
    }
    info!("Stopped");
    Ok(())
}
