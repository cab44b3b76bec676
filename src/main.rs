//! fabric-fractal - headless demo
//!
//! Runs the pipeline against the simulated fabric, logs frame rate and
//! statistics, and optionally writes the last frame as a PGM image.

use anyhow::{anyhow, Context};
use clap::Parser;
use fabric_fractal::{
    backend::{FabricBackend, PipelineEvent},
    config::{FabricTopology, PipelineConfig},
    fabric::MockFabricBackend,
    RenderedFrame,
};
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Longest silence from the backend before giving up
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "fabric-fractal", version, about)]
struct Args {
    /// Pipeline config (TOML or JSON); defaults to the platform config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Floorplan describing the fabric nodes
    #[arg(long)]
    floorplan: Option<PathBuf>,

    /// Workers to request (defaults to the configured maximum)
    #[arg(long)]
    workers: Option<usize>,

    /// Stop after this many frames
    #[arg(long, default_value_t = 100)]
    frames: u64,

    /// Write the last frame to this PGM file
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,fabric_fractal=debug")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fabric-fractal");

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default_path()
            .map(PipelineConfig::load_or_default)
            .unwrap_or_default(),
    };
    let topology = match &args.floorplan {
        Some(path) => FabricTopology::load_floorplan(path)
            .with_context(|| format!("loading floorplan {}", path.display()))?,
        None => FabricTopology::load_or_default(),
    };
    let workers = args.workers.unwrap_or(config.connectivity.max_workers);

    let fabric = MockFabricBackend::new(topology.clone());
    let (backend, frontend) = FabricBackend::new(config, topology, Box::new(fabric))?;
    let backend_handle = std::thread::Builder::new()
        .name("fabric-backend".to_string())
        .spawn(move || backend.run())
        .context("spawning backend thread")?;

    frontend.activate(workers);

    let mut rendered = 0u64;
    let mut last_frame: Option<RenderedFrame> = None;
    while rendered < args.frames {
        match frontend.recv_timeout(EVENT_TIMEOUT) {
            Some(PipelineEvent::RenderedFrame(frame)) => {
                rendered += 1;
                if rendered % 25 == 0 {
                    frontend.request_stats();
                }
                last_frame = Some(frame);
            }
            Some(PipelineEvent::ActiveStateChanged(active)) => {
                tracing::info!("Pipeline {}", if active { "active" } else { "inactive" });
            }
            Some(PipelineEvent::Resources(resources)) => {
                for resource in &resources {
                    tracing::info!("Holding node {} ({})", resource.node, resource.function);
                }
            }
            Some(PipelineEvent::Stats(stats)) => log_stats(&stats),
            Some(PipelineEvent::Fault(reason)) => {
                tracing::error!("Pipeline fault: {}", reason);
                break;
            }
            Some(PipelineEvent::Shutdown) => break,
            None => {
                tracing::warn!("No events for {:?}, stopping", EVENT_TIMEOUT);
                break;
            }
        }
    }

    tracing::info!("Shutting down...");
    frontend.request_stats();
    frontend.shutdown();
    while let Some(event) = frontend.recv_timeout(EVENT_TIMEOUT) {
        match event {
            PipelineEvent::Stats(stats) => log_stats(&stats),
            PipelineEvent::Shutdown => break,
            _ => {}
        }
    }
    backend_handle
        .join()
        .map_err(|_| anyhow!("backend thread panicked"))?;

    if let Some(path) = &args.snapshot {
        let frame = last_frame.ok_or_else(|| anyhow!("no frame rendered, nothing to save"))?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        frame.write_pgm(BufWriter::new(file))?;
        tracing::info!(
            "Wrote {}x{} frame to {}",
            frame.width,
            frame.height,
            path.display()
        );
    }

    tracing::info!("Rendered {} frame(s)", rendered);
    Ok(())
}

fn log_stats(stats: &fabric_fractal::StatsSnapshot) {
    tracing::info!(
        "{:.1} fps, {} frames, {} scanlines, {} dropped, {} duplicate, {} faults",
        stats.frames_per_second,
        stats.frames_rendered,
        stats.scanlines_received,
        stats.dropped_frames,
        stats.duplicate_lines,
        stats.faults
    );
}
