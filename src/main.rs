//! mocopi-tracker - Headless mocopi motion-capture receiver
//!
//! Main entry point for the CLI application.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mocopi_tracker::{
    config::Config, skeleton::PositionMode, ReceiverRegistry, Tracker, TrackerMode,
};

/// mocopi-tracker - Headless mocopi motion-capture receiver
#[derive(Parser, Debug)]
#[command(name = "mocopi-tracker", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// UDP port of the first tracker (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Start every tracker in this mode (overrides config)
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Position resolution mode for every tracker (overrides config)
    #[arg(long, value_enum)]
    position_mode: Option<PositionModeArg>,

    /// Record live sessions
    #[arg(short, long)]
    record: bool,

    /// Recording to replay in playback mode (overrides config)
    #[arg(long)]
    playback_file: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Live,
    Playback,
}

impl From<ModeArg> for TrackerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Live => TrackerMode::Live,
            ModeArg::Playback => TrackerMode::Playback,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PositionModeArg {
    WorldSpace,
    RootRelative,
    Hierarchical,
}

impl From<PositionModeArg> for PositionMode {
    fn from(mode: PositionModeArg) -> Self {
        match mode {
            PositionModeArg::WorldSpace => PositionMode::WorldSpace,
            PositionModeArg::RootRelative => PositionMode::RootRelative,
            PositionModeArg::Hierarchical => PositionMode::Hierarchical,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", mocopi_tracker::NAME, mocopi_tracker::VERSION);

    let config = load_config(&args)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))?;

    info!("mocopi-tracker stopped");
    Ok(())
}

/// Load the config file and apply CLI overrides
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if let Some(ref path) = args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    if let Some(port) = args.port {
        if let Some(first) = config.trackers.first_mut() {
            first.port = port;
        }
    }
    for tracker in &mut config.trackers {
        if let Some(mode) = args.mode {
            tracker.mode = mode.into();
        }
        if let Some(position_mode) = args.position_mode {
            tracker.position_mode = position_mode.into();
        }
        if args.record {
            tracker.recording.enabled = true;
        }
        if let Some(ref file) = args.playback_file {
            tracker.playback.file_name = file.clone();
        }
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: Config) -> anyhow::Result<()> {
    let mut registry = ReceiverRegistry::new();
    let mut trackers: Vec<(Tracker, SocketAddr)> = Vec::with_capacity(config.trackers.len());

    for settings in &config.trackers {
        let endpoint = settings.endpoint()?;
        let tracker = Tracker::new(settings.clone());

        registry
            .subscribe(endpoint, tracker.staging())
            .with_context(|| format!("Tracker '{}' could not listen on {}", settings.name, endpoint))?;

        info!(
            "Tracker '{}' on {} (mode: {:?}, positions: {:?}, mappings: {}, recording: {})",
            settings.name,
            endpoint,
            tracker.mode(),
            settings.position_mode,
            tracker.mappings().len(),
            settings.recording.enabled
        );
        trackers.push((tracker, endpoint));
    }

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(
        1.0 / config.tick_rate_hz as f64,
    ));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut status = (config.status_interval_secs > 0).then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs(config.status_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut last_tick = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;

                for (tracker, _) in &mut trackers {
                    tracker.tick(dt);
                }
            }
            _ = next_status(&mut status) => {
                log_status(&trackers, &registry);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    for (tracker, _) in &mut trackers {
        tracker.shutdown();
    }
    registry.stop_all();

    Ok(())
}

async fn next_status(status: &mut Option<Interval>) {
    match status {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn log_status(trackers: &[(Tracker, SocketAddr)], registry: &ReceiverRegistry) {
    for (tracker, endpoint) in trackers {
        let status = tracker.status();
        let stats = registry.stats(*endpoint).unwrap_or_default();
        info!(
            "[{}] mode={:?} initialized={} last_frame={:?} packets={} errors={} dropped={} recording={} ({} frames) playback={}/{}{}",
            tracker.name(),
            status.mode,
            status.initialized,
            status.last_frame_id,
            stats.frames,
            stats.errors,
            status.frames_dropped,
            status.recording,
            status.recorded_frames,
            status.playback_cursor,
            status.playback_frames,
            if status.playing { " playing" } else { "" }
        );
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
