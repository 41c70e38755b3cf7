//! motiond - motion sentry daemon
//!
//! This daemon:
//! 1. Loads configuration (defaults, JSON file, environment)
//! 2. Polls the configured frame source and diffs consecutive frames
//! 3. Raises debounced motion alerts and one alert per source outage
//! 4. Captures evidence, notifies and appends to the event log off-thread
//! 5. Drains pending side effects on Ctrl-C or end of stream

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use motion_sentry::{ConfigOverrides, Monitor, MonitorConfig, StopSignal};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "MOTION_CONFIG")]
    config: Option<PathBuf>,
    /// Frame source: stub://name, an image directory, or an http(s) snapshot URL.
    #[arg(long)]
    source: Option<String>,
    /// End the run after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let overrides = ConfigOverrides {
        source_url: args.source,
    };
    let cfg = MonitorConfig::load_from_with(args.config.as_deref(), &overrides)?;

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("stop requested");
        handler_stop.stop();
    })
    .expect("failed to install Ctrl-C handler");

    let mut monitor = Monitor::from_config(&cfg)?;
    if args.max_frames.is_some() {
        monitor.settings_mut().max_frames = args.max_frames;
    }

    log::info!(
        "motiond {} running. cooldown={}s area_threshold={} fps={}",
        env!("CARGO_PKG_VERSION"),
        cfg.alert.cooldown.as_secs(),
        cfg.detection.area_threshold,
        cfg.source.target_fps
    );

    let summary = monitor.run(&stop);
    log::info!(
        "run ended ({:?}): frames={} alerts={} suppressed={} skipped={} source_lost={}",
        summary.termination,
        summary.frames,
        summary.alerts,
        summary.suppressed,
        summary.skipped,
        summary.source_lost_events
    );
    log::info!(
        "dispatch: delivered={} failed={} dropped={} capture_failures={} log_failures={}",
        summary.dispatch.delivered,
        summary.dispatch.delivery_failures,
        summary.dispatch.dropped,
        summary.dispatch.capture_failures,
        summary.dispatch.log_failures
    );
    if summary.dispatch.abandoned_workers > 0 {
        log::warn!(
            "{} notification worker(s) abandoned at shutdown",
            summary.dispatch.abandoned_workers
        );
    }
    Ok(())
}
