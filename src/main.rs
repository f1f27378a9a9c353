use anyhow::{Result, anyhow};
use blutrack::config::TrackerConfig;
use blutrack::platform::discover_anchors;
use blutrack::service::TrackerService;
use blutrack::tracker::{PositionEstimator, SystemClock, Tracker};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "usage: blutrack [--config <path>]";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        println!("{USAGE}");
        return Ok(());
    }
    let config_path: Option<PathBuf> = args
        .opt_value_from_str("--config")
        .map_err(|e| anyhow!("{e}\n{USAGE}"))?;

    let config = match config_path {
        Some(path) => TrackerConfig::load(&path)?,
        None => TrackerConfig::default(),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))
}

async fn run(config: TrackerConfig) -> Result<()> {
    let tracker = Tracker::new(PositionEstimator::new(config.stale_after_ms), SystemClock);
    let mut service = TrackerService::start(tracker);

    for source in discover_anchors(&config).await? {
        let name = source.anchor_name().to_string();
        let (x, y) = config.placement_for(&name);
        if let Err(e) = service.add_anchor(&name, x, y, Arc::new(source)).await {
            warn!("跳过锚点 {}: {}", name, e);
        }
    }

    let mut ticker = tokio::time::interval(config.report_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for position in service.positions().await {
                    if position.enabled {
                        info!("{}", position);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    service.shutdown().await;
    Ok(())
}
