// src/main.rs

mod config;
mod navigation;
mod perception;
mod pipeline;
mod signals;
mod types;
mod vehicle;

use anyhow::Result;
use pipeline::ControlLoop;
use signals::ControlSignals;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{info, warn};
use types::Config;
use vehicle::camera::VideoFrameSource;
use vehicle::dryrun::DryRunVehicle;

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("flow_nav={}", config.logging.level))
        .init();

    info!("🛸 Optical-flow obstacle avoidance starting");
    config.validate()?;
    info!(
        "Thresholds: brake={:.0}+{:.0}*v, dodge={:.1}+{:.1}*v, window={}",
        config.navigation.brake_base,
        config.navigation.brake_speed_gain,
        config.navigation.dodge_base,
        config.navigation.dodge_speed_gain,
        config.flow.window_size
    );

    let signals = Arc::new(ControlSignals::new());
    spawn_console(signals.clone());

    let source = VideoFrameSource::open(&config.video.source)?;
    let vehicle = Arc::new(DryRunVehicle::new());

    let mut control = ControlLoop::new(config, source, vehicle, signals)?;
    control.run()?;

    info!("Flight complete");
    Ok(())
}

/// Operator console: `q` to stop, `r` to reset. Runs on its own thread and
/// only ever touches the shared atomic signals.
fn spawn_console(signals: Arc<ControlSignals>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match line.trim() {
                "q" | "quit" => {
                    signals.request_exit();
                    break;
                }
                "r" | "reset" => signals.request_reset(),
                "" => {}
                other => warn!("Unknown console command: {other} (use q or r)"),
            }
        }
    });
}
