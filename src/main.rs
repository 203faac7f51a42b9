// src/main.rs
// Demo entry point: loads a YAML configuration, builds a simulated world, runs the
// mower core on it for a while and prints the final status.
//
// Usage: mowbot [config.yaml] [seconds]
// RUST_LOG controls verbosity (default: info).

use log::{error, info};
use mowbot::{Boundaries, MowerConfig, Runtime, SimWorld};
use std::path::Path;
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "config/mower.yaml";
const DEFAULT_SECONDS: u64 = 30;

fn main() -> mowbot::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting mowbot demo...");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let seconds = args.next().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_SECONDS);

    let config = if Path::new(&config_path).exists() {
        MowerConfig::from_yaml_file(&config_path)?
    } else {
        info!("{} not found, using built-in defaults", config_path);
        MowerConfig::default()
    };

    let world = SimWorld::new(config.simulation.clone());
    let runtime = Runtime::spawn(&config, Boundaries::simulated(&world))?;

    let area_id = config.areas.first().map_or("test_square", |a| a.id.as_str());
    if let Err(e) = runtime.api().start_mowing_task(area_id) {
        error!("Could not start mowing {}: {}", area_id, e);
    }

    for second in 1..=seconds {
        thread::sleep(Duration::from_secs(1));
        let status = runtime.api().get_status();
        info!(
            "t={}s state={} pos=({:.2}, {:.2}) heading={:.2} battery={:.1}% progress={:.0}% obstacles={}",
            second,
            status.state,
            status.position.x,
            status.position.y,
            status.position.heading,
            status.battery_level.unwrap_or(f64::NAN),
            status.progress.fraction_complete * 100.0,
            status.avoidance.obstacle_count,
        );
        if !runtime.is_running() {
            break;
        }
    }

    let status = runtime.api().get_status();
    runtime.shutdown();

    let (x, y, heading) = world.true_pose();
    info!("Simulated ground truth: ({:.2}, {:.2}) heading {:.2}", x, y, heading);
    println!("{}", serde_yaml::to_string(&status)?);

    info!("Mowbot demo completed");
    Ok(())
}
