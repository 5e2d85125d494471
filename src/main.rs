use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::time::{interval, Duration, MissedTickBehavior};

use speedlab::live_status::LiveStatus;
use speedlab::simulation::{self, DriveProfile, SimulatedDrive};
use speedlab::types::{InertialCapability, LocationAuthorization};
use speedlab::{spawn_pipeline, JsonFileStore, PipelineConfig, StopOutcome};

#[derive(Parser, Debug)]
#[command(name = "speedlab")]
#[command(about = "Vehicle performance metrics from fused inertial and GPS speed", long_about = None)]
struct Args {
    /// JSON config overriding the defaults
    #[arg(long)]
    config: Option<String>,

    /// Output directory for saved sessions and the live status file
    #[arg(long, default_value = "speedlab_sessions")]
    output_dir: String,

    /// Replay the simulated drive this many times faster than real time
    #[arg(long, default_value_t = 1.0)]
    speedup: f64,

    /// Top speed of the simulated drive in km/h
    #[arg(long, default_value_t = 120.0)]
    top_speed: f64,

    /// Run without the inertial assist path
    #[arg(long)]
    no_inertial: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    println!("[{}] SpeedLab starting", ts_now());
    println!("  Top speed: {:.0} km/h", args.top_speed);
    println!("  Speedup: {}x", args.speedup);
    println!("  Inertial: {}", if args.no_inertial { "disabled" } else { "enabled" });
    println!("  Output Dir: {}", args.output_dir);

    let store = JsonFileStore::new(&args.output_dir)?;
    let handle = spawn_pipeline(config, store);

    let capability = if args.no_inertial { InertialCapability::Unavailable } else { InertialCapability::Available };
    handle.start(LocationAuthorization::Authorized, capability).await?;

    let drive = SimulatedDrive::new(DriveProfile { top_speed_kmh: args.top_speed, ..Default::default() });
    println!("[{}] Simulated drive: {:.1}s", ts_now(), drive.duration());

    let sender = handle.sender();
    let speedup = args.speedup;
    let mut feed = tokio::spawn(async move { simulation::feed(&drive, &sender, speedup).await });

    let status_path = format!("{}/live_status.json", args.output_dir);
    let started = Utc::now();
    let mut status_tick = interval(Duration::from_secs(2));
    status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let feed_stats = loop {
        tokio::select! {
            result = &mut feed => break result??,
            _ = status_tick.tick() => {
                let snapshot = handle.snapshot().await?;
                let uptime = Utc::now().signed_duration_since(started).num_seconds().max(0) as u64;
                if let Err(e) = LiveStatus::from_snapshot(&snapshot, uptime).save(&status_path) {
                    log::warn!("failed to write {}: {}", status_path, e);
                }
                println!(
                    "[{}] {:>6.1} km/h | dist {:.3} km | 0-100 {} | peak {:.2} g",
                    ts_now(),
                    snapshot.estimate.value,
                    snapshot.metrics.distance_km,
                    fmt_secs(snapshot.metrics.best_zero_to_hundred.or(snapshot.metrics.running_zero_to_hundred)),
                    snapshot.metrics.peak_g_force,
                );
            }
        }
    };

    let final_snapshot = handle.snapshot().await?;
    let metrics = &final_snapshot.metrics;
    println!("[{}] Drive complete", ts_now());
    println!("  Inertial sent/dropped: {}/{}", feed_stats.inertial_sent, feed_stats.inertial_dropped);
    println!("  Fixes: {} ({} malformed)", final_snapshot.fixes, final_snapshot.malformed_fixes);
    println!("  Max speed: {:.1} km/h", metrics.max_speed);
    println!("  Distance: {:.3} km", metrics.distance_km);
    println!("  Best 0-100: {}", fmt_secs(metrics.best_zero_to_hundred));
    println!("  Best 0-200: {}", fmt_secs(metrics.best_zero_to_two_hundred));
    match metrics.braking_distance_m {
        Some(d) => println!("  Braking 100-0: {:.1} m", d),
        None => println!("  Braking 100-0: --"),
    }
    println!("  Peak g-force: {:.2} g", metrics.peak_g_force);

    match handle.stop().await? {
        StopOutcome::Saved(record) => println!("[{}] Session {} saved", ts_now(), record.session_id),
        StopOutcome::Discarded { reason, .. } => println!("[{}] Session discarded ({:?})", ts_now(), reason),
    }

    handle.shutdown().await?;
    Ok(())
}

fn fmt_secs(value: Option<f64>) -> String {
    value.map(|s| format!("{:.2}s", s)).unwrap_or_else(|| "--".to_string())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
