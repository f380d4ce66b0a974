use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{timeout, Instant};

use motion_sensors_rs::backend::platform_backend;
use motion_sensors_rs::{
    MotionBridge, MotionConfig, MotionSensors, CHANNEL_ACCELEROMETER, CHANNEL_DEVICE_MOTION,
    CHANNEL_GYROSCOPE, CHANNEL_MAGNETOMETER, CHANNEL_MOTION,
};

#[derive(Parser, Debug)]
#[command(name = "motion_probe")]
#[command(about = "Probe the local motion sensor backend - one-shot reads and live streams", long_about = None)]
struct Args {
    /// Feed to probe (accelerometer, gyroscope, magnetometer, motion, device-motion)
    #[arg(long, default_value = "motion")]
    sensor: String,

    /// Take a single one-shot reading instead of streaming
    #[arg(long)]
    one_shot: bool,

    /// Stream duration in seconds (0 = continuous)
    #[arg(long, default_value = "5")]
    duration_secs: u64,

    /// One-shot timeout in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Sample interval for one-shot listeners, in milliseconds
    #[arg(long, default_value = "100")]
    one_shot_interval_ms: u64,

    /// Stream sample interval in milliseconds
    #[arg(long, default_value = "16")]
    stream_interval_ms: u64,

    /// Per-feed broadcast capacity; a slow terminal drops readings past this
    #[arg(long, default_value = "64")]
    capacity: usize,

    /// Print every event as raw JSON instead of a sampled summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = MotionConfig {
        one_shot_timeout_ms: args.timeout_ms,
        one_shot_interval_ms: args.one_shot_interval_ms,
        stream_interval_ms: args.stream_interval_ms,
        channel_capacity: args.capacity,
    };
    let bridge = MotionBridge::new(MotionSensors::with_config(platform_backend(), config));

    println!("[{}] motion probe starting", ts_now());
    println!("  Backend: {}", bridge.service().backend_name());
    println!("  Feed: {}", args.sensor);
    println!(
        "  Sensors available: {}",
        bridge.service().is_motion_sensor_available()
    );

    if args.one_shot {
        return one_shot(&bridge, &args.sensor).await;
    }
    stream(&bridge, &args).await
}

async fn one_shot(bridge: &MotionBridge, feed: &str) -> Result<()> {
    let method = match feed {
        "accelerometer" => "getAccelerometerData",
        "gyroscope" => "getGyroscopeData",
        "magnetometer" => "getMagnetometerData",
        "motion" => "getAllMotionSensorData",
        other => bail!("one-shot is not supported for feed '{}'", other),
    };

    let reply = bridge
        .handle_call(method, &Value::Null)
        .await
        .map_err(|e| anyhow!("{} failed: {} ({})", method, e, e.code()))?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn stream(bridge: &MotionBridge, args: &Args) -> Result<()> {
    let channel = match args.sensor.as_str() {
        "accelerometer" => CHANNEL_ACCELEROMETER,
        "gyroscope" => CHANNEL_GYROSCOPE,
        "magnetometer" => CHANNEL_MAGNETOMETER,
        "motion" => CHANNEL_MOTION,
        "device-motion" => CHANNEL_DEVICE_MOTION,
        other => bail!("unknown feed '{}'", other),
    };

    let mut stream = bridge
        .open_event_stream(channel)
        .map_err(|e| anyhow!("open {} failed: {} ({})", channel, e, e.code()))?;
    println!(
        "[{}] streaming {} ({})",
        ts_now(),
        channel,
        if args.duration_secs > 0 {
            format!("{}s", args.duration_secs)
        } else {
            "until interrupted".to_string()
        }
    );

    let stop_at = (args.duration_secs > 0)
        .then(|| Instant::now() + Duration::from_secs(args.duration_secs));
    let mut count = 0u64;
    loop {
        let remaining = match stop_at {
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    break;
                }
                at - now
            }
            None => Duration::from_secs(3600),
        };

        match timeout(remaining, stream.recv()).await {
            Ok(Ok(event)) => {
                count += 1;
                if args.json {
                    println!("{}", event);
                } else if count == 1 || count % 30 == 0 {
                    println!("[{}] #{} {}", ts_now(), count, event);
                }
            }
            Ok(Err(e)) => {
                eprintln!("[{}] stream ended: {} ({})", ts_now(), e, e.code());
                break;
            }
            Err(_) => break,
        }
    }

    println!("[{}] {} events received", ts_now(), count);
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S%.3f").to_string()
}
