use std::collections::HashSet;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::backend::{
    now_ms, DeviceMotionSubscription, RawDeviceMotion, RawSample, SampleProfile, SensorBackend,
    Subscription,
};
use crate::error::{Result, SensorError};
use crate::reading::{Attitude, SensorKind, Vec3};

const CHANNEL_CAPACITY: usize = 32;

/// Deterministic sensor source for hosts without real sensors and for tests.
///
/// Generates smooth waves in native units: acceleration around 1 g on the z
/// axis, small rotation rates, and an earth-like magnetic field.
pub struct SimulatedBackend {
    sensors: HashSet<SensorKind>,
    device_motion: bool,
    muted: bool,
    tick: Arc<AtomicU64>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            sensors: SensorKind::all().into_iter().collect(),
            device_motion: true,
            muted: false,
            tick: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Backend advertising only the given sensors, with no device motion.
    pub fn with_sensors(sensors: &[SensorKind]) -> Self {
        Self {
            sensors: sensors.iter().copied().collect(),
            device_motion: false,
            muted: false,
            tick: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Backend that advertises every sensor but never delivers a sample.
    /// Exercises the timeout paths.
    pub fn muted() -> Self {
        Self {
            muted: true,
            ..Self::new()
        }
    }

    #[cfg(test)]
    fn ticks(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn is_available(&self, kind: SensorKind) -> bool {
        self.sensors.contains(&kind)
    }

    fn subscribe(&self, kind: SensorKind, profile: SampleProfile) -> Result<Subscription> {
        if !self.is_available(kind) {
            return Err(SensorError::Unavailable { kind });
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        debug!("simulated {} listener registered ({:?})", kind, profile);

        if self.muted {
            // Keep the sender alive so the subscription stays open without
            // ever delivering.
            tokio::spawn(async move {
                tx.closed().await;
                debug!("simulated {} listener unregistered", kind);
            });
            return Ok(Subscription::new(kind, rx));
        }

        let tick = Arc::clone(&self.tick);
        // tokio::time::interval panics on a zero period
        let period = profile.interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let sample = synth_sample(kind, tick.fetch_add(1, Ordering::Relaxed));
                match tx.try_send(sample) {
                    Ok(_) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("simulated {} subscriber full, dropping sample", kind);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("simulated {} listener unregistered", kind);
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(kind, rx))
    }

    fn device_motion_available(&self) -> bool {
        self.device_motion
    }

    fn subscribe_device_motion(&self, profile: SampleProfile) -> Result<DeviceMotionSubscription> {
        if !self.device_motion {
            return Err(SensorError::Unsupported("device motion".to_string()));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        debug!("simulated device motion listener registered ({:?})", profile);

        if self.muted {
            tokio::spawn(async move {
                tx.closed().await;
            });
            return Ok(DeviceMotionSubscription::new(rx));
        }

        let tick = Arc::clone(&self.tick);
        let period = profile.interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let frame = synth_device_motion(tick.fetch_add(1, Ordering::Relaxed));
                match tx.try_send(frame) {
                    Ok(_) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("simulated device motion subscriber full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("simulated device motion listener unregistered");
                        break;
                    }
                }
            }
        });

        Ok(DeviceMotionSubscription::new(rx))
    }
}

fn synth_sample(kind: SensorKind, tick: u64) -> RawSample {
    let t = tick as f64 * 0.02;
    let (x, y, z) = match kind {
        // Resting device: ~1 g on z plus gentle jitter, in gravity multiples
        SensorKind::Accelerometer => (
            (t * 2.0 * PI).sin() * 0.05,
            (t * 2.0 * PI).cos() * 0.03,
            1.0 + (t * PI).sin() * 0.01,
        ),
        // Slow wobble in rad/s
        SensorKind::Gyroscope => (
            (t * 0.5).sin() * 0.05,
            (t * 0.3).cos() * 0.03,
            t.sin() * 0.1,
        ),
        // Earth-like field in uT
        SensorKind::Magnetometer => (
            22.0 + (t * 0.8).sin() * 0.5,
            -8.5 + (t * 0.6).cos() * 0.4,
            41.0 + (t * 0.4).sin() * 0.3,
        ),
    };

    RawSample {
        x,
        y,
        z,
        timestamp: now_ms(),
    }
}

fn synth_device_motion(tick: u64) -> RawDeviceMotion {
    let t = tick as f64 * 0.02;

    RawDeviceMotion {
        attitude: Attitude::new(
            (t * 0.2).sin() * 0.05,
            (t * 0.15).cos() * 0.04,
            (t * 0.05) % (2.0 * PI),
        ),
        rotation_rate: Vec3::new((t * 0.5).sin() * 0.05, (t * 0.3).cos() * 0.03, t.sin() * 0.1),
        gravity: Vec3::new(0.0, 0.0, -1.0),
        user_acceleration: Vec3::new(
            (t * 2.0 * PI).sin() * 0.02,
            (t * 2.0 * PI).cos() * 0.015,
            (t * PI).sin() * 0.01,
        ),
        timestamp: now_ms(),
    }
}
