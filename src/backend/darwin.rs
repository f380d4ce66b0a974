//! iOS and macOS backend over Core Motion.
//!
//! Uses `CMMotionManager` in polling mode: updates are started without a
//! handler and the latest data property is sampled on a timer, deduplicated
//! by the framework's boot-relative timestamp. Each subscription owns its
//! manager, so stopping one feed can never stall another.

use std::time::Duration;

use log::debug;
use objc2::rc::Retained;
use objc2_core_motion::CMMotionManager;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::backend::{
    now_ms, DeviceMotionSubscription, RawDeviceMotion, RawSample, SampleProfile, SensorBackend,
    Subscription,
};
use crate::error::{Result, SensorError};
use crate::reading::{Attitude, SensorKind, Vec3};

const CHANNEL_CAPACITY: usize = 32;

// SAFETY: each handle is owned by exactly one pump task, and CMMotionManager
// tolerates property polling from any thread.
struct PollHandle(Retained<CMMotionManager>);
unsafe impl Send for PollHandle {}

fn new_manager() -> Retained<CMMotionManager> {
    unsafe { CMMotionManager::new() }
}

/// Backend over Apple's Core Motion framework.
pub struct CoreMotionBackend;

impl CoreMotionBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CoreMotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBackend for CoreMotionBackend {
    fn name(&self) -> &'static str {
        "core-motion"
    }

    fn is_available(&self, kind: SensorKind) -> bool {
        let manager = new_manager();
        unsafe {
            match kind {
                SensorKind::Accelerometer => manager.isAccelerometerAvailable(),
                SensorKind::Gyroscope => manager.isGyroAvailable(),
                SensorKind::Magnetometer => manager.isMagnetometerAvailable(),
            }
        }
    }

    fn subscribe(&self, kind: SensorKind, profile: SampleProfile) -> Result<Subscription> {
        if !self.is_available(kind) {
            return Err(SensorError::Unavailable { kind });
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let period = profile.interval().max(Duration::from_millis(1));
        debug!("core-motion {} updates started ({:?})", kind, profile);

        tokio::spawn(async move {
            let handle = PollHandle(new_manager());
            start_updates(&handle.0, kind, period.as_secs_f64());

            let mut ticker = interval(period);
            let mut last_frame_ts = f64::NEG_INFINITY;
            loop {
                ticker.tick().await;
                let Some((x, y, z, frame_ts)) = read_latest(&handle.0, kind) else {
                    continue;
                };
                if frame_ts <= last_frame_ts {
                    continue;
                }
                last_frame_ts = frame_ts;

                let sample = RawSample {
                    x,
                    y,
                    z,
                    timestamp: now_ms(),
                };
                match tx.try_send(sample) {
                    Ok(_) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("core-motion {} subscriber full, dropping sample", kind);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }

            stop_updates(&handle.0, kind);
            debug!("core-motion {} updates stopped", kind);
        });

        Ok(Subscription::new(kind, rx))
    }

    fn device_motion_available(&self) -> bool {
        unsafe { new_manager().isDeviceMotionAvailable() }
    }

    fn subscribe_device_motion(&self, profile: SampleProfile) -> Result<DeviceMotionSubscription> {
        if !self.device_motion_available() {
            return Err(SensorError::Unsupported("device motion".to_string()));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let period = profile.interval().max(Duration::from_millis(1));
        debug!("core-motion device motion updates started ({:?})", profile);

        tokio::spawn(async move {
            let handle = PollHandle(new_manager());
            unsafe {
                handle.0.setDeviceMotionUpdateInterval(period.as_secs_f64());
                handle.0.startDeviceMotionUpdates();
            }

            let mut ticker = interval(period);
            let mut last_frame_ts = f64::NEG_INFINITY;
            loop {
                ticker.tick().await;
                let Some(frame) = read_latest_device_motion(&handle.0, &mut last_frame_ts) else {
                    continue;
                };
                match tx.try_send(frame) {
                    Ok(_) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("core-motion device motion subscriber full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }

            unsafe { handle.0.stopDeviceMotionUpdates() };
            debug!("core-motion device motion updates stopped");
        });

        Ok(DeviceMotionSubscription::new(rx))
    }
}

fn start_updates(manager: &CMMotionManager, kind: SensorKind, interval_secs: f64) {
    unsafe {
        match kind {
            SensorKind::Accelerometer => {
                manager.setAccelerometerUpdateInterval(interval_secs);
                manager.startAccelerometerUpdates();
            }
            SensorKind::Gyroscope => {
                manager.setGyroUpdateInterval(interval_secs);
                manager.startGyroUpdates();
            }
            SensorKind::Magnetometer => {
                manager.setMagnetometerUpdateInterval(interval_secs);
                manager.startMagnetometerUpdates();
            }
        }
    }
}

/// Latest axes plus the framework's boot-relative timestamp for dedup.
fn read_latest(manager: &CMMotionManager, kind: SensorKind) -> Option<(f64, f64, f64, f64)> {
    match kind {
        SensorKind::Accelerometer => unsafe {
            let data = manager.accelerometerData()?;
            let a = data.acceleration();
            Some((a.x, a.y, a.z, data.timestamp()))
        },
        SensorKind::Gyroscope => unsafe {
            let data = manager.gyroData()?;
            let r = data.rotationRate();
            Some((r.x, r.y, r.z, data.timestamp()))
        },
        SensorKind::Magnetometer => unsafe {
            let data = manager.magnetometerData()?;
            let f = data.magneticField();
            Some((f.x, f.y, f.z, data.timestamp()))
        },
    }
}

/// Latest fused frame, deduplicated in place against `last_frame_ts`.
fn read_latest_device_motion(
    manager: &CMMotionManager,
    last_frame_ts: &mut f64,
) -> Option<RawDeviceMotion> {
    unsafe {
        let motion = manager.deviceMotion()?;
        let frame_ts = motion.timestamp();
        if frame_ts <= *last_frame_ts {
            return None;
        }
        *last_frame_ts = frame_ts;

        let attitude = motion.attitude();
        let rotation = motion.rotationRate();
        let gravity = motion.gravity();
        let user = motion.userAcceleration();
        Some(RawDeviceMotion {
            attitude: Attitude::new(attitude.roll(), attitude.pitch(), attitude.yaw()),
            rotation_rate: Vec3::new(rotation.x, rotation.y, rotation.z),
            gravity: Vec3::new(gravity.x, gravity.y, gravity.z),
            user_acceleration: Vec3::new(user.x, user.y, user.z),
            timestamp: now_ms(),
        })
    }
}

fn stop_updates(manager: &CMMotionManager, kind: SensorKind) {
    unsafe {
        match kind {
            SensorKind::Accelerometer => manager.stopAccelerometerUpdates(),
            SensorKind::Gyroscope => manager.stopGyroUpdates(),
            SensorKind::Magnetometer => manager.stopMagnetometerUpdates(),
        }
    }
}
