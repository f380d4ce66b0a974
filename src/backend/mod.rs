//! Platform sensor backends.
//!
//! Each backend adapts one native sensor framework to the `SensorBackend`
//! trait; everything above this module is platform independent. Backends
//! report raw, unconverted values (acceleration in gravity multiples) and
//! stamp samples with wall-clock milliseconds at callback time.

pub mod simulated;

#[cfg(target_os = "android")]
pub mod android;

#[cfg(any(target_os = "ios", target_os = "macos"))]
pub mod darwin;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Result, SensorError};
use crate::reading::{Attitude, SensorKind, Vec3};

/// Unconverted sample as delivered by a platform sensor callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: i64,
}

/// Unconverted platform-fused device motion values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDeviceMotion {
    pub attitude: Attitude,
    pub rotation_rate: Vec3,
    pub gravity: Vec3,
    pub user_acceleration: Vec3,
    pub timestamp: i64,
}

/// Listener rate class requested at registration time.
///
/// One-shot listeners run at a relaxed rate; stream listeners at a game-grade
/// rate. Backends whose native API takes a delay class map the variant;
/// backends that poll use the carried interval directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleProfile {
    OneShot(Duration),
    Stream(Duration),
}

impl SampleProfile {
    pub fn interval(&self) -> Duration {
        match self {
            SampleProfile::OneShot(interval) | SampleProfile::Stream(interval) => *interval,
        }
    }
}

/// Live registration with the native sensor manager.
///
/// Dropping the subscription is the unregister: the backend observes the
/// closed channel on its next callback and stops delivering. Subscriptions
/// are independent, so a temporary one-shot listener never disturbs a
/// running stream on the same sensor.
pub struct Subscription {
    kind: SensorKind,
    rx: mpsc::Receiver<RawSample>,
}

impl Subscription {
    pub fn new(kind: SensorKind, rx: mpsc::Receiver<RawSample>) -> Self {
        Self { kind, rx }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Next raw sample, or `None` once the backend stops delivering.
    pub async fn recv(&mut self) -> Option<RawSample> {
        self.rx.recv().await
    }
}

/// Live registration for the platform's fused device motion feed.
pub struct DeviceMotionSubscription {
    rx: mpsc::Receiver<RawDeviceMotion>,
}

impl DeviceMotionSubscription {
    pub fn new(rx: mpsc::Receiver<RawDeviceMotion>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<RawDeviceMotion> {
        self.rx.recv().await
    }
}

/// Adapter over one platform's sensor framework.
///
/// Implementations must be callable from inside a tokio runtime; `subscribe`
/// registers a listener and hands back the delivery channel.
pub trait SensorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the physical sensor exists on this device.
    fn is_available(&self, kind: SensorKind) -> bool;

    /// Registers a listener for `kind` and returns its delivery channel.
    fn subscribe(&self, kind: SensorKind, profile: SampleProfile) -> Result<Subscription>;

    /// Whether the platform offers a native fused device motion feed.
    fn device_motion_available(&self) -> bool {
        false
    }

    fn subscribe_device_motion(&self, _profile: SampleProfile) -> Result<DeviceMotionSubscription> {
        Err(SensorError::Unsupported("device motion".to_string()))
    }
}

/// Wall-clock milliseconds used to stamp samples at callback time.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Backend for the current target: the native framework where one exists,
/// the simulated source everywhere else.
pub fn platform_backend() -> Arc<dyn SensorBackend> {
    #[cfg(target_os = "android")]
    {
        Arc::new(android::AndroidBackend::new())
    }
    #[cfg(any(target_os = "ios", target_os = "macos"))]
    {
        Arc::new(darwin::CoreMotionBackend::new())
    }
    #[cfg(not(any(target_os = "android", target_os = "ios", target_os = "macos")))]
    {
        Arc::new(simulated::SimulatedBackend::new())
    }
}
