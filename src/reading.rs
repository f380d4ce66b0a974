use std::fmt;

use serde::{Deserialize, Serialize};

/// Conversion factor from gravity multiples to m/s^2.
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Physical sensors exposed by the platform sensor manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Magnetometer,
}

impl SensorKind {
    pub fn all() -> [SensorKind; 3] {
        [
            SensorKind::Accelerometer,
            SensorKind::Gyroscope,
            SensorKind::Magnetometer,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::Magnetometer => "magnetometer",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single converted sensor reading: three axes plus a millisecond timestamp.
///
/// Accelerometer values are in m/s^2, gyroscope in rad/s, magnetometer in uT.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: i64,
}

impl SensorReading {
    pub fn new(x: f64, y: f64, z: f64, timestamp: i64) -> Self {
        Self { x, y, z, timestamp }
    }

    /// Builds a reading from raw backend axes, normalizing units per kind.
    ///
    /// Backends report acceleration in gravity multiples; everything else is
    /// already in its wire unit and passes through.
    pub fn from_raw(kind: SensorKind, x: f64, y: f64, z: f64, timestamp: i64) -> Self {
        match kind {
            SensorKind::Accelerometer => Self::new(
                x * STANDARD_GRAVITY,
                y * STANDARD_GRAVITY,
                z * STANDARD_GRAVITY,
                timestamp,
            ),
            SensorKind::Gyroscope | SensorKind::Magnetometer => Self::new(x, y, z, timestamp),
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Fused reading: the latest cached value per sensor, any of which may be
/// absent, plus one aggregate timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionReading {
    pub accelerometer: Option<SensorReading>,
    pub gyroscope: Option<SensorReading>,
    pub magnetometer: Option<SensorReading>,
    pub timestamp: i64,
}

impl MotionReading {
    pub fn new(timestamp: i64) -> Self {
        Self {
            accelerometer: None,
            gyroscope: None,
            magnetometer: None,
            timestamp,
        }
    }

    pub fn with_accelerometer(mut self, reading: SensorReading) -> Self {
        self.accelerometer = Some(reading);
        self
    }

    pub fn with_gyroscope(mut self, reading: SensorReading) -> Self {
        self.gyroscope = Some(reading);
        self
    }

    pub fn with_magnetometer(mut self, reading: SensorReading) -> Self {
        self.magnetometer = Some(reading);
        self
    }

    pub fn set(&mut self, kind: SensorKind, reading: SensorReading) {
        match kind {
            SensorKind::Accelerometer => self.accelerometer = Some(reading),
            SensorKind::Gyroscope => self.gyroscope = Some(reading),
            SensorKind::Magnetometer => self.magnetometer = Some(reading),
        }
    }

    pub fn get(&self, kind: SensorKind) -> Option<&SensorReading> {
        match kind {
            SensorKind::Accelerometer => self.accelerometer.as_ref(),
            SensorKind::Gyroscope => self.gyroscope.as_ref(),
            SensorKind::Magnetometer => self.magnetometer.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accelerometer.is_none() && self.gyroscope.is_none() && self.magnetometer.is_none()
    }
}

/// Orientation angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Attitude {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }
}

/// Unstamped three-axis vector used inside device motion payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    fn scale(&self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// Platform-fused device motion: attitude, rotation rate, and the gravity and
/// user components of acceleration, both in m/s^2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMotionReading {
    pub attitude: Attitude,
    pub rotation_rate: Vec3,
    pub gravity: Vec3,
    pub user_acceleration: Vec3,
    pub timestamp: i64,
}

impl DeviceMotionReading {
    /// Builds a device motion reading from raw backend values, with the two
    /// acceleration components normalized from gravity multiples.
    pub fn from_raw(
        attitude: Attitude,
        rotation_rate: Vec3,
        gravity: Vec3,
        user_acceleration: Vec3,
        timestamp: i64,
    ) -> Self {
        Self {
            attitude,
            rotation_rate,
            gravity: gravity.scale(STANDARD_GRAVITY),
            user_acceleration: user_acceleration.scale(STANDARD_GRAVITY),
            timestamp,
        }
    }
}
