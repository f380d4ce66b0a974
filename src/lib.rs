// Motion Sensors Plugin Library
// Exposes OS motion sensors to a host application runtime via
// request/response calls and continuous event streams

pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod reading;
pub mod service;
pub mod stream;

pub use bridge::{
    error_reply, EventStream, MotionBridge, CHANNEL_ACCELEROMETER, CHANNEL_DEVICE_MOTION,
    CHANNEL_GYROSCOPE, CHANNEL_MAGNETOMETER, CHANNEL_MOTION, EVENT_CHANNELS,
};
pub use config::MotionConfig;
pub use error::{Result, SensorError};
pub use reading::{
    Attitude, DeviceMotionReading, MotionReading, SensorKind, SensorReading, Vec3,
    STANDARD_GRAVITY,
};
pub use service::MotionSensors;
pub use stream::{DeviceMotionStream, MotionStream, SensorStream};
