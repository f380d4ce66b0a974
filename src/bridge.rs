//! Host-runtime bridge: named request/response calls and named event
//! channels, all payloads JSON-shaped. This layer only dispatches and
//! serializes; conversion and policy live in the service below it.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Result, SensorError};
use crate::reading::SensorKind;
use crate::service::MotionSensors;
use crate::stream::{DeviceMotionStream, MotionStream, SensorStream};

pub const CHANNEL_ACCELEROMETER: &str = "motion_sensors/accelerometer";
pub const CHANNEL_GYROSCOPE: &str = "motion_sensors/gyroscope";
pub const CHANNEL_MAGNETOMETER: &str = "motion_sensors/magnetometer";
pub const CHANNEL_MOTION: &str = "motion_sensors/motion";
pub const CHANNEL_DEVICE_MOTION: &str = "motion_sensors/device_motion";

/// Every event channel the bridge serves.
pub const EVENT_CHANNELS: [&str; 5] = [
    CHANNEL_ACCELEROMETER,
    CHANNEL_GYROSCOPE,
    CHANNEL_MAGNETOMETER,
    CHANNEL_MOTION,
    CHANNEL_DEVICE_MOTION,
];

/// Error reply shape for the host runtime: stable code plus message.
pub fn error_reply(err: &SensorError) -> Value {
    json!({
        "code": err.code(),
        "message": err.to_string(),
    })
}

/// The surface a host embedding drives: `handle_call` for request/response
/// methods, `open_event_stream` for continuous feeds.
#[derive(Clone)]
pub struct MotionBridge {
    service: Arc<MotionSensors>,
}

impl MotionBridge {
    pub fn new(service: MotionSensors) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    pub fn with_service(service: Arc<MotionSensors>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &MotionSensors {
        &self.service
    }

    /// Dispatches one named method call. Arguments are accepted for ABI
    /// compatibility; no current method uses them.
    pub async fn handle_call(&self, method: &str, _args: &Value) -> Result<Value> {
        match method {
            "isMotionSensorAvailable" => Ok(json!(self.service.is_motion_sensor_available())),
            "getAccelerometerData" => self.one_shot(SensorKind::Accelerometer).await,
            "getGyroscopeData" => self.one_shot(SensorKind::Gyroscope).await,
            "getMagnetometerData" => self.one_shot(SensorKind::Magnetometer).await,
            "getAllMotionSensorData" => {
                let motion = self.service.read_motion().await?;
                to_value(&motion)
            }
            "isDeviceMotionAvailable" => Ok(json!(self.service.is_device_motion_available())),
            "startDeviceMotionUpdates" => {
                self.service.start_device_motion_updates()?;
                Ok(Value::Null)
            }
            "stopDeviceMotionUpdates" => {
                self.service.stop_device_motion_updates();
                Ok(Value::Null)
            }
            other => Err(SensorError::UnknownMethod(other.to_string())),
        }
    }

    /// Opens one named event channel and returns its stream of JSON payloads.
    pub fn open_event_stream(&self, channel: &str) -> Result<EventStream> {
        let inner = match channel {
            CHANNEL_ACCELEROMETER => {
                EventSource::Sensor(self.service.subscribe(SensorKind::Accelerometer)?)
            }
            CHANNEL_GYROSCOPE => {
                EventSource::Sensor(self.service.subscribe(SensorKind::Gyroscope)?)
            }
            CHANNEL_MAGNETOMETER => {
                EventSource::Sensor(self.service.subscribe(SensorKind::Magnetometer)?)
            }
            CHANNEL_MOTION => EventSource::Motion(self.service.subscribe_motion()?),
            CHANNEL_DEVICE_MOTION => {
                EventSource::DeviceMotion(self.service.subscribe_device_motion()?)
            }
            other => return Err(SensorError::UnknownChannel(other.to_string())),
        };
        Ok(EventStream {
            channel: channel.to_string(),
            inner,
        })
    }

    async fn one_shot(&self, kind: SensorKind) -> Result<Value> {
        let reading = self.service.read(kind).await?;
        to_value(&reading)
    }
}

fn to_value<T: serde::Serialize>(payload: &T) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| SensorError::Backend(e.to_string()))
}

enum EventSource {
    Sensor(SensorStream),
    Motion(MotionStream),
    DeviceMotion(DeviceMotionStream),
}

/// One open event channel delivering JSON payloads until cancelled or the
/// underlying feed stops.
pub struct EventStream {
    channel: String,
    inner: EventSource,
}

impl EventStream {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> Result<Value> {
        match &mut self.inner {
            EventSource::Sensor(stream) => to_value(&stream.recv().await?),
            EventSource::Motion(stream) => to_value(&stream.recv().await?),
            EventSource::DeviceMotion(stream) => to_value(&stream.recv().await?),
        }
    }

    /// Cancels the subscription; the listener unregisters once the feed has
    /// no subscribers left.
    pub fn cancel(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedBackend;
    use crate::config::MotionConfig;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn bridge() -> MotionBridge {
        let config = MotionConfig {
            one_shot_timeout_ms: 500,
            one_shot_interval_ms: 5,
            stream_interval_ms: 5,
            channel_capacity: 64,
        };
        MotionBridge::new(MotionSensors::with_config(
            Arc::new(SimulatedBackend::new()),
            config,
        ))
    }

    fn bridge_with(backend: SimulatedBackend) -> MotionBridge {
        let config = MotionConfig {
            one_shot_timeout_ms: 200,
            one_shot_interval_ms: 5,
            stream_interval_ms: 5,
            channel_capacity: 64,
        };
        MotionBridge::new(MotionSensors::with_config(Arc::new(backend), config))
    }

    #[tokio::test]
    async fn test_availability_call() {
        let bridge = bridge();
        let reply = bridge
            .handle_call("isMotionSensorAvailable", &Value::Null)
            .await
            .unwrap();
        assert_eq!(reply, json!(true));
    }

    #[tokio::test]
    async fn test_one_shot_call_payload_shape() {
        let bridge = bridge();
        let reply = bridge
            .handle_call("getAccelerometerData", &Value::Null)
            .await
            .unwrap();

        let x = reply["x"].as_f64().unwrap();
        let y = reply["y"].as_f64().unwrap();
        let z = reply["z"].as_f64().unwrap();
        let magnitude = (x * x + y * y + z * z).sqrt();
        assert!(magnitude > 9.3 && magnitude < 10.3);
        assert!(reply["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_gyroscope_call_payload_shape() {
        let bridge = bridge();
        let reply = bridge
            .handle_call("getGyroscopeData", &Value::Null)
            .await
            .unwrap();

        // Rotation rate crosses the bridge in rad/s, unscaled
        let x = reply["x"].as_f64().unwrap();
        let y = reply["y"].as_f64().unwrap();
        let z = reply["z"].as_f64().unwrap();
        let magnitude = (x * x + y * y + z * z).sqrt();
        assert!(magnitude < 1.0);
        assert!(reply["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_get_all_motion_sensor_data() {
        let bridge = bridge();
        let reply = bridge
            .handle_call("getAllMotionSensorData", &Value::Null)
            .await
            .unwrap();
        assert!(reply["accelerometer"].is_object());
        assert!(reply["gyroscope"].is_object());
        assert!(reply["magnetometer"].is_object());
        assert!(reply["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_get_all_with_partial_sensors() {
        let bridge = bridge_with(SimulatedBackend::with_sensors(&[SensorKind::Gyroscope]));
        let reply = bridge
            .handle_call("getAllMotionSensorData", &Value::Null)
            .await
            .unwrap();
        assert!(reply["accelerometer"].is_null());
        assert!(reply["gyroscope"].is_object());
        assert!(reply["magnetometer"].is_null());
    }

    #[tokio::test]
    async fn test_unavailable_sensor_error_code() {
        let bridge = bridge_with(SimulatedBackend::with_sensors(&[SensorKind::Gyroscope]));
        let err = bridge
            .handle_call("getMagnetometerData", &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAVAILABLE");

        let reply = error_reply(&err);
        assert_eq!(reply["code"], "UNAVAILABLE");
        assert!(reply["message"].as_str().unwrap().contains("magnetometer"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let bridge = bridge();
        let err = bridge
            .handle_call("getFooData", &Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_METHOD");
    }

    #[tokio::test]
    async fn test_device_motion_calls() {
        let bridge = bridge();
        let available = bridge
            .handle_call("isDeviceMotionAvailable", &Value::Null)
            .await
            .unwrap();
        assert_eq!(available, json!(true));

        let started = bridge
            .handle_call("startDeviceMotionUpdates", &Value::Null)
            .await
            .unwrap();
        assert_eq!(started, Value::Null);
        assert!(bridge.service().is_device_motion_streaming());

        bridge
            .handle_call("stopDeviceMotionUpdates", &Value::Null)
            .await
            .unwrap();
        sleep(Duration::from_millis(30)).await;
        assert!(!bridge.service().is_device_motion_streaming());
    }

    #[tokio::test]
    async fn test_event_stream_sensor_payload() {
        let bridge = bridge();
        let mut stream = bridge.open_event_stream(CHANNEL_ACCELEROMETER).unwrap();
        assert_eq!(stream.channel(), CHANNEL_ACCELEROMETER);

        let event = timeout(Duration::from_millis(300), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event["x"].is_number());
        assert!(event["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_event_stream_motion_payload() {
        let bridge = bridge();
        let mut stream = bridge.open_event_stream(CHANNEL_MOTION).unwrap();

        let event = timeout(Duration::from_millis(300), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.get("accelerometer").is_some());
        assert!(event.get("gyroscope").is_some());
        assert!(event.get("magnetometer").is_some());
        assert!(event["timestamp"].is_number());
    }

    #[tokio::test]
    async fn test_event_stream_device_motion_payload() {
        let bridge = bridge();
        let mut stream = bridge.open_event_stream(CHANNEL_DEVICE_MOTION).unwrap();

        let event = timeout(Duration::from_millis(300), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(event.get("attitude").is_some());
        assert!(event.get("rotationRate").is_some());
        assert!(event.get("userAcceleration").is_some());
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let bridge = bridge();
        let err = bridge
            .open_event_stream("motion_sensors/foo")
            .err()
            .expect("unknown channel must be rejected");
        assert_eq!(err.code(), "UNKNOWN_CHANNEL");
    }

    #[tokio::test]
    async fn test_cancel_unregisters_listener() {
        let bridge = bridge();
        let stream = bridge.open_event_stream(CHANNEL_GYROSCOPE).unwrap();
        assert!(bridge.service().is_streaming(SensorKind::Gyroscope));

        stream.cancel();
        sleep(Duration::from_millis(80)).await;
        assert!(!bridge.service().is_streaming(SensorKind::Gyroscope));
    }

    #[test]
    fn test_channel_list_is_complete() {
        assert_eq!(EVENT_CHANNELS.len(), 5);
        assert!(EVENT_CHANNELS.contains(&CHANNEL_MOTION));
    }
}
