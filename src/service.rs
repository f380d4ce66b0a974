//! Platform-independent sensor service.
//!
//! Implements the four behaviors every platform shares: availability checks,
//! one-shot reads with a timeout, per-sensor streams, and the fused motion
//! feed built from the latest cached reading per sensor. Platform variance
//! lives entirely behind `SensorBackend`.

use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{BoxStream, SelectAll, StreamExt};
use log::{debug, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::backend::{
    now_ms, platform_backend, DeviceMotionSubscription, RawSample, SampleProfile, SensorBackend,
    Subscription,
};
use crate::config::MotionConfig;
use crate::error::{Result, SensorError};
use crate::reading::{DeviceMotionReading, MotionReading, SensorKind, SensorReading};
use crate::stream::{DeviceMotionStream, Hub, MotionStream, PumpGuard, SensorStream};

/// Entry point for everything the plugin exposes: availability, one-shot
/// reads, and the stream feeds.
pub struct MotionSensors {
    backend: Arc<dyn SensorBackend>,
    config: MotionConfig,
    accelerometer_hub: Hub<SensorReading>,
    gyroscope_hub: Hub<SensorReading>,
    magnetometer_hub: Hub<SensorReading>,
    motion_hub: Hub<MotionReading>,
    device_motion_hub: Hub<DeviceMotionReading>,
}

impl MotionSensors {
    /// Service over the native backend for this target.
    pub fn new() -> Self {
        Self::with_backend(platform_backend())
    }

    pub fn with_backend(backend: Arc<dyn SensorBackend>) -> Self {
        Self::with_config(backend, MotionConfig::default())
    }

    pub fn with_config(backend: Arc<dyn SensorBackend>, config: MotionConfig) -> Self {
        Self {
            backend,
            config,
            accelerometer_hub: Hub::new(SensorKind::Accelerometer.as_str()),
            gyroscope_hub: Hub::new(SensorKind::Gyroscope.as_str()),
            magnetometer_hub: Hub::new(SensorKind::Magnetometer.as_str()),
            motion_hub: Hub::new("motion"),
            device_motion_hub: Hub::new("device_motion"),
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// True when any of the three physical sensors exists.
    pub fn is_motion_sensor_available(&self) -> bool {
        SensorKind::all()
            .into_iter()
            .any(|kind| self.backend.is_available(kind))
    }

    pub fn is_available(&self, kind: SensorKind) -> bool {
        self.backend.is_available(kind)
    }

    pub fn is_device_motion_available(&self) -> bool {
        self.backend.device_motion_available()
    }

    /// One-shot read: register a temporary listener, take the first sample,
    /// unregister, return the converted reading. Fails with `Timeout` when
    /// nothing arrives inside the configured window.
    pub async fn read(&self, kind: SensorKind) -> Result<SensorReading> {
        if !self.backend.is_available(kind) {
            return Err(SensorError::Unavailable { kind });
        }

        let profile = SampleProfile::OneShot(self.config.one_shot_interval());
        let mut sub = self.backend.subscribe(kind, profile)?;
        debug!("one-shot {} read registered", kind);

        match timeout(self.config.one_shot_timeout(), sub.recv()).await {
            Ok(Some(raw)) => Ok(SensorReading::from_raw(kind, raw.x, raw.y, raw.z, raw.timestamp)),
            Ok(None) => Err(SensorError::Backend(format!(
                "{} source ended before the first sample",
                kind
            ))),
            Err(_) => Err(SensorError::Timeout {
                kind,
                waited_ms: self.config.one_shot_timeout_ms,
            }),
        }
        // Dropping the subscription unregisters the temporary listener
    }

    /// One-shot over every available sensor at once: waits until each has
    /// reported or the window elapses and returns the partial aggregate.
    /// With no sensors present this is an empty reading, not an error.
    pub async fn read_motion(&self) -> Result<MotionReading> {
        let kinds: Vec<SensorKind> = SensorKind::all()
            .into_iter()
            .filter(|&kind| self.backend.is_available(kind))
            .collect();

        let mut reading = MotionReading::new(now_ms());
        if kinds.is_empty() {
            debug!("one-shot motion read with no sensors present");
            return Ok(reading);
        }

        let window = self.config.one_shot_timeout();
        let profile = SampleProfile::OneShot(self.config.one_shot_interval());
        let collectors = kinds.into_iter().map(|kind| {
            let backend = Arc::clone(&self.backend);
            async move {
                let mut sub = match backend.subscribe(kind, profile) {
                    Ok(sub) => sub,
                    Err(e) => {
                        warn!("one-shot motion read skipping {}: {}", kind, e);
                        return (kind, None);
                    }
                };
                match timeout(window, sub.recv()).await {
                    Ok(Some(raw)) => (kind, Some(raw)),
                    _ => {
                        debug!("{} did not report in time, returning partial result", kind);
                        (kind, None)
                    }
                }
            }
        });

        for (kind, raw) in join_all(collectors).await {
            if let Some(raw) = raw {
                reading.set(
                    kind,
                    SensorReading::from_raw(kind, raw.x, raw.y, raw.z, raw.timestamp),
                );
            }
        }
        reading.timestamp = now_ms();
        Ok(reading)
    }

    /// Opens (or joins) the continuous stream for one sensor. The backend
    /// listener registers on the first subscriber and unregisters when the
    /// last one is gone or `stop_stream` is called.
    pub fn subscribe(&self, kind: SensorKind) -> Result<SensorStream> {
        if !self.backend.is_available(kind) {
            return Err(SensorError::Unavailable { kind });
        }

        let backend = Arc::clone(&self.backend);
        let profile = SampleProfile::Stream(self.config.stream_interval());
        let rx = self
            .hub(kind)
            .open(self.config.channel_capacity, move |tx, shutdown_rx, guard| {
                let sub = backend.subscribe(kind, profile)?;
                tokio::spawn(pump_sensor(kind, sub, tx, shutdown_rx, guard));
                Ok(())
            })?;
        Ok(SensorStream::new(kind.as_str(), rx))
    }

    /// Stops the sensor's stream if it is running. Idempotent.
    pub fn stop_stream(&self, kind: SensorKind) {
        self.hub(kind).stop();
    }

    pub fn is_streaming(&self, kind: SensorKind) -> bool {
        self.hub(kind).is_active()
    }

    /// Opens (or joins) the fused motion stream: one listener per available
    /// sensor, a latest-value cache, and a combined record re-emitted on
    /// every contributing update.
    pub fn subscribe_motion(&self) -> Result<MotionStream> {
        let kinds: Vec<SensorKind> = SensorKind::all()
            .into_iter()
            .filter(|&kind| self.backend.is_available(kind))
            .collect();
        if kinds.is_empty() {
            return Err(SensorError::Unsupported("motion stream".to_string()));
        }

        let backend = Arc::clone(&self.backend);
        let profile = SampleProfile::Stream(self.config.stream_interval());
        let rx = self
            .motion_hub
            .open(self.config.channel_capacity, move |tx, shutdown_rx, guard| {
                let mut subs = Vec::with_capacity(kinds.len());
                for kind in kinds {
                    match backend.subscribe(kind, profile) {
                        Ok(sub) => subs.push(sub),
                        Err(e) => warn!("motion stream skipping {}: {}", kind, e),
                    }
                }
                if subs.is_empty() {
                    return Err(SensorError::Backend(
                        "no sensor sources for motion stream".to_string(),
                    ));
                }
                tokio::spawn(pump_motion(subs, tx, shutdown_rx, guard));
                Ok(())
            })?;
        Ok(MotionStream::new("motion", rx))
    }

    /// Stops the fused motion stream. Individual sensor streams hold their
    /// own listeners and keep running.
    pub fn stop_motion_stream(&self) {
        self.motion_hub.stop();
    }

    pub fn is_motion_streaming(&self) -> bool {
        self.motion_hub.is_active()
    }

    /// Opens (or joins) the platform's fused device motion feed and returns
    /// a subscriber handle.
    pub fn subscribe_device_motion(&self) -> Result<DeviceMotionStream> {
        let rx = self.open_device_motion()?;
        Ok(DeviceMotionStream::new("device_motion", rx))
    }

    /// Starts the device motion feed without subscribing. Idempotent. The
    /// feed keeps running with no subscribers until explicitly stopped.
    pub fn start_device_motion_updates(&self) -> Result<()> {
        self.open_device_motion().map(|_| ())
    }

    /// Stops the device motion feed. Idempotent.
    pub fn stop_device_motion_updates(&self) {
        self.device_motion_hub.stop();
    }

    pub fn is_device_motion_streaming(&self) -> bool {
        self.device_motion_hub.is_active()
    }

    fn open_device_motion(&self) -> Result<broadcast::Receiver<DeviceMotionReading>> {
        if !self.backend.device_motion_available() {
            return Err(SensorError::Unsupported("device motion".to_string()));
        }

        let backend = Arc::clone(&self.backend);
        let profile = SampleProfile::Stream(self.config.stream_interval());
        self.device_motion_hub
            .open(self.config.channel_capacity, move |tx, shutdown_rx, guard| {
                let sub = backend.subscribe_device_motion(profile)?;
                tokio::spawn(pump_device_motion(sub, tx, shutdown_rx, guard));
                Ok(())
            })
    }

    fn hub(&self, kind: SensorKind) -> &Hub<SensorReading> {
        match kind {
            SensorKind::Accelerometer => &self.accelerometer_hub,
            SensorKind::Gyroscope => &self.gyroscope_hub,
            SensorKind::Magnetometer => &self.magnetometer_hub,
        }
    }
}

impl Default for MotionSensors {
    fn default() -> Self {
        Self::new()
    }
}

async fn pump_sensor(
    kind: SensorKind,
    mut sub: Subscription,
    tx: broadcast::Sender<SensorReading>,
    mut shutdown_rx: mpsc::Receiver<()>,
    guard: PumpGuard<SensorReading>,
) {
    let _guard = guard;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            raw = sub.recv() => match raw {
                Some(raw) => {
                    let reading = SensorReading::from_raw(kind, raw.x, raw.y, raw.z, raw.timestamp);
                    if tx.send(reading).is_err() {
                        debug!("{} stream lost its last subscriber", kind);
                        break;
                    }
                }
                None => {
                    warn!("{} source ended unexpectedly", kind);
                    break;
                }
            }
        }
    }
    // Dropping the subscription unregisters the backend listener
}

async fn pump_motion(
    subs: Vec<Subscription>,
    tx: broadcast::Sender<MotionReading>,
    mut shutdown_rx: mpsc::Receiver<()>,
    guard: PumpGuard<MotionReading>,
) {
    let _guard = guard;

    let mut merged: SelectAll<BoxStream<'static, (SensorKind, RawSample)>> = subs
        .into_iter()
        .map(|sub| {
            let kind = sub.kind();
            futures::stream::unfold(sub, move |mut sub| async move {
                sub.recv().await.map(|raw| ((kind, raw), sub))
            })
            .boxed()
        })
        .collect();

    let mut cache = MotionReading::new(now_ms());
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            next = merged.next() => match next {
                Some((kind, raw)) => {
                    cache.set(
                        kind,
                        SensorReading::from_raw(kind, raw.x, raw.y, raw.z, raw.timestamp),
                    );
                    cache.timestamp = now_ms();
                    if tx.send(cache.clone()).is_err() {
                        debug!("motion stream lost its last subscriber");
                        break;
                    }
                }
                None => {
                    warn!("all motion stream sources ended");
                    break;
                }
            }
        }
    }
}

async fn pump_device_motion(
    mut sub: DeviceMotionSubscription,
    tx: broadcast::Sender<DeviceMotionReading>,
    mut shutdown_rx: mpsc::Receiver<()>,
    guard: PumpGuard<DeviceMotionReading>,
) {
    let _guard = guard;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            frame = sub.recv() => match frame {
                Some(raw) => {
                    let reading = DeviceMotionReading::from_raw(
                        raw.attitude,
                        raw.rotation_rate,
                        raw.gravity,
                        raw.user_acceleration,
                        raw.timestamp,
                    );
                    // No subscribers is fine here; the feed runs until stopped
                    let _ = tx.send(reading);
                }
                None => {
                    warn!("device motion source ended unexpectedly");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedBackend;
    use std::time::{Duration, Instant};
    use tokio::time::sleep;

    fn fast_config() -> MotionConfig {
        MotionConfig {
            one_shot_timeout_ms: 500,
            one_shot_interval_ms: 5,
            stream_interval_ms: 5,
            channel_capacity: 64,
        }
    }

    fn service() -> MotionSensors {
        MotionSensors::with_config(Arc::new(SimulatedBackend::new()), fast_config())
    }

    fn service_with(backend: SimulatedBackend) -> MotionSensors {
        MotionSensors::with_config(Arc::new(backend), fast_config())
    }

    #[test]
    fn test_availability() {
        let sensors = service();
        assert!(sensors.is_motion_sensor_available());
        assert!(sensors.is_available(SensorKind::Magnetometer));
        assert!(sensors.is_device_motion_available());

        let partial = service_with(SimulatedBackend::with_sensors(&[SensorKind::Gyroscope]));
        assert!(partial.is_motion_sensor_available());
        assert!(!partial.is_available(SensorKind::Accelerometer));

        let none = service_with(SimulatedBackend::with_sensors(&[]));
        assert!(!none.is_motion_sensor_available());
    }

    #[tokio::test]
    async fn test_one_shot_read_converts_units() {
        let sensors = service();
        let reading = sensors.read(SensorKind::Accelerometer).await.unwrap();
        // ~1 g resting magnitude, converted to m/s^2
        assert!(reading.magnitude() > 9.3 && reading.magnitude() < 10.3);
        assert!(reading.timestamp > 0);

        let gyro = sensors.read(SensorKind::Gyroscope).await.unwrap();
        assert!(gyro.magnitude() < 1.0);
    }

    #[tokio::test]
    async fn test_one_shot_unavailable() {
        let sensors = service_with(SimulatedBackend::with_sensors(&[SensorKind::Gyroscope]));
        let err = sensors.read(SensorKind::Accelerometer).await.unwrap_err();
        assert_eq!(err.code(), "UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_one_shot_timeout() {
        let mut config = fast_config();
        config.one_shot_timeout_ms = 80;
        let sensors = MotionSensors::with_config(Arc::new(SimulatedBackend::muted()), config);

        let start = Instant::now();
        let err = sensors.read(SensorKind::Accelerometer).await.unwrap_err();
        let elapsed = start.elapsed().as_millis();

        match err {
            SensorError::Timeout { kind, waited_ms } => {
                assert_eq!(kind, SensorKind::Accelerometer);
                assert_eq!(waited_ms, 80);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
        // Should have waited close to the configured window
        assert!(elapsed >= 60 && elapsed <= 500);
    }

    #[tokio::test]
    async fn test_read_motion_full() {
        let sensors = service();
        let motion = sensors.read_motion().await.unwrap();
        assert!(motion.accelerometer.is_some());
        assert!(motion.gyroscope.is_some());
        assert!(motion.magnetometer.is_some());
        assert!(motion.timestamp > 0);

        // Members carry converted units
        let accel = motion.accelerometer.unwrap();
        assert!(accel.magnitude() > 9.3 && accel.magnitude() < 10.3);
    }

    #[tokio::test]
    async fn test_read_motion_partial() {
        let sensors = service_with(SimulatedBackend::with_sensors(&[
            SensorKind::Accelerometer,
            SensorKind::Gyroscope,
        ]));
        let motion = sensors.read_motion().await.unwrap();
        assert!(motion.accelerometer.is_some());
        assert!(motion.gyroscope.is_some());
        assert!(motion.magnetometer.is_none());
    }

    #[tokio::test]
    async fn test_read_motion_no_sensors() {
        let sensors = service_with(SimulatedBackend::with_sensors(&[]));
        let motion = sensors.read_motion().await.unwrap();
        assert!(motion.is_empty());
        assert!(motion.timestamp > 0);
    }

    #[tokio::test]
    async fn test_stream_delivers_converted_readings() {
        let sensors = service();
        let mut stream = sensors.subscribe(SensorKind::Accelerometer).unwrap();
        assert!(sensors.is_streaming(SensorKind::Accelerometer));

        for _ in 0..3 {
            let reading = tokio::time::timeout(Duration::from_millis(300), stream.recv())
                .await
                .expect("reading within window")
                .unwrap();
            assert!(reading.magnitude() > 9.3 && reading.magnitude() < 10.3);
        }
    }

    #[tokio::test]
    async fn test_stream_unavailable_kind() {
        let sensors = service_with(SimulatedBackend::with_sensors(&[SensorKind::Gyroscope]));
        assert!(sensors.subscribe(SensorKind::Magnetometer).is_err());
        assert!(!sensors.is_streaming(SensorKind::Magnetometer));
    }

    #[tokio::test]
    async fn test_stream_stop_is_idempotent_and_restartable() {
        let sensors = service();
        let mut stream = sensors.subscribe(SensorKind::Gyroscope).unwrap();

        sensors.stop_stream(SensorKind::Gyroscope);
        sensors.stop_stream(SensorKind::Gyroscope);

        let closed = tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                if stream.recv().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(closed.is_ok());

        sleep(Duration::from_millis(30)).await;
        assert!(!sensors.is_streaming(SensorKind::Gyroscope));

        let mut restarted = sensors.subscribe(SensorKind::Gyroscope).unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(300), restarted.recv())
            .await
            .unwrap()
            .is_ok());
    }

    #[tokio::test]
    async fn test_resubscribe_immediately_after_stop() {
        let sensors = service();
        let mut first = sensors.subscribe(SensorKind::Gyroscope).unwrap();
        tokio::time::timeout(Duration::from_millis(300), first.recv())
            .await
            .unwrap()
            .unwrap();

        // No settling sleep between stop and resubscribe: stop hands the
        // feed back before returning
        sensors.stop_stream(SensorKind::Gyroscope);
        let mut second = sensors.subscribe(SensorKind::Gyroscope).unwrap();
        assert!(sensors.is_streaming(SensorKind::Gyroscope));
        assert!(tokio::time::timeout(Duration::from_millis(300), second.recv())
            .await
            .unwrap()
            .is_ok());
    }

    #[tokio::test]
    async fn test_zero_channel_capacity_still_streams() {
        let mut config = fast_config();
        config.channel_capacity = 0;
        let sensors = MotionSensors::with_config(Arc::new(SimulatedBackend::new()), config);

        let mut stream = sensors.subscribe(SensorKind::Accelerometer).unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(300), stream.recv())
            .await
            .unwrap()
            .is_ok());
    }

    #[tokio::test]
    async fn test_stream_auto_stops_when_last_subscriber_drops() {
        let sensors = service();
        let stream = sensors.subscribe(SensorKind::Magnetometer).unwrap();
        drop(stream);

        sleep(Duration::from_millis(80)).await;
        assert!(!sensors.is_streaming(SensorKind::Magnetometer));
    }

    #[tokio::test]
    async fn test_one_shot_does_not_disturb_stream() {
        let sensors = service();
        let mut stream = sensors.subscribe(SensorKind::Accelerometer).unwrap();
        tokio::time::timeout(Duration::from_millis(300), stream.recv())
            .await
            .unwrap()
            .unwrap();

        sensors.read(SensorKind::Accelerometer).await.unwrap();

        assert!(sensors.is_streaming(SensorKind::Accelerometer));
        assert!(tokio::time::timeout(Duration::from_millis(300), stream.recv())
            .await
            .unwrap()
            .is_ok());
    }

    #[tokio::test]
    async fn test_motion_stream_accumulates_all_sensors() {
        let sensors = service();
        let mut motion = sensors.subscribe_motion().unwrap();

        let full = tokio::time::timeout(Duration::from_millis(500), async {
            loop {
                let reading = motion.recv().await.unwrap();
                if reading.accelerometer.is_some()
                    && reading.gyroscope.is_some()
                    && reading.magnetometer.is_some()
                {
                    return reading;
                }
            }
        })
        .await
        .expect("cache fills within window");

        assert!(full.timestamp > 0);
        let accel = full.accelerometer.unwrap();
        assert!(accel.magnitude() > 9.3 && accel.magnitude() < 10.3);
    }

    #[tokio::test]
    async fn test_motion_stream_subset_keeps_missing_null() {
        let sensors = service_with(SimulatedBackend::with_sensors(&[SensorKind::Magnetometer]));
        let mut motion = sensors.subscribe_motion().unwrap();

        for _ in 0..5 {
            let reading = tokio::time::timeout(Duration::from_millis(300), motion.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(reading.accelerometer.is_none());
            assert!(reading.gyroscope.is_none());
            assert!(reading.magnetometer.is_some());
        }
    }

    #[tokio::test]
    async fn test_motion_stream_requires_some_sensor() {
        let sensors = service_with(SimulatedBackend::with_sensors(&[]));
        assert!(sensors.subscribe_motion().is_err());
    }

    #[tokio::test]
    async fn test_motion_stop_leaves_individual_streams_running() {
        let sensors = service();
        let mut accel = sensors.subscribe(SensorKind::Accelerometer).unwrap();
        let _motion = sensors.subscribe_motion().unwrap();

        sensors.stop_motion_stream();
        sleep(Duration::from_millis(30)).await;

        assert!(!sensors.is_motion_streaming());
        assert!(sensors.is_streaming(SensorKind::Accelerometer));
        assert!(tokio::time::timeout(Duration::from_millis(300), accel.recv())
            .await
            .unwrap()
            .is_ok());
    }

    #[tokio::test]
    async fn test_device_motion_stream_converts_acceleration() {
        let sensors = service();
        let mut dm = sensors.subscribe_device_motion().unwrap();

        let frame = tokio::time::timeout(Duration::from_millis(300), dm.recv())
            .await
            .unwrap()
            .unwrap();
        use approx::assert_relative_eq;
        assert_relative_eq!(frame.gravity.z, -9.81);
        assert!(frame.user_acceleration.magnitude() < 0.5);
    }

    #[tokio::test]
    async fn test_device_motion_explicit_start_stop() {
        let sensors = service();

        sensors.start_device_motion_updates().unwrap();
        assert!(sensors.is_device_motion_streaming());
        // Second start joins the running feed
        sensors.start_device_motion_updates().unwrap();

        // The feed survives without subscribers until stopped
        sleep(Duration::from_millis(50)).await;
        assert!(sensors.is_device_motion_streaming());

        let mut dm = sensors.subscribe_device_motion().unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(300), dm.recv())
            .await
            .unwrap()
            .is_ok());
        drop(dm);

        sensors.stop_device_motion_updates();
        sensors.stop_device_motion_updates();
        sleep(Duration::from_millis(30)).await;
        assert!(!sensors.is_device_motion_streaming());

        sensors.start_device_motion_updates().unwrap();
        assert!(sensors.is_device_motion_streaming());
    }

    #[tokio::test]
    async fn test_device_motion_unsupported() {
        let sensors = service_with(SimulatedBackend::with_sensors(&[SensorKind::Accelerometer]));
        let err = sensors.start_device_motion_updates().unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED");
    }
}
