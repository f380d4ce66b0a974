//! Android backend.
//!
//! The Kotlin binding owns the `SensorManager` listeners and pushes every
//! `onSensorChanged` callback across JNI into a process-global router; Rust
//! owns subscription routing and all policy above it. Availability comes from
//! `getDefaultSensor` queries through the cached application context, with an
//! explicit override pushed by the binding for hosts where the context is not
//! yet attached.
//!
//! The binding reports axes in native sensor units, with acceleration scaled
//! to gravity multiples before crossing JNI.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use jni::objects::{JClass, JObject, JValue};
use jni::sys::{jboolean, jdouble, jint, jlong, JNI_TRUE};
use jni::{JNIEnv, JavaVM};
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::backend::{now_ms, RawSample, SampleProfile, SensorBackend, Subscription};
use crate::error::{Result, SensorError};
use crate::reading::SensorKind;

const CHANNEL_CAPACITY: usize = 32;

// android.hardware.Sensor type constants
const TYPE_ACCELEROMETER: jint = 1;
const TYPE_MAGNETIC_FIELD: jint = 2;
const TYPE_GYROSCOPE: jint = 4;

static JAVA_VM: OnceLock<JavaVM> = OnceLock::new();

// Global router - stored as static so samples pushed through JNI reach
// subscriptions created anywhere in the process
lazy_static::lazy_static! {
    static ref ROUTER: SampleRouter = SampleRouter::new();
}

struct SampleRouter {
    subscribers: Mutex<HashMap<SensorKind, Vec<mpsc::Sender<RawSample>>>>,
    availability: Mutex<HashMap<SensorKind, bool>>,
}

impl SampleRouter {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            availability: Mutex::new(HashMap::new()),
        }
    }

    fn attach(&self, kind: SensorKind, tx: mpsc::Sender<RawSample>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.entry(kind).or_default().push(tx);
    }

    /// Fans a sample out to every live subscription, pruning closed ones.
    /// Full channels drop the sample rather than block the callback thread.
    fn push(&self, kind: SensorKind, sample: RawSample) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(senders) = subscribers.get_mut(&kind) {
            senders.retain(|tx| match tx.try_send(sample) {
                Ok(_) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("android {} subscriber full, dropping sample", kind);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    fn set_available(&self, kind: SensorKind, available: bool) {
        let mut availability = self.availability.lock().unwrap_or_else(|e| e.into_inner());
        availability.insert(kind, available);
    }

    fn availability_override(&self, kind: SensorKind) -> Option<bool> {
        let availability = self.availability.lock().unwrap_or_else(|e| e.into_inner());
        availability.get(&kind).copied()
    }
}

/// Backend fed by the Kotlin sensor binding.
pub struct AndroidBackend;

impl AndroidBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AndroidBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBackend for AndroidBackend {
    fn name(&self) -> &'static str {
        "android"
    }

    fn is_available(&self, kind: SensorKind) -> bool {
        if let Some(known) = ROUTER.availability_override(kind) {
            return known;
        }
        query_default_sensor(kind).unwrap_or(false)
    }

    fn subscribe(&self, kind: SensorKind, profile: SampleProfile) -> Result<Subscription> {
        if !self.is_available(kind) {
            return Err(SensorError::Unavailable { kind });
        }

        // The binding keeps listeners registered at game rate while attached,
        // which satisfies both profiles; the requested rate is advisory here.
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        ROUTER.attach(kind, tx);
        debug!("android {} subscription attached ({:?})", kind, profile);
        Ok(Subscription::new(kind, rx))
    }
}

fn sensor_kind(sensor_type: jint) -> Option<SensorKind> {
    match sensor_type {
        TYPE_ACCELEROMETER => Some(SensorKind::Accelerometer),
        TYPE_MAGNETIC_FIELD => Some(SensorKind::Magnetometer),
        TYPE_GYROSCOPE => Some(SensorKind::Gyroscope),
        _ => None,
    }
}

fn sensor_type(kind: SensorKind) -> jint {
    match kind {
        SensorKind::Accelerometer => TYPE_ACCELEROMETER,
        SensorKind::Magnetometer => TYPE_MAGNETIC_FIELD,
        SensorKind::Gyroscope => TYPE_GYROSCOPE,
    }
}

fn java_vm() -> Option<&'static JavaVM> {
    if JAVA_VM.get().is_none() {
        let ctx = ndk_context::android_context();
        let vm = unsafe { JavaVM::from_raw(ctx.vm().cast()) }.ok()?;
        let _ = JAVA_VM.set(vm);
    }
    JAVA_VM.get()
}

/// Runs `f` with an attached env and the application context.
fn with_context<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut JNIEnv, &JObject) -> Option<R>,
{
    let vm = java_vm()?;
    let mut env = vm.attach_current_thread().ok()?;
    let ctx = ndk_context::android_context();
    let context = unsafe { JObject::from_raw(ctx.context().cast()) };
    f(&mut env, &context)
}

/// `getSystemService("sensor").getDefaultSensor(type) != null`
fn query_default_sensor(kind: SensorKind) -> Option<bool> {
    with_context(|env, context| {
        let service_name = env.new_string("sensor").ok()?;
        let manager = env
            .call_method(
                context,
                "getSystemService",
                "(Ljava/lang/String;)Ljava/lang/Object;",
                &[JValue::Object(service_name.as_ref())],
            )
            .ok()?
            .l()
            .ok()?;
        if manager.is_null() {
            return Some(false);
        }

        let sensor = env
            .call_method(
                &manager,
                "getDefaultSensor",
                "(I)Landroid/hardware/Sensor;",
                &[JValue::Int(sensor_type(kind))],
            )
            .ok()?
            .l()
            .ok()?;
        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_clear();
            return Some(false);
        }
        Some(!sensor.is_null())
    })
}

/// JNI: sensor callback from the Kotlin binding
/// Parameters: Android sensor type, axes in native units (acceleration in
/// gravity multiples), wall-clock milliseconds (0 means stamp here)
/// Returns: 0 on success, -1 for an unknown sensor type
#[no_mangle]
pub extern "C" fn Java_com_example_motionsensors_SensorBinding_nativeOnSensorChanged(
    _env: JNIEnv,
    _class: JClass,
    sensor_type: jint,
    x: jdouble,
    y: jdouble,
    z: jdouble,
    timestamp_ms: jlong,
) -> jint {
    match on_sensor_changed_impl(sensor_type, x, y, z, timestamp_ms) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}

fn on_sensor_changed_impl(
    sensor_type: jint,
    x: f64,
    y: f64,
    z: f64,
    timestamp_ms: i64,
) -> Result<()> {
    let kind = sensor_kind(sensor_type).ok_or_else(|| {
        warn!("dropping sample for unknown sensor type {}", sensor_type);
        SensorError::Backend(format!("unknown sensor type {}", sensor_type))
    })?;

    let timestamp = if timestamp_ms > 0 { timestamp_ms } else { now_ms() };
    ROUTER.push(kind, RawSample { x, y, z, timestamp });
    Ok(())
}

/// JNI: availability reported by the Kotlin binding at attach time
/// Returns: 0 on success, -1 for an unknown sensor type
#[no_mangle]
pub extern "C" fn Java_com_example_motionsensors_SensorBinding_nativeSetSensorAvailable(
    _env: JNIEnv,
    _class: JClass,
    sensor_type: jint,
    available: jboolean,
) -> jint {
    match sensor_kind(sensor_type) {
        Some(kind) => {
            ROUTER.set_available(kind, available == JNI_TRUE);
            debug!("android {} availability set to {}", kind, available == JNI_TRUE);
            0
        }
        None => {
            warn!("availability report for unknown sensor type {}", sensor_type);
            -1
        }
    }
}
