//! Stream plumbing shared by every feed: broadcast hubs with idempotent
//! start/stop, pump-task guards, and the subscriber handles returned to
//! callers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::Stream;
use log::{debug, info};
use tokio::sync::{broadcast, mpsc};

use crate::error::{Result, SensorError};
use crate::reading::{DeviceMotionReading, MotionReading, SensorReading};

/// Subscriber handle for one feed. Dropping it leaves the feed; when the last
/// subscriber of a sensor feed is gone the underlying listener unregisters.
pub struct ReadingStream<T> {
    label: &'static str,
    rx: broadcast::Receiver<T>,
}

/// Converted readings from one physical sensor.
pub type SensorStream = ReadingStream<SensorReading>;
/// Fused cache aggregates, re-emitted on every contributing update.
pub type MotionStream = ReadingStream<MotionReading>;
/// Platform-fused device motion frames.
pub type DeviceMotionStream = ReadingStream<DeviceMotionReading>;

impl<T: Clone + Send + 'static> ReadingStream<T> {
    pub(crate) fn new(label: &'static str, rx: broadcast::Receiver<T>) -> Self {
        Self { label, rx }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Next reading, or `StreamClosed` once the feed has stopped.
    ///
    /// A subscriber that falls behind skips the overwritten readings and
    /// keeps going; latest data always wins over completeness here.
    pub async fn recv(&mut self) -> Result<T> {
        loop {
            match self.rx.recv().await {
                Ok(reading) => return Ok(reading),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("{} subscriber lagged, skipped {} readings", self.label, missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SensorError::StreamClosed(self.label.to_string()));
                }
            }
        }
    }

    /// Adapts the handle to a `futures::Stream` that ends when the feed stops.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        futures::stream::unfold(self, |mut this| async move {
            this.recv().await.ok().map(|reading| (reading, this))
        })
    }
}

struct HubState<T> {
    id: u64,
    tx: broadcast::Sender<T>,
    // Held only so dropping the state signals the pump; never sent on.
    _shutdown: mpsc::Sender<()>,
}

struct HubInner<T> {
    label: &'static str,
    active: AtomicBool,
    next_id: AtomicU64,
    state: Mutex<Option<HubState<T>>>,
}

/// One feed's lifecycle: a broadcast channel plus the pump task feeding it.
///
/// `open` either joins the live session or starts a new one; `stop` is
/// idempotent, hands the feed back synchronously, and a stopped hub can be
/// reopened at once. A subscriber that joins just as a session dies observes
/// `StreamClosed` and can simply resubscribe.
pub(crate) struct Hub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T: Clone + Send + 'static> Hub<T> {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(HubInner {
                label,
                active: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                state: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Joins the live session, or wins the start race and runs `start` to
    /// spawn the pump. `start` receives the hub sender, the shutdown signal,
    /// and the guard the pump must hold until it exits.
    pub(crate) fn open<F>(&self, capacity: usize, start: F) -> Result<broadcast::Receiver<T>>
    where
        F: FnOnce(broadcast::Sender<T>, mpsc::Receiver<()>, PumpGuard<T>) -> Result<()>,
    {
        {
            let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(live) = state.as_ref() {
                debug!("{} stream already active, joining", self.inner.label);
                return Ok(live.tx.subscribe());
            }
        }

        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            // broadcast::channel panics on a zero capacity
            let (tx, rx) = broadcast::channel(capacity.max(1));
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            {
                let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
                *state = Some(HubState {
                    id,
                    tx: tx.clone(),
                    _shutdown: shutdown_tx,
                });
            }

            let guard = PumpGuard {
                inner: Arc::clone(&self.inner),
                id,
            };
            info!("{} stream starting", self.inner.label);
            start(tx, shutdown_rx, guard)?;
            Ok(rx)
        } else {
            // Lost the start race; the winner has either published its state
            // or is mid-teardown.
            let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.as_ref() {
                Some(live) => Ok(live.tx.subscribe()),
                None => Err(SensorError::StreamClosed(self.inner.label.to_string())),
            }
        }
    }

    /// Stops the current session if one is running. Idempotent; by the time
    /// this returns the hub accepts a fresh `open`.
    pub(crate) fn stop(&self) {
        let taken = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let taken = state.take();
            if taken.is_some() {
                // Reset the flag here rather than waiting for the pump to
                // exit; the pump's guard id-checks before touching state, so
                // it cannot stomp a session started after this store.
                self.inner.active.store(false, Ordering::Release);
            }
            taken
        };
        if taken.is_some() {
            debug!("{} stream stopping", self.inner.label);
        } else {
            debug!("{} stream already stopped", self.inner.label);
        }
        // Dropping the taken state releases the shutdown sender; the pump
        // observes it and exits through its guard.
    }
}

/// Held by a pump task for the lifetime of its session. Dropping it clears
/// the session state, including on panic, so the hub can always restart.
pub(crate) struct PumpGuard<T> {
    inner: Arc<HubInner<T>>,
    id: u64,
}

impl<T> Drop for PumpGuard<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.as_ref() {
            Some(live) if live.id == self.id => {
                *state = None;
                self.inner.active.store(false, Ordering::Release);
                info!("{} stream stopped", self.inner.label);
            }
            // A newer session owns the flag now.
            Some(_) => {}
            // Explicit stop already took the state and reset the flag.
            None => {}
        }
    }
}
