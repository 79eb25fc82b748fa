//! Write-pressure monitoring
//!
//! The engine reports lifecycle events (WAL created, flush finished,
//! compaction finished) from its own background threads. Each event is
//! handed to a dedicated worker thread through a single-slot channel; the
//! worker samples the engine metrics and tells the registered callback
//! whether the engine is close to stalling writes.
//!
//! The signal is a level, not an edge: if the slot is already occupied the
//! new trigger is dropped, because the pending evaluation will observe the
//! same (or a newer) engine state.

use std::fmt::{Debug, Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::config::{BusyCallback, PressureThresholds};
use crate::engine::{EngineEvent, EngineEventListener, KvEngine};
use crate::{Error, Result};

/// Write pressure derived from the last sampled engine metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Pressure {
    /// The engine is absorbing writes comfortably.
    #[default]
    Calm,
    /// The engine is about to throttle writes.
    Busy,
}

impl Pressure {
    /// Whether this is [`Pressure::Busy`].
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Busy)
    }
}

impl From<bool> for Pressure {
    fn from(busy: bool) -> Self {
        if busy { Self::Busy } else { Self::Calm }
    }
}

impl Display for Pressure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calm => write!(f, "calm"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// Whether the engine handle has been handed to the monitor yet. Engines may
/// report events while they are still opening; those are skipped.
enum HandleGate<E> {
    Pending,
    Ready(Arc<E>),
}

struct Shared<E> {
    gate: RwLock<HandleGate<E>>,
    trigger: Mutex<Option<Sender<EngineEvent>>>,
    thresholds: PressureThresholds,
    callback: Option<BusyCallback>,
    pressure: Mutex<Pressure>,
}

impl<E: KvEngine> Shared<E> {
    fn notify(&self, event: EngineEvent) {
        let trigger = self.trigger.lock();
        let Some(sender) = trigger.as_ref() else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => trace!(?event, "queued pressure evaluation"),
            Err(TrySendError::Full(_)) => {
                trace!(?event, "pressure evaluation already pending");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn evaluate(&self, event: EngineEvent) {
        let engine = match &*self.gate.read() {
            HandleGate::Ready(engine) => Arc::clone(engine),
            HandleGate::Pending => {
                trace!(?event, "engine handle not ready, skipping evaluation");
                return;
            }
        };

        let metrics = match engine.metrics() {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!("failed to read engine metrics: {e}");
                return;
            }
        };

        let pressure = Pressure::from(self.thresholds.is_busy(&metrics));
        let previous = std::mem::replace(&mut *self.pressure.lock(), pressure);
        if previous != pressure {
            debug!(
                ?event,
                memtable_bytes = metrics.memtable_bytes,
                level0_files = metrics.level0_files,
                "write pressure changed from {previous} to {pressure}"
            );
        }

        if let Some(callback) = &self.callback
            && catch_unwind(AssertUnwindSafe(|| callback(pressure.is_busy()))).is_err()
        {
            error!("busy callback panicked");
        }
    }
}

/// Forwards engine events to the monitor without keeping it alive.
struct EventRelay<E> {
    shared: Weak<Shared<E>>,
}

impl<E: KvEngine> EngineEventListener for EventRelay<E> {
    fn on_event(&self, event: EngineEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.notify(event);
        }
    }
}

/// Worker thread plus a channel that disconnects when its loop returns.
struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    /// Join the thread if it finishes within `timeout`.
    fn join(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("health monitor worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Derives the busy signal from engine telemetry on a background worker.
///
/// Dropping the monitor stops it.
pub struct HealthMonitor<E: KvEngine> {
    shared: Arc<Shared<E>>,
    worker: Mutex<Option<Worker>>,
    shutdown_timeout: Duration,
}

impl<E: KvEngine> HealthMonitor<E> {
    /// Start the worker. The monitor stays [`Pressure::Calm`] and ignores
    /// events until [`HealthMonitor::attach`] hands it the engine.
    pub fn start(
        thresholds: PressureThresholds,
        callback: Option<BusyCallback>,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let (sender, receiver) = channel::bounded(1);
        let shared = Arc::new(Shared {
            gate: RwLock::new(HandleGate::Pending),
            trigger: Mutex::new(Some(sender)),
            thresholds,
            callback,
            pressure: Mutex::new(Pressure::Calm),
        });

        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("raft-store-monitor".to_string())
            .spawn(move || {
                let _done = done_tx;
                run_worker(&worker_shared, &receiver);
            })
            .map_err(Error::Io)?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(Worker {
                handle,
                done: done_rx,
            })),
            shutdown_timeout,
        })
    }

    /// Listener to register with the engine before opening it.
    #[must_use]
    pub fn listener(&self) -> Arc<dyn EngineEventListener> {
        Arc::new(EventRelay {
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Hand over the opened engine. The event the engine emitted while
    /// opening was skipped, so one evaluation is forced here.
    pub fn attach(&self, engine: Arc<E>) {
        *self.shared.gate.write() = HandleGate::Ready(engine);
        self.shared.notify(EngineEvent::WalCreated);
    }

    /// Request an evaluation, as if the engine had reported `event`.
    pub fn notify(&self, event: EngineEvent) {
        self.shared.notify(event);
    }

    /// Pressure computed by the most recent evaluation.
    #[must_use]
    pub fn pressure(&self) -> Pressure {
        *self.shared.pressure.lock()
    }

    /// Thresholds the monitor evaluates against.
    #[must_use]
    pub fn thresholds(&self) -> PressureThresholds {
        self.shared.thresholds
    }

    /// Stop the worker, waiting up to the shutdown timeout for an in-flight
    /// callback. Triggers arriving afterwards are ignored. Safe to call more
    /// than once.
    pub fn stop(&self) {
        // Dropping the only sender disconnects the channel and ends the
        // worker loop once the in-flight evaluation returns.
        self.shared.trigger.lock().take();
        // An in-flight evaluation holds its own clone of the handle.
        *self.shared.gate.write() = HandleGate::Pending;

        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        if worker.handle.thread().id() == thread::current().id() {
            // Closed from inside the callback; the loop exits on return.
            return;
        }

        if !worker.join(self.shutdown_timeout) {
            warn!(
                timeout = ?self.shutdown_timeout,
                "health monitor worker did not stop in time, detaching it"
            );
        }
    }
}

impl<E: KvEngine> Drop for HealthMonitor<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<E: KvEngine> Debug for HealthMonitor<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("thresholds", &self.shared.thresholds)
            .field("pressure", &*self.shared.pressure.lock())
            .finish_non_exhaustive()
    }
}

fn run_worker<E: KvEngine>(shared: &Shared<E>, triggers: &Receiver<EngineEvent>) {
    debug!("health monitor worker started");
    while let Ok(event) = triggers.recv() {
        shared.evaluate(event);
    }
    debug!("health monitor worker stopped");
}
