//! Platform monitoring adapter boundary.
//!
//! The OS region-monitoring primitive is opaque to this engine: it
//! accepts registrations, emits transition events, and reports success or
//! failure asynchronously. The [`RegionMonitor`] trait models that
//! boundary as completion-signaled operations; callers hand the adapter a
//! single-use [`Completion`] and suspend on the paired [`CompletionWait`]
//! instead of blocking inside the adapter call.
//!
//! Contract expected of implementations:
//! - `register` is idempotent: re-registering an id the platform already
//!   has resolves as success.
//! - `unregister` tolerates "not currently registered" as success.
//! - There is no reliable "list currently registered" query; the engine
//!   reconciles by replaying its durable intent instead.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::RegisterError;
use crate::event::TransitionEvent;
use crate::region::{GeofenceSpec, Transition};

/// The outcome of one adapter operation.
pub type AdapterResult = Result<(), RegisterError>;

/// Single-use resolution handle for an asynchronous adapter operation.
#[derive(Debug)]
pub struct Completion {
    tx: Sender<AdapterResult>,
}

impl Completion {
    /// Create a completion and its paired wait handle.
    #[must_use]
    pub fn channel() -> (Self, CompletionWait) {
        let (tx, rx) = bounded::<AdapterResult>(1);
        (Self { tx }, CompletionWait { rx })
    }

    /// Resolve the operation. Consumes the handle; resolving after the
    /// waiter gave up is a silent no-op.
    pub fn resolve(self, result: AdapterResult) {
        let _ = self.tx.send(result);
    }

    /// Resolve as success.
    pub fn ok(self) {
        self.resolve(Ok(()));
    }

    /// Resolve as failure.
    pub fn fail(self, err: RegisterError) {
        self.resolve(Err(err));
    }
}

/// Waiter for a [`Completion`].
#[derive(Debug)]
pub struct CompletionWait {
    rx: Receiver<AdapterResult>,
}

impl CompletionWait {
    /// Block until the adapter resolves the operation.
    ///
    /// A dropped completion (adapter bug or teardown) resolves as an
    /// adapter error rather than hanging the reconciler.
    #[must_use]
    pub fn wait(self) -> AdapterResult {
        self.rx.recv().unwrap_or_else(|_| {
            Err(RegisterError::Adapter {
                message: "adapter dropped completion without resolving".to_string(),
            })
        })
    }

    /// Like [`CompletionWait::wait`] with an upper bound.
    #[must_use]
    pub fn wait_timeout(self, timeout: Duration) -> AdapterResult {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(RegisterError::Transient {
                message: format!("adapter did not complete within {}ms", timeout.as_millis()),
            }),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(RegisterError::Adapter {
                message: "adapter dropped completion without resolving".to_string(),
            }),
        }
    }
}

/// The opaque platform region-monitoring primitive.
pub trait RegionMonitor: Send + Sync {
    /// Register a region for monitoring. Must resolve `done` exactly
    /// once; re-registering a known id is a no-op success.
    fn register(&self, spec: &GeofenceSpec, done: Completion);

    /// Unregister a region. Must resolve `done` exactly once; an absent
    /// id is a no-op success.
    fn unregister(&self, region_id: &str, done: Completion);
}

#[derive(Debug, Default)]
struct SimulatedState {
    live: HashMap<String, GeofenceSpec>,
    insertion: Vec<String>,
    scripted: HashMap<String, Vec<RegisterError>>,
    register_calls: u64,
}

/// Callback receiving the events a monitor emits.
pub type EventSink = Box<dyn Fn(TransitionEvent) + Send + Sync>;

/// In-process [`RegionMonitor`] reference implementation.
///
/// Records the live registration set, supports scripted per-id failures
/// (consumed oldest-first, so a transient fault followed by success is
/// expressible), an optional capacity bound, and an optional completion
/// latency. Crossings are simulated with [`SimulatedMonitor::emit`] and
/// delivered to a connected [`EventSink`], normally the event router.
/// Intended for embedded usage and tests; a production build substitutes
/// the host platform's primitive behind the same trait.
#[derive(Default)]
pub struct SimulatedMonitor {
    state: Mutex<SimulatedState>,
    capacity: Option<usize>,
    latency: Option<Duration>,
    sink: Mutex<Option<EventSink>>,
}

impl SimulatedMonitor {
    /// Create a monitor with no capacity bound and instant completions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a monitor that rejects registrations beyond `capacity`
    /// distinct ids with `CapacityExceeded`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Resolve completions on a background thread after `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a failure for the next `register` call for `id`.
    pub fn script_failure(&self, id: &str, err: RegisterError) {
        let mut state = self.state.lock().expect("simulated monitor poisoned");
        state.scripted.entry(id.to_string()).or_default().push(err);
    }

    /// Ids currently registered, in first-registration order.
    #[must_use]
    pub fn live_ids(&self) -> Vec<String> {
        let state = self.state.lock().expect("simulated monitor poisoned");
        state.insertion.clone()
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        let state = self.state.lock().expect("simulated monitor poisoned");
        state.live.contains_key(id)
    }

    /// Total `register` calls observed (including idempotent repeats).
    #[must_use]
    pub fn register_calls(&self) -> u64 {
        let state = self.state.lock().expect("simulated monitor poisoned");
        state.register_calls
    }

    /// Connect the sink that receives emitted events, replacing any
    /// previous one.
    pub fn connect_events(&self, sink: impl Fn(TransitionEvent) + Send + Sync + 'static) {
        let mut slot = self.sink.lock().expect("simulated monitor poisoned");
        *slot = Some(Box::new(sink));
    }

    /// Deliver a raw event to the connected sink.
    ///
    /// Delivery is unconditional: real platforms redeliver crossings for
    /// regions that were since unregistered, and with no sink connected
    /// the event is dropped the way an unwatched broadcast would be.
    pub fn emit(&self, event: TransitionEvent) {
        let slot = self.sink.lock().expect("simulated monitor poisoned");
        if let Some(sink) = slot.as_ref() {
            sink(event);
        }
    }

    /// Simulate one boundary crossing.
    pub fn emit_crossing(
        &self,
        region_id: &str,
        transition: Transition,
        timestamp_monotonic: u64,
        source_event_id: &str,
    ) {
        self.emit(TransitionEvent::new(
            region_id,
            transition,
            timestamp_monotonic,
            source_event_id,
        ));
    }

    fn resolve(&self, done: Completion, result: AdapterResult) {
        match self.latency {
            None => done.resolve(result),
            Some(latency) => {
                std::thread::spawn(move || {
                    std::thread::sleep(latency);
                    done.resolve(result);
                });
            }
        }
    }
}

impl std::fmt::Debug for SimulatedMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMonitor")
            .field("capacity", &self.capacity)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl RegionMonitor for SimulatedMonitor {
    fn register(&self, spec: &GeofenceSpec, done: Completion) {
        let result = {
            let mut state = self.state.lock().expect("simulated monitor poisoned");
            state.register_calls += 1;

            if let Some(errs) = state.scripted.get_mut(&spec.id) {
                if !errs.is_empty() {
                    let err = errs.remove(0);
                    if errs.is_empty() {
                        state.scripted.remove(&spec.id);
                    }
                    self.resolve(done, Err(err));
                    return;
                }
            }

            let already = state.live.contains_key(&spec.id);
            if !already {
                if let Some(cap) = self.capacity {
                    if state.live.len() >= cap {
                        self.resolve(done, Err(RegisterError::CapacityExceeded));
                        return;
                    }
                }
                state.insertion.push(spec.id.clone());
            }
            state.live.insert(spec.id.clone(), spec.clone());
            Ok(())
        };
        self.resolve(done, result);
    }

    fn unregister(&self, region_id: &str, done: Completion) {
        {
            let mut state = self.state.lock().expect("simulated monitor poisoned");
            if state.live.remove(region_id).is_some() {
                state.insertion.retain(|id| id != region_id);
            }
        }
        // Absent ids resolve as success: the platform contract.
        self.resolve(done, Ok(()));
    }
}
