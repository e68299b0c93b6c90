//! Routing of raw platform transition events to the application.
//!
//! Platforms redeliver: a resumed process or a re-fired broadcast can
//! hand the engine the same physical crossing more than once. The router
//! is the single choke point that turns at-least-once raw delivery into
//! at-most-once application notification, and drops events for regions
//! that have left the intent set.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::event::{TransitionCode, TransitionEvent};
use crate::gateway::RegionNotifier;
use crate::region::Transition;
use crate::store::GeofenceStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupeKey {
    region_id: String,
    code: TransitionCode,
    source_event_id: String,
}

impl DedupeKey {
    fn of(event: &TransitionEvent) -> Self {
        Self {
            region_id: event.region_id.clone(),
            code: event.code,
            source_event_id: event.source_event_id.clone(),
        }
    }
}

/// Bounded sliding window of recently delivered event keys.
///
/// Entries expire past a time horizon or, regardless of age, once the
/// window exceeds its count bound (oldest first). Time is the event's
/// monotonic timestamp, so a burst of stale redeliveries cannot pin the
/// window open.
#[derive(Debug)]
pub struct DedupeWindow {
    horizon_ms: u64,
    capacity: usize,
    // Arrival order for eviction; the set answers membership.
    order: VecDeque<(u64, DedupeKey)>,
    seen: HashSet<DedupeKey>,
}

impl DedupeWindow {
    /// Create a window with the given horizon (milliseconds) and entry
    /// bound.
    #[must_use]
    pub fn new(horizon_ms: u64, capacity: usize) -> Self {
        Self {
            horizon_ms,
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record `key` at monotonic time `now_ms`.
    ///
    /// Returns `false` if the key is already within the window (a
    /// duplicate), `true` if it was inserted.
    fn observe(&mut self, key: DedupeKey, now_ms: u64) -> bool {
        self.expire(now_ms);
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back((now_ms, key));
        while self.order.len() > self.capacity {
            if let Some((_, evicted)) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    fn expire(&mut self, now_ms: u64) {
        while let Some((ts, _)) = self.order.front() {
            if now_ms.saturating_sub(*ts) <= self.horizon_ms {
                break;
            }
            if let Some((_, expired)) = self.order.pop_front() {
                self.seen.remove(&expired);
            }
        }
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the window holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// What the router did with one raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Dispatched to the application as an enter/exit notification.
    Delivered(Transition),
    /// Dropped: already delivered within the dedupe window.
    Duplicate,
    /// Surfaced through `onUnexpectedAction`: unrecognized code.
    UnexpectedCode,
    /// Dropped: the region is no longer in the intent set.
    Orphaned,
    /// Dropped: the region does not watch this transition.
    Unwatched,
}

/// Single entry point for raw platform events.
pub struct EventRouter {
    store: Arc<dyn GeofenceStore>,
    notifier: Arc<dyn RegionNotifier>,
    window: Mutex<DedupeWindow>,
}

impl EventRouter {
    /// Create a router over the intent store and notifier surface.
    #[must_use]
    pub fn new(
        store: Arc<dyn GeofenceStore>,
        notifier: Arc<dyn RegionNotifier>,
        config: &EngineConfig,
    ) -> Self {
        let horizon_ms = u64::try_from(config.dedupe_horizon.as_millis()).unwrap_or(u64::MAX);
        Self {
            store,
            notifier,
            window: Mutex::new(DedupeWindow::new(horizon_ms, config.dedupe_capacity)),
        }
    }

    /// Route one raw event.
    ///
    /// Order of checks: dedupe first (so redelivered unknown codes are
    /// not re-surfaced), then unknown-code dispatch, then intent-set
    /// membership, then the watched-transition filter, then delivery.
    /// Per-region dispatch order equals arrival order; the window and
    /// the membership check share one exclusion scope so concurrent
    /// deliveries of the same tuple cannot both pass.
    ///
    /// # Errors
    /// Fails only if the store cannot be read or internal state is
    /// poisoned; dropped events are outcomes, not errors.
    pub fn on_raw_event(&self, event: &TransitionEvent) -> EngineResult<RouteOutcome> {
        let mut window = self
            .window
            .lock()
            .map_err(|_| EngineError::internal("poisoned lock: dedupe window"))?;

        if !window.observe(DedupeKey::of(event), event.timestamp_monotonic) {
            debug!(region_id = %event.region_id, source = %event.source_event_id, "duplicate event dropped");
            return Ok(RouteOutcome::Duplicate);
        }

        let transition = match event.code {
            TransitionCode::Enter => Transition::Enter,
            TransitionCode::Exit => Transition::Exit,
            TransitionCode::Other(raw) => {
                warn!(region_id = %event.region_id, raw, "unrecognized transition code");
                self.notifier.on_unexpected_action(raw);
                return Ok(RouteOutcome::UnexpectedCode);
            }
        };

        let Some(spec) = self
            .store
            .get(&event.region_id)
            .map_err(EngineError::Store)?
        else {
            debug!(region_id = %event.region_id, "event for unmonitored region dropped");
            return Ok(RouteOutcome::Orphaned);
        };

        if !spec.watched.watches(transition) {
            debug!(region_id = %event.region_id, ?transition, "unwatched transition dropped");
            return Ok(RouteOutcome::Unwatched);
        }

        // Dispatch under the window lock: per-region order must equal
        // arrival order, and the notifier contract is non-blocking.
        match transition {
            Transition::Enter => self.notifier.on_enter_region(&event.region_id),
            Transition::Exit => self.notifier.on_exit_region(&event.region_id),
        }
        Ok(RouteOutcome::Delivered(transition))
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter").finish_non_exhaustive()
    }
}
