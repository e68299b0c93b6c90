//! Reconciliation between durable intent and live platform state.
//!
//! The durable intent set is the single source of truth; the platform's
//! live registrations must converge to exactly that set. Because the
//! adapter boundary promises no reliable "list currently registered"
//! query, convergence is achieved by replaying the whole intent set
//! through idempotent registrations rather than diffing live state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapter::{Completion, CompletionWait, RegionMonitor};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, RegisterError};
use crate::region::GeofenceSpec;
use crate::store::{GeofenceStore, StoreError};

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Number of specs whose registration resolved successfully.
    pub applied: usize,
    /// Per-spec failures; one entry per failed id.
    pub failures: Vec<(String, RegisterError)>,
}

impl ReconcileReport {
    /// Returns true if every spec registered successfully.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies the intent set to the platform adapter.
///
/// Owns the ephemeral live-registration mirror. At most one pass runs at
/// a time; batch passes fan out per-spec registrations and join on the
/// adapter completions, so one spec's failure never blocks the rest.
pub struct Reconciler {
    store: Arc<dyn GeofenceStore>,
    adapter: Arc<dyn RegionMonitor>,
    live: Mutex<HashSet<String>>,
    pass: Mutex<()>,
    transient_retries: u32,
    transient_backoff: Duration,
}

fn poisoned(context: &'static str) -> EngineError {
    EngineError::internal(format!("poisoned lock: {context}"))
}

impl Reconciler {
    /// Create a reconciler over the given store and adapter.
    #[must_use]
    pub fn new(
        store: Arc<dyn GeofenceStore>,
        adapter: Arc<dyn RegionMonitor>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            live: Mutex::new(HashSet::new()),
            pass: Mutex::new(()),
            transient_retries: config.transient_retries,
            transient_backoff: config.transient_backoff,
        }
    }

    /// Register every spec in the intent set with the adapter.
    ///
    /// Idempotent: calling this twice with no intervening intent change
    /// yields identical live state and no duplicate failures. Transient
    /// failures get a bounded number of retry rounds with doubling
    /// backoff; every other failure is reported after the first attempt.
    ///
    /// # Errors
    /// Fails only if the store cannot be read or internal state is
    /// poisoned; registration failures are data, not errors.
    pub fn reconcile_all(&self) -> EngineResult<ReconcileReport> {
        let _pass = self.pass.lock().map_err(|_| poisoned("reconcile pass"))?;

        let mut pending = self.store.list_all().map_err(EngineError::Store)?;
        info!(regions = pending.len(), "reconciling intent set");

        let mut report = ReconcileReport::default();
        let mut round = 0u32;

        loop {
            // Fan out this round's registrations, then join.
            let waits: Vec<(String, CompletionWait)> = pending
                .iter()
                .map(|spec| {
                    let (done, wait) = Completion::channel();
                    self.adapter.register(spec, done);
                    (spec.id.clone(), wait)
                })
                .collect();

            let mut retry_next = Vec::new();
            for ((id, wait), spec) in waits.into_iter().zip(pending) {
                match wait.wait() {
                    Ok(()) => {
                        self.mark_live(&id)?;
                        report.applied += 1;
                    }
                    Err(err) if err.is_transient() && round < self.transient_retries => {
                        debug!(region_id = %id, error = %err, round, "transient failure, will retry");
                        retry_next.push(spec);
                    }
                    Err(err) => {
                        warn!(region_id = %id, error = %err, "registration failed");
                        report.failures.push((id, err));
                    }
                }
            }

            if retry_next.is_empty() {
                break;
            }
            std::thread::sleep(self.transient_backoff * 2u32.pow(round));
            round += 1;
            pending = retry_next;
        }

        info!(
            applied = report.applied,
            failed = report.failures.len(),
            "reconciliation pass complete"
        );
        Ok(report)
    }

    /// Unregister everything in the live mirror, tolerating "not
    /// currently registered" as success.
    ///
    /// # Errors
    /// Fails only on poisoned internal state.
    pub fn remove_all(&self) -> EngineResult<()> {
        let _pass = self.pass.lock().map_err(|_| poisoned("reconcile pass"))?;

        let ids: Vec<String> = {
            let mut live = self.live.lock().map_err(|_| poisoned("live mirror"))?;
            live.drain().collect()
        };

        let waits: Vec<(String, CompletionWait)> = ids
            .into_iter()
            .map(|id| {
                let (done, wait) = Completion::channel();
                self.adapter.unregister(&id, done);
                (id, wait)
            })
            .collect();

        for (id, wait) in waits {
            if let Err(err) = wait.wait() {
                // The next reconciliation replays intent; a stale
                // platform registration only produces events the router
                // will drop.
                warn!(region_id = %id, error = %err, "unregistration failed");
            }
        }
        Ok(())
    }

    /// Interactive single-spec registration: persist the intent first,
    /// then apply it to the adapter. A crash between the two leaves the
    /// store as the recovery source of truth.
    ///
    /// # Errors
    /// - Validation failure (nothing persisted)
    /// - Store write failure (store unchanged)
    /// - Adapter registration failure (intent stays persisted, except
    ///   adapter-reported invalid regions, which are rolled back)
    pub fn add_one(&self, spec: GeofenceSpec) -> EngineResult<()> {
        let spec = spec.validated().map_err(EngineError::Validation)?;
        let id = spec.id.clone();

        self.store.upsert(spec.clone()).map_err(EngineError::Store)?;

        match self.register_with_retry(&spec) {
            Ok(()) => {
                self.mark_live(&id)?;
                Ok(())
            }
            Err(err @ RegisterError::InvalidRegion { .. }) => {
                // Caller error: an invalid region must not survive in the
                // intent set to poison every future reconciliation.
                if let Err(store_err) = self.store.remove(&id) {
                    warn!(region_id = %id, error = %store_err, "rollback of invalid region failed");
                }
                Err(EngineError::Register(err))
            }
            Err(err) => Err(EngineError::Register(err)),
        }
    }

    /// Interactive single-spec removal: persist the removal first, then
    /// unregister with the adapter.
    ///
    /// # Errors
    /// - Store write failure (store unchanged)
    /// - Adapter unregistration failure (intent already removed; events
    ///   from the stale registration are dropped by the router)
    pub fn remove_one(&self, id: &str) -> EngineResult<()> {
        self.store.remove(id).map_err(EngineError::Store)?;

        let (done, wait) = Completion::channel();
        self.adapter.unregister(id, done);
        let result = wait.wait();

        {
            let mut live = self.live.lock().map_err(|_| poisoned("live mirror"))?;
            live.remove(id);
        }

        result.map_err(EngineError::Register)
    }

    /// Discard the live mirror. Called on boot/process restart, when the
    /// adapter is assumed to have started empty and prior in-memory
    /// state is unknown.
    ///
    /// # Errors
    /// Fails only on poisoned internal state.
    pub fn reset_live(&self) -> EngineResult<()> {
        let mut live = self.live.lock().map_err(|_| poisoned("live mirror"))?;
        live.clear();
        Ok(())
    }

    /// Number of ids in the live mirror.
    ///
    /// # Errors
    /// Fails only on poisoned internal state.
    pub fn live_len(&self) -> EngineResult<usize> {
        let live = self.live.lock().map_err(|_| poisoned("live mirror"))?;
        Ok(live.len())
    }

    fn register_with_retry(&self, spec: &GeofenceSpec) -> Result<(), RegisterError> {
        let mut attempt = 0u32;
        loop {
            let (done, wait) = Completion::channel();
            self.adapter.register(spec, done);
            match wait.wait() {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.transient_retries => {
                    debug!(region_id = %spec.id, error = %err, attempt, "transient failure, retrying");
                    std::thread::sleep(self.transient_backoff * 2u32.pow(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn mark_live(&self, id: &str) -> EngineResult<()> {
        let mut live = self.live.lock().map_err(|_| poisoned("live mirror"))?;
        live.insert(id.to_string());
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("transient_retries", &self.transient_retries)
            .finish_non_exhaustive()
    }
}
