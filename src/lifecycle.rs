//! Monitoring lifecycle state machine.
//!
//! One worker thread owns the state machine, the execution session, and
//! the reconciler. Commands arrive over a bounded control channel and
//! carry a reply channel; serial processing is what makes `replace_all`
//! atomic to every observer and queues a start or stop behind an
//! outstanding reconciliation instead of interleaving with it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, LifecycleError};
use crate::gateway::RegionNotifier;
use crate::reconcile::Reconciler;
use crate::region::GeofenceSpec;
use crate::session::{ExecutionContext, ExecutionSession};
use crate::store::GeofenceStore;

/// Controller states.
///
/// `Starting` and `Stopping` are only observable from other threads
/// while the worker is inside a transition; commands sent during either
/// queue behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No session held, no monitoring active.
    Stopped,
    /// Acquiring the execution context and reconciling.
    Starting,
    /// Session held, intent set live on the platform.
    Running,
    /// Tearing down registrations and the session.
    Stopping,
}

enum Command {
    Start {
        reply: Sender<EngineResult<()>>,
    },
    StartRegion {
        spec: GeofenceSpec,
        reply: Sender<EngineResult<()>>,
    },
    StopRegion {
        id: String,
        reply: Sender<EngineResult<()>>,
    },
    ReplaceAll {
        specs: Vec<GeofenceSpec>,
        reply: Sender<EngineResult<()>>,
    },
    ClearAll {
        reply: Sender<EngineResult<()>>,
    },
    Restart {
        reply: Sender<EngineResult<bool>>,
    },
    BootRecovery {
        reply: Sender<EngineResult<()>>,
    },
    IsRunning {
        id: String,
        reply: Sender<EngineResult<bool>>,
    },
    State {
        reply: Sender<LifecycleState>,
    },
    Shutdown,
}

/// Handle to the lifecycle worker.
///
/// The controller is the single owner of the worker thread and joins it
/// on drop.
pub struct LifecycleController {
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl LifecycleController {
    /// Spawn the worker. Monitoring does not start until
    /// [`LifecycleController::start`] or
    /// [`LifecycleController::recover_on_boot`] is called.
    ///
    /// # Errors
    /// Fails on an invalid configuration.
    pub fn spawn(
        store: Arc<dyn GeofenceStore>,
        reconciler: Arc<Reconciler>,
        notifier: Arc<dyn RegionNotifier>,
        context: Arc<dyn ExecutionContext>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let config = config.validate()?;
        let (tx, rx) = bounded(config.control_queue_capacity);
        let mut worker = Worker {
            store,
            reconciler,
            notifier,
            context,
            config,
            state: LifecycleState::Stopped,
            session: None,
        };
        let handle = std::thread::Builder::new()
            .name("regionwatch-lifecycle".to_string())
            .spawn(move || worker.run(&rx))
            .map_err(|e| EngineError::internal(format!("cannot spawn lifecycle worker: {e}")))?;
        Ok(Self {
            tx,
            worker: Some(handle),
        })
    }

    /// Start monitoring everything in the intent set.
    ///
    /// Already `Running` is a no-op success.
    ///
    /// # Errors
    /// - Context acquisition failure (controller stays `Stopped`)
    /// - Store read failure
    ///
    /// Per-region registration failures are surfaced through the
    /// notifier, not as an error.
    pub fn start(&self) -> EngineResult<()> {
        self.request(|reply| Command::Start { reply })?
    }

    /// Add one region and start monitoring it, starting the session
    /// first if the controller is `Stopped`.
    ///
    /// # Errors
    /// Validation, store, context, and registration failures.
    pub fn start_region(&self, spec: GeofenceSpec) -> EngineResult<()> {
        self.request(|reply| Command::StartRegion { spec, reply })?
    }

    /// Stop monitoring one region. Unknown ids succeed; the stop
    /// notification is emitted either way. Removing the last region
    /// releases the session.
    ///
    /// # Errors
    /// Store failures, and adapter unregistration failures (the intent
    /// is already removed when those surface).
    pub fn stop_region(&self, id: &str) -> EngineResult<()> {
        self.request(|reply| Command::StopRegion {
            id: id.to_string(),
            reply,
        })?
    }

    /// Atomically replace the whole intent set.
    ///
    /// Tears everything down, clears the store, then validates and adds
    /// each new spec; per-region failures are surfaced through the
    /// notifier and never abort the batch. An empty replacement leaves
    /// the controller `Stopped`.
    ///
    /// # Errors
    /// Context and store failures only.
    pub fn replace_all(&self, specs: Vec<GeofenceSpec>) -> EngineResult<()> {
        self.request(|reply| Command::ReplaceAll { specs, reply })?
    }

    /// Remove every region, release the session, and go `Stopped`.
    ///
    /// # Errors
    /// Store failures.
    pub fn clear_all(&self) -> EngineResult<()> {
        self.request(|reply| Command::ClearAll { reply })?
    }

    /// Restart monitoring from durable intent.
    ///
    /// Returns `false` without touching anything when already `Running`.
    /// Otherwise waits out the settle delay so the platform can release
    /// prior registrations, then runs the start sequence and returns
    /// `true`.
    ///
    /// # Errors
    /// Same failures as [`LifecycleController::start`].
    pub fn restart(&self) -> EngineResult<bool> {
        self.request(|reply| Command::Restart { reply })?
    }

    /// Boot/process-restart recovery: discard all in-memory state and
    /// rebuild monitoring from the store alone.
    ///
    /// # Errors
    /// Same failures as [`LifecycleController::start`].
    pub fn recover_on_boot(&self) -> EngineResult<()> {
        self.request(|reply| Command::BootRecovery { reply })?
    }

    /// Whether monitoring is active for `id`: the controller is
    /// `Running` and `id` is in the intent set.
    ///
    /// # Errors
    /// Store failures.
    pub fn is_running(&self, id: &str) -> EngineResult<bool> {
        self.request(|reply| Command::IsRunning {
            id: id.to_string(),
            reply,
        })?
    }

    /// Current controller state.
    ///
    /// # Errors
    /// Fails if the worker is gone.
    pub fn state(&self) -> EngineResult<LifecycleState> {
        self.request(|reply| Command::State { reply })
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> EngineResult<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(make(reply_tx))
            .map_err(|_| disconnected("control channel"))?;
        reply_rx.recv().map_err(|_| disconnected("reply channel"))
    }
}

fn disconnected(path: &str) -> EngineError {
    EngineError::Lifecycle(LifecycleError::Disconnected {
        path: path.to_string(),
    })
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController").finish_non_exhaustive()
    }
}

struct Worker {
    store: Arc<dyn GeofenceStore>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn RegionNotifier>,
    context: Arc<dyn ExecutionContext>,
    config: EngineConfig,
    state: LifecycleState,
    session: Option<ExecutionSession>,
}

impl Worker {
    fn run(&mut self, rx: &Receiver<Command>) {
        loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.handle(cmd),
                },
                default(self.config.renew_check_interval) => self.tick(),
            }
        }
        self.teardown();
        debug!("lifecycle worker exited");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Start { reply } => {
                let _ = reply.send(self.do_start());
            }
            Command::StartRegion { spec, reply } => {
                let _ = reply.send(self.do_start_region(spec));
            }
            Command::StopRegion { id, reply } => {
                let _ = reply.send(self.do_stop_region(&id));
            }
            Command::ReplaceAll { specs, reply } => {
                let _ = reply.send(self.do_replace_all(specs));
            }
            Command::ClearAll { reply } => {
                let _ = reply.send(self.do_clear_all());
            }
            Command::Restart { reply } => {
                let _ = reply.send(self.do_restart());
            }
            Command::BootRecovery { reply } => {
                let _ = reply.send(self.do_boot_recovery());
            }
            Command::IsRunning { id, reply } => {
                let running = self.state == LifecycleState::Running;
                let result = self
                    .store
                    .contains(&id)
                    .map(|member| running && member)
                    .map_err(EngineError::Store);
                let _ = reply.send(result);
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Shutdown => {}
        }
    }

    /// Timer arm: renew the grant once past the renewal point. A failed
    /// renewal keeps the session and retries at the next tick.
    fn tick(&mut self) {
        if self.state != LifecycleState::Running {
            return;
        }
        if let Some(session) = &mut self.session {
            if session.renewal_due() {
                if let Err(e) = session.renew() {
                    warn!(error = %e, "execution grant renewal failed; will retry");
                }
            }
        }
    }

    fn do_start(&mut self) -> EngineResult<()> {
        if self.state == LifecycleState::Running {
            debug!("start requested while running; no-op");
            self.notifier.on_service_started(true);
            return Ok(());
        }
        self.start_sequence()
    }

    /// The full start path: session, reconcile, notify.
    fn start_sequence(&mut self) -> EngineResult<()> {
        self.state = LifecycleState::Starting;

        if self.session.is_none() {
            match ExecutionSession::begin(self.context.as_ref(), self.config.grant_duration) {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    error!(error = %e, "cannot start monitoring without execution context");
                    self.state = LifecycleState::Stopped;
                    return Err(EngineError::Lifecycle(e));
                }
            }
        }

        let report = match self.reconciler.reconcile_all() {
            Ok(report) => report,
            Err(e) => {
                self.session = None;
                self.state = LifecycleState::Stopped;
                return Err(e);
            }
        };
        for (id, err) in &report.failures {
            self.notifier.on_monitoring_failed(id, err);
        }

        self.state = LifecycleState::Running;
        info!(applied = report.applied, failed = report.failures.len(), "monitoring running");
        self.notifier.on_service_started(true);
        Ok(())
    }

    fn do_start_region(&mut self, spec: GeofenceSpec) -> EngineResult<()> {
        if self.state != LifecycleState::Running {
            self.start_sequence()?;
        }
        let id = spec.id.clone();
        match self.reconciler.add_one(spec) {
            Ok(()) => {
                info!(region_id = %id, "region monitoring started");
                Ok(())
            }
            Err(e) => {
                if let EngineError::Register(reg) = &e {
                    self.notifier.on_monitoring_failed(&id, reg);
                }
                Err(e)
            }
        }
    }

    fn do_stop_region(&mut self, id: &str) -> EngineResult<()> {
        let result = self.reconciler.remove_one(id);
        // The stop is acknowledged even for ids that were never
        // monitored; the application treats stop as idempotent.
        self.notifier.on_monitoring_stopped(id);

        if self.store.is_empty().map_err(EngineError::Store)? && self.state == LifecycleState::Running
        {
            info!("intent set empty; releasing session");
            self.state = LifecycleState::Stopping;
            self.session = None;
            self.state = LifecycleState::Stopped;
        }
        result
    }

    fn do_replace_all(&mut self, specs: Vec<GeofenceSpec>) -> EngineResult<()> {
        self.reconciler.remove_all()?;
        self.store.clear().map_err(EngineError::Store)?;

        if specs.is_empty() {
            self.session = None;
            self.state = LifecycleState::Stopped;
            return Ok(());
        }

        if self.state != LifecycleState::Running {
            self.start_sequence()?;
        }
        for spec in specs {
            let id = spec.id.clone();
            match self.reconciler.add_one(spec) {
                Ok(()) => {}
                Err(EngineError::Register(reg)) => {
                    self.notifier.on_monitoring_failed(&id, &reg);
                }
                Err(EngineError::Validation(v)) => {
                    warn!(region_id = %id, error = %v, "replacement spec rejected");
                    self.notifier.on_monitoring_failed(
                        &id,
                        &crate::error::RegisterError::InvalidRegion {
                            reason: v.to_string(),
                        },
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn do_clear_all(&mut self) -> EngineResult<()> {
        self.state = LifecycleState::Stopping;
        self.reconciler.remove_all()?;
        self.store.clear().map_err(EngineError::Store)?;
        self.session = None;
        self.state = LifecycleState::Stopped;
        info!("monitoring cleared");
        Ok(())
    }

    fn do_restart(&mut self) -> EngineResult<bool> {
        if self.state == LifecycleState::Running {
            debug!("restart requested while running; refused");
            return Ok(false);
        }
        self.session = None;
        std::thread::sleep(self.config.restart_settle_delay);
        self.start_sequence()?;
        Ok(true)
    }

    fn do_boot_recovery(&mut self) -> EngineResult<()> {
        info!("boot recovery: rebuilding monitoring from durable intent");
        self.session = None;
        self.state = LifecycleState::Stopped;
        self.reconciler.reset_live()?;
        if self.store.is_empty().map_err(EngineError::Store)? {
            debug!("no durable intent; staying stopped");
            return Ok(());
        }
        self.start_sequence()
    }

    fn teardown(&mut self) {
        self.session = None;
        self.state = LifecycleState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapter::{RegionMonitor, SimulatedMonitor};
    use crate::error::RegisterError;
    use crate::gateway::test_support::RecordingNotifier;
    use crate::session::test_support::ScriptedContext;
    use crate::store::MemoryStore;
    use std::sync::atomic::Ordering;

    fn spec(id: &str) -> GeofenceSpec {
        GeofenceSpec::new(id, 10.0, 20.0, 100.0).unwrap()
    }

    fn quick_config() -> EngineConfig {
        EngineConfig {
            restart_settle_delay: Duration::from_millis(10),
            renew_check_interval: Duration::from_millis(10),
            transient_backoff: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        adapter: Arc<SimulatedMonitor>,
        notifier: Arc<RecordingNotifier>,
        context: Arc<ScriptedContext>,
        controller: LifecycleController,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(SimulatedMonitor::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let context = Arc::new(ScriptedContext::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store) as Arc<dyn GeofenceStore>,
            Arc::clone(&adapter) as Arc<dyn RegionMonitor>,
            &config,
        ));
        let controller = LifecycleController::spawn(
            Arc::clone(&store) as Arc<dyn GeofenceStore>,
            reconciler,
            Arc::clone(&notifier) as Arc<dyn RegionNotifier>,
            Arc::clone(&context) as Arc<dyn ExecutionContext>,
            config,
        )
        .unwrap();
        Fixture {
            store,
            adapter,
            notifier,
            context,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(quick_config())
    }

    #[test]
    fn test_spawns_stopped() {
        let f = fixture();
        assert_eq!(f.controller.state().unwrap(), LifecycleState::Stopped);
        assert!(!f.controller.is_running("any").unwrap());
    }

    #[test]
    fn test_start_region_starts_session_and_registers() {
        let f = fixture();
        f.controller.start_region(spec("home")).unwrap();

        assert_eq!(f.controller.state().unwrap(), LifecycleState::Running);
        assert!(f.controller.is_running("home").unwrap());
        assert!(f.adapter.is_registered("home"));
        assert!(f.store.contains("home").unwrap());
        assert_eq!(f.notifier.service_started(), vec![true]);
        assert_eq!(f.context.acquisitions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let f = fixture();
        f.controller.start_region(spec("home")).unwrap();
        f.controller.start().unwrap();

        assert_eq!(f.context.acquisitions.load(Ordering::SeqCst), 1);
        // Both the initial start and the no-op re-start report running.
        assert_eq!(f.notifier.service_started(), vec![true, true]);
    }

    #[test]
    fn test_context_refusal_leaves_stopped() {
        let f = fixture();
        f.context.refuse_acquire.store(true, Ordering::SeqCst);

        let err = f.controller.start_region(spec("home")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Lifecycle(LifecycleError::ContextAcquisition { .. })
        ));
        assert_eq!(f.controller.state().unwrap(), LifecycleState::Stopped);
        assert!(!f.adapter.is_registered("home"));
    }

    #[test]
    fn test_stop_last_region_releases_session() {
        let f = fixture();
        f.controller.start_region(spec("home")).unwrap();
        f.controller.stop_region("home").unwrap();

        assert_eq!(f.controller.state().unwrap(), LifecycleState::Stopped);
        assert!(!f.adapter.is_registered("home"));
        assert_eq!(f.notifier.stops(), vec!["home"]);
        assert_eq!(f.context.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_one_of_two_keeps_running() {
        let f = fixture();
        f.controller.start_region(spec("a")).unwrap();
        f.controller.start_region(spec("b")).unwrap();
        f.controller.stop_region("a").unwrap();

        assert_eq!(f.controller.state().unwrap(), LifecycleState::Running);
        assert!(f.controller.is_running("b").unwrap());
        assert!(!f.controller.is_running("a").unwrap());
    }

    #[test]
    fn test_stop_unknown_id_succeeds_and_notifies() {
        let f = fixture();
        f.controller.start_region(spec("home")).unwrap();
        f.controller.stop_region("ghost").unwrap();
        assert_eq!(f.notifier.stops(), vec!["ghost"]);
        assert_eq!(f.controller.state().unwrap(), LifecycleState::Running);
    }

    #[test]
    fn test_replace_all_is_atomic_to_observers() {
        let f = fixture();
        f.controller.start_region(spec("old-1")).unwrap();
        f.controller.start_region(spec("old-2")).unwrap();

        f.controller
            .replace_all(vec![spec("new-1"), spec("new-2"), spec("new-3")])
            .unwrap();

        let ids: Vec<String> = f
            .store
            .list_all()
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new-1", "new-2", "new-3"]);
        assert_eq!(f.adapter.live_ids(), vec!["new-1", "new-2", "new-3"]);
        assert!(!f.controller.is_running("old-1").unwrap());
        assert!(f.controller.is_running("new-2").unwrap());
    }

    #[test]
    fn test_replace_all_with_empty_set_stops() {
        let f = fixture();
        f.controller.start_region(spec("home")).unwrap();
        f.controller.replace_all(Vec::new()).unwrap();

        assert_eq!(f.controller.state().unwrap(), LifecycleState::Stopped);
        assert!(f.store.is_empty().unwrap());
        assert!(f.adapter.live_ids().is_empty());
    }

    #[test]
    fn test_replace_all_surfaces_per_region_failures() {
        let f = fixture();
        f.adapter.script_failure("bad", RegisterError::PermissionDenied);

        f.controller
            .replace_all(vec![spec("good"), spec("bad")])
            .unwrap();

        assert!(f.adapter.is_registered("good"));
        assert_eq!(f.notifier.failures(), vec![("bad".to_string(), "PERMISSION_DENIED".to_string())]);
    }

    #[test]
    fn test_clear_all_stops_everything() {
        let f = fixture();
        f.controller.start_region(spec("a")).unwrap();
        f.controller.start_region(spec("b")).unwrap();
        f.controller.clear_all().unwrap();

        assert_eq!(f.controller.state().unwrap(), LifecycleState::Stopped);
        assert!(f.store.is_empty().unwrap());
        assert!(f.adapter.live_ids().is_empty());
        assert_eq!(f.context.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_refused_while_running() {
        let f = fixture();
        f.controller.start_region(spec("home")).unwrap();
        assert!(!f.controller.restart().unwrap());
        assert_eq!(f.context.acquisitions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_while_stopped_starts() {
        let f = fixture();
        f.store.upsert(spec("home")).unwrap();

        assert!(f.controller.restart().unwrap());
        assert_eq!(f.controller.state().unwrap(), LifecycleState::Running);
        assert!(f.adapter.is_registered("home"));
    }

    #[test]
    fn test_boot_recovery_rebuilds_from_store() {
        let f = fixture();
        f.store.upsert(spec("a")).unwrap();
        f.store.upsert(spec("b")).unwrap();

        f.controller.recover_on_boot().unwrap();
        assert_eq!(f.controller.state().unwrap(), LifecycleState::Running);
        assert_eq!(f.adapter.live_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_boot_recovery_with_empty_store_stays_stopped() {
        let f = fixture();
        f.controller.recover_on_boot().unwrap();
        assert_eq!(f.controller.state().unwrap(), LifecycleState::Stopped);
        assert_eq!(f.context.acquisitions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_surfaces_reconcile_failures_via_notifier() {
        let f = fixture();
        f.store.upsert(spec("denied")).unwrap();
        f.adapter
            .script_failure("denied", RegisterError::PermissionDenied);

        f.controller.start().unwrap();
        assert_eq!(f.controller.state().unwrap(), LifecycleState::Running);
        assert_eq!(
            f.notifier.failures(),
            vec![("denied".to_string(), "PERMISSION_DENIED".to_string())]
        );
    }

    #[test]
    fn test_grant_renewed_on_timer() {
        let config = EngineConfig {
            // Renewal due almost immediately; tick every 10 ms.
            grant_duration: Duration::from_millis(20),
            ..quick_config()
        };
        let f = fixture_with(config);
        f.controller.start_region(spec("home")).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        assert!(f.context.renewals.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_drop_releases_session() {
        let f = fixture();
        f.controller.start_region(spec("home")).unwrap();
        let context = Arc::clone(&f.context);
        drop(f);
        assert_eq!(context.releases.load(Ordering::SeqCst), 1);
    }
}
