//! Recovery across simulated process death.
//!
//! Monitoring must come back from the durable store alone: a rebooted
//! device loses every live platform registration, so the engine rebuilds
//! exactly the persisted intent set with no application involvement.

use std::sync::Arc;

use regionwatch::session::ProcessContext;
use regionwatch::store::persistent::{JournalConfig, JournalStore};
use regionwatch::{
    EngineConfig, GeofenceSpec, GeofenceStore, LifecycleController, LifecycleState,
    Reconciler, RegionMonitor, RegionNotifier, RegisterError, SimulatedMonitor,
};

#[derive(Debug, Default)]
struct NullNotifier;

impl RegionNotifier for NullNotifier {
    fn on_enter_region(&self, _region_id: &str) {}
    fn on_exit_region(&self, _region_id: &str) {}
    fn on_monitoring_failed(&self, _region_id: &str, _error: &RegisterError) {}
    fn on_monitoring_stopped(&self, _region_id: &str) {}
    fn on_unexpected_action(&self, _raw: u32) {}
    fn on_service_started(&self, _is_running: bool) {}
}

fn spec(id: &str) -> GeofenceSpec {
    GeofenceSpec::new(id, 48.85, 2.35, 120.0).unwrap()
}

fn quick_config() -> EngineConfig {
    EngineConfig {
        restart_settle_delay: std::time::Duration::from_millis(10),
        transient_backoff: std::time::Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

fn spawn(
    store: Arc<JournalStore>,
    adapter: Arc<SimulatedMonitor>,
) -> LifecycleController {
    let config = quick_config();
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&store) as Arc<dyn GeofenceStore>,
        adapter as Arc<dyn RegionMonitor>,
        &config,
    ));
    LifecycleController::spawn(
        store,
        reconciler,
        Arc::new(NullNotifier::default()),
        Arc::new(ProcessContext),
        config,
    )
    .unwrap()
}

#[test]
fn monitoring_survives_process_death() {
    let dir = tempfile::tempdir().unwrap();

    // First life: build up intent, then die without teardown.
    {
        let store = Arc::new(JournalStore::open(dir.path(), JournalConfig::default()).unwrap());
        let adapter = Arc::new(SimulatedMonitor::new());
        let controller = spawn(Arc::clone(&store), Arc::clone(&adapter));

        controller.start_region(spec("home")).unwrap();
        controller.start_region(spec("office")).unwrap();
        controller.start_region(spec("gym")).unwrap();
        controller.stop_region("office").unwrap();

        assert_eq!(adapter.live_ids(), vec!["home", "gym"]);
        // Process dies here: controller and store drop, the platform
        // forgets every registration.
    }

    // Second life: a fresh adapter with nothing registered.
    let store = Arc::new(JournalStore::open(dir.path(), JournalConfig::default()).unwrap());
    let adapter = Arc::new(SimulatedMonitor::new());
    assert!(adapter.live_ids().is_empty());

    let controller = spawn(Arc::clone(&store), Arc::clone(&adapter));
    controller.recover_on_boot().unwrap();

    assert_eq!(controller.state().unwrap(), LifecycleState::Running);
    assert_eq!(adapter.live_ids(), vec!["home", "gym"]);
    assert!(controller.is_running("home").unwrap());
    assert!(!controller.is_running("office").unwrap());
}

#[test]
fn recovery_with_empty_store_stays_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JournalStore::open(dir.path(), JournalConfig::default()).unwrap());
    let adapter = Arc::new(SimulatedMonitor::new());
    let controller = spawn(store, Arc::clone(&adapter));

    controller.recover_on_boot().unwrap();
    assert_eq!(controller.state().unwrap(), LifecycleState::Stopped);
    assert!(adapter.live_ids().is_empty());
}

#[test]
fn recovery_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JournalStore::open(dir.path(), JournalConfig::default()).unwrap());
    let adapter = Arc::new(SimulatedMonitor::new());
    let controller = spawn(Arc::clone(&store), Arc::clone(&adapter));

    controller.start_region(spec("home")).unwrap();
    controller.recover_on_boot().unwrap();
    controller.recover_on_boot().unwrap();

    assert_eq!(adapter.live_ids(), vec!["home"]);
    assert_eq!(controller.state().unwrap(), LifecycleState::Running);
}

#[test]
fn replacement_set_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Arc::new(JournalStore::open(dir.path(), JournalConfig::default()).unwrap());
        let adapter = Arc::new(SimulatedMonitor::new());
        let controller = spawn(Arc::clone(&store), adapter);
        controller.start_region(spec("old")).unwrap();
        controller
            .replace_all(vec![spec("a"), spec("b")])
            .unwrap();
    }

    let store = regionwatch::store::persistent::open_store(dir.path(), None).unwrap();
    let ids: Vec<String> = store.list_all().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["a", "b"]);
}
