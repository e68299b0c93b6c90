//! Application bridge surface.
//!
//! The engine talks to its host application over a message-channel
//! abstraction: named methods with JSON arguments in both directions,
//! fire-and-forget, no acknowledgement and no back-pressure. This module
//! owns both directions — the [`RegionNotifier`] events the engine emits
//! and the [`BridgeGateway`] command dispatch it accepts.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{EngineError, EngineResult, RegisterError, ValidationError};
use crate::lifecycle::LifecycleController;
use crate::region::{GeofenceSpec, TransitionSet};

/// Default registration radius when the caller omits one, in meters.
pub const DEFAULT_RADIUS_METERS: f64 = 100.0;

/// Region id used for failures with no natural region association.
pub const UNKNOWN_REGION_ID: &str = "unknown";

/// Outbound message channel to the application.
///
/// Fire-and-forget: implementations must not block the caller and have
/// no way to signal delivery.
pub trait BridgeChannel: Send + Sync {
    /// Deliver one named event with JSON arguments.
    fn invoke(&self, method: &str, args: Value);
}

/// Engine-to-application notification surface.
///
/// Implementations must be cheap and non-blocking; these are called from
/// the router and the lifecycle worker.
pub trait RegionNotifier: Send + Sync {
    /// The device entered a monitored region.
    fn on_enter_region(&self, region_id: &str);
    /// The device left a monitored region.
    fn on_exit_region(&self, region_id: &str);
    /// A registration failed; `error` carries the stable bridge code.
    fn on_monitoring_failed(&self, region_id: &str, error: &RegisterError);
    /// Monitoring stopped for a region.
    fn on_monitoring_stopped(&self, region_id: &str);
    /// The adapter delivered an unrecognized transition code.
    fn on_unexpected_action(&self, raw: u32);
    /// The monitoring service started (or confirmed it is running).
    fn on_service_started(&self, is_running: bool);
}

/// [`RegionNotifier`] that emits bridge events over a [`BridgeChannel`].
pub struct ChannelNotifier {
    channel: Arc<dyn BridgeChannel>,
}

impl ChannelNotifier {
    /// Wrap a bridge channel.
    #[must_use]
    pub fn new(channel: Arc<dyn BridgeChannel>) -> Self {
        Self { channel }
    }
}

impl RegionNotifier for ChannelNotifier {
    fn on_enter_region(&self, region_id: &str) {
        self.channel.invoke("onEnterRegion", json!({ "regionId": region_id }));
    }

    fn on_exit_region(&self, region_id: &str) {
        self.channel.invoke("onExitRegion", json!({ "regionId": region_id }));
    }

    fn on_monitoring_failed(&self, region_id: &str, error: &RegisterError) {
        self.channel.invoke(
            "onMonitoringFailed",
            json!({ "regionId": region_id, "error": error.bridge_code() }),
        );
    }

    fn on_monitoring_stopped(&self, region_id: &str) {
        self.channel
            .invoke("onMonitoringStopped", json!({ "regionId": region_id }));
    }

    fn on_unexpected_action(&self, raw: u32) {
        self.channel.invoke("onUnexpectedAction", json!({ "raw": raw }));
    }

    fn on_service_started(&self, is_running: bool) {
        self.channel
            .invoke("onServiceStarted", json!({ "isRunning": is_running }));
    }
}

impl std::fmt::Debug for ChannelNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelNotifier").finish_non_exhaustive()
    }
}

/// Location permission state, with the stable bridge status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// The user has not been asked yet.
    NotDetermined,
    /// Granted while the app is in use.
    AuthorizedWhenInUse,
    /// Explicitly denied.
    Denied,
    /// Granted including background use.
    AuthorizedAlways,
}

impl PermissionStatus {
    /// The numeric code surfaced over the bridge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::NotDetermined => 0,
            Self::AuthorizedWhenInUse => 1,
            Self::Denied => 2,
            Self::AuthorizedAlways => 3,
        }
    }
}

/// Host-supplied permission handling.
///
/// The prompt flow itself belongs to the platform layer; the engine only
/// relays status codes.
pub trait PermissionDelegate: Send + Sync {
    /// Ask the platform for location permission, returning the resulting
    /// status.
    fn request(&self) -> PermissionStatus;

    /// The current status without prompting.
    fn status(&self) -> PermissionStatus;
}

/// [`PermissionDelegate`] that always reports one fixed status.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissionDelegate {
    status: PermissionStatus,
}

impl StaticPermissionDelegate {
    /// Delegate pinned to `status`.
    #[must_use]
    pub const fn new(status: PermissionStatus) -> Self {
        Self { status }
    }
}

impl PermissionDelegate for StaticPermissionDelegate {
    fn request(&self) -> PermissionStatus {
        self.status
    }

    fn status(&self) -> PermissionStatus {
        self.status
    }
}

/// Application-to-engine command dispatch.
pub struct BridgeGateway {
    controller: Arc<LifecycleController>,
    permissions: Arc<dyn PermissionDelegate>,
}

impl BridgeGateway {
    /// Build the gateway over a running controller.
    #[must_use]
    pub fn new(
        controller: Arc<LifecycleController>,
        permissions: Arc<dyn PermissionDelegate>,
    ) -> Self {
        Self {
            controller,
            permissions,
        }
    }

    /// Dispatch one bridge command.
    ///
    /// # Errors
    /// - `NotImplemented` for unknown methods
    /// - Validation errors for missing or mistyped arguments
    /// - Whatever the underlying lifecycle operation reports
    pub fn handle(&self, method: &str, args: &Value) -> EngineResult<Value> {
        debug!(method, "bridge command");
        match method {
            "startGeofencing" => {
                let spec = parse_spec(args)?;
                let id = spec.id.clone();
                self.controller.start_region(spec)?;
                Ok(json!(id))
            }
            "stopGeofencing" => {
                let id = require_str(args, "geofenceId")?;
                self.controller.stop_region(&id)?;
                Ok(json!(format!("Geofence monitoring stopped for {id}")))
            }
            "updateGeofences" => {
                let entries = args
                    .get("geofences")
                    .and_then(Value::as_array)
                    .ok_or_else(|| missing("geofences"))?;
                // Structural parse only: range validation happens per-id
                // in the worker, where one bad spec is surfaced through
                // `onMonitoringFailed` without aborting the batch.
                let specs = entries
                    .iter()
                    .map(parse_spec_fields)
                    .collect::<EngineResult<Vec<_>>>()?;
                self.controller.replace_all(specs)?;
                Ok(json!(true))
            }
            "clearAllGeofences" => {
                self.controller.clear_all()?;
                Ok(json!(true))
            }
            "isServiceRunning" => {
                let id = require_str(args, "geofenceId")?;
                Ok(json!(self.controller.is_running(&id)?))
            }
            "restartService" => {
                // The caller may pass a region along with the restart;
                // it is registered once the service is back up. A
                // restart refused because the service is already
                // running registers nothing.
                let spec = if args.get("geofenceId").is_some() {
                    Some(parse_spec(args)?)
                } else {
                    None
                };
                let restarted = self.controller.restart()?;
                if restarted {
                    if let Some(spec) = spec {
                        self.controller.start_region(spec)?;
                    }
                }
                Ok(json!(restarted))
            }
            "requestLocationPermission" => Ok(json!(self.permissions.request().code())),
            "checkLocationPermissionStatus" => Ok(json!(self.permissions.status().code())),
            other => Err(EngineError::NotImplemented {
                method: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for BridgeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeGateway").finish_non_exhaustive()
    }
}

fn missing(field: &str) -> EngineError {
    EngineError::Validation(ValidationError::MissingArgument {
        field: field.to_string(),
    })
}

fn require_str(args: &Value, field: &str) -> EngineResult<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(field))
}

fn require_f64(args: &Value, field: &str) -> EngineResult<f64> {
    args.get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| missing(field))
}

/// Extract the spec fields without range validation: the arguments must
/// be present and correctly typed, nothing more.
fn parse_spec_fields(args: &Value) -> EngineResult<GeofenceSpec> {
    let id = require_str(args, "geofenceId")?;
    let latitude = require_f64(args, "latitude")?;
    let longitude = require_f64(args, "longitude")?;
    let radius = args
        .get("radius")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_RADIUS_METERS);
    Ok(GeofenceSpec {
        id,
        latitude,
        longitude,
        radius_meters: radius,
        watched: TransitionSet::default(),
    })
}

fn parse_spec(args: &Value) -> EngineResult<GeofenceSpec> {
    parse_spec_fields(args)?
        .validated()
        .map_err(EngineError::Validation)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::{RegionNotifier, RegisterError};

    /// Notifier that records every callback for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        enters: Mutex<Vec<String>>,
        exits: Mutex<Vec<String>>,
        failures: Mutex<Vec<(String, String)>>,
        stops: Mutex<Vec<String>>,
        unexpected: Mutex<Vec<u32>>,
        service_started: Mutex<Vec<bool>>,
    }

    impl RecordingNotifier {
        pub fn enters(&self) -> Vec<String> {
            self.enters.lock().unwrap().clone()
        }

        pub fn exits(&self) -> Vec<String> {
            self.exits.lock().unwrap().clone()
        }

        pub fn failures(&self) -> Vec<(String, String)> {
            self.failures.lock().unwrap().clone()
        }

        pub fn stops(&self) -> Vec<String> {
            self.stops.lock().unwrap().clone()
        }

        pub fn unexpected(&self) -> Vec<u32> {
            self.unexpected.lock().unwrap().clone()
        }

        pub fn service_started(&self) -> Vec<bool> {
            self.service_started.lock().unwrap().clone()
        }
    }

    impl RegionNotifier for RecordingNotifier {
        fn on_enter_region(&self, region_id: &str) {
            self.enters.lock().unwrap().push(region_id.to_string());
        }

        fn on_exit_region(&self, region_id: &str) {
            self.exits.lock().unwrap().push(region_id.to_string());
        }

        fn on_monitoring_failed(&self, region_id: &str, error: &RegisterError) {
            self.failures
                .lock()
                .unwrap()
                .push((region_id.to_string(), error.bridge_code()));
        }

        fn on_monitoring_stopped(&self, region_id: &str) {
            self.stops.lock().unwrap().push(region_id.to_string());
        }

        fn on_unexpected_action(&self, raw: u32) {
            self.unexpected.lock().unwrap().push(raw);
        }

        fn on_service_started(&self, is_running: bool) {
            self.service_started.lock().unwrap().push(is_running);
        }
    }
}
