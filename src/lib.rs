//! # regionwatch - Geofence Lifecycle & Reconciliation Engine
//!
//! regionwatch keeps a durable set of geofence monitoring intents in sync
//! with a platform's live region registrations, and routes raw boundary
//! crossings to the application exactly once.
//!
//! ## Core Concepts
//!
//! - **GeofenceSpec**: An immutable circular region the application wants watched
//! - **GeofenceStore**: The durable intent set, the single source of truth
//! - **Reconciler**: Converges live platform registrations to the intent set
//! - **EventRouter**: Dedupes and filters raw transition events before notification
//! - **LifecycleController**: The start/stop state machine holding the execution session
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use regionwatch::{
//!     BridgeGateway, EngineConfig, GeofenceSpec, LifecycleController,
//!     Reconciler, SimulatedMonitor, store::MemoryStore,
//! };
//! use regionwatch::session::ProcessContext;
//!
//! let store = Arc::new(MemoryStore::new());
//! let adapter = Arc::new(SimulatedMonitor::new());
//! let config = EngineConfig::default();
//! let reconciler = Arc::new(Reconciler::new(store.clone(), adapter, &config));
//!
//! let controller = LifecycleController::spawn(
//!     store, reconciler, notifier, Arc::new(ProcessContext), config,
//! )?;
//! controller.start_region(GeofenceSpec::new("home", 52.52, 13.405, 100.0)?)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod error;
pub mod event;
pub mod region;

// Storage and the platform boundary
pub mod adapter;
pub mod store;

// Engine components
pub mod gateway;
pub mod lifecycle;
pub mod reconcile;
pub mod router;
pub mod session;

// Re-export primary types at crate root for convenience
pub use adapter::{AdapterResult, Completion, CompletionWait, RegionMonitor, SimulatedMonitor};
pub use config::EngineConfig;
pub use error::{
    EngineError, EngineResult, LifecycleError, RegisterError, ValidationError,
};
pub use event::{TransitionCode, TransitionEvent};
pub use gateway::{
    BridgeChannel, BridgeGateway, ChannelNotifier, PermissionDelegate, PermissionStatus,
    RegionNotifier, StaticPermissionDelegate,
};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use reconcile::{ReconcileReport, Reconciler};
pub use region::{GeofenceSpec, Transition, TransitionSet};
pub use router::{DedupeWindow, EventRouter, RouteOutcome};
pub use session::{ContextGrant, ExecutionContext, ExecutionSession, ProcessContext};
pub use store::persistent::{JournalConfig, JournalStore};
pub use store::{GeofenceStore, MemoryStore, StoreError};
