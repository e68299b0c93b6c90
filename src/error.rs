//! Error types for regionwatch.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific failure conditions and keeps the recoverable /
//! caller-error / fatal distinctions explicit at the type level.

use thiserror::Error;

use crate::store::StoreError;

/// Validation errors that occur before any state is touched.
///
/// A validation failure is never persisted: the intent set is only ever
/// mutated with specs that passed validation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    /// The region id is empty or whitespace.
    #[error("Region id cannot be empty")]
    EmptyRegionId,

    /// The radius is non-positive or non-finite.
    #[error("Radius {radius} is out of range (must be finite and > 0)")]
    RadiusOutOfRange {
        /// The rejected radius, in meters.
        radius: f64,
    },

    /// The latitude is outside [-90, 90] or non-finite.
    #[error("Latitude {latitude} is out of range [-90, 90]")]
    LatitudeOutOfRange {
        /// The rejected latitude, in decimal degrees.
        latitude: f64,
    },

    /// The longitude is outside [-180, 180] or non-finite.
    #[error("Longitude {longitude} is out of range [-180, 180]")]
    LongitudeOutOfRange {
        /// The rejected longitude, in decimal degrees.
        longitude: f64,
    },

    /// The spec watches no transitions at all.
    #[error("At least one watched transition is required")]
    NoWatchedTransitions,

    /// A bridge command argument is absent or mistyped.
    #[error("Required argument '{field}' is missing or has the wrong type")]
    MissingArgument {
        /// The argument name.
        field: String,
    },
}

/// Registration failures reported by the platform monitoring adapter.
///
/// These are per-region: one region's failure never aborts a batch
/// operation over the remaining regions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegisterError {
    /// Location permission revoked or never granted. Recoverable by the
    /// user; never retried automatically.
    #[error("location permission denied")]
    PermissionDenied,

    /// The platform's registration limit was hit. The caller must remove
    /// a region before adding another.
    #[error("adapter region capacity exceeded")]
    CapacityExceeded,

    /// The adapter rejected the region itself (bad radius/coordinates).
    #[error("invalid region: {reason}")]
    InvalidRegion {
        /// The adapter's rejection reason.
        reason: String,
    },

    /// A transient adapter fault (service briefly unavailable). Retried
    /// with bounded backoff within a reconciliation pass.
    #[error("transient adapter failure: {message}")]
    Transient {
        /// The adapter's failure description.
        message: String,
    },

    /// Any other adapter-reported error.
    #[error("adapter error: {message}")]
    Adapter {
        /// The adapter's failure description.
        message: String,
    },
}

impl RegisterError {
    /// The stable error code surfaced to the application through
    /// `onMonitoringFailed`.
    #[must_use]
    pub fn bridge_code(&self) -> String {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED".to_string(),
            Self::CapacityExceeded => "CAPACITY_EXCEEDED".to_string(),
            Self::InvalidRegion { .. } => "INVALID_REGION".to_string(),
            Self::Transient { message } | Self::Adapter { message } => {
                format!("ADAPTER_ERROR({message})")
            }
        }
    }

    /// Returns true if a retry within the same reconciliation pass may
    /// succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Lifecycle controller failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LifecycleError {
    /// The background execution context could not be acquired. Fatal to
    /// the current start attempt; the controller stays stopped.
    #[error("execution context acquisition failed: {message}")]
    ContextAcquisition {
        /// The platform's refusal reason.
        message: String,
    },

    /// The controller worker is gone (channel closed).
    #[error("lifecycle worker disconnected: {path}")]
    Disconnected {
        /// Which channel was found closed.
        path: String,
    },

    /// A command did not complete within its deadline.
    #[error("lifecycle command timed out after {duration_ms}ms")]
    Timeout {
        /// The elapsed deadline, in milliseconds.
        duration_ms: u64,
    },
}

/// Top-level error type for regionwatch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A spec or argument failed validation before any state changed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The platform adapter rejected a registration.
    #[error("Registration error: {0}")]
    Register(#[from] RegisterError),

    /// The intent store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The lifecycle controller failed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// An unknown bridge method was invoked.
    #[error("Method not implemented: {method}")]
    NotImplemented {
        /// The unrecognized method name.
        method: String,
    },

    /// An invariant breach inside the engine.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error may clear up on a later boot or
    /// explicit restart without caller intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::NotImplemented { .. } | Self::Internal { .. } => false,
            Self::Register(e) => e.is_transient(),
            Self::Store(e) => e.is_retryable(),
            Self::Lifecycle(e) => matches!(
                e,
                LifecycleError::ContextAcquisition { .. } | LifecycleError::Timeout { .. }
            ),
        }
    }
}

/// Result type alias for regionwatch operations.
pub type EngineResult<T> = Result<T, EngineError>;
