//! Geofence region model.
//!
//! A [`GeofenceSpec`] is the immutable description of one circular region
//! the application wants watched. The `id` is caller-assigned, unique, and
//! stable across reboots; it is never derived from coordinates (two
//! distinct logical regions may share a location).

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A boundary crossing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// The device moved into the region.
    Enter,
    /// The device moved out of the region.
    Exit,
}

/// The set of transitions a region is watched for.
///
/// Empty sets are rejected at validation; the default watches both
/// directions, matching the platform registration the engine performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSet {
    enter: bool,
    exit: bool,
}

impl TransitionSet {
    /// Watch both enter and exit.
    #[must_use]
    pub const fn both() -> Self {
        Self {
            enter: true,
            exit: true,
        }
    }

    /// Watch only the given transition.
    #[must_use]
    pub const fn only(transition: Transition) -> Self {
        match transition {
            Transition::Enter => Self {
                enter: true,
                exit: false,
            },
            Transition::Exit => Self {
                enter: false,
                exit: true,
            },
        }
    }

    /// Returns true if the set watches the given transition.
    #[must_use]
    pub const fn watches(&self, transition: Transition) -> bool {
        match transition {
            Transition::Enter => self.enter,
            Transition::Exit => self.exit,
        }
    }

    /// Returns true if no transition is watched.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.enter && !self.exit
    }
}

impl Default for TransitionSet {
    fn default() -> Self {
        Self::both()
    }
}

/// An immutable circular geofence definition.
///
/// Replacing the spec for an existing id is delete-then-insert in the
/// store; the spec itself never mutates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceSpec {
    /// Caller-assigned unique id, stable across reboots.
    pub id: String,
    /// Center latitude in decimal degrees.
    pub latitude: f64,
    /// Center longitude in decimal degrees.
    pub longitude: f64,
    /// Radius in meters, strictly positive.
    pub radius_meters: f64,
    /// Which transitions to watch.
    #[serde(default)]
    pub watched: TransitionSet,
}

impl GeofenceSpec {
    /// Build a spec watching both transitions.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for an empty id, out-of-range
    /// coordinates, or a non-positive/non-finite radius.
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
    ) -> Result<Self, ValidationError> {
        Self {
            id: id.into(),
            latitude,
            longitude,
            radius_meters,
            watched: TransitionSet::both(),
        }
        .validated()
    }

    /// Validate this spec, returning it unchanged on success.
    ///
    /// # Errors
    /// See [`GeofenceSpec::new`].
    pub fn validated(self) -> Result<Self, ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyRegionId);
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(ValidationError::RadiusOutOfRange {
                radius: self.radius_meters,
            });
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange {
                latitude: self.latitude,
            });
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange {
                longitude: self.longitude,
            });
        }
        if self.watched.is_empty() {
            return Err(ValidationError::NoWatchedTransitions);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_spec() {
        let spec = GeofenceSpec::new("home", 52.52, 13.405, 100.0).unwrap();
        assert_eq!(spec.id, "home");
        assert!(spec.watched.watches(Transition::Enter));
        assert!(spec.watched.watches(Transition::Exit));
    }

    #[test]
    fn test_rejects_empty_id() {
        let err = GeofenceSpec::new("  ", 0.0, 0.0, 100.0).unwrap_err();
        assert_eq!(err, ValidationError::EmptyRegionId);
    }

    #[test]
    fn test_rejects_bad_radius() {
        assert!(matches!(
            GeofenceSpec::new("r", 0.0, 0.0, 0.0).unwrap_err(),
            ValidationError::RadiusOutOfRange { .. }
        ));
        assert!(matches!(
            GeofenceSpec::new("r", 0.0, 0.0, f64::NAN).unwrap_err(),
            ValidationError::RadiusOutOfRange { .. }
        ));
        assert!(matches!(
            GeofenceSpec::new("r", 0.0, 0.0, -10.0).unwrap_err(),
            ValidationError::RadiusOutOfRange { .. }
        ));
    }

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        assert!(matches!(
            GeofenceSpec::new("r", 91.0, 0.0, 10.0).unwrap_err(),
            ValidationError::LatitudeOutOfRange { .. }
        ));
        assert!(matches!(
            GeofenceSpec::new("r", 0.0, -180.5, 10.0).unwrap_err(),
            ValidationError::LongitudeOutOfRange { .. }
        ));
    }

    #[test]
    fn test_rejects_empty_transition_set() {
        let mut spec = GeofenceSpec::new("r", 0.0, 0.0, 10.0).unwrap();
        spec.watched = TransitionSet {
            enter: false,
            exit: false,
        };
        assert_eq!(
            spec.validated().unwrap_err(),
            ValidationError::NoWatchedTransitions
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let spec = GeofenceSpec::new("office", -33.86, 151.21, 250.0).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: GeofenceSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_transition_set_only() {
        let enter_only = TransitionSet::only(Transition::Enter);
        assert!(enter_only.watches(Transition::Enter));
        assert!(!enter_only.watches(Transition::Exit));
    }
}
