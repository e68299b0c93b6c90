//! Raw transition events from the platform adapter.
//!
//! Events are consumed once by the event router and never persisted: if
//! the process dies before a buffered event is consumed it is dropped,
//! and redelivery is the platform's responsibility.

use serde::{Deserialize, Serialize};

use crate::region::Transition;

/// The transition code carried by a raw platform event.
///
/// `Other` preserves the raw platform value for codes this engine does
/// not recognize. Such events are surfaced through `onUnexpectedAction`
/// rather than silently swallowed: an unknown code is a signal of an
/// adapter/version contract change the application must be able to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCode {
    /// A recognized enter transition.
    Enter,
    /// A recognized exit transition.
    Exit,
    /// An unrecognized raw platform code.
    Other(u32),
}

impl TransitionCode {
    /// The recognized transition, if any.
    #[must_use]
    pub const fn transition(&self) -> Option<Transition> {
        match self {
            Self::Enter => Some(Transition::Enter),
            Self::Exit => Some(Transition::Exit),
            Self::Other(_) => None,
        }
    }
}

impl From<Transition> for TransitionCode {
    fn from(t: Transition) -> Self {
        match t {
            Transition::Enter => Self::Enter,
            Transition::Exit => Self::Exit,
        }
    }
}

/// One raw boundary-crossing event as delivered by the platform adapter.
///
/// The adapter may deliver the same logical crossing more than once
/// (redelivered broadcasts, resumed processes); the
/// `(region_id, code, source_event_id)` tuple is the dedupe key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// The id of the region that was crossed.
    pub region_id: String,
    /// The transition code reported by the platform.
    pub code: TransitionCode,
    /// Monotonic timestamp of the crossing, in milliseconds.
    pub timestamp_monotonic: u64,
    /// Opaque platform token identifying the physical delivery.
    pub source_event_id: String,
}

impl TransitionEvent {
    /// Build an event for a recognized transition.
    #[must_use]
    pub fn new(
        region_id: impl Into<String>,
        transition: Transition,
        timestamp_monotonic: u64,
        source_event_id: impl Into<String>,
    ) -> Self {
        Self {
            region_id: region_id.into(),
            code: transition.into(),
            timestamp_monotonic,
            source_event_id: source_event_id.into(),
        }
    }
}
