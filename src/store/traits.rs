//! Abstract store trait for the monitoring intent set.
//!
//! The intent set is the single source of truth: the platform's live
//! registration must always converge to exactly this set. By using a
//! trait, we enable:
//! - In-memory backends for testing and embedded use
//! - A durable journal backend for production

use thiserror::Error;

use crate::region::GeofenceSpec;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// I/O failure from the backing medium.
    #[error("Store I/O error: {message}")]
    Io {
        /// The underlying I/O failure.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("Store is locked: {message}")]
    Locked {
        /// The lock contention detail.
        message: String,
    },

    /// The on-disk data is damaged beyond the last valid entry.
    #[error("Store corruption: {message}")]
    Corruption {
        /// What was found damaged.
        message: String,
    },

    /// Backend error (poisoned lock, invariant breach).
    #[error("Store backend error: {message}")]
    Backend {
        /// What went wrong.
        message: String,
    },
}

impl StoreError {
    /// Returns true if a later attempt may succeed without operator
    /// intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Durable persistence of the monitoring intent set.
///
/// # Contract
/// - Every mutation is durable before the call returns
///   (write-then-acknowledge); a crash immediately after a successful
///   call never loses the mutation, and a failed write leaves the set
///   unchanged.
/// - Mutations are serialized; concurrent calls for different ids must
///   not corrupt the set, and calls for the same id resolve in
///   call-return order (last caller wins).
/// - `list_all` returns insertion order, stably. Upserting an existing
///   id is delete-then-insert: the replacement moves to the end.
/// - The set is never implicitly pruned; entries survive reboot and
///   process death until explicitly removed.
pub trait GeofenceStore: Send + Sync {
    /// Insert or replace the spec for `spec.id`.
    fn upsert(&self, spec: GeofenceSpec) -> Result<(), StoreError>;

    /// Remove the spec for `id`. Removing an absent id is a no-op
    /// success.
    fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Remove every spec.
    fn clear(&self) -> Result<(), StoreError>;

    /// All specs in insertion order.
    fn list_all(&self) -> Result<Vec<GeofenceSpec>, StoreError>;

    /// Whether `id` is currently a member of the intent set.
    fn contains(&self, id: &str) -> Result<bool, StoreError>;

    /// The spec for `id`, if present.
    fn get(&self, id: &str) -> Result<Option<GeofenceSpec>, StoreError> {
        Ok(self.list_all()?.into_iter().find(|s| s.id == id))
    }

    /// Number of specs in the set.
    fn len(&self) -> Result<usize, StoreError>;

    /// Whether the set is empty.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_store_object_safe(_: &dyn GeofenceStore) {}

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Io {
            message: "disk full".to_string(),
        };
        assert!(err.to_string().contains("disk full"));
        assert!(err.is_retryable());

        let err = StoreError::Corruption {
            message: "bad crc".to_string(),
        };
        assert!(!err.is_retryable());
    }
}
