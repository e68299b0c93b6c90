//! Durable journal-backed intent store.
//!
//! This backend provides:
//! - Append-only journaling with write-then-acknowledge durability
//! - CRC32 checksums for corruption detection
//! - File locking for single-process access
//! - Snapshot-rewrite compaction once the journal outgrows a threshold
//! - Read-compatible import of the legacy plain-text encodings

mod codec;
mod file_lock;
mod journal;
mod legacy;

pub use file_lock::FileLock;
pub use journal::{JournalConfig, JournalEntry, JournalEntryKind, JournalStore};
pub use legacy::{import_legacy_file, parse_legacy_line};

use std::path::Path;

use crate::store::traits::StoreError;

/// Open or create a durable intent store in `dir`.
///
/// # Errors
/// - If the directory cannot be created or accessed
/// - If another process holds the lock
/// - If the journal header is unreadable
pub fn open_store(
    dir: impl AsRef<Path>,
    config: Option<JournalConfig>,
) -> Result<JournalStore, StoreError> {
    JournalStore::open(dir, config.unwrap_or_default())
}
