//! Append-only intent journal.
//!
//! Durability model: every mutation is appended to the journal and synced
//! before it is applied to the in-memory set and acknowledged to the
//! caller. Replay on open rebuilds the set; a damaged tail is truncated
//! at the last valid entry so a crash mid-write never poisons recovery.
//!
//! # File format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded JournalEntry]
//! [ENTRY 2: codec-encoded JournalEntry]
//! ...
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::codec;
use super::file_lock::FileLock;
use crate::region::GeofenceSpec;
use crate::store::traits::{GeofenceStore, StoreError};

const JOURNAL_FILE: &str = "intent.journal";
const COMPACT_TMP_FILE: &str = "intent.journal.tmp";

/// Configuration for the journal store.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Whether to fsync after every append (slower but safe; default on).
    pub sync_on_write: bool,
    /// Journal size beyond which the live set is rewritten as a fresh
    /// journal.
    pub compact_threshold: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold: 4 * 1024 * 1024, // 4 MiB
        }
    }
}

impl JournalConfig {
    const MIN_COMPACT_THRESHOLD: u64 = 4 * 1024; // avoid degenerate compaction loops

    /// Validate the configuration, returning it unchanged on success.
    ///
    /// # Errors
    /// Rejects a compaction threshold small enough to loop on every write.
    pub fn validate(self) -> Result<Self, StoreError> {
        if self.compact_threshold < Self::MIN_COMPACT_THRESHOLD {
            return Err(StoreError::Backend {
                message: format!(
                    "compact_threshold must be at least {} bytes (got {})",
                    Self::MIN_COMPACT_THRESHOLD,
                    self.compact_threshold
                ),
            });
        }
        Ok(self)
    }
}

/// A single journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: JournalEntryKind,
}

/// The mutation recorded by a journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalEntryKind {
    /// Insert or replace one spec.
    Upsert(GeofenceSpec),
    /// Remove one spec by id.
    Remove {
        /// The removed region id.
        id: String,
    },
    /// Remove every spec.
    Clear,
}

#[derive(Debug, Default)]
struct IntentSet {
    ordered: Vec<GeofenceSpec>,
    index: HashMap<String, usize>,
}

impl IntentSet {
    fn apply(&mut self, kind: &JournalEntryKind) {
        match kind {
            JournalEntryKind::Upsert(spec) => {
                if let Some(pos) = self.index.remove(&spec.id) {
                    self.ordered.remove(pos);
                    self.reindex_from(pos);
                }
                self.index.insert(spec.id.clone(), self.ordered.len());
                self.ordered.push(spec.clone());
            }
            JournalEntryKind::Remove { id } => {
                if let Some(pos) = self.index.remove(id) {
                    self.ordered.remove(pos);
                    self.reindex_from(pos);
                }
            }
            JournalEntryKind::Clear => {
                self.ordered.clear();
                self.index.clear();
            }
        }
    }

    fn reindex_from(&mut self, pos: usize) {
        for (i, spec) in self.ordered.iter().enumerate().skip(pos) {
            self.index.insert(spec.id.clone(), i);
        }
    }
}

#[derive(Debug)]
struct Inner {
    writer: BufWriter<File>,
    sequence: u64,
    set: IntentSet,
}

/// Durable journal-backed [`GeofenceStore`].
///
/// Single-process: the journal directory is protected by an exclusive
/// file lock for the lifetime of the store.
#[derive(Debug)]
pub struct JournalStore {
    dir: PathBuf,
    path: PathBuf,
    cfg: JournalConfig,
    inner: Mutex<Inner>,
    _lock: FileLock,
}

fn io_err(e: &std::io::Error) -> StoreError {
    StoreError::Io {
        message: e.to_string(),
    }
}

impl JournalStore {
    /// Open or create a journal store in `dir`.
    ///
    /// # Errors
    /// - `StoreError::Locked` if another process owns the directory
    /// - `StoreError::Io` if the directory or journal cannot be accessed
    /// - `StoreError::Corruption` if the journal header is unreadable
    pub fn open(dir: impl AsRef<Path>, config: JournalConfig) -> Result<Self, StoreError> {
        let cfg = config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&e))?;

        let lock = FileLock::acquire(&dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                StoreError::Locked {
                    message: e.to_string(),
                }
            } else {
                io_err(&e)
            }
        })?;

        let path = dir.join(JOURNAL_FILE);
        if !path.exists() {
            let mut file = File::create(&path).map_err(|e| io_err(&e))?;
            codec::write_header(&mut file).map_err(|e| io_err(&e))?;
            if cfg.sync_on_write {
                file.sync_all().map_err(|e| io_err(&e))?;
            }
        }

        let (set, sequence) = Self::replay(&path)?;
        info!(
            path = %path.display(),
            regions = set.ordered.len(),
            "intent journal opened"
        );

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&e))?;

        Ok(Self {
            dir,
            path,
            cfg,
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                sequence,
                set,
            }),
            _lock: lock,
        })
    }

    /// Replay the journal into an intent set, truncating a damaged tail.
    fn replay(path: &Path) -> Result<(IntentSet, u64), StoreError> {
        let file = File::open(path).map_err(|e| io_err(&e))?;
        let file_size = file.metadata().map_err(|e| io_err(&e))?.len();
        let mut reader = BufReader::new(file);

        codec::read_header(&mut reader).map_err(|e| StoreError::Corruption {
            message: format!("bad journal header: {e}"),
        })?;

        let mut set = IntentSet::default();
        let mut sequence = 0u64;
        let mut valid_end = reader.stream_position().map_err(|e| io_err(&e))?;

        loop {
            if valid_end >= file_size {
                break;
            }
            match codec::decode::<JournalEntry>(&mut reader) {
                Ok(entry) => {
                    set.apply(&entry.kind);
                    sequence = entry.sequence;
                    valid_end = reader.stream_position().map_err(|e| io_err(&e))?;
                }
                Err(e) => {
                    // Damaged tail: recover everything before it and cut
                    // the rest off so future appends start from a clean
                    // frame boundary.
                    warn!(
                        sequence = sequence + 1,
                        error = %e,
                        "journal corruption detected; truncating tail"
                    );
                    drop(reader);
                    let file = OpenOptions::new()
                        .write(true)
                        .open(path)
                        .map_err(|e| io_err(&e))?;
                    file.set_len(valid_end).map_err(|e| io_err(&e))?;
                    file.sync_all().map_err(|e| io_err(&e))?;
                    break;
                }
            }
        }

        Ok((set, sequence))
    }

    /// Append an entry; the in-memory set is untouched if this fails.
    fn append(&self, inner: &mut Inner, kind: JournalEntryKind) -> Result<(), StoreError> {
        let entry = JournalEntry {
            sequence: inner.sequence + 1,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry).map_err(|e| io_err(&e))?;

        inner.writer.write_all(&encoded).map_err(|e| io_err(&e))?;
        inner.writer.flush().map_err(|e| io_err(&e))?;
        if self.cfg.sync_on_write {
            inner.writer.get_ref().sync_all().map_err(|e| io_err(&e))?;
        }

        inner.sequence = entry.sequence;
        inner.set.apply(&entry.kind);
        debug!(sequence = entry.sequence, "journal append");

        self.maybe_compact(inner)
    }

    /// Rewrite the live set as a fresh journal once the file outgrows the
    /// threshold. Snapshot goes to a temp file first and is renamed into
    /// place, so a crash mid-compaction leaves the old journal intact.
    fn maybe_compact(&self, inner: &mut Inner) -> Result<(), StoreError> {
        let size = inner
            .writer
            .get_ref()
            .metadata()
            .map_err(|e| io_err(&e))?
            .len();
        if size <= self.cfg.compact_threshold {
            return Ok(());
        }

        info!(bytes = size, regions = inner.set.ordered.len(), "compacting intent journal");

        let tmp_path = self.dir.join(COMPACT_TMP_FILE);
        {
            let mut tmp = File::create(&tmp_path).map_err(|e| io_err(&e))?;
            codec::write_header(&mut tmp).map_err(|e| io_err(&e))?;
            for (i, spec) in inner.set.ordered.iter().enumerate() {
                let entry = JournalEntry {
                    sequence: (i as u64) + 1,
                    timestamp: Utc::now(),
                    kind: JournalEntryKind::Upsert(spec.clone()),
                };
                let encoded = codec::encode(&entry).map_err(|e| io_err(&e))?;
                tmp.write_all(&encoded).map_err(|e| io_err(&e))?;
            }
            tmp.sync_all().map_err(|e| io_err(&e))?;
        }

        // Release the old journal handle before the rename; Windows will
        // not replace a file that is still open.
        inner.writer.flush().map_err(|e| io_err(&e))?;
        let placeholder_path = self.dir.join(".compact-placeholder");
        let placeholder = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&placeholder_path)
            .map_err(|e| io_err(&e))?;
        let _old = std::mem::replace(&mut inner.writer, BufWriter::new(placeholder));
        drop(_old);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| io_err(&e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&e))?;
        inner.writer = BufWriter::new(file);
        inner.sequence = inner.set.ordered.len() as u64;

        // The placeholder handle was dropped by the writer swap above;
        // the file itself is scratch and must not linger in the store
        // directory.
        if let Err(e) = std::fs::remove_file(&placeholder_path) {
            warn!(error = %e, "could not remove compaction placeholder");
        }

        Ok(())
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Backend {
            message: "poisoned lock: journal".to_string(),
        })
    }
}

impl GeofenceStore for JournalStore {
    fn upsert(&self, spec: GeofenceSpec) -> Result<(), StoreError> {
        let mut inner = self.lock_inner()?;
        debug!(region_id = %spec.id, "intent upsert");
        self.append(&mut inner, JournalEntryKind::Upsert(spec))
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock_inner()?;
        if !inner.set.index.contains_key(id) {
            return Ok(());
        }
        debug!(region_id = %id, "intent removed");
        self.append(&mut inner, JournalEntryKind::Remove { id: id.to_string() })
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.lock_inner()?;
        if inner.set.ordered.is_empty() {
            return Ok(());
        }
        self.append(&mut inner, JournalEntryKind::Clear)
    }

    fn list_all(&self) -> Result<Vec<GeofenceSpec>, StoreError> {
        Ok(self.lock_inner()?.set.ordered.clone())
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock_inner()?.set.index.contains_key(id))
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock_inner()?.set.ordered.len())
    }
}
