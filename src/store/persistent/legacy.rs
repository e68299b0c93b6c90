//! Read-compatibility import for legacy intent stores.
//!
//! Two encodings exist in the wild and both must be readable when
//! migrating an existing installation:
//!
//! - entry-set lines: `id:lat,lon,radius`
//! - flat-mapping lines: `id=lat,lon,radius`
//!
//! Unparseable lines and fields are skipped rather than failing the whole
//! import; a legacy store was written without checksums and partial
//! recovery beats none.

use std::path::Path;

use tracing::{info, warn};

use crate::region::GeofenceSpec;
use crate::store::traits::{GeofenceStore, StoreError};

/// Parse one legacy line in either encoding.
///
/// Returns `None` for blank lines, malformed lines, and specs that fail
/// validation.
#[must_use]
pub fn parse_legacy_line(line: &str) -> Option<GeofenceSpec> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (id, params) = line
        .split_once(':')
        .or_else(|| line.split_once('='))?;

    let mut parts = params.split(',');
    let latitude: f64 = parts.next()?.trim().parse().ok()?;
    let longitude: f64 = parts.next()?.trim().parse().ok()?;
    let radius: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    GeofenceSpec::new(id.trim(), latitude, longitude, radius).ok()
}

/// Import a legacy store file into `store`, returning the number of
/// specs imported.
///
/// # Errors
/// Fails only if the file cannot be read or a store write fails; bad
/// lines are skipped with a warning.
pub fn import_legacy_file(
    path: impl AsRef<Path>,
    store: &dyn GeofenceStore,
) -> Result<usize, StoreError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
        message: format!("cannot read legacy store {}: {e}", path.display()),
    })?;

    let mut imported = 0usize;
    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_legacy_line(line) {
            Some(spec) => {
                store.upsert(spec)?;
                imported += 1;
            }
            None => {
                warn!(line = lineno + 1, "skipping unparseable legacy entry");
            }
        }
    }

    info!(path = %path.display(), imported, "legacy store imported");
    Ok(imported)
}
