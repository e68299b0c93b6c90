//! In-memory store backend.
//!
//! Thread-safe, insertion-ordered implementation of [`GeofenceStore`].
//! Intended for embedded usage, tests, and as a reference implementation;
//! it provides the trait's serialization guarantees but no durability.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::region::GeofenceSpec;
use crate::store::traits::{GeofenceStore, StoreError};

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend {
        message: format!("poisoned lock: {context}"),
    }
}

#[derive(Debug, Default)]
struct State {
    // Insertion-ordered specs plus an id index into the vec.
    ordered: Vec<GeofenceSpec>,
    index: HashMap<String, usize>,
}

impl State {
    fn upsert(&mut self, spec: GeofenceSpec) {
        if let Some(pos) = self.index.remove(&spec.id) {
            self.ordered.remove(pos);
            self.reindex_from(pos);
        }
        self.index.insert(spec.id.clone(), self.ordered.len());
        self.ordered.push(spec);
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.index.remove(id) else {
            return false;
        };
        self.ordered.remove(pos);
        self.reindex_from(pos);
        true
    }

    fn reindex_from(&mut self, pos: usize) {
        for (i, spec) in self.ordered.iter().enumerate().skip(pos) {
            self.index.insert(spec.id.clone(), i);
        }
    }
}

/// In-memory [`GeofenceStore`] backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GeofenceStore for MemoryStore {
    fn upsert(&self, spec: GeofenceSpec) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory upsert"))?;
        debug!(region_id = %spec.id, "intent upsert");
        state.upsert(spec);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory remove"))?;
        if state.remove(id) {
            debug!(region_id = %id, "intent removed");
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory clear"))?;
        state.ordered.clear();
        state.index.clear();
        debug!("intent set cleared");
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<GeofenceSpec>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err("memory list"))?;
        Ok(state.ordered.clone())
    }

    fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err("memory contains"))?;
        Ok(state.index.contains_key(id))
    }

    fn get(&self, id: &str) -> Result<Option<GeofenceSpec>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err("memory get"))?;
        Ok(state.index.get(id).map(|&pos| state.ordered[pos].clone()))
    }

    fn len(&self) -> Result<usize, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err("memory len"))?;
        Ok(state.ordered.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> GeofenceSpec {
        GeofenceSpec::new(id, 10.0, 20.0, 100.0).unwrap()
    }

    #[test]
    fn test_upsert_and_list_preserves_insertion_order() {
        let store = MemoryStore::new();
        store.upsert(spec("a")).unwrap();
        store.upsert(spec("b")).unwrap();
        store.upsert(spec("c")).unwrap();

        let ids: Vec<String> = store.list_all().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_upsert_existing_id_moves_to_end() {
        let store = MemoryStore::new();
        store.upsert(spec("a")).unwrap();
        store.upsert(spec("b")).unwrap();

        let replacement = GeofenceSpec::new("a", 1.0, 2.0, 50.0).unwrap();
        store.upsert(replacement.clone()).unwrap();

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "b");
        assert_eq!(all[1], replacement);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let store = MemoryStore::new();
        store.upsert(spec("a")).unwrap();
        store.remove("missing").unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_remove_middle_keeps_index_consistent() {
        let store = MemoryStore::new();
        store.upsert(spec("a")).unwrap();
        store.upsert(spec("b")).unwrap();
        store.upsert(spec("c")).unwrap();

        store.remove("b").unwrap();
        assert!(!store.contains("b").unwrap());
        assert!(store.contains("c").unwrap());

        // "c" must still be addressable after the shift.
        store.remove("c").unwrap();
        let ids: Vec<String> = store.list_all().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new();
        store.upsert(spec("a")).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
        assert!(!store.contains("a").unwrap());
    }

    #[test]
    fn test_concurrent_upserts_do_not_corrupt() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    store.upsert(spec(&format!("r-{t}-{i}"))).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len().unwrap(), 8 * 50);
    }
}
