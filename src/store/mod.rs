//! Storage of the monitoring intent set.

pub mod memory;
pub mod persistent;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{GeofenceStore, StoreError};
