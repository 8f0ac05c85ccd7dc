//! Client-side course progress
//!
//! Progress lives in a single JSON document kept in a key/value store that
//! survives reloads. The dashboard derives which modules are unlocked from it,
//! and form modules write their state back with a debounced auto-save.

pub mod dashboard;
pub mod debounce;
pub mod form;
pub mod manager;
pub mod store;

pub use dashboard::{compute_module_states, Dashboard, ModuleState, ModuleStatus};
pub use debounce::{debounce, DebounceHandle, Debouncer};
pub use form::{FieldKind, FieldSpec, FieldValue, FormModule, ValidationIssue};
pub use manager::{DevelopmentRow, ModuleRecord, ProgressManager, SharedProgress, DATA_KEY};
pub use store::{FileStore, KeyValueStore, MemoryStore};
