//! Stowage Capacity - Usage Monitoring and Retention
//!
//! [`CapacityManager`] watches both backends against their configured
//! limits and keeps stored data within per data-type retention policies:
//!
//! - usage measurement (exact for sync, estimated for async)
//! - `capacity:warning` / `capacity:critical` alerts after writes
//! - scheduled age and count based cleanup
//! - advisory optimization suggestions

pub mod cleanup;
pub mod manager;
pub mod suggestions;
pub mod usage;

pub use cleanup::{record_time, CleanupReport, CleanupStats, TypeCleanup};
pub use manager::{CapacityManager, CapacityReport};
pub use suggestions::{Priority, Suggestion, SuggestionKind};
