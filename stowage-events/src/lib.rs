//! Stowage Events - Typed Storage Event Bus
//!
//! Every mutation made through the storage manager and every capacity alert
//! is published as a [`StorageEvent`] on an [`EventBus`].
//!
//! # Architecture
//!
//! The bus wraps a bounded tokio broadcast channel:
//! - Publishing never blocks and never fails; with no subscribers the event
//!   is dropped.
//! - Each subscriber observes events in publish order.
//! - A subscriber that falls more than `capacity` events behind is told how
//!   many it missed (`RecvError::Lagged`) and continues from the oldest
//!   retained event.
//!
//! ```text
//! StorageManager ──store/remove/clear──▶ EventBus ──▶ CapacityManager
//!                                            │
//!                                            └──────▶ UI / diagnostics
//! ```

mod bus;

pub use bus::{EventBus, StorageEvent};
