// ============================================================================
// sessionstore Library
// ============================================================================
//
// A bounded, crash-recoverable per-key state container for long-running
// hosts: plugins, agents, and services that accumulate small per-session
// state and must survive process restarts.
//
// Core pieces:
// - `SessionRuntimeStore`: LRU-bounded in-memory map, one JSON file per key
//   on disk, flush-on-evict and mtime-ordered crash recovery.
// - `FlushStrategy`: periodic sweep, per-key debounce, external hook
//   triggers, or fully manual persistence.
// - `PluginService`: adapter for hosts that drive components through a
//   generic start/stop lifecycle.

pub mod config;
pub mod core;
mod persist;
pub mod service;
mod store;

// Re-export main types for convenience
pub use crate::config::{
    BoundedList, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MAX_ENTRIES, FlushStrategy, StoreOptions,
};
pub use crate::core::{Envelope, ListFieldAccess, Result, StatePayload, StoreError, append_bounded};
pub use crate::service::PluginService;
pub use crate::store::SessionRuntimeStore;
