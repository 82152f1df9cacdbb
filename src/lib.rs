//! raft-kv - a small distributed key-value store replicated with Raft.
//!
//! The consensus core lives in [`core`]; committed commands are applied to a
//! pluggable [`engine::StorageEngine`] through the [`state_machine`] layer.

pub mod api;
pub mod core;
pub mod engine;
pub mod state_machine;
pub mod storage;
pub mod transport;

/// Testing utilities for integration tests.
pub mod testing;
