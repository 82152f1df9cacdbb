//! Storage engine layer - the key-value container the replicated log drives.
//!
//! The consensus core never touches an engine directly; committed commands
//! reach it through the state machine. The trait is deliberately small
//! (open/get/set/unset/close) so durable variants can slot in behind it.

pub mod memory;

use thiserror::Error;

pub use memory::MemoryEngine;

/// Errors reported by a storage engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine has not been opened or was already closed
    #[error("engine is closed")]
    Closed,
    /// Backend-specific failure (e.g. disk error for a durable variant)
    #[error("engine backend error: {0}")]
    Backend(String),
}

/// A key-value container with a fixed capability set.
///
/// Implementations do not need to be idempotent or replay-safe; the command
/// executor guarantees each committed entry is applied at most once per
/// process lifetime and always in log order.
pub trait StorageEngine: Send {
    /// Prepare the engine for use. Must be called before any other operation.
    fn open(&mut self) -> Result<(), EngineError>;

    /// Look up a key. Returns `None` for absent keys.
    fn get(&self, key: &str) -> Result<Option<String>, EngineError>;

    /// Set a key to a value, overwriting any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError>;

    /// Remove a key. Removing an absent key is not an error.
    fn unset(&mut self, key: &str) -> Result<(), EngineError>;

    /// Release the engine. Operations after close fail with [`EngineError::Closed`].
    fn close(&mut self) -> Result<(), EngineError>;
}
