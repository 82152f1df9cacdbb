//! In-memory storage engine - the reference implementation.

use std::collections::HashMap;

use super::{EngineError, StorageEngine};

/// In-memory key-value engine backed by a `HashMap`.
///
/// No persistence across restarts; the replicated log is the durable record
/// and a restarted node rebuilds the engine by re-applying committed entries.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    data: HashMap<String, String>,
    open: bool,
}

impl MemoryEngine {
    /// Create a new engine, already opened for convenience.
    pub fn new() -> Self {
        MemoryEngine {
            data: HashMap::new(),
            open: true,
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl StorageEngine for MemoryEngine {
    fn open(&mut self) -> Result<(), EngineError> {
        self.open = true;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        if !self.open {
            return Err(EngineError::Closed);
        }
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError> {
        if !self.open {
            return Err(EngineError::Closed);
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&mut self, key: &str) -> Result<(), EngineError> {
        if !self.open {
            return Err(EngineError::Closed);
        }
        self.data.remove(key);
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.open = false;
        Ok(())
    }
}
