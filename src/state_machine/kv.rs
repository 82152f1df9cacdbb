//! Key-value state machine
//!
//! Parses the text command protocol out of the opaque log entry bytes and
//! drives a [`StorageEngine`]:
//! - `SET key value` - set a key (value may contain spaces), returns no payload
//! - `GET key` - read a key, returns the value or no payload if absent
//! - `CLEAR key` - remove a key, returns no payload
//!
//! Reads are replicated through the log like writes, so a GET observes every
//! write committed before it on every node.

use crate::core::raft_core::NOOP_COMMAND;
use crate::engine::StorageEngine;

use super::{ApplyResult, StateMachine};

/// State machine that applies key-value commands to a storage engine
pub struct KvStateMachine {
    engine: Box<dyn StorageEngine>,
}

impl KvStateMachine {
    pub fn new(engine: Box<dyn StorageEngine>) -> Self {
        KvStateMachine { engine }
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&mut self, command: &[u8]) -> ApplyResult {
        // Leader no-op entries carry no client command
        if command == NOOP_COMMAND {
            return Ok(None);
        }

        let text = std::str::from_utf8(command)
            .map_err(|_| "command is not valid UTF-8".to_string())?;

        let parts: Vec<&str> = text.splitn(3, ' ').collect();

        match parts.as_slice() {
            ["SET", key, value] => {
                self.engine
                    .set(key, value)
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            ["GET", key] => self.engine.get(key).map_err(|e| e.to_string()),
            ["CLEAR", key] => {
                self.engine
                    .unset(key)
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            _ => Err(format!("unknown command: {}", text)),
        }
    }
}
