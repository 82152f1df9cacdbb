//! State machine abstraction for Raft
//!
//! The state machine is the application logic that Raft coordinates.
//! When log entries are committed, they are applied to the state machine.

use std::sync::{Arc, Mutex};

/// Result of applying a command to the state machine.
/// `Ok(Some(payload))` for commands that produce output (GET),
/// `Ok(None)` for commands with no payload, `Err(message)` for failures.
pub type ApplyResult = Result<Option<String>, String>;

/// State machine trait - the application logic that Raft coordinates
///
/// Implementations must be deterministic: applying the same commands
/// in the same order must produce the same state on all nodes.
/// Commands are opaque byte sequences; interpretation is up to the
/// implementation.
pub trait StateMachine: Send {
    /// Apply a command to the state machine
    fn apply(&mut self, command: &[u8]) -> ApplyResult;
}

/// Shared record of applied commands for testing
pub type AppliedCommands = Arc<Mutex<Vec<Vec<u8>>>>;

/// Test state machine that records all applied commands to a shared vec
pub struct TestStateMachine {
    applied: AppliedCommands,
}

impl TestStateMachine {
    pub fn new() -> Self {
        TestStateMachine {
            applied: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create with a shared vec to inspect applied commands from outside
    pub fn new_shared(applied: AppliedCommands) -> Self {
        TestStateMachine { applied }
    }
}

impl Default for TestStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for TestStateMachine {
    fn apply(&mut self, command: &[u8]) -> ApplyResult {
        self.applied.lock().unwrap().push(command.to_vec());
        Ok(None)
    }
}
