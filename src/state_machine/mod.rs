//! State machine layer for Raft
//!
//! - `KvStateMachine`: parses key-value commands and drives a storage engine
//! - `TestStateMachine`: records commands for testing

pub mod kv;
pub mod traits;

pub use traits::{AppliedCommands, ApplyResult, StateMachine, TestStateMachine};
