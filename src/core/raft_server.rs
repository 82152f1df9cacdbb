//! RaftServer - High-level Raft server for handling client commands

use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

use super::config::RaftConfig;
use super::raft_core::{RaftCore, RaftState};
use super::raft_node::{RaftNode, SharedCore};
use crate::transport::{Transport, TransportError};

/// Errors that can occur during Raft operations
#[derive(Debug, Clone, Error)]
pub enum RaftError {
    /// This node is not the leader (includes leader hint if known)
    #[error("not the leader")]
    NotLeader { leader_hint: Option<u64> },
    /// Entry was not committed (couldn't reach majority)
    #[error("entry was not committed")]
    NotCommitted,
    /// State machine returned an error
    #[error("state machine error: {0}")]
    StateMachine(String),
    /// Transport error occurred
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Command sent to the RaftServer from clients
enum Command {
    /// Submit a client command to be replicated
    Submit {
        command: Vec<u8>,
        reply: oneshot::Sender<Result<Option<String>, RaftError>>,
    },
}

/// Handle for interacting with a running RaftServer
#[derive(Clone)]
pub struct RaftHandle {
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: mpsc::Sender<()>,
}

impl RaftHandle {
    /// Submit a command to the Raft cluster
    /// Returns the state machine result payload (if any) once the entry is
    /// committed and applied
    pub async fn submit(&self, command: Vec<u8>) -> Result<Option<String>, RaftError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Submit {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RaftError::NotLeader { leader_hint: None })?;

        reply_rx.await.map_err(|_| RaftError::NotLeader { leader_hint: None })?
    }

    /// Shutdown the RaftServer gracefully
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Raft server that handles client commands and coordinates with RaftNode
pub struct RaftServer<T: Transport> {
    node: Arc<RaftNode<T>>,
    command_rx: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    shutdown_rx: mpsc::Receiver<()>,
    shutdown_tx: mpsc::Sender<()>,
    config: RaftConfig,
}

impl<T: Transport + 'static> RaftServer<T> {
    /// Create a new RaftServer with default config
    /// Returns the server and shared core for RPC handling
    pub fn new(core: RaftCore, transport: T) -> (Self, SharedCore) {
        Self::with_config(core, transport, RaftConfig::default())
    }

    /// Create a new RaftServer with custom config
    /// Returns the server and shared core for RPC handling
    pub fn with_config(core: RaftCore, transport: T, config: RaftConfig) -> (Self, SharedCore) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let node = RaftNode::new(core, transport);
        let shared_core = node.shared_core();
        let server = Self {
            node: Arc::new(node),
            command_rx,
            command_tx,
            shutdown_rx,
            shutdown_tx,
            config,
        };
        (server, shared_core)
    }

    /// Start the server and return a handle for interaction
    pub fn start(self) -> RaftHandle {
        let handle = RaftHandle {
            command_tx: self.command_tx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        };

        tokio::spawn(self.run());

        handle
    }

    /// Main server loop
    async fn run(mut self) {
        let mut heartbeat_interval = interval(self.config.heartbeat_interval);
        // Use Delay behavior to prevent accumulated missed ticks from starving election timeout
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // Redraw the randomized timeout every cycle so two nodes that
            // split a vote do not stay in lockstep on the retry
            let election_timeout = self.config.random_election_timeout();

            // Calculate election deadline based on last_heartbeat from core
            let election_deadline = self.get_election_deadline(election_timeout).await;
            let election_sleep = pin!(sleep_until(election_deadline));

            tokio::select! {
                // Handle shutdown signal
                _ = self.shutdown_rx.recv() => {
                    break;
                }
                // Handle client commands
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        Command::Submit { command, reply } => {
                            // Replication waits on peer RPCs; run it off the
                            // loop so heartbeats and the election timer keep
                            // ticking while a majority is slow or unreachable
                            let node = Arc::clone(&self.node);
                            tokio::spawn(async move {
                                let result = Self::handle_submit(&node, command).await;
                                let _ = reply.send(result);
                            });
                        }
                    }
                }
                // Send heartbeats if leader
                _ = heartbeat_interval.tick() => {
                    if self.node.state().await == RaftState::Leader {
                        // Update our own heartbeat timer to prevent election timeout
                        self.node.shared_core().lock().await.last_heartbeat = Instant::now();
                        self.node.send_heartbeat().await;
                    }
                }
                // Election timeout - start election if not leader
                _ = election_sleep => {
                    let state = self.node.state().await;
                    if state != RaftState::Leader {
                        // Check if we actually timed out (last_heartbeat might have been updated)
                        if self.has_election_timed_out(election_timeout).await {
                            // Start election
                            self.node.start_election().await;
                            let became_leader = self.node.request_votes().await;

                            if became_leader {
                                // Immediately send heartbeat to establish leadership
                                self.node.send_heartbeat().await;
                            }
                        }
                    }
                }
                else => break, // All channels closed, shutdown
            }
        }
    }

    /// Get election deadline based on last_heartbeat from core
    async fn get_election_deadline(&self, timeout: Duration) -> Instant {
        let core = self.node.shared_core();
        let last_heartbeat = core.lock().await.last_heartbeat;
        last_heartbeat + timeout
    }

    /// Check if election has actually timed out (last_heartbeat + timeout < now)
    async fn has_election_timed_out(&self, timeout: Duration) -> bool {
        let core = self.node.shared_core();
        let last_heartbeat = core.lock().await.last_heartbeat;
        Instant::now() >= last_heartbeat + timeout
    }

    /// Handle a client submit command
    /// Returns the state machine result if committed, or an error
    async fn handle_submit(node: &RaftNode<T>, command: Vec<u8>) -> Result<Option<String>, RaftError> {
        let shared_core = node.shared_core();
        let entry_index = {
            let mut core = shared_core.lock().await;

            // Only leaders can accept commands
            if core.state != RaftState::Leader {
                return Err(RaftError::NotLeader { leader_hint: core.current_leader });
            }

            // Append to local log
            let entry = core
                .append_log_entry(command)
                .ok_or(RaftError::NotLeader { leader_hint: None })?;
            entry.index
        };

        // Replicate to all peers and get state machine result
        match node.replicate_to_peers(entry_index).await {
            Some(Ok(result)) => Ok(result),
            Some(Err(err)) => Err(RaftError::StateMachine(err)),
            None => Err(RaftError::NotCommitted),
        }
    }

    /// Start an election (delegates to RaftNode)
    pub async fn start_election(&self) {
        self.node.start_election().await;
    }

    /// Request votes from all peers (delegates to RaftNode)
    pub async fn request_votes(&self) -> bool {
        self.node.request_votes().await
    }

    /// Get current state
    pub async fn state(&self) -> RaftState {
        self.node.state().await
    }

    /// Get commit index
    pub async fn commit_index(&self) -> u64 {
        self.node.commit_index().await
    }

    /// Access the underlying node (used by tests to drive replication directly)
    #[cfg(test)]
    pub(crate) fn node(&self) -> &RaftNode<T> {
        &self.node
    }
}
