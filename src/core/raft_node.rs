//! RaftNode - High-level Raft node with consensus logic

use std::sync::Arc;
use tokio::sync::Mutex;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use super::raft_core::{AppendEntriesArgs, RaftCore, RaftState, RequestVoteArgs};
use crate::state_machine::ApplyResult;
use crate::transport::Transport;

/// Shared reference to RaftCore
pub type SharedCore = Arc<Mutex<RaftCore>>;

/// High-level Raft node that handles consensus operations
pub struct RaftNode<T: Transport> {
    core: SharedCore,
    transport: T,
}

impl<T: Transport> RaftNode<T> {
    /// Create a new RaftNode
    pub fn new(core: RaftCore, transport: T) -> Self {
        Self {
            core: Arc::new(Mutex::new(core)),
            transport,
        }
    }

    /// Get a shared reference to the core (for incoming RPC handling)
    pub fn shared_core(&self) -> SharedCore {
        self.core.clone()
    }

    /// Start an election
    pub async fn start_election(&self) {
        let mut core = self.core.lock().await;
        core.start_election();
    }

    /// Request votes from all peers (sends requests concurrently)
    /// Returns true if became leader
    pub async fn request_votes(&self) -> bool {
        let (args, peers, election_term) = {
            let core = self.core.lock().await;
            let args = RequestVoteArgs {
                term: core.current_term,
                candidate_id: core.id,
                last_log_index: core.last_log_index(),
                last_log_term: core.last_log_term(),
            };
            (args, core.peers.clone(), core.current_term)
        };

        // Send all vote requests concurrently, process as they arrive
        let mut futures: FuturesUnordered<_> = peers
            .iter()
            .map(|&peer_id| {
                let args = args.clone();
                let transport = &self.transport;
                async move { (peer_id, transport.request_vote(peer_id, args).await) }
            })
            .collect();

        while let Some((peer_id, result)) = futures.next().await {
            if let Ok(result) = result {
                let mut core = self.core.lock().await;
                if core.handle_request_vote_result(peer_id, election_term, &result) {
                    return true; // Became leader, don't wait for remaining
                }
            }
        }

        false
    }

    /// Replicate log entries to all peers (sends requests concurrently)
    /// Replicate entry at entry_index to all peers
    /// Returns the state machine result for entry_index if it was committed and applied
    pub async fn replicate_to_peers(&self, entry_index: u64) -> Option<ApplyResult> {
        let requests_to_send = {
            let mut core = self.core.lock().await;

            let peers = core.peers.clone();
            let mut requests_to_send = Vec::new();
            for peer_id in peers {
                let next_idx = core.next_index.get(&peer_id).copied().unwrap_or(1);
                let prev_log_index = next_idx - 1;
                let prev_log_term = if prev_log_index == 0 {
                    0
                } else {
                    core.log
                        .get((prev_log_index - 1) as usize)
                        .map(|e| e.term)
                        .unwrap_or(0)
                };

                // Get entries to send
                let entries: Vec<_> = core
                    .log
                    .iter()
                    .filter(|e| e.index >= next_idx && e.index <= entry_index)
                    .cloned()
                    .collect();

                let args = AppendEntriesArgs {
                    term: core.current_term,
                    leader_id: core.id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: core.commit_index,
                };
                let seq = core.next_append_seq(peer_id);
                requests_to_send.push((peer_id, seq, args));
            }
            requests_to_send
        };

        // Send to all peers concurrently, process as they arrive (lock released)
        let mut futures: FuturesUnordered<_> = requests_to_send
            .into_iter()
            .map(|(peer_id, seq, args)| {
                let transport = &self.transport;
                async move { (peer_id, seq, transport.append_entries(peer_id, args).await) }
            })
            .collect();

        // Process results as they arrive - return as soon as entry is committed
        let mut entry_result = None;
        while let Some((peer_id, seq, result)) = futures.next().await {
            if let Ok(result) = result {
                let mut core = self.core.lock().await;
                let (_committed, apply_results) =
                    core.handle_append_entries_result(peer_id, seq, entry_index, &result);
                for (idx, res) in apply_results {
                    if idx == entry_index {
                        entry_result = Some(res);
                    }
                }
            }
            if entry_result.is_some() {
                break; // Entry committed, don't wait for remaining peers
            }
        }
        entry_result
    }

    /// Get current state
    pub async fn state(&self) -> RaftState {
        self.core.lock().await.state
    }

    /// Get commit index
    pub async fn commit_index(&self) -> u64 {
        self.core.lock().await.commit_index
    }

    /// Send heartbeat to all peers
    /// Heartbeats in Raft are AppendEntries RPCs that also include any entries
    /// the follower might be missing (for catch-up).
    /// Returns (still_leader, success_count) - whether still leader and how many peers responded successfully.
    pub async fn send_heartbeat(&self) -> (bool, usize) {
        let requests_to_send = {
            let mut core = self.core.lock().await;

            // Only leaders send heartbeats
            if core.state != RaftState::Leader {
                return (false, 0);
            }

            let peers = core.peers.clone();
            let mut requests_to_send = Vec::new();
            for peer_id in peers {
                let next_idx = core.next_index.get(&peer_id).copied().unwrap_or(1);
                let prev_log_index = next_idx - 1;
                let prev_log_term = if prev_log_index == 0 {
                    0
                } else {
                    core.log
                        .get((prev_log_index - 1) as usize)
                        .map(|e| e.term)
                        .unwrap_or(0)
                };

                // Include entries from next_idx onwards for catch-up
                let entries: Vec<_> = core
                    .log
                    .iter()
                    .filter(|e| e.index >= next_idx)
                    .cloned()
                    .collect();

                // Track the last entry index we're sending (for result handling)
                let last_entry_index = entries.last().map(|e| e.index).unwrap_or(0);

                let args = AppendEntriesArgs {
                    term: core.current_term,
                    leader_id: core.id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: core.commit_index,
                };
                let seq = core.next_append_seq(peer_id);
                requests_to_send.push((peer_id, seq, args, last_entry_index));
            }
            requests_to_send
        };

        // Send to all peers concurrently (lock released)
        let mut futures: FuturesUnordered<_> = requests_to_send
            .into_iter()
            .map(|(peer_id, seq, args, last_entry_index)| {
                let transport = &self.transport;
                async move {
                    let result = transport.append_entries(peer_id, args).await;
                    (peer_id, seq, last_entry_index, result)
                }
            })
            .collect();

        // Process all results (wait for every peer so we catch higher terms and replicate fully)
        let mut success_count = 0;
        while let Some((peer_id, seq, last_entry_index, result)) = futures.next().await {
            if let Ok(append_result) = result {
                let mut core = self.core.lock().await;
                let _ = core.handle_append_entries_result(peer_id, seq, last_entry_index, &append_result);
                success_count += 1;
            }
        }

        let still_leader = self.core.lock().await.state == RaftState::Leader;
        (still_leader, success_count)
    }
}
