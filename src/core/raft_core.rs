//! Raft Consensus Algorithm Implementation
//!
//! This module implements the Raft consensus protocol as described in:
//! "In Search of an Understandable Consensus Algorithm" by Diego Ongaro and John Ousterhout

use std::collections::HashMap;
use tokio::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::state_machine::{ApplyResult, StateMachine};
use crate::storage::Storage;

/// Special no-op command appended by leaders on election.
/// This allows committing entries from previous terms indirectly.
pub const NOOP_COMMAND: &[u8] = b"NOOP";

/// Raft node states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftState {
    /// Follower: Passive state, receives updates from leader
    Follower,
    /// Candidate: Actively seeking votes to become leader
    Candidate,
    /// Leader: Handles all client requests and replicates log
    Leader,
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Term when entry was received by leader
    pub term: u64,
    /// Index in the log (1-indexed)
    pub index: u64,
    /// Opaque command bytes for the state machine
    pub command: Vec<u8>,
}

/// RequestVote RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    /// Candidate's term
    pub term: u64,
    /// Candidate requesting vote
    pub candidate_id: u64,
    /// Index of candidate's last log entry
    pub last_log_index: u64,
    /// Term of candidate's last log entry
    pub last_log_term: u64,
}

/// RequestVote RPC results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResult {
    /// Current term, for candidate to update itself
    pub term: u64,
    /// True means candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    /// Leader's term
    pub term: u64,
    /// Leader's ID
    pub leader_id: u64,
    /// Index of log entry immediately preceding new ones
    pub prev_log_index: u64,
    /// Term of prev_log_index entry
    pub prev_log_term: u64,
    /// Log entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit_index
    pub leader_commit: u64,
}

/// AppendEntries RPC results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResult {
    /// Current term, for leader to update itself
    pub term: u64,
    /// True if follower contained entry matching prev_log_index and prev_log_term
    pub success: bool,
}

/// Result of handling an AppendEntries RPC
#[derive(Debug, Clone)]
pub struct HandleAppendEntriesOutput {
    /// The response to send back to the leader
    pub result: AppendEntriesResult,
    /// Leader ID if we recognized a valid leader
    pub leader_id: Option<u64>,
}

/// Core Raft state machine (sync, transport-agnostic)
pub struct RaftCore {
    // Storage backend for persistent state
    storage: Box<dyn Storage>,
    // State machine to apply committed entries to
    state_machine: Box<dyn StateMachine>,

    // Persistent state on all servers (updated on stable storage before responding to RPCs)
    // These are cached in memory for fast access, but always persisted via storage
    /// Latest term server has seen (initialized to 0 on first boot, increases monotonically)
    pub current_term: u64,
    /// Candidate ID that received vote in current term (or None if none)
    pub voted_for: Option<u64>,
    /// Log entries; each entry contains command for state machine, and term when entry was received by leader (first index is 1)
    pub log: Vec<LogEntry>,

    // Volatile state on all servers
    /// Index of highest log entry known to be committed (initialized to 0, increases monotonically)
    pub commit_index: u64,
    /// Index of highest log entry applied to state machine (initialized to 0, increases monotonically)
    pub last_applied: u64,

    // Volatile state on leaders (reinitialized after election, discarded on step-down)
    /// For each server, index of next log entry to send to that server (initialized to leader last log index + 1)
    pub next_index: HashMap<u64, u64>,
    /// For each server, index of highest log entry known to be replicated on server (initialized to 0, increases monotonically)
    pub match_index: HashMap<u64, u64>,
    /// For each server, sequence number to assign to the next AppendEntries request
    append_seq: HashMap<u64, u64>,
    /// For each server, highest sequence number whose response has been processed.
    /// Responses with an older sequence are stale (delayed or reordered) and are dropped.
    append_seq_seen: HashMap<u64, u64>,

    // Node-specific state
    /// Unique identifier for this node
    pub id: u64,
    /// Current state of this node
    pub state: RaftState,
    /// IDs of other nodes in the cluster
    pub peers: Vec<u64>,
    /// Peers that have granted votes in the current election (used by candidates)
    votes_received: Vec<u64>,
    /// Current known leader (updated when receiving valid AppendEntries)
    pub current_leader: Option<u64>,
    /// Last time we received a valid heartbeat from leader or granted a vote (for election timeout)
    pub last_heartbeat: Instant,
}

impl RaftCore {
    /// Create a new Raft core with the given storage backend and state machine
    /// Loads persistent state (term, voted_for, log) from storage
    pub fn new(
        id: u64,
        peers: Vec<u64>,
        storage: Box<dyn Storage>,
        state_machine: Box<dyn StateMachine>,
    ) -> Self {
        // Load persistent state from storage
        let current_term = storage.load_term().expect("failed to load term from storage");
        let voted_for = storage.load_voted_for().expect("failed to load voted_for from storage");
        let log = storage.load_log().expect("failed to load log from storage");

        RaftCore {
            storage,
            state_machine,
            current_term,
            voted_for,
            log,
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            append_seq: HashMap::new(),
            append_seq_seen: HashMap::new(),
            id,
            state: RaftState::Follower,
            peers,
            votes_received: Vec::new(),
            current_leader: None,
            last_heartbeat: Instant::now(),
        }
    }

    // === Persistence helpers ===

    /// Update current_term and persist to storage
    fn set_term(&mut self, term: u64) {
        self.current_term = term;
        self.storage.save_term(term).expect("failed to persist term");
    }

    /// Update voted_for and persist to storage
    fn set_voted_for(&mut self, voted_for: Option<u64>) {
        self.voted_for = voted_for;
        self.storage.save_voted_for(voted_for).expect("failed to persist voted_for");
    }

    /// Update term and voted_for together (common pattern when discovering higher term)
    fn update_term(&mut self, new_term: u64) {
        self.set_term(new_term);
        self.set_voted_for(None);
    }

    /// Convert to follower after seeing a higher term.
    /// Leader volatile state (next_index, match_index, sequence counters)
    /// only makes sense for the term it was built in, so it is discarded.
    fn step_down(&mut self, new_term: u64, reason: &str) {
        let old_state = self.state;
        self.update_term(new_term);
        self.state = RaftState::Follower;
        self.next_index.clear();
        self.match_index.clear();
        self.append_seq.clear();
        self.append_seq_seen.clear();
        self.votes_received.clear();
        if old_state != RaftState::Follower {
            info!(
                "[node {}] stepped down to follower (was {:?}, saw term {} {})",
                self.id, old_state, new_term, reason
            );
        }
    }

    /// Append a single entry to log and persist
    fn persist_log_entry(&mut self, entry: LogEntry) {
        self.storage.append_log_entries(&[entry.clone()]).expect("failed to persist log entry");
        self.log.push(entry);
    }

    /// Truncate log from index and persist
    fn persist_truncate_log(&mut self, from_index: u64) {
        let truncate_pos = (from_index - 1) as usize;
        if truncate_pos < self.log.len() {
            self.storage.truncate_log(from_index).expect("failed to truncate log");
            self.log.truncate(truncate_pos);
        }
    }

    /// Get the last log index (0 if log is empty)
    pub fn last_log_index(&self) -> u64 {
        self.log.last().map(|e| e.index).unwrap_or(0)
    }

    /// Get the term of the last log entry (0 if log is empty)
    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// Get a log entry by its 1-based index
    fn get_log_entry(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.log.get((index - 1) as usize)
    }

    /// Check if candidate's log is at least as up-to-date as receiver's log
    /// Returns true if:
    /// - candidate's last log term > receiver's last log term, OR
    /// - candidate's last log term == receiver's last log term AND candidate's last log index >= receiver's last log index
    pub fn is_log_up_to_date(&self, candidate_last_log_term: u64, candidate_last_log_index: u64) -> bool {
        let my_last_term = self.last_log_term();
        let my_last_index = self.last_log_index();

        candidate_last_log_term > my_last_term ||
        (candidate_last_log_term == my_last_term && candidate_last_log_index >= my_last_index)
    }

    /// Handle RequestVote RPC
    pub fn handle_request_vote(&mut self, vote_req: &RequestVoteArgs) -> RequestVoteResult {
        // Decline requests with stale term immediately
        if vote_req.term < self.current_term {
            return RequestVoteResult {
                term: self.current_term,
                vote_granted: false,
            };
        }

        // If RPC request or response contains term T > currentTerm: set currentTerm = T, convert to follower
        if vote_req.term > self.current_term {
            self.step_down(vote_req.term, "in vote request");
        }

        // If already voted for another candidate, decline vote
        if self.voted_for.is_some() && self.voted_for != Some(vote_req.candidate_id) {
            return RequestVoteResult {
                term: self.current_term,
                vote_granted: false,
            };
        }

        if !self.is_log_up_to_date(vote_req.last_log_term, vote_req.last_log_index) {
            return RequestVoteResult {
                term: self.current_term,
                vote_granted: false,
            };
        }

        // Grant vote. Granting also resets the election timer so this node
        // does not immediately challenge the candidate it just voted for.
        self.set_voted_for(Some(vote_req.candidate_id));
        self.last_heartbeat = Instant::now();

        RequestVoteResult {
            term: self.current_term,
            vote_granted: true,
        }
    }

    /// Handle AppendEntries RPC (heartbeat or log replication)
    /// Returns the result to send back and the leader ID if recognized
    pub fn handle_append_entries(&mut self, append_req: &AppendEntriesArgs) -> HandleAppendEntriesOutput {
        // If RPC request or response contains term T > currentTerm: set currentTerm = T, convert to follower
        if append_req.term > self.current_term {
            self.step_down(append_req.term, "in append request");
        }

        let mut leader_id = None;

        let success = if append_req.term < self.current_term {
            // Reply false if term < currentTerm
            false
        } else {
            // Valid AppendEntries from current leader - reset election timeout
            self.state = RaftState::Follower;
            self.current_leader = Some(append_req.leader_id);
            self.last_heartbeat = Instant::now();
            leader_id = Some(append_req.leader_id);

            // Reply false if log doesn't contain an entry at prev_log_index with term matching prev_log_term
            let log_matches = if append_req.prev_log_index == 0 {
                true
            } else {
                self.get_log_entry(append_req.prev_log_index)
                    .map(|e| e.term == append_req.prev_log_term)
                    .unwrap_or(false)
            };

            if log_matches {
                // Process each new entry
                self.apply_entries(&append_req.entries);

                // If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
                if append_req.leader_commit > self.commit_index {
                    self.commit_index = std::cmp::min(
                        append_req.leader_commit,
                        self.last_log_index(),
                    );
                    // Apply committed entries to state machine
                    self.apply_committed_entries();
                }

                true
            } else {
                false
            }
        };

        HandleAppendEntriesOutput {
            result: AppendEntriesResult {
                term: self.current_term,
                success,
            },
            leader_id,
        }
    }

    /// Apply entries from AppendEntries RPC, handling conflicts and persistence
    fn apply_entries(&mut self, entries: &[LogEntry]) {
        for entry in entries {
            let entry_idx = (entry.index - 1) as usize;

            if entry_idx < self.log.len() {
                // Entry exists at this index
                if self.log[entry_idx].term != entry.term {
                    // Conflict: same index but different terms
                    // Delete this entry and all that follow, then append new entry
                    self.persist_truncate_log(entry.index);
                    self.persist_log_entry(entry.clone());
                    debug!("[node {}] replicated entry {} (term {})", self.id, entry.index, entry.term);
                }
                // If terms match, entry already exists - skip (idempotent)
            } else {
                // Entry doesn't exist yet, append it
                self.persist_log_entry(entry.clone());
                debug!("[node {}] replicated entry {} (term {})", self.id, entry.index, entry.term);
            }
        }
    }

    /// Start a new election (called when election timeout elapses)
    pub fn start_election(&mut self) {
        // Increment current_term and persist
        self.set_term(self.current_term + 1);

        // Transition to candidate
        self.state = RaftState::Candidate;
        info!("[node {}] became candidate for term {}", self.id, self.current_term);

        // Clear current leader (we're challenging)
        self.current_leader = None;

        // Vote for self and persist
        self.set_voted_for(Some(self.id));

        // Reset votes received (we've already voted for ourselves)
        self.votes_received.clear();
        self.votes_received.push(self.id);

        // Reset election timer so we don't immediately timeout again
        self.last_heartbeat = Instant::now();
    }

    /// Become leader (called after receiving majority of votes)
    pub fn become_leader(&mut self) {
        self.state = RaftState::Leader;
        self.current_leader = Some(self.id);
        // Reset heartbeat timer to prevent election timeout from firing on leader
        self.last_heartbeat = Instant::now();
        info!("[node {}] became leader for term {}", self.id, self.current_term);

        // Reinitialize leader volatile state BEFORE appending no-op
        // This way next_index points AT the no-op, so it gets sent in first heartbeat
        let last_index = self.last_log_index();
        self.append_seq.clear();
        self.append_seq_seen.clear();
        for peer_id in &self.peers {
            self.next_index.insert(*peer_id, last_index + 1);
            self.match_index.insert(*peer_id, 0);
        }

        // Append no-op entry to commit entries from previous terms
        // (Raft paper Section 5.4.2: leader can only commit entries from current term)
        let noop_entry = LogEntry {
            term: self.current_term,
            index: self.last_log_index() + 1,
            command: NOOP_COMMAND.to_vec(),
        };
        debug!("[node {}] appending no-op entry {}", self.id, noop_entry.index);
        self.persist_log_entry(noop_entry);
    }

    /// Add a new log entry (called by leader when receiving client request)
    /// Returns None if called on a non-leader node
    pub fn append_log_entry(&mut self, command: Vec<u8>) -> Option<LogEntry> {
        // Only leaders can append log entries
        if self.state != RaftState::Leader {
            return None;
        }

        let index = self.last_log_index() + 1;
        let entry = LogEntry {
            term: self.current_term,
            index,
            command,
        };
        debug!("[node {}] appended entry {} (term {})", self.id, index, self.current_term);
        self.persist_log_entry(entry.clone());
        Some(entry)
    }

    /// Apply committed entries to the state machine
    /// Updates last_applied to match commit_index
    /// Returns vec of (index, result) for each entry applied
    pub fn apply_committed_entries(&mut self) -> Vec<(u64, ApplyResult)> {
        let mut results = Vec::new();
        while self.last_applied < self.commit_index {
            self.last_applied += 1;

            // Clone command to avoid holding a borrow across the apply call
            let command = self
                .get_log_entry(self.last_applied)
                .map(|e| e.command.clone())
                .expect("committed entry missing from log");
            let result = self.state_machine.apply(&command);
            results.push((self.last_applied, result));
        }
        results
    }

    /// Allocate the sequence number for the next AppendEntries request to a peer.
    /// The leader tags every request with this number; the matching response
    /// carries it back so stale responses can be told apart from current ones.
    pub fn next_append_seq(&mut self, peer_id: u64) -> u64 {
        let seq = self.append_seq.entry(peer_id).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Process a RequestVote response (called by candidate)
    /// Updates term if response contains a higher term
    pub fn process_request_vote_response(&mut self, result: &RequestVoteResult) {
        // If RPC response contains term T > currentTerm: set currentTerm = T, convert to follower
        if result.term > self.current_term {
            self.step_down(result.term, "in vote response");
        }
    }

    /// Process an AppendEntries response (called by leader)
    /// Updates term if response contains a higher term
    pub fn process_append_entries_response(&mut self, result: &AppendEntriesResult) {
        // If RPC response contains term T > currentTerm: set currentTerm = T, convert to follower
        if result.term > self.current_term {
            self.step_down(result.term, "in append response");
        }
    }

    /// Handle a RequestVote result (called by candidate after receiving vote response)
    ///
    /// `election_term` is the term the vote was requested in. A response that
    /// arrives after the node has moved on to a newer term belongs to a dead
    /// election and must not count towards the current one.
    ///
    /// Returns true if this node became leader as a result
    pub fn handle_request_vote_result(
        &mut self,
        peer_id: u64,
        election_term: u64,
        result: &RequestVoteResult,
    ) -> bool {
        // Process the response (updates term if needed)
        self.process_request_vote_response(result);

        // Discard votes from elections other than the current one
        if election_term != self.current_term {
            debug!(
                "[node {}] discarding vote from {} for stale election term {} (current {})",
                self.id, peer_id, election_term, self.current_term
            );
            return false;
        }

        // If we're no longer a candidate (e.g., term was updated), we can't become leader
        if self.state != RaftState::Candidate {
            return false;
        }

        // Track the vote if granted
        if result.vote_granted && !self.votes_received.contains(&peer_id) {
            self.votes_received.push(peer_id);
        }

        // Check if we have majority (including our own vote)
        let total_nodes = 1 + self.peers.len(); // self + peers
        let majority = (total_nodes / 2) + 1;

        if self.votes_received.len() >= majority {
            self.become_leader();
            return true;
        }

        false
    }

    /// Handle an AppendEntries result (called by leader after receiving replication response)
    ///
    /// `seq` is the sequence number the request was sent with. Responses that
    /// arrive out of order (older seq than one already processed for this peer)
    /// are dropped so a delayed rejection cannot undo progress.
    ///
    /// Returns (committed_index, apply_results) - the commit index and results from applying entries
    pub fn handle_append_entries_result(
        &mut self,
        peer_id: u64,
        seq: u64,
        entry_index: u64,
        result: &AppendEntriesResult,
    ) -> (Option<u64>, Vec<(u64, ApplyResult)>) {
        // Process the response (updates term if needed)
        self.process_append_entries_response(result);

        // If we're no longer a leader (e.g., term was updated), we can't commit
        if self.state != RaftState::Leader {
            return (None, Vec::new());
        }

        // Drop stale responses from earlier requests to this peer
        let seen = self.append_seq_seen.get(&peer_id).copied().unwrap_or(0);
        if seq <= seen {
            debug!(
                "[node {}] discarding stale append response from {} (seq {} <= {})",
                self.id, peer_id, seq, seen
            );
            return (None, Vec::new());
        }
        self.append_seq_seen.insert(peer_id, seq);

        // Update match_index and next_index based on result
        if result.success {
            // Successfully replicated up to entry_index
            if entry_index > 0 {
                let current_match = self.match_index.get(&peer_id).copied().unwrap_or(0);
                if entry_index > current_match {
                    self.match_index.insert(peer_id, entry_index);
                }
                // Update next_index for next entry to send
                self.next_index.insert(peer_id, entry_index + 1);
            }
        } else {
            // Replication failed, decrement next_index for retry
            let current_next = self.next_index.get(&peer_id).copied().unwrap_or(1);
            if current_next > 1 {
                self.next_index.insert(peer_id, current_next - 1);
            }
        }

        // Check if entry_index is replicated to majority and can be committed
        if entry_index == 0 {
            return (None, Vec::new()); // No entry to commit
        }

        // Raft safety: Only commit entries from current term (Section 5.4.2)
        // Previous term entries are committed indirectly when a current-term entry is committed
        let entry_term = self.get_log_entry(entry_index).map(|e| e.term);
        if entry_term != Some(self.current_term) {
            return (None, Vec::new()); // Cannot commit entries from previous terms directly
        }

        // Count how many nodes have replicated this entry (including leader)
        let mut replicated_count = 1; // Leader has it
        for &match_idx in self.match_index.values() {
            if match_idx >= entry_index {
                replicated_count += 1;
            }
        }

        // Check if we have majority
        let total_nodes = 1 + self.peers.len(); // self + peers
        let majority = (total_nodes / 2) + 1;

        if replicated_count >= majority && entry_index > self.commit_index {
            // Commit the entry
            self.commit_index = entry_index;
            info!(
                "[node {}] committed entry {} (replicated to {}/{})",
                self.id, entry_index, replicated_count, total_nodes
            );
            let apply_results = self.apply_committed_entries();
            return (Some(entry_index), apply_results);
        }

        (None, Vec::new())
    }
}
