//! HTTP client API for the replicated key-value store
//!
//! Provides HTTP endpoints for external clients to interact with the cluster:
//! - Submit commands (SET/GET/CLEAR) to the leader
//! - Query cluster status and leader information

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::core::raft_core::RaftState;
use crate::core::raft_node::SharedCore;
use crate::core::raft_server::{RaftError, RaftHandle};

/// State for client HTTP handlers - contains both handle for commands and core for queries
#[derive(Clone)]
pub struct ClientState {
    /// Handle for submitting commands (goes through full RaftServer flow)
    pub handle: RaftHandle,
    /// Shared core for reading status/leader info
    pub core: SharedCore,
}

/// Request body for submitting a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// The command to submit (e.g., "SET key value")
    pub command: String,
}

/// Response from a successful submit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Result from the state machine (the value for GET, nothing for SET/CLEAR)
    pub result: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Leader hint (node ID) if known, for redirect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_hint: Option<u64>,
}

/// Response for leader query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderResponse {
    /// Current leader ID if known
    pub leader_id: Option<u64>,
    /// This node's ID
    pub node_id: u64,
    /// Whether this node is the leader
    pub is_leader: bool,
}

/// Response for status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// This node's ID
    pub node_id: u64,
    /// Current state (Follower, Candidate, Leader)
    pub state: String,
    /// Current term
    pub term: u64,
    /// Current leader ID if known
    pub leader_id: Option<u64>,
    /// Commit index
    pub commit_index: u64,
    /// Last applied index
    pub last_applied: u64,
    /// Number of log entries
    pub log_length: u64,
}

/// Create an axum router for client HTTP API (core-only version for testing)
pub fn create_client_router(core: SharedCore) -> Router {
    Router::new()
        .route("/client/leader", get(handle_leader_core))
        .route("/client/status", get(handle_status_core))
        .with_state(core)
}

/// Create an axum router for client HTTP API with full RaftServer integration
pub fn create_client_router_full(handle: RaftHandle, core: SharedCore) -> Router {
    let state = ClientState { handle, core };
    Router::new()
        .route("/client/submit", post(handle_submit))
        .route("/client/leader", get(handle_leader))
        .route("/client/status", get(handle_status))
        .with_state(state)
}

/// Handle POST /client/submit - submit a command to the cluster
/// This goes through the full RaftServer flow: append, replicate, commit, apply
pub async fn handle_submit(
    State(state): State<ClientState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.handle.submit(request.command.into_bytes()).await {
        Ok(result) => Ok(Json(SubmitResponse { result })),
        Err(RaftError::NotLeader { leader_hint }) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Not the leader".to_string(),
                leader_hint,
            }),
        )),
        Err(RaftError::NotCommitted) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Entry not committed (couldn't reach majority)".to_string(),
                leader_hint: None,
            }),
        )),
        Err(RaftError::StateMachine(err)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("State machine error: {}", err),
                leader_hint: None,
            }),
        )),
        Err(RaftError::Transport(_)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Transport error".to_string(),
                leader_hint: None,
            }),
        )),
    }
}

/// Handle GET /client/leader - get current leader information (full integration)
pub async fn handle_leader(State(state): State<ClientState>) -> Json<LeaderResponse> {
    let core = state.core.lock().await;
    Json(LeaderResponse {
        leader_id: core.current_leader,
        node_id: core.id,
        is_leader: core.state == RaftState::Leader,
    })
}

/// Handle GET /client/status - get node status (full integration)
pub async fn handle_status(State(state): State<ClientState>) -> Json<StatusResponse> {
    let core = state.core.lock().await;
    Json(StatusResponse {
        node_id: core.id,
        state: format!("{:?}", core.state),
        term: core.current_term,
        leader_id: core.current_leader,
        commit_index: core.commit_index,
        last_applied: core.last_applied,
        log_length: core.log.len() as u64,
    })
}

/// Handle GET /client/leader - core-only version for testing
async fn handle_leader_core(State(core): State<SharedCore>) -> Json<LeaderResponse> {
    let core = core.lock().await;
    Json(LeaderResponse {
        leader_id: core.current_leader,
        node_id: core.id,
        is_leader: core.state == RaftState::Leader,
    })
}

/// Handle GET /client/status - core-only version for testing
async fn handle_status_core(State(core): State<SharedCore>) -> Json<StatusResponse> {
    let core = core.lock().await;
    Json(StatusResponse {
        node_id: core.id,
        state: format!("{:?}", core.state),
        term: core.current_term,
        leader_id: core.current_leader,
        commit_index: core.commit_index,
        last_applied: core.last_applied,
        log_length: core.log.len() as u64,
    })
}
