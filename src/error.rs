//! Crate-wide error types.
//!
//! Mirrors the three recoverable error kinds from the error handling design:
//! contract violations, capability failures, and store I/O failures.
//! `ExhaustionEscalation` is deliberately not a variant here — escalation is
//! a returned value, not a raised error (see `refinement` and `autodebug`).

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors that can occur while building, validating, or persisting the
/// core entities (envelopes, contexts, decisions, states, sessions).
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// An envelope, context, or decision violated one of its structural
    /// invariants (bad agent id format, non-UUID task id, score out of
    /// range, non-monotonic history, `sufficient` without meeting
    /// threshold, `dag` without a graph, a cycle in the graph, broken
    /// iteration ordering, a referenced file path that does not exist).
    #[error("invalid contract: {message}")]
    InvalidContract { message: String },

    /// A capability invocation (`Agent::invoke`) failed or timed out.
    /// Carries the agent/task pair so callers can correlate it with the
    /// input that triggered it.
    #[error("capability {agent_id} failed for task {task_id}: {message}")]
    CapabilityFailure {
        agent_id: String,
        task_id: uuid::Uuid,
        message: String,
    },

    /// Persistence I/O failed (read, write, or directory creation).
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// A graph supplied to the routing planner contained a cycle.
    #[error("cyclic dependency graph: {0}")]
    CyclicGraph(String),

    /// IO error wrapper.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error wrapper.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordinationError {
    pub fn invalid_contract(message: impl Into<String>) -> Self {
        Self::InvalidContract {
            message: message.into(),
        }
    }

    pub fn capability_failure(
        agent_id: impl Into<String>,
        task_id: uuid::Uuid,
        message: impl Into<String>,
    ) -> Self {
        Self::CapabilityFailure {
            agent_id: agent_id.into(),
            task_id,
            message: message.into(),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }
}
