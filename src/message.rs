//! Message & Context Model (C1).
//!
//! Immutable input/output envelopes and the append-only shared context that
//! flows between agent invocations. Every constructor here validates its
//! arguments and fails with `CoordinationError::InvalidContract` rather than
//! producing a malformed value — these types do not expose setters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoordinationError, Result};

/// Coarse lifecycle stage a task is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Specification,
    Planning,
    Implementation,
    Validation,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Specification => write!(f, "specification"),
            Self::Planning => write!(f, "planning"),
            Self::Implementation => write!(f, "implementation"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// A dotted `<department>.<agent_name>` identifier. Both sides are
/// restricted to lowercase ASCII letters and underscores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Validate and wrap a candidate agent id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if Self::is_valid(&id) {
            Ok(Self(id))
        } else {
            Err(CoordinationError::invalid_contract(format!(
                "agent id '{id}' must be '<department>.<agent_name>' using only lowercase letters and underscores"
            )))
        }
    }

    fn is_valid(id: &str) -> bool {
        let Some((department, agent_name)) = id.split_once('.') else {
            return false;
        };
        let side_valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '_');
        side_valid(department) && side_valid(agent_name) && !agent_name.contains('.')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = CoordinationError;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Opaque key/value payload carried by envelopes. Kept as a `BTreeMap` so
/// serialized output (and thus audit logs) is deterministically ordered.
pub type DataMap = BTreeMap<String, Value>;

/// Immutable input to a single agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub agent_id: AgentId,
    pub task_id: Uuid,
    pub phase: Phase,
    pub input_data: DataMap,
    pub context: Context,
}

impl Input {
    pub fn new(agent_id: AgentId, task_id: Uuid, phase: Phase, input_data: DataMap, context: Context) -> Self {
        Self {
            agent_id,
            task_id,
            phase,
            input_data,
            context,
        }
    }
}

/// Immutable output from a single agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub agent_id: AgentId,
    pub task_id: Uuid,
    pub success: bool,
    pub output_data: DataMap,
    pub reasoning: String,
    pub confidence: f64,
    pub next_actions: Vec<String>,
    pub metadata: DataMap,
    pub timestamp: DateTime<Utc>,
}

impl Output {
    /// Build an output, validating the contract invariants: confidence in
    /// `[0,1]`, non-empty reasoning, and a timestamp not in the future.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: AgentId,
        task_id: Uuid,
        success: bool,
        output_data: DataMap,
        reasoning: impl Into<String>,
        confidence: f64,
        next_actions: Vec<String>,
        metadata: DataMap,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let reasoning = reasoning.into();
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CoordinationError::invalid_contract(format!(
                "confidence {confidence} is outside [0,1]"
            )));
        }
        if reasoning.trim().is_empty() {
            return Err(CoordinationError::invalid_contract("reasoning must be non-empty"));
        }
        if timestamp > Utc::now() {
            return Err(CoordinationError::invalid_contract("timestamp is in the future"));
        }
        if !success && next_actions.is_empty() {
            return Err(CoordinationError::invalid_contract(
                "failure outputs must populate next_actions with at least one concrete step",
            ));
        }
        Ok(Self {
            agent_id,
            task_id,
            success,
            output_data,
            reasoning,
            confidence,
            next_actions,
            metadata,
            timestamp,
        })
    }

    /// Build a response output and enforce the correlation invariant:
    /// `agent_id`/`task_id` must match the input being responded to.
    #[allow(clippy::too_many_arguments)]
    pub fn respond_to(
        input: &Input,
        success: bool,
        output_data: DataMap,
        reasoning: impl Into<String>,
        confidence: f64,
        next_actions: Vec<String>,
        metadata: DataMap,
    ) -> Result<Self> {
        Self::new(
            input.agent_id.clone(),
            input.task_id,
            success,
            output_data,
            reasoning,
            confidence,
            next_actions,
            metadata,
            Utc::now(),
        )
    }

    /// Contract invariant: a response output must correlate with the input
    /// it answers.
    pub fn correlates_with(&self, input: &Input) -> bool {
        self.agent_id == input.agent_id && self.task_id == input.task_id
    }
}

/// Append-only per-task context shared across agent invocations.
///
/// `previous_outputs` is kept in non-decreasing timestamp order and
/// `cumulative_feedback` preserves append order. The only mutators are
/// `add_output` and `add_feedback`, both of which return a new value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub spec_path: Option<String>,
    pub plan_path: Option<String>,
    pub previous_outputs: Vec<Output>,
    pub cumulative_feedback: Vec<String>,
    pub refinement_state: Option<DataMap>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spec_path(mut self, path: impl Into<String>) -> Self {
        self.spec_path = Some(path.into());
        self
    }

    pub fn with_plan_path(mut self, path: impl Into<String>) -> Self {
        self.plan_path = Some(path.into());
        self
    }

    /// Append an output, enforcing the timestamp-monotonic invariant.
    pub fn add_output(&self, output: Output) -> Result<Self> {
        if let Some(last) = self.previous_outputs.last() {
            if output.timestamp < last.timestamp {
                return Err(CoordinationError::invalid_contract(
                    "output timestamp is older than the latest previous output",
                ));
            }
        }
        let mut next = self.clone();
        next.previous_outputs.push(output);
        Ok(next)
    }

    /// Append a feedback string, preserving order.
    pub fn add_feedback(&self, feedback: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.cumulative_feedback.push(feedback.into());
        next
    }

    /// Most recently appended output, if any.
    pub fn latest_output(&self) -> Option<&Output> {
        self.previous_outputs.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentId {
        AgentId::new(id).unwrap()
    }

    #[test]
    fn agent_id_accepts_dotted_lowercase_pair() {
        assert!(AgentId::new("quality.verifier").is_ok());
        assert!(AgentId::new("architecture.backend_architect").is_ok());
    }

    #[test]
    fn agent_id_rejects_malformed_forms() {
        assert!(AgentId::new("Quality.Verifier").is_err());
        assert!(AgentId::new("quality").is_err());
        assert!(AgentId::new("quality.verifier.extra").is_err());
        assert!(AgentId::new("quality.ver-ifier").is_err());
    }

    #[test]
    fn output_requires_reasoning_and_confidence_in_range() {
        let err = Output::new(
            agent("quality.verifier"),
            Uuid::new_v4(),
            true,
            DataMap::new(),
            "",
            0.5,
            vec![],
            DataMap::new(),
            Utc::now(),
        );
        assert!(err.is_err());

        let err = Output::new(
            agent("quality.verifier"),
            Uuid::new_v4(),
            true,
            DataMap::new(),
            "ok",
            1.5,
            vec![],
            DataMap::new(),
            Utc::now(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn failure_output_requires_next_actions() {
        let err = Output::new(
            agent("quality.verifier"),
            Uuid::new_v4(),
            false,
            DataMap::new(),
            "failed",
            0.0,
            vec![],
            DataMap::new(),
            Utc::now(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn context_rejects_non_monotonic_outputs() {
        let ctx = Context::new();
        let task_id = Uuid::new_v4();
        let early = Output::new(
            agent("quality.verifier"),
            task_id,
            true,
            DataMap::new(),
            "first",
            0.9,
            vec![],
            DataMap::new(),
            Utc::now(),
        )
        .unwrap();
        let ctx = ctx.add_output(early.clone()).unwrap();

        let mut stale = early;
        stale.timestamp -= chrono::Duration::seconds(10);
        assert!(ctx.add_output(stale).is_err());
    }

    #[test]
    fn output_respond_to_correlates() {
        let input = Input::new(
            agent("quality.verifier"),
            Uuid::new_v4(),
            Phase::Planning,
            DataMap::new(),
            Context::new(),
        );
        let output = Output::respond_to(&input, true, DataMap::new(), "ok", 0.9, vec![], DataMap::new()).unwrap();
        assert!(output.correlates_with(&input));
    }
}
