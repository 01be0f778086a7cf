//! Routing & DAG Planner (C7) — CORE.
//!
//! Grounded on the original `RouterAgent`: a static domain→agent table, a
//! complexity score from domain count / description length / keyword
//! presence, agent selection with completed/failed-agent bookkeeping, an
//! execution-strategy decision tree, a hardcoded dependency rule table, and
//! a confidence formula — all constants confirmed against
//! `agents/architecture/router.py`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoordinationError, Result};
use crate::message::AgentId;
use crate::routing::graph::topological_batches;
use crate::store;

/// Fixed agent id prepended when a task spans three or more domains.
pub const ORCHESTRATOR_AGENT_ID: &str = "architecture.orchestrator";

const COMPLEXITY_KEYWORDS: [&str; 6] = ["integration", "multi", "complex", "system", "architecture", "workflow"];

const DEPENDENCY_KEYWORDS: [&str; 10] = [
    "after",
    "before",
    "depends on",
    "requires",
    "first",
    "then",
    "prerequisite",
    "following",
    "once",
    "when",
];

/// Static domain→agent table (spec.md §6: "implementers must expose it as
/// data, not hard-coded switch statements").
pub fn domain_agent_map() -> BTreeMap<&'static str, &'static str> {
    [
        ("frontend", "architecture.frontend_specialist"),
        ("backend", "architecture.backend_specialist"),
        ("database", "architecture.database_specialist"),
        ("testing", "quality.testing_specialist"),
        ("security", "security.security_specialist"),
        ("performance", "performance.performance_specialist"),
        ("devops", "devops.devops_specialist"),
        ("specification", "architecture.specification_specialist"),
        ("planning", "architecture.planning_specialist"),
        ("tasks", "architecture.tasks_specialist"),
        ("orchestration", ORCHESTRATOR_AGENT_ID),
    ]
    .into_iter()
    .collect()
}

/// Hardcoded dependency rule table, keyed and valued by domain name (not
/// agent id — translated to agent ids once the domain map is applied).
fn dependency_rule_table() -> BTreeMap<&'static str, &'static [&'static str]> {
    [
        ("frontend", &["backend", "database"] as &[&str]),
        ("testing", &["frontend", "backend"]),
        ("security", &["backend"]),
        ("devops", &["testing"]),
    ]
    .into_iter()
    .collect()
}

/// How a batch of agents should be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
    Dag,
}

/// What to do about the next attempt when the current one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStrategy {
    AddStep,
    TruncateFrom,
    RouteToDebug,
    RetryWithFeedback,
}

/// The planner's output for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected_agents: Vec<String>,
    pub execution_strategy: ExecutionStrategy,
    pub dependency_graph: Option<BTreeMap<String, BTreeSet<String>>>,
    pub refinement_strategy: Option<RefinementStrategy>,
    pub reasoning: String,
    pub confidence: f64,
    pub estimated_duration: Option<f64>,
}

impl RoutingDecision {
    fn validate(self) -> Result<Self> {
        if self.selected_agents.is_empty() {
            return Err(CoordinationError::invalid_contract("selected_agents must be non-empty"));
        }
        if self.execution_strategy == ExecutionStrategy::Dag {
            let Some(graph) = &self.dependency_graph else {
                return Err(CoordinationError::invalid_contract("dag strategy requires a dependency_graph"));
            };
            let known: HashSet<&str> = self.selected_agents.iter().map(|s| s.as_str()).collect();
            for (node, deps) in graph {
                if !known.contains(node.as_str()) {
                    return Err(CoordinationError::invalid_contract(format!(
                        "dependency_graph node '{node}' not in selected_agents"
                    )));
                }
                for dep in deps {
                    if !known.contains(dep.as_str()) {
                        return Err(CoordinationError::invalid_contract(format!(
                            "dependency_graph edge '{node}' -> '{dep}' references an agent outside selected_agents"
                        )));
                    }
                }
            }
            topological_batches(&self.selected_agents, graph)?;
        }
        Ok(self)
    }

    /// The topological batch schedule, when `execution_strategy=dag`.
    /// `None` for sequential/parallel strategies.
    pub fn batches(&self) -> Result<Option<Vec<Vec<String>>>> {
        if self.execution_strategy != ExecutionStrategy::Dag {
            return Ok(None);
        }
        let graph = self.dependency_graph.clone().unwrap_or_default();
        Ok(Some(topological_batches(&self.selected_agents, &graph)?))
    }
}

/// Normalize a mixed string-or-object failed-agent list into a set of agent
/// ids (spec.md §9, Open Question: "Failed-agent input shape is mixed").
pub fn normalize_failed_agents(failed_agents: &[Value]) -> HashSet<String> {
    failed_agents
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("agent_id").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        })
        .collect()
}

/// Complexity score in `[0,1]`: domain count (cap 0.4), description length
/// (cap 0.3), and 0.05 per complexity keyword present, overall capped at 1.
pub fn complexity_score(domains: &[String], description: &str) -> f64 {
    let domain_component = (domains.len() as f64 * 0.1).min(0.4);
    let word_count = description.split_whitespace().count();
    let length_component = ((word_count as f64 / 100.0) * 0.3).min(0.3);
    let lower = description.to_lowercase();
    let keyword_component = COMPLEXITY_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count() as f64 * 0.05;
    (domain_component + length_component + keyword_component).min(1.0)
}

/// Select specialist agents for `domains`, deduplicating while preserving
/// first-occurrence order, skipping already-completed agents, and
/// prepending the orchestrator when three or more domains are involved.
pub fn select_agents(domains: &[String], completed_agents: &HashSet<String>) -> Vec<String> {
    let map = domain_agent_map();
    let mut selected = Vec::new();
    let mut seen = HashSet::new();

    for domain in domains {
        if let Some(&agent_id) = map.get(domain.as_str()) {
            if seen.insert(agent_id) && !completed_agents.contains(agent_id) {
                selected.push(agent_id.to_string());
            }
        }
    }

    if domains.len() >= 3 && !completed_agents.contains(ORCHESTRATOR_AGENT_ID) {
        if let Some(pos) = selected.iter().position(|a| a == ORCHESTRATOR_AGENT_ID) {
            selected.remove(pos);
        }
        selected.insert(0, ORCHESTRATOR_AGENT_ID.to_string());
    }

    selected
}

fn has_dependency_keyword(description: &str) -> bool {
    let lower = description.to_lowercase();
    DEPENDENCY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Decide sequential / parallel / dag for the selected agent set.
pub fn execution_strategy(selected: &[String], complexity: f64, description: &str) -> ExecutionStrategy {
    if selected.len() <= 1 {
        return ExecutionStrategy::Sequential;
    }
    if complexity > 0.6 || has_dependency_keyword(description) {
        return ExecutionStrategy::Dag;
    }
    if selected.len() >= 2 && complexity < 0.4 {
        return ExecutionStrategy::Parallel;
    }
    ExecutionStrategy::Dag
}

/// Build the agent-id-keyed dependency graph for the agents actually
/// selected, applying the domain-level rule table and keeping only edges
/// whose endpoints are both selected.
pub fn build_dependency_graph(domains: &[String], selected: &[String]) -> BTreeMap<String, BTreeSet<String>> {
    let domain_map = domain_agent_map();
    let rules = dependency_rule_table();
    let selected_set: HashSet<&str> = selected.iter().map(|s| s.as_str()).collect();

    let mut graph = BTreeMap::new();
    for domain in domains {
        let Some(&agent_id) = domain_map.get(domain.as_str()) else { continue };
        if !selected_set.contains(agent_id) {
            continue;
        }
        let Some(dep_domains) = rules.get(domain.as_str()) else { continue };
        let mut deps = BTreeSet::new();
        for dep_domain in *dep_domains {
            if let Some(&dep_agent_id) = domain_map.get(dep_domain) {
                if selected_set.contains(dep_agent_id) {
                    deps.insert(dep_agent_id.to_string());
                }
            }
        }
        if !deps.is_empty() {
            graph.insert(agent_id.to_string(), deps);
        }
    }
    graph
}

/// Decide the refinement strategy for the *next* attempt given prior
/// failures and task complexity.
pub fn refinement_strategy(failed_agents: &HashSet<String>, complexity: f64) -> RefinementStrategy {
    match failed_agents.len() {
        0 => RefinementStrategy::RetryWithFeedback,
        1 if complexity > 0.7 => RefinementStrategy::AddStep,
        1 => RefinementStrategy::RetryWithFeedback,
        _ => RefinementStrategy::RouteToDebug,
    }
}

/// Confidence: base 0.95, minus `0.15·complexity`, minus `0.05` per domain
/// beyond the first two, floored at 0.7.
pub fn confidence(complexity: f64, domain_count: usize) -> f64 {
    let penalty = 0.15 * complexity + 0.05 * (domain_count.saturating_sub(2)) as f64;
    (0.95 - penalty).max(0.7)
}

/// Current orchestration state the planner consults when making a
/// decision.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationState {
    pub completed_agents: HashSet<String>,
    pub failed_agents: Vec<Value>,
}

/// Stateless planning logic plus a persistence layer keyed by task id.
pub struct RoutingPlanner {
    decisions_dir: std::path::PathBuf,
}

impl RoutingPlanner {
    pub fn new(decisions_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            decisions_dir: decisions_dir.into(),
        }
    }

    /// Produce and persist a routing decision for `task_id`.
    pub fn plan(
        &self,
        task_id: uuid::Uuid,
        description: &str,
        domains: &[String],
        state: &OrchestrationState,
    ) -> Result<RoutingDecision> {
        let complexity = complexity_score(domains, description);
        let selected = select_agents(domains, &state.completed_agents);
        if selected.is_empty() {
            return Err(CoordinationError::invalid_contract(
                "routing produced an empty selected_agents list",
            ));
        }

        let strategy = execution_strategy(&selected, complexity, description);
        let dependency_graph = if strategy == ExecutionStrategy::Dag {
            Some(build_dependency_graph(domains, &selected))
        } else {
            None
        };

        let failed = normalize_failed_agents(&state.failed_agents);
        let refinement = refinement_strategy(&failed, complexity);
        let conf = confidence(complexity, domains.len());

        let reasoning = format!(
            "complexity={complexity:.2} domains={domain_count} strategy={strategy:?} failures={failure_count}",
            domain_count = domains.len(),
            failure_count = failed.len(),
        );

        let decision = RoutingDecision {
            selected_agents: selected,
            execution_strategy: strategy,
            dependency_graph,
            refinement_strategy: Some(refinement),
            reasoning,
            confidence: conf,
            estimated_duration: None,
        }
        .validate()?;

        store::save(&self.decisions_dir, task_id, &decision)?;
        tracing::info!(task_id = %task_id, strategy = ?decision.execution_strategy, "routing decision persisted");
        Ok(decision)
    }
}

/// Validate an [`AgentId`]-shaped string; routing deals in plain strings
/// internally (table keys, graph nodes) but the contract in §3 is the
/// dotted `AgentId` format.
pub fn validate_agent_id(id: &str) -> Result<AgentId> {
    AgentId::new(id)
}
