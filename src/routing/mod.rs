//! Routing & DAG Planner (C7).
//!
//! Split into [`planner`] (complexity/selection/strategy/confidence logic,
//! domain→agent table) and [`graph`] (dependency graph + topological batch
//! scheduling). See SPEC_FULL.md §A.6 for the grounding in
//! `agents/architecture/router.py`.

pub mod graph;
pub mod planner;

pub use graph::topological_batches;
pub use planner::{
    complexity_score, confidence, domain_agent_map, execution_strategy, normalize_failed_agents,
    refinement_strategy, select_agents, ExecutionStrategy, OrchestrationState, RefinementStrategy, RoutingDecision,
    RoutingPlanner, ORCHESTRATOR_AGENT_ID,
};
