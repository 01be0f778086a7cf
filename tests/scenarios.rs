//! End-to-end scenario tests exercising C6/C7/C8 together, mirroring the
//! literal scenarios and universal invariants named in SPEC_FULL.md §8.

use std::collections::HashSet;
use std::sync::Arc;

use coordination::autodebug::{self, ErrorPattern};
use coordination::config::Config;
use coordination::refinement::{RefinementLoopController, RefinementOutcome};
use coordination::routing::{self, ExecutionStrategy, OrchestrationState, RefinementStrategy, RoutingPlanner};
use coordination::verifier::QualityGateVerifier;
use uuid::Uuid;

#[test]
fn routing_scenario_three_domains_prepends_orchestrator_and_schedules_dag() {
    let dir = tempfile::tempdir().unwrap();
    let planner = RoutingPlanner::new(dir.path());
    let task_id = Uuid::new_v4();
    let domains = vec!["frontend".to_string(), "backend".to_string(), "database".to_string()];

    let decision = planner
        .plan(task_id, "build a user list page", &domains, &OrchestrationState::default())
        .unwrap();

    assert_eq!(decision.execution_strategy, ExecutionStrategy::Dag);
    assert_eq!(decision.refinement_strategy, Some(RefinementStrategy::RetryWithFeedback));
    assert_eq!(decision.selected_agents[0], routing::ORCHESTRATOR_AGENT_ID);

    let batches = decision.batches().unwrap().expect("dag strategy produces batches");
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1], vec!["architecture.frontend_specialist".to_string()]);
}

#[test]
fn routing_scenario_dependency_keyword_with_failure_excludes_completed() {
    let dir = tempfile::tempdir().unwrap();
    let planner = RoutingPlanner::new(dir.path());
    let task_id = Uuid::new_v4();
    let domains = vec!["backend".to_string(), "testing".to_string()];

    let mut completed = HashSet::new();
    completed.insert("architecture.backend_specialist".to_string());

    let state = OrchestrationState {
        completed_agents: completed,
        failed_agents: vec![serde_json::json!({"agent_id": "architecture.backend_specialist"})],
    };

    let decision = planner
        .plan(task_id, "implement login, then write tests", &domains, &state)
        .unwrap();

    assert_eq!(decision.execution_strategy, ExecutionStrategy::Dag);
    assert!(!decision.selected_agents.contains(&"architecture.backend_specialist".to_string()));
    assert_eq!(decision.refinement_strategy, Some(RefinementStrategy::RetryWithFeedback));
}

struct ScriptedVerifier {
    scores: Vec<f64>,
}

#[async_trait::async_trait]
impl coordination::Agent for ScriptedVerifier {
    fn id(&self) -> &str {
        "quality.verifier"
    }

    async fn invoke(&self, input: coordination::Input) -> coordination::Result<coordination::Output> {
        use coordination::message::DataMap;
        let round = input
            .input_data
            .get("round_hint")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let score = *self.scores.get(round.min(self.scores.len() - 1)).unwrap();

        let decision = serde_json::json!({
            "decision": if score >= 0.85 { "sufficient" } else { "insufficient" },
            "quality_score": score,
            "dimension_scores": {},
            "feedback": if score >= 0.85 { Vec::<String>::new() } else { vec!["keep improving".to_string()] },
            "violations": Vec::<String>::new(),
            "passed_checks": Vec::<String>::new(),
            "confidence": 0.8,
        });

        let mut output_data = DataMap::new();
        output_data.insert("decision".to_string(), decision);
        coordination::Output::new(
            input.agent_id,
            input.task_id,
            score >= 0.85,
            output_data,
            "scored",
            0.8,
            if score >= 0.85 { vec![] } else { vec!["retry".to_string()] },
            DataMap::new(),
            chrono::Utc::now(),
        )
    }
}

#[tokio::test]
async fn refinement_escalates_after_max_rounds_on_persistent_low_score() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("artifact.rs");
    std::fs::write(&artifact, "fn placeholder() {}").unwrap();

    let mut config = Config::default();
    config.max_refinement_rounds = 4;
    let controller = RefinementLoopController::new(config, dir.path().join("state"));
    let verifier: Arc<dyn coordination::Agent> = Arc::new(ScriptedVerifier { scores: vec![0.1; 10] });

    let outcome = controller
        .run(
            Uuid::new_v4(),
            coordination::Phase::Implementation,
            &artifact,
            "code",
            verifier,
            None,
            None,
            None,
        )
        .await
        .unwrap();

    match outcome {
        RefinementOutcome::Escalated { state, escalation_path } => {
            assert_eq!(state.current_round, 4);
            assert!(state.ema_quality < state.quality_threshold);
            let report = std::fs::read_to_string(escalation_path).unwrap();
            assert!(report.contains("Escalation report"));
        }
        _ => panic!("expected an escalation"),
    }
}

#[tokio::test]
async fn refinement_with_real_verifier_tracks_ema_invariants() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("artifact.md");
    std::fs::write(
        &artifact,
        "# Requirements\n# Architecture\n# Non-goals\ntest assert contract invariant pub fn trait error",
    )
    .unwrap();
    let spec = dir.path().join("spec.md");
    std::fs::write(&spec, "architecture requirements contract invariant testing coverage").unwrap();

    let config = Config::default();
    let verifier: Arc<dyn coordination::Agent> = Arc::new(QualityGateVerifier::new(config.clone()));
    let controller = RefinementLoopController::new(config, dir.path().join("state"));
    let context = coordination::Context::new().with_spec_path(spec.to_string_lossy().into_owned());

    let outcome = controller
        .run(
            Uuid::new_v4(),
            coordination::Phase::Specification,
            &artifact,
            "specification",
            verifier,
            Some(context),
            None,
            None,
        )
        .await
        .unwrap();

    let state = outcome.state();
    assert_eq!(state.iterations.len(), state.current_round as usize);
    for (index, iteration) in state.iterations.iter().enumerate() {
        assert_eq!(iteration.round, index as u32 + 1);
    }

    // The supplied spec file overlaps with the artifact on four of its six
    // key terms ("architecture", "requirements", "contract", "invariant"),
    // so spec_alignment must diverge from the no-spec-text default of 0.90.
    let first_alignment = state.iterations[0].verification_result.dimension_scores["spec_alignment"];
    assert!((first_alignment - 0.90).abs() > 1e-6, "expected spec_text to move spec_alignment off its default");
    assert!(state.iterations[0].input_state.contains_key("spec_text"));
}

#[test]
fn autodebug_scenario_syntax_error_succeeds_first_attempt() {
    let session = autodebug::debug(
        Uuid::new_v4(),
        "fn broken() { foo(bar(1, 2)",
        "SyntaxError: unexpected EOF while parsing",
        None,
        None,
    )
    .unwrap();

    assert!(session.success);
    assert!(!session.escalated);
    assert_eq!(session.total_iterations, 1);
    assert_eq!(session.error_pattern, ErrorPattern::Syntax);
}

#[test]
fn autodebug_scenario_logic_error_escalates() {
    let session = autodebug::debug(
        Uuid::new_v4(),
        "assert result == expected;",
        "AssertionError: expected 4 but got 5",
        None,
        None,
    )
    .unwrap();

    assert!(!session.success);
    assert!(session.escalated);
    assert!(session.escalation_context.is_some());
    assert_eq!(session.total_iterations, 5);
}

#[test]
fn debug_session_invariant_total_iterations_matches_attempts() {
    let session = autodebug::debug(Uuid::new_v4(), "x", "NoneType has no attribute 'y'", None, None).unwrap();
    assert_eq!(session.total_iterations as usize, session.attempts.len());
    assert!(!(session.success && session.escalated));
}
