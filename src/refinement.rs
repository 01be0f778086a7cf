//! Refinement Loop Controller (C6) — CORE.
//!
//! Drives an artifact toward a phase-specific quality threshold, grounded on
//! the original `RefinementEngine.refine_until_sufficient` loop: bounded
//! iterations, EMA-smoothed quality, early-stop / success / escalate
//! decision points, and a human-readable escalation document written
//! alongside the state file when the loop is exhausted.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::capability::Agent;
use crate::config::Config;
use crate::error::{CoordinationError, Result};
use crate::message::{Context, DataMap, Input, Phase};
use crate::store;
use crate::verifier::VerificationDecision;

/// One completed pass through the loop body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub round: u32,
    pub timestamp: DateTime<Utc>,
    pub input_state: DataMap,
    pub output_state: DataMap,
    pub verification_result: VerificationDecision,
    pub quality_score: f64,
    pub duration_seconds: f64,
    pub agent_invocations: Vec<String>,
}

/// Durable, logically-monotonic refinement progress for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementState {
    pub task_id: Uuid,
    pub phase: Phase,
    pub current_round: u32,
    pub max_rounds: u32,
    pub iterations: Vec<IterationRecord>,
    pub cumulative_feedback: Vec<String>,
    pub ema_quality: f64,
    pub quality_threshold: f64,
    pub early_stopping_threshold: f64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefinementState {
    fn fresh(task_id: Uuid, phase: Phase, config: &Config) -> Result<Self> {
        let quality_threshold = config.threshold_for_phase(phase);
        let early_stopping_threshold = config.early_stop_threshold;
        if quality_threshold >= early_stopping_threshold {
            return Err(CoordinationError::invalid_contract(
                "quality_threshold must be below early_stopping_threshold",
            ));
        }
        let now = Utc::now();
        Ok(Self {
            task_id,
            phase,
            current_round: 0,
            max_rounds: config.max_refinement_rounds,
            iterations: Vec::new(),
            cumulative_feedback: Vec::new(),
            ema_quality: 0.0,
            quality_threshold,
            early_stopping_threshold,
            started_at: now,
            updated_at: now,
        })
    }

    fn can_continue(&self) -> bool {
        self.current_round < self.max_rounds
            && self.ema_quality < self.early_stopping_threshold
            && self.ema_quality < self.quality_threshold
    }
}

/// Terminal outcome of a refinement run.
#[derive(Debug, Clone)]
pub enum RefinementOutcome {
    EarlyStop(RefinementState),
    Success(RefinementState),
    Escalated {
        state: RefinementState,
        escalation_path: PathBuf,
    },
    Cancelled(RefinementState),
}

impl RefinementOutcome {
    pub fn state(&self) -> &RefinementState {
        match self {
            Self::EarlyStop(s) | Self::Success(s) | Self::Cancelled(s) => s,
            Self::Escalated { state, .. } => state,
        }
    }
}

/// Drives one task's artifact through the bounded refinement loop.
pub struct RefinementLoopController {
    config: Config,
    state_dir: PathBuf,
}

impl RefinementLoopController {
    pub fn new(config: Config, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            state_dir: state_dir.into(),
        }
    }

    /// Run the loop. `verifier` is invoked once per iteration with the
    /// current artifact contents; `context`, if given, seeds the shared
    /// context carried into every iteration's `Input` (its `spec_path`, when
    /// set, is read fresh each round and passed to the verifier as
    /// `spec_text`) and is extended with each iteration's output and
    /// feedback via `Context::add_output`/`add_feedback`. `refinement_hook`,
    /// if provided, is called after an iteration that neither stopped nor
    /// escalated, so the caller can mutate the artifact using the
    /// accumulated feedback before the next round. `cancel` is polled at the
    /// top of every iteration.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        task_id: Uuid,
        phase: Phase,
        artifact_path: &Path,
        artifact_type: &str,
        verifier: Arc<dyn Agent>,
        context: Option<Context>,
        refinement_hook: Option<&(dyn Fn(&RefinementState) -> Result<()> + Send + Sync)>,
        cancel: Option<&AtomicBool>,
    ) -> Result<RefinementOutcome> {
        let mut state = store::load::<RefinementState>(&self.state_dir, task_id)?
            .map(Ok)
            .unwrap_or_else(|| RefinementState::fresh(task_id, phase, &self.config))?;
        let mut context = context.unwrap_or_default();

        while state.can_continue() {
            if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                store::save(&self.state_dir, task_id, &state)?;
                tracing::info!(task_id = %task_id, round = state.current_round, "refinement cancelled");
                return Ok(RefinementOutcome::Cancelled(state));
            }

            let started = Instant::now();
            let artifact = std::fs::read_to_string(artifact_path)
                .map_err(|e| CoordinationError::invalid_contract(format!("artifact path unreadable: {e}")))?;
            let spec_text = match &context.spec_path {
                Some(path) => Some(
                    std::fs::read_to_string(path)
                        .map_err(|e| CoordinationError::invalid_contract(format!("spec path unreadable: {e}")))?,
                ),
                None => None,
            };

            let verifier_agent_id = crate::message::AgentId::new(verifier.id())?;
            let mut input_data = DataMap::new();
            input_data.insert("artifact".to_string(), json!(artifact));
            input_data.insert("artifact_type".to_string(), json!(artifact_type));
            if let Some(spec_text) = &spec_text {
                input_data.insert("spec_text".to_string(), json!(spec_text));
            }

            let input = Input::new(verifier_agent_id, task_id, phase, input_data.clone(), context.clone());

            let output = verifier.invoke(input).await?;
            let decision: VerificationDecision = output
                .output_data
                .get("decision")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_else(|| VerificationDecision::failed(output.reasoning.clone()));

            let duration_seconds = started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);

            let mut output_state = DataMap::new();
            output_state.insert("success".to_string(), json!(output.success));

            let record = IterationRecord {
                round: state.current_round + 1,
                timestamp: Utc::now(),
                input_state: input_data,
                output_state,
                quality_score: decision.quality_score,
                verification_result: decision.clone(),
                duration_seconds,
                agent_invocations: vec![verifier.id().to_string()],
            };

            state.iterations.push(record);
            state.cumulative_feedback.extend(decision.feedback.clone());
            state.ema_quality = 0.3 * decision.quality_score + 0.7 * state.ema_quality;
            state.current_round += 1;
            state.updated_at = Utc::now();
            store::save(&self.state_dir, task_id, &state)?;

            context = context.add_output(output)?;
            for feedback in &decision.feedback {
                context = context.add_feedback(feedback.clone());
            }

            tracing::info!(
                task_id = %task_id,
                round = state.current_round,
                ema_quality = state.ema_quality,
                "refinement iteration complete"
            );

            if state.ema_quality >= state.early_stopping_threshold {
                return Ok(RefinementOutcome::EarlyStop(state));
            }
            if state.ema_quality >= state.quality_threshold {
                return Ok(RefinementOutcome::Success(state));
            }
            if state.current_round == state.max_rounds {
                let escalation_path = self.escalate(&state, artifact_path)?;
                return Ok(RefinementOutcome::Escalated { state, escalation_path });
            }

            if let Some(hook) = refinement_hook {
                hook(&state)?;
            }
        }

        // Reached when a resumed, already-sufficient state is loaded fresh.
        Ok(RefinementOutcome::Success(state))
    }

    fn escalate(&self, state: &RefinementState, artifact_path: &Path) -> Result<PathBuf> {
        tracing::warn!(task_id = %state.task_id, "refinement exhausted max_rounds, escalating");

        let mut report = String::new();
        report.push_str(&format!("Escalation report for task {}\n", state.task_id));
        report.push_str(&format!("Phase: {}\n", state.phase));
        report.push_str(&format!("Artifact: {}\n", artifact_path.display()));
        report.push_str(&format!(
            "Quality gap: ema_quality={:.3} threshold={:.3}\n\n",
            state.ema_quality, state.quality_threshold
        ));
        report.push_str("Iteration history:\n");
        for iteration in &state.iterations {
            report.push_str(&format!(
                "  round {}: quality_score={:.3} decision={:?}\n",
                iteration.round, iteration.quality_score, iteration.verification_result.decision
            ));
        }
        report.push_str("\nCumulative feedback:\n");
        for feedback in &state.cumulative_feedback {
            report.push_str(&format!("  - {feedback}\n"));
        }

        store::write_text(&self.state_dir, &format!("{}_escalation.txt", state.task_id), &report)
    }
}
