//! Quality-Gate Verifier (C5).
//!
//! A capability whose `output_data` is a [`VerificationDecision`]. Scoring
//! is delegated to a [`Scorer`] trait so the reference heuristics (ported
//! from `agents/quality/verifier.py`) can be swapped for a stronger
//! implementation without touching the contract: four named dimensions,
//! fixed default weights, and the binary decision rule.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capability::Agent;
use crate::config::{Config, VerifierWeights};
use crate::error::{CoordinationError, Result};
use crate::message::{DataMap, Input, Output};

/// Binary outcome of a verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Sufficient,
    Insufficient,
}

/// The four dimensions a verifier must score, in the order their weights
/// are documented (completeness, constitutional_compliance, test_coverage,
/// spec_alignment).
pub const DIMENSIONS: [&str; 4] = [
    "completeness",
    "constitutional_compliance",
    "test_coverage",
    "spec_alignment",
];

/// Result of scoring one artifact against the quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationDecision {
    pub decision: Decision,
    pub quality_score: f64,
    pub dimension_scores: BTreeMap<String, f64>,
    pub feedback: Vec<String>,
    pub violations: Vec<String>,
    pub passed_checks: Vec<String>,
    pub confidence: f64,
}

impl VerificationDecision {
    /// Build a decision, enforcing `decision = sufficient ⇔ quality_score ≥
    /// threshold` and the non-empty-feedback-on-insufficient rule.
    fn new(
        quality_score: f64,
        threshold: f64,
        dimension_scores: BTreeMap<String, f64>,
        feedback: Vec<String>,
        violations: Vec<String>,
        passed_checks: Vec<String>,
        confidence: f64,
    ) -> Result<Self> {
        let decision = if quality_score >= threshold {
            Decision::Sufficient
        } else {
            Decision::Insufficient
        };
        if decision == Decision::Insufficient && feedback.is_empty() {
            return Err(CoordinationError::invalid_contract(
                "insufficient decision must carry non-empty feedback",
            ));
        }
        Ok(Self {
            decision,
            quality_score,
            dimension_scores,
            feedback,
            violations,
            passed_checks,
            confidence,
        })
    }

    /// Synthesize an insufficient decision for a verifier invocation that
    /// itself failed (a `CapabilityFailure`) — treated as quality 0 so the
    /// refinement loop's EMA degrades rather than stalling.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Insufficient,
            quality_score: 0.0,
            dimension_scores: BTreeMap::new(),
            feedback: vec![reason.into()],
            violations: Vec::new(),
            passed_checks: Vec::new(),
            confidence: 0.7,
        }
    }
}

/// Scores an artifact across the four quality dimensions. Implementors may
/// replace the reference heuristics entirely; only the `[0,1]` range is
/// required.
pub trait Scorer: Send + Sync {
    fn completeness(&self, artifact: &str, artifact_type: &str) -> (f64, Vec<String>);
    fn constitutional_compliance(&self, artifact: &str) -> (f64, Vec<String>);
    fn test_coverage(&self, artifact: &str, artifact_type: &str) -> f64;
    fn spec_alignment(&self, artifact: &str, spec_text: Option<&str>) -> f64;
}

/// Reference scorer ported from the original `VerificationAgent`: presence
/// of required section markers, presence of keyword families, a
/// test-to-function ratio heuristic, and keyword overlap with a referenced
/// spec file.
#[derive(Debug, Default)]
pub struct ReferenceScorer;

impl ReferenceScorer {
    fn required_markers(artifact_type: &str) -> &'static [&'static str] {
        match artifact_type {
            "specification" => &["# Requirements", "# Architecture", "# Non-goals"],
            "plan" => &["# Tasks", "# Dependencies", "# Milestones"],
            "code" => &["fn ", "struct "],
            "test" => &["#[test]", "assert"],
            _ => &[],
        }
    }

    const COMPLIANCE_KEYWORD_FAMILIES: [&'static [&'static str]; 4] = [
        &["test", "assert", "verify"],
        &["error", "result", "panic"],
        &["contract", "invariant", "validate"],
        &["pub fn", "pub struct", "trait"],
    ];
}

impl Scorer for ReferenceScorer {
    fn completeness(&self, artifact: &str, artifact_type: &str) -> (f64, Vec<String>) {
        let markers = Self::required_markers(artifact_type);
        if markers.is_empty() {
            return (1.0, Vec::new());
        }
        let mut missing = Vec::new();
        let mut present = 0usize;
        for marker in markers {
            if artifact.contains(marker) {
                present += 1;
            } else {
                missing.push(format!("missing expected marker '{marker}'"));
            }
        }
        (present as f64 / markers.len() as f64, missing)
    }

    fn constitutional_compliance(&self, artifact: &str) -> (f64, Vec<String>) {
        let lower = artifact.to_lowercase();
        let mut present = 0usize;
        let mut missing = Vec::new();
        for family in Self::COMPLIANCE_KEYWORD_FAMILIES {
            if family.iter().any(|kw| lower.contains(kw)) {
                present += 1;
            } else {
                missing.push(format!("no keyword from family {family:?} found"));
            }
        }
        (present as f64 / Self::COMPLIANCE_KEYWORD_FAMILIES.len() as f64, missing)
    }

    fn test_coverage(&self, artifact: &str, artifact_type: &str) -> f64 {
        if artifact_type != "code" && artifact_type != "test" {
            return 1.0;
        }
        let test_count = artifact.matches("#[test]").count();
        let function_count = artifact.matches("fn ").count().max(1);
        if test_count == 0 {
            return 0.0;
        }
        let ratio = test_count as f64 / function_count as f64;
        ratio.clamp(0.0, 1.0)
    }

    fn spec_alignment(&self, artifact: &str, spec_text: Option<&str>) -> f64 {
        let Some(spec_text) = spec_text else {
            return 0.90;
        };
        let key_terms: Vec<&str> = spec_text
            .split_whitespace()
            .filter(|w| w.len() > 4)
            .collect();
        if key_terms.is_empty() {
            return 0.90;
        }
        let lower = artifact.to_lowercase();
        let matching = key_terms
            .iter()
            .filter(|term| lower.contains(&term.to_lowercase()))
            .count();
        (matching as f64 / key_terms.len() as f64 + 0.5).min(1.0)
    }
}

/// Variance-derived confidence: tight clustering of dimension scores (near
/// 0 or near 1) yields high confidence, scattered scores yield low
/// confidence. Floored at 0.7, capped at 0.99.
fn calculate_confidence(scores: &BTreeMap<String, f64>) -> f64 {
    if scores.is_empty() {
        return 0.7;
    }
    let mean = scores.values().sum::<f64>() / scores.len() as f64;
    let variance = scores.values().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    (1.0 - variance).clamp(0.7, 0.99)
}

/// The Quality-Gate Verifier capability.
pub struct QualityGateVerifier {
    id: String,
    config: Config,
    scorer: Box<dyn Scorer>,
}

impl QualityGateVerifier {
    pub fn new(config: Config) -> Self {
        Self {
            id: "quality.verifier".to_string(),
            config,
            scorer: Box::new(ReferenceScorer),
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Score `artifact` (of `artifact_type`) against `phase`'s threshold,
    /// optionally checking alignment against `spec_text`.
    pub fn verify(
        &self,
        artifact: &str,
        artifact_type: &str,
        phase: crate::message::Phase,
        spec_text: Option<&str>,
        threshold_override: Option<f64>,
    ) -> Result<VerificationDecision> {
        let weights: VerifierWeights = self.config.verifier_weights;
        if !weights.is_valid() {
            return Err(CoordinationError::invalid_contract(
                "verifier weights must sum to 1 within tolerance",
            ));
        }

        let (completeness, mut violations) = self.scorer.completeness(artifact, artifact_type);
        let (compliance, compliance_violations) = self.scorer.constitutional_compliance(artifact);
        violations.extend(compliance_violations);
        let test_coverage = self.scorer.test_coverage(artifact, artifact_type);
        let spec_alignment = self.scorer.spec_alignment(artifact, spec_text);

        let mut dimension_scores = BTreeMap::new();
        dimension_scores.insert("completeness".to_string(), completeness);
        dimension_scores.insert("constitutional_compliance".to_string(), compliance);
        dimension_scores.insert("test_coverage".to_string(), test_coverage);
        dimension_scores.insert("spec_alignment".to_string(), spec_alignment);

        let quality_score = completeness * weights.completeness
            + compliance * weights.constitutional_compliance
            + test_coverage * weights.test_coverage
            + spec_alignment * weights.spec_alignment;

        let threshold = threshold_override.unwrap_or_else(|| self.config.threshold_for_phase(phase));

        let mut feedback = Vec::new();
        let mut passed_checks = Vec::new();
        for dimension in DIMENSIONS {
            let score = dimension_scores[dimension];
            if score >= threshold {
                passed_checks.push(format!("{dimension} meets threshold ({score:.2} >= {threshold:.2})"));
            } else {
                feedback.push(format!("{dimension} below threshold: {score:.2} < {threshold:.2}"));
            }
        }
        if quality_score < threshold && feedback.is_empty() {
            feedback.push(format!(
                "aggregate quality {quality_score:.2} below threshold {threshold:.2}"
            ));
        }

        let confidence = calculate_confidence(&dimension_scores);

        VerificationDecision::new(
            quality_score,
            threshold,
            dimension_scores,
            feedback,
            violations,
            passed_checks,
            confidence,
        )
    }
}

#[async_trait]
impl Agent for QualityGateVerifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, input: Input) -> Result<Output> {
        let artifact = input
            .input_data
            .get("artifact")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoordinationError::invalid_contract("verifier input_data missing 'artifact'"))?;
        let artifact_type = input
            .input_data
            .get("artifact_type")
            .and_then(|v| v.as_str())
            .unwrap_or("code");
        let spec_text = input.input_data.get("spec_text").and_then(|v| v.as_str());
        let threshold_override = input.input_data.get("threshold").and_then(|v| v.as_f64());

        let decision = self.verify(artifact, artifact_type, input.phase, spec_text, threshold_override)?;

        let mut output_data = DataMap::new();
        output_data.insert("decision".to_string(), json!(decision));

        let reasoning = format!(
            "quality_score={:.3} decision={:?}",
            decision.quality_score, decision.decision
        );
        let next_actions = if decision.decision == Decision::Insufficient {
            decision.feedback.clone()
        } else {
            Vec::new()
        };
        let success = decision.decision == Decision::Sufficient;

        Output::new(
            input.agent_id.clone(),
            input.task_id,
            success,
            output_data,
            reasoning,
            decision.confidence,
            next_actions,
            DataMap::new(),
            chrono::Utc::now(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AgentId, Context, Phase};
    use uuid::Uuid;

    #[test]
    fn insufficient_decision_always_carries_feedback() {
        let verifier = QualityGateVerifier::new(Config::default());
        let decision = verifier
            .verify("", "specification", Phase::Specification, None, None)
            .unwrap();
        assert_eq!(decision.decision, Decision::Insufficient);
        assert!(!decision.feedback.is_empty());
    }

    #[test]
    fn decision_matches_threshold_rule() {
        let verifier = QualityGateVerifier::new(Config::default());
        let artifact = "# Requirements\n# Architecture\n# Non-goals\ntest assert contract invariant pub fn trait error";
        let decision = verifier
            .verify(artifact, "specification", Phase::Specification, None, None)
            .unwrap();
        assert_eq!(
            decision.decision == Decision::Sufficient,
            decision.quality_score >= 0.90
        );
    }

    #[tokio::test]
    async fn invoke_requires_artifact_field() {
        let verifier = QualityGateVerifier::new(Config::default());
        let agent_id = AgentId::new("quality.verifier").unwrap();
        let input = Input::new(agent_id, Uuid::new_v4(), Phase::Implementation, DataMap::new(), Context::new());
        assert!(verifier.invoke(input).await.is_err());
    }
}
