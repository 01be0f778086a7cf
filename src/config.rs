//! Orchestrator configuration, loaded once at startup.
//!
//! Follows the environment-variable overlay pattern: start from defaults,
//! then apply any recognized environment variable on top. Unparseable
//! numeric values are logged and the default is kept; unknown keys are
//! simply never read, which is the tolerant "ignored with a warning"
//! behavior the external config loader is expected to provide.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default per-dimension verifier weights (must sum to 1 ± 0.01).
pub const DEFAULT_VERIFIER_WEIGHTS: VerifierWeights = VerifierWeights {
    completeness: 0.25,
    constitutional_compliance: 0.30,
    test_coverage: 0.25,
    spec_alignment: 0.20,
};

/// Weights used to combine per-dimension verifier scores into one quality
/// score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerifierWeights {
    pub completeness: f64,
    pub constitutional_compliance: f64,
    pub test_coverage: f64,
    pub spec_alignment: f64,
}

impl VerifierWeights {
    /// True if the four weights sum to 1 within the tolerance the contract
    /// requires.
    pub fn is_valid(&self) -> bool {
        let total =
            self.completeness + self.constitutional_compliance + self.test_coverage + self.spec_alignment;
        (total - 1.0).abs() <= 0.01
    }
}

/// Per-phase quality thresholds used by the refinement loop controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseThresholds {
    pub specification: f64,
    pub planning: f64,
    pub implementation: f64,
    pub validation: f64,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            specification: 0.90,
            planning: 0.85,
            implementation: 0.80,
            validation: 0.80,
        }
    }
}

/// Orchestrator-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Hard cap on refinement loop iterations.
    pub max_refinement_rounds: u32,
    /// EMA quality level that triggers an early stop.
    pub early_stop_threshold: f64,
    /// Per-phase quality thresholds.
    pub phase_thresholds: PhaseThresholds,
    /// Per-dimension verifier weights.
    pub verifier_weights: VerifierWeights,
    /// Feedback history size that triggers an archival recommendation.
    pub feedback_archive_threshold: usize,
    /// Root directory for the on-disk persistence layout (§6).
    pub state_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_refinement_rounds: 20,
            early_stop_threshold: 0.95,
            phase_thresholds: PhaseThresholds::default(),
            verifier_weights: DEFAULT_VERIFIER_WEIGHTS,
            feedback_archive_threshold: 1000,
            state_root: PathBuf::from("./.coord-state"),
        }
    }
}

impl Config {
    /// Build configuration from environment variables, overlaying the
    /// defaults. Recognized keys are documented in SPEC_FULL.md §A.3.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MAX_REFINEMENT_ROUNDS") {
            match val.parse() {
                Ok(n) if n > 0 => config.max_refinement_rounds = n,
                _ => tracing::warn!(value = %val, "ignoring invalid MAX_REFINEMENT_ROUNDS"),
            }
        }
        if let Ok(val) = std::env::var("EARLY_STOP_THRESHOLD") {
            match val.parse() {
                Ok(n) if (0.0..=1.0).contains(&n) => config.early_stop_threshold = n,
                _ => tracing::warn!(value = %val, "ignoring invalid EARLY_STOP_THRESHOLD"),
            }
        }
        if let Ok(val) = std::env::var("SPEC_COMPLETENESS_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.phase_thresholds.specification = n;
            }
        }
        if let Ok(val) = std::env::var("PLAN_QUALITY_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.phase_thresholds.planning = n;
            }
        }
        if let Ok(val) = std::env::var("CODE_QUALITY_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.phase_thresholds.implementation = n;
            }
        }
        if let Ok(val) = std::env::var("TEST_COVERAGE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.phase_thresholds.validation = n;
            }
        }
        if let Ok(val) = std::env::var("FEEDBACK_ARCHIVE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.feedback_archive_threshold = n;
            }
        }
        if let Ok(val) = std::env::var("COORD_STATE_ROOT") {
            config.state_root = PathBuf::from(val);
        }

        config
    }

    /// Quality threshold that applies to a given workflow phase.
    pub fn threshold_for_phase(&self, phase: crate::message::Phase) -> f64 {
        use crate::message::Phase;
        match phase {
            Phase::Specification => self.phase_thresholds.specification,
            Phase::Planning => self.phase_thresholds.planning,
            Phase::Implementation => self.phase_thresholds.implementation,
            Phase::Validation => self.phase_thresholds.validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_refinement_rounds, 20);
        assert_eq!(config.early_stop_threshold, 0.95);
        assert_eq!(config.phase_thresholds.specification, 0.90);
        assert_eq!(config.phase_thresholds.planning, 0.85);
        assert_eq!(config.phase_thresholds.implementation, 0.80);
        assert_eq!(config.phase_thresholds.validation, 0.80);
        assert!(config.verifier_weights.is_valid());
    }

    #[test]
    fn invalid_weights_are_detected() {
        let bad = VerifierWeights {
            completeness: 0.5,
            constitutional_compliance: 0.5,
            test_coverage: 0.5,
            spec_alignment: 0.5,
        };
        assert!(!bad.is_valid());
    }
}
