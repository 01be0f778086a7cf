//! Feedback Accumulator (C4).
//!
//! Per-task append-only feedback log, persisted as whole-file JSON via
//! [`crate::store`]. Archival is advisory: crossing the configured
//! threshold is logged, but the caller decides whether to actually archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::message::DataMap;
use crate::store;

/// A single feedback entry recorded during one refinement iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub feedback: String,
    pub quality_score: f64,
    pub agent_id: String,
    pub metadata: DataMap,
}

/// Append-only feedback history for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackHistory {
    pub task_id: Option<Uuid>,
    pub records: Vec<FeedbackRecord>,
    pub archived: bool,
}

impl FeedbackHistory {
    fn fresh(task_id: Uuid) -> Self {
        Self {
            task_id: Some(task_id),
            records: Vec::new(),
            archived: false,
        }
    }

    /// Most recent `max_recent` feedback strings, in iteration order. If
    /// `max_recent` is `None`, returns the full history.
    pub fn get_cumulative(&self, max_recent: Option<usize>) -> Vec<String> {
        let all: Vec<String> = self.records.iter().map(|r| r.feedback.clone()).collect();
        match max_recent {
            Some(n) if n < all.len() => all[all.len() - n..].to_vec(),
            _ => all,
        }
    }
}

/// Directory-backed feedback store, one JSON document per task.
pub struct FeedbackAccumulator {
    dir: std::path::PathBuf,
    archive_threshold: usize,
}

impl FeedbackAccumulator {
    pub fn new(dir: impl Into<std::path::PathBuf>, archive_threshold: usize) -> Self {
        Self {
            dir: dir.into(),
            archive_threshold,
        }
    }

    /// Append one feedback record for `task_id`, persisting the updated
    /// history and returning it.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        task_id: Uuid,
        feedback: impl Into<String>,
        iteration: u32,
        quality_score: f64,
        agent_id: impl Into<String>,
        metadata: DataMap,
    ) -> Result<FeedbackHistory> {
        let mut history = store::load::<FeedbackHistory>(&self.dir, task_id)?.unwrap_or_else(|| Self::fresh(task_id));

        history.records.push(FeedbackRecord {
            iteration,
            timestamp: Utc::now(),
            feedback: feedback.into(),
            quality_score,
            agent_id: agent_id.into(),
            metadata,
        });

        store::save(&self.dir, task_id, &history)?;

        if history.records.len() >= self.archive_threshold {
            tracing::warn!(
                task_id = %task_id,
                count = history.records.len(),
                threshold = self.archive_threshold,
                "feedback history crossed archive threshold"
            );
        }

        Ok(history)
    }

    /// Load the history for `task_id`, returning the most recent
    /// `max_recent` feedback strings (or all, if `None`).
    pub fn get_cumulative(&self, task_id: Uuid, max_recent: Option<usize>) -> Result<Vec<String>> {
        let history = store::load::<FeedbackHistory>(&self.dir, task_id)?;
        Ok(history.map(|h| h.get_cumulative(max_recent)).unwrap_or_default())
    }

    /// Move the task's feedback file into the archive subdirectory and
    /// flip `archived=true` on the moved document.
    pub fn archive(&self, task_id: Uuid) -> Result<()> {
        if let Some(mut history) = store::load::<FeedbackHistory>(&self.dir, task_id)? {
            history.archived = true;
            store::save(&self.dir, task_id, &history)?;
            store::archive(&self.dir, task_id)?;
            tracing::info!(task_id = %task_id, "archived feedback history");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_persists_and_accumulates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let accumulator = FeedbackAccumulator::new(dir.path(), 1000);
        let task_id = Uuid::new_v4();

        accumulator
            .add(task_id, "missing tests", 1, 0.4, "quality.verifier", DataMap::new())
            .unwrap();
        accumulator
            .add(task_id, "tests added, missing docs", 2, 0.6, "quality.verifier", DataMap::new())
            .unwrap();

        let cumulative = accumulator.get_cumulative(task_id, None).unwrap();
        assert_eq!(cumulative, vec!["missing tests", "tests added, missing docs"]);
    }

    #[test]
    fn get_cumulative_honors_max_recent() {
        let dir = tempfile::tempdir().unwrap();
        let accumulator = FeedbackAccumulator::new(dir.path(), 1000);
        let task_id = Uuid::new_v4();
        for i in 1..=5u32 {
            accumulator
                .add(task_id, format!("round {i}"), i, 0.5, "quality.verifier", DataMap::new())
                .unwrap();
        }
        let recent = accumulator.get_cumulative(task_id, Some(2)).unwrap();
        assert_eq!(recent, vec!["round 4", "round 5"]);
    }

    #[test]
    fn archive_moves_file_and_flags_archived() {
        let dir = tempfile::tempdir().unwrap();
        let accumulator = FeedbackAccumulator::new(dir.path(), 1000);
        let task_id = Uuid::new_v4();
        accumulator
            .add(task_id, "one", 1, 0.5, "quality.verifier", DataMap::new())
            .unwrap();
        accumulator.archive(task_id).unwrap();

        let active: Option<FeedbackHistory> = store::load(dir.path(), task_id).unwrap();
        assert!(active.is_none());

        let archived: Option<FeedbackHistory> = store::load(&dir.path().join("archive"), task_id).unwrap();
        let archived = archived.unwrap();
        assert!(archived.archived);
        assert_eq!(archived.records.len(), 1);
    }
}
