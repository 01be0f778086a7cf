//! Persistence (C9).
//!
//! Whole-file JSON-per-task persistence, grounded on the teacher's
//! `harness::session::{save_session_state, load_session_state}` free
//! functions: every write is a full-file replacement, every read tolerates a
//! missing file by returning `None` ("fresh state"). Each subsystem gets its
//! own directory under a configured root, matching the layout in
//! SPEC_FULL.md §6.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::error::{CoordinationError, Result};

/// Read a JSON document for `task_id` from `dir`, returning `None` if the
/// file does not exist.
pub fn load<T: DeserializeOwned>(dir: &Path, task_id: Uuid) -> Result<Option<T>> {
    let path = dir.join(format!("{task_id}.json"));
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(&path)
        .map_err(|e| CoordinationError::store_unavailable(format!("reading {}: {e}", path.display())))?;
    let value = serde_json::from_str(&json)?;
    Ok(Some(value))
}

/// Write `value` as the whole-file JSON document for `task_id` under `dir`,
/// creating `dir` if necessary.
pub fn save<T: Serialize>(dir: &Path, task_id: Uuid, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CoordinationError::store_unavailable(format!("creating {}: {e}", dir.display())))?;
    let path = dir.join(format!("{task_id}.json"));
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, json)
        .map_err(|e| CoordinationError::store_unavailable(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}

/// Move the document for `task_id` from `dir` into `dir/archive`, leaving no
/// file behind at the original location. No-op (returns `Ok(None)`) if the
/// source does not exist.
pub fn archive(dir: &Path, task_id: Uuid) -> Result<Option<PathBuf>> {
    let src = dir.join(format!("{task_id}.json"));
    if !src.exists() {
        return Ok(None);
    }
    let archive_dir = dir.join("archive");
    std::fs::create_dir_all(&archive_dir)
        .map_err(|e| CoordinationError::store_unavailable(format!("creating {}: {e}", archive_dir.display())))?;
    let dst = archive_dir.join(format!("{task_id}.json"));
    std::fs::rename(&src, &dst)
        .map_err(|e| CoordinationError::store_unavailable(format!("archiving {}: {e}", src.display())))?;
    Ok(Some(dst))
}

/// Write a plain-text companion document (used for human-readable
/// escalation reports) next to a task's JSON document.
pub fn write_text(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CoordinationError::store_unavailable(format!("creating {}: {e}", dir.display())))?;
    let path = dir.join(file_name);
    std::fs::write(&path, contents)
        .map_err(|e| CoordinationError::store_unavailable(format!("writing {}: {e}", path.display())))?;
    Ok(path)
}

/// Per-subsystem store directories rooted at `Config::state_root`.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn routing_decisions(&self) -> PathBuf {
        self.root.join("routing").join("decisions")
    }

    pub fn verifier_decisions(&self) -> PathBuf {
        self.root.join("verifier").join("decisions")
    }

    pub fn autodebug_sessions(&self) -> PathBuf {
        self.root.join("autodebug").join("sessions")
    }

    pub fn refinement_state(&self) -> PathBuf {
        self.root.join("refinement-state")
    }

    pub fn feedback(&self) -> PathBuf {
        self.root.join("feedback")
    }

    pub fn communication(&self) -> PathBuf {
        self.root.join("communication")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Dummy {
        value: u32,
    }

    #[test]
    fn load_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result: Option<Dummy> = load(dir.path(), Uuid::new_v4()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = Uuid::new_v4();
        let value = Dummy { value: 42 };
        save(dir.path(), task_id, &value).unwrap();
        let loaded: Option<Dummy> = load(dir.path(), task_id).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn archive_moves_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = Uuid::new_v4();
        save(dir.path(), task_id, &Dummy { value: 1 }).unwrap();
        let archived = archive(dir.path(), task_id).unwrap();
        assert!(archived.is_some());
        let still_at_source: Option<Dummy> = load(dir.path(), task_id).unwrap();
        assert!(still_at_source.is_none());
        let at_archive: Option<Dummy> = load(&dir.path().join("archive"), task_id).unwrap();
        assert_eq!(at_archive, Some(Dummy { value: 1 }));
    }

    #[test]
    fn archive_of_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let archived = archive(dir.path(), Uuid::new_v4()).unwrap();
        assert!(archived.is_none());
    }
}
