//! Communication Channel (C3).
//!
//! A FIFO queue of [`Input`] envelopes plus two append-only audit logs
//! (`messages.jsonl`, `handoffs.jsonl`), grounded on the teacher's
//! `harness::progress::ProgressTracker` (`OpenOptions::append` + `writeln!`).
//! The queue itself is in-memory; the audit trail is the durable record.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoordinationError, Result};
use crate::message::{AgentId, Context, Input, Output};

/// One line of `messages.jsonl`: a send or a respond.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
enum MessageRecord {
    Send {
        message_id: Uuid,
        task_id: Uuid,
        agent_id: String,
        sender: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Respond {
        message_id: Uuid,
        task_id: Uuid,
        agent_id: String,
        receiver: Option<String>,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

/// One line of `handoffs.jsonl`: a context transfer between two agents.
/// `context` carries the full transferred payload (spec/plan paths, prior
/// outputs, cumulative feedback, refinement state) so the audit trail can
/// reconstruct what was actually handed off, not just that a handoff
/// occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HandoffRecord {
    handoff_id: Uuid,
    task_id: Uuid,
    from: String,
    to: String,
    context: Context,
    reason: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Queue + audit writer for one orchestration run. One channel is shared by
/// all agents participating in the tasks it carries.
pub struct CommunicationChannel {
    queue: VecDeque<Input>,
    dir: PathBuf,
}

impl CommunicationChannel {
    /// `dir` is the `<root>/communication` directory (see
    /// [`crate::store::StoreLayout::communication`]).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            queue: VecDeque::new(),
            dir: dir.into(),
        }
    }

    /// Enqueue `input`, append one audit record, and return the message id.
    pub fn send(&mut self, input: Input, sender: Option<&AgentId>) -> Result<Uuid> {
        let message_id = Uuid::new_v4();
        let record = MessageRecord::Send {
            message_id,
            task_id: input.task_id,
            agent_id: input.agent_id.to_string(),
            sender: sender.map(|s| s.to_string()),
            timestamp: Utc::now(),
        };
        self.append_jsonl("messages.jsonl", &record)?;
        self.queue.push_back(input);
        Ok(message_id)
    }

    /// Pop the oldest queued input, optionally filtered to a given receiver.
    /// FIFO within the filtered subsequence.
    pub fn receive(&mut self, agent_id: Option<&AgentId>) -> Option<Input> {
        let index = self.queue.iter().position(|input| match agent_id {
            Some(wanted) => &input.agent_id == wanted,
            None => true,
        })?;
        self.queue.remove(index)
    }

    /// Validate `output` and append its audit record. Does not require a
    /// matching input to still be queued — correlation is checked by the
    /// caller via [`Output::correlates_with`].
    pub fn respond(&mut self, output: &Output, receiver: Option<&AgentId>) -> Result<Uuid> {
        let message_id = Uuid::new_v4();
        let record = MessageRecord::Respond {
            message_id,
            task_id: output.task_id,
            agent_id: output.agent_id.to_string(),
            receiver: receiver.map(|r| r.to_string()),
            success: output.success,
            timestamp: Utc::now(),
        };
        self.append_jsonl("messages.jsonl", &record)?;
        Ok(message_id)
    }

    /// Record a context transfer from one agent to another, persisting the
    /// full transferred `context` alongside the handoff metadata.
    pub fn handoff(
        &mut self,
        from: &AgentId,
        to: &AgentId,
        task_id: Uuid,
        context: &Context,
        reason: Option<String>,
    ) -> Result<Uuid> {
        let handoff_id = Uuid::new_v4();
        let record = HandoffRecord {
            handoff_id,
            task_id,
            from: from.to_string(),
            to: to.to_string(),
            context: context.clone(),
            reason,
            timestamp: Utc::now(),
        };
        self.append_jsonl("handoffs.jsonl", &record)?;
        Ok(handoff_id)
    }

    /// Collect every audit line (messages and handoffs) mentioning
    /// `task_id` into a single file and return its path.
    pub fn export_audit_trail(&self, task_id: Uuid) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CoordinationError::store_unavailable(format!("creating {}: {e}", self.dir.display())))?;

        let mut lines = Vec::new();
        for file_name in ["messages.jsonl", "handoffs.jsonl"] {
            let path = self.dir.join(file_name);
            if !path.exists() {
                continue;
            }
            let file = std::fs::File::open(&path)
                .map_err(|e| CoordinationError::store_unavailable(format!("reading {}: {e}", path.display())))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| CoordinationError::store_unavailable(e.to_string()))?;
                if line.contains(&task_id.to_string()) {
                    lines.push(line);
                }
            }
        }

        let export_dir = self.dir.join("audit");
        std::fs::create_dir_all(&export_dir)
            .map_err(|e| CoordinationError::store_unavailable(format!("creating {}: {e}", export_dir.display())))?;
        let export_path = export_dir.join(format!("{task_id}.jsonl"));
        std::fs::write(&export_path, lines.join("\n"))
            .map_err(|e| CoordinationError::store_unavailable(format!("writing {}: {e}", export_path.display())))?;
        Ok(export_path)
    }

    fn append_jsonl<T: Serialize>(&self, file_name: &str, record: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CoordinationError::store_unavailable(format!("creating {}: {e}", self.dir.display())))?;
        let path = self.dir.join(file_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CoordinationError::store_unavailable(format!("opening {}: {e}", path.display())))?;
        let json = serde_json::to_string(record)?;
        writeln!(file, "{json}").map_err(|e| CoordinationError::store_unavailable(e.to_string()))?;
        Ok(())
    }
}
