use crate::orchestration::decision::DecisionRecord;
use crate::orchestration::error::RoutingError;
use crate::orchestration::forensics::Verdict;
use crate::orchestration::run_state::RunState;
use crate::shared::fs_atomic::{atomic_append_line, atomic_write_file};
use crate::shared::ids::{FlowKey, NodeId, RunId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// EXTEND_GRAPH output: written beside the log, never merged into the live graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphExtensionProposal {
    pub run_id: RunId,
    pub sequence_number: u64,
    pub flow_key: FlowKey,
    pub step_id: NodeId,
    pub rationale: String,
    pub recent_failures: Vec<String>,
    pub verdict: Verdict,
    pub proposed_at: i64,
}

/// File-backed persistence for runs: `runs/<run_id>/` while live, `archive/<run_id>/` after.
#[derive(Debug, Clone)]
pub struct RunStore {
    state_root: PathBuf,
}

impl RunStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn run_exists(&self, run_id: &RunId) -> bool {
        self.run_dir(run_id).exists() || self.archive_dir(run_id).exists()
    }

    pub fn is_archived(&self, run_id: &RunId) -> bool {
        self.archive_dir(run_id).exists()
    }

    pub fn decision_log_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("decisions.jsonl")
    }

    /// Appends one record atomically. The sequence number must directly follow
    /// `last_sequence`; a failed write is an integrity failure for the run.
    pub fn append_record(
        &self,
        record: &DecisionRecord,
        last_sequence: u64,
    ) -> Result<(), RoutingError> {
        let expected = last_sequence + 1;
        if record.sequence_number != expected {
            return Err(RoutingError::SequenceGap {
                run_id: record.run_id.to_string(),
                expected,
                found: record.sequence_number,
            });
        }
        let path = self.decision_log_path(&record.run_id);
        let line = serde_json::to_string(record).map_err(|e| json_error(&path, e))?;
        atomic_append_line(&path, &line).map_err(|source| RoutingError::DecisionLogWrite {
            run_id: record.run_id.to_string(),
            sequence_number: record.sequence_number,
            source,
        })
    }

    /// Reads a run's log from the live directory, falling back to the archive.
    pub fn load_records(&self, run_id: &RunId) -> Result<Vec<DecisionRecord>, RoutingError> {
        let path = self.locate_log(run_id).ok_or_else(|| RoutingError::UnknownRun {
            run_id: run_id.to_string(),
        })?;
        let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| json_error(&path, e)))
            .collect()
    }

    pub fn persist_snapshot(&self, state: &RunState) -> Result<(), RoutingError> {
        let path = self.snapshot_path(&state.run_id);
        let body = serde_json::to_vec_pretty(state).map_err(|e| json_error(&path, e))?;
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))
    }

    /// Cached view only; replaying the log is authoritative.
    pub fn load_snapshot(&self, run_id: &RunId) -> Result<RunState, RoutingError> {
        let path = self.snapshot_path(run_id);
        let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        serde_json::from_str(&raw).map_err(|e| json_error(&path, e))
    }

    pub fn write_proposal(&self, proposal: &GraphExtensionProposal) -> Result<PathBuf, RoutingError> {
        let path = self
            .run_dir(&proposal.run_id)
            .join("proposals")
            .join(format!("{:06}-extend-graph.json", proposal.sequence_number));
        let body = serde_json::to_vec_pretty(proposal).map_err(|e| json_error(&path, e))?;
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))?;
        Ok(path)
    }

    pub fn load_proposal(&self, path: &Path) -> Result<GraphExtensionProposal, RoutingError> {
        let raw = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        serde_json::from_str(&raw).map_err(|e| json_error(path, e))
    }

    /// Moves a finished run out of `runs/`. Archived runs are kept, never deleted.
    pub fn archive_run(&self, run_id: &RunId) -> Result<PathBuf, RoutingError> {
        let from = self.run_dir(run_id);
        let to = self.archive_dir(run_id);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::rename(&from, &to).map_err(|e| io_error(&from, e))?;
        Ok(to)
    }

    pub fn list_runs(&self) -> Result<Vec<RunId>, RoutingError> {
        let root = self.state_root.join("runs");
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&root).map_err(|e| io_error(&root, e))? {
            let entry = entry.map_err(|e| io_error(&root, e))?;
            if let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| RunId::parse(name).ok())
            {
                runs.push(run_id);
            }
        }
        runs.sort();
        Ok(runs)
    }

    fn locate_log(&self, run_id: &RunId) -> Option<PathBuf> {
        [self.run_dir(run_id), self.archive_dir(run_id)]
            .into_iter()
            .map(|dir| dir.join("decisions.jsonl"))
            .find(|path| path.exists())
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.state_root.join("runs").join(run_id.as_str())
    }

    fn archive_dir(&self, run_id: &RunId) -> PathBuf {
        self.state_root.join("archive").join(run_id.as_str())
    }

    fn snapshot_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("state.json")
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RoutingError {
    RoutingError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> RoutingError {
    RoutingError::Json {
        path: path.display().to_string(),
        source,
    }
}
