use crate::config::ConfigError;
use crate::orchestration::flow_graph::ValidationError;
use crate::orchestration::run_state::RunStatus;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("flow graph validation failed: {}", render_validation_errors(.0))]
    GraphValidation(Vec<ValidationError>),
    #[error("interruption stack overflow: depth is bounded at {max_depth}")]
    StackOverflow { max_depth: usize },
    #[error("interruption stack is empty")]
    EmptyStack,
    #[error("missing evidence: {reason}")]
    MissingEvidence { reason: String },
    #[error("run `{run_id}` not found")]
    UnknownRun { run_id: String },
    #[error("run `{run_id}` already exists")]
    RunExists { run_id: String },
    #[error("flow `{flow_key}` is not declared in the flow graph")]
    UnknownFlow { flow_key: String },
    #[error("run state transition `{from}` -> `{to}` is invalid")]
    InvalidRunTransition { from: RunStatus, to: RunStatus },
    #[error("run `{run_id}` is `{status}`; routing requires a running run")]
    RunNotRunning { run_id: String, status: RunStatus },
    #[error("candidate `{candidate_id}` is not part of the offered set")]
    CandidateNotOffered { candidate_id: String },
    #[error("decision log for run `{run_id}` has sequence gap: expected {expected}, found {found}")]
    SequenceGap {
        run_id: String,
        expected: u64,
        found: u64,
    },
    #[error("replay of run `{run_id}` diverged at sequence {sequence_number}: {reason}")]
    ReplayDivergence {
        run_id: String,
        sequence_number: u64,
        reason: String,
    },
    #[error("failed to append decision {sequence_number} for run `{run_id}`: {source}")]
    DecisionLogWrite {
        run_id: String,
        sequence_number: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("config error: {0}")]
    Config(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ConfigError> for RoutingError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

impl RoutingError {
    /// Errors that pause the run with a recorded root cause instead of aborting the process.
    pub fn is_pausing(&self) -> bool {
        matches!(
            self,
            Self::StackOverflow { .. } | Self::EmptyStack | Self::MissingEvidence { .. }
        )
    }
}

fn render_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
