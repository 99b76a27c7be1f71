//! Records of the append-only decision log. One JSON object per line, each carrying the
//! run state it produced.

use crate::config::TerminalKind;
use crate::orchestration::candidates::{CandidateSet, RoutingCandidate};
use crate::orchestration::forensics::Verdict;
use crate::orchestration::navigator::NavigationOutcome;
use crate::orchestration::run_state::{PauseCause, RunState};
use crate::shared::ids::{FlowKey, NodeId, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum ProgressUpdate {
    Recorded { signature: String },
    Reset,
}

impl ProgressUpdate {
    pub fn from_signature(signature: Option<String>) -> Self {
        match signature {
            Some(signature) => Self::Recorded { signature },
            None => Self::Reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub flow_key: FlowKey,
    pub step_id: NodeId,
    pub candidates_offered: CandidateSet,
    pub selected_candidate_id: String,
    pub navigation: NavigationOutcome,
    pub verdict_snapshot: Verdict,
    pub progress: ProgressUpdate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<String>,
}

impl RoutingDecision {
    pub fn selected(&self) -> Option<&RoutingCandidate> {
        self.candidates_offered.get(&self.selected_candidate_id)
    }
}

/// A flow reached one of its terminal nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCompletion {
    pub flow_key: FlowKey,
    pub step_id: NodeId,
    pub terminal: TerminalKind,
    pub verdict_snapshot: Verdict,
    pub progress: ProgressUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HaltRecord {
    pub cause: PauseCause,
    /// The decision that could not be applied, kept for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted: Option<RoutingDecision>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedriveAction {
    Resume,
    AbandonInjection,
}

impl RedriveAction {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "resume" => Ok(Self::Resume),
            "abandon-injection" | "abandon_injection" => Ok(Self::AbandonInjection),
            other => Err(format!(
                "unknown redrive action `{other}` (expected resume|abandon-injection)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveRecord {
    pub action: RedriveAction,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { flow_key: FlowKey, entry: NodeId },
    Routed(RoutingDecision),
    FlowCompleted(FlowCompletion),
    Halted(HaltRecord),
    Redriven(RedriveRecord),
}

impl LogEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::Routed(_) => "routed",
            Self::FlowCompleted(_) => "flow_completed",
            Self::Halted(_) => "halted",
            Self::Redriven(_) => "redriven",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub run_id: RunId,
    pub sequence_number: u64,
    pub timestamp: i64,
    #[serde(flatten)]
    pub event: LogEvent,
    pub resulting_state: RunState,
}

impl DecisionRecord {
    /// One-line human summary used by `stationmaster log`.
    pub fn summary(&self) -> String {
        let detail = match &self.event {
            LogEvent::RunStarted { flow_key, entry } => format!("start {flow_key}@{entry}"),
            LogEvent::Routed(decision) => match decision.selected() {
                Some(selected) => format!(
                    "{}@{} -> {} {} ({} offered, confidence {:.2}, {})",
                    decision.flow_key,
                    decision.step_id,
                    selected.action,
                    selected.target,
                    decision.candidates_offered.len(),
                    decision.verdict_snapshot.confidence,
                    decision.navigation.label()
                ),
                None => format!(
                    "{}@{} -> unknown candidate `{}`",
                    decision.flow_key, decision.step_id, decision.selected_candidate_id
                ),
            },
            LogEvent::FlowCompleted(completion) => format!(
                "{}@{} reached {} terminal",
                completion.flow_key, completion.step_id, completion.terminal
            ),
            LogEvent::Halted(halt) => format!("halted: {}", halt.cause.describe()),
            LogEvent::Redriven(redrive) => format!("redriven ({:?}) {}", redrive.action, redrive.note),
        };
        format!(
            "#{} [{}] {} status={}",
            self.sequence_number,
            self.event.kind(),
            detail,
            self.resulting_state.status
        )
    }
}
