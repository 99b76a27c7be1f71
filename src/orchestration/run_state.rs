//! The one mutable entity of a run, and the pure reducer that advances it.
//!
//! Live routing and replay both go through [`apply_event`], so a decision log folded from
//! empty always lands on the state the driver held when it wrote the last record.

use crate::config::TerminalKind;
use crate::orchestration::candidates::{CandidateAction, CandidateTarget, RoutingCandidate};
use crate::orchestration::decision::{
    FlowCompletion, HaltRecord, LogEvent, ProgressUpdate, RedriveAction, RedriveRecord,
    RoutingDecision,
};
use crate::orchestration::error::RoutingError;
use crate::orchestration::flow_graph::FlowGraph;
use crate::orchestration::interruption::{FrameKind, InterruptionFrame, InterruptionStack};
use crate::orchestration::progress::ProgressTracker;
use crate::shared::ids::{FlowKey, NodeId, RunId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Paused)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Paused, RunStatus::Running)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Single recorded root cause of a paused run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum PauseCause {
    MissingEvidence {
        reason: String,
    },
    StackOverflow {
        max_depth: usize,
    },
    EmptyStack,
    InjectedFlowFailed {
        flow_key: FlowKey,
        step_id: NodeId,
    },
    GraphExtensionProposed {
        proposal: String,
    },
    Cancelled {
        note: String,
    },
}

impl PauseCause {
    pub fn from_error(error: &RoutingError) -> Option<Self> {
        match error {
            RoutingError::MissingEvidence { reason } => Some(Self::MissingEvidence {
                reason: reason.clone(),
            }),
            RoutingError::StackOverflow { max_depth } => Some(Self::StackOverflow {
                max_depth: *max_depth,
            }),
            RoutingError::EmptyStack => Some(Self::EmptyStack),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::MissingEvidence { reason } => format!("missing evidence: {reason}"),
            Self::StackOverflow { max_depth } => {
                format!("interruption stack overflow at depth {max_depth}")
            }
            Self::EmptyStack => "interruption stack is empty".to_string(),
            Self::InjectedFlowFailed { flow_key, step_id } => {
                format!("injected flow `{flow_key}` reached failure terminal `{step_id}`")
            }
            Self::GraphExtensionProposed { proposal } => {
                format!("graph extension proposed: {proposal}")
            }
            Self::Cancelled { note } => format!("cancelled: {note}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: RunId,
    pub flow_key: FlowKey,
    pub current_step: NodeId,
    pub status: RunStatus,
    #[serde(default)]
    pub interruption_stack: Vec<InterruptionFrame>,
    #[serde(default)]
    pub progress_window: Vec<String>,
    /// Stations still to run after `current_step` while an inline chain is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_chain: Option<Vec<NodeId>>,
    #[serde(default)]
    pub loop_counts: BTreeMap<NodeId, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_cause: Option<PauseCause>,
    #[serde(default)]
    pub pending_proposals: Vec<String>,
    pub last_sequence: u64,
    pub updated_at: i64,
}

impl RunState {
    pub fn loop_count(&self, step_id: &NodeId) -> u32 {
        self.loop_counts.get(step_id).copied().unwrap_or(0)
    }

    pub fn interruption_depth(&self) -> usize {
        self.interruption_stack.len()
    }

    pub fn stack(&self, max_depth: usize) -> InterruptionStack {
        InterruptionStack::from_frames(max_depth, self.interruption_stack.clone())
    }

    pub fn progress(&self, capacity: usize) -> ProgressTracker {
        ProgressTracker::from_window(capacity, &self.progress_window)
    }

    fn transition_to(&mut self, next: RunStatus) -> Result<(), RoutingError> {
        if !self.status.can_transition_to(next) {
            return Err(RoutingError::InvalidRunTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    fn move_to(&mut self, flow_key: FlowKey, step_id: NodeId, inline_chain: Option<Vec<NodeId>>) {
        self.flow_key = flow_key;
        self.current_step = step_id;
        self.inline_chain = inline_chain;
        self.loop_counts.clear();
    }

    fn restore(&mut self, frame: InterruptionFrame) {
        self.move_to(frame.flow_key, frame.step_id, frame.resume_chain);
    }

    fn apply_progress(&mut self, update: &ProgressUpdate, capacity: usize) {
        let mut tracker = self.progress(capacity);
        match update {
            ProgressUpdate::Recorded { signature } => tracker.record(signature.clone()),
            ProgressUpdate::Reset => tracker.reset(),
        }
        self.progress_window = tracker.window();
    }
}

/// Bounds the reducer needs beyond the graph itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducerLimits {
    pub max_interruption_depth: usize,
    pub progress_capacity: usize,
}

/// Folds one logged event onto the previous state. Pure: no clock, no io.
pub fn apply_event(
    previous: Option<&RunState>,
    run_id: &RunId,
    sequence_number: u64,
    timestamp: i64,
    event: &LogEvent,
    graph: &FlowGraph,
    limits: ReducerLimits,
) -> Result<RunState, RoutingError> {
    let mut state = match (previous, event) {
        (None, LogEvent::RunStarted { flow_key, entry }) => {
            return start_state(run_id, flow_key, entry, sequence_number, timestamp, graph);
        }
        (None, _) => {
            return Err(RoutingError::ReplayDivergence {
                run_id: run_id.to_string(),
                sequence_number,
                reason: "first record must be run_started".to_string(),
            })
        }
        (Some(_), LogEvent::RunStarted { .. }) => {
            return Err(RoutingError::RunExists {
                run_id: run_id.to_string(),
            })
        }
        (Some(previous), _) => previous.clone(),
    };

    match event {
        LogEvent::RunStarted { .. } => {}
        LogEvent::Routed(decision) => apply_routed(&mut state, decision, timestamp, graph, limits)?,
        LogEvent::FlowCompleted(completion) => apply_completion(&mut state, completion, limits)?,
        LogEvent::Halted(halt) => apply_halt(&mut state, halt)?,
        LogEvent::Redriven(redrive) => apply_redrive(&mut state, redrive)?,
    }
    state.last_sequence = sequence_number;
    state.updated_at = timestamp;
    Ok(state)
}

fn start_state(
    run_id: &RunId,
    flow_key: &FlowKey,
    entry: &NodeId,
    sequence_number: u64,
    timestamp: i64,
    graph: &FlowGraph,
) -> Result<RunState, RoutingError> {
    if graph.entry(flow_key) != Some(entry) {
        return Err(RoutingError::UnknownFlow {
            flow_key: flow_key.to_string(),
        });
    }
    Ok(RunState {
        run_id: run_id.clone(),
        flow_key: flow_key.clone(),
        current_step: entry.clone(),
        status: RunStatus::Running,
        interruption_stack: Vec::new(),
        progress_window: Vec::new(),
        inline_chain: None,
        loop_counts: BTreeMap::new(),
        pause_cause: None,
        pending_proposals: Vec::new(),
        last_sequence: sequence_number,
        updated_at: timestamp,
    })
}

fn require_running(state: &RunState) -> Result<(), RoutingError> {
    if state.status != RunStatus::Running {
        return Err(RoutingError::RunNotRunning {
            run_id: state.run_id.to_string(),
            status: state.status,
        });
    }
    Ok(())
}

fn apply_routed(
    state: &mut RunState,
    decision: &RoutingDecision,
    timestamp: i64,
    graph: &FlowGraph,
    limits: ReducerLimits,
) -> Result<(), RoutingError> {
    require_running(state)?;
    let selected = decision.selected().ok_or_else(|| RoutingError::CandidateNotOffered {
        candidate_id: decision.selected_candidate_id.clone(),
    })?;
    state.apply_progress(&decision.progress, limits.progress_capacity);
    apply_candidate(state, selected, decision.proposal.as_deref(), timestamp, graph, limits)
}

/// Exhaustive over [`CandidateAction`]; a new action kind does not compile until handled here.
fn apply_candidate(
    state: &mut RunState,
    candidate: &RoutingCandidate,
    proposal: Option<&str>,
    timestamp: i64,
    graph: &FlowGraph,
    limits: ReducerLimits,
) -> Result<(), RoutingError> {
    match (candidate.action, &candidate.target) {
        (CandidateAction::Continue, CandidateTarget::Node(target)) => {
            apply_continue(state, target, limits)
        }
        (CandidateAction::Detour | CandidateAction::InjectNodes, CandidateTarget::Stations(chain)) => {
            let Some((first, rest)) = chain.split_first() else {
                return Err(malformed(candidate, "empty station chain"));
            };
            let kind = if candidate.action == CandidateAction::Detour {
                FrameKind::Detour
            } else {
                FrameKind::InjectedNodes
            };
            push_frame(state, kind, &candidate.rationale, timestamp, limits)?;
            let flow_key = state.flow_key.clone();
            state.move_to(flow_key, first.clone(), Some(rest.to_vec()));
            Ok(())
        }
        (CandidateAction::Detour | CandidateAction::InjectFlow, CandidateTarget::Flow(flow_key)) => {
            let entry = graph
                .entry(flow_key)
                .cloned()
                .ok_or_else(|| RoutingError::UnknownFlow {
                    flow_key: flow_key.to_string(),
                })?;
            let kind = if candidate.action == CandidateAction::Detour {
                FrameKind::Detour
            } else {
                FrameKind::InjectedFlow
            };
            push_frame(state, kind, &candidate.rationale, timestamp, limits)?;
            state.move_to(flow_key.clone(), entry, None);
            Ok(())
        }
        (CandidateAction::ExtendGraph, _) => {
            let proposal = proposal.unwrap_or_default().to_string();
            state.transition_to(RunStatus::Paused)?;
            if !proposal.is_empty() {
                state.pending_proposals.push(proposal.clone());
            }
            state.pause_cause = Some(PauseCause::GraphExtensionProposed { proposal });
            Ok(())
        }
        _ => Err(malformed(candidate, "action does not accept this target")),
    }
}

fn apply_continue(
    state: &mut RunState,
    target: &NodeId,
    limits: ReducerLimits,
) -> Result<(), RoutingError> {
    if let Some(remaining) = state.inline_chain.as_mut() {
        if let Some(next) = remaining.first() {
            if next != target {
                return Err(RoutingError::CandidateNotOffered {
                    candidate_id: format!("continue:{target}"),
                });
            }
            remaining.remove(0);
            state.current_step = target.clone();
            state.loop_counts.clear();
            return Ok(());
        }
        let mut stack = state.stack(limits.max_interruption_depth);
        let frame = stack.pop()?;
        state.interruption_stack = stack.into_frames();
        state.restore(frame);
        return Ok(());
    }

    if *target == state.current_step {
        *state.loop_counts.entry(target.clone()).or_insert(0) += 1;
    } else {
        let flow_key = state.flow_key.clone();
        state.move_to(flow_key, target.clone(), None);
    }
    Ok(())
}

fn push_frame(
    state: &mut RunState,
    kind: FrameKind,
    reason: &str,
    timestamp: i64,
    limits: ReducerLimits,
) -> Result<(), RoutingError> {
    let mut stack = state.stack(limits.max_interruption_depth);
    stack.push(InterruptionFrame {
        flow_key: state.flow_key.clone(),
        step_id: state.current_step.clone(),
        saved_at: timestamp,
        reason: reason.to_string(),
        kind,
        resume_chain: state.inline_chain.clone(),
    })?;
    state.interruption_stack = stack.into_frames();
    Ok(())
}

fn apply_completion(
    state: &mut RunState,
    completion: &FlowCompletion,
    limits: ReducerLimits,
) -> Result<(), RoutingError> {
    require_running(state)?;
    state.apply_progress(&completion.progress, limits.progress_capacity);
    match (state.interruption_stack.is_empty(), completion.terminal) {
        (true, TerminalKind::Success) => state.transition_to(RunStatus::Completed),
        (true, TerminalKind::Failure) => state.transition_to(RunStatus::Failed),
        (false, TerminalKind::Success) => {
            let mut stack = state.stack(limits.max_interruption_depth);
            let frame = stack.pop()?;
            state.interruption_stack = stack.into_frames();
            state.restore(frame);
            Ok(())
        }
        (false, TerminalKind::Failure) => {
            state.transition_to(RunStatus::Paused)?;
            state.pause_cause = Some(PauseCause::InjectedFlowFailed {
                flow_key: completion.flow_key.clone(),
                step_id: completion.step_id.clone(),
            });
            Ok(())
        }
    }
}

fn apply_halt(state: &mut RunState, halt: &HaltRecord) -> Result<(), RoutingError> {
    state.transition_to(RunStatus::Paused)?;
    state.pause_cause = Some(halt.cause.clone());
    Ok(())
}

fn apply_redrive(state: &mut RunState, redrive: &RedriveRecord) -> Result<(), RoutingError> {
    if state.status != RunStatus::Paused {
        return Err(RoutingError::InvalidRunTransition {
            from: state.status,
            to: RunStatus::Running,
        });
    }
    if redrive.action == RedriveAction::AbandonInjection {
        let frame = state
            .interruption_stack
            .pop()
            .ok_or(RoutingError::EmptyStack)?;
        state.restore(frame);
    }
    state.transition_to(RunStatus::Running)?;
    state.pause_cause = None;
    Ok(())
}

fn malformed(candidate: &RoutingCandidate, reason: &str) -> RoutingError {
    RoutingError::CandidateNotOffered {
        candidate_id: format!(
            "{} ({} -> {}: {reason})",
            candidate.candidate_id, candidate.action, candidate.target
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_transitions_follow_lifecycle() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Paused));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Paused.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn pause_cause_maps_only_pausing_errors() {
        assert_eq!(
            PauseCause::from_error(&RoutingError::StackOverflow { max_depth: 4 }),
            Some(PauseCause::StackOverflow { max_depth: 4 })
        );
        assert_eq!(
            PauseCause::from_error(&RoutingError::EmptyStack),
            Some(PauseCause::EmptyStack)
        );
        assert_eq!(
            PauseCause::from_error(&RoutingError::Config("bad".to_string())),
            None
        );
    }

    #[test]
    fn pause_cause_serializes_with_a_cause_tag() {
        let encoded = serde_json::to_value(PauseCause::StackOverflow { max_depth: 4 })
            .expect("encode pause cause");
        assert_eq!(
            encoded,
            serde_json::json!({ "cause": "stack_overflow", "max_depth": 4 })
        );
    }
}
