//! The boundary where a possibly non-deterministic decision-maker picks one candidate.
//!
//! The returned id is advisory. Anything outside the offered set, a timeout, or a
//! navigator failure falls back to the set's highest-priority candidate and the reason is
//! kept in the [`NavigationOutcome`] for the decision log.

use crate::orchestration::candidates::CandidateSet;
use crate::orchestration::forensics::Verdict;
use crate::orchestration::sidequest::RoutingContext;
use crate::shared::ids::{FlowKey, NodeId, RunId};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorRequest {
    pub run_id: RunId,
    pub flow_key: FlowKey,
    pub step_id: NodeId,
    pub candidates: CandidateSet,
    pub verdict: Verdict,
    pub context: RoutingContext,
    pub interruption_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigatorError {
    #[error("navigator unavailable: {0}")]
    Unavailable(String),
    #[error("navigator returned an unreadable response: {0}")]
    InvalidResponse(String),
}

pub trait Navigator: Send + Sync {
    fn select(&self, request: &NavigatorRequest) -> Result<String, NavigatorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavigationOutcome {
    Accepted,
    #[serde(rename_all = "camelCase")]
    ProtocolViolation { returned_id: String },
    #[serde(rename_all = "camelCase")]
    Timeout { timeout_ms: u64 },
    Failed { reason: String },
}

impl NavigationOutcome {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Accepted)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::Timeout { .. } => "timeout",
            Self::Failed { .. } => "navigator_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub candidate_id: String,
    pub outcome: NavigationOutcome,
}

/// Accepts `returned` only if it names an offered candidate.
pub fn validate_selection(candidates: &CandidateSet, returned: &str) -> Option<Selection> {
    let fallback = candidates.highest_priority()?.candidate_id.clone();
    let trimmed = returned.trim();
    if candidates.contains(trimmed) {
        return Some(Selection {
            candidate_id: trimmed.to_string(),
            outcome: NavigationOutcome::Accepted,
        });
    }
    Some(Selection {
        candidate_id: fallback,
        outcome: NavigationOutcome::ProtocolViolation {
            returned_id: returned.to_string(),
        },
    })
}

/// Calls the navigator on a worker thread and waits at most `timeout`. A navigator that
/// never answers is left detached; its late answer is dropped with the channel.
pub fn obtain_selection(
    navigator: Arc<dyn Navigator>,
    request: &NavigatorRequest,
    timeout: Duration,
) -> Option<Selection> {
    let fallback = request.candidates.highest_priority()?.candidate_id.clone();
    let (tx, rx) = mpsc::channel();
    let owned = request.clone();
    thread::spawn(move || {
        let _ = tx.send(navigator.select(&owned));
    });

    let selection = match rx.recv_timeout(timeout) {
        Ok(Ok(returned)) => return validate_selection(&request.candidates, &returned),
        Ok(Err(err)) => Selection {
            candidate_id: fallback,
            outcome: NavigationOutcome::Failed {
                reason: err.to_string(),
            },
        },
        Err(RecvTimeoutError::Timeout) => Selection {
            candidate_id: fallback,
            outcome: NavigationOutcome::Timeout {
                timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
        },
        Err(RecvTimeoutError::Disconnected) => Selection {
            candidate_id: fallback,
            outcome: NavigationOutcome::Failed {
                reason: "navigator thread exited without answering".to_string(),
            },
        },
    };
    Some(selection)
}

/// Deterministic navigator that always takes the default candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestPriorityNavigator;

impl Navigator for HighestPriorityNavigator {
    fn select(&self, request: &NavigatorRequest) -> Result<String, NavigatorError> {
        request
            .candidates
            .highest_priority()
            .map(|candidate| candidate.candidate_id.clone())
            .ok_or_else(|| NavigatorError::Unavailable("empty candidate set".to_string()))
    }
}
