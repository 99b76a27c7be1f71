//! Builds the closed set of legal next actions for one routing cycle.
//!
//! Baseline CONTINUE candidates come from the flow graph in edge declaration order,
//! applicable sidequests add DETOUR candidates, and two overrides apply on top:
//! a low-trust verdict removes every candidate that would advance past the unverified
//! claim and adds a re-verification chain, and a stall forces an EXTEND_GRAPH escalation
//! at maximum priority. The set is never empty.

use crate::config::{RoutingConfig, MAX_CONFIGURED_PRIORITY};
use crate::orchestration::flow_graph::FlowGraph;
use crate::orchestration::forensics::Verdict;
use crate::orchestration::interruption::InterruptionStack;
use crate::orchestration::progress::ProgressTracker;
use crate::orchestration::run_state::RunState;
use crate::orchestration::sidequest::{RoutingContext, SidequestCatalog, SidequestTarget};
use crate::shared::ids::{FlowKey, NodeId, SidequestId};
use serde::{Deserialize, Serialize};

/// Priority of stall and dead-end escalations; strictly above any configured priority.
pub const ESCALATION_PRIORITY: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateAction {
    Continue,
    Detour,
    InjectFlow,
    InjectNodes,
    ExtendGraph,
}

impl CandidateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "CONTINUE",
            Self::Detour => "DETOUR",
            Self::InjectFlow => "INJECT_FLOW",
            Self::InjectNodes => "INJECT_NODES",
            Self::ExtendGraph => "EXTEND_GRAPH",
        }
    }
}

impl std::fmt::Display for CandidateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum CandidateTarget {
    Node(NodeId),
    Flow(FlowKey),
    Stations(Vec<NodeId>),
}

impl std::fmt::Display for CandidateTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(node) => write!(f, "node:{node}"),
            Self::Flow(flow) => write!(f, "flow:{flow}"),
            Self::Stations(stations) => {
                let chain = stations
                    .iter()
                    .map(NodeId::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "stations:[{chain}]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    FlowGraph,
    InlineChain,
    InterruptionStack,
    SidequestCatalog,
    TrustGate,
    StallDetector,
    DeadEnd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingCandidate {
    pub candidate_id: String,
    pub action: CandidateAction,
    pub target: CandidateTarget,
    pub priority: i64,
    pub source: CandidateSource,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidequest_id: Option<SidequestId>,
}

/// Closed candidate set for one cycle; nothing outside it may be selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateSet {
    candidates: Vec<RoutingCandidate>,
}

impl CandidateSet {
    pub fn from_candidates(candidates: Vec<RoutingCandidate>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[RoutingCandidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn contains(&self, candidate_id: &str) -> bool {
        self.get(candidate_id).is_some()
    }

    pub fn get(&self, candidate_id: &str) -> Option<&RoutingCandidate> {
        self.candidates
            .iter()
            .find(|candidate| candidate.candidate_id == candidate_id)
    }

    /// Deterministic default: highest priority, earliest generated on ties.
    pub fn highest_priority(&self) -> Option<&RoutingCandidate> {
        self.candidates
            .iter()
            .enumerate()
            .max_by(|(left_index, left), (right_index, right)| {
                left.priority
                    .cmp(&right.priority)
                    .then_with(|| right_index.cmp(left_index))
            })
            .map(|(_, candidate)| candidate)
    }

    pub fn actions(&self) -> Vec<CandidateAction> {
        self.candidates
            .iter()
            .map(|candidate| candidate.action)
            .collect()
    }
}

pub struct GenerationInput<'a> {
    pub run_state: &'a RunState,
    pub flow_graph: &'a FlowGraph,
    pub verdict: &'a Verdict,
    pub sidequests: &'a SidequestCatalog,
    pub interruption_stack: &'a InterruptionStack,
    pub progress: &'a ProgressTracker,
    pub context: &'a RoutingContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateGenerator {
    low_trust_threshold: f64,
    stall_window: usize,
    continue_base_priority: i64,
    inject_flow_priority: i64,
}

impl Default for CandidateGenerator {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

struct Draft {
    action: CandidateAction,
    target: CandidateTarget,
    priority: i64,
    source: CandidateSource,
    rationale: String,
    sidequest_id: Option<SidequestId>,
}

impl CandidateGenerator {
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            low_trust_threshold: config.low_trust_threshold,
            stall_window: config.stall_window,
            continue_base_priority: config.continue_base_priority,
            inject_flow_priority: config.inject_flow_priority,
        }
    }

    pub fn generate(&self, input: &GenerationInput<'_>) -> CandidateSet {
        let state = input.run_state;
        let mut drafts = match &state.inline_chain {
            Some(remaining) => self.inline_baseline(remaining, input.interruption_stack),
            None => self.graph_baseline(input),
        };

        for matched in input.sidequests.applicable(input.context, &state.run_id) {
            let sidequest = matched.sidequest;
            let target = match &sidequest.target {
                SidequestTarget::Flow(flow_key) => {
                    if state.inline_chain.is_some()
                        || !input
                            .flow_graph
                            .injectable_flows(&state.flow_key)
                            .contains(flow_key)
                    {
                        continue;
                    }
                    CandidateTarget::Flow(flow_key.clone())
                }
                SidequestTarget::Stations(stations) => CandidateTarget::Stations(stations.clone()),
            };
            drafts.push(Draft {
                action: CandidateAction::Detour,
                target,
                priority: sidequest.priority.min(MAX_CONFIGURED_PRIORITY),
                source: CandidateSource::SidequestCatalog,
                rationale: matched.reason,
                sidequest_id: Some(sidequest.id.clone()),
            });
        }

        if input.verdict.is_low_trust(self.low_trust_threshold) {
            drafts.retain(|draft| !advances_past(draft, &state.current_step));
            let chain = match input.flow_graph.reverify_chain(&state.flow_key) {
                chain if !chain.is_empty() && state.inline_chain.is_none() => chain.to_vec(),
                _ => vec![state.current_step.clone()],
            };
            drafts.push(Draft {
                action: CandidateAction::InjectNodes,
                target: CandidateTarget::Stations(chain),
                priority: self.continue_base_priority,
                source: CandidateSource::TrustGate,
                rationale: format!(
                    "confidence {:.2} below {:.2}; re-verify `{}` before advancing",
                    input.verdict.confidence, self.low_trust_threshold, state.current_step
                ),
                sidequest_id: None,
            });
        }

        if input.progress.is_stalled(self.stall_window) {
            let signature = input.progress.latest().unwrap_or_default();
            drafts.push(Draft {
                action: CandidateAction::ExtendGraph,
                target: CandidateTarget::Flow(state.flow_key.clone()),
                priority: ESCALATION_PRIORITY,
                source: CandidateSource::StallDetector,
                rationale: format!(
                    "failure `{signature}` repeated {} times at `{}` with no forward progress",
                    self.stall_window, state.current_step
                ),
                sidequest_id: None,
            });
        }

        if drafts.is_empty() {
            drafts.push(Draft {
                action: CandidateAction::ExtendGraph,
                target: CandidateTarget::Flow(state.flow_key.clone()),
                priority: ESCALATION_PRIORITY,
                source: CandidateSource::DeadEnd,
                rationale: format!(
                    "no legal transition from `{}` for status {}",
                    state.current_step,
                    input
                        .context
                        .status
                        .map(|status| status.as_str())
                        .unwrap_or("unknown")
                ),
                sidequest_id: None,
            });
        }

        CandidateSet::from_candidates(
            drafts
                .into_iter()
                .enumerate()
                .map(|(index, draft)| RoutingCandidate {
                    candidate_id: format!("cand-{}", index + 1),
                    action: draft.action,
                    target: draft.target,
                    priority: draft.priority,
                    source: draft.source,
                    rationale: draft.rationale,
                    sidequest_id: draft.sidequest_id,
                })
                .collect(),
        )
    }

    fn inline_baseline(&self, remaining: &[NodeId], stack: &InterruptionStack) -> Vec<Draft> {
        if let Some(next) = remaining.first() {
            return vec![Draft {
                action: CandidateAction::Continue,
                target: CandidateTarget::Node(next.clone()),
                priority: self.continue_base_priority,
                source: CandidateSource::InlineChain,
                rationale: format!("next station in chain ({} remaining)", remaining.len()),
                sidequest_id: None,
            }];
        }
        match stack.peek() {
            Some(frame) => vec![Draft {
                action: CandidateAction::Continue,
                target: CandidateTarget::Node(frame.step_id.clone()),
                priority: self.continue_base_priority,
                source: CandidateSource::InterruptionStack,
                rationale: format!("chain finished; resume `{}` at `{}`", frame.flow_key, frame.step_id),
                sidequest_id: None,
            }],
            None => Vec::new(),
        }
    }

    fn graph_baseline(&self, input: &GenerationInput<'_>) -> Vec<Draft> {
        let state = input.run_state;
        let admitted = input
            .flow_graph
            .outgoing(&state.flow_key, &state.current_step)
            .into_iter()
            .filter(|edge| edge.admits(input.context.status))
            .filter(|edge| {
                !edge.is_self_loop()
                    || edge.max_iterations.is_some_and(|cap| {
                        state.loop_count(&state.current_step) < cap
                    })
            })
            .collect::<Vec<_>>();

        let count = admitted.len() as i64;
        let mut drafts = admitted
            .into_iter()
            .enumerate()
            .map(|(index, edge)| Draft {
                action: CandidateAction::Continue,
                target: CandidateTarget::Node(edge.to.clone()),
                priority: self.continue_base_priority.saturating_add(count - index as i64),
                source: CandidateSource::FlowGraph,
                rationale: match (edge.is_self_loop(), edge.max_iterations) {
                    (true, Some(cap)) => format!(
                        "retry `{}` (iteration {} of {cap})",
                        edge.to,
                        state.loop_count(&state.current_step) + 1
                    ),
                    _ => format!("edge {}", edge.describe()),
                },
                sidequest_id: None,
            })
            .collect::<Vec<_>>();

        for flow_key in input.flow_graph.injectable_flows(&state.flow_key) {
            drafts.push(Draft {
                action: CandidateAction::InjectFlow,
                rationale: format!("suspend `{}` and run `{flow_key}`", state.flow_key),
                target: CandidateTarget::Flow(flow_key),
                priority: self.inject_flow_priority,
                source: CandidateSource::FlowGraph,
                sidequest_id: None,
            });
        }
        drafts
    }
}

/// Candidates the trust gate suppresses: anything that moves on from the current step
/// without re-verifying it. Retrying in place and detours survive.
fn advances_past(draft: &Draft, current_step: &NodeId) -> bool {
    match draft.action {
        CandidateAction::Continue => draft.target != CandidateTarget::Node(current_step.clone()),
        CandidateAction::InjectFlow => true,
        CandidateAction::Detour | CandidateAction::InjectNodes | CandidateAction::ExtendGraph => {
            false
        }
    }
}
