//! Trigger -> target rules evaluated fresh every routing cycle.

use crate::config::{
    ConfigError, KernelConfig, SidequestTargetConfig, Trigger, MAX_CONFIGURED_PRIORITY,
};
use crate::orchestration::evidence::{EvidenceBundle, NarrativeStatus};
use crate::orchestration::flow_graph::FlowGraph;
use crate::shared::ids::{FlowKey, NodeId, RunId, SidequestId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Facts a trigger may inspect. Built from the current evidence only, so no trigger can
/// observe its own prior firing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingContext {
    pub flow_key: Option<FlowKey>,
    pub step_id: Option<NodeId>,
    pub status: Option<NarrativeStatus>,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub failure_type: Option<String>,
    #[serde(default)]
    pub changed_paths: Vec<String>,
    #[serde(default)]
    pub tests_failed: bool,
}

impl RoutingContext {
    pub fn from_evidence(evidence: &EvidenceBundle, extra_flags: &[String]) -> Self {
        let mut flags = evidence.flags.clone();
        flags.extend(extra_flags.iter().cloned());
        Self {
            flow_key: Some(evidence.flow_key.clone()),
            step_id: Some(evidence.step_id.clone()),
            status: evidence.narrative.status,
            flags,
            failure_type: evidence.failure_type.clone(),
            changed_paths: evidence.changed_paths(),
            tests_failed: evidence.measured_test_failures(),
        }
    }
}

impl Trigger {
    pub fn matches(&self, context: &RoutingContext) -> bool {
        match self {
            Self::Flag(flag) => context.flags.contains(flag),
            Self::FailureType(kind) => context
                .failure_type
                .as_deref()
                .is_some_and(|value| value.eq_ignore_ascii_case(kind)),
            Self::PathMatches(pattern) => context
                .changed_paths
                .iter()
                .any(|path| pattern.is_match(path)),
            Self::Status(status) => context.status == Some(*status),
            Self::TestsFailed => context.tests_failed,
            Self::All(triggers) => triggers.iter().all(|trigger| trigger.matches(context)),
            Self::Any(triggers) => triggers.iter().any(|trigger| trigger.matches(context)),
            Self::Not(trigger) => !trigger.matches(context),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Flag(flag) => format!("flag `{flag}` set"),
            Self::FailureType(kind) => format!("failure_type == {kind}"),
            Self::PathMatches(pattern) => format!("path matches `{}`", pattern.as_str()),
            Self::Status(status) => format!("status == {status}"),
            Self::TestsFailed => "measured test failures".to_string(),
            Self::All(triggers) => join_described("all", triggers),
            Self::Any(triggers) => join_described("any", triggers),
            Self::Not(trigger) => format!("not({})", trigger.describe()),
        }
    }
}

fn join_described(label: &str, triggers: &[Trigger]) -> String {
    let inner = triggers
        .iter()
        .map(Trigger::describe)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{label}({inner})")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum SidequestTarget {
    Flow(FlowKey),
    Stations(Vec<NodeId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sidequest {
    pub id: SidequestId,
    pub priority: i64,
    pub trigger: Trigger,
    pub target: SidequestTarget,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SidequestMatch<'a> {
    pub sidequest: &'a Sidequest,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidequestCatalog {
    sidequests: Vec<Sidequest>,
}

impl SidequestCatalog {
    pub fn from_config(config: &KernelConfig, graph: &FlowGraph) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut sidequests = Vec::with_capacity(config.sidequests.len());
        for entry in &config.sidequests {
            if !seen.insert(entry.id.clone()) {
                return Err(ConfigError::Sidequest(format!(
                    "sidequest `{}` is declared more than once",
                    entry.id
                )));
            }
            if !(-MAX_CONFIGURED_PRIORITY..=MAX_CONFIGURED_PRIORITY).contains(&entry.priority) {
                return Err(ConfigError::Sidequest(format!(
                    "sidequest `{}` priority {} is outside +/-{MAX_CONFIGURED_PRIORITY}",
                    entry.id, entry.priority
                )));
            }
            let target = match entry.target() {
                SidequestTargetConfig::Flow(flow_key) => {
                    if graph.flow(&flow_key).is_none() {
                        return Err(ConfigError::Sidequest(format!(
                            "sidequest `{}` targets unknown flow `{flow_key}`",
                            entry.id
                        )));
                    }
                    SidequestTarget::Flow(flow_key)
                }
                SidequestTargetConfig::Stations(stations) => {
                    if let Some(unknown) = stations
                        .iter()
                        .find(|station| !graph.is_known_station(station))
                    {
                        return Err(ConfigError::Sidequest(format!(
                            "sidequest `{}` references unknown station `{unknown}`",
                            entry.id
                        )));
                    }
                    SidequestTarget::Stations(stations)
                }
            };
            sidequests.push(Sidequest {
                id: entry.id.clone(),
                priority: entry.priority,
                trigger: entry.trigger.clone(),
                target,
                rationale: entry.rationale.clone(),
            });
        }
        Ok(Self { sidequests })
    }

    pub fn new(sidequests: Vec<Sidequest>) -> Self {
        Self { sidequests }
    }

    pub fn sidequests(&self) -> &[Sidequest] {
        &self.sidequests
    }

    pub fn len(&self) -> usize {
        self.sidequests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sidequests.is_empty()
    }

    /// Sidequests whose trigger holds, highest priority first; ties keep declaration order.
    pub fn applicable(&self, context: &RoutingContext, run_id: &RunId) -> Vec<SidequestMatch<'_>> {
        let mut matched = self
            .sidequests
            .iter()
            .filter(|sidequest| sidequest.trigger.matches(context))
            .map(|sidequest| SidequestMatch {
                sidequest,
                reason: format!(
                    "run `{run_id}`: {}",
                    sidequest
                        .rationale
                        .clone()
                        .unwrap_or_else(|| sidequest.trigger.describe())
                ),
            })
            .collect::<Vec<_>>();
        matched.sort_by(|left, right| right.sidequest.priority.cmp(&left.sidequest.priority));
        matched
    }
}
