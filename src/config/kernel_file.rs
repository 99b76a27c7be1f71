use super::{ConfigError, RoutingConfig};
use crate::orchestration::evidence::NarrativeStatus;
use crate::shared::ids::{FlowKey, NodeId, SidequestId};
use crate::shared::serde_ext::parse_via_string;
use regex::Regex;
use serde::de::Error as _;
use serde::ser::Serializer;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KernelConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub stations: Vec<NodeId>,
    pub flows: Vec<FlowConfig>,
    #[serde(default)]
    pub sidequests: Vec<SidequestConfig>,
}

impl KernelConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlowConfig {
    pub key: FlowKey,
    pub entry: NodeId,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
    #[serde(default)]
    pub injectable: Vec<FlowKey>,
    #[serde(default)]
    pub reverify: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    Success,
    Failure,
}

impl TerminalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl std::fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub id: NodeId,
    #[serde(default)]
    pub terminal: Option<TerminalKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeGuard {
    Verified,
    Unverified,
    Blocked,
}

impl EdgeGuard {
    pub fn admits(self, status: NarrativeStatus) -> bool {
        matches!(
            (self, status),
            (Self::Verified, NarrativeStatus::Verified)
                | (Self::Unverified, NarrativeStatus::Unverified)
                | (Self::Blocked, NarrativeStatus::Blocked)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Verified => "on VERIFIED",
            Self::Unverified => "on UNVERIFIED",
            Self::Blocked => "on BLOCKED",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub guard: Option<EdgeGuard>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

/// A regular expression over changed file paths, compiled once at load.
#[derive(Debug, Clone)]
pub struct PathPattern(Regex);

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        Regex::new(raw).map(Self).map_err(|err| err.to_string())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.0.is_match(path)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for PathPattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_via_string(deserializer, "path pattern", Self::parse)
    }
}

/// Side-effect-free predicate over a routing context.
///
/// Written in YAML as a single-key map (`flag: ambiguity`, `not: {status: BLOCKED}`),
/// or as the bare string `tests_failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Flag(String),
    FailureType(String),
    PathMatches(PathPattern),
    Status(NarrativeStatus),
    TestsFailed,
    All(Vec<Trigger>),
    Any(Vec<Trigger>),
    Not(Box<Trigger>),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum TriggerRepr {
    Flag(String),
    FailureType(String),
    PathMatches(PathPattern),
    Status(NarrativeStatus),
    TestsFailed,
    All(Vec<Trigger>),
    Any(Vec<Trigger>),
    Not(Box<Trigger>),
}

impl From<TriggerRepr> for Trigger {
    fn from(repr: TriggerRepr) -> Self {
        match repr {
            TriggerRepr::Flag(flag) => Self::Flag(flag),
            TriggerRepr::FailureType(kind) => Self::FailureType(kind),
            TriggerRepr::PathMatches(pattern) => Self::PathMatches(pattern),
            TriggerRepr::Status(status) => Self::Status(status),
            TriggerRepr::TestsFailed => Self::TestsFailed,
            TriggerRepr::All(triggers) => Self::All(triggers),
            TriggerRepr::Any(triggers) => Self::Any(triggers),
            TriggerRepr::Not(trigger) => Self::Not(trigger),
        }
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // serde_yaml only reads externally tagged enums as `!tag` values by default.
        let repr: TriggerRepr =
            serde_yaml::with::singleton_map_recursive::deserialize(deserializer)?;
        Ok(Self::from(repr))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidequestTargetConfig {
    Flow(FlowKey),
    Stations(Vec<NodeId>),
}

#[derive(Debug, Clone, Serialize)]
pub struct SidequestConfig {
    pub id: SidequestId,
    pub priority: i64,
    pub trigger: Trigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowKey>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stations: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl SidequestConfig {
    pub fn target(&self) -> SidequestTargetConfig {
        match &self.flow {
            Some(flow) => SidequestTargetConfig::Flow(flow.clone()),
            None => SidequestTargetConfig::Stations(self.stations.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SidequestConfigRaw {
    id: SidequestId,
    priority: i64,
    trigger: Trigger,
    #[serde(default)]
    flow: Option<FlowKey>,
    #[serde(default)]
    stations: Option<Vec<NodeId>>,
    #[serde(default)]
    rationale: Option<String>,
}

impl<'de> Deserialize<'de> for SidequestConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = SidequestConfigRaw::deserialize(deserializer)?;
        let stations = match (&raw.flow, raw.stations) {
            (Some(_), Some(_)) => {
                return Err(D::Error::custom(format!(
                    "sidequest `{}` must declare exactly one of `flow` or `stations`, not both",
                    raw.id
                )))
            }
            (None, None) => {
                return Err(D::Error::custom(format!(
                    "sidequest `{}` must declare one of `flow` or `stations`",
                    raw.id
                )))
            }
            (None, Some(stations)) if stations.is_empty() => {
                return Err(D::Error::custom(format!(
                    "sidequest `{}` requires a non-empty `stations` chain",
                    raw.id
                )))
            }
            (_, stations) => stations.unwrap_or_default(),
        };
        Ok(Self {
            id: raw.id,
            priority: raw.priority,
            trigger: raw.trigger,
            flow: raw.flow,
            stations,
            rationale: raw.rationale,
        })
    }
}
