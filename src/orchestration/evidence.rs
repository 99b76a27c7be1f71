//! Measured facts for one executed step, plus the worker's own account of it.
//!
//! Every measured field is optional: `None` means "not measured", which the kernel never
//! treats as corroborating or contradicting anything.

use crate::shared::ids::{FlowKey, NodeId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NarrativeStatus {
    Verified,
    Unverified,
    Blocked,
}

impl NarrativeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verified => "VERIFIED",
            Self::Unverified => "UNVERIFIED",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl std::fmt::Display for NarrativeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    #[serde(default)]
    pub lines_added: u32,
    #[serde(default)]
    pub lines_removed: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcomes {
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub failed_ids: Vec<String>,
}

impl TestOutcomes {
    pub fn total(&self) -> u32 {
        self.passed
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Narrative {
    #[serde(default)]
    pub status: Option<NarrativeStatus>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub claimed_files: Option<Vec<String>>,
    #[serde(default)]
    pub claims_tests_pass: Option<bool>,
}

const PASSING_TEST_PHRASES: [&str; 6] = [
    "all tests pass",
    "tests pass",
    "tests are passing",
    "tests passing",
    "tests green",
    "test suite passes",
];

const NEGATING_PHRASES: [&str; 4] = ["fail", "not pass", "don't pass", "do not pass"];

impl Narrative {
    /// An explicit `claimsTestsPass` wins; otherwise the summary is scanned for a passing claim.
    pub fn claims_tests_pass(&self) -> bool {
        if let Some(explicit) = self.claims_tests_pass {
            return explicit;
        }
        let summary = self.summary.to_ascii_lowercase();
        if NEGATING_PHRASES
            .iter()
            .any(|phrase| summary.contains(phrase))
        {
            return false;
        }
        PASSING_TEST_PHRASES
            .iter()
            .any(|phrase| summary.contains(phrase))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceBundle {
    pub flow_key: FlowKey,
    pub step_id: NodeId,
    #[serde(default)]
    pub diff: Option<Vec<FileChange>>,
    #[serde(default)]
    pub tests: Option<TestOutcomes>,
    #[serde(default)]
    pub narrative: Narrative,
    #[serde(default)]
    pub error_signature: Option<String>,
    #[serde(default)]
    pub failure_type: Option<String>,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub collected_at: i64,
}

impl EvidenceBundle {
    pub fn from_path(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|err| format!("failed to read evidence {}: {err}", path.display()))?;
        serde_json::from_str(&raw)
            .map_err(|err| format!("invalid evidence json {}: {err}", path.display()))
    }

    pub fn changed_paths(&self) -> Vec<String> {
        self.diff
            .as_ref()
            .map(|changes| changes.iter().map(|change| change.path.clone()).collect())
            .unwrap_or_default()
    }

    pub fn measured_test_failures(&self) -> bool {
        self.tests.as_ref().is_some_and(|tests| tests.failed > 0)
    }

    /// Opaque fingerprint of the failure this step ended with, if any.
    ///
    /// A worker-supplied signature is used verbatim. Otherwise measured failing tests are
    /// hashed so the same failing set always yields the same signature.
    pub fn failure_signature(&self) -> Option<String> {
        if let Some(signature) = self
            .error_signature
            .as_ref()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
        {
            return Some(signature.to_string());
        }
        let tests = self.tests.as_ref().filter(|tests| tests.failed > 0)?;
        let mut ids = tests.failed_ids.clone();
        ids.sort();
        ids.dedup();
        let mut hasher = Sha256::new();
        hasher.update(self.step_id.as_str().as_bytes());
        hasher.update(b"\n");
        if ids.is_empty() {
            hasher.update(format!("failed={}", tests.failed).as_bytes());
        } else {
            hasher.update(ids.join("\n").as_bytes());
        }
        let digest = hasher.finalize();
        let hex = digest
            .iter()
            .take(8)
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        Some(format!("tests:{hex}"))
    }
}
