//! Compares a worker's narrative against independently measured evidence.
//!
//! Scoring starts at 1.0 and subtracts one penalty per discrepancy kind found:
//!
//! | discrepancy                | severity | default penalty |
//! |----------------------------|----------|-----------------|
//! | test_failure_contradiction | hard     | 0.5             |
//! | phantom_file_claim         | hard     | 0.5             |
//! | unreported_change          | soft     | 0.3             |
//! | missing_test_evidence      | soft     | 0.3             |
//! | unsubstantiated_claim      | soft     | 0.3             |
//!
//! The result is clamped to [0.0, 1.0] and rounded to four decimals. Signals that were not
//! measured are listed in `signals_unmeasured` and never scored.

use crate::config::PenaltyWeights;
use crate::orchestration::evidence::{EvidenceBundle, NarrativeStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    TestFailureContradiction,
    PhantomFileClaim,
    UnreportedChange,
    MissingTestEvidence,
    UnsubstantiatedClaim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Tests,
    Diff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub severity: Severity,
    pub penalty: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub confidence: f64,
    #[serde(default)]
    pub discrepancies: Vec<Discrepancy>,
    #[serde(default)]
    pub signals_checked: Vec<Signal>,
    #[serde(default)]
    pub signals_unmeasured: Vec<Signal>,
}

impl Verdict {
    pub fn is_low_trust(&self, threshold: f64) -> bool {
        self.confidence < threshold
    }

    pub fn has(&self, kind: DiscrepancyKind) -> bool {
        self.discrepancies.iter().any(|entry| entry.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForensicComparator {
    penalties: PenaltyWeights,
}

impl Default for ForensicComparator {
    fn default() -> Self {
        Self::new(PenaltyWeights::default())
    }
}

impl ForensicComparator {
    pub fn new(penalties: PenaltyWeights) -> Self {
        Self { penalties }
    }

    pub fn compare(&self, evidence: &EvidenceBundle) -> Verdict {
        let narrative = &evidence.narrative;
        let claims_success = narrative.status == Some(NarrativeStatus::Verified);
        let mut discrepancies = Vec::new();
        let mut checked = Vec::new();
        let mut unmeasured = Vec::new();

        match &evidence.tests {
            Some(tests) => {
                checked.push(Signal::Tests);
                let claims_pass = narrative.claims_tests_pass() || claims_success;
                if claims_pass && tests.failed > 0 {
                    let detail = if tests.failed_ids.is_empty() {
                        format!(
                            "narrative claims success but measured run shows {} failed, {} passed",
                            tests.failed, tests.passed
                        )
                    } else {
                        format!(
                            "narrative claims success but measured run shows {} failed, {} passed ({})",
                            tests.failed,
                            tests.passed,
                            tests.failed_ids.join(", ")
                        )
                    };
                    discrepancies.push(Discrepancy {
                        kind: DiscrepancyKind::TestFailureContradiction,
                        severity: Severity::Hard,
                        penalty: self.penalties.hard_contradiction,
                        detail,
                    });
                }
                if claims_success && tests.total() == 0 {
                    discrepancies.push(Discrepancy {
                        kind: DiscrepancyKind::MissingTestEvidence,
                        severity: Severity::Soft,
                        penalty: self.penalties.missing_test_evidence,
                        detail: "narrative claims VERIFIED but the measured test run executed nothing"
                            .to_string(),
                    });
                }
            }
            None => unmeasured.push(Signal::Tests),
        }

        match (&evidence.diff, &narrative.claimed_files) {
            (Some(diff), Some(claimed)) => {
                checked.push(Signal::Diff);
                let measured = diff
                    .iter()
                    .map(|change| change.path.as_str())
                    .collect::<BTreeSet<_>>();
                let claimed = claimed.iter().map(String::as_str).collect::<BTreeSet<_>>();

                let phantom = claimed.difference(&measured).copied().collect::<Vec<_>>();
                if !phantom.is_empty() {
                    discrepancies.push(Discrepancy {
                        kind: DiscrepancyKind::PhantomFileClaim,
                        severity: Severity::Hard,
                        penalty: self.penalties.hard_contradiction,
                        detail: format!(
                            "narrative claims changes absent from the measured diff: {}",
                            phantom.join(", ")
                        ),
                    });
                }
                let omitted = measured.difference(&claimed).copied().collect::<Vec<_>>();
                if !omitted.is_empty() {
                    discrepancies.push(Discrepancy {
                        kind: DiscrepancyKind::UnreportedChange,
                        severity: Severity::Soft,
                        penalty: self.penalties.soft_mismatch,
                        detail: format!(
                            "measured diff contains changes the narrative omits: {}",
                            omitted.join(", ")
                        ),
                    });
                }
            }
            (Some(_), None) => {}
            (None, _) => unmeasured.push(Signal::Diff),
        }

        if claims_success && checked.is_empty() {
            discrepancies.push(Discrepancy {
                kind: DiscrepancyKind::UnsubstantiatedClaim,
                severity: Severity::Soft,
                penalty: self.penalties.soft_mismatch,
                detail: "narrative claims VERIFIED but no corroborating signal was measured"
                    .to_string(),
            });
        }

        let penalty_total = discrepancies
            .iter()
            .map(|entry| entry.penalty)
            .sum::<f64>();
        Verdict {
            confidence: clamp_confidence(1.0 - penalty_total),
            discrepancies,
            signals_checked: checked,
            signals_unmeasured: unmeasured,
        }
    }
}

fn clamp_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let clamped = raw.clamp(0.0, 1.0);
    (clamped * 10_000.0).round() / 10_000.0
}
