use serde_json::json;
use stationmaster::config::PenaltyWeights;
use stationmaster::orchestration::evidence::EvidenceBundle;
use stationmaster::orchestration::forensics::{
    DiscrepancyKind, ForensicComparator, Severity, Signal,
};
use std::fs;
use tempfile::tempdir;

fn load(body: serde_json::Value) -> EvidenceBundle {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("evidence.json");
    fs::write(&path, serde_json::to_vec(&body).expect("encode")).expect("write evidence");
    EvidenceBundle::from_path(&path).expect("load evidence")
}

#[test]
fn worker_claiming_green_tests_against_a_red_run_is_low_trust() {
    let evidence = load(json!({
        "flowKey": "build",
        "stepId": "author",
        "tests": { "passed": 10, "failed": 1, "failedIds": ["parser::eof"] },
        "narrative": { "status": "VERIFIED", "summary": "Implemented parser. All tests pass." }
    }));

    let verdict = ForensicComparator::default().compare(&evidence);
    assert!(verdict.confidence <= 0.5);
    assert!(verdict.is_low_trust(0.6));
    let contradiction = &verdict.discrepancies[0];
    assert_eq!(contradiction.kind, DiscrepancyKind::TestFailureContradiction);
    assert_eq!(contradiction.severity, Severity::Hard);
    assert_eq!(verdict.signals_unmeasured, vec![Signal::Diff]);
}

#[test]
fn phantom_and_unreported_files_are_both_reported() {
    let evidence = load(json!({
        "flowKey": "build",
        "stepId": "author",
        "diff": [{ "path": "src/lexer.rs", "linesAdded": 4 }],
        "narrative": {
            "status": "UNVERIFIED",
            "claimedFiles": ["src/parser.rs"]
        }
    }));

    let verdict = ForensicComparator::default().compare(&evidence);
    assert!(verdict.has(DiscrepancyKind::PhantomFileClaim));
    assert!(verdict.has(DiscrepancyKind::UnreportedChange));
    assert_eq!(verdict.confidence, 0.2);
}

#[test]
fn configured_penalties_change_the_score() {
    let evidence = load(json!({
        "flowKey": "build",
        "stepId": "author",
        "diff": [{ "path": "src/lexer.rs" }, { "path": "README.md" }],
        "narrative": { "status": "UNVERIFIED", "claimedFiles": ["src/lexer.rs"] }
    }));
    let penalties = PenaltyWeights {
        soft_mismatch: 0.1,
        ..PenaltyWeights::default()
    };

    let verdict = ForensicComparator::new(penalties).compare(&evidence);
    assert_eq!(verdict.confidence, 0.9);
}

#[test]
fn narrative_without_measurements_keeps_full_confidence() {
    let evidence = load(json!({
        "flowKey": "build",
        "stepId": "author",
        "narrative": { "status": "BLOCKED", "summary": "waiting on credentials" }
    }));

    let verdict = ForensicComparator::default().compare(&evidence);
    assert_eq!(verdict.confidence, 1.0);
    assert!(verdict.discrepancies.is_empty());
    assert_eq!(verdict.signals_unmeasured, vec![Signal::Tests, Signal::Diff]);
}
