use stationmaster::orchestration::decision::ProgressUpdate;
use stationmaster::orchestration::evidence::{EvidenceBundle, Narrative, NarrativeStatus};
use stationmaster::orchestration::progress::{ProgressTracker, DEFAULT_STALL_WINDOW};
use stationmaster::shared::ids::{FlowKey, NodeId};
use std::collections::BTreeSet;

fn failing_bundle(signature: Option<&str>) -> EvidenceBundle {
    EvidenceBundle {
        flow_key: FlowKey::parse("build").expect("flow"),
        step_id: NodeId::parse("critic").expect("node"),
        diff: None,
        tests: None,
        narrative: Narrative {
            status: Some(NarrativeStatus::Unverified),
            ..Narrative::default()
        },
        error_signature: signature.map(str::to_string),
        failure_type: None,
        flags: BTreeSet::new(),
        collected_at: 0,
    }
}

fn apply(tracker: &mut ProgressTracker, update: ProgressUpdate) {
    match update {
        ProgressUpdate::Recorded { signature } => tracker.record(signature),
        ProgressUpdate::Reset => tracker.reset(),
    }
}

#[test]
fn stall_requires_a_full_window_of_identical_signatures() {
    let cases: [(&[&str], bool); 6] = [
        (&[], false),
        (&["E1"], false),
        (&["E1", "E1"], false),
        (&["E1", "E1", "E1"], true),
        (&["E1", "E2", "E1"], false),
        (&["E2", "E1", "E1", "E1"], true),
    ];

    for (history, expected) in cases {
        let mut tracker = ProgressTracker::new(DEFAULT_STALL_WINDOW);
        for signature in history {
            tracker.record(*signature);
        }
        assert_eq!(
            tracker.is_stalled(DEFAULT_STALL_WINDOW),
            expected,
            "history {history:?}"
        );
    }
}

#[test]
fn evidence_without_a_failure_clears_the_window() {
    let mut tracker = ProgressTracker::new(DEFAULT_STALL_WINDOW);
    for _ in 0..2 {
        let update = ProgressUpdate::from_signature(failing_bundle(Some("E1")).failure_signature());
        apply(&mut tracker, update);
    }
    assert_eq!(tracker.latest(), Some("E1"));

    let update = ProgressUpdate::from_signature(failing_bundle(None).failure_signature());
    assert_eq!(update, ProgressUpdate::Reset);
    apply(&mut tracker, update);
    assert!(tracker.window().is_empty());

    let update = ProgressUpdate::from_signature(failing_bundle(Some("E1")).failure_signature());
    apply(&mut tracker, update);
    assert!(!tracker.is_stalled(DEFAULT_STALL_WINDOW));
}

#[test]
fn window_is_rebuilt_from_persisted_signatures() {
    let persisted = vec!["E1".to_string(), "E1".to_string(), "E1".to_string()];
    let tracker = ProgressTracker::from_window(DEFAULT_STALL_WINDOW, &persisted);
    assert!(tracker.is_stalled(DEFAULT_STALL_WINDOW));
    assert_eq!(tracker.window(), persisted);
}
