use stationmaster::orchestration::decision::{DecisionRecord, LogEvent};
use stationmaster::orchestration::error::RoutingError;
use stationmaster::orchestration::forensics::Verdict;
use stationmaster::orchestration::run_state::{RunState, RunStatus};
use stationmaster::orchestration::run_store::{GraphExtensionProposal, RunStore};
use stationmaster::shared::ids::{FlowKey, NodeId, RunId};
use std::collections::BTreeMap;
use std::fs;
use tempfile::tempdir;

fn run_id() -> RunId {
    RunId::parse("run-1").expect("run id")
}

fn state(sequence: u64) -> RunState {
    RunState {
        run_id: run_id(),
        flow_key: FlowKey::parse("build").expect("flow"),
        current_step: NodeId::parse("author").expect("node"),
        status: RunStatus::Running,
        interruption_stack: Vec::new(),
        progress_window: Vec::new(),
        inline_chain: None,
        loop_counts: BTreeMap::new(),
        pause_cause: None,
        pending_proposals: Vec::new(),
        last_sequence: sequence,
        updated_at: 10,
    }
}

fn started(sequence: u64) -> DecisionRecord {
    DecisionRecord {
        run_id: run_id(),
        sequence_number: sequence,
        timestamp: 10,
        event: LogEvent::RunStarted {
            flow_key: FlowKey::parse("build").expect("flow"),
            entry: NodeId::parse("author").expect("node"),
        },
        resulting_state: state(sequence),
    }
}

#[test]
fn run_store_appends_records_in_sequence() {
    let temp = tempdir().expect("tempdir");
    let store = RunStore::new(temp.path());

    store.append_record(&started(1), 0).expect("append first");
    store.append_record(&started(2), 1).expect("append second");

    let records = store.load_records(&run_id()).expect("load records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].sequence_number, 2);

    let raw = fs::read_to_string(store.decision_log_path(&run_id())).expect("read log");
    assert_eq!(raw.lines().count(), 2);
    assert!(raw.ends_with('\n'));
}

#[test]
fn run_store_refuses_out_of_order_sequence_numbers() {
    let temp = tempdir().expect("tempdir");
    let store = RunStore::new(temp.path());
    store.append_record(&started(1), 0).expect("append first");

    let err = store
        .append_record(&started(3), 1)
        .expect_err("gap must be rejected");
    assert!(matches!(
        err,
        RoutingError::SequenceGap {
            expected: 2,
            found: 3,
            ..
        }
    ));
    assert_eq!(store.load_records(&run_id()).expect("load").len(), 1);
}

#[test]
fn run_store_persists_snapshots_and_lists_runs() {
    let temp = tempdir().expect("tempdir");
    let store = RunStore::new(temp.path());
    store.append_record(&started(1), 0).expect("append");
    store.persist_snapshot(&state(1)).expect("persist snapshot");

    assert_eq!(store.load_snapshot(&run_id()).expect("snapshot"), state(1));
    assert_eq!(store.list_runs().expect("list runs"), vec![run_id()]);
}

#[test]
fn run_store_archives_runs_and_still_loads_their_logs() {
    let temp = tempdir().expect("tempdir");
    let store = RunStore::new(temp.path());
    store.append_record(&started(1), 0).expect("append");

    let archived = store.archive_run(&run_id()).expect("archive");
    assert!(archived.ends_with("archive/run-1"));
    assert!(store.is_archived(&run_id()));
    assert!(store.run_exists(&run_id()));
    assert!(store.list_runs().expect("list").is_empty());
    assert_eq!(store.load_records(&run_id()).expect("load archived").len(), 1);
}

#[test]
fn run_store_reports_unknown_runs() {
    let temp = tempdir().expect("tempdir");
    let store = RunStore::new(temp.path());
    let err = store.load_records(&run_id()).expect_err("missing run");
    assert!(matches!(err, RoutingError::UnknownRun { .. }));
}

#[test]
fn run_store_writes_graph_extension_proposals_beside_the_log() {
    let temp = tempdir().expect("tempdir");
    let store = RunStore::new(temp.path());
    let proposal = GraphExtensionProposal {
        run_id: run_id(),
        sequence_number: 7,
        flow_key: FlowKey::parse("build").expect("flow"),
        step_id: NodeId::parse("critic").expect("node"),
        rationale: "failure `E` repeated 3 times".to_string(),
        recent_failures: vec!["E".to_string(); 3],
        verdict: Verdict {
            confidence: 1.0,
            discrepancies: Vec::new(),
            signals_checked: Vec::new(),
            signals_unmeasured: Vec::new(),
        },
        proposed_at: 42,
    };

    let path = store.write_proposal(&proposal).expect("write proposal");
    assert!(path.ends_with("runs/run-1/proposals/000007-extend-graph.json"));
    assert_eq!(store.load_proposal(&path).expect("load proposal"), proposal);
}
