use stationmaster::config::{KernelConfig, RoutingConfig, Trigger, MAX_CONFIGURED_PRIORITY};
use stationmaster::orchestration::candidates::{
    CandidateAction, CandidateGenerator, CandidateSet, CandidateSource, CandidateTarget,
    GenerationInput, ESCALATION_PRIORITY,
};
use stationmaster::orchestration::evidence::NarrativeStatus;
use stationmaster::orchestration::flow_graph::FlowGraph;
use stationmaster::orchestration::forensics::Verdict;
use stationmaster::orchestration::interruption::InterruptionStack;
use stationmaster::orchestration::progress::ProgressTracker;
use stationmaster::orchestration::run_state::{RunState, RunStatus};
use stationmaster::orchestration::sidequest::{
    RoutingContext, Sidequest, SidequestCatalog, SidequestTarget,
};
use stationmaster::shared::ids::{FlowKey, NodeId, RunId, SidequestId};
use std::collections::{BTreeMap, BTreeSet};

const CONFIG: &str = r#"
stations: [clarifier, reviewer]
flows:
  - key: build
    entry: author
    injectable: [repair]
    reverify: [reviewer]
    nodes:
      - id: author
      - id: critic
      - id: merged
        terminal: success
      - id: abandoned
        terminal: failure
    edges:
      - from: author
        to: critic
      - from: critic
        to: critic
        max_iterations: 2
      - from: critic
        to: merged
        guard: verified
      - from: critic
        to: abandoned
        guard: blocked
  - key: repair
    entry: fix
    nodes:
      - id: fix
      - id: fixed
        terminal: success
    edges:
      - from: fix
        to: fixed
sidequests:
  - id: clarify
    priority: 40
    trigger:
      flag: ambiguity
    stations: [clarifier]
  - id: hotfix
    priority: 60
    trigger:
      failure_type: environment
    flow: repair
"#;

struct Fixture {
    graph: FlowGraph,
    catalog: SidequestCatalog,
    generator: CandidateGenerator,
}

fn fixture() -> Fixture {
    let config: KernelConfig = serde_yaml::from_str(CONFIG).expect("parse config");
    let graph = FlowGraph::from_config(&config).expect("graph");
    let catalog = SidequestCatalog::from_config(&config, &graph).expect("catalog");
    Fixture {
        graph,
        catalog,
        generator: CandidateGenerator::from_config(&config.routing),
    }
}

fn node(raw: &str) -> NodeId {
    NodeId::parse(raw).expect("node id")
}

fn state_at(flow: &str, step: &str) -> RunState {
    RunState {
        run_id: RunId::parse("run-1").expect("run id"),
        flow_key: FlowKey::parse(flow).expect("flow key"),
        current_step: node(step),
        status: RunStatus::Running,
        interruption_stack: Vec::new(),
        progress_window: Vec::new(),
        inline_chain: None,
        loop_counts: BTreeMap::new(),
        pause_cause: None,
        pending_proposals: Vec::new(),
        last_sequence: 1,
        updated_at: 0,
    }
}

fn verdict(confidence: f64) -> Verdict {
    Verdict {
        confidence,
        discrepancies: Vec::new(),
        signals_checked: Vec::new(),
        signals_unmeasured: Vec::new(),
    }
}

fn context(status: NarrativeStatus, flags: &[&str]) -> RoutingContext {
    RoutingContext {
        status: Some(status),
        flags: flags.iter().map(|flag| flag.to_string()).collect::<BTreeSet<_>>(),
        ..RoutingContext::default()
    }
}

fn generate(
    fixture: &Fixture,
    state: &RunState,
    verdict: &Verdict,
    progress: &ProgressTracker,
    context: &RoutingContext,
) -> CandidateSet {
    let stack = state.stack(4);
    fixture.generator.generate(&GenerationInput {
        run_state: state,
        flow_graph: &fixture.graph,
        verdict,
        sidequests: &fixture.catalog,
        interruption_stack: &stack,
        progress,
        context,
    })
}

fn continue_targets(set: &CandidateSet) -> Vec<String> {
    set.candidates()
        .iter()
        .filter(|candidate| candidate.action == CandidateAction::Continue)
        .map(|candidate| candidate.target.to_string())
        .collect()
}

#[test]
fn baseline_offers_one_continue_per_admitted_edge_in_edge_order() {
    let fixture = fixture();
    let set = generate(
        &fixture,
        &state_at("build", "critic"),
        &verdict(1.0),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Verified, &[]),
    );

    assert_eq!(
        continue_targets(&set),
        vec!["node:critic".to_string(), "node:merged".to_string()]
    );
    let priorities = set
        .candidates()
        .iter()
        .filter(|candidate| candidate.action == CandidateAction::Continue)
        .map(|candidate| candidate.priority)
        .collect::<Vec<_>>();
    assert_eq!(priorities, vec![102, 101]);

    let inject = set
        .candidates()
        .iter()
        .find(|candidate| candidate.action == CandidateAction::InjectFlow)
        .expect("inject flow candidate");
    assert_eq!(inject.target, CandidateTarget::Flow(FlowKey::parse("repair").expect("key")));
    assert_eq!(inject.priority, 10);

    let ids = set
        .candidates()
        .iter()
        .map(|candidate| candidate.candidate_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["cand-1", "cand-2", "cand-3"]);
}

#[test]
fn edge_guards_filter_by_narrative_status() {
    let fixture = fixture();
    let set = generate(
        &fixture,
        &state_at("build", "critic"),
        &verdict(1.0),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Blocked, &[]),
    );
    assert_eq!(
        continue_targets(&set),
        vec!["node:critic".to_string(), "node:abandoned".to_string()]
    );
}

#[test]
fn self_loop_disappears_once_its_iteration_cap_is_spent() {
    let fixture = fixture();
    let mut state = state_at("build", "critic");
    state.loop_counts.insert(node("critic"), 2);
    let set = generate(
        &fixture,
        &state,
        &verdict(1.0),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Verified, &[]),
    );
    assert_eq!(continue_targets(&set), vec!["node:merged".to_string()]);
}

#[test]
fn applicable_sidequests_add_detours_at_their_own_priority() {
    let fixture = fixture();
    let mut ctx = context(NarrativeStatus::Unverified, &["ambiguity"]);
    ctx.failure_type = Some("environment".to_string());
    let set = generate(
        &fixture,
        &state_at("build", "author"),
        &verdict(1.0),
        &ProgressTracker::new(3),
        &ctx,
    );

    let detours = set
        .candidates()
        .iter()
        .filter(|candidate| candidate.action == CandidateAction::Detour)
        .map(|candidate| (candidate.target.to_string(), candidate.priority))
        .collect::<Vec<_>>();
    assert_eq!(
        detours,
        vec![
            ("flow:repair".to_string(), 60),
            ("stations:[clarifier]".to_string(), 40)
        ]
    );
    assert!(set
        .candidates()
        .iter()
        .filter(|candidate| candidate.action == CandidateAction::Detour)
        .all(|candidate| candidate.source == CandidateSource::SidequestCatalog
            && candidate.sidequest_id.is_some()));
}

#[test]
fn low_trust_suppresses_every_candidate_that_advances_past_the_current_step() {
    let fixture = fixture();
    let set = generate(
        &fixture,
        &state_at("build", "critic"),
        &verdict(0.5),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Verified, &["ambiguity"]),
    );

    for candidate in set.candidates() {
        match candidate.action {
            CandidateAction::Continue => {
                assert_eq!(candidate.target, CandidateTarget::Node(node("critic")))
            }
            CandidateAction::InjectFlow => panic!("inject flow must be suppressed"),
            _ => {}
        }
    }
    let reverify = set
        .candidates()
        .iter()
        .find(|candidate| candidate.source == CandidateSource::TrustGate)
        .expect("re-verification candidate");
    assert_eq!(reverify.action, CandidateAction::InjectNodes);
    assert_eq!(reverify.target, CandidateTarget::Stations(vec![node("reviewer")]));
    assert!(set
        .candidates()
        .iter()
        .any(|candidate| candidate.action == CandidateAction::Detour));
}

#[test]
fn stall_forces_extend_graph_at_maximum_priority() {
    let fixture = fixture();
    let progress = ProgressTracker::from_window(
        3,
        &["E".to_string(), "E".to_string(), "E".to_string()],
    );
    let set = generate(
        &fixture,
        &state_at("build", "critic"),
        &verdict(1.0),
        &progress,
        &context(NarrativeStatus::Unverified, &[]),
    );

    let top = set.highest_priority().expect("non-empty set");
    assert_eq!(top.action, CandidateAction::ExtendGraph);
    assert_eq!(top.source, CandidateSource::StallDetector);
    assert_eq!(top.priority, i64::MAX);
}

#[test]
fn stall_outranks_a_sidequest_configured_at_the_top_priority() {
    let mut fixture = fixture();
    fixture.catalog = SidequestCatalog::new(vec![Sidequest {
        id: SidequestId::parse("urgent").expect("sidequest id"),
        priority: i64::MAX,
        trigger: Trigger::Flag("ambiguity".to_string()),
        target: SidequestTarget::Stations(vec![node("clarifier")]),
        rationale: None,
    }]);
    let progress = ProgressTracker::from_window(
        3,
        &["E".to_string(), "E".to_string(), "E".to_string()],
    );
    let set = generate(
        &fixture,
        &state_at("build", "critic"),
        &verdict(1.0),
        &progress,
        &context(NarrativeStatus::Unverified, &["ambiguity"]),
    );

    let detour = set
        .candidates()
        .iter()
        .find(|candidate| candidate.action == CandidateAction::Detour)
        .expect("sidequest detour");
    assert_eq!(detour.priority, MAX_CONFIGURED_PRIORITY);
    let top = set.highest_priority().expect("non-empty set");
    assert_eq!(top.source, CandidateSource::StallDetector);
    assert_eq!(top.priority, ESCALATION_PRIORITY);
}

#[test]
fn edge_priorities_stay_ordered_at_the_configured_ceiling() {
    let mut fixture = fixture();
    fixture.generator = CandidateGenerator::from_config(&RoutingConfig {
        continue_base_priority: MAX_CONFIGURED_PRIORITY,
        ..RoutingConfig::default()
    });
    let set = generate(
        &fixture,
        &state_at("build", "critic"),
        &verdict(1.0),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Verified, &[]),
    );

    let priorities = set
        .candidates()
        .iter()
        .filter(|candidate| candidate.action == CandidateAction::Continue)
        .map(|candidate| candidate.priority)
        .collect::<Vec<_>>();
    assert_eq!(
        priorities,
        vec![MAX_CONFIGURED_PRIORITY + 2, MAX_CONFIGURED_PRIORITY + 1]
    );
    assert_eq!(
        set.highest_priority().map(|candidate| candidate.target.to_string()),
        Some("node:critic".to_string())
    );
}

#[test]
fn dead_end_still_surfaces_an_escalation() {
    let config: KernelConfig = serde_yaml::from_str(
        r#"
flows:
  - key: gated
    entry: a
    nodes:
      - id: a
      - id: done
        terminal: success
    edges:
      - from: a
        to: done
        guard: verified
"#,
    )
    .expect("parse config");
    let graph = FlowGraph::from_config(&config).expect("graph");
    let catalog = SidequestCatalog::default();
    let state = state_at("gated", "a");
    let stack = InterruptionStack::new(4);
    let set = CandidateGenerator::default().generate(&GenerationInput {
        run_state: &state,
        flow_graph: &graph,
        verdict: &verdict(1.0),
        sidequests: &catalog,
        interruption_stack: &stack,
        progress: &ProgressTracker::new(3),
        context: &context(NarrativeStatus::Blocked, &[]),
    });
    assert_eq!(set.len(), 1);
    assert_eq!(set.candidates()[0].action, CandidateAction::ExtendGraph);
    assert_eq!(set.candidates()[0].source, CandidateSource::DeadEnd);
}

#[test]
fn inline_chain_continues_to_next_station_then_returns_to_the_frame() {
    let fixture = fixture();
    let mut state = state_at("build", "clarifier");
    state.inline_chain = Some(vec![node("reviewer")]);
    let set = generate(
        &fixture,
        &state,
        &verdict(1.0),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Verified, &[]),
    );
    assert_eq!(continue_targets(&set), vec!["node:reviewer".to_string()]);
    assert_eq!(set.candidates()[0].source, CandidateSource::InlineChain);
}

#[test]
fn default_selection_is_the_first_declared_edge() {
    let fixture = fixture();
    let set = generate(
        &fixture,
        &state_at("build", "author"),
        &verdict(1.0),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Verified, &[]),
    );
    let top = set.highest_priority().expect("top");
    assert_eq!(top.candidate_id, "cand-1");
    assert_eq!(top.target, CandidateTarget::Node(node("critic")));
}

#[test]
fn candidate_sets_serialize_actions_in_screaming_case() {
    let fixture = fixture();
    let set = generate(
        &fixture,
        &state_at("build", "author"),
        &verdict(1.0),
        &ProgressTracker::new(3),
        &context(NarrativeStatus::Verified, &[]),
    );
    let encoded = serde_json::to_value(&set).expect("encode");
    assert_eq!(encoded[0]["action"], "CONTINUE");
    assert_eq!(encoded[0]["target"]["type"], "node");
    assert_eq!(encoded[1]["action"], "INJECT_FLOW");
}
