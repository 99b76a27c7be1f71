use stationmaster::orchestration::error::RoutingError;
use stationmaster::orchestration::interruption::{
    FrameKind, InterruptionFrame, InterruptionStack, DEFAULT_MAX_INTERRUPTION_DEPTH,
};
use stationmaster::shared::ids::{FlowKey, NodeId};

fn frame(flow: &str, step: &str, kind: FrameKind) -> InterruptionFrame {
    InterruptionFrame {
        flow_key: FlowKey::parse(flow).expect("flow"),
        step_id: NodeId::parse(step).expect("node"),
        saved_at: 100,
        reason: format!("suspend {flow}@{step}"),
        kind,
        resume_chain: None,
    }
}

#[test]
fn nested_injections_unwind_in_reverse_order() {
    let mut stack = InterruptionStack::default();
    assert_eq!(stack.max_depth(), DEFAULT_MAX_INTERRUPTION_DEPTH);

    stack
        .push(frame("build", "critic", FrameKind::InjectedFlow))
        .expect("push build");
    stack
        .push(frame("repair", "fix", FrameKind::Detour))
        .expect("push repair");
    stack
        .push(frame("lint", "scan", FrameKind::InjectedNodes))
        .expect("push lint");

    let order = std::iter::from_fn(|| stack.pop().ok())
        .map(|frame| frame.flow_key.to_string())
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["lint", "repair", "build"]);
}

#[test]
fn fifth_push_is_rejected_and_depth_stays_at_four() {
    let mut stack = InterruptionStack::default();
    for step in ["a", "b", "c", "d"] {
        stack
            .push(frame("build", step, FrameKind::InjectedFlow))
            .expect("push within bound");
    }

    let err = stack
        .push(frame("build", "e", FrameKind::InjectedFlow))
        .expect_err("overflow");
    assert!(matches!(err, RoutingError::StackOverflow { max_depth: 4 }));
    assert_eq!(stack.depth(), 4);
    assert_eq!(
        stack.peek().map(|frame| frame.step_id.as_str()),
        Some("d")
    );
}

#[test]
fn frames_survive_a_serialization_round_trip_through_run_state_storage() {
    let mut with_chain = frame("build", "critic", FrameKind::Detour);
    with_chain.resume_chain = Some(vec![NodeId::parse("reviewer").expect("node")]);
    let frames = vec![frame("build", "author", FrameKind::InjectedFlow), with_chain];

    let encoded = serde_json::to_value(&frames).expect("encode");
    assert_eq!(encoded[0]["flowKey"], "build");
    assert_eq!(encoded[0]["kind"], "injected_flow");
    assert!(encoded[0].get("resumeChain").is_none());
    assert_eq!(encoded[1]["resumeChain"][0], "reviewer");

    let decoded: Vec<InterruptionFrame> = serde_json::from_value(encoded).expect("decode");
    let stack = InterruptionStack::from_frames(DEFAULT_MAX_INTERRUPTION_DEPTH, decoded);
    assert_eq!(stack.frames(), frames.as_slice());
}

#[test]
fn stack_overflow_and_empty_stack_pause_the_run() {
    assert!(RoutingError::StackOverflow { max_depth: 4 }.is_pausing());
    assert!(RoutingError::EmptyStack.is_pausing());
    assert!(!RoutingError::UnknownRun {
        run_id: "run-1".to_string()
    }
    .is_pausing());
}
