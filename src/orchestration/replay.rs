use crate::orchestration::decision::DecisionRecord;
use crate::orchestration::error::RoutingError;
use crate::orchestration::flow_graph::FlowGraph;
use crate::orchestration::run_state::{apply_event, ReducerLimits, RunState};

/// Rebuilds a run's state by folding its decision log from empty.
///
/// Sequence numbers must run 1..n without gaps, and every record's `resulting_state` must
/// equal what the reducer derives; any difference is reported as a divergence.
pub fn replay(
    records: &[DecisionRecord],
    graph: &FlowGraph,
    limits: ReducerLimits,
) -> Result<RunState, RoutingError> {
    let mut state: Option<RunState> = None;
    for (index, record) in records.iter().enumerate() {
        let expected = index as u64 + 1;
        if record.sequence_number != expected {
            return Err(RoutingError::SequenceGap {
                run_id: record.run_id.to_string(),
                expected,
                found: record.sequence_number,
            });
        }
        let next = apply_event(
            state.as_ref(),
            &record.run_id,
            record.sequence_number,
            record.timestamp,
            &record.event,
            graph,
            limits,
        )
        .map_err(|err| RoutingError::ReplayDivergence {
            run_id: record.run_id.to_string(),
            sequence_number: record.sequence_number,
            reason: err.to_string(),
        })?;
        if next != record.resulting_state {
            return Err(RoutingError::ReplayDivergence {
                run_id: record.run_id.to_string(),
                sequence_number: record.sequence_number,
                reason: "recorded resulting state differs from the replayed state".to_string(),
            });
        }
        state = Some(next);
    }
    state.ok_or(RoutingError::ReplayDivergence {
        run_id: String::new(),
        sequence_number: 0,
        reason: "decision log is empty".to_string(),
    })
}
