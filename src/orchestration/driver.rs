//! One routing cycle per call: evidence -> verdict -> progress -> candidates ->
//! validated selection -> reduce -> durable append -> advance.
//!
//! The in-memory [`RunSession`] only moves after the decision record is on disk, so a
//! failed append leaves both the log and the session at the previous sequence number.

use crate::config::{KernelConfig, RoutingConfig};
use crate::orchestration::candidates::{CandidateAction, CandidateGenerator, GenerationInput};
use crate::orchestration::decision::{
    DecisionRecord, FlowCompletion, HaltRecord, LogEvent, ProgressUpdate, RedriveAction,
    RedriveRecord, RoutingDecision,
};
use crate::orchestration::error::RoutingError;
use crate::orchestration::evidence::EvidenceBundle;
use crate::orchestration::flow_graph::FlowGraph;
use crate::orchestration::forensics::{ForensicComparator, Verdict};
use crate::orchestration::navigator::{obtain_selection, Navigator, NavigatorRequest};
use crate::orchestration::replay::replay;
use crate::orchestration::run_state::{
    apply_event, PauseCause, ReducerLimits, RunState, RunStatus,
};
use crate::orchestration::run_store::{GraphExtensionProposal, RunStore};
use crate::orchestration::sidequest::{RoutingContext, SidequestCatalog};
use crate::shared::ids::{FlowKey, NodeId, RunId};
use crate::shared::logging::{append_routing_log, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;

/// Exclusive handle on one run's state between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSession {
    state: RunState,
}

impl RunSession {
    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn run_id(&self) -> &RunId {
        &self.state.run_id
    }
}

/// What the caller must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverSignal {
    RunStep { flow_key: FlowKey, step_id: NodeId },
    StartInjectedFlow { flow_key: FlowKey, entry: NodeId },
    ResumeFlow { flow_key: FlowKey, step_id: NodeId },
    Paused { cause: Option<PauseCause> },
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub record: DecisionRecord,
    pub signal: DriverSignal,
}

impl CycleOutcome {
    pub fn state(&self) -> &RunState {
        &self.record.resulting_state
    }

    pub fn decision(&self) -> Option<&RoutingDecision> {
        match &self.record.event {
            LogEvent::Routed(decision) => Some(decision),
            LogEvent::Halted(halt) => halt.attempted.as_ref(),
            _ => None,
        }
    }
}

pub struct RoutingDriver {
    graph: Arc<FlowGraph>,
    catalog: SidequestCatalog,
    comparator: ForensicComparator,
    generator: CandidateGenerator,
    config: RoutingConfig,
    store: RunStore,
    navigator: Arc<dyn Navigator>,
}

impl RoutingDriver {
    /// Refuses to build with an invalid graph, catalog, or routing settings.
    pub fn from_config(
        config: &KernelConfig,
        state_root: impl Into<PathBuf>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, RoutingError> {
        config.routing.validate()?;
        let graph = FlowGraph::from_config(config)?;
        let catalog = SidequestCatalog::from_config(config, &graph)?;
        Ok(Self {
            graph: Arc::new(graph),
            catalog,
            comparator: ForensicComparator::new(config.routing.penalties),
            generator: CandidateGenerator::from_config(&config.routing),
            config: config.routing.clone(),
            store: RunStore::new(state_root),
            navigator,
        })
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn limits(&self) -> ReducerLimits {
        ReducerLimits {
            max_interruption_depth: self.config.max_interruption_depth,
            progress_capacity: self.config.stall_window,
        }
    }

    pub fn start_run(
        &self,
        run_id: RunId,
        flow_key: FlowKey,
        now: i64,
    ) -> Result<(RunSession, CycleOutcome), RoutingError> {
        if self.store.run_exists(&run_id) {
            return Err(RoutingError::RunExists {
                run_id: run_id.to_string(),
            });
        }
        let entry = self
            .graph
            .entry(&flow_key)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownFlow {
                flow_key: flow_key.to_string(),
            })?;
        let event = LogEvent::RunStarted {
            flow_key: flow_key.clone(),
            entry: entry.clone(),
        };
        let state = apply_event(None, &run_id, 1, now, &event, &self.graph, self.limits())?;
        let record = DecisionRecord {
            run_id: run_id.clone(),
            sequence_number: 1,
            timestamp: now,
            event,
            resulting_state: state.clone(),
        };
        self.store.append_record(&record, 0)?;
        self.refresh_snapshot(&state, now);
        self.log(
            now,
            LogLevel::Info,
            &run_id,
            "run_started",
            &format!("flow `{flow_key}` at `{entry}`"),
        );
        Ok((
            RunSession { state },
            CycleOutcome {
                record,
                signal: DriverSignal::RunStep {
                    flow_key,
                    step_id: entry,
                },
            },
        ))
    }

    /// Rebuilds a session from the decision log; the snapshot file is never trusted.
    pub fn load_run(&self, run_id: &RunId) -> Result<RunSession, RoutingError> {
        let records = self.store.load_records(run_id)?;
        let state = replay(&records, &self.graph, self.limits())?;
        Ok(RunSession { state })
    }

    pub fn route(
        &self,
        session: &mut RunSession,
        evidence: Option<&EvidenceBundle>,
        extra_flags: &[String],
        now: i64,
    ) -> Result<CycleOutcome, RoutingError> {
        let state = &session.state;
        if state.status != RunStatus::Running {
            return Err(RoutingError::RunNotRunning {
                run_id: state.run_id.to_string(),
                status: state.status,
            });
        }

        let evidence = match check_evidence(state, evidence) {
            Ok(evidence) => evidence,
            Err(err) => {
                let Some(cause) = PauseCause::from_error(&err) else {
                    return Err(err);
                };
                return self.halt(session, cause, None, now);
            }
        };

        let verdict = self.comparator.compare(evidence);
        let progress = ProgressUpdate::from_signature(evidence.failure_signature());

        if state.inline_chain.is_none() {
            if let Some(terminal) = self.graph.terminal_kind(&state.flow_key, &state.current_step) {
                let completion = FlowCompletion {
                    flow_key: state.flow_key.clone(),
                    step_id: state.current_step.clone(),
                    terminal,
                    verdict_snapshot: verdict,
                    progress,
                };
                return self.commit(session, LogEvent::FlowCompleted(completion), now);
            }
        }

        let decision = self.decide(state, evidence, extra_flags, verdict, progress, now)?;
        match self.commit(session, LogEvent::Routed(decision.clone()), now) {
            Ok(outcome) => Ok(outcome),
            Err(err) => match PauseCause::from_error(&err) {
                Some(cause) => self.halt(session, cause, Some(decision), now),
                None => Err(err),
            },
        }
    }

    /// Resumes a paused run, optionally abandoning the injection on top of the stack.
    pub fn redrive(
        &self,
        session: &mut RunSession,
        action: RedriveAction,
        note: impl Into<String>,
        now: i64,
    ) -> Result<CycleOutcome, RoutingError> {
        let event = LogEvent::Redriven(RedriveRecord {
            action,
            note: note.into(),
        });
        self.commit(session, event, now)
    }

    /// Stops a run between cycles; it stays resumable through [`RoutingDriver::redrive`].
    pub fn cancel(
        &self,
        session: &mut RunSession,
        note: impl Into<String>,
        now: i64,
    ) -> Result<CycleOutcome, RoutingError> {
        self.halt(
            session,
            PauseCause::Cancelled { note: note.into() },
            None,
            now,
        )
    }

    fn decide(
        &self,
        state: &RunState,
        evidence: &EvidenceBundle,
        extra_flags: &[String],
        verdict: Verdict,
        progress: ProgressUpdate,
        now: i64,
    ) -> Result<RoutingDecision, RoutingError> {
        let mut tracker = state.progress(self.config.stall_window);
        match &progress {
            ProgressUpdate::Recorded { signature } => tracker.record(signature.clone()),
            ProgressUpdate::Reset => tracker.reset(),
        }
        let context = RoutingContext::from_evidence(evidence, extra_flags);
        let stack = state.stack(self.config.max_interruption_depth);
        let candidates = self.generator.generate(&GenerationInput {
            run_state: state,
            flow_graph: &self.graph,
            verdict: &verdict,
            sidequests: &self.catalog,
            interruption_stack: &stack,
            progress: &tracker,
            context: &context,
        });

        let request = NavigatorRequest {
            run_id: state.run_id.clone(),
            flow_key: state.flow_key.clone(),
            step_id: state.current_step.clone(),
            candidates,
            verdict,
            context,
            interruption_depth: stack.depth(),
        };
        let selection = obtain_selection(
            Arc::clone(&self.navigator),
            &request,
            self.config.navigator_timeout(),
        )
        .ok_or_else(|| RoutingError::CandidateNotOffered {
            candidate_id: "<empty candidate set>".to_string(),
        })?;
        if selection.outcome.is_fallback() {
            self.log(
                now,
                LogLevel::Warn,
                &state.run_id,
                "navigator_fallback",
                &format!(
                    "{}; applying default `{}`",
                    selection.outcome.label(),
                    selection.candidate_id
                ),
            );
        }

        let NavigatorRequest {
            candidates,
            verdict,
            ..
        } = request;
        let selected = candidates
            .get(&selection.candidate_id)
            .ok_or_else(|| RoutingError::CandidateNotOffered {
                candidate_id: selection.candidate_id.clone(),
            })?;

        let proposal = if selected.action == CandidateAction::ExtendGraph {
            let path = self.store.write_proposal(&GraphExtensionProposal {
                run_id: state.run_id.clone(),
                sequence_number: state.last_sequence + 1,
                flow_key: state.flow_key.clone(),
                step_id: state.current_step.clone(),
                rationale: selected.rationale.clone(),
                recent_failures: tracker.window(),
                verdict: verdict.clone(),
                proposed_at: now,
            })?;
            let path = path.display().to_string();
            self.log(
                now,
                LogLevel::Warn,
                &state.run_id,
                "proposal_written",
                &format!("graph extension proposal at {path}"),
            );
            Some(path)
        } else {
            None
        };

        Ok(RoutingDecision {
            flow_key: state.flow_key.clone(),
            step_id: state.current_step.clone(),
            selected_candidate_id: selection.candidate_id,
            candidates_offered: candidates,
            navigation: selection.outcome,
            verdict_snapshot: verdict,
            progress,
            proposal,
        })
    }

    fn halt(
        &self,
        session: &mut RunSession,
        cause: PauseCause,
        attempted: Option<RoutingDecision>,
        now: i64,
    ) -> Result<CycleOutcome, RoutingError> {
        self.commit(session, LogEvent::Halted(HaltRecord { cause, attempted }), now)
    }

    /// Reduce, append, then advance. Nothing in `session` changes unless the append succeeds.
    fn commit(
        &self,
        session: &mut RunSession,
        event: LogEvent,
        now: i64,
    ) -> Result<CycleOutcome, RoutingError> {
        let previous = &session.state;
        let sequence_number = previous.last_sequence + 1;
        let next = apply_event(
            Some(previous),
            &previous.run_id,
            sequence_number,
            now,
            &event,
            &self.graph,
            self.limits(),
        )?;
        let record = DecisionRecord {
            run_id: previous.run_id.clone(),
            sequence_number,
            timestamp: now,
            event,
            resulting_state: next.clone(),
        };
        if let Err(err) = self.store.append_record(&record, previous.last_sequence) {
            self.log(
                now,
                LogLevel::Error,
                &previous.run_id,
                "decision_write_failed",
                &err.to_string(),
            );
            return Err(err);
        }

        let signal = signal_for(previous, &next);
        self.log_transition(&record, &signal, now);
        session.state = next;
        self.refresh_snapshot(&session.state, now);

        if session.state.status.is_terminal() {
            match self.store.archive_run(&session.state.run_id) {
                Ok(path) => self.log(
                    now,
                    LogLevel::Info,
                    &session.state.run_id,
                    "run_archived",
                    &path.display().to_string(),
                ),
                Err(err) => self.log(
                    now,
                    LogLevel::Error,
                    &session.state.run_id,
                    "run_archive_failed",
                    &err.to_string(),
                ),
            }
        }
        Ok(CycleOutcome { record, signal })
    }

    fn refresh_snapshot(&self, state: &RunState, now: i64) {
        if let Err(err) = self.store.persist_snapshot(state) {
            self.log(
                now,
                LogLevel::Warn,
                &state.run_id,
                "snapshot_write_failed",
                &err.to_string(),
            );
        }
    }

    fn log_transition(&self, record: &DecisionRecord, signal: &DriverSignal, now: i64) {
        let run_id = &record.run_id;
        let (level, event) = match (&record.event, signal) {
            (LogEvent::Redriven(_), _) => (LogLevel::Info, "run_redriven"),
            (_, DriverSignal::Paused { .. }) => (LogLevel::Warn, "run_paused"),
            (_, DriverSignal::Completed | DriverSignal::Failed) => (LogLevel::Info, "run_completed"),
            (_, DriverSignal::StartInjectedFlow { .. }) => (LogLevel::Info, "flow_injected"),
            (_, DriverSignal::ResumeFlow { .. }) => (LogLevel::Info, "flow_resumed"),
            (_, DriverSignal::RunStep { .. }) => (LogLevel::Info, "cycle_routed"),
        };
        self.log(now, level, run_id, event, &record.summary());
    }

    fn log(&self, now: i64, level: LogLevel, run_id: &RunId, event: &str, message: &str) {
        append_routing_log(
            self.store.state_root(),
            now,
            level,
            run_id.as_str(),
            event,
            message,
        );
    }
}

fn check_evidence<'a>(
    state: &RunState,
    evidence: Option<&'a EvidenceBundle>,
) -> Result<&'a EvidenceBundle, RoutingError> {
    let evidence = evidence.ok_or_else(|| RoutingError::MissingEvidence {
        reason: format!(
            "no evidence bundle for `{}` at `{}`",
            state.flow_key, state.current_step
        ),
    })?;
    if evidence.flow_key != state.flow_key || evidence.step_id != state.current_step {
        return Err(RoutingError::MissingEvidence {
            reason: format!(
                "evidence is for `{}` at `{}` but the run is at `{}` at `{}`",
                evidence.flow_key, evidence.step_id, state.flow_key, state.current_step
            ),
        });
    }
    if evidence.narrative.status.is_none() {
        return Err(RoutingError::MissingEvidence {
            reason: format!("narrative status missing for `{}`", state.current_step),
        });
    }
    Ok(evidence)
}

fn signal_for(previous: &RunState, next: &RunState) -> DriverSignal {
    match next.status {
        RunStatus::Completed => return DriverSignal::Completed,
        RunStatus::Failed => return DriverSignal::Failed,
        RunStatus::Paused => {
            return DriverSignal::Paused {
                cause: next.pause_cause.clone(),
            }
        }
        RunStatus::Running => {}
    }
    let pushed = next.interruption_depth() > previous.interruption_depth();
    let popped = next.interruption_depth() < previous.interruption_depth();
    if pushed && next.flow_key != previous.flow_key && next.inline_chain.is_none() {
        return DriverSignal::StartInjectedFlow {
            flow_key: next.flow_key.clone(),
            entry: next.current_step.clone(),
        };
    }
    if popped {
        return DriverSignal::ResumeFlow {
            flow_key: next.flow_key.clone(),
            step_id: next.current_step.clone(),
        };
    }
    DriverSignal::RunStep {
        flow_key: next.flow_key.clone(),
        step_id: next.current_step.clone(),
    }
}
