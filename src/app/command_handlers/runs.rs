use crate::app::command_support::{
    build_driver, format_timestamp, load_config, now_secs, parse_flow_key, parse_run_id,
};
use crate::orchestration::decision::RedriveAction;
use crate::orchestration::driver::DriverSignal;
use crate::orchestration::evidence::EvidenceBundle;
use crate::orchestration::run_store::RunStore;
use std::path::Path;

pub fn cmd_runs(args: &[String]) -> Result<String, String> {
    if args.len() != 1 {
        return Err("usage: runs <state_root>".to_string());
    }
    let store = RunStore::new(&args[0]);
    let runs = store.list_runs().map_err(|e| e.to_string())?;
    let mut lines = Vec::new();
    for run_id in runs {
        match store.load_snapshot(&run_id) {
            Ok(state) => lines.push(format!(
                "{run_id} {} {}@{} seq={}",
                state.status, state.flow_key, state.current_step, state.last_sequence
            )),
            Err(_) => lines.push(format!("{run_id} (no snapshot)")),
        }
    }
    Ok(lines.join("\n"))
}

pub fn cmd_replay(args: &[String]) -> Result<String, String> {
    if args.len() != 3 {
        return Err("usage: replay <config> <state_root> <run_id>".to_string());
    }
    let config = load_config(&args[0])?;
    let driver = build_driver(&config, &args[1])?;
    let run_id = parse_run_id(&args[2])?;
    let session = driver.load_run(&run_id).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(session.state())
        .map_err(|e| format!("failed to encode run state: {e}"))
}

pub fn cmd_log(args: &[String]) -> Result<String, String> {
    if args.len() != 2 {
        return Err("usage: log <state_root> <run_id>".to_string());
    }
    let store = RunStore::new(&args[0]);
    let run_id = parse_run_id(&args[1])?;
    let records = store.load_records(&run_id).map_err(|e| e.to_string())?;
    Ok(records
        .iter()
        .map(|record| format!("{} {}", format_timestamp(record.timestamp), record.summary()))
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn cmd_simulate(args: &[String]) -> Result<String, String> {
    if args.len() < 5 {
        return Err(
            "usage: simulate <config> <state_root> <run_id> <flow> <evidence.json>...".to_string(),
        );
    }
    let config = load_config(&args[0])?;
    let driver = build_driver(&config, &args[1])?;
    let run_id = parse_run_id(&args[2])?;
    let flow_key = parse_flow_key(&args[3])?;

    let (mut session, started) = driver
        .start_run(run_id, flow_key, now_secs())
        .map_err(|e| e.to_string())?;
    let mut lines = vec![started.record.summary()];
    for path in &args[4..] {
        let evidence = EvidenceBundle::from_path(Path::new(path))?;
        let outcome = driver
            .route(&mut session, Some(&evidence), &[], now_secs())
            .map_err(|e| e.to_string())?;
        lines.push(outcome.record.summary());
        if matches!(
            outcome.signal,
            DriverSignal::Paused { .. } | DriverSignal::Completed | DriverSignal::Failed
        ) {
            break;
        }
    }
    Ok(lines.join("\n"))
}

pub fn cmd_redrive(args: &[String]) -> Result<String, String> {
    if args.len() < 4 || args.len() > 5 {
        return Err(
            "usage: redrive <config> <state_root> <run_id> resume|abandon-injection [note]"
                .to_string(),
        );
    }
    let config = load_config(&args[0])?;
    let driver = build_driver(&config, &args[1])?;
    let run_id = parse_run_id(&args[2])?;
    let action = RedriveAction::parse(&args[3])?;
    let note = args.get(4).cloned().unwrap_or_default();
    let mut session = driver.load_run(&run_id).map_err(|e| e.to_string())?;
    let outcome = driver
        .redrive(&mut session, action, note, now_secs())
        .map_err(|e| e.to_string())?;
    Ok(outcome.record.summary())
}
