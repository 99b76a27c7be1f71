use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

pub fn routing_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/routing.log")
}

/// Best effort: a log line that cannot be written is dropped.
pub fn append_routing_log(
    state_root: &Path,
    timestamp: i64,
    level: LogLevel,
    run_id: &str,
    event: &str,
    message: &str,
) {
    let payload = serde_json::json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "runId": run_id,
        "event": event,
        "message": message,
    });

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };

    let path = routing_log_path(state_root);
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    else {
        return;
    };
    let _ = writeln!(file, "{line}");
}
