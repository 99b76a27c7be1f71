use crate::config::{load_kernel_config, ConfigError, KernelConfig};
use crate::orchestration::driver::RoutingDriver;
use crate::orchestration::navigator::HighestPriorityNavigator;
use crate::shared::ids::{FlowKey, RunId};
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn format_timestamp(unix_ts: i64) -> String {
    match Utc.timestamp_opt(unix_ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => unix_ts.to_string(),
    }
}

pub fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

pub fn load_config(path: &str) -> Result<KernelConfig, String> {
    load_kernel_config(Path::new(path)).map_err(map_config_err)
}

/// Driver wired to the deterministic navigator; the CLI has no external decision-maker.
pub fn build_driver(config: &KernelConfig, state_root: &str) -> Result<RoutingDriver, String> {
    RoutingDriver::from_config(config, state_root, Arc::new(HighestPriorityNavigator))
        .map_err(|e| e.to_string())
}

pub fn parse_run_id(raw: &str) -> Result<RunId, String> {
    RunId::parse(raw).map_err(|e| format!("invalid run id `{raw}`: {e}"))
}

pub fn parse_flow_key(raw: &str) -> Result<FlowKey, String> {
    FlowKey::parse(raw).map_err(|e| format!("invalid flow key `{raw}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_timestamp_renders_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14T22:13:20Z");
    }
}
