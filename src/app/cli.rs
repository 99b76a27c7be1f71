#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Validate,
    Flows,
    Runs,
    Replay,
    Log,
    Simulate,
    Redrive,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "validate" => CliVerb::Validate,
        "flows" => CliVerb::Flows,
        "runs" => CliVerb::Runs,
        "replay" => CliVerb::Replay,
        "log" => CliVerb::Log,
        "simulate" => CliVerb::Simulate,
        "redrive" => CliVerb::Redrive,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  validate <config>                              Load and validate flows and sidequests"
            .to_string(),
        "  flows <config>                                 List flows, entries, terminals, injectables"
            .to_string(),
        "  runs <state_root>                              List live runs".to_string(),
        "  replay <config> <state_root> <run_id>          Rebuild run state from its decision log"
            .to_string(),
        "  log <state_root> <run_id>                      Print a run's decisions, one per line"
            .to_string(),
        "  simulate <config> <state_root> <run_id> <flow> <evidence.json>..."
            .to_string(),
        "                                                 Route evidence files with the default navigator"
            .to_string(),
        "  redrive <config> <state_root> <run_id> resume|abandon-injection [note]"
            .to_string(),
        "                                                 Resume a paused run".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_verb_maps_known_commands() {
        assert_eq!(parse_cli_verb("validate"), CliVerb::Validate);
        assert_eq!(parse_cli_verb("redrive"), CliVerb::Redrive);
        assert_eq!(parse_cli_verb("start"), CliVerb::Unknown);
    }
}
