use crate::app::cli::{help_text, parse_cli_verb, CliVerb};

pub mod flows;
pub mod runs;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Validate => flows::cmd_validate(&args[1..]),
        CliVerb::Flows => flows::cmd_flows(&args[1..]),
        CliVerb::Runs => runs::cmd_runs(&args[1..]),
        CliVerb::Replay => runs::cmd_replay(&args[1..]),
        CliVerb::Log => runs::cmd_log(&args[1..]),
        CliVerb::Simulate => runs::cmd_simulate(&args[1..]),
        CliVerb::Redrive => runs::cmd_redrive(&args[1..]),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
