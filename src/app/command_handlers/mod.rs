use crate::app::cli::{help_text, parse_cli_verb, CliVerb};

pub mod debug;
pub mod engine;
pub mod run;
pub mod workspaces;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }

    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Init => workspaces::cmd_init(&args[1..]),
        CliVerb::Setup => workspaces::cmd_setup(&args[1..]),
        CliVerb::List => workspaces::cmd_list(&args[1..]),
        CliVerb::Show => workspaces::cmd_show(&args[1..]),
        CliVerb::Import => engine::cmd_import(&args[1..]),
        CliVerb::Activate => engine::cmd_set_active(&args[1..], true),
        CliVerb::Deactivate => engine::cmd_set_active(&args[1..], false),
        CliVerb::Status => engine::cmd_status(&args[1..]),
        CliVerb::RemoteList => engine::cmd_remote_list(&args[1..]),
        CliVerb::Run => run::cmd_run(&args[1..]),
        CliVerb::Batch => run::cmd_batch(&args[1..]),
        CliVerb::Debug => debug::cmd_debug(&args[1..]),
        CliVerb::Prune => workspaces::cmd_prune(&args[1..]),
        CliVerb::Cleanup => workspaces::cmd_cleanup(&args[1..]),
        CliVerb::Extract => workspaces::cmd_extract(&args[1..]),
        CliVerb::Validate => workspaces::cmd_validate(&args[1..]),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}
