//! `silo` binary: thin enough to invoke the run orchestrator end to end.
//! CLI design (flags, interactive picker, help text) is out of scope for
//! this core (§1) — this binary exists only so the crate is runnable.

use clap::Parser;
use silo::cli::{Cli, Command};
use silo::orchestrator::{Orchestrator, RunOptions};
use silo::tool;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "off" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    if let Some(command) = &cli.command {
        return run_subcommand(command);
    }

    let Some(tool_name) = cli.tool.clone() else {
        eprintln!("silo: no tool specified");
        return 1;
    };

    let Some(registered_tool) = tool::find(&tool_name) else {
        eprintln!("silo: unknown tool {tool_name:?}");
        return 1;
    };

    let config = match silo::cli::load_configuration(None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("silo: failed to load configuration: {e}");
            return 1;
        }
    };

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("silo: failed to determine current directory: {e}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("silo: failed to start async runtime: {e}");
            return 1;
        }
    };

    let orchestrator = Orchestrator::new();
    let options = RunOptions {
        tool: registered_tool,
        config: &config,
        cwd,
        backend_name: cli.backend.as_deref(),
        force_build: cli.force_build,
        verbose: cli.verbose,
        extra_args: cli.tool_args.clone(),
    };

    match runtime.block_on(orchestrator.run(options)) {
        Ok(exit_code) => exit_code,
        Err(e) => {
            eprintln!("silo: {e}");
            e.exit_code()
        }
    }
}

fn run_subcommand(command: &Command) -> i32 {
    match command {
        Command::Ls | Command::Rm { .. } | Command::Config { .. } => {
            eprintln!("silo: this subcommand is not implemented in this core");
            1
        }
    }
}
