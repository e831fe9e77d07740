//! Thin CLI surface (§1, §6 **[EXPANDED]**): just enough flag parsing to
//! drive the orchestrator end to end. Flag design, the interactive tool
//! picker, and help text are explicitly out of scope — this exists so
//! the crate is runnable, not as a restatement of the CLI surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "silo", about = "Run AI coding assistants inside hardened containers")]
pub struct Cli {
    /// Backend to use (`cli` or `daemon`). Defaults to autodetection.
    #[arg(long)]
    pub backend: Option<String>,

    /// Force a rebuild even if an image with a matching tag exists.
    #[arg(long)]
    pub force_build: bool,

    /// Emit human-readable log lines instead of the single-line progress bar.
    #[arg(long, short)]
    pub verbose: bool,

    /// Registered tool name (e.g. `claude`, `opencode`, `copilot`).
    pub tool: Option<String>,

    /// Arguments passed through to the tool inside the container.
    #[arg(last = true)]
    pub tool_args: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List silo-managed containers.
    Ls,
    /// Remove silo-managed containers.
    Rm { names: Vec<String> },
    /// Configuration inspection/editing (not implemented in this core).
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    Show,
    Paths,
    Edit,
    Default,
    Init,
}

/// Where the merged configuration value comes from, for the thin binary.
/// Real discovery/merging across user and project files is out of scope
/// (§1) — this just reads one file if present.
pub fn load_configuration(path: Option<&PathBuf>) -> anyhow::Result<crate::config::Configuration> {
    let Some(path) = path else {
        return Ok(crate::config::Configuration::default());
    };
    if !path.exists() {
        return Ok(crate::config::Configuration::default());
    }
    let text = std::fs::read_to_string(path)?;
    crate::config::Configuration::from_toml_str(&text).map_err(Into::into)
}
