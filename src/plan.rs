//! The run plan: everything the [`crate::backend`] needs to create and
//! attach to one container (§3 "Run plan").

use std::path::PathBuf;

/// Fully materialized, ready-to-launch container plan. Constructed once
/// by the planners, consumed once by `Backend::run`, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub image_tag: String,
    pub container_name: String,
    pub work_dir: PathBuf,
    pub mounts_ro: Vec<PathBuf>,
    pub mounts_rw: Vec<PathBuf>,
    pub env: Vec<String>,
    pub command: Vec<String>,
    pub extra_args: Vec<String>,
    /// Ordered shell fragments, mount-wait script already prepended
    /// (§4.4). Composed into the final `bash -c` entrypoint by
    /// [`crate::hook_planner::compose_script`].
    pub pre_run_hooks: Vec<String>,
}

impl RunPlan {
    /// The full in-container argv: `command` followed by user-supplied
    /// `extra_args` (§3).
    pub fn full_argv(&self) -> Vec<String> {
        self.command.iter().chain(self.extra_args.iter()).cloned().collect()
    }
}

/// One entry of `Backend::list()` — enough for a future `ls` subcommand
/// (out of scope here) to render, and enough for tests to assert
/// container bookkeeping without a real backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub image_tag: String,
    /// RFC 3339 timestamp string; backends format their native creation
    /// time into this shape so callers never need backend-specific types.
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_argv_appends_extra_args_after_command() {
        let plan = RunPlan {
            image_tag: "silo-claude-deadbeefdeadbeef".to_string(),
            container_name: "proj-1".to_string(),
            work_dir: PathBuf::from("/home/alice/proj"),
            mounts_ro: Vec::new(),
            mounts_rw: Vec::new(),
            env: Vec::new(),
            command: vec!["claude".to_string(), "--flag".to_string()],
            extra_args: vec!["--verbose".to_string()],
            pre_run_hooks: Vec::new(),
        };
        assert_eq!(plan.full_argv(), vec!["claude", "--flag", "--verbose"]);
    }
}
