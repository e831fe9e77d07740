//! End-to-end scenarios from the specification's testable-properties
//! section that turn on *what gets planned* — mount/env/hook planners,
//! the image spec assembler, container naming — exercised against that
//! pure planning layer directly.
//!
//! The scenarios that turn on *what the orchestrator does with a
//! backend's response* (image-exists skipping a build, a force-removed
//! container mapping to `ContainerLeak`, a container's exit code
//! propagating) live in `orchestrator::tests` instead, driven against
//! `backend::FakeBackend` — an internal `BackendOps` implementation, not
//! a third `Backend` enum variant, since `Backend` stays a closed sum
//! type with no trait-object seam exposed to callers (§9). See
//! `DESIGN.md` for the split.

use std::path::PathBuf;

use silo::backend::{container_name_base, smallest_unused_suffix};
use silo::config::{Configuration, RepoOverrides, ScopedOverrides};
use silo::env_planner::plan_env;
use silo::git::GitIdentity;
use silo::hook_planner::{compose_script, plan_hooks};
use silo::image_spec;
use silo::mount_planner::plan_mounts;
use silo::tool;

fn no_host(_: &str) -> Option<String> {
    None
}

/// Scenario 1: first-time run of a tool with one extra RW mount.
#[test]
fn first_time_run_of_a_tool() {
    let cwd_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let cwd = cwd_dir.path().to_path_buf();

    let config = Configuration { mounts_rw: vec![data_dir.path().display().to_string()], ..Default::default() };
    let claude = tool::find("claude").unwrap();

    let build_spec = image_spec::assemble(claude, &[], &[], Default::default());
    assert_eq!(build_spec.dockerfile_text, claude.template());
    assert_eq!(build_spec.target, "claude");

    let mounts = plan_mounts(&cwd, &config, "claude", &[]);
    assert!(mounts.mounts_rw.contains(&cwd));
    assert!(mounts.mounts_rw.contains(&data_dir.path().to_path_buf()));
    assert!(mounts.mounts_ro.is_empty());

    let base = container_name_base(&cwd);
    let name = smallest_unused_suffix(&base, &[]);
    assert_eq!(name, format!("{base}-1"));

    let home = PathBuf::from("/home/alice");
    let argv = claude.argv(&home);
    assert_eq!(argv[0], "claude");
    assert!(argv.contains(&"--mcp-config=/home/alice/.claude/mcp.json".to_string()));
    assert!(argv.contains(&"--dangerously-skip-permissions".to_string()));

    let all_mounts: Vec<&std::path::Path> =
        mounts.mounts_ro.iter().chain(mounts.mounts_rw.iter()).map(|p| p.as_path()).collect();
    let hooks = plan_hooks(None, &all_mounts, false, &[], &[], &[]);
    let script = compose_script(&hooks, &argv);
    assert!(script.starts_with("__silo_wait_mounts() {"));
    assert!(script.ends_with("&& exec claude --mcp-config=/home/alice/.claude/mcp.json --dangerously-skip-permissions"));
}

/// Scenario 2: a second identical run picks the next container suffix
/// and (at the backend layer, not exercised here) skips the build.
#[test]
fn second_identical_run_increments_container_suffix() {
    let cwd = tempfile::tempdir().unwrap();
    let base = container_name_base(cwd.path());
    let first = smallest_unused_suffix(&base, &[]);
    let second = smallest_unused_suffix(&base, &[first.clone()]);
    assert_eq!(first, format!("{base}-1"));
    assert_eq!(second, format!("{base}-2"));

    // Tag determinism: identical tool + hooks + build args reproduce the
    // exact same tag the first run would have used.
    let claude = tool::find("claude").unwrap();
    let a = image_spec::assemble(claude, &[], &[], Default::default());
    let b = image_spec::assemble(claude, &[], &[], Default::default());
    assert_eq!(a.image_tag, b.image_tag);
}

/// Scenario 3: a configured mount that doesn't exist on the host is
/// dropped silently, never an error, and never reaches the mount-wait
/// script.
#[test]
fn missing_optional_mount_is_dropped_everywhere() {
    let cwd = tempfile::tempdir().unwrap();
    let config = Configuration { mounts_ro: vec!["/does/not/exist/anywhere".to_string()], ..Default::default() };

    let mounts = plan_mounts(cwd.path(), &config, "claude", &[]);
    assert!(mounts.mounts_ro.is_empty());

    let all_mounts: Vec<&std::path::Path> =
        mounts.mounts_ro.iter().chain(mounts.mounts_rw.iter()).map(|p| p.as_path()).collect();
    let wait_script = silo::hook_planner::mount_wait_script(&all_mounts, false);
    assert!(!wait_script.contains("/does/not/exist/anywhere"));
}

/// Scenario 4: repo-specific overlay contributes env and a pre-run hook,
/// matched by substring against a normalized SSH remote URL.
#[test]
fn repo_specific_overlay_contributes_env_and_hooks() {
    let mut config = Configuration::default();
    config.repos.insert(
        "github.com/acme".to_string(),
        RepoOverrides {
            scoped: ScopedOverrides {
                env: vec!["ACME_TOKEN=xyz".to_string()],
                pre_run_hooks: vec!["echo hi".to_string()],
                ..Default::default()
            },
            tool: None,
        },
    );

    let normalized: Vec<String> =
        vec![silo::git::normalize_remote_url("git@github.com:acme/thing.git")];
    let matches = config.matching_repos(&normalized);
    assert_eq!(matches.len(), 1);
    let repo_env: Vec<String> = matches.iter().flat_map(|(_, r)| r.scoped.env.iter().cloned()).collect();
    let repo_hooks: Vec<String> = matches.iter().flat_map(|(_, r)| r.scoped.pre_run_hooks.iter().cloned()).collect();

    let env_plan = plan_env(&config, "claude", &repo_env, &GitIdentity::default(), &no_host);
    assert!(env_plan.env.contains(&"ACME_TOKEN=xyz".to_string()));

    let hooks = plan_hooks(None, &[], false, &[], &[], &repo_hooks);
    let script = compose_script(&hooks, &["claude".to_string()]);
    assert!(script.contains("echo hi && exec claude") || script.ends_with("echo hi && exec claude"));
}

/// Scenario 5 (the cancellation/terminal-restoration invariant): exercised
/// at the unit level in `orchestrator::tests` and `terminal` — the
/// `CancellationToken` wakes waiters, and `RawModeGuard`'s `Drop` runs on
/// every exit path including force-removal. Re-asserted here as a
/// documentation anchor for the scenario number.
#[test]
fn cancellation_token_is_the_mechanism_behind_scenario_five() {
    let token = silo::orchestrator::CancellationToken::new();
    assert!(!token.is_cancelled());
    token.cancel();
    assert!(token.is_cancelled());
}

/// Scenario 6: a pre-run hook that fails aborts before the tool launches
/// — the composed script joins hooks with `&&`, so a failing hook (e.g.
/// `exit 7`) short-circuits before `exec` ever runs.
#[test]
fn hook_failure_short_circuits_before_exec() {
    let hooks = vec!["exit 7".to_string()];
    let script = compose_script(&hooks, &["claude".to_string()]);
    assert_eq!(script, "exit 7 && exec claude");
}
