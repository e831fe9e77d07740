//! Mount Planner (§4.2): combine global / tool / repo / cwd / worktree
//! mounts into deduplicated RO and RW lists.

use std::path::{Path, PathBuf};

use crate::config::Configuration;
use crate::git::{normalize_remote_url, worktree_roots};
use crate::path::expand_tilde;

/// The two deduplicated, existence-filtered mount lists a run plan needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountPlan {
    pub mounts_ro: Vec<PathBuf>,
    pub mounts_rw: Vec<PathBuf>,
}

/// Which list a candidate mount belongs to, before dedup.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Ro,
    Rw,
}

/// Plan mounts per the ordered rules in §4.2.
///
/// `remote_urls` are this repo's raw git remote URLs (the orchestrator's
/// job to gather, per §1's "three pure queries" — this planner only
/// normalizes and matches them).
pub fn plan_mounts(
    cwd: &Path,
    config: &Configuration,
    tool_name: &str,
    remote_urls: &[String],
) -> MountPlan {
    let mut candidates: Vec<(String, Access)> = Vec::new();

    // Rule 1: cwd is always RW.
    candidates.push((cwd.display().to_string(), Access::Rw));

    // Rule 2: matching repos, in ascending-pattern-length order.
    let normalized: Vec<String> = remote_urls.iter().map(|u| normalize_remote_url(u)).collect();
    for (_, repo) in config.matching_repos(&normalized) {
        push_scope(&mut candidates, &repo.scoped.mounts_ro, &repo.scoped.mounts_rw);
    }

    // Rule 3: per-tool defaults.
    if let Some(tool) = config.tools.get(tool_name) {
        push_scope(&mut candidates, &tool.mounts_ro, &tool.mounts_rw);
    }

    // Rule 4: global config mounts.
    push_scope(&mut candidates, &config.mounts_ro, &config.mounts_rw);

    // Rule 5: worktree roots, RW.
    for root in worktree_roots(cwd) {
        candidates.push((root.display().to_string(), Access::Rw));
    }

    dedup_and_filter(candidates)
}

fn push_scope(candidates: &mut Vec<(String, Access)>, ro: &[String], rw: &[String]) {
    candidates.extend(ro.iter().map(|p| (p.clone(), Access::Ro)));
    candidates.extend(rw.iter().map(|p| (p.clone(), Access::Rw)));
}

/// `~`-expand every candidate, keep only the first occurrence of each
/// resolved path (earlier entries win their list membership — see §4.2's
/// rule ordering), then drop paths that don't exist on the host (§3
/// "never fail the run for a missing optional mount").
fn dedup_and_filter(candidates: Vec<(String, Access)>) -> MountPlan {
    let mut seen = std::collections::HashSet::new();
    let mut ro = Vec::new();
    let mut rw = Vec::new();

    for (raw, access) in candidates {
        let expanded = expand_tilde(&raw);
        if !seen.insert(expanded.clone()) {
            continue;
        }
        if !expanded.exists() {
            continue;
        }
        match access {
            Access::Ro => ro.push(expanded),
            Access::Rw => rw.push(expanded),
        }
    }

    MountPlan { mounts_ro: ro, mounts_rw: rw }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, RepoOverrides, ScopedOverrides};
    use tempfile::tempdir;

    fn touch_dir(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn cwd_is_always_rw() {
        let dir = tempdir().unwrap();
        let config = Configuration::default();
        let plan = plan_mounts(dir.path(), &config, "claude", &[]);
        assert_eq!(plan.mounts_rw, vec![dir.path().to_path_buf()]);
        assert!(plan.mounts_ro.is_empty());
    }

    #[test]
    fn missing_optional_mount_is_silently_dropped() {
        let dir = tempdir().unwrap();
        let mut config = Configuration::default();
        config.mounts_ro = vec!["/does/not/exist/anywhere".to_string()];
        let plan = plan_mounts(dir.path(), &config, "claude", &[]);
        assert!(plan.mounts_ro.is_empty());
    }

    #[test]
    fn dedup_prevents_path_in_both_lists() {
        let dir = tempdir().unwrap();
        let data = touch_dir(dir.path(), "data");
        let mut config = Configuration::default();
        // cwd itself listed again as RO via global config: RW (rule 1) wins.
        config.mounts_ro = vec![dir.path().display().to_string(), data.display().to_string()];
        let plan = plan_mounts(dir.path(), &config, "claude", &[]);
        assert!(!plan.mounts_ro.contains(&dir.path().to_path_buf()));
        assert!(plan.mounts_rw.contains(&dir.path().to_path_buf()));
        assert_eq!(plan.mounts_ro, vec![data]);
    }

    #[test]
    fn repo_overlay_ordering_more_specific_pattern_wins_position() {
        let dir = tempdir().unwrap();
        let short_mount = touch_dir(dir.path(), "short");
        let long_mount = touch_dir(dir.path(), "long");

        let mut config = Configuration::default();
        config.repos.insert(
            "github.com".to_string(),
            RepoOverrides {
                scoped: ScopedOverrides { mounts_rw: vec![short_mount.display().to_string()], ..Default::default() },
                tool: None,
            },
        );
        config.repos.insert(
            "github.com/acme/thing".to_string(),
            RepoOverrides {
                scoped: ScopedOverrides { mounts_rw: vec![long_mount.display().to_string()], ..Default::default() },
                tool: None,
            },
        );

        let plan = plan_mounts(
            dir.path(),
            &config,
            "claude",
            &["git@github.com:acme/thing.git".to_string()],
        );

        let short_pos = plan.mounts_rw.iter().position(|p| p == &short_mount).unwrap();
        let long_pos = plan.mounts_rw.iter().position(|p| p == &long_mount).unwrap();
        assert!(short_pos < long_pos);
    }

    #[test]
    fn tilde_expands_before_existence_check() {
        let Some(home) = crate::path::home_dir() else { return };
        let mut config = Configuration::default();
        config.mounts_rw = vec!["~".to_string()];
        let dir = tempdir().unwrap();
        let plan = plan_mounts(dir.path(), &config, "claude", &[]);
        assert!(plan.mounts_rw.contains(&home));
    }

    #[test]
    fn worktree_root_added_rw() {
        let dir = tempdir().unwrap();
        let main_repo_git = dir.path().join("main-repo").join(".git");
        std::fs::create_dir_all(&main_repo_git).unwrap();
        let worktree_meta = main_repo_git.join("worktrees").join("feature");
        std::fs::create_dir_all(&worktree_meta).unwrap();

        let cwd = touch_dir(dir.path(), "feature-wt");
        std::fs::write(cwd.join(".git"), format!("gitdir: {}\n", worktree_meta.display())).unwrap();

        let config = Configuration::default();
        let plan = plan_mounts(&cwd, &config, "claude", &[]);
        assert!(plan.mounts_rw.contains(&main_repo_git));
    }
}
