//! Pure-filesystem git worktree detection.
//!
//! The source this specification was distilled from carries two
//! implementations of worktree discovery — one that shells out to `git`,
//! one that inspects `.git` files directly. The filesystem-only version is
//! strictly superior (no subprocess, no PATH dependency, testable without
//! a `git` binary at all) and is the only one implemented here.
//!
//! A linked worktree is identified by a `.git` *file* (not directory)
//! whose content is a single `gitdir: <path>` line. That path points at
//! the worktree's private metadata directory, typically
//! `<main-repo>/.git/worktrees/<name>`. That directory in turn may contain
//! a `commondir` file giving a path (relative to itself) to the shared git
//! directory; if absent, the gitdir itself already is the common directory.
//! The common directory's parent is the root of the repository that owns
//! the worktree's metadata — the "worktree root" this module returns.

use std::fs;
use std::path::{Path, PathBuf};

/// Find every worktree root reachable from `dir`: `dir` itself and its
/// immediate subdirectories (one level deep), per §4.2 rule 5.
///
/// Returns deduplicated, `~`-unexpanded absolute-as-given paths. Pure
/// directories (ordinary repos, or paths with no `.git` at all) contribute
/// nothing — only linked worktrees do, since the primary repo itself is
/// already covered by the "cwd is always RW" rule.
pub fn worktree_roots(dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![dir.to_path_buf()];
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                candidates.push(path);
            }
        }
    }

    let mut roots = Vec::new();
    for candidate in candidates {
        if let Some(root) = worktree_root_of(&candidate)
            && !roots.contains(&root)
        {
            roots.push(root);
        }
    }
    roots
}

/// If `path` is a linked worktree, return the root of the repository that
/// owns its metadata. Returns `None` for ordinary repos, bare repos, and
/// non-repo directories alike.
fn worktree_root_of(path: &Path) -> Option<PathBuf> {
    let dot_git = path.join(".git");
    if !dot_git.is_file() {
        return None;
    }

    let contents = fs::read_to_string(&dot_git).ok()?;
    let gitdir_line = contents.lines().find_map(|l| l.trim().strip_prefix("gitdir:"))?;
    let gitdir = resolve_relative(path, gitdir_line.trim());

    let commondir_file = gitdir.join("commondir");
    let common_dir = match fs::read_to_string(&commondir_file) {
        Ok(rel) => resolve_relative(&gitdir, rel.trim()),
        Err(_) => gitdir,
    };

    common_dir.parent().map(|p| p.to_path_buf())
}

fn resolve_relative(base: &Path, maybe_relative: &str) -> PathBuf {
    let candidate = PathBuf::from(maybe_relative);
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}
