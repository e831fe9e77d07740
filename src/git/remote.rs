//! The third of the three pure git queries: remote URL discovery.
//!
//! The Mount Planner matches repo patterns (§4.2 rule 2) by substring
//! against *any* configured remote, not just `origin` — a clone with
//! both `origin` and `upstream` remotes should activate a repo overlay
//! that only names the upstream host.

use crate::shell_exec::{self, ShellConfig};

/// Abstracts where a repo's remote URLs come from, so the orchestrator's
/// tests can inject a fixed list instead of shelling out to `git config`.
pub trait RemoteUrlSource {
    /// Every configured remote URL, in no particular order. Empty outside
    /// a git repository or when no remotes are configured.
    fn remote_urls(&self) -> Vec<String>;
}

/// Reads every `remote.*.url` from git's local config.
pub struct SubprocessRemoteUrlSource;

impl RemoteUrlSource for SubprocessRemoteUrlSource {
    fn remote_urls(&self) -> Vec<String> {
        let mut cmd = ShellConfig::get().command("git config --get-regexp '^remote\\..*\\.url$'");
        let Ok(output) = shell_exec::run(&mut cmd, Some("remote")) else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.split_once(' ').map(|(_, url)| url.trim().to_string()))
            .filter(|url| !url.is_empty())
            .collect()
    }
}
