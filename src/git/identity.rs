//! Git author/committer identity, injected unconditionally ahead of
//! user-provided env so user env may still override it (§4.3).

use crate::shell_exec::{self, ShellConfig};

/// Resolved git identity, ready to become `GIT_AUTHOR_NAME` etc.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GitIdentity {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl GitIdentity {
    /// The four env pairs this identity contributes, in the fixed order
    /// the environment planner expects them in.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(name) = &self.name {
            pairs.push(("GIT_AUTHOR_NAME".to_string(), name.clone()));
            pairs.push(("GIT_COMMITTER_NAME".to_string(), name.clone()));
        }
        if let Some(email) = &self.email {
            pairs.push(("GIT_AUTHOR_EMAIL".to_string(), email.clone()));
            pairs.push(("GIT_COMMITTER_EMAIL".to_string(), email.clone()));
        }
        pairs
    }
}

/// Abstracts where git identity comes from, so the orchestrator's tests
/// can inject a fake instead of shelling out to `git config`.
pub trait GitIdentitySource {
    fn identity(&self) -> GitIdentity;
}

/// Reads `user.name` / `user.email` from git's local-then-global config
/// via the `git config` subprocess, same precedence git itself uses.
pub struct SubprocessGitIdentitySource;

impl GitIdentitySource for SubprocessGitIdentitySource {
    fn identity(&self) -> GitIdentity {
        GitIdentity {
            name: git_config_value("user.name"),
            email: git_config_value("user.email"),
        }
    }
}

fn git_config_value(key: &str) -> Option<String> {
    let mut cmd = ShellConfig::get().command(&format!("git config --get {key}"));
    // git config's own resolution already walks local → global → system;
    // silo never needs to pick a scope itself.
    let output = shell_exec::run(&mut cmd, Some("identity")).ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}
