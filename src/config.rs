//! The merged configuration value the orchestrator consumes.
//!
//! Discovery, file parsing, and layered merging of user/project config are
//! external collaborators (§1 Non-goals) — this module only defines the
//! shape of the already-merged value, so it can be deserialized from TOML
//! by whatever front-end assembles it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Mount/env/hook fields shared by the global, per-tool, and per-repo
/// scopes (§3 Configuration).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopedOverrides {
    #[serde(default)]
    pub mounts_ro: Vec<String>,
    #[serde(default)]
    pub mounts_rw: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub pre_run_hooks: Vec<String>,
    #[serde(default)]
    pub post_build_hooks: Vec<String>,
}

/// Per-repo overlay: the same scoped fields, plus a tool override. Keyed
/// in [`Configuration::repos`] by the pattern matched against remote URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoOverrides {
    #[serde(flatten)]
    pub scoped: ScopedOverrides,
    #[serde(default)]
    pub tool: Option<String>,
}

/// A merged configuration value, already resolved from whatever layering
/// the front-end applies (defaults → user file → project file → env).
///
/// `unknown` absorbs any key this binary doesn't recognize, per §6: "Unknown
/// keys must be ignored so newer configs do not break older binaries."
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,

    #[serde(default)]
    pub mounts_ro: Vec<String>,
    #[serde(default)]
    pub mounts_rw: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub pre_run_hooks: Vec<String>,
    #[serde(default)]
    pub post_build_hooks: Vec<String>,

    #[serde(default)]
    pub tools: IndexMap<String, ScopedOverrides>,
    #[serde(default)]
    pub repos: IndexMap<String, RepoOverrides>,

    /// Catch-all for keys this version of silo doesn't know about yet.
    #[serde(flatten)]
    pub unknown: toml::Table,
}

impl Configuration {
    /// Parse an already-merged configuration from TOML text.
    ///
    /// Used only by tests and the thin CLI's single-file convenience path
    /// (`silo --config-file ...` style invocations); the orchestrator's
    /// public entry point always takes an already-constructed value.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Every `(pattern, overrides)` pair whose pattern matches any of
    /// `remote_urls` as a substring (after normalization), ordered by
    /// *increasing* pattern length — §4.2 rule 2's "more specific repo
    /// configs are applied last" ordering.
    pub fn matching_repos(&self, normalized_remotes: &[String]) -> Vec<(&str, &RepoOverrides)> {
        let mut matches: Vec<(&str, &RepoOverrides)> = self
            .repos
            .iter()
            .filter(|(pattern, _)| {
                normalized_remotes.iter().any(|remote| remote.contains(pattern.as_str()))
            })
            .map(|(pattern, overrides)| (pattern.as_str(), overrides))
            .collect();

        matches.sort_by_key(|(pattern, _)| pattern.len());
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_preserved_not_rejected() {
        let config = Configuration::from_toml_str(
            r#"
            tool = "claude"
            some_future_field = "ignored for now"

            [some.future.table]
            nested = true
            "#,
        )
        .expect("unknown keys must not fail parsing");
        assert_eq!(config.tool.as_deref(), Some("claude"));
        assert!(config.unknown.contains_key("some_future_field"));
    }

    #[test]
    fn defaults_are_empty() {
        let config = Configuration::from_toml_str("").unwrap();
        assert!(config.mounts_ro.is_empty());
        assert!(config.tools.is_empty());
        assert!(config.repos.is_empty());
    }

    #[test]
    fn matching_repos_orders_by_ascending_pattern_length() {
        let config = Configuration::from_toml_str(
            r#"
            [repos."github.com"]
            env = ["SHORT=1"]

            [repos."github.com/acme/thing"]
            env = ["LONG=1"]
            "#,
        )
        .unwrap();

        let matches = config.matching_repos(&["github.com/acme/thing".to_string()]);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].0, "github.com");
        assert_eq!(matches[1].0, "github.com/acme/thing");
    }

    #[test]
    fn non_matching_patterns_are_excluded() {
        let config = Configuration::from_toml_str(
            r#"
            [repos."gitlab.com/other"]
            env = ["X=1"]
            "#,
        )
        .unwrap();

        let matches = config.matching_repos(&["github.com/acme/thing".to_string()]);
        assert!(matches.is_empty());
    }

    #[test]
    fn repo_overrides_deserializes_scoped_fields_and_tool() {
        let config = Configuration::from_toml_str(
            r#"
            [repos."github.com/acme"]
            tool = "opencode"
            env = ["ACME_TOKEN=xyz"]
            pre_run_hooks = ["echo hi"]
            "#,
        )
        .unwrap();

        let repo = &config.repos["github.com/acme"];
        assert_eq!(repo.tool.as_deref(), Some("opencode"));
        assert_eq!(repo.scoped.env, vec!["ACME_TOKEN=xyz".to_string()]);
        assert_eq!(repo.scoped.pre_run_hooks, vec!["echo hi".to_string()]);
    }
}
