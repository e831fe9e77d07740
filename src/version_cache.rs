//! Per-tool upstream-version cache (§4.6, §6 "Persistent on-disk state").
//!
//! The orchestrator reads this cache synchronously to populate
//! `CACHE_BUST` for the *current* build, and refreshes it in the
//! background (never blocking the current run) so the *next* run sees an
//! up-to-date value.

use std::path::{Path, PathBuf};

use etcetera::base_strategy::{BaseStrategy, choose_base_strategy};

/// Root directory for silo's cache/state files, honoring `XDG_STATE_HOME`
/// before falling back to etcetera's platform default.
pub fn state_root() -> Option<PathBuf> {
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg_state).join("silo"));
    }
    let strategy = choose_base_strategy().ok()?;
    Some(strategy.data_dir().join("silo"))
}

fn version_file(tool_name: &str) -> Option<PathBuf> {
    state_root().map(|root| root.join("versions").join(format!("{tool_name}.version")))
}

/// Read the cached upstream version string for a tool, if one exists.
pub fn read_cached_version(tool_name: &str) -> Option<String> {
    let path = version_file(tool_name)?;
    let contents = std::fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

/// Write a freshly-fetched upstream version string to the cache.
pub fn write_cached_version(tool_name: &str, version: &str) -> std::io::Result<()> {
    let Some(path) = version_file(tool_name) else {
        return Ok(());
    };
    write_atomically(&path, version)
}

/// Writes via a sibling temp file plus `rename`, so a crash mid-write never
/// leaves a truncated cache file behind — a reader either sees the old
/// contents or the new ones, never a partial write.
fn write_atomically(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(".{}.tmp-{}", path.file_name().and_then(|n| n.to_str()).unwrap_or("cache"), std::process::id()));
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

/// Abstracts fetching a tool's *current* upstream version, so the
/// background refresh in §4.6 can be swapped for a fake in tests. The
/// default implementation silo ships with does not reach the network in
/// this crate (that policy lives with the tool registry's upstream
/// install scripts) — callers wire in a concrete fetcher per tool when
/// they want live `CACHE_BUST` refreshes.
pub trait UpstreamVersionFetcher: Send + Sync {
    fn fetch(&self, tool_name: &str) -> Option<String>;
}

/// A fetcher that never has anything new to report — used when no
/// concrete upstream source is configured. The background refresh task
/// becomes a no-op rather than an error, consistent with "must not block
/// the run" (§4.6).
pub struct NoopVersionFetcher;

impl UpstreamVersionFetcher for NoopVersionFetcher {
    fn fetch(&self, _tool_name: &str) -> Option<String> {
        None
    }
}

/// Refresh the cache for one tool, writing the result if the fetch
/// produced a value. Intended to be spawned as a detached background
/// task (§4.6, §9 "Background version fetcher") — callers must not
/// `.await` it on the critical path of the current run.
pub async fn refresh(tool_name: &str, fetcher: &dyn UpstreamVersionFetcher) {
    let tool_name = tool_name.to_string();
    if let Some(version) = fetcher.fetch(&tool_name) {
        let _ = write_cached_version(&tool_name, &version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cache_file_is_none_not_an_error() {
        assert!(read_cached_version("definitely-not-a-real-tool-xyz").is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claude.version");
        write_atomically(&path, "1.2.3\n").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), "1.2.3");
    }

    #[test]
    fn noop_fetcher_returns_none() {
        assert!(NoopVersionFetcher.fetch("claude").is_none());
    }

    #[tokio::test]
    async fn refresh_with_noop_fetcher_does_not_panic() {
        refresh("claude", &NoopVersionFetcher).await;
    }

    struct FakeFetcher(&'static str);
    impl UpstreamVersionFetcher for FakeFetcher {
        fn fetch(&self, _tool_name: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[tokio::test]
    #[allow(unsafe_code)]
    async fn refresh_with_fake_fetcher_writes_cache() {
        // SAFETY: test-only env mutation, no other thread in this test
        // process touches XDG_STATE_HOME concurrently with this call.
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("XDG_STATE_HOME", dir.path()) };
        refresh("claude-test-tool", &FakeFetcher("9.9.9")).await;
        assert_eq!(read_cached_version("claude-test-tool").as_deref(), Some("9.9.9"));
        unsafe { std::env::remove_var("XDG_STATE_HOME") };
    }
}
