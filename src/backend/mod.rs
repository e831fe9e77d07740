//! Backend Abstraction (§4.5): the capability set every container engine
//! implementation must honor, modeled as a closed sum type (§9 "Do not
//! use virtual inheritance hierarchies; the set of backends is closed at
//! build time").

pub mod cli;
pub mod daemon;

use std::fmt;

use async_trait::async_trait;

use crate::image_spec::BuildSpec;
use crate::orchestrator::CancellationToken;
use crate::plan::{ContainerInfo, RunPlan};

/// Prefix every container and image silo creates carries, so `list`-style
/// observers can recognize silo-owned resources and refuse to act on
/// anything else (§6 "Image-tag wire format").
pub const IMAGE_TAG_PREFIX: &str = "silo-";

#[derive(Debug)]
pub enum BackendError {
    /// The backend's prerequisites are unavailable — raised only from
    /// construction, the sole sanctioned "fail fast" path before a run
    /// (§4.5, §7).
    Unavailable(String),
    /// A build or run operation failed after the backend was
    /// successfully constructed.
    Operation(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unavailable(msg) => write!(f, "backend unavailable: {msg}"),
            BackendError::Operation(msg) => write!(f, "backend operation failed: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Callback invoked with each line of build progress (daemon: one per
/// JSON frame; CLI: one per line of subprocess output), used by the
/// progress reporter (§4.6, §4.7) without backends depending on it
/// directly.
pub type ProgressSink<'a> = dyn FnMut(&str) + Send + 'a;

/// Internal trait purely to give [`Backend`]'s two variants a uniform
/// method set to implement against (§9) — callers use the `Backend` enum,
/// never this trait as a trait object.
#[async_trait]
pub(crate) trait BackendOps: Send + Sync {
    async fn image_exists(&self, tag: &str) -> Result<bool, BackendError>;
    async fn build(&self, spec: &BuildSpec, progress: &mut ProgressSink<'_>) -> Result<(), BackendError>;
    async fn next_container_name(&self, base: &str) -> Result<String, BackendError>;
    async fn run(&self, plan: &RunPlan, cancel: CancellationToken) -> Result<i32, BackendError>;
    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError>;
    async fn remove(&self, names: &[String]) -> Result<Vec<String>, BackendError>;
    async fn close(&self) -> Result<(), BackendError>;
}

/// Which concrete container engine this run targets.
pub enum Backend {
    Daemon(daemon::DaemonBackend),
    Cli(cli::CliBackend),
}

impl Backend {
    /// Construct the named backend, or the default if `name` is `None`:
    /// prefer the CLI-driven backend when its binary is discoverable on
    /// `PATH`, otherwise the daemon backend (§4.6).
    pub async fn resolve(name: Option<&str>) -> Result<Backend, BackendError> {
        match name {
            Some("cli") => Ok(Backend::Cli(cli::CliBackend::new()?)),
            Some("daemon") => Ok(Backend::Daemon(daemon::DaemonBackend::new().await?)),
            Some(other) => Err(BackendError::Unavailable(format!("unknown backend {other:?}"))),
            None => {
                if which::which(cli::CONTAINER_BINARY).is_ok() {
                    Ok(Backend::Cli(cli::CliBackend::new()?))
                } else {
                    Ok(Backend::Daemon(daemon::DaemonBackend::new().await?))
                }
            }
        }
    }

    pub async fn image_exists(&self, tag: &str) -> Result<bool, BackendError> {
        match self {
            Backend::Daemon(b) => b.image_exists(tag).await,
            Backend::Cli(b) => b.image_exists(tag).await,
        }
    }

    pub async fn build(&self, spec: &BuildSpec, progress: &mut ProgressSink<'_>) -> Result<(), BackendError> {
        match self {
            Backend::Daemon(b) => b.build(spec, progress).await,
            Backend::Cli(b) => b.build(spec, progress).await,
        }
    }

    pub async fn next_container_name(&self, base: &str) -> Result<String, BackendError> {
        match self {
            Backend::Daemon(b) => b.next_container_name(base).await,
            Backend::Cli(b) => b.next_container_name(base).await,
        }
    }

    pub async fn run(&self, plan: &RunPlan, cancel: CancellationToken) -> Result<i32, BackendError> {
        match self {
            Backend::Daemon(b) => b.run(plan, cancel).await,
            Backend::Cli(b) => b.run(plan, cancel).await,
        }
    }

    pub async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        match self {
            Backend::Daemon(b) => b.list().await,
            Backend::Cli(b) => b.list().await,
        }
    }

    pub async fn remove(&self, names: &[String]) -> Result<Vec<String>, BackendError> {
        match self {
            Backend::Daemon(b) => b.remove(names).await,
            Backend::Cli(b) => b.remove(names).await,
        }
    }

    pub async fn close(&self) -> Result<(), BackendError> {
        match self {
            Backend::Daemon(b) => b.close().await,
            Backend::Cli(b) => b.close().await,
        }
    }
}

/// Lets the orchestrator's pipeline be written once against `BackendOps`
/// and reused for both the real, closed `Backend` enum and a test-only
/// fake — `Backend` itself never becomes a trait object, this is static
/// dispatch over the same inherent methods above.
#[async_trait]
impl BackendOps for Backend {
    async fn image_exists(&self, tag: &str) -> Result<bool, BackendError> {
        Backend::image_exists(self, tag).await
    }

    async fn build(&self, spec: &BuildSpec, progress: &mut ProgressSink<'_>) -> Result<(), BackendError> {
        Backend::build(self, spec, progress).await
    }

    async fn next_container_name(&self, base: &str) -> Result<String, BackendError> {
        Backend::next_container_name(self, base).await
    }

    async fn run(&self, plan: &RunPlan, cancel: CancellationToken) -> Result<i32, BackendError> {
        Backend::run(self, plan, cancel).await
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        Backend::list(self).await
    }

    async fn remove(&self, names: &[String]) -> Result<Vec<String>, BackendError> {
        Backend::remove(self, names).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        Backend::close(self).await
    }
}

/// Compute the smallest positive integer `N` such that `{base}-N` is not
/// already in use among `existing_names` (§3 "Container name").
pub fn smallest_unused_suffix(base: &str, existing_names: &[String]) -> String {
    let prefix = format!("{base}-");
    let mut used = std::collections::HashSet::new();
    for name in existing_names {
        if let Some(suffix) = name.strip_prefix(&prefix)
            && let Ok(n) = suffix.parse::<u32>()
        {
            used.insert(n);
        }
    }
    let mut n = 1u32;
    while used.contains(&n) {
        n += 1;
    }
    format!("{base}-{n}")
}

/// The basename-with-dots-removed component of a container name (§3).
pub fn container_name_base(cwd: &std::path::Path) -> String {
    let basename = cwd.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "silo".to_string());
    basename.replace('.', "")
}

/// A fake container engine used only to drive the orchestrator's real
/// control flow in tests, without a daemon socket or a `container`
/// binary on `PATH`. Implements [`BackendOps`] directly rather than
/// joining the closed `Backend` enum — the enum stays closed at build
/// time (§9); this is an internal test double invoked through the trait,
/// the way the spec's own `CommandRunner`-style grounding suggests.
#[cfg(test)]
pub(crate) struct FakeBackend {
    pub(crate) image_already_built: bool,
    pub(crate) build_invoked: std::sync::atomic::AtomicBool,
    pub(crate) run_result: Result<i32, BackendError>,
}

#[cfg(test)]
impl FakeBackend {
    pub(crate) fn build_was_invoked(&self) -> bool {
        self.build_invoked.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl BackendOps for FakeBackend {
    async fn image_exists(&self, _tag: &str) -> Result<bool, BackendError> {
        Ok(self.image_already_built)
    }

    async fn build(&self, _spec: &BuildSpec, _progress: &mut ProgressSink<'_>) -> Result<(), BackendError> {
        self.build_invoked.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn next_container_name(&self, base: &str) -> Result<String, BackendError> {
        Ok(format!("{base}-1"))
    }

    async fn run(&self, _plan: &RunPlan, _cancel: CancellationToken) -> Result<i32, BackendError> {
        match &self.run_result {
            Ok(code) => Ok(*code),
            Err(BackendError::Unavailable(msg)) => Err(BackendError::Unavailable(msg.clone())),
            Err(BackendError::Operation(msg)) => Err(BackendError::Operation(msg.clone())),
        }
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        Ok(Vec::new())
    }

    async fn remove(&self, names: &[String]) -> Result<Vec<String>, BackendError> {
        Ok(names.to_vec())
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
