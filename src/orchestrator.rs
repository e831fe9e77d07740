//! Run Orchestrator (§4.6): drives the pipeline described in §2 — config
//! (external) → Image Spec Assembler → (`exists`? → `build`) → Mount /
//! Env / Hook Planners → `next_name` → `run` → blocking terminal session
//! → exit code.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::backend::{Backend, BackendOps, container_name_base};
use crate::config::Configuration;
use crate::env_planner;
use crate::error::SiloError;
use crate::git::{GitIdentitySource, RemoteUrlSource, SubprocessGitIdentitySource, SubprocessRemoteUrlSource, normalize_remote_url};
use crate::hook_planner;
use crate::image_spec::{self, BuildArgs};
use crate::mount_planner;
use crate::plan::RunPlan;
use crate::progress::ProgressReporter;
use crate::tool::Tool;
use crate::version_cache::{self, NoopVersionFetcher, UpstreamVersionFetcher};

/// A watched cancellation flag, propagated to every long-lived operation
/// (§5). Not exceptions unwinding across IO boundaries — a plain shared
/// boolean plus a `Notify` so waiters can be woken without polling.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancellationToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Options the CLI front-end (out of scope) collects and hands to the
/// orchestrator for one invocation.
pub struct RunOptions<'a> {
    pub tool: &'a Tool,
    pub config: &'a Configuration,
    pub cwd: PathBuf,
    pub backend_name: Option<&'a str>,
    pub force_build: bool,
    pub verbose: bool,
    pub extra_args: Vec<String>,
}

/// Entry point of the run orchestrator (§1, §4.6).
pub struct Orchestrator {
    identity_source: Box<dyn GitIdentitySource + Send + Sync>,
    remote_url_source: Box<dyn RemoteUrlSource + Send + Sync>,
    version_fetcher: Arc<dyn UpstreamVersionFetcher>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Orchestrator {
            identity_source: Box::new(SubprocessGitIdentitySource),
            remote_url_source: Box::new(SubprocessRemoteUrlSource),
            version_fetcher: Arc::new(NoopVersionFetcher),
        }
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject fakes for git identity/remote discovery and the upstream
    /// version fetcher — used by tests, and by callers who want live
    /// `CACHE_BUST` refreshes wired to a real tool-version source.
    pub fn with_sources(
        identity_source: Box<dyn GitIdentitySource + Send + Sync>,
        remote_url_source: Box<dyn RemoteUrlSource + Send + Sync>,
        version_fetcher: Arc<dyn UpstreamVersionFetcher>,
    ) -> Self {
        Orchestrator { identity_source, remote_url_source, version_fetcher }
    }

    /// Run one tool invocation end to end. Returns the exit code the
    /// `silo` binary should propagate.
    pub async fn run(&self, options: RunOptions<'_>) -> Result<i32, SiloError> {
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(options.verbose);

        let result = self.run_inner(options, &cancel, &mut reporter).await;
        reporter.finish();
        result
    }

    async fn run_inner(
        &self,
        options: RunOptions<'_>,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter,
    ) -> Result<i32, SiloError> {
        let home = crate::path::home_dir()
            .ok_or_else(|| SiloError::PlanConstruction("HOME could not be resolved".to_string()))?;

        reporter.section("Resolving backend");
        let backend = Backend::resolve(options.backend_name)
            .await
            .map_err(|e| SiloError::BackendUnavailable(e.to_string()))?;

        self.run_with_backend(&backend, options, &home, cancel, reporter).await
    }

    /// The pipeline from §2's system overview, written once against
    /// [`BackendOps`] so both the real, closed `Backend` enum and a
    /// test-only fake drive the exact same control flow (§8 end-to-end
    /// scenarios 2, 5, 6 exercise this through `backend::FakeBackend`).
    async fn run_with_backend<B: BackendOps>(
        &self,
        backend: &B,
        options: RunOptions<'_>,
        home: &Path,
        cancel: &CancellationToken,
        reporter: &mut ProgressReporter,
    ) -> Result<i32, SiloError> {
        let remote_urls = self.remote_url_source.remote_urls();
        let normalized_remotes: Vec<String> = remote_urls.iter().map(|u| normalize_remote_url(u)).collect();
        let matching_repos = options.config.matching_repos(&normalized_remotes);

        reporter.section("Assembling image spec");
        let build_spec = self.assemble_build_spec(&options, home, &matching_repos);

        if options.force_build || !backend.image_exists(&build_spec.image_tag).await.map_err(|e| SiloError::BackendUnavailable(e.to_string()))? {
            reporter.section("Building image");
            let mut last_line = String::new();
            let verbose = options.verbose;
            let mut on_progress = |line: &str| {
                last_line = line.to_string();
                if verbose {
                    log::info!("{line}");
                } else {
                    reporter.detail(line);
                }
            };
            // Cancellation before `Backend.run` is the orchestrator's own
            // responsibility (§4.6); once `run` is reached it's the
            // backend's (§4.5, §5).
            tokio::select! {
                result = backend.build(&build_spec, &mut on_progress) => {
                    result.map_err(|e| SiloError::BuildFailed(e.to_string()))?;
                }
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    return Err(SiloError::PlanConstruction("build cancelled".to_string()));
                }
            }
        }

        // Background version refresh: detached, never awaited on the
        // critical path (§4.6, §9).
        let tool_name = options.tool.upstream_version_cache_key().to_string();
        let fetcher = Arc::clone(&self.version_fetcher);
        tokio::spawn(async move { version_cache::refresh(&tool_name, fetcher.as_ref()).await });

        if cancel.is_cancelled() {
            return Err(SiloError::PlanConstruction("cancelled before run".to_string()));
        }

        reporter.section("Planning mounts, env, and hooks");
        let run_plan = self.plan_run(&options, home, &matching_repos, &build_spec.image_tag, backend).await?;

        reporter.section("Starting container");
        reporter.finish();

        let exit_code = backend
            .run(&run_plan, cancel.clone())
            .await
            .map_err(|e| match e {
                crate::backend::BackendError::Operation(msg) if msg.contains("force-removed") => {
                    SiloError::ContainerLeak(run_plan.container_name.clone())
                }
                other => SiloError::BuildFailed(other.to_string()),
            })?;

        let _ = backend.close().await;
        Ok(exit_code)
    }

    fn assemble_build_spec(
        &self,
        options: &RunOptions<'_>,
        home: &Path,
        matching_repos: &[(&str, &crate::config::RepoOverrides)],
    ) -> image_spec::BuildSpec {
        let global_hooks = options.config.post_build_hooks.clone();
        let mut tool_and_repo_hooks: Vec<String> = options
            .config
            .tools
            .get(options.tool.name)
            .map(|t| t.post_build_hooks.clone())
            .unwrap_or_default();
        for (_, repo) in matching_repos {
            tool_and_repo_hooks.extend(repo.scoped.post_build_hooks.iter().cloned());
        }

        let mut build_args = BuildArgs::new();
        build_args.insert("HOME".to_string(), home.display().to_string());
        build_args.insert("USER".to_string(), std::env::var("USER").unwrap_or_default());
        build_args.insert("UID".to_string(), current_uid().to_string());
        if let Some(cache_bust) = version_cache::read_cached_version(options.tool.upstream_version_cache_key()) {
            build_args.insert("CACHE_BUST".to_string(), cache_bust);
        }

        image_spec::assemble(options.tool, &global_hooks, &tool_and_repo_hooks, build_args)
    }

    async fn plan_run<B: BackendOps>(
        &self,
        options: &RunOptions<'_>,
        home: &Path,
        matching_repos: &[(&str, &crate::config::RepoOverrides)],
        image_tag: &str,
        backend: &B,
    ) -> Result<RunPlan, SiloError> {
        let remote_urls = self.remote_url_source.remote_urls();
        let mount_plan = mount_planner::plan_mounts(&options.cwd, options.config, options.tool.name, &remote_urls);

        let repo_env_specs: Vec<String> =
            matching_repos.iter().flat_map(|(_, repo)| repo.scoped.env.iter().cloned()).collect();
        let identity = self.identity_source.identity();
        let env_plan = env_planner::plan_env(
            options.config,
            options.tool.name,
            &repo_env_specs,
            &identity,
            &|name| std::env::var(name).ok(),
        );

        let repo_pre_run_hooks: Vec<String> =
            matching_repos.iter().flat_map(|(_, repo)| repo.scoped.pre_run_hooks.iter().cloned()).collect();
        let tool_pre_run_hooks = options
            .config
            .tools
            .get(options.tool.name)
            .map(|t| t.pre_run_hooks.clone())
            .unwrap_or_default();

        let all_mounts: Vec<&Path> =
            mount_plan.mounts_ro.iter().chain(mount_plan.mounts_rw.iter()).map(|p| p.as_path()).collect();
        let pre_run_hooks = hook_planner::plan_hooks(
            None,
            &all_mounts,
            options.verbose,
            &options.config.pre_run_hooks,
            &tool_pre_run_hooks,
            &repo_pre_run_hooks,
        );

        let base = container_name_base(&options.cwd);
        let container_name = backend
            .next_container_name(&base)
            .await
            .map_err(|e| SiloError::PlanConstruction(e.to_string()))?;

        Ok(RunPlan {
            image_tag: image_tag.to_string(),
            container_name,
            work_dir: options.cwd.clone(),
            mounts_ro: mount_plan.mounts_ro,
            mounts_rw: mount_plan.mounts_rw,
            env: env_plan.env,
            command: options.tool.argv(home),
            extra_args: options.extra_args.clone(),
            pre_run_hooks,
        })
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FakeBackend;
    use crate::backend::BackendError;
    use crate::config::Configuration;
    use crate::git::GitIdentity;
    use std::sync::atomic::AtomicBool;

    struct EmptyIdentitySource;
    impl GitIdentitySource for EmptyIdentitySource {
        fn identity(&self) -> GitIdentity {
            GitIdentity::default()
        }
    }

    struct EmptyRemoteSource;
    impl RemoteUrlSource for EmptyRemoteSource {
        fn remote_urls(&self) -> Vec<String> {
            Vec::new()
        }
    }

    fn test_orchestrator() -> Orchestrator {
        Orchestrator::with_sources(
            Box::new(EmptyIdentitySource),
            Box::new(EmptyRemoteSource),
            Arc::new(NoopVersionFetcher),
        )
    }

    fn test_options(tool: &Tool, config: &Configuration) -> RunOptions<'_> {
        RunOptions {
            tool,
            config,
            cwd: PathBuf::from("/tmp/silo-orchestrator-test"),
            backend_name: None,
            force_build: false,
            verbose: true,
            extra_args: Vec::new(),
        }
    }

    /// Scenario 2: an already-built image is reused — `build` is never
    /// invoked, driven through the real `run_inner`/`run_with_backend`
    /// pipeline against a fake backend rather than only asserting on a
    /// planning-layer tag comparison.
    #[tokio::test]
    async fn existing_image_skips_build() {
        let tool = crate::tool::find("claude").unwrap();
        let config = Configuration::default();
        let orchestrator = test_orchestrator();
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(true);

        let fake = FakeBackend { image_already_built: true, build_invoked: AtomicBool::new(false), run_result: Ok(0) };
        let home = PathBuf::from("/home/test-user");

        let result =
            orchestrator.run_with_backend(&fake, test_options(tool, &config), &home, &cancel, &mut reporter).await;

        assert_eq!(result.unwrap(), 0);
        assert!(!fake.build_was_invoked());
    }

    /// Scenario 6: the container's own exit code propagates unchanged as
    /// silo's exit status.
    #[tokio::test]
    async fn container_exit_code_propagates() {
        let tool = crate::tool::find("claude").unwrap();
        let config = Configuration::default();
        let orchestrator = test_orchestrator();
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(true);

        let fake = FakeBackend { image_already_built: true, build_invoked: AtomicBool::new(false), run_result: Ok(7) };
        let home = PathBuf::from("/home/test-user");

        let result =
            orchestrator.run_with_backend(&fake, test_options(tool, &config), &home, &cancel, &mut reporter).await;

        assert_eq!(result.unwrap(), 7);
    }

    /// Scenario 5: a force-removed container (cancellation escalation)
    /// maps to `SiloError::ContainerLeak`, not a generic build failure.
    #[tokio::test]
    async fn force_removed_container_maps_to_container_leak() {
        let tool = crate::tool::find("claude").unwrap();
        let config = Configuration::default();
        let orchestrator = test_orchestrator();
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(true);

        let fake = FakeBackend {
            image_already_built: true,
            build_invoked: AtomicBool::new(false),
            run_result: Err(BackendError::Operation("force-removed after cancellation escalation".to_string())),
        };
        let home = PathBuf::from("/home/test-user");

        let result =
            orchestrator.run_with_backend(&fake, test_options(tool, &config), &home, &cancel, &mut reporter).await;

        assert!(matches!(result, Err(SiloError::ContainerLeak(_))));
    }

    #[tokio::test]
    async fn cancellation_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_token_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_token_does_not_block() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
