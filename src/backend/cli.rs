//! CLI Backend (§4.7): drives a daemon-less container engine by spawning
//! its `container` CLI for every operation. Owns file-mount staging (the
//! CLI only accepts directories for bind mounts) and PTY plumbing.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use etcetera::base_strategy::{BaseStrategy, choose_base_strategy};
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use sha2::{Digest, Sha256};

use super::{BackendError, BackendOps, IMAGE_TAG_PREFIX, ProgressSink, smallest_unused_suffix};
use crate::image_spec::BuildSpec;
use crate::orchestrator::CancellationToken;
use crate::plan::{ContainerInfo, RunPlan};
use crate::terminal::{self, InputEvent, RawModeGuard};

/// The CLI this backend drives. A distinct constant from the tool
/// registry's "container" argv so a future rename only touches one spot.
pub(crate) const CONTAINER_BINARY: &str = "container";

/// Resource-limit defaults shared with the daemon backend's intended
/// behavior (§9 Open Question: unify the two divergent policies the
/// source carries rather than let each backend pick its own).
/// Unified resource policy shared by both backends (§9 Open Question:
/// CPU/memory limits must not diverge depending on which backend runs).
pub(crate) fn cpu_limit() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

pub(crate) fn memory_limit_bytes() -> u64 {
    total_memory_bytes().map(|total| total / 2).unwrap_or(2 * 1024 * 1024 * 1024)
}

#[cfg(target_os = "linux")]
fn total_memory_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = contents.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn total_memory_bytes() -> Option<u64> {
    None
}

pub struct CliBackend {
    binary: PathBuf,
}

impl CliBackend {
    pub fn new() -> Result<Self, BackendError> {
        let binary = which::which(CONTAINER_BINARY)
            .map_err(|_| BackendError::Unavailable(format!("`{CONTAINER_BINARY}` not found on PATH")))?;
        Ok(CliBackend { binary })
    }

    fn command(&self) -> tokio::process::Command {
        tokio::process::Command::new(&self.binary)
    }

    async fn run_capturing(&self, args: &[&str]) -> Result<std::process::Output, BackendError> {
        self.command()
            .args(args)
            .output()
            .await
            .map_err(|e| BackendError::Operation(format!("`{CONTAINER_BINARY} {}` failed to spawn: {e}", args.join(" "))))
    }
}

#[async_trait]
impl BackendOps for CliBackend {
    async fn image_exists(&self, tag: &str) -> Result<bool, BackendError> {
        let output = self.run_capturing(&["image", "inspect", tag]).await?;
        Ok(output.status.success())
    }

    async fn build(&self, spec: &BuildSpec, progress: &mut ProgressSink<'_>) -> Result<(), BackendError> {
        let build_dir = tempfile::tempdir().map_err(|e| BackendError::Operation(e.to_string()))?;
        let dockerfile_path = build_dir.path().join("Dockerfile");
        std::fs::write(&dockerfile_path, &spec.dockerfile_text)
            .map_err(|e| BackendError::Operation(format!("failed to write Dockerfile: {e}")))?;

        let mut args: Vec<String> = vec![
            "build".to_string(),
            "--tag".to_string(),
            spec.image_tag.clone(),
            "--target".to_string(),
            spec.target.clone(),
            "--cpus".to_string(),
            cpu_limit().to_string(),
            "--memory".to_string(),
            memory_limit_bytes().to_string(),
        ];
        for (key, value) in &spec.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(build_dir.path().display().to_string());

        let mut child = self
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackendError::Operation(format!("failed to spawn container build: {e}")))?;

        stream_child_output(&mut child, progress).await;

        let status = child.wait().await.map_err(|e| BackendError::Operation(e.to_string()))?;
        if !status.success() {
            return Err(BackendError::Operation(format!("container build exited with {status}")));
        }
        Ok(())
    }

    async fn next_container_name(&self, base: &str) -> Result<String, BackendError> {
        let existing = self.list().await?;
        Ok(smallest_unused_suffix(base, &existing.iter().map(|c| c.name.clone()).collect::<Vec<_>>()))
    }

    async fn run(&self, plan: &RunPlan, cancel: CancellationToken) -> Result<i32, BackendError> {
        let staged = stage_file_mounts(&plan.mounts_ro, &plan.mounts_rw)?;

        let mut hooks = staged.restore_symlink_hooks.clone();
        hooks.extend(plan.pre_run_hooks.iter().cloned());
        let script = crate::hook_planner::compose_script(&hooks, &plan.full_argv());

        let mut args: Vec<String> = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--interactive".to_string(),
            "--tty".to_string(),
            "--name".to_string(),
            plan.container_name.clone(),
            "--workdir".to_string(),
            plan.work_dir.display().to_string(),
            "--cpus".to_string(),
            cpu_limit().to_string(),
            "--memory".to_string(),
            memory_limit_bytes().to_string(),
            "--no-new-privileges".to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--ipc".to_string(),
            "private".to_string(),
        ];
        for (dir, access) in &staged.directory_binds {
            args.push("--volume".to_string());
            args.push(format!("{0}:{0}:{1}", dir.display(), access.flag()));
        }
        for path in &plan.mounts_ro {
            if staged.staged_paths.contains(path) {
                continue;
            }
            args.push("--volume".to_string());
            args.push(format!("{0}:{0}:ro", path.display()));
        }
        for path in &plan.mounts_rw {
            if staged.staged_paths.contains(path) {
                continue;
            }
            args.push("--volume".to_string());
            args.push(format!("{0}:{0}:rw", path.display()));
        }
        for pair in &plan.env {
            args.push("--env".to_string());
            args.push(pair.clone());
        }
        args.push(plan.image_tag.clone());
        args.push("/bin/bash".to_string());
        args.push("-c".to_string());
        args.push(script);

        run_attached(&self.binary, &args, cancel, || self.remove_blocking(&plan.container_name)).await
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        let output = self.run_capturing(&["list", "--all", "--format", "json"]).await?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(stdout.trim()).unwrap_or_default();
        Ok(parsed
            .into_iter()
            .filter_map(|v| {
                let name = v.get("name")?.as_str()?.to_string();
                let image_tag = v.get("image")?.as_str().unwrap_or_default().to_string();
                let created_at = v.get("created")?.as_str().unwrap_or_default().to_string();
                Some(ContainerInfo { name, image_tag, created_at })
            })
            .filter(|c| c.image_tag.starts_with(IMAGE_TAG_PREFIX))
            .collect())
    }

    async fn remove(&self, names: &[String]) -> Result<Vec<String>, BackendError> {
        let mut removed = Vec::new();
        for name in names {
            let output = self.run_capturing(&["rm", "--force", name]).await?;
            if output.status.success() {
                removed.push(name.clone());
            }
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

impl CliBackend {
    fn remove_blocking(&self, name: &str) {
        let _ = std::process::Command::new(&self.binary).args(["rm", "--force", name]).output();
    }
}

async fn stream_child_output(child: &mut tokio::process::Child, progress: &mut ProgressSink<'_>) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            progress(&line);
        }
    }
}

/// Run the composed command attached to a PTY, forwarding stdin/resize
/// and handling the two-Ctrl-C escalation (§4.7, §9).
async fn run_attached(
    binary: &Path,
    args: &[String],
    cancel: CancellationToken,
    force_remove: impl FnOnce(),
) -> Result<i32, BackendError> {
    let pty_system = native_pty_system();
    let (cols, rows) = terminal::current_size();
    let pair = pty_system
        .openpty(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
        .map_err(|e| BackendError::Operation(format!("failed to open pty: {e}")))?;

    let mut cmd = CommandBuilder::new(binary);
    cmd.args(args);

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| BackendError::Operation(format!("failed to spawn under pty: {e}")))?;
    drop(pair.slave);

    let mut writer = pair.master.take_writer().map_err(|e| BackendError::Operation(e.to_string()))?;
    let reader = pair.master.try_clone_reader().map_err(|e| BackendError::Operation(e.to_string()))?;
    let master = Mutex::new(pair.master);

    let output_task = std::thread::spawn(move || {
        let mut reader = reader;
        let mut buf = [0u8; 4096];
        loop {
            match std::io::Read::read(&mut reader, &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut stdout = std::io::stdout();
                    let _ = stdout.write_all(&buf[..n]);
                    let _ = stdout.flush();
                }
            }
        }
    });

    let guard = RawModeGuard::acquire().ok();
    let mut stdin_events = terminal::spawn_stdin_reader();
    let mut sigwinch = terminal::watch_sigwinch();
    let mut sigterm = terminal::watch_sigterm();

    let exit_code = loop {
        if let Some(status) = child.try_wait().map_err(|e| BackendError::Operation(e.to_string()))? {
            break status.exit_code() as i32;
        }

        if let Ok(event) = tokio::time::timeout(std::time::Duration::from_millis(50), stdin_events.recv()).await {
            match event {
                Some(InputEvent::Bytes(bytes)) => {
                    let _ = writer.write_all(&bytes);
                }
                Some(InputEvent::CtrlCEscalation) => {
                    cancel.cancel();
                    let _ = child.kill();
                    force_remove();
                    drop(guard);
                    return Err(BackendError::Operation(
                        "force-removed after cancellation escalation".to_string(),
                    ));
                }
                None => break 1,
            }
        }

        if let Ok(Some(())) = tokio::time::timeout(std::time::Duration::from_millis(1), sigwinch.recv()).await {
            let (cols, rows) = terminal::current_size();
            if let Ok(master) = master.lock() {
                let _ = master.resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 });
            }
        }

        // Forward the host's SIGTERM to the spawned `container run` child,
        // same as the daemon backend forwards it to `kill_container` (§4.5).
        if let Ok(Some(())) = tokio::time::timeout(std::time::Duration::from_millis(1), sigterm.recv()).await {
            let _ = child.kill();
        }
    };

    drop(guard);
    let _ = output_task.join();
    Ok(exit_code)
}

/// Access level a staged mount was configured with, so the directory
/// bind-mount that replaces it keeps the same `:ro`/`:rw` guarantee.
#[derive(Clone, Copy, PartialEq, Eq)]
enum MountAccess {
    Ro,
    Rw,
}

impl MountAccess {
    fn flag(self) -> &'static str {
        match self {
            MountAccess::Ro => "ro",
            MountAccess::Rw => "rw",
        }
    }
}

/// Staged file mounts: the CLI backend can only bind-mount directories,
/// so individual file mounts are staged into a content-addressed staging
/// directory, that directory is bind-mounted instead, and a restore hook
/// recreates the original filename as a symlink inside the container
/// (§4.7, §9 "Staged file mounts").
struct StagedMounts {
    /// Host directories to bind-mount in place of individual files, each
    /// tagged with the access level its original file mount had.
    directory_binds: Vec<(PathBuf, MountAccess)>,
    /// Original mount paths that were files and got staged (excluded
    /// from the plain per-path bind-mount loop).
    staged_paths: std::collections::HashSet<PathBuf>,
    /// Pre-run hook fragments that recreate each staged file's original
    /// name as a symlink inside the container.
    restore_symlink_hooks: Vec<String>,
}

fn stage_file_mounts(mounts_ro: &[PathBuf], mounts_rw: &[PathBuf]) -> Result<StagedMounts, BackendError> {
    let state_root = staging_root()?;
    let mut directory_binds = Vec::new();
    let mut staged_paths = std::collections::HashSet::new();
    let mut restore_symlink_hooks = Vec::new();

    let candidates =
        mounts_ro.iter().map(|p| (p, MountAccess::Ro)).chain(mounts_rw.iter().map(|p| (p, MountAccess::Rw)));

    for (path, access) in candidates {
        if !path.is_file() {
            continue;
        }
        let hash = hex_sha256(&path.display().to_string());
        let stage_dir = state_root.join(&hash);
        std::fs::create_dir_all(&stage_dir).map_err(|e| BackendError::Operation(e.to_string()))?;

        let basename = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let staged_file = stage_dir.join(&basename);
        if !staged_file.exists() {
            match access {
                // RW mounts keep sharing an inode with the host file so
                // writes the tool makes inside the container land back
                // on the original.
                MountAccess::Rw => std::fs::hard_link(path, &staged_file)
                    .or_else(|_| std::fs::copy(path, &staged_file).map(|_| ()))
                    .map_err(|e| BackendError::Operation(format!("failed to stage {}: {e}", path.display())))?,
                // RO mounts are always copied, never hard-linked, so a
                // container process can't write through the shared inode
                // back to the host original even if the `:ro` bind itself
                // were bypassed.
                MountAccess::Ro => std::fs::copy(path, &staged_file)
                    .map(|_| ())
                    .map_err(|e| BackendError::Operation(format!("failed to stage {}: {e}", path.display())))?,
            }
        }

        directory_binds.push((stage_dir.clone(), access));
        staged_paths.insert(path.clone());

        let original = shell_escape::escape(path.display().to_string().into());
        let staged = shell_escape::escape(staged_file.display().to_string().into());
        restore_symlink_hooks.push(format!("ln -sf {staged} {original}"));
    }

    Ok(StagedMounts { directory_binds, staged_paths, restore_symlink_hooks })
}

fn staging_root() -> Result<PathBuf, BackendError> {
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg_state).join("silo").join("staged-mounts"));
    }
    let strategy = choose_base_strategy()
        .map_err(|e| BackendError::Operation(format!("cannot determine state directory: {e}")))?;
    Ok(strategy.data_dir().join("silo").join("staged-mounts"))
}

fn hex_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}
