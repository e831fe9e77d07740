//! Daemon Backend (§4.6): talks to a container engine over its API
//! socket, grounded in `bollard`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, ResizeContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use super::{BackendError, BackendOps, IMAGE_TAG_PREFIX, ProgressSink, container_name_base, smallest_unused_suffix};
use crate::image_spec::BuildSpec;
use crate::orchestrator::CancellationToken;
use crate::plan::{ContainerInfo, RunPlan};
use crate::terminal::{self, InputEvent, RawModeGuard};

/// Label attached to every container silo creates, so `list`/`remove`
/// only ever touch silo-owned resources (§6).
const MANAGED_LABEL: &str = "run.silo.managed";

pub struct DaemonBackend {
    docker: Docker,
}

impl DaemonBackend {
    pub async fn new() -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackendError::Unavailable(format!("cannot connect to container daemon: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| BackendError::Unavailable(format!("container daemon unreachable: {e}")))?;
        Ok(DaemonBackend { docker })
    }
}

#[async_trait]
impl BackendOps for DaemonBackend {
    async fn image_exists(&self, tag: &str) -> Result<bool, BackendError> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(BackendError::Operation(format!("image inspect failed: {e}"))),
        }
    }

    async fn build(&self, spec: &BuildSpec, progress: &mut ProgressSink<'_>) -> Result<(), BackendError> {
        let tar = build_context_tar(&spec.dockerfile_text)
            .map_err(|e| BackendError::Operation(format!("failed to build context tar: {e}")))?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: spec.image_tag.clone(),
            target: spec.target.clone(),
            buildargs: spec.build_args.clone().into_iter().collect(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tar.into()));
        while let Some(frame) = stream.next().await {
            let info = frame.map_err(|e| BackendError::Operation(format!("build stream error: {e}")))?;

            if let Some(err) = &info.error {
                return Err(BackendError::Operation(err.clone()));
            }
            if let Some(detail) = &info.error_detail
                && let Some(message) = &detail.message
            {
                return Err(BackendError::Operation(message.clone()));
            }
            if let Some(stream_line) = &info.stream {
                progress(stream_line);
            }
        }

        Ok(())
    }

    async fn next_container_name(&self, base: &str) -> Result<String, BackendError> {
        let existing = self.list().await?;
        Ok(smallest_unused_suffix(base, &existing.iter().map(|c| c.name.clone()).collect::<Vec<_>>()))
    }

    async fn run(&self, plan: &RunPlan, cancel: CancellationToken) -> Result<i32, BackendError> {
        let mut binds = Vec::new();
        for path in &plan.mounts_ro {
            binds.push(format!("{0}:{0}:ro", path.display()));
        }
        for path in &plan.mounts_rw {
            binds.push(format!("{0}:{0}:rw", path.display()));
        }

        let host_config = HostConfig {
            binds: Some(binds),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            privileged: Some(false),
            ipc_mode: Some("private".to_string()),
            auto_remove: Some(true),
            // Same resource policy the CLI backend applies (§9), so a run
            // gets identical limits regardless of which backend starts it.
            nano_cpus: Some(super::cli::cpu_limit() as i64 * 1_000_000_000),
            memory: Some(super::cli::memory_limit_bytes() as i64),
            ..Default::default()
        };

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert("run.silo.image_tag".to_string(), plan.image_tag.clone());

        let (cols, rows) = terminal::current_size();
        let entrypoint = vec!["/bin/bash".to_string(), "-c".to_string()];

        let config = ContainerConfig {
            image: Some(plan.image_tag.clone()),
            working_dir: Some(plan.work_dir.display().to_string()),
            env: Some(plan.env.clone()),
            entrypoint: Some(entrypoint),
            cmd: Some(vec![entrypoint_script(plan)]),
            tty: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options =
            CreateContainerOptions { name: plan.container_name.clone(), platform: None };
        let created = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| BackendError::Operation(format!("container create failed: {e}")))?;
        let container_id = created.id;

        let attach_options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let mut attach = match self.docker.attach_container(&container_id, Some(attach_options)).await {
            Ok(attach) => attach,
            Err(e) => {
                self.remove_created_container(&container_id).await;
                return Err(BackendError::Operation(format!("container attach failed: {e}")));
            }
        };

        if let Err(e) = self.docker.start_container::<String>(&container_id, None).await {
            self.remove_created_container(&container_id).await;
            return Err(BackendError::Operation(format!("container start failed: {e}")));
        }

        let _ = self
            .docker
            .resize_container(
                &container_id,
                ResizeContainerOptions { height: rows as u64, width: cols as u64 },
            )
            .await;

        let guard = RawModeGuard::acquire().ok();
        let mut stdin_events = terminal::spawn_stdin_reader();
        let mut sigwinch = terminal::watch_sigwinch();
        let mut sigterm = terminal::watch_sigterm();

        let exit_code = loop {
            tokio::select! {
                Some(event) = stdin_events.recv() => {
                    match event {
                        InputEvent::Bytes(bytes) => {
                            let _ = attach.input.write_all(&bytes).await;
                        }
                        InputEvent::CtrlCEscalation => {
                            cancel.cancel();
                            let _ = self.remove(&[plan.container_name.clone()]).await;
                            drop(guard);
                            return Err(BackendError::Operation("force-removed after cancellation escalation".to_string()));
                        }
                    }
                }
                Some(()) = sigwinch.recv() => {
                    let (cols, rows) = terminal::current_size();
                    let _ = self.docker.resize_container(
                        &container_id,
                        ResizeContainerOptions { height: rows as u64, width: cols as u64 },
                    ).await;
                }
                Some(()) = sigterm.recv() => {
                    let _ = self.docker.kill_container::<String>(&container_id, None).await;
                }
                Some(chunk) = attach.output.next() => {
                    if let Ok(chunk) = chunk {
                        print!("{chunk}");
                    }
                }
                wait_result = self.docker.wait_container::<String>(&container_id, None).collect::<Vec<_>>() => {
                    let code = wait_result
                        .into_iter()
                        .next()
                        .and_then(|r| r.ok())
                        .map(|w| w.status_code)
                        .unwrap_or(1);
                    break code as i32;
                }
            }
        };

        drop(guard);
        Ok(exit_code)
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{MANAGED_LABEL}=true")]);
        let options = ListContainersOptions { all: true, filters, ..Default::default() };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| BackendError::Operation(format!("container list failed: {e}")))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                name: c.names.unwrap_or_default().first().map(|n| n.trim_start_matches('/').to_string()).unwrap_or_default(),
                image_tag: c.image.unwrap_or_default(),
                created_at: c.created.map(|t| t.to_string()).unwrap_or_default(),
            })
            .filter(|c| c.image_tag.starts_with(IMAGE_TAG_PREFIX))
            .collect())
    }

    async fn remove(&self, names: &[String]) -> Result<Vec<String>, BackendError> {
        let mut removed = Vec::new();
        for name in names {
            let options = RemoveContainerOptions { force: true, ..Default::default() };
            if self.docker.remove_container(name, Some(options)).await.is_ok() {
                removed.push(name.clone());
            }
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

impl DaemonBackend {
    /// Removes a container that was created but never reached a running
    /// state (attach/start failed), so a failed run never leaves behind a
    /// named, silo-owned container (§3 "no silo invocation may leak a
    /// container whose name it chose"). `auto_remove` only fires once a
    /// container has actually started, so this path needs its own cleanup.
    async fn remove_created_container(&self, container_id: &str) {
        let options = RemoveContainerOptions { force: true, ..Default::default() };
        if let Err(e) = self.docker.remove_container(container_id, Some(options)).await {
            log::warn!("failed to remove container {container_id} after a failed start: {e}");
        }
    }
}

fn entrypoint_script(plan: &RunPlan) -> String {
    crate::hook_planner::compose_script(&plan.pre_run_hooks, &plan.full_argv())
}

/// Whether a given tag is already present locally, used by tests that
/// can't reach a real daemon to exercise the "silo-owned" filtering.
fn is_silo_image(tag: &str) -> bool {
    tag.starts_with(IMAGE_TAG_PREFIX)
}

/// Build an in-memory tar archive containing only the assembled
/// Dockerfile — build context beyond the Dockerfile text itself is not
/// needed since all provisioning is `RUN curl`/`apt-get` against the
/// network, not `COPY`.
fn build_context_tar(dockerfile_text: &str) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_path("Dockerfile")?;
    header.set_size(dockerfile_text.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, dockerfile_text.as_bytes())?;
    builder.into_inner()
}
