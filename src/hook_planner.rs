//! Hook Planner (§4.4): order and concatenate post-build and pre-run hook
//! scripts, and generate the mount-readiness wait script.

use std::path::Path;

/// Per-path poll period: `sleep 0.01` keeps us comfortably above the
/// required ≥100 Hz (§4.4).
const POLL_SLEEP_SECONDS: &str = "0.01";
/// 10s per-path timeout at a 0.01s poll period.
const POLL_ITERATIONS: u32 = 1000;

/// Build the generated mount-wait script: a shell function that polls, in
/// parallel, for every host-confirmed mount path to appear inside the
/// container, then blocks until all pollers finish.
///
/// Returns a single shell fragment suitable for `&&`-joining with the
/// rest of the hook sequence. Exits non-zero (aborting the tool launch,
/// per §7) if any path fails to appear within its 10s timeout.
pub fn mount_wait_script(paths: &[&Path], verbose: bool) -> String {
    if paths.is_empty() {
        return "true".to_string();
    }

    let mut script = String::from("__silo_wait_mounts() {\n");
    script.push_str("  local pids=()\n");

    for path in paths {
        let escaped = shell_escape::escape(path.display().to_string().into());
        script.push_str("  (\n");
        script.push_str(&format!("    for _ in $(seq 1 {POLL_ITERATIONS}); do\n"));
        script.push_str(&format!("      if [ -e {escaped} ]; then\n"));
        if verbose {
            script.push_str(&format!("        echo \"[mount-wait] {escaped} ready\"\n"));
        }
        script.push_str("        exit 0\n");
        script.push_str("      fi\n");
        script.push_str(&format!("      sleep {POLL_SLEEP_SECONDS}\n"));
        script.push_str("    done\n");
        script.push_str(&format!(
            "    echo \"[mount-wait] timed out waiting for {escaped}\" >&2\n"
        ));
        script.push_str("    exit 1\n");
        script.push_str("  ) &\n");
        script.push_str("  pids+=(\"$!\")\n");
    }

    script.push_str("  local status=0\n");
    script.push_str("  for pid in \"${pids[@]}\"; do\n");
    script.push_str("    wait \"$pid\" || status=1\n");
    script.push_str("  done\n");
    script.push_str("  return $status\n");
    script.push_str("}\n");
    script.push_str("__silo_wait_mounts");
    script
}

/// Assemble the ordered pre-run hook sequence (§4.4, steps 1-5):
/// an optional backend daemon-start hook, the mount-wait script, then
/// global, tool, and repo `pre_run_hooks` in that order.
pub fn plan_hooks(
    daemon_start_hook: Option<&str>,
    mounts: &[&Path],
    verbose: bool,
    global_hooks: &[String],
    tool_hooks: &[String],
    repo_hooks: &[String],
) -> Vec<String> {
    let mut hooks = Vec::new();
    if let Some(daemon_start) = daemon_start_hook {
        hooks.push(daemon_start.to_string());
    }
    hooks.push(mount_wait_script(mounts, verbose));
    hooks.extend(global_hooks.iter().cloned());
    hooks.extend(tool_hooks.iter().cloned());
    hooks.extend(repo_hooks.iter().cloned());
    hooks
}

/// Compose the final `bash -c` entrypoint: every hook joined by `&&` so
/// any non-zero exit aborts before the tool launches, ending in an `exec`
/// that hands the shell's PID to the tool (§4.4, §9 "Composed bash
/// entrypoint").
pub fn compose_script(hooks: &[String], argv: &[String]) -> String {
    let exec_argv: String =
        argv.iter().map(|a| shell_escape::escape(a.into()).into_owned()).collect::<Vec<_>>().join(" ");

    let mut parts: Vec<String> = hooks.iter().filter(|h| !h.is_empty()).cloned().collect();
    parts.push(format!("exec {exec_argv}"));
    parts.join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn empty_mounts_produce_trivially_true_wait() {
        let script = mount_wait_script(&[], false);
        assert_eq!(script, "true");
    }

    #[test]
    fn mount_wait_script_embeds_every_path() {
        let a = PathBuf::from("/home/alice/proj");
        let b = PathBuf::from("/data");
        let script = mount_wait_script(&[&a, &b], false);
        assert!(script.contains("/home/alice/proj"));
        assert!(script.contains("/data"));
        assert!(script.contains("__silo_wait_mounts"));
    }

    #[test]
    fn verbose_mode_emits_readiness_line() {
        let a = PathBuf::from("/data");
        let script = mount_wait_script(&[&a], true);
        assert!(script.contains("ready"));
    }

    #[test]
    fn non_verbose_mode_has_no_readiness_line() {
        let a = PathBuf::from("/data");
        let script = mount_wait_script(&[&a], false);
        assert!(!script.contains("ready"));
        assert!(script.contains("timed out"));
    }

    #[test]
    fn compose_script_joins_with_and_and_execs_last() {
        let hooks = vec!["echo one".to_string(), "echo two".to_string()];
        let argv = vec!["claude".to_string(), "--flag".to_string()];
        let composed = compose_script(&hooks, &argv);
        assert_eq!(composed, "echo one && echo two && exec claude --flag");
    }

    #[test]
    fn compose_script_shell_escapes_argv() {
        let argv = vec!["claude".to_string(), "a value with spaces".to_string()];
        let composed = compose_script(&[], &argv);
        assert!(composed.ends_with("exec claude 'a value with spaces'"));
    }

    #[test]
    fn plan_hooks_orders_daemon_start_before_mount_wait() {
        let hooks = plan_hooks(Some("start-daemon"), &[], false, &[], &[], &[]);
        assert_eq!(hooks[0], "start-daemon");
        assert!(hooks[1].contains("true") || hooks[1].contains("__silo_wait_mounts"));
    }

    #[test]
    fn plan_hooks_orders_global_then_tool_then_repo() {
        let hooks = plan_hooks(
            None,
            &[],
            false,
            &["echo global".to_string()],
            &["echo tool".to_string()],
            &["echo repo".to_string()],
        );
        let global_pos = hooks.iter().position(|h| h == "echo global").unwrap();
        let tool_pos = hooks.iter().position(|h| h == "echo tool").unwrap();
        let repo_pos = hooks.iter().position(|h| h == "echo repo").unwrap();
        assert!(global_pos < tool_pos);
        assert!(tool_pos < repo_pos);
    }

    #[test]
    fn no_daemon_start_omits_that_hook() {
        let hooks = plan_hooks(None, &[], false, &[], &[], &[]);
        assert_eq!(hooks.len(), 1); // just the mount-wait fragment
    }
}
