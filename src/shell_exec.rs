//! Cross-platform shell execution.
//!
//! Provides a unified interface for executing shell commands:
//! - Unix: always `/bin/sh -c`
//! - Windows: prefers Git Bash if available, falls back to PowerShell
//!
//! This lets hooks and provisioning commands use the same bash syntax on
//! every platform, as long as Git for Windows is installed.

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

static SHELL_CONFIG: OnceLock<ShellConfig> = OnceLock::new();

/// Shell configuration for command execution.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub is_posix: bool,
    pub name: String,
}

impl ShellConfig {
    /// Get the shell configuration for the current platform.
    pub fn get() -> &'static ShellConfig {
        SHELL_CONFIG.get_or_init(detect_shell)
    }

    /// Create a `Command` configured to interpret `shell_command`.
    pub fn command(&self, shell_command: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        for arg in &self.args {
            cmd.arg(arg);
        }
        cmd.arg(shell_command);
        cmd
    }

    pub fn is_posix(&self) -> bool {
        self.is_posix
    }
}

fn detect_shell() -> ShellConfig {
    #[cfg(unix)]
    {
        ShellConfig {
            executable: PathBuf::from("sh"),
            args: vec!["-c".to_string()],
            is_posix: true,
            name: "sh".to_string(),
        }
    }

    #[cfg(windows)]
    {
        detect_windows_shell()
    }
}

#[cfg(windows)]
fn detect_windows_shell() -> ShellConfig {
    if let Some(bash_path) = find_git_bash() {
        return ShellConfig {
            executable: bash_path,
            args: vec!["-c".to_string()],
            is_posix: true,
            name: "Git Bash".to_string(),
        };
    }

    ShellConfig {
        executable: PathBuf::from("powershell.exe"),
        args: vec!["-NoProfile".to_string(), "-Command".to_string()],
        is_posix: false,
        name: "PowerShell".to_string(),
    }
}

/// Find Git Bash on Windows without picking up the WSL `bash.exe` shim.
#[cfg(windows)]
fn find_git_bash() -> Option<PathBuf> {
    if let Ok(git_path) = which::which("git")
        && let Some(git_dir) = git_path.parent().and_then(|p| p.parent())
    {
        let bash_path = git_dir.join("bin").join("bash.exe");
        if bash_path.exists() {
            return Some(bash_path);
        }
        let bash_path = git_dir.join("usr").join("bin").join("bash.exe");
        if bash_path.exists() {
            return Some(bash_path);
        }
    }

    let bash_paths = [
        r"C:\Program Files\Git\bin\bash.exe",
        r"C:\Program Files\Git\usr\bin\bash.exe",
        r"C:\Program Files (x86)\Git\bin\bash.exe",
        r"C:\msys64\usr\bin\bash.exe",
    ];
    bash_paths
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Execute a command with timing and debug logging.
///
/// This is the **only** sanctioned way to run external commands in silo —
/// every git-identity query, `which` lookup, and CLI-backend invocation
/// funnels through here so a single `RUST_LOG=debug` run shows every
/// subprocess silo spawned, in order, with timing.
///
/// ```text
/// $ git config user.name [identity]
/// [silo-trace] context=identity cmd="git config user.name" dur=4.2ms ok=true
/// ```
pub fn run(cmd: &mut Command, context: Option<&str>) -> std::io::Result<std::process::Output> {
    use std::time::Instant;

    let program = cmd.get_program().to_string_lossy();
    let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy()).collect();
    let cmd_str = if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    };

    match context {
        Some(ctx) => log::debug!("$ {cmd_str} [{ctx}]"),
        None => log::debug!("$ {cmd_str}"),
    }

    let t0 = Instant::now();
    let result = cmd.output();
    let dur_ms = t0.elapsed().as_secs_f64() * 1000.0;

    match (&result, context) {
        (Ok(out), Some(ctx)) => log::debug!(
            "[silo-trace] context={ctx} cmd=\"{cmd_str}\" dur={dur_ms:.1}ms ok={}",
            out.status.success()
        ),
        (Ok(out), None) => log::debug!(
            "[silo-trace] cmd=\"{cmd_str}\" dur={dur_ms:.1}ms ok={}",
            out.status.success()
        ),
        (Err(e), Some(ctx)) => {
            log::debug!("[silo-trace] context={ctx} cmd=\"{cmd_str}\" dur={dur_ms:.1}ms err=\"{e}\"")
        }
        (Err(e), None) => log::debug!("[silo-trace] cmd=\"{cmd_str}\" dur={dur_ms:.1}ms err=\"{e}\""),
    }

    result
}
