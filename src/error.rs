//! Error kinds for the run orchestrator.
//!
//! Each variant maps to a row of the error-handling table: backends fail
//! fast from their constructor, and build failures abort before the tool
//! ever starts. A pre-run hook failure has no variant of its own — the
//! composed script short-circuits with `&&` before `exec`, so the
//! container's raw exit code already *is* the hook's exit code, and it
//! reaches the caller via the ordinary `Ok(exit_code)` path rather than
//! wrapped in a `SiloError`. Terminal-restore problems are logged but
//! never allowed to override the tool's own exit status.

use std::fmt;

#[derive(Debug)]
pub enum SiloError {
    /// A backend's prerequisites are unavailable (daemon unreachable, CLI
    /// binary missing). Raised from the backend constructor, before any
    /// container is touched.
    BackendUnavailable(String),
    /// Image build failed: a provisioning command exited non-zero, or a
    /// daemon build stream emitted an error frame.
    BuildFailed(String),
    /// The run plan could not be constructed (e.g. `HOME` unset).
    PlanConstruction(String),
    /// The running container was force-removed after a cancellation
    /// escalation (two Ctrl-Cs within one second).
    ContainerLeak(String),
    /// Raw-mode or terminal state could not be fully restored on exit.
    /// Logged, never propagated as the primary error — the tool's own
    /// exit status always wins over this one.
    TerminalRestore(String),
}

impl fmt::Display for SiloError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiloError::BackendUnavailable(msg) => write!(f, "backend unavailable: {msg}"),
            SiloError::BuildFailed(msg) => write!(f, "build failed: {msg}"),
            SiloError::PlanConstruction(msg) => write!(f, "could not construct run plan: {msg}"),
            SiloError::ContainerLeak(name) => {
                write!(f, "container {name} was force-removed after cancellation")
            }
            SiloError::TerminalRestore(msg) => write!(f, "failed to restore terminal state: {msg}"),
        }
    }
}

impl std::error::Error for SiloError {}

impl SiloError {
    /// The process exit code this error should produce, used by `main()`.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
