//! Terminal session plumbing shared by both backends (§4.5, §9 "Terminal
//! restoration"): raw mode, SIGWINCH-driven resize, and the two-Ctrl-C
//! cancellation escalation.
//!
//! Both backends need the same raw-terminal handling, so it lives here
//! rather than being duplicated — the daemon backend drives it over an
//! attach stream, the CLI backend over a PTY, but the stdin reader and
//! raw-mode guard are identical either way.

use std::io::Read;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

/// Acquires raw mode on construction, restores cooked mode on drop —
/// every exit path (normal return, error, panic unwind) runs the `Drop`
/// impl, satisfying the "terminal restoration" invariant (§8) without
/// every call site having to remember to undo it.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn acquire() -> std::io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(RawModeGuard { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Terminal restore is best-effort: logged, but never allowed to
        // override the tool's own exit status (§7 "Terminal restore").
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            let err = crate::error::SiloError::TerminalRestore(e.to_string());
            log::warn!("{err}");
        }
        // Undo mouse-tracking, alt-screen, and cursor-hide escapes a tool
        // may have left set (§9 "Terminal restoration").
        print!("\u{1b}[?1000l\u{1b}[?1049l\u{1b}[?25h");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
}

/// One event from the raw-stdin reader thread.
pub enum InputEvent {
    /// Raw bytes to forward to the container's stdin.
    Bytes(Vec<u8>),
    /// Two `Ctrl-C` (`0x03`) bytes arrived within one second — the
    /// cancellation escalation (§5, §8 scenario 5).
    CtrlCEscalation,
}

/// Spawn a blocking OS thread that reads raw stdin byte-by-byte and
/// forwards it over the returned channel, detecting the two-Ctrl-C
/// escalation locally (§9: "a local finite state machine in the stdin
/// reader", not a global signal handler, because only the reader knows
/// how to interpret the byte `0x03` in the context of a raw-mode
/// terminal that no longer generates `SIGINT` itself).
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<InputEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut last_ctrl_c: Option<Instant> = None;
        let mut buf = [0u8; 4096];

        loop {
            let Ok(n) = stdin.read(&mut buf) else { break };
            if n == 0 {
                break;
            }
            let chunk = buf[..n].to_vec();

            if chunk.contains(&0x03) {
                let now = Instant::now();
                let escalated = last_ctrl_c.is_some_and(|t| now.duration_since(t) < Duration::from_secs(1));
                if escalated {
                    let _ = tx.send(InputEvent::CtrlCEscalation);
                    break;
                }
                last_ctrl_c = Some(now);
            }

            if tx.send(InputEvent::Bytes(chunk)).is_err() {
                break;
            }
        }
    });

    rx
}

/// Current terminal size as `(cols, rows)`, falling back to 80x24 when it
/// can't be determined (e.g. stdout is not a TTY).
pub fn current_size() -> (u16, u16) {
    crossterm::terminal::size().unwrap_or((80, 24))
}

/// Watch for `SIGWINCH` (terminal resize) on Unix. On non-Unix platforms
/// the channel is simply never written to — resize plumbing degrades to
/// "no live resize" rather than failing to compile or run.
#[cfg(unix)]
pub fn watch_sigwinch() -> mpsc::UnboundedReceiver<()> {
    watch_signal(signal_hook::consts::SIGWINCH)
}

#[cfg(not(unix))]
pub fn watch_sigwinch() -> mpsc::UnboundedReceiver<()> {
    mpsc::unbounded_channel().1
}

/// Watch for `SIGTERM` so it can be propagated into the container (§4.5).
#[cfg(unix)]
pub fn watch_sigterm() -> mpsc::UnboundedReceiver<()> {
    watch_signal(signal_hook::consts::SIGTERM)
}

#[cfg(not(unix))]
pub fn watch_sigterm() -> mpsc::UnboundedReceiver<()> {
    mpsc::unbounded_channel().1
}

#[cfg(unix)]
fn watch_signal(signal: i32) -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let Ok(mut signals) = signal_hook::iterator::Signals::new([signal]) else { return };
        for _ in signals.forever() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_size_returns_nonzero_fallback() {
        let (cols, rows) = current_size();
        assert!(cols > 0 && rows > 0);
    }
}
