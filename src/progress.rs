//! Progress Reporter (§4.7): a single re-rendered terminal line showing
//! `[████░░░░░░] Section: detail-tail`.

use std::io::{IsTerminal, Write};

use ansi_str::AnsiStr;

use crate::styling::truncate_visible;

const BAR_WIDTH: usize = 10;
const FILLED: char = '█';
const EMPTY: char = '░';

/// A fixed sequence of named sections the orchestrator walks through.
/// Position within this list drives the bar fill (§4.7).
const SECTIONS: &[&str] = &[
    "Resolving backend",
    "Assembling image spec",
    "Building image",
    "Planning mounts, env, and hooks",
    "Starting container",
];

/// Single-line, TTY-aware progress display. Suppressed entirely when
/// stderr is not a terminal (§4.7) or when the orchestrator is running
/// verbose (verbose mode logs section transitions as plain lines
/// instead, via `log::info!`, per §4.6).
pub struct ProgressReporter {
    enabled: bool,
    current_section: Option<&'static str>,
    rendered_once: bool,
}

impl ProgressReporter {
    pub fn new(verbose: bool) -> Self {
        let enabled = !verbose && std::io::stderr().is_terminal();
        ProgressReporter { enabled, current_section: None, rendered_once: false }
    }

    /// Transition to a new named section, re-rendering the line.
    pub fn section(&mut self, name: &'static str) {
        self.current_section = Some(name);
        self.render("");
    }

    /// Update the detail tail of the current line. ANSI escapes embedded
    /// in forwarded build output are stripped; only the last non-empty
    /// line of `detail` is kept (§4.7).
    pub fn detail(&mut self, detail: &str) {
        let last_non_empty = detail.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        let stripped = last_non_empty.ansi_strip().into_owned();
        self.render(&stripped);
    }

    fn render(&mut self, detail_tail: &str) {
        if !self.enabled {
            return;
        }

        let section = self.current_section.unwrap_or("");
        let fraction = SECTIONS.iter().position(|s| *s == section).map(|i| (i + 1) as f64 / SECTIONS.len() as f64).unwrap_or(0.0);
        let filled = ((fraction * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
        let bar: String = std::iter::repeat_n(FILLED, filled).chain(std::iter::repeat_n(EMPTY, BAR_WIDTH - filled)).collect();

        let line = if detail_tail.is_empty() {
            format!("[{bar}] {section}")
        } else {
            format!("[{bar}] {section}: {detail_tail}")
        };

        let (cols, _) = crate::terminal::current_size();
        let line = truncate_visible(&line, cols as usize, "…");

        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "\r\x1b[2K{line}");
        let _ = stderr.flush();
        self.rendered_once = true;
    }

    /// Clear the line on completion (§4.7).
    pub fn finish(&mut self) {
        if !self.enabled || !self.rendered_once {
            return;
        }
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "\r\x1b[2K");
        let _ = stderr.flush();
        self.rendered_once = false;
    }
}
