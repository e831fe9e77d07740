//! Terminal-output styling utilities. Trimmed to what the single-line
//! progress reporter needs (§4.7) — the ANSI-safe truncation helper.

mod line;

pub use line::truncate_visible;
