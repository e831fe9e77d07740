//! Git remote URL normalization for repo-pattern matching (§4.2 rule 2).
//!
//! Repo patterns are matched by substring against a remote URL after
//! stripping a trailing `.git` and normalizing the SSH shorthand form
//! (`git@host:org/repo`) to the same `host/org/repo` shape HTTPS URLs
//! already have, so one pattern matches a repo regardless of which
//! protocol a given clone used.

/// Normalize a git remote URL to a bare `host/org/.../repo` string.
///
/// - `git@github.com:acme/thing.git` → `github.com/acme/thing`
/// - `https://github.com/acme/thing.git` → `github.com/acme/thing`
/// - `ssh://git@github.com/acme/thing` → `github.com/acme/thing`
/// - anything else is returned with only the trailing `.git` stripped.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();

    let without_scheme = if let Some(rest) = url.strip_prefix("ssh://") {
        rest.split_once('@').map(|(_, host_and_path)| host_and_path).unwrap_or(rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        rest
    } else if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else if let Some(rest) = url.strip_prefix("git@") {
        // git@host:org/repo -> host/org/repo
        match rest.split_once(':') {
            Some((host, path)) => return strip_dot_git(&format!("{host}/{path}")),
            None => rest,
        }
    } else {
        url
    };

    strip_dot_git(without_scheme)
}

fn strip_dot_git(s: &str) -> String {
    s.strip_suffix(".git").unwrap_or(s).to_string()
}
