//! Environment Planner (§4.3): resolve every env spec into an explicit
//! `NAME=value` pair or "unresolved", and inject git identity.

use indexmap::IndexMap;

use crate::config::Configuration;
use crate::git::GitIdentity;

/// How one env spec resolved, kept for logging (§4.3: "for logging only —
/// never a failure").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvResolution {
    /// `NAME=value` spec, emitted verbatim.
    Explicit { key: String },
    /// Bare `NAME` spec, host variable was set.
    Passthrough { key: String, value: String },
    /// Bare `NAME` spec, host variable was not set. Dropped from the
    /// emitted env, recorded here only so callers can log it.
    Unresolved { key: String },
}

impl EnvResolution {
    pub fn key(&self) -> &str {
        match self {
            EnvResolution::Explicit { key }
            | EnvResolution::Passthrough { key, .. }
            | EnvResolution::Unresolved { key } => key,
        }
    }
}

/// Parse one env spec per §3: `NAME=VALUE` is explicit, bare `NAME` is a
/// passthrough reference to a host variable.
fn parse_spec(spec: &str) -> (String, Option<String>) {
    match spec.split_once('=') {
        Some((name, value)) => (name.to_string(), Some(value.to_string())),
        None => (spec.to_string(), None),
    }
}

/// The outcome of planning environment for one run: the final `NAME=VALUE`
/// list (in emission order) plus a resolution record per spec, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPlan {
    pub env: Vec<String>,
    pub resolutions: Vec<EnvResolution>,
}

/// Resolve env for one run.
///
/// `host_lookup` abstracts `std::env::var` so tests can fix the host
/// environment instead of depending on the test process's actual one.
/// `repo_env_specs` are the env specs from every matching repo overlay,
/// already ordered by the caller (ascending pattern length, per §4.2/§4.3
/// — the orchestrator derives this from [`Configuration::matching_repos`]
/// once it has normalized remote URLs in hand).
///
/// Specs are processed global, then tool, then repo (§4.3); within each
/// scope they're processed in list order. A later spec for the same key
/// overwrites the earlier value *and* moves to the end of the emitted
/// list (§8 "Env precedence": "the last-written spec ... wins ... in
/// list-order semantics"). Git identity is seeded first so user env may
/// override it, per §4.3.
pub fn plan_env(
    config: &Configuration,
    tool_name: &str,
    repo_env_specs: &[String],
    identity: &GitIdentity,
    host_lookup: &dyn Fn(&str) -> Option<String>,
) -> EnvPlan {
    let mut map: IndexMap<String, String> = IndexMap::new();
    let mut resolutions = Vec::new();

    for (key, value) in identity.env_pairs() {
        upsert(&mut map, key, value);
    }

    let empty = Vec::new();
    let tool_specs = config.tools.get(tool_name).map(|t| &t.env).unwrap_or(&empty);

    for spec in config.env.iter().chain(tool_specs.iter()).chain(repo_env_specs.iter()) {
        resolve_one(spec, &mut map, &mut resolutions, host_lookup);
    }

    EnvPlan { env: map.into_iter().map(|(k, v)| format!("{k}={v}")).collect(), resolutions }
}

fn resolve_one(
    spec: &str,
    map: &mut IndexMap<String, String>,
    resolutions: &mut Vec<EnvResolution>,
    host_lookup: &dyn Fn(&str) -> Option<String>,
) {
    let (key, explicit_value) = parse_spec(spec);
    match explicit_value {
        Some(value) => {
            upsert(map, key.clone(), value);
            resolutions.push(EnvResolution::Explicit { key });
        }
        None => match host_lookup(&key) {
            Some(value) => {
                upsert(map, key.clone(), value.clone());
                resolutions.push(EnvResolution::Passthrough { key, value });
            }
            None => resolutions.push(EnvResolution::Unresolved { key }),
        },
    }
}

/// Insert-or-move-to-end: re-inserting an existing key must push it to
/// the back of the map so the emitted list reflects "last write wins"
/// positionally, not just in value.
fn upsert(map: &mut IndexMap<String, String>, key: String, value: String) {
    map.shift_remove(&key);
    map.insert(key, value);
}
