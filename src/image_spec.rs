//! Image Spec Assembler: turns a tool's template plus the merged hook
//! lists into a buildable Dockerfile and a content-addressed tag.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::tool::Tool;

/// Build arguments passed to the container engine's build call. A
/// `BTreeMap` so the tag's `sorted(build_args)` component is deterministic.
pub type BuildArgs = BTreeMap<String, String>;

/// The outcome of assembling a tool's provisioning recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub dockerfile_text: String,
    pub target: String,
    pub build_args: BuildArgs,
    pub image_tag: String,
}

const GLOBAL_MARKER: &str = "# SILO_POST_BUILD_HOOKS_GLOBAL";

/// Assemble a tool's dockerfile text and compute its content-address tag.
///
/// `global_hooks` are injected at the shared base-stage marker;
/// `tool_and_repo_hooks` (tool-scope hooks followed by repo-scope hooks, in
/// that order — callers are responsible for that ordering) are injected at
/// the tool's own marker.
pub fn assemble(
    tool: &Tool,
    global_hooks: &[String],
    tool_and_repo_hooks: &[String],
    build_args: BuildArgs,
) -> BuildSpec {
    let tool_marker = format!("# {}", tool.hook_marker());

    let dockerfile_text = tool.template().to_string();
    let dockerfile_text = inject(&dockerfile_text, GLOBAL_MARKER, global_hooks);
    let dockerfile_text = inject(&dockerfile_text, &tool_marker, tool_and_repo_hooks);

    let image_tag = compute_tag(&dockerfile_text, tool.name, &build_args);

    BuildSpec {
        dockerfile_text,
        target: tool.name.to_string(),
        build_args,
        image_tag,
    }
}

/// Replace a marker line with itself followed by one `RUN` provisioning
/// command per hook, preserving the marker so re-injection with the same
/// (empty or non-empty) hook list is idempotent.
fn inject(template: &str, marker: &str, hooks: &[String]) -> String {
    if !template.contains(marker) {
        // Malformed templates surface downstream during build, not here.
        return template.to_string();
    }

    if hooks.is_empty() {
        return template.to_string();
    }

    let provisioning: String = hooks
        .iter()
        .map(|hook| format!("RUN {hook}"))
        .collect::<Vec<_>>()
        .join("\n");

    template.replacen(marker, &format!("{marker}\n{provisioning}"), 1)
}

fn compute_tag(dockerfile_text: &str, target: &str, build_args: &BuildArgs) -> String {
    let sorted_args: String = build_args
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");

    let mut hasher = Sha256::new();
    hasher.update(dockerfile_text.as_bytes());
    hasher.update([0u8]);
    hasher.update(target.as_bytes());
    hasher.update([0u8]);
    hasher.update(sorted_args.as_bytes());
    let digest = hasher.finalize();

    let hex16: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("silo-{target}-{hex16}")
}
