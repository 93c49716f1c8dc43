//! Prompt templates (spec §4.1, C2). `get_prompt` consults an on-disk
//! directory by name first, falling back to the built-in catalog below.
//! `format_prompt` substitutes `{dotted.path}` placeholders against a
//! `serde_json::Value`, rendering objects/arrays (or any key containing
//! `json`) as pretty-printed JSON. Missing paths are left as the literal
//! placeholder and logged as warnings. Templates are cached after first
//! load, grounded in the teacher's `OnceLock`-guarded singletons.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use serde_json::Value;

fn builtin_catalog() -> &'static HashMap<&'static str, &'static str> {
    static CATALOG: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "dialogue.system",
            "You are the Agent Bus clarification assistant. Your job is to turn a vague task \
             request into a precise specification by asking short, focused questions. The \
             requester's initial request is:\n{initial.description}\n\nAsk one question at a \
             time. When you have enough information, call `determine_next_question_or_finalize` \
             with `is_ready_to_finalize=true`.",
        );
        m.insert(
            "dialogue.user_seed",
            "Requester {requester.requesterId} wants: {initial.description}",
        );
        m.insert(
            "dialogue.fallback.gathering_competitors",
            "Thanks — could you tell me which competitor products or services this should be \
             compared against, if any?",
        );
        m.insert(
            "dialogue.fallback.gathering_timeframe",
            "Got it. What is the timeframe or deadline for this task?",
        );
        m.insert(
            "dialogue.fallback.gathering_platforms",
            "Understood. Which platforms or environments does this need to run on?",
        );
        m.insert(
            "dialogue.fallback.finalizing",
            "Thanks, I have what I need. Here is a summary of what I captured:\n{params.json}\n\
             I'll now match this against available processors.",
        );
        m.insert(
            "dialogue.apology",
            "Sorry, I ran into a problem processing that and can't continue this clarification \
             right now. Please try again shortly.",
        );
        m.insert(
            "dialogue.progress_after_invalid_tool_output",
            "Let me make sure I understood that correctly — could you rephrase or add a bit \
             more detail?",
        );
        m.insert(
            "matching.rerank",
            "Re-rank the following candidate processors for this task and return a JSON array \
             of objects `{{id, justification}}` in your preferred order.\n\nTask description: \
             {spec.description}\nInputs: {spec.inputs.json}\nOutputs: {spec.outputs.json}\n\
             Constraints: {spec.constraints.json}\n\nCandidates:\n{candidates.json}",
        );
        m.insert(
            "workflow.synthesize",
            "Design a workflow plan as a JSON object matching the required schema that \
             decomposes this task into steps, each assigned to one of the healthy processors \
             listed below.\n\nTask description: {spec.description}\nInputs: {spec.inputs.json}\n\
             Outputs: {spec.outputs.json}\nConstraints: {spec.constraints.json}\n\nHealthy \
             processors:\n{processors.json}",
        );
        m
    })
}

fn loaded_cache() -> &'static RwLock<HashMap<String, String>> {
    static CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Directory consulted before the built-in catalog (`AGENTBUS_PROMPT_DIR`,
/// unset by default — spec §4.1 supplement, SPEC_FULL §4.1).
pub fn prompt_dir() -> Option<PathBuf> {
    std::env::var("AGENTBUS_PROMPT_DIR").ok().map(PathBuf::from)
}

/// Returns the named template, on-disk directory first, built-in catalog
/// second. Panics only if the name exists in neither — callers should
/// treat an absent template as a programming error (every call site names
/// a template this module also defines).
pub fn get_prompt(name: &str) -> String {
    if let Some(cached) = loaded_cache().read().unwrap().get(name) {
        return cached.clone();
    }

    let resolved = load_from_disk(name)
        .or_else(|| builtin_catalog().get(name).map(|s| s.to_string()))
        .unwrap_or_else(|| {
            tracing::warn!(template = name, "prompt template not found in any catalog");
            String::new()
        });

    loaded_cache()
        .write()
        .unwrap()
        .insert(name.to_string(), resolved.clone());
    resolved
}

fn load_from_disk(name: &str) -> Option<String> {
    let dir = prompt_dir()?;
    let path: PathBuf = Path::new(&dir).join(format!("{name}.txt"));
    std::fs::read_to_string(path).ok()
}

/// Substitutes every `{dotted.path}` placeholder in `template` against
/// `data`. A path resolving to an object/array, or whose final segment
/// contains the substring `json`, is rendered as pretty-printed JSON;
/// anything else is rendered via its natural string form. Unresolved
/// placeholders are left verbatim and logged as warnings (spec §4.1).
pub fn format_prompt(name: &str, data: &Value) -> String {
    let template = get_prompt(name);
    render(&template, data)
}

fn render(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(end_rel) = rest[start..].find('}') else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let path = &rest[start + 1..start + end_rel];
        out.push_str(&resolve_placeholder(path, data));
        rest = &rest[start + end_rel + 1..];
    }
    out.push_str(rest);
    out
}

fn resolve_placeholder(path: &str, data: &Value) -> String {
    let wants_json = path.to_lowercase().contains("json");
    match lookup_path(data, path) {
        Some(value) => {
            if wants_json || value.is_object() || value.is_array() {
                serde_json::to_string_pretty(value).unwrap_or_default()
            } else {
                scalar_to_string(value)
            }
        }
        None => {
            tracing::warn!(path, "prompt placeholder did not resolve; leaving literal");
            format!("{{{path}}}")
        }
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_scalar_placeholder() {
        let data = json!({ "initial": { "description": "build a landing page" } });
        let rendered = render("Request: {initial.description}", &data);
        assert_eq!(rendered, "Request: build a landing page");
    }

    #[test]
    fn renders_object_as_pretty_json() {
        let data = json!({ "spec": { "inputs": { "a": "string" } } });
        let rendered = render("{spec.inputs}", &data);
        assert!(rendered.contains("\"a\""));
        assert!(rendered.contains('\n'));
    }

    #[test]
    fn renders_json_suffixed_key_even_for_scalar() {
        let data = json!({ "params": { "json": "not-an-object" } });
        let rendered = render("{params.json}", &data);
        assert_eq!(rendered, "\"not-an-object\"");
    }

    #[test]
    fn leaves_missing_placeholder_literal() {
        let data = json!({});
        let rendered = render("Hello {missing.path}!", &data);
        assert_eq!(rendered, "Hello {missing.path}!");
    }

    #[test]
    fn builtin_catalog_resolves_known_templates() {
        let prompt = get_prompt("dialogue.apology");
        assert!(!prompt.is_empty());
    }

    #[test]
    fn on_disk_template_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("custom.name.txt"), "disk content {x}").unwrap();
        std::env::set_var("AGENTBUS_PROMPT_DIR", dir.path());
        let rendered = format_prompt("custom.name", &json!({ "x": "y" }));
        assert_eq!(rendered, "disk content y");
        std::env::remove_var("AGENTBUS_PROMPT_DIR");
    }
}
