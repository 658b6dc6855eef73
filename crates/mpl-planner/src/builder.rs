// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prompt-to-UIR construction.
//!
//! The submit endpoint accepts either a full UIR document or a
//! `{prompt, options?}` shorthand.  This module turns the shorthand into a
//! UIR value; semantic correctness is still the validator's job.

use chrono::Utc;
use serde_json::{Map, Value, json};

/// Default targets when the submission names none.
const DEFAULT_TARGETS: [&str; 5] = ["scene", "motion", "music", "preview", "export"];

/// Export presets understood by the shorthand form.
static EXPORT_PRESETS: [(&str, [u32; 2]); 3] = [
    ("mp4_720p", [1280, 720]),
    ("mp4_1080p", [1920, 1080]),
    ("mp4_4k", [3840, 2160]),
];

/// Failure to construct a UIR from a submission payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The payload carried neither a UIR nor a usable prompt.
    #[error("prompt is required")]
    MissingPrompt,
    /// The payload was not a JSON object.
    #[error("submission body must be a JSON object")]
    NotAnObject,
}

/// Build a UIR value from a submission payload.
///
/// A payload that already looks like a UIR (`uir_version` + `job` + `input`)
/// or embeds one under `"uir"` passes through untouched.  Otherwise a UIR is
/// assembled from `{prompt, options?}`.
///
/// # Errors
///
/// Returns [`BuildError`] when no prompt can be extracted.
pub fn build_uir_value(payload: &Value) -> Result<Value, BuildError> {
    let obj = payload.as_object().ok_or(BuildError::NotAnObject)?;
    if looks_like_uir(obj) {
        return Ok(payload.clone());
    }
    if let Some(embedded) = obj.get("uir").filter(|v| v.is_object()) {
        return Ok(embedded.clone());
    }

    let prompt = extract_prompt(obj).ok_or(BuildError::MissingPrompt)?;
    let options = obj
        .get("options")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut targets = coerce_targets(options.get("targets").or_else(|| obj.get("targets")));
    if targets.is_empty() {
        targets = DEFAULT_TARGETS.iter().map(|s| (*s).to_string()).collect();
    }

    let duration_s = options
        .get("duration_s")
        .or_else(|| options.get("duration"))
        .and_then(Value::as_f64)
        .unwrap_or(12.0);

    let mut input = Map::new();
    input.insert("raw_prompt".into(), Value::String(prompt));
    if let Some(lang) = str_option(&options, "lang") {
        input.insert("lang".into(), Value::String(lang));
    }

    let mut intent = Map::new();
    intent.insert("targets".into(), json!(targets));
    intent.insert("duration_s".into(), json!(duration_s));
    if let Some(style) = str_option(&options, "style") {
        intent.insert("style".into(), Value::String(style));
    }
    if let Some(mood) = str_option(&options, "mood") {
        intent.insert("mood".into(), Value::String(mood));
    }

    let mut uir = Map::new();
    uir.insert("uir_version".into(), json!("1.0"));
    uir.insert(
        "job".into(),
        json!({"created_at": Utc::now().to_rfc3339()}),
    );
    uir.insert("input".into(), Value::Object(input));
    uir.insert("intent".into(), Value::Object(intent));
    uir.insert("modules".into(), build_modules(&targets, &options));
    if let Some(routing) = build_routing(&options) {
        uir.insert("routing".into(), routing);
    }
    if let Some(constraints) = build_constraints(&options) {
        uir.insert("constraints".into(), constraints);
    }
    uir.insert("hooks".into(), build_hooks(obj, &options));

    Ok(Value::Object(uir))
}

fn looks_like_uir(obj: &Map<String, Value>) -> bool {
    obj.contains_key("uir_version") && obj.contains_key("job") && obj.contains_key("input")
}

fn extract_prompt(obj: &Map<String, Value>) -> Option<String> {
    let direct = obj
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(p) = direct {
        return Some(p.to_string());
    }
    obj.get("input")
        .and_then(|input| input.get("raw_prompt"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accept a list of names or a comma-separated string; trim and dedupe,
/// preserving first-seen order.
fn coerce_targets(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let mut seen = std::collections::BTreeSet::new();
    raw.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

fn build_modules(targets: &[String], options: &Map<String, Value>) -> Value {
    let enabled = |name: &str| targets.iter().any(|t| t == name);

    let mut scene = Map::new();
    scene.insert("enabled".into(), json!(enabled("scene")));
    if let Some(prompt) = str_option(options, "scene_prompt") {
        scene.insert("prompt".into(), Value::String(prompt));
    }
    if let Some(resolution) = panorama_resolution(options.get("resolution")) {
        scene.insert("resolution".into(), json!(resolution));
    }
    if let Some(seed) = options.get("seed").and_then(Value::as_u64) {
        scene.insert("seed".into(), json!(seed));
    }

    let mut motion = Map::new();
    motion.insert("enabled".into(), json!(enabled("motion")));
    if let Some(prompt) = str_option(options, "motion_prompt") {
        motion.insert("prompt".into(), Value::String(prompt));
    }
    if let Some(fps) = options.get("fps").and_then(Value::as_u64) {
        motion.insert("fps".into(), json!(fps));
    }

    let mut music = Map::new();
    music.insert("enabled".into(), json!(enabled("music")));
    if let Some(prompt) = str_option(options, "music_prompt") {
        music.insert("prompt".into(), Value::String(prompt));
    }

    let mut character = Map::new();
    character.insert("enabled".into(), json!(enabled("character")));
    if let Some(id) = str_option(options, "character_id") {
        character.insert("character_id".into(), Value::String(id));
    }

    let preview = json!({"enabled": enabled("preview")});

    let mut export = Map::new();
    export.insert("enabled".into(), json!(enabled("export")));
    if let Some(format) = str_option(options, "export_format") {
        export.insert("format".into(), Value::String(format));
    }
    if let Some(preset) = str_option(options, "export_preset") {
        if let Some((_, resolution)) = EXPORT_PRESETS.iter().find(|(name, _)| *name == preset) {
            export.insert("resolution".into(), json!(resolution));
        }
    }

    json!({
        "scene": scene,
        "motion": motion,
        "music": music,
        "character": character,
        "preview": preview,
        "export": export,
    })
}

/// Normalize a requested panorama size to `[2h, h]`.
fn panorama_resolution(value: Option<&Value>) -> Option<[u32; 2]> {
    let items = value?.as_array()?;
    if items.len() != 2 {
        return None;
    }
    let h = u32::try_from(items[1].as_u64()?).ok()?;
    Some([h * 2, h])
}

fn build_routing(options: &Map<String, Value>) -> Option<Value> {
    let routing = options.get("routing")?.as_object()?;
    let mut out = Map::new();
    for (modality, entry) in routing {
        match entry {
            Value::String(provider) => {
                out.insert(modality.clone(), json!({"provider": provider}));
            }
            Value::Object(map) if map.contains_key("provider") => {
                out.insert(modality.clone(), entry.clone());
            }
            _ => {}
        }
    }
    if out.is_empty() { None } else { Some(Value::Object(out)) }
}

fn build_constraints(options: &Map<String, Value>) -> Option<Value> {
    let mut out = Map::new();
    if let Some(max_runtime_s) = options.get("max_runtime_s").and_then(Value::as_f64) {
        out.insert("max_runtime_s".into(), json!(max_runtime_s));
    }
    if let Some(quality) = str_option(options, "quality") {
        out.insert("quality".into(), Value::String(quality));
    }
    if out.is_empty() { None } else { Some(Value::Object(out)) }
}

fn build_hooks(payload: &Map<String, Value>, options: &Map<String, Value>) -> Value {
    let mut hooks = Map::new();
    for source in [payload.get("hooks"), options.get("hooks")] {
        if let Some(Value::Object(map)) = source {
            for (k, v) in map {
                hooks.insert(k.clone(), v.clone());
            }
        }
    }
    if !hooks.contains_key("event_stream") {
        let event_stream = options
            .get("event_stream")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        hooks.insert("event_stream".into(), Value::Bool(event_stream));
    }
    Value::Object(hooks)
}

fn str_option(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpl_core::parse_uir;

    #[test]
    fn full_uir_passes_through() {
        let payload = json!({
            "uir_version": "1.0",
            "job": {"created_at": "2025-01-01T00:00:00Z"},
            "input": {"raw_prompt": "x"},
        });
        assert_eq!(build_uir_value(&payload).unwrap(), payload);
    }

    #[test]
    fn embedded_uir_is_unwrapped() {
        let inner = json!({"uir_version": "1.0", "input": {"raw_prompt": "x"}});
        let payload = json!({"uir": inner});
        assert_eq!(build_uir_value(&payload).unwrap(), inner);
    }

    #[test]
    fn missing_prompt_rejected() {
        assert_eq!(
            build_uir_value(&json!({"options": {}})),
            Err(BuildError::MissingPrompt)
        );
        assert_eq!(
            build_uir_value(&json!({"prompt": "   "})),
            Err(BuildError::MissingPrompt)
        );
    }

    #[test]
    fn non_object_rejected() {
        assert_eq!(build_uir_value(&json!("dance")), Err(BuildError::NotAnObject));
    }

    #[test]
    fn built_uir_validates() {
        let payload = json!({
            "prompt": "dance",
            "options": {"targets": ["motion", "preview"], "duration_s": 8},
        });
        let value = build_uir_value(&payload).unwrap();
        let uir = parse_uir(&value).unwrap();
        assert_eq!(uir.input.raw_prompt, "dance");
        assert_eq!(uir.intent.duration_s, 8.0);
        assert_eq!(uir.intent.targets, vec!["motion", "preview"]);
        assert!(uir.modules.motion.as_ref().unwrap().enabled);
        assert!(!uir.modules.scene.as_ref().unwrap().enabled);
    }

    #[test]
    fn default_targets_when_unspecified() {
        let value = build_uir_value(&json!({"prompt": "a beach"})).unwrap();
        assert_eq!(
            value["intent"]["targets"],
            json!(["scene", "motion", "music", "preview", "export"])
        );
        // Modules mirror target membership.
        assert_eq!(value["modules"]["character"]["enabled"], json!(false));
        assert_eq!(value["modules"]["export"]["enabled"], json!(true));
    }

    #[test]
    fn comma_separated_targets_parse() {
        let payload = json!({"prompt": "x", "options": {"targets": "motion, music, motion"}});
        let value = build_uir_value(&payload).unwrap();
        assert_eq!(value["intent"]["targets"], json!(["motion", "music"]));
    }

    #[test]
    fn routing_accepts_string_or_object() {
        let payload = json!({
            "prompt": "x",
            "options": {"routing": {
                "motion": "animationgpt_local",
                "music": {"provider": "musicgpt_cli"},
                "scene": 7,
            }},
        });
        let value = build_uir_value(&payload).unwrap();
        assert_eq!(value["routing"]["motion"]["provider"], "animationgpt_local");
        assert_eq!(value["routing"]["music"]["provider"], "musicgpt_cli");
        assert!(value["routing"].get("scene").is_none());
    }

    #[test]
    fn export_preset_maps_to_resolution() {
        let payload = json!({
            "prompt": "x",
            "options": {"targets": ["motion", "export"], "export_preset": "mp4_720p"},
        });
        let value = build_uir_value(&payload).unwrap();
        assert_eq!(value["modules"]["export"]["resolution"], json!([1280, 720]));
    }

    #[test]
    fn panorama_resolution_normalized() {
        let payload = json!({
            "prompt": "x",
            "options": {"targets": ["scene"], "resolution": [9999, 1024]},
        });
        let value = build_uir_value(&payload).unwrap();
        // Width is derived from height; the requested width is advisory.
        assert_eq!(value["modules"]["scene"]["resolution"], json!([2048, 1024]));
    }

    #[test]
    fn event_stream_defaults_true() {
        let value = build_uir_value(&json!({"prompt": "x"})).unwrap();
        assert_eq!(value["hooks"]["event_stream"], json!(true));

        let value = build_uir_value(
            &json!({"prompt": "x", "options": {"event_stream": false}}),
        )
        .unwrap();
        assert_eq!(value["hooks"]["event_stream"], json!(false));
    }

    #[test]
    fn job_created_at_is_set() {
        let value = build_uir_value(&json!({"prompt": "x"})).unwrap();
        assert!(value["job"]["created_at"].as_str().is_some());
    }
}
