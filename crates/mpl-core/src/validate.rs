// SPDX-License-Identifier: MIT OR Apache-2.0
//! UIR structural and semantic validation.
//!
//! [`parse_uir`] turns an untyped JSON value into a validated [`Uir`] or an
//! ordered list of [`ValidationIssue`]s.  Structural rules (version, bounds,
//! required sections) are collected first; the semantic pass (an enabled
//! module must be listed in `intent.targets`) only runs once the structure is
//! sound, and accumulates across modules so a client sees every offending
//! module at once.

use crate::uir::{Modules, Uir};
use serde_json::Value;
use std::fmt;

/// The six module names, in pipeline order.
pub const KNOWN_MODULES: [&str; 6] = ["scene", "motion", "music", "character", "preview", "export"];

// ---------------------------------------------------------------------------
// Issue & error types
// ---------------------------------------------------------------------------

/// One validation finding, addressed by a path into the UIR document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    /// Path segments into the document (e.g. `["modules", "motion", "fps"]`).
    pub loc: Vec<String>,
    /// Human-readable message.
    pub msg: String,
    /// Machine-readable issue kind (e.g. `"value_error.missing_target"`).
    #[serde(rename = "type")]
    pub kind: String,
}

impl ValidationIssue {
    fn new(loc: &[&str], msg: impl Into<String>, kind: &str) -> Self {
        Self {
            loc: loc.iter().map(|s| (*s).to_string()).collect(),
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}

/// Validation failure carrying every issue found, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UirValidationError {
    /// Ordered findings.
    pub issues: Vec<ValidationIssue>,
}

impl UirValidationError {
    /// Wrap a serde deserialization failure as a single type-error issue.
    fn from_serde(err: &serde_json::Error) -> Self {
        Self {
            issues: vec![ValidationIssue {
                loc: Vec::new(),
                msg: err.to_string(),
                kind: "type_error".into(),
            }],
        }
    }
}

impl fmt::Display for UirValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return f.write_str("UIR validation failed");
        }
        f.write_str("UIR validation failed: ")?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            if issue.loc.is_empty() {
                write!(f, "{}", issue.msg)?;
            } else {
                write!(f, "{}: {}", issue.loc.join("."), issue.msg)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for UirValidationError {}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse and validate an untyped UIR document.
///
/// On success the returned [`Uir`] has post-parse defaults applied: when
/// `intent.duration_s` is set and an enabled motion/music module has no
/// `duration_s` of its own, the intent value is copied in.
///
/// # Errors
///
/// Returns [`UirValidationError`] with the ordered list of findings.
pub fn parse_uir(value: &Value) -> Result<Uir, UirValidationError> {
    let mut uir: Uir =
        serde_json::from_value(value.clone()).map_err(|e| UirValidationError::from_serde(&e))?;

    let issues = structural_issues(&uir);
    if !issues.is_empty() {
        return Err(UirValidationError { issues });
    }

    let issues = semantic_issues(&uir);
    if !issues.is_empty() {
        return Err(UirValidationError { issues });
    }

    apply_defaults(&mut uir);
    Ok(uir)
}

/// Validate without keeping the parsed model.
///
/// # Errors
///
/// Returns [`UirValidationError`] with the ordered list of findings.
pub fn validate_uir(value: &Value) -> Result<(), UirValidationError> {
    parse_uir(value).map(|_| ())
}

// ---------------------------------------------------------------------------
// Structural pass
// ---------------------------------------------------------------------------

fn structural_issues(uir: &Uir) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if uir.uir_version != crate::UIR_VERSION {
        issues.push(ValidationIssue::new(
            &["uir_version"],
            format!("must be {:?}", crate::UIR_VERSION),
            "value_error.const",
        ));
    }

    if uir.input.raw_prompt.trim().is_empty() {
        issues.push(ValidationIssue::new(
            &["input", "raw_prompt"],
            "must be a non-empty string",
            "value_error",
        ));
    }

    check_targets(uir, &mut issues);

    if uir.intent.duration_s < 1.0 {
        issues.push(ValidationIssue::new(
            &["intent", "duration_s"],
            "must be >= 1",
            "value_error.number.not_ge",
        ));
    }

    check_modules_present(&uir.modules, &mut issues);
    check_scene(uir, &mut issues);
    check_motion(uir, &mut issues);
    check_music(uir, &mut issues);
    check_export(uir, &mut issues);

    if let Some(constraints) = &uir.constraints {
        if let Some(max_runtime_s) = constraints.max_runtime_s {
            if max_runtime_s < 1.0 {
                issues.push(ValidationIssue::new(
                    &["constraints", "max_runtime_s"],
                    "must be >= 1",
                    "value_error.number.not_ge",
                ));
            }
        }
    }

    issues
}

fn check_targets(uir: &Uir, issues: &mut Vec<ValidationIssue>) {
    let targets = &uir.intent.targets;
    if targets.is_empty() {
        issues.push(ValidationIssue::new(
            &["intent", "targets"],
            "must name at least one module",
            "value_error.list.min_items",
        ));
        return;
    }
    let mut seen = std::collections::BTreeSet::new();
    for (idx, target) in targets.iter().enumerate() {
        if !KNOWN_MODULES.contains(&target.as_str()) {
            issues.push(ValidationIssue {
                loc: vec!["intent".into(), "targets".into(), idx.to_string()],
                msg: format!("unknown module {target:?}"),
                kind: "value_error.unknown_target".into(),
            });
        }
        if !seen.insert(target.as_str()) {
            issues.push(ValidationIssue::new(
                &["intent", "targets"],
                format!("duplicate target {target:?}"),
                "value_error.list.unique_items",
            ));
        }
    }
}

fn check_modules_present(modules: &Modules, issues: &mut Vec<ValidationIssue>) {
    let present = [
        modules.scene.is_some(),
        modules.motion.is_some(),
        modules.music.is_some(),
        modules.character.is_some(),
        modules.preview.is_some(),
        modules.export.is_some(),
    ];
    for (name, present) in KNOWN_MODULES.iter().zip(present) {
        if !present {
            issues.push(ValidationIssue {
                loc: vec!["modules".into(), (*name).to_string()],
                msg: "module entry is required".into(),
                kind: "value_error.missing".into(),
            });
        }
    }
}

fn check_scene(uir: &Uir, issues: &mut Vec<ValidationIssue>) {
    let Some(scene) = &uir.modules.scene else {
        return;
    };
    if let Some(resolution) = &scene.resolution {
        if resolution.len() != 2 {
            issues.push(ValidationIssue::new(
                &["modules", "scene", "resolution"],
                "must be [width, height]",
                "value_error.list.items",
            ));
            return;
        }
        let (w, h) = (resolution[0], resolution[1]);
        if w != 2 * h {
            issues.push(ValidationIssue::new(
                &["modules", "scene", "resolution"],
                "width must be exactly twice the height",
                "value_error.resolution.aspect",
            ));
        }
        if !(512..=2048).contains(&h) {
            issues.push(ValidationIssue::new(
                &["modules", "scene", "resolution"],
                "height must be within [512, 2048]",
                "value_error.number.not_in_range",
            ));
        }
        if !(1024..=4096).contains(&w) {
            issues.push(ValidationIssue::new(
                &["modules", "scene", "resolution"],
                "width must be within [1024, 4096]",
                "value_error.number.not_in_range",
            ));
        }
    }
    if scene.steps == Some(0) {
        issues.push(ValidationIssue::new(
            &["modules", "scene", "steps"],
            "must be >= 1",
            "value_error.number.not_ge",
        ));
    }
    if scene.cfg_scale.is_some_and(|cfg| cfg < 0.0) {
        issues.push(ValidationIssue::new(
            &["modules", "scene", "cfg_scale"],
            "must be >= 0",
            "value_error.number.not_ge",
        ));
    }
}

fn check_motion(uir: &Uir, issues: &mut Vec<ValidationIssue>) {
    let Some(motion) = &uir.modules.motion else {
        return;
    };
    if !(15..=60).contains(&motion.fps) {
        issues.push(ValidationIssue::new(
            &["modules", "motion", "fps"],
            "must be within [15, 60]",
            "value_error.number.not_in_range",
        ));
    }
    if motion.duration_s.is_some_and(|d| d < 1.0) {
        issues.push(ValidationIssue::new(
            &["modules", "motion", "duration_s"],
            "must be >= 1",
            "value_error.number.not_ge",
        ));
    }
}

fn check_music(uir: &Uir, issues: &mut Vec<ValidationIssue>) {
    let Some(music) = &uir.modules.music else {
        return;
    };
    if let Some(duration_s) = music.duration_s {
        if music.enabled && !(3.0..=60.0).contains(&duration_s) {
            issues.push(ValidationIssue::new(
                &["modules", "music", "duration_s"],
                "must be within [3, 60]",
                "value_error.number.not_in_range",
            ));
        } else if !music.enabled && duration_s < 1.0 {
            issues.push(ValidationIssue::new(
                &["modules", "music", "duration_s"],
                "must be >= 1",
                "value_error.number.not_ge",
            ));
        }
    }
    if music.tempo_bpm.is_some_and(|bpm| bpm < 1.0) {
        issues.push(ValidationIssue::new(
            &["modules", "music", "tempo_bpm"],
            "must be >= 1",
            "value_error.number.not_ge",
        ));
    }
}

fn check_export(uir: &Uir, issues: &mut Vec<ValidationIssue>) {
    let Some(export) = &uir.modules.export else {
        return;
    };
    if export.fps == 0 {
        issues.push(ValidationIssue::new(
            &["modules", "export", "fps"],
            "must be >= 1",
            "value_error.number.not_ge",
        ));
    }
    if let Some(resolution) = &export.resolution {
        if resolution.len() != 2 || resolution.iter().any(|&v| v == 0) {
            issues.push(ValidationIssue::new(
                &["modules", "export", "resolution"],
                "must be [width, height] with positive dimensions",
                "value_error.list.items",
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Semantic pass
// ---------------------------------------------------------------------------

fn semantic_issues(uir: &Uir) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for name in KNOWN_MODULES {
        let enabled = match name {
            "scene" => uir.modules.scene.as_ref().is_some_and(|m| m.enabled),
            "motion" => uir.modules.motion.as_ref().is_some_and(|m| m.enabled),
            "music" => uir.modules.music.as_ref().is_some_and(|m| m.enabled),
            "character" => uir.modules.character.as_ref().is_some_and(|m| m.enabled),
            "preview" => uir.modules.preview.as_ref().is_some_and(|m| m.enabled),
            "export" => uir.modules.export.as_ref().is_some_and(|m| m.enabled),
            _ => false,
        };
        if enabled && !uir.is_target(name) {
            issues.push(ValidationIssue {
                loc: vec!["modules".into(), name.to_string(), "enabled".into()],
                msg: "enabled module must be listed in intent.targets".into(),
                kind: "value_error.missing_target".into(),
            });
        }
    }
    issues
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn apply_defaults(uir: &mut Uir) {
    let duration_s = uir.intent.duration_s;
    if let Some(motion) = &mut uir.modules.motion {
        if motion.enabled && motion.duration_s.is_none() {
            motion.duration_s = Some(duration_s);
        }
    }
    if let Some(music) = &mut uir.modules.music {
        if music.enabled && music.duration_s.is_none() {
            music.duration_s = Some(duration_s);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_uir() -> Value {
        json!({
            "uir_version": "1.0",
            "job": {"id": "job_1", "created_at": "2025-12-20T00:00:00Z"},
            "input": {"raw_prompt": "test prompt", "lang": "en"},
            "intent": {"targets": ["motion"], "duration_s": 12},
            "modules": {
                "scene": {"enabled": false},
                "motion": {"enabled": true, "prompt": "motion", "fps": 30},
                "music": {"enabled": false},
                "character": {"enabled": false},
                "preview": {"enabled": false},
                "export": {"enabled": false},
            },
        })
    }

    fn issue_locs(err: &UirValidationError) -> Vec<String> {
        err.issues.iter().map(|i| i.loc.join(".")).collect()
    }

    #[test]
    fn valid_uir_parses() {
        let uir = parse_uir(&base_uir()).unwrap();
        assert_eq!(uir.uir_version, "1.0");
        assert_eq!(uir.job_id(), Some("job_1"));
        assert!(uir.module_requested(crate::Modality::Motion));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut v = base_uir();
        v["uir_version"] = json!("2.0");
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["uir_version"]);
    }

    #[test]
    fn empty_prompt_rejected() {
        let mut v = base_uir();
        v["input"]["raw_prompt"] = json!("   ");
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["input.raw_prompt"]);
    }

    #[test]
    fn empty_targets_rejected() {
        let mut v = base_uir();
        v["intent"]["targets"] = json!([]);
        v["modules"]["motion"]["enabled"] = json!(false);
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["intent.targets"]);
    }

    #[test]
    fn duplicate_targets_rejected() {
        let mut v = base_uir();
        v["intent"]["targets"] = json!(["motion", "motion"]);
        let err = parse_uir(&v).unwrap_err();
        assert!(err.issues.iter().any(|i| i.kind == "value_error.list.unique_items"));
    }

    #[test]
    fn unknown_target_rejected() {
        let mut v = base_uir();
        v["intent"]["targets"] = json!(["motion", "hologram"]);
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["intent.targets.1"]);
    }

    #[test]
    fn zero_duration_rejected() {
        let mut v = base_uir();
        v["intent"]["duration_s"] = json!(0);
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["intent.duration_s"]);
    }

    #[test]
    fn missing_module_key_rejected() {
        let mut v = base_uir();
        v["modules"].as_object_mut().unwrap().remove("preview");
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["modules.preview"]);
        assert_eq!(err.issues[0].kind, "value_error.missing");
    }

    #[test]
    fn fps_below_range_rejected() {
        let mut v = base_uir();
        v["modules"]["motion"]["fps"] = json!(14);
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["modules.motion.fps"]);
    }

    #[test]
    fn fps_above_range_rejected() {
        let mut v = base_uir();
        v["modules"]["motion"]["fps"] = json!(61);
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["modules.motion.fps"]);
    }

    #[test]
    fn panorama_aspect_enforced() {
        let mut v = base_uir();
        v["modules"]["scene"]["resolution"] = json!([2048, 1023]);
        let err = parse_uir(&v).unwrap_err();
        assert!(err.issues.iter().any(|i| i.kind == "value_error.resolution.aspect"));
    }

    #[test]
    fn panorama_height_bounds_enforced() {
        let mut v = base_uir();
        v["modules"]["scene"]["resolution"] = json!([1000, 500]);
        let err = parse_uir(&v).unwrap_err();
        // Aspect holds (1000 = 2*500) but both dimensions are under-range.
        assert!(err.issues.iter().all(|i| i.loc.join(".") == "modules.scene.resolution"));
        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn valid_panorama_resolution_accepted() {
        let mut v = base_uir();
        v["modules"]["scene"]["resolution"] = json!([2048, 1024]);
        parse_uir(&v).unwrap();
    }

    #[test]
    fn music_duration_bounds_when_enabled() {
        let mut v = base_uir();
        v["intent"]["targets"] = json!(["motion", "music"]);
        v["modules"]["music"]["enabled"] = json!(true);
        v["modules"]["music"]["duration_s"] = json!(90);
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(issue_locs(&err), vec!["modules.music.duration_s"]);
    }

    #[test]
    fn enabled_module_must_be_targeted() {
        let mut v = base_uir();
        v["intent"]["targets"] = json!(["scene"]);
        v["modules"]["scene"]["enabled"] = json!(true);
        v["modules"]["music"]["enabled"] = json!(true);
        let err = parse_uir(&v).unwrap_err();
        // Both offenders reported together: motion stays enabled too.
        assert_eq!(
            issue_locs(&err),
            vec!["modules.motion.enabled", "modules.music.enabled"]
        );
        for issue in &err.issues {
            assert_eq!(issue.msg, "enabled module must be listed in intent.targets");
            assert_eq!(issue.kind, "value_error.missing_target");
        }
    }

    #[test]
    fn semantic_pass_runs_after_structural() {
        let mut v = base_uir();
        v["modules"]["motion"]["fps"] = json!(14);
        v["modules"]["music"]["enabled"] = json!(true);
        let err = parse_uir(&v).unwrap_err();
        // Only the structural finding is reported on the first pass.
        assert_eq!(issue_locs(&err), vec!["modules.motion.fps"]);
    }

    #[test]
    fn structural_issues_accumulate() {
        let mut v = base_uir();
        v["input"]["raw_prompt"] = json!("");
        v["modules"]["motion"]["fps"] = json!(70);
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(
            issue_locs(&err),
            vec!["input.raw_prompt", "modules.motion.fps"]
        );
    }

    #[test]
    fn duration_default_copied_to_enabled_modules() {
        let mut v = base_uir();
        v["intent"]["targets"] = json!(["motion", "music"]);
        v["intent"]["duration_s"] = json!(8);
        v["modules"]["music"]["enabled"] = json!(true);
        let uir = parse_uir(&v).unwrap();
        assert_eq!(uir.modules.motion.as_ref().unwrap().duration_s, Some(8.0));
        assert_eq!(uir.modules.music.as_ref().unwrap().duration_s, Some(8.0));
    }

    #[test]
    fn explicit_module_duration_wins_over_intent() {
        let mut v = base_uir();
        v["modules"]["motion"]["duration_s"] = json!(5);
        let uir = parse_uir(&v).unwrap();
        assert_eq!(uir.modules.motion.as_ref().unwrap().duration_s, Some(5.0));
    }

    #[test]
    fn disabled_module_keeps_unset_duration() {
        let uir = parse_uir(&base_uir()).unwrap();
        assert_eq!(uir.modules.music.as_ref().unwrap().duration_s, None);
    }

    #[test]
    fn error_display_joins_issues() {
        let mut v = base_uir();
        v["input"]["raw_prompt"] = json!("");
        v["intent"]["duration_s"] = json!(0);
        let err = parse_uir(&v).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("UIR validation failed: "));
        assert!(text.contains("input.raw_prompt: must be a non-empty string"));
        assert!(text.contains("; intent.duration_s: must be >= 1"));
    }

    #[test]
    fn type_error_surfaces_as_single_issue() {
        let mut v = base_uir();
        v["modules"]["motion"]["fps"] = json!("thirty");
        let err = parse_uir(&v).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].kind, "type_error");
    }
}
