// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in character selector.
//!
//! The only adapter with no subprocess: it matches tokens drawn from the
//! UIR's style and mood fields against a small static library and writes a
//! `character_manifest.json` describing the chosen model.

use crate::common::{job_id_from_uir, log_line};
use mpl_adapter::{
    MediaAdapter, StageReporter, adapter_log_path, assert_dir_writable, build_asset_ref,
    resolve_output_dir,
};
use mpl_core::{AdapterResult, Modality, Uir};
use mpl_error::{AdapterError, ErrorCode};
use mpl_fs::ascii_json_pretty;
use mpl_fs::paths::character_static_base;
use serde_json::{Map, json};
use std::collections::BTreeSet;
use std::path::Path;

/// One entry in the built-in library.
#[derive(Debug, Clone)]
struct CharacterEntry {
    character_id: &'static str,
    tags: &'static [&'static str],
}

impl CharacterEntry {
    fn model_uri(&self, base: &str) -> String {
        format!("{base}/{}.glb", self.character_id)
    }
}

/// Skeleton every library model rigs against.
const SKELETON: &str = "SMPL_22";
const DEFAULT_CHARACTER_ID: &str = "samurai_01";

static LIBRARY: [CharacterEntry; 5] = [
    CharacterEntry {
        character_id: "samurai_01",
        tags: &["samurai", "warrior", "action", "epic", "cinematic", "fight"],
    },
    CharacterEntry {
        character_id: "anime_01",
        tags: &["anime", "manga", "stylized", "cute"],
    },
    CharacterEntry {
        character_id: "toon_01",
        tags: &["cartoon", "toon", "stylized", "playful"],
    },
    CharacterEntry {
        character_id: "lowpoly_01",
        tags: &["lowpoly", "stylized", "playful"],
    },
    CharacterEntry {
        character_id: "realistic_01",
        tags: &["realistic", "photoreal", "cinematic", "modern"],
    },
];

/// Selects a character model from the static library.
pub struct CharacterSelector;

impl CharacterSelector {
    /// Create the selector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for CharacterSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaAdapter for CharacterSelector {
    fn provider_id(&self) -> &str {
        "builtin_library"
    }

    fn modality(&self) -> Modality {
        Modality::Character
    }

    fn validate(&self, uir: &Uir) -> Result<(), AdapterError> {
        if !uir.modules.enabled(Modality::Character) {
            return Err(AdapterError::new(
                ErrorCode::ValidationInput,
                "modules.character.enabled must be true",
            ));
        }
        Ok(())
    }

    fn run(&self, uir: &Uir, out_dir: &Path, reporter: &dyn StageReporter) -> AdapterResult {
        let mut warnings = Vec::new();
        let job_id = match job_id_from_uir(uir) {
            Ok(id) => id,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };
        let log_path = adapter_log_path(out_dir, self.modality());

        let output_dir = match resolve_output_dir(out_dir, "character")
            .and_then(|dir| assert_dir_writable(&dir).map(|()| dir))
        {
            Ok(dir) => dir,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };

        reporter.stage("select", 0.2, "selecting built-in character");
        let selection = select_character(uir, &mut warnings, &log_path);

        let manifest = json!({
            "character_id": &selection.character_id,
            "model_uri": &selection.model_uri,
            "skeleton": SKELETON,
            "scale": 1.0,
            "notes": [&selection.note],
        });
        let manifest_path = output_dir.join("character_manifest.json");
        if let Err(e) = std::fs::write(&manifest_path, ascii_json_pretty(&manifest)) {
            return AdapterResult::failure(
                self.provider_id(),
                AdapterError::new(ErrorCode::IoWrite, "failed to write character_manifest.json")
                    .with_detail("path", manifest_path.display().to_string())
                    .with_detail("error", e.to_string()),
            );
        }

        let mut meta = Map::new();
        meta.insert("character_id".into(), json!(&selection.character_id));
        let artifact = match build_asset_ref(
            &manifest_path,
            out_dir,
            &job_id,
            "character_manifest",
            "application/json",
            Some(meta),
        ) {
            Ok(artifact) => artifact,
            Err(err) => return AdapterResult::failure(self.provider_id(), err),
        };

        reporter.stage("done", 1.0, "character manifest ready");
        AdapterResult::success(self.provider_id(), vec![artifact])
            .with_meta("character_id", &selection.character_id)
            .with_warnings(warnings)
    }
}

struct Selection {
    character_id: String,
    model_uri: String,
    note: String,
}

fn select_character(uir: &Uir, warnings: &mut Vec<String>, log_path: &Path) -> Selection {
    let base = character_static_base();
    let character = uir.modules.character.as_ref();

    if let Some(requested) = character
        .and_then(|c| c.character_id.as_deref())
        .filter(|id| !id.is_empty())
    {
        log_line(log_path, &format!("[select] requested character_id={requested}"));
        let known = LIBRARY.iter().find(|e| e.character_id == requested);
        if known.is_none() {
            warnings.push(format!(
                "character_id '{requested}' not found in builtin library; using static path"
            ));
        }
        return Selection {
            character_id: requested.to_string(),
            model_uri: format!("{base}/{requested}.glb"),
            note: "selected_by=character_id".into(),
        };
    }

    let tokens = selection_tokens(uir);
    if !tokens.is_empty() {
        if let Some((entry, matched)) = best_match(&tokens) {
            log_line(
                log_path,
                &format!(
                    "[select] matched tags={matched:?} -> {}",
                    entry.character_id
                ),
            );
            let mut matched: Vec<&str> = matched.into_iter().collect();
            matched.sort_unstable();
            return Selection {
                character_id: entry.character_id.to_string(),
                model_uri: entry.model_uri(&base),
                note: format!("selected_by=tags:{}", matched.join(",")),
            };
        }
        warnings.push("no tag match found; using default character".into());
    }

    let entry = LIBRARY
        .iter()
        .find(|e| e.character_id == DEFAULT_CHARACTER_ID)
        .unwrap_or(&LIBRARY[0]);
    log_line(
        log_path,
        &format!("[select] default character_id={}", entry.character_id),
    );
    Selection {
        character_id: entry.character_id.to_string(),
        model_uri: entry.model_uri(&base),
        note: "selected_by=default".into(),
    }
}

/// Lowercased alphanumeric tokens from the style and mood fields.
fn selection_tokens(uir: &Uir) -> BTreeSet<String> {
    let mut sources: Vec<&str> = Vec::new();
    if let Some(character) = &uir.modules.character {
        if let Some(style) = &character.style {
            sources.push(style);
        }
    }
    if let Some(motion) = &uir.modules.motion {
        if let Some(style) = &motion.style {
            sources.push(style);
        }
    }
    if let Some(style) = &uir.intent.style {
        sources.push(style);
    }
    if let Some(mood) = &uir.intent.mood {
        sources.push(mood);
    }
    let mut tokens = BTreeSet::new();
    for source in sources {
        let lowered = source.to_lowercase();
        for token in lowered.split(|c: char| !c.is_ascii_alphanumeric()) {
            if !token.is_empty() {
                tokens.insert(token.to_string());
            }
        }
        // Library tags are concatenated words ("lowpoly", "photoreal"), so a
        // spaced spelling must also match as one collapsed token.
        let collapsed: String = lowered
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        if !collapsed.is_empty() {
            tokens.insert(collapsed);
        }
    }
    tokens
}

/// Entry with the largest tag intersection; ties broken by library order.
fn best_match(tokens: &BTreeSet<String>) -> Option<(&'static CharacterEntry, Vec<&'static str>)> {
    let mut best: Option<(&CharacterEntry, Vec<&str>)> = None;
    for entry in &LIBRARY {
        let matched: Vec<&str> = entry
            .tags
            .iter()
            .copied()
            .filter(|tag| tokens.contains(*tag))
            .collect();
        let better = best
            .as_ref()
            .is_none_or(|(_, best_matched)| matched.len() > best_matched.len());
        if better && !matched.is_empty() {
            best = Some((entry, matched));
        }
    }
    best
}
