// Copyright 2025 The deckport authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use rusqlite::Connection;

use crate::error::Fallible;
use crate::error::ImportError;
use crate::template::TemplateConfig;
use crate::template::decode_template_blob;

/// The unit separator used between field values in legacy note rows.
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// How many note rows the heuristic fallback inspects.
const HEURISTIC_SCAN_LIMIT: usize = 25;

/// A note model: the ordered field schema shared by a group of notes,
/// with every display template that could be recovered for it.
///
/// A model with several templates (forward/reverse card pairs) keeps
/// them all: layout derivation accumulates tokens across every one,
/// while records render through the primary (first) template only.
#[derive(Debug, Clone)]
pub struct NoteModel {
    pub id: i64,
    pub field_names: Vec<String>,
    pub templates: Vec<TemplateConfig>,
}

impl NoteModel {
    /// The template records of this model render through.
    pub fn primary_template(&self) -> Option<&TemplateConfig> {
        self.templates.first()
    }
}

/// Normalize a field name for comparison: trimmed, lowercased.
pub fn normalize_field_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Resolve a raw field name against a vocabulary, exact match first, then
/// normalized match. Returns the canonical name from the vocabulary.
pub fn resolve_field_name(name: &str, vocabulary: &[String]) -> Option<String> {
    if let Some(found) = vocabulary.iter().find(|f| f.as_str() == name) {
        return Some(found.clone());
    }
    let normalized = normalize_field_name(name);
    vocabulary
        .iter()
        .find(|f| normalize_field_name(f) == normalized)
        .cloned()
}

/// Order-preserving union of field names across models.
///
/// This is the unified field vocabulary: every record in a stream maps
/// its values into this order, with missing fields as empty strings.
pub fn unified_fields(models: &[NoteModel]) -> Vec<String> {
    let mut union: Vec<String> = Vec::new();
    for model in models {
        for name in &model.field_names {
            if !union.iter().any(|f| f == name) {
                union.push(name.clone());
            }
        }
    }
    union
}

/// Resolve the note models of an opened store.
///
/// Tries three strategies in order, first success wins:
/// 1. the single metadata row holding a JSON object keyed by model id;
/// 2. the normalized fields table of the newer schema, with templates
///    recovered from binary configuration blobs;
/// 3. a heuristic scan of raw note rows, synthesizing one model.
///
/// All three coming up empty means the package is unusable.
pub fn resolve_models(conn: &Connection) -> Fallible<Vec<NoteModel>> {
    if let Some(models) = models_from_metadata_json(conn)? {
        log::debug!("resolved {} models from metadata JSON", models.len());
        return Ok(models);
    }
    if let Some(models) = models_from_fields_table(conn)? {
        log::debug!("resolved {} models from fields table", models.len());
        return Ok(models);
    }
    if let Some(models) = models_from_note_scan(conn)? {
        log::debug!("synthesized model from note scan");
        return Ok(models);
    }
    Err(ImportError::format("no resolvable field model in package"))
}

/// Strategy 1: legacy schema, where the `col` table carries one row with
/// a JSON object keyed by model id. Field arrays are ordered by their
/// `ord` value; templates (front/back/stylesheet) come along for free.
fn models_from_metadata_json(conn: &Connection) -> Fallible<Option<Vec<NoteModel>>> {
    let json: String = match conn.query_row("SELECT models FROM col", [], |row| row.get(0)) {
        Ok(json) => json,
        Err(_) => return Ok(None),
    };
    let value: serde_json::Value = match serde_json::from_str(&json) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let Some(object) = value.as_object() else {
        return Ok(None);
    };
    let mut models: Vec<NoteModel> = Vec::new();
    for (id_str, model) in object {
        let id: i64 = id_str.parse().unwrap_or(0);
        let mut fields: Vec<(i64, String)> = Vec::new();
        if let Some(flds) = model.get("flds").and_then(|v| v.as_array()) {
            for fld in flds {
                let ord = fld.get("ord").and_then(|v| v.as_i64()).unwrap_or(0);
                if let Some(name) = fld.get("name").and_then(|v| v.as_str()) {
                    fields.push((ord, name.to_string()));
                }
            }
        }
        if fields.is_empty() {
            continue;
        }
        fields.sort_by_key(|(ord, _)| *ord);
        let field_names: Vec<String> = fields.into_iter().map(|(_, name)| name).collect();
        let templates: Vec<TemplateConfig> = templates_from_metadata_json(model);
        models.push(NoteModel {
            id,
            field_names,
            templates,
        });
    }
    models.sort_by_key(|m| m.id);
    if models.is_empty() {
        Ok(None)
    } else {
        Ok(Some(models))
    }
}

/// Every card template of a model, in declaration order. The stylesheet
/// is shared across them.
fn templates_from_metadata_json(model: &serde_json::Value) -> Vec<TemplateConfig> {
    let stylesheet: &str = model.get("css").and_then(|v| v.as_str()).unwrap_or("");
    let Some(tmpls) = model.get("tmpls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let mut templates: Vec<TemplateConfig> = Vec::new();
    for tmpl in tmpls {
        let front: &str = tmpl.get("qfmt").and_then(|v| v.as_str()).unwrap_or("");
        let back: &str = tmpl.get("afmt").and_then(|v| v.as_str()).unwrap_or("");
        if front.is_empty() && back.is_empty() {
            continue;
        }
        templates.push(TemplateConfig {
            front: front.to_string(),
            back: back.to_string(),
            stylesheet: stylesheet.to_string(),
        });
    }
    templates
}

/// Strategy 2: newer schema with a normalized `fields` table grouped by
/// notetype id and ordered by ordinal. Templates live in a separate table
/// as binary configuration blobs; a blob that fails to decode costs that
/// model one template, nothing more.
fn models_from_fields_table(conn: &Connection) -> Fallible<Option<Vec<NoteModel>>> {
    let mut stmt = match conn.prepare("SELECT ntid, name FROM fields ORDER BY ntid, ord") {
        Ok(stmt) => stmt,
        Err(_) => return Ok(None),
    };
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut models: Vec<NoteModel> = Vec::new();
    for row in rows {
        let (ntid, name) = row?;
        match models.last_mut() {
            Some(model) if model.id == ntid => model.field_names.push(name),
            _ => models.push(NoteModel {
                id: ntid,
                field_names: vec![name],
                templates: Vec::new(),
            }),
        }
    }
    if models.is_empty() {
        return Ok(None);
    }
    attach_blob_templates(conn, &mut models)?;
    Ok(Some(models))
}

fn attach_blob_templates(conn: &Connection, models: &mut [NoteModel]) -> Fallible<()> {
    let mut stmt = match conn.prepare("SELECT ntid, config FROM templates ORDER BY ntid, ord") {
        Ok(stmt) => stmt,
        Err(_) => return Ok(()),
    };
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    for row in rows {
        let (ntid, blob) = row?;
        let Some(model) = models.iter_mut().find(|m| m.id == ntid) else {
            continue;
        };
        // Every blob counts toward the layout; records render through
        // the first one.
        match decode_template_blob(&blob) {
            Ok(config) => model.templates.push(config),
            Err(e) => log::warn!("template blob for model {ntid} failed to decode: {e}"),
        }
    }
    Ok(())
}

/// Strategy 3: no metadata at all. Scan a bounded number of raw note
/// rows, take the widest field-separator split, and synthesize numbered
/// field names under a single model.
fn models_from_note_scan(conn: &Connection) -> Fallible<Option<Vec<NoteModel>>> {
    let mut stmt = match conn.prepare("SELECT flds FROM notes LIMIT ?1") {
        Ok(stmt) => stmt,
        Err(_) => return Ok(None),
    };
    let rows = stmt.query_map([HEURISTIC_SCAN_LIMIT as i64], |row| row.get::<_, String>(0))?;
    let mut width: usize = 0;
    for row in rows {
        let flds: String = row?;
        width = width.max(flds.split(FIELD_SEPARATOR).count());
    }
    if width == 0 {
        return Ok(None);
    }
    let field_names: Vec<String> = (1..=width).map(|i| format!("Field {i}")).collect();
    Ok(Some(vec![NoteModel {
        id: 0,
        field_names,
        templates: Vec::new(),
    }]))
}
