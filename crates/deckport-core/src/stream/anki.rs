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

use std::collections::HashMap;

use crate::error::Fallible;
use crate::media::MediaProvider;
use crate::model::FIELD_SEPARATOR;
use crate::model::NoteModel;
use crate::model::resolve_models;
use crate::model::unified_fields;
use crate::package::Package;
use crate::progress::LegacyProgress;
use crate::progress::infer;
use crate::progress::pick_better;
use crate::stream::ImportRecord;
use crate::stream::RecordSource;
use crate::template::ImportLayout;
use crate::template::TemplateConfig;
use crate::template::derive_layout;

/// Record stream over a legacy binary package.
///
/// Notes are joined against per-note scheduling progress; when a note
/// produced several cards (forward/reverse pairs), the tie-break in
/// [`pick_better`] keeps one winner. Each record carries its model's
/// template when one was recovered.
pub struct AnkiSource {
    package: Package,
    fields: Vec<String>,
    layout: Option<ImportLayout>,
    records: Vec<ImportRecord>,
    cursor: usize,
    total: usize,
}

impl AnkiSource {
    pub fn open(bytes: Vec<u8>) -> Fallible<AnkiSource> {
        let package: Package = Package::open(bytes)?;
        let models: Vec<NoteModel> = resolve_models(package.store()?)?;
        let fields: Vec<String> = unified_fields(&models);
        // Layout accumulates over every template of every model; records
        // render through their model's primary template only.
        let configs: Vec<&TemplateConfig> =
            models.iter().flat_map(|m| m.templates.iter()).collect();
        let layout: Option<ImportLayout> = derive_layout(&configs, &fields);

        // Per model: model-field-index to unified-index, plus template.
        let mut mappings: HashMap<i64, (Vec<usize>, Option<TemplateConfig>)> = HashMap::new();
        for model in &models {
            let positions: Vec<usize> = model
                .field_names
                .iter()
                .map(|name| fields.iter().position(|f| f == name).unwrap_or(0))
                .collect();
            mappings.insert(model.id, (positions, model.primary_template().cloned()));
        }
        let fallback_model: i64 = models[0].id;

        let progress: HashMap<i64, LegacyProgress> = load_progress(&package)?;
        let records: Vec<ImportRecord> =
            load_notes(&package, &fields, &mappings, fallback_model, &progress)?;
        let total: usize = records.len();
        log::debug!("streaming {} records from legacy package", total);

        Ok(AnkiSource {
            package,
            fields,
            layout,
            records,
            cursor: 0,
            total,
        })
    }
}

fn load_progress(package: &Package) -> Fallible<HashMap<i64, LegacyProgress>> {
    let conn = package.store()?;
    let mut stmt = match conn.prepare("SELECT nid, ivl, factor, reps, queue, type FROM cards") {
        Ok(stmt) => stmt,
        Err(_) => return Ok(HashMap::new()),
    };
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;
    let mut progress: HashMap<i64, LegacyProgress> = HashMap::new();
    for row in rows {
        let (nid, ivl, factor, reps, queue, ctype) = row?;
        let Some(candidate) = infer(ivl, factor, reps, queue, ctype) else {
            continue;
        };
        progress
            .entry(nid)
            .and_modify(|current| *current = pick_better(*current, candidate))
            .or_insert(candidate);
    }
    Ok(progress)
}

fn load_notes(
    package: &Package,
    fields: &[String],
    mappings: &HashMap<i64, (Vec<usize>, Option<TemplateConfig>)>,
    fallback_model: i64,
    progress: &HashMap<i64, LegacyProgress>,
) -> Fallible<Vec<ImportRecord>> {
    let conn = package.store()?;
    let mut stmt = match conn.prepare("SELECT id, mid, flds FROM notes ORDER BY id") {
        Ok(stmt) => stmt,
        Err(_) => return Ok(Vec::new()),
    };
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut records: Vec<ImportRecord> = Vec::new();
    for (order_index, row) in rows.enumerate() {
        let (nid, mid, flds) = row?;
        let (positions, template) = mappings
            .get(&mid)
            .unwrap_or_else(|| &mappings[&fallback_model]);
        let mut values: Vec<String> = vec![String::new(); fields.len()];
        for (i, value) in flds.split(FIELD_SEPARATOR).enumerate() {
            if let Some(&pos) = positions.get(i) {
                values[pos] = value.to_string();
            }
        }
        records.push(ImportRecord {
            fields: values,
            progress: progress.get(&nid).copied(),
            template: template.clone(),
            order_index,
        });
    }
    Ok(records)
}

impl MediaProvider for AnkiSource {
    fn media_bytes(&mut self, file_name: &str) -> Fallible<Option<Vec<u8>>> {
        self.package.read_media(file_name)
    }
}

impl RecordSource for AnkiSource {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn total_records(&self) -> Option<usize> {
        Some(self.total)
    }

    fn layout(&self) -> Option<&ImportLayout> {
        self.layout.as_ref()
    }

    fn next_record(&mut self) -> Fallible<Option<ImportRecord>> {
        match self.records.get(self.cursor) {
            Some(record) => {
                self.cursor += 1;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Fallible<()> {
        self.records.clear();
        self.cursor = 0;
        self.package.close()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::io::Write;

    use rusqlite::Connection;
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::error::ImportError;

    const MODELS_JSON: &str = r#"{
        "100": {
            "name": "Basic",
            "flds": [{"name": "Front", "ord": 0}, {"name": "Back", "ord": 1}],
            "tmpls": [{"qfmt": "{{Front}}", "afmt": "{{FrontSide}}<hr>{{Back}}"}],
            "css": ".card { }"
        },
        "200": {
            "name": "Vocab",
            "flds": [{"name": "Back", "ord": 0}, {"name": "Example", "ord": 1}],
            "tmpls": [{"qfmt": "{{Back}}", "afmt": "{{Example}}"}]
        }
    }"#;

    /// Build a legacy package: a store with the given models, notes, and
    /// cards, zipped under the legacy payload name.
    fn fixture_with_models(
        models_json: &str,
        notes: &[(i64, i64, &str)],
        cards: &[(i64, i64, i64, i64, i64, i64)],
    ) -> Vec<u8> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE col (models TEXT);
             CREATE TABLE notes (id INTEGER, mid INTEGER, flds TEXT);
             CREATE TABLE cards (nid INTEGER, ivl INTEGER, factor INTEGER,
                                 reps INTEGER, queue INTEGER, type INTEGER);",
        )
        .unwrap();
        conn.execute("INSERT INTO col (models) VALUES (?1)", [models_json])
            .unwrap();
        for (id, mid, flds) in notes {
            conn.execute(
                "INSERT INTO notes VALUES (?1, ?2, ?3)",
                rusqlite::params![id, mid, flds],
            )
            .unwrap();
        }
        for (nid, ivl, factor, reps, queue, ctype) in cards {
            conn.execute(
                "INSERT INTO cards VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![nid, ivl, factor, reps, queue, ctype],
            )
            .unwrap();
        }
        conn.close().unwrap();
        let store = std::fs::read(&path).unwrap();
        let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
        zw.start_file("collection.anki2", SimpleFileOptions::default())
            .unwrap();
        zw.write_all(&store).unwrap();
        zw.finish().unwrap().into_inner()
    }

    fn fixture(notes: &[(i64, i64, &str)], cards: &[(i64, i64, i64, i64, i64, i64)]) -> Vec<u8> {
        fixture_with_models(MODELS_JSON, notes, cards)
    }

    /// Records map into the unified field order, missing fields blank.
    #[test]
    fn test_unified_field_mapping() -> Fallible<()> {
        let bytes = fixture(
            &[
                (1, 100, "hello\u{1f}world"),
                (2, 200, "sekai\u{1f}example sentence"),
            ],
            &[],
        );
        let mut source = AnkiSource::open(bytes)?;
        assert_eq!(source.fields(), &["Front", "Back", "Example"]);
        assert_eq!(source.total_records(), Some(2));
        let first = source.next_record()?.unwrap();
        assert_eq!(first.fields, vec!["hello", "world", ""]);
        let second = source.next_record()?.unwrap();
        assert_eq!(second.fields, vec!["", "sekai", "example sentence"]);
        assert!(source.next_record()?.is_none());
        source.close()?;
        Ok(())
    }

    /// Per-note progress joins through the tie-break: the non-suspended
    /// card of a pair wins.
    #[test]
    fn test_progress_join_tie_break() -> Fallible<()> {
        let bytes = fixture(
            &[(1, 100, "a\u{1f}b")],
            &[(1, 10, 2500, 4, -1, 2), (1, 7, 2100, 2, 2, 2)],
        );
        let mut source = AnkiSource::open(bytes)?;
        let record = source.next_record()?.unwrap();
        let progress = record.progress.unwrap();
        assert!(!progress.suspended);
        assert_eq!(progress.review_count, 2);
        source.close()?;
        Ok(())
    }

    /// Fields referenced only by a model's second card template still
    /// reach the layout hint; the primary template stays first.
    #[test]
    fn test_layout_spans_all_templates() -> Fallible<()> {
        let models_json = r#"{
            "1": {
                "name": "Reversible",
                "flds": [
                    {"name": "Front", "ord": 0},
                    {"name": "Back", "ord": 1},
                    {"name": "Extra", "ord": 2}
                ],
                "tmpls": [
                    {"qfmt": "{{Front}}", "afmt": "{{Back}}"},
                    {"qfmt": "{{Extra}}", "afmt": "{{Front}}"}
                ]
            }
        }"#;
        let bytes = fixture_with_models(models_json, &[(1, 1, "a\u{1f}b\u{1f}c")], &[]);
        let mut source = AnkiSource::open(bytes)?;
        let layout = source.layout().unwrap().clone();
        assert_eq!(layout.front_fields, vec!["Front", "Extra"]);
        assert_eq!(layout.back_fields, vec!["Back", "Front"]);
        let record = source.next_record()?.unwrap();
        assert_eq!(record.template.unwrap().front, "{{Front}}");
        source.close()?;
        Ok(())
    }

    /// Records carry their model's template.
    #[test]
    fn test_template_attached() -> Fallible<()> {
        let bytes = fixture(&[(1, 100, "a\u{1f}b")], &[]);
        let mut source = AnkiSource::open(bytes)?;
        let record = source.next_record()?.unwrap();
        let template = record.template.unwrap();
        assert_eq!(template.front, "{{Front}}");
        source.close()?;
        Ok(())
    }

    /// A package whose store has no models is a fatal format error.
    #[test]
    fn test_unusable_package() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("store.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE empty (id INTEGER);").unwrap();
        conn.close().unwrap();
        let store = std::fs::read(&path).unwrap();
        let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
        zw.start_file("collection.anki2", SimpleFileOptions::default())
            .unwrap();
        zw.write_all(&store).unwrap();
        let bytes = zw.finish().unwrap().into_inner();
        assert!(matches!(
            AnkiSource::open(bytes),
            Err(ImportError::Format(_))
        ));
    }
}
