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
use std::path::PathBuf;

use rusqlite::Connection;
use tempfile::TempDir;

use crate::error::Fallible;
use crate::error::ImportError;
use crate::media::MediaProvider;
use crate::progress::infer;
use crate::stream::ImportRecord;
use crate::stream::RecordSource;
use crate::template::ImportLayout;
use crate::template::TemplateConfig;
use crate::template::derive_layout;

/// Record stream over a single-file embedded-store package.
///
/// Functionally equivalent to the zip-pack dialect, with everything in
/// one relational store: a `manifest` key/value table, a `records` table
/// with JSON field arrays and optional raw scheduling columns, and a
/// `media` table of named blobs.
pub struct StoreSource {
    tmp: Option<TempDir>,
    conn: Option<Connection>,
    fields: Vec<String>,
    template: Option<TemplateConfig>,
    layout: Option<ImportLayout>,
    records: Vec<ImportRecord>,
    cursor: usize,
}

impl StoreSource {
    pub fn open(bytes: Vec<u8>) -> Fallible<StoreSource> {
        let tmp: TempDir = TempDir::new()?;
        let path: PathBuf = tmp.path().join("package.db");
        std::fs::write(&path, &bytes)?;
        let conn: Connection = Connection::open(&path)?;

        let manifest: HashMap<String, String> = load_manifest(&conn)?;
        let fields: Vec<String> = match manifest.get("fields") {
            Some(json) => serde_json::from_str(json)?,
            None => return Err(ImportError::format("store manifest declares no fields")),
        };
        if fields.is_empty() {
            return Err(ImportError::format("store manifest declares no fields"));
        }
        let template: Option<TemplateConfig> = template_from_manifest(&manifest);
        let layout: Option<ImportLayout> =
            template.as_ref().and_then(|t| derive_layout(&[t], &fields));
        let records: Vec<ImportRecord> = load_records(&conn, fields.len(), &template)?;
        log::debug!("opened store package: {} records", records.len());

        Ok(StoreSource {
            tmp: Some(tmp),
            conn: Some(conn),
            fields,
            template,
            layout,
            records,
            cursor: 0,
        })
    }

    /// The template shared by every record, when the manifest carries
    /// one.
    pub fn template(&self) -> Option<&TemplateConfig> {
        self.template.as_ref()
    }
}

fn load_manifest(conn: &Connection) -> Fallible<HashMap<String, String>> {
    let mut stmt = match conn.prepare("SELECT key, value FROM manifest") {
        Ok(stmt) => stmt,
        Err(_) => return Err(ImportError::format("store package has no manifest table")),
    };
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut manifest: HashMap<String, String> = HashMap::new();
    for row in rows {
        let (key, value) = row?;
        manifest.insert(key, value);
    }
    Ok(manifest)
}

fn template_from_manifest(manifest: &HashMap<String, String>) -> Option<TemplateConfig> {
    let front: String = manifest.get("front")?.clone();
    let back: String = manifest.get("back").cloned().unwrap_or_default();
    if front.is_empty() && back.is_empty() {
        return None;
    }
    let stylesheet: String = manifest.get("stylesheet").cloned().unwrap_or_default();
    Some(TemplateConfig {
        front,
        back,
        stylesheet,
    })
}

fn load_records(
    conn: &Connection,
    width: usize,
    template: &Option<TemplateConfig>,
) -> Fallible<Vec<ImportRecord>> {
    let mut stmt = match conn
        .prepare("SELECT fields, ivl, factor, reps, queue, type FROM records ORDER BY id")
    {
        Ok(stmt) => stmt,
        Err(_) => return Ok(Vec::new()),
    };
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, Option<i64>>(2)?,
            row.get::<_, Option<i64>>(3)?,
            row.get::<_, Option<i64>>(4)?,
            row.get::<_, Option<i64>>(5)?,
        ))
    })?;
    let mut records: Vec<ImportRecord> = Vec::new();
    for (order_index, row) in rows.enumerate() {
        let (fields_json, ivl, factor, reps, queue, ctype) = row?;
        let mut values: Vec<String> = serde_json::from_str(&fields_json).unwrap_or_default();
        values.resize(width, String::new());
        let progress = match (ivl, factor, reps, queue, ctype) {
            (Some(ivl), Some(factor), Some(reps), Some(queue), Some(ctype)) => {
                infer(ivl, factor, reps, queue, ctype)
            }
            _ => None,
        };
        records.push(ImportRecord {
            fields: values,
            progress,
            template: template.clone(),
            order_index,
        });
    }
    Ok(records)
}

impl MediaProvider for StoreSource {
    fn media_bytes(&mut self, file_name: &str) -> Fallible<Option<Vec<u8>>> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(None);
        };
        let result = conn.query_row(
            "SELECT data FROM media WHERE name = ?1",
            [file_name],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(bytes) => Ok(Some(bytes)),
            Err(_) => Ok(None),
        }
    }
}

impl RecordSource for StoreSource {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn total_records(&self) -> Option<usize> {
        Some(self.records.len())
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
        if let Some(conn) = self.conn.take() {
            let _ = conn.close();
        }
        if let Some(tmp) = self.tmp.take() {
            tmp.close()?;
        }
        Ok(())
    }
}

impl Drop for StoreSource {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(with_progress: bool) -> Vec<u8> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("package.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE manifest (key TEXT, value TEXT);
             CREATE TABLE records (id INTEGER, fields TEXT, ivl INTEGER, factor INTEGER,
                                   reps INTEGER, queue INTEGER, type INTEGER);
             CREATE TABLE media (name TEXT, data BLOB);",
        )
        .unwrap();
        conn.execute_batch(
            r#"INSERT INTO manifest VALUES
                 ('name', 'Example'),
                 ('fields', '["Front", "Back"]'),
                 ('front', '{{Front}}'),
                 ('back', '{{FrontSide}}<hr>{{Back}}');
               INSERT INTO media VALUES ('tone.mp3', X'414243');"#,
        )
        .unwrap();
        if with_progress {
            conn.execute_batch(
                r#"INSERT INTO records VALUES (1, '["a", "b"]', 12, 2300, 6, 2, 2);"#,
            )
            .unwrap();
        } else {
            conn.execute_batch(
                r#"INSERT INTO records VALUES (1, '["a", "b"]', NULL, NULL, NULL, NULL, NULL);"#,
            )
            .unwrap();
        }
        conn.close().unwrap();
        std::fs::read(&path).unwrap()
    }

    /// Records come out of the store with the manifest template attached.
    #[test]
    fn test_records_and_template() -> Fallible<()> {
        let mut source = StoreSource::open(fixture(false))?;
        assert_eq!(source.fields(), &["Front", "Back"]);
        let record = source.next_record()?.unwrap();
        assert_eq!(record.fields, vec!["a", "b"]);
        assert_eq!(record.template.unwrap().front, "{{Front}}");
        assert!(record.progress.is_none());
        assert!(source.next_record()?.is_none());
        source.close()?;
        Ok(())
    }

    /// Raw scheduling columns run through progress inference.
    #[test]
    fn test_progress_columns() -> Fallible<()> {
        let mut source = StoreSource::open(fixture(true))?;
        let record = source.next_record()?.unwrap();
        let progress = record.progress.unwrap();
        assert_eq!(progress.stability_days, 12.0);
        assert_eq!(progress.review_count, 6);
        source.close()?;
        Ok(())
    }

    /// Media blobs are readable by name.
    #[test]
    fn test_media_table() -> Fallible<()> {
        let mut source = StoreSource::open(fixture(false))?;
        assert_eq!(source.media_bytes("tone.mp3")?, Some(b"ABC".to_vec()));
        assert_eq!(source.media_bytes("missing.png")?, None);
        source.close()?;
        Ok(())
    }

    /// A store without a manifest table is a format error.
    #[test]
    fn test_missing_manifest_table() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("package.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE other (id INTEGER);").unwrap();
        conn.close().unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(matches!(
            StoreSource::open(bytes),
            Err(ImportError::Format(_))
        ));
    }
}
