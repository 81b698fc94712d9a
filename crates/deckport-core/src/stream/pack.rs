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
use std::io::Cursor;
use std::path::PathBuf;

use serde::Deserialize;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::Fallible;
use crate::error::ImportError;
use crate::media::MediaProvider;
use crate::stream::ImportRecord;
use crate::stream::RecordSource;
use crate::template::ImportLayout;
use crate::template::TemplateConfig;
use crate::template::derive_layout;

const MANIFEST_NAME: &str = "manifest.json";
const RECORDS_NAME: &str = "records.tsv";
const MEDIA_DIR: &str = "media";

/// The structured manifest of a zip-pack package.
#[derive(Debug, Deserialize)]
struct PackManifest {
    #[serde(default)]
    #[allow(dead_code)]
    name: Option<String>,
    fields: Vec<String>,
    #[serde(default)]
    template: Option<PackTemplate>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PackTemplate {
    front: String,
    back: String,
    #[serde(default)]
    stylesheet: String,
}

/// Record stream over a delimited-records-plus-manifest zip package.
///
/// The manifest supplies the field list and (optionally) a template
/// shared by every record, which makes these "native re-export" records
/// render exactly like freshly decoded legacy ones. A sibling `media/`
/// directory holds the referenced files.
pub struct PackSource {
    tmp: Option<TempDir>,
    fields: Vec<String>,
    template: Option<TemplateConfig>,
    layout: Option<ImportLayout>,
    lines: Vec<String>,
    cursor: usize,
    total: Option<usize>,
    media_files: HashMap<String, PathBuf>,
}

impl PackSource {
    pub fn open(bytes: Vec<u8>) -> Fallible<PackSource> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let tmp: TempDir = TempDir::new()?;
        archive.extract(tmp.path())?;

        let manifest_path: PathBuf = tmp.path().join(MANIFEST_NAME);
        if !manifest_path.exists() {
            return Err(ImportError::format("pack package has no manifest"));
        }
        let manifest: PackManifest = serde_json::from_str(&std::fs::read_to_string(manifest_path)?)?;
        if manifest.fields.is_empty() {
            return Err(ImportError::format("pack manifest declares no fields"));
        }

        let records_path: PathBuf = tmp.path().join(RECORDS_NAME);
        if !records_path.exists() {
            return Err(ImportError::format("pack package has no records file"));
        }
        let lines: Vec<String> = std::fs::read_to_string(records_path)?
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect();

        let template: Option<TemplateConfig> = manifest.template.map(|t| TemplateConfig {
            front: t.front,
            back: t.back,
            stylesheet: t.stylesheet,
        });

        let media_files: HashMap<String, PathBuf> = index_media(tmp.path().join(MEDIA_DIR));
        log::debug!(
            "opened pack package: {} records, {} media files",
            lines.len(),
            media_files.len()
        );

        let layout: Option<ImportLayout> = template
            .as_ref()
            .and_then(|t| derive_layout(&[t], &manifest.fields));
        let total: Option<usize> = manifest.total.or(Some(lines.len()));
        Ok(PackSource {
            tmp: Some(tmp),
            fields: manifest.fields,
            template,
            layout,
            lines,
            cursor: 0,
            total,
            media_files,
        })
    }
}

fn index_media(dir: PathBuf) -> HashMap<String, PathBuf> {
    let mut files: HashMap<String, PathBuf> = HashMap::new();
    if !dir.is_dir() {
        return files;
    }
    for entry in WalkDir::new(&dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(&dir) {
            let name: String = relative.to_string_lossy().replace('\\', "/");
            files.insert(name, entry.path().to_path_buf());
        }
    }
    files
}

/// Undo the record-file escaping of delimiter characters.
fn unescape_field(value: &str) -> String {
    let mut out: String = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

impl MediaProvider for PackSource {
    fn media_bytes(&mut self, file_name: &str) -> Fallible<Option<Vec<u8>>> {
        match self.media_files.get(file_name) {
            Some(path) => Ok(Some(std::fs::read(path)?)),
            None => Ok(None),
        }
    }
}

impl RecordSource for PackSource {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn total_records(&self) -> Option<usize> {
        self.total
    }

    fn layout(&self) -> Option<&ImportLayout> {
        self.layout.as_ref()
    }

    fn next_record(&mut self) -> Fallible<Option<ImportRecord>> {
        let Some(line) = self.lines.get(self.cursor) else {
            return Ok(None);
        };
        let order_index: usize = self.cursor;
        self.cursor += 1;
        let mut values: Vec<String> = line.split('\t').map(unescape_field).collect();
        values.resize(self.fields.len(), String::new());
        Ok(Some(ImportRecord {
            fields: values,
            progress: None,
            template: self.template.clone(),
            order_index,
        }))
    }

    fn close(&mut self) -> Fallible<()> {
        self.lines.clear();
        self.media_files.clear();
        if let Some(tmp) = self.tmp.take() {
            tmp.close()?;
        }
        Ok(())
    }
}

impl Drop for PackSource {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
