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
use std::fs::File;
use std::io::Cursor;
use std::io::Read;
use std::path::PathBuf;

use rusqlite::Connection;
use tempfile::TempDir;
use zip::ZipArchive;

use crate::error::Fallible;
use crate::error::ImportError;

/// Store payload entry names, in priority order: block-compressed,
/// plain current, legacy.
const STORE_COMPRESSED: &str = "collection.anki21b";
const STORE_CURRENT: &str = "collection.anki21";
const STORE_LEGACY: &str = "collection.anki2";

/// The archive entry holding the locator-to-filename media manifest.
const MEDIA_MANIFEST: &str = "media";

/// The media manifest of a package: a bidirectional locator/filename
/// mapping, read-only after the container is opened.
///
/// In the archive, media files are stored under opaque locators (`"0"`,
/// `"1"`, ...) and the manifest maps each locator to the filename that
/// card content refers to.
#[derive(Debug, Default)]
pub struct MediaIndex {
    by_locator: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl MediaIndex {
    fn from_manifest(manifest: HashMap<String, String>) -> Self {
        let mut by_name = HashMap::with_capacity(manifest.len());
        for (locator, name) in &manifest {
            by_name.insert(name.clone(), locator.clone());
        }
        MediaIndex {
            by_locator: manifest,
            by_name,
        }
    }

    /// The filename a locator maps to, if any.
    pub fn file_name(&self, locator: &str) -> Option<&str> {
        self.by_locator.get(locator).map(|s| s.as_str())
    }

    /// The archive locator for a filename, if any.
    pub fn locator(&self, file_name: &str) -> Option<&str> {
        self.by_name.get(file_name).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_locator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_locator.is_empty()
    }
}

/// An opened package container.
///
/// Owns the extracted store file (inside a scratch directory), the open
/// store connection, the archive handle for on-demand media reads, and
/// the media index. All of it is released by [`Package::close`], which is
/// idempotent and also runs on drop.
pub struct Package {
    tmp: Option<TempDir>,
    conn: Option<Connection>,
    archive: Option<ZipArchive<Cursor<Vec<u8>>>>,
    media: MediaIndex,
    store_path: PathBuf,
}

impl Package {
    /// Open a package from raw bytes.
    ///
    /// Scans the archive for the recognized store payloads in priority
    /// order. A block-compressed payload is streamed through the zstd
    /// decoder into a file named as the plain variant, so downstream code
    /// never sees the difference. A missing media manifest yields empty
    /// mappings: media-less decks are valid.
    pub fn open(bytes: Vec<u8>) -> Fallible<Package> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let tmp: TempDir = TempDir::new()?;
        let store_path: PathBuf = tmp.path().join(STORE_CURRENT);

        let names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        if names.iter().any(|n| n == STORE_COMPRESSED) {
            log::debug!("found block-compressed store payload");
            let entry = archive.by_name(STORE_COMPRESSED)?;
            let mut out = File::create(&store_path)?;
            zstd::stream::copy_decode(entry, &mut out)
                .map_err(|e| ImportError::format(format!("store decompression failed: {e}")))?;
        } else if names.iter().any(|n| n == STORE_CURRENT) {
            let entry = archive.by_name(STORE_CURRENT)?;
            copy_entry(entry, &store_path)?;
        } else if names.iter().any(|n| n == STORE_LEGACY) {
            let entry = archive.by_name(STORE_LEGACY)?;
            copy_entry(entry, &store_path)?;
        } else {
            return Err(ImportError::format("no usable store entry in package"));
        }

        let conn: Connection = Connection::open(&store_path)?;

        let media: MediaIndex = match archive.by_name(MEDIA_MANIFEST) {
            Ok(mut entry) => {
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .map_err(ImportError::from)?;
                let manifest: HashMap<String, String> = serde_json::from_str(&text)?;
                MediaIndex::from_manifest(manifest)
            }
            Err(_) => MediaIndex::default(),
        };
        log::debug!("opened package with {} media entries", media.len());

        Ok(Package {
            tmp: Some(tmp),
            conn: Some(conn),
            archive: Some(archive),
            media,
            store_path,
        })
    }

    /// The open store connection.
    ///
    /// Only valid before [`Package::close`].
    pub fn store(&self) -> Fallible<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| ImportError::format("package already closed"))
    }

    pub fn media_index(&self) -> &MediaIndex {
        &self.media
    }

    /// Read the bytes of a media file by its manifest filename.
    ///
    /// Returns `None` when the filename is not in the manifest or the
    /// archive entry is missing.
    pub fn read_media(&mut self, file_name: &str) -> Fallible<Option<Vec<u8>>> {
        let Some(archive) = self.archive.as_mut() else {
            return Ok(None);
        };
        let Some(locator) = self.media.by_name.get(file_name) else {
            return Ok(None);
        };
        match archive.by_name(locator) {
            Ok(mut entry) => {
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            Err(_) => Ok(None),
        }
    }

    /// Release the store connection, the archive handle, and the scratch
    /// directory. Safe to call more than once.
    pub fn close(&mut self) -> Fallible<()> {
        if let Some(conn) = self.conn.take() {
            // A failed close still drops the connection.
            let _ = conn.close();
        }
        self.archive.take();
        if let Some(tmp) = self.tmp.take() {
            tmp.close()?;
        }
        Ok(())
    }

    pub fn store_path(&self) -> &PathBuf {
        &self.store_path
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn copy_entry(mut entry: impl Read, path: &PathBuf) -> Fallible<()> {
    let mut out = File::create(path)?;
    std::io::copy(&mut entry, &mut out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;

    /// Build a minimal store file and return its bytes.
    fn store_bytes() -> Fallible<Vec<u8>> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("store.db");
        let conn = Connection::open(&path)?;
        conn.execute_batch("CREATE TABLE col (id INTEGER PRIMARY KEY, models TEXT);")?;
        conn.close().map_err(|(_, e)| ImportError::from(e))?;
        let bytes = std::fs::read(&path)?;
        Ok(bytes)
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Fallible<Vec<u8>> {
        let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in entries {
            zw.start_file(name.to_string(), SimpleFileOptions::default())?;
            zw.write_all(bytes)?;
        }
        let cursor = zw
            .finish()
            .map_err(|e| ImportError::format(format!("zip finish: {e}")))?;
        Ok(cursor.into_inner())
    }

    /// A plain current store payload opens and is queryable.
    #[test]
    fn test_open_plain_store() -> Fallible<()> {
        let store = store_bytes()?;
        let bytes = zip_with(&[(STORE_CURRENT, &store)])?;
        let mut pkg = Package::open(bytes)?;
        let n: i64 = pkg
            .store()?
            .query_row("SELECT COUNT(*) FROM col", [], |row| row.get(0))?;
        assert_eq!(n, 0);
        pkg.close()?;
        Ok(())
    }

    /// A legacy store payload is accepted when no current one exists.
    #[test]
    fn test_open_legacy_store() -> Fallible<()> {
        let store = store_bytes()?;
        let bytes = zip_with(&[(STORE_LEGACY, &store)])?;
        let mut pkg = Package::open(bytes)?;
        assert!(pkg.store().is_ok());
        pkg.close()?;
        Ok(())
    }

    /// A block-compressed payload is decompressed transparently and takes
    /// priority over the plain variants.
    #[test]
    fn test_open_compressed_store() -> Fallible<()> {
        let store = store_bytes()?;
        let compressed = zstd::stream::encode_all(store.as_slice(), 0)
            .map_err(|e| ImportError::format(format!("zstd encode: {e}")))?;
        let bytes = zip_with(&[(STORE_COMPRESSED, &compressed), (STORE_LEGACY, b"junk")])?;
        let mut pkg = Package::open(bytes)?;
        assert!(pkg.store().is_ok());
        pkg.close()?;
        Ok(())
    }

    /// A package with no recognized store entry is a format error.
    #[test]
    fn test_no_store_entry() -> Fallible<()> {
        let bytes = zip_with(&[("readme.txt", b"hello")])?;
        let result = Package::open(bytes);
        assert!(matches!(result, Err(ImportError::Format(_))));
        Ok(())
    }

    /// The media manifest is loaded; files are readable by filename.
    #[test]
    fn test_media_manifest() -> Fallible<()> {
        let store = store_bytes()?;
        let manifest = br#"{"0": "tone.mp3", "1": "photo.jpg"}"#;
        let bytes = zip_with(&[
            (STORE_CURRENT, &store),
            (MEDIA_MANIFEST, manifest),
            ("0", b"AUDIO"),
            ("1", b"IMAGE"),
        ])?;
        let mut pkg = Package::open(bytes)?;
        assert_eq!(pkg.media_index().len(), 2);
        assert_eq!(pkg.media_index().file_name("0"), Some("tone.mp3"));
        assert_eq!(pkg.read_media("tone.mp3")?, Some(b"AUDIO".to_vec()));
        assert_eq!(pkg.read_media("missing.png")?, None);
        pkg.close()?;
        Ok(())
    }

    /// A missing media manifest yields empty mappings, not an error.
    #[test]
    fn test_missing_manifest_is_empty() -> Fallible<()> {
        let store = store_bytes()?;
        let bytes = zip_with(&[(STORE_CURRENT, &store)])?;
        let pkg = Package::open(bytes)?;
        assert!(pkg.media_index().is_empty());
        Ok(())
    }

    /// Closing twice is fine, and the scratch directory is gone after.
    #[test]
    fn test_close_is_idempotent() -> Fallible<()> {
        let store = store_bytes()?;
        let bytes = zip_with(&[(STORE_CURRENT, &store)])?;
        let mut pkg = Package::open(bytes)?;
        let path = pkg.store_path().clone();
        assert!(path.exists());
        pkg.close()?;
        pkg.close()?;
        assert!(!path.exists());
        assert!(pkg.store().is_err());
        Ok(())
    }
}
