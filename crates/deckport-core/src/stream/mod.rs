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

//! The pull-based record stream shared by all package dialects.

pub mod anki;
pub mod pack;
pub mod store;

use std::str::FromStr;

use crate::error::Fallible;
use crate::error::ImportError;
use crate::media::MediaProvider;
use crate::progress::LegacyProgress;
use crate::template::ImportLayout;
use crate::template::TemplateConfig;

/// One normalized source record.
///
/// Field values are in the stream's unified field order, with missing
/// fields as empty strings. Immutable once yielded; discarded after
/// content assembly.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub fields: Vec<String>,
    pub progress: Option<LegacyProgress>,
    pub template: Option<TemplateConfig>,
    pub order_index: usize,
}

/// A forward-only stream of records out of one opened package.
///
/// `fields` is stable for the stream's lifetime. `total_records` is best
/// effort and for display only. `close` is idempotent and releases the
/// underlying container on every exit path; it also runs on drop.
///
/// The `MediaProvider` supertrait exposes the package-local media files
/// the records refer to.
pub trait RecordSource: MediaProvider {
    fn fields(&self) -> &[String];
    fn total_records(&self) -> Option<usize>;
    /// The front/back ordering hint derived from the package's decoded
    /// templates, when any could be recovered.
    fn layout(&self) -> Option<&ImportLayout>;
    fn next_record(&mut self) -> Fallible<Option<ImportRecord>>;
    fn close(&mut self) -> Fallible<()>;
}

/// The declared dialect of an uploaded package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Legacy binary package: compressed container around a relational
    /// store.
    Anki,
    /// Delimited-records-plus-manifest zip package.
    Pack,
    /// Single-file embedded-store package.
    Store,
}

impl FromStr for Dialect {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anki" => Ok(Dialect::Anki),
            "pack" => Ok(Dialect::Pack),
            "store" => Ok(Dialect::Store),
            other => Err(ImportError::format(format!("unknown dialect: {other}"))),
        }
    }
}

/// Open a record stream over raw package bytes.
pub fn open(bytes: Vec<u8>, dialect: Dialect) -> Fallible<Box<dyn RecordSource>> {
    match dialect {
        Dialect::Anki => Ok(Box::new(anki::AnkiSource::open(bytes)?)),
        Dialect::Pack => Ok(Box::new(pack::PackSource::open(bytes)?)),
        Dialect::Store => Ok(Box::new(store::StoreSource::open(bytes)?)),
    }
}
