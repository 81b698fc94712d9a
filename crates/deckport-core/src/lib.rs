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

//! deckport-core: Core library for the deckport flashcard-package
//! import engine.
//!
//! This library provides:
//! - Container decoding for legacy binary packages (zip + relational
//!   store), zip packs, and single-file embedded stores
//! - Note-model and display-template recovery, including the binary
//!   template-blob reader
//! - A mustache-like template renderer producing static HTML
//! - Media discovery, deduplication, and upload through a pluggable
//!   storage boundary
//! - Legacy scheduling to progress inference
//! - The batched import orchestrator

pub mod catalog;
pub mod error;
pub mod import;
pub mod media;
pub mod model;
pub mod package;
pub mod progress;
pub mod render;
pub mod stream;
pub mod template;

// Re-exports for convenience
pub use catalog::{CardCatalog, CardContent, JobReporter, MediaStore, NullReporter};
pub use error::{Fallible, ImportError};
pub use import::{ImportOptions, ImportOutcome, Importer, PLACEHOLDER_NOTICE};
pub use media::{MediaKind, MediaProvider, MediaRef, UploadCache};
pub use progress::LegacyProgress;
pub use render::{Side, render};
pub use stream::{Dialect, ImportRecord, RecordSource};
pub use template::{ImportLayout, TemplateConfig};
