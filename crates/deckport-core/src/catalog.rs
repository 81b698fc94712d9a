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

//! The boundary to the destination system: card catalog, media storage,
//! and job counters. The engine only knows these traits; the services
//! behind them are external collaborators.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::error::Fallible;
use crate::media::MediaKind;

/// The destination's field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    RichText,
    Markdown,
    Cloze,
    Image,
    Audio,
    Video,
}

impl FieldType {
    /// The media kind a field of this type holds, if any.
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            FieldType::Image => Some(MediaKind::Image),
            FieldType::Audio => Some(MediaKind::Audio),
            FieldType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn is_media(&self) -> bool {
        self.media_kind().is_some()
    }
}

/// A field of the destination template. Read-only input when merging
/// into an existing deck; proposed by the engine when creating a new one.
#[derive(Debug, Clone, Serialize)]
pub struct TargetFieldTemplate {
    pub name: String,
    pub field_type: FieldType,
    pub is_required: bool,
    pub is_on_front: bool,
    pub order_index: u32,
}

/// The rendered-template sub-object attached to card content when the
/// source record carried a display template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedCard {
    pub front: String,
    pub back: String,
    pub stylesheet: String,
}

/// Destination-shaped content for one card. Written once to the catalog,
/// never mutated afterward.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CardContent {
    /// Destination field name to value. Sorted for deterministic output.
    pub fields: BTreeMap<String, String>,
    /// Reserved sub-object carrying the rendered template, if any.
    #[serde(rename = "_rendered", skip_serializing_if = "Option::is_none")]
    pub rendered: Option<RenderedCard>,
}

/// What the catalog returns for each created card, in request order.
#[derive(Debug, Clone)]
pub struct CardDescriptor {
    pub card_id: String,
}

/// The result of creating a destination template.
#[derive(Debug, Clone)]
pub struct TemplateDescriptor {
    pub template_id: String,
    pub field_ids: Vec<String>,
}

/// One progress-seed entry, positionally matched to a created card.
#[derive(Debug, Clone)]
pub struct ProgressSeed {
    pub card_id: String,
    pub difficulty: f64,
    pub stability_days: f64,
    pub review_count: u32,
    pub last_reviewed_at: DateTime<Utc>,
    pub next_due_at: DateTime<Utc>,
    pub suspended: bool,
}

/// The destination catalog service.
///
/// `batch_create_cards` is order-preserving: the returned descriptors
/// line up with the submitted content list.
pub trait CardCatalog {
    fn create_template(
        &mut self,
        name: &str,
        description: &str,
        layout_doc: serde_json::Value,
        fields: &[TargetFieldTemplate],
    ) -> Fallible<TemplateDescriptor>;

    fn create_deck(&mut self, name: &str, template_id: &str) -> Fallible<String>;

    fn batch_create_cards(
        &mut self,
        deck_id: &str,
        content: Vec<CardContent>,
    ) -> Fallible<Vec<CardDescriptor>>;

    fn seed_progress(&mut self, deck_id: &str, seeds: Vec<ProgressSeed>) -> Fallible<()>;
}

/// The media storage service. Returns a stable, content-addressed id.
pub trait MediaStore {
    fn upload(
        &mut self,
        owner_id: &str,
        kind: MediaKind,
        content_type: &str,
        file_name: &str,
        size: u64,
        bytes: Vec<u8>,
    ) -> Fallible<String>;
}

/// Best-effort progress counters for external observability. Failures
/// here are swallowed by implementations; the import never depends on
/// them.
pub trait JobReporter {
    fn update_processed(&mut self, n: usize);
    fn update_total(&mut self, n: usize);
}

/// A reporter that drops every update.
pub struct NullReporter;

impl JobReporter for NullReporter {
    fn update_processed(&mut self, _n: usize) {}
    fn update_total(&mut self, _n: usize) {}
}
