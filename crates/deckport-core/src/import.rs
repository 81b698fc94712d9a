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

//! The import orchestrator: drives one record stream to completion,
//! assembling destination content per record and flushing it in batches.
//!
//! Single-threaded and single-pass. Collaborator failures propagate
//! uncaught; there is no retry and no resume state. The stream is closed
//! on every exit path.

use std::collections::HashMap;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde_json::json;

use crate::catalog::CardCatalog;
use crate::catalog::CardContent;
use crate::catalog::CardDescriptor;
use crate::catalog::FieldType;
use crate::catalog::JobReporter;
use crate::catalog::MediaStore;
use crate::catalog::ProgressSeed;
use crate::catalog::RenderedCard;
use crate::catalog::TargetFieldTemplate;
use crate::error::Fallible;
use crate::error::ImportError;
use crate::media::MediaResolver;
use crate::media::UploadCache;
use crate::media::discover;
use crate::media::strip_media_tags;
use crate::model::resolve_field_name;
use crate::progress::LegacyProgress;
use crate::render::Side;
use crate::render::render;
use crate::stream::ImportRecord;
use crate::stream::RecordSource;
use crate::template::ImportLayout;

/// The notice some exporters substitute for card content they cannot
/// represent. A record whose every non-blank field equals this string
/// carries nothing worth importing.
pub const PLACEHOLDER_NOTICE: &str =
    "This card uses a feature that could not be exported.";

const DEFAULT_BATCH_SIZE: usize = 50;

/// Caller-supplied settings for one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub deck_name: String,
    pub description: String,
    pub batch_size: usize,
    /// The destination's ordered field list when merging into an
    /// existing deck. `None` means create a new deck with a proposed
    /// field list.
    pub target_fields: Option<Vec<TargetFieldTemplate>>,
    /// Explicit destination-field to source-field mapping. Unmapped
    /// destination fields fall back to normalized-name equality.
    pub mapping: Option<HashMap<String, String>>,
    pub existing_deck_id: Option<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            deck_name: "Imported deck".to_string(),
            description: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            target_fields: None,
            mapping: None,
            existing_deck_id: None,
        }
    }
}

/// What one finished run produced.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub deck_id: String,
    pub created: usize,
    pub processed: usize,
    pub skipped: usize,
}

/// One configured import run.
pub struct Importer {
    options: ImportOptions,
}

impl Importer {
    pub fn new(options: ImportOptions) -> Self {
        Importer { options }
    }

    /// Consume the stream and write every importable record to the
    /// catalog. The stream is closed whether the run succeeds or fails.
    pub fn run(
        &self,
        source: &mut dyn RecordSource,
        catalog: &mut dyn CardCatalog,
        media_store: &mut dyn MediaStore,
        reporter: &mut dyn JobReporter,
    ) -> Fallible<ImportOutcome> {
        let result: Fallible<ImportOutcome> =
            self.drive(source, catalog, media_store, reporter);
        let close_result: Fallible<()> = source.close();
        let outcome: ImportOutcome = result?;
        close_result?;
        Ok(outcome)
    }

    fn drive(
        &self,
        source: &mut dyn RecordSource,
        catalog: &mut dyn CardCatalog,
        media_store: &mut dyn MediaStore,
        reporter: &mut dyn JobReporter,
    ) -> Fallible<ImportOutcome> {
        if let Some(total) = source.total_records() {
            reporter.update_total(total);
        }

        let targets: Vec<TargetFieldTemplate>;
        let deck_id: String;
        match (&self.options.existing_deck_id, &self.options.target_fields) {
            (Some(existing), Some(fields)) => {
                deck_id = existing.clone();
                targets = fields.clone();
            }
            (Some(_), None) => {
                return Err(ImportError::format(
                    "merging into an existing deck requires its field list",
                ));
            }
            (None, _) => {
                targets = propose_fields(source.fields(), source.layout());
                let descriptor = catalog.create_template(
                    &self.options.deck_name,
                    &self.options.description,
                    layout_doc(&targets),
                    &targets,
                )?;
                deck_id =
                    catalog.create_deck(&self.options.deck_name, &descriptor.template_id)?;
            }
        }

        let bindings: Vec<(TargetFieldTemplate, Option<usize>)> = targets
            .into_iter()
            .map(|target| {
                let index: Option<usize> =
                    source_index(&target.name, self.options.mapping.as_ref(), source.fields());
                (target, index)
            })
            .collect();

        let batch_size: usize = self.options.batch_size.max(1);
        let source_fields: Vec<String> = source.fields().to_vec();
        let mut cache: UploadCache = UploadCache::new();
        let mut pending: Vec<(CardContent, Option<LegacyProgress>)> = Vec::new();
        let mut processed: usize = 0;
        let mut skipped: usize = 0;
        let mut created: usize = 0;

        while let Some(record) = source.next_record()? {
            processed += 1;
            if is_placeholder(&record) {
                skipped += 1;
                continue;
            }
            let mut resolver =
                MediaResolver::new(&mut *source, media_store, &mut cache, &deck_id);
            let content: CardContent =
                assemble(&record, &source_fields, &bindings, &mut resolver);
            if content.fields.is_empty() && content.rendered.is_none() {
                skipped += 1;
                continue;
            }
            pending.push((content, record.progress));
            if pending.len() >= batch_size {
                created += flush(catalog, &deck_id, &mut pending)?;
                reporter.update_processed(processed);
            }
        }
        if !pending.is_empty() {
            created += flush(catalog, &deck_id, &mut pending)?;
        }
        reporter.update_processed(processed);
        log::info!(
            "import finished: {} created, {} skipped of {} processed",
            created,
            skipped,
            processed
        );

        Ok(ImportOutcome {
            deck_id,
            created,
            processed,
            skipped,
        })
    }
}

/// Propose a destination field list for a new deck: one rich-text field
/// per unified source field, fronted per the layout hint (or just the
/// first field when no hint was recovered).
fn propose_fields(fields: &[String], layout: Option<&ImportLayout>) -> Vec<TargetFieldTemplate> {
    fields
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let is_on_front: bool = match layout {
                Some(layout) => layout.front_fields.iter().any(|f| f == name),
                None => i == 0,
            };
            TargetFieldTemplate {
                name: name.clone(),
                field_type: FieldType::RichText,
                is_required: false,
                is_on_front,
                order_index: i as u32,
            }
        })
        .collect()
}

fn layout_doc(targets: &[TargetFieldTemplate]) -> serde_json::Value {
    let front: Vec<&str> = targets
        .iter()
        .filter(|t| t.is_on_front)
        .map(|t| t.name.as_str())
        .collect();
    let back: Vec<&str> = targets
        .iter()
        .filter(|t| !t.is_on_front)
        .map(|t| t.name.as_str())
        .collect();
    json!({ "front": front, "back": back })
}

/// Resolve a destination field to a source field index: the explicit
/// mapping when one names it, else normalized-name equality.
fn source_index(
    dest: &str,
    mapping: Option<&HashMap<String, String>>,
    source_fields: &[String],
) -> Option<usize> {
    let wanted: &str = mapping
        .and_then(|m| m.get(dest))
        .map(String::as_str)
        .unwrap_or(dest);
    let canonical: String = resolve_field_name(wanted, source_fields)?;
    source_fields.iter().position(|f| *f == canonical)
}

fn is_placeholder(record: &ImportRecord) -> bool {
    let mut any: bool = false;
    for value in &record.fields {
        let trimmed: &str = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed != PLACEHOLDER_NOTICE {
            return false;
        }
        any = true;
    }
    any
}

fn assemble(
    record: &ImportRecord,
    source_fields: &[String],
    bindings: &[(TargetFieldTemplate, Option<usize>)],
    resolver: &mut MediaResolver<'_>,
) -> CardContent {
    let by_name: HashMap<String, String> = source_fields
        .iter()
        .cloned()
        .zip(record.fields.iter().cloned())
        .collect();

    let mut content: CardContent = CardContent::default();
    for (target, index) in bindings {
        let Some(index) = index else {
            continue;
        };
        let Some(value) = record.fields.get(*index) else {
            continue;
        };
        match target.field_type.media_kind() {
            None => {
                let cleaned: String = strip_media_tags(value);
                if !cleaned.is_empty() {
                    content.fields.insert(target.name.clone(), cleaned);
                }
            }
            Some(kind) => {
                // Prefer a reference inside the mapped value; fall back
                // to anything of the right kind elsewhere in the record.
                let mut refs = discover(value);
                if !refs.iter().any(|r| r.kind == kind) {
                    refs = discover(&record.fields.join(" "));
                }
                let Some(media_ref) = refs.into_iter().find(|r| r.kind == kind) else {
                    continue;
                };
                if let Some(id) = resolver.resolve(&media_ref.locator, Some(kind)) {
                    content.fields.insert(target.name.clone(), id);
                }
            }
        }
    }

    if let Some(template) = &record.template {
        let front: String = render(&template.front, &by_name, Side::Front, None);
        let back: String = render(&template.back, &by_name, Side::Back, Some(&front));
        content.rendered = Some(RenderedCard {
            front: resolver.rewrite_html(&front),
            back: resolver.rewrite_html(&back),
            stylesheet: resolver.rewrite_css(&template.stylesheet),
        });
    }
    content
}

/// Write one batch and positionally seed progress for the cards that
/// carried it.
fn flush(
    catalog: &mut dyn CardCatalog,
    deck_id: &str,
    pending: &mut Vec<(CardContent, Option<LegacyProgress>)>,
) -> Fallible<usize> {
    let batch: Vec<(CardContent, Option<LegacyProgress>)> = std::mem::take(pending);
    let (contents, progress): (Vec<CardContent>, Vec<Option<LegacyProgress>>) =
        batch.into_iter().unzip();
    let descriptors: Vec<CardDescriptor> = catalog.batch_create_cards(deck_id, contents)?;

    let now: DateTime<Utc> = Utc::now();
    let seeds: Vec<ProgressSeed> = descriptors
        .iter()
        .zip(progress)
        .filter_map(|(descriptor, progress)| {
            let progress: LegacyProgress = progress?;
            let due_seconds: i64 = (progress.stability_days * 86_400.0) as i64;
            Some(ProgressSeed {
                card_id: descriptor.card_id.clone(),
                difficulty: progress.difficulty,
                stability_days: progress.stability_days,
                review_count: progress.review_count,
                last_reviewed_at: now,
                next_due_at: now + Duration::seconds(due_seconds),
                suspended: progress.suspended,
            })
        })
        .collect();
    if !seeds.is_empty() {
        catalog.seed_progress(deck_id, seeds)?;
    }
    Ok(descriptors.len())
}
