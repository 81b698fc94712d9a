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

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Fallible;
use crate::error::ImportError;
use crate::model::resolve_field_name;

/// A display template for one model: front/back markup plus stylesheet.
///
/// Recovered either from metadata JSON or from a binary configuration
/// blob; may be absent entirely, in which case cards fall back to
/// unstructured fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateConfig {
    pub front: String,
    pub back: String,
    pub stylesheet: String,
}

/// Field names with special meaning inside templates. These never resolve
/// to note fields.
const BUILTIN_TOKENS: [&str; 7] = [
    "FrontSide", "Tags", "Type", "Deck", "Subdeck", "Card", "Flags",
];

/// The front/back field-ordering hint derived from decoded templates.
///
/// This is a hint only, never authoritative: it suggests which fields the
/// origin put on which side, in first-encounter order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportLayout {
    pub front_fields: Vec<String>,
    pub back_fields: Vec<String>,
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap())
}

/// Decode a binary template-configuration blob.
///
/// This is a heuristic reader for one known encoder, not a general
/// decoder: it walks the blob as a length-prefixed tag stream (varint
/// key, wire type in the low three bits) and captures length-delimited
/// UTF-8 payloads that contain `{{`. The first such string is taken as
/// the front template, the second as the back. Everything else is
/// skipped by wire type.
pub fn decode_template_blob(blob: &[u8]) -> Fallible<TemplateConfig> {
    let mut pos: usize = 0;
    let mut captured: Vec<String> = Vec::new();
    while pos < blob.len() {
        let key = read_varint(blob, &mut pos)
            .ok_or_else(|| ImportError::decode("truncated key varint"))?;
        let wire_type = key & 0x07;
        match wire_type {
            // Varint.
            0 => {
                read_varint(blob, &mut pos)
                    .ok_or_else(|| ImportError::decode("truncated varint value"))?;
            }
            // 64-bit.
            1 => {
                pos = checked_skip(blob, pos, 8)?;
            }
            // Length-delimited.
            2 => {
                let len = read_varint(blob, &mut pos)
                    .ok_or_else(|| ImportError::decode("truncated length varint"))?
                    as usize;
                let end = pos
                    .checked_add(len)
                    .filter(|end| *end <= blob.len())
                    .ok_or_else(|| ImportError::decode("length-delimited field overruns blob"))?;
                if captured.len() < 2 {
                    if let Ok(text) = std::str::from_utf8(&blob[pos..end]) {
                        if text.contains("{{") {
                            captured.push(text.to_string());
                        }
                    }
                }
                pos = end;
            }
            // 32-bit.
            5 => {
                pos = checked_skip(blob, pos, 4)?;
            }
            other => {
                return Err(ImportError::decode(format!("unknown wire type {other}")));
            }
        }
    }
    if captured.is_empty() {
        return Err(ImportError::decode("no template strings in blob"));
    }
    let mut captured = captured.into_iter();
    let front: String = captured.next().unwrap_or_default();
    let back: String = captured.next().unwrap_or_default();
    Ok(TemplateConfig {
        front,
        back,
        stylesheet: String::new(),
    })
}

fn read_varint(blob: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = *blob.get(*pos)?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

fn checked_skip(blob: &[u8], pos: usize, n: usize) -> Fallible<usize> {
    pos.checked_add(n)
        .filter(|end| *end <= blob.len())
        .ok_or_else(|| ImportError::decode("fixed-width field overruns blob"))
}

/// Extract the raw field names referenced by a template.
///
/// Strips conditional markers (`#`, `^`, `/`) and filter prefixes,
/// discards built-in tokens, and returns names in first-encounter order
/// without duplicates.
pub fn extract_field_tokens(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in token_regex().captures_iter(template) {
        let mut token: &str = capture[1].trim();
        while let Some(stripped) = token
            .strip_prefix('#')
            .or_else(|| token.strip_prefix('^'))
            .or_else(|| token.strip_prefix('/'))
        {
            token = stripped.trim();
        }
        // Filters prefix the name, e.g. `furigana:Reading`. Split at the
        // first colon, exactly as the renderer does.
        let name: &str = match token.split_once(':') {
            Some((_, name)) => name.trim(),
            None => token,
        };
        if name.is_empty() {
            continue;
        }
        if BUILTIN_TOKENS.contains(&name) {
            continue;
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Derive the front/back layout hint from every decoded template config,
/// resolved against the unified field vocabulary.
///
/// Returns `None` when no template yields a single resolvable token:
/// absence of a layout is a valid outcome, not an error.
pub fn derive_layout(configs: &[&TemplateConfig], vocabulary: &[String]) -> Option<ImportLayout> {
    let mut front_fields: Vec<String> = Vec::new();
    let mut back_fields: Vec<String> = Vec::new();
    for config in configs {
        accumulate_side(&config.front, vocabulary, &mut front_fields);
        accumulate_side(&config.back, vocabulary, &mut back_fields);
    }
    if front_fields.is_empty() && back_fields.is_empty() {
        return None;
    }
    Some(ImportLayout {
        front_fields,
        back_fields,
    })
}

fn accumulate_side(template: &str, vocabulary: &[String], side: &mut Vec<String>) {
    for token in extract_field_tokens(template) {
        if let Some(canonical) = resolve_field_name(&token, vocabulary) {
            if !side.iter().any(|f| *f == canonical) {
                side.push(canonical);
            }
        }
    }
}
