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

//! A small template-expansion engine reproducing card layout without the
//! origin renderer.
//!
//! Rendering never fails: malformed templates degrade to partial output.
//! Unbalanced conditional tags stay literal, unknown fields substitute
//! empty, unknown filters pass the value through.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::normalize_field_name;

/// Which side of the card is being rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Side {
    Front,
    Back,
}

/// The token substituting the caller-supplied front render on the back.
const FRONT_REFERENCE: &str = "FrontSide";

/// Tokens that always substitute empty.
const RESERVED_TOKENS: [&str; 6] = ["Tags", "Type", "Deck", "Subdeck", "Card", "Flags"];

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap())
}

fn cloze_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{c\d+::(.+?)\}\}").unwrap())
}

fn tag_strip_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^<>]*>").unwrap())
}

fn furigana_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" ?([^ \[\]<>]+)\[([^\[\];]+)\]").unwrap())
}

fn inline_reading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" ?([^ \[\];<>]+)\[([^\[\];]+);[^\[\]]*\]").unwrap())
}

/// Expand a template into static HTML.
///
/// `front_render` is the already-rendered front side; it is substituted
/// for the front-reference keyword when rendering the back.
pub fn render(
    template: &str,
    fields: &HashMap<String, String>,
    side: Side,
    front_render: Option<&str>,
) -> String {
    let reduced: String = reduce_conditionals(template, fields);
    let substituted: String = substitute_tokens(&reduced, fields, side, front_render);
    substituted.replace('\n', "<br>")
}

/// Look up a field value, exact name first, then normalized.
fn lookup<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    if let Some(value) = fields.get(name) {
        return Some(value.as_str());
    }
    let normalized = normalize_field_name(name);
    fields
        .iter()
        .find(|(k, _)| normalize_field_name(k) == normalized)
        .map(|(_, v)| v.as_str())
}

fn is_blank(fields: &HashMap<String, String>, name: &str) -> bool {
    lookup(fields, name).is_none_or(|v| v.trim().is_empty())
}

/// Repeatedly scan-and-replace conditional sections until a pass makes
/// no change. Nesting is handled by the iterative reduction; a tag with
/// no matching closer is left literal.
fn reduce_conditionals(template: &str, fields: &HashMap<String, String>) -> String {
    let mut text: String = template.to_string();
    loop {
        match reduce_one(&text, fields) {
            Some(next) => text = next,
            None => return text,
        }
    }
}

/// Replace the first conditional section that has a matching closer.
/// Returns `None` when nothing changed.
fn reduce_one(text: &str, fields: &HashMap<String, String>) -> Option<String> {
    let mut search_from: usize = 0;
    loop {
        let hash = text[search_from..].find("{{#").map(|i| i + search_from);
        let caret = text[search_from..].find("{{^").map(|i| i + search_from);
        let start: usize = match (hash, caret) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        let positive: bool = text[start..].starts_with("{{#");
        let Some(name_end) = text[start..].find("}}").map(|i| i + start) else {
            return None;
        };
        let name: &str = text[start + 3..name_end].trim();
        let body_start: usize = name_end + 2;
        let closer: String = format!("{{{{/{name}}}}}");
        let Some(body_end) = text[body_start..].find(&closer).map(|i| i + body_start) else {
            // Unbalanced: leave this tag literal and keep scanning.
            search_from = body_start;
            continue;
        };
        let include: bool = if positive {
            !is_blank(fields, name)
        } else {
            is_blank(fields, name)
        };
        let body: &str = if include {
            &text[body_start..body_end]
        } else {
            ""
        };
        let mut next: String =
            String::with_capacity(text.len() - (closer.len() + body_start - start));
        next.push_str(&text[..start]);
        next.push_str(body);
        next.push_str(&text[body_end + closer.len()..]);
        return Some(next);
    }
}

fn substitute_tokens(
    text: &str,
    fields: &HashMap<String, String>,
    side: Side,
    front_render: Option<&str>,
) -> String {
    token_regex()
        .replace_all(text, |caps: &regex::Captures| {
            let token: &str = caps[1].trim();
            // Leftover conditional tags from unbalanced input stay literal.
            if token.starts_with('#') || token.starts_with('^') || token.starts_with('/') {
                return caps[0].to_string();
            }
            if token == FRONT_REFERENCE {
                return match side {
                    Side::Back => front_render.unwrap_or("").to_string(),
                    Side::Front => String::new(),
                };
            }
            if RESERVED_TOKENS.contains(&token) {
                return String::new();
            }
            let (filter, name): (Option<&str>, &str) = match token.split_once(':') {
                Some((filter, name)) => (Some(filter.trim()), name.trim()),
                None => (None, token),
            };
            let value: String = lookup(fields, name).unwrap_or("").to_string();
            let filtered: String = match filter {
                Some("furigana") => furigana_ruby(&value),
                Some("text") | Some("type") => strip_tags(&value),
                Some("cloze") => render_cloze(&value, side),
                _ => value,
            };
            normalize_inline_readings(&filtered)
        })
        .to_string()
}

/// Convert bracket-reading notation (`漢字[かんじ]`) into ruby markup.
/// A leading space delimits the start of the base text and is consumed.
fn furigana_ruby(value: &str) -> String {
    furigana_regex()
        .replace_all(value, "<ruby>$1<rt>$2</rt></ruby>")
        .to_string()
}

/// Always-on normalization of the alternate inline reading syntax,
/// `base[reading;annotation]`, into the same ruby markup. The annotation
/// after the semicolon is dropped.
fn normalize_inline_readings(value: &str) -> String {
    inline_reading_regex()
        .replace_all(value, "<ruby>$1<rt>$2</rt></ruby>")
        .to_string()
}

/// Strip markup tags from a value.
fn strip_tags(value: &str) -> String {
    tag_strip_regex().replace_all(value, "").to_string()
}

/// Render cloze deletions: a masked placeholder on the front, the literal
/// answer on the back. All numbered groups are masked and revealed
/// together, regardless of group number.
fn render_cloze(value: &str, side: Side) -> String {
    cloze_regex()
        .replace_all(value, |caps: &regex::Captures| {
            let inner: &str = &caps[1];
            let (answer, hint): (&str, Option<&str>) = match inner.split_once("::") {
                Some((answer, hint)) => (answer, Some(hint)),
                None => (inner, None),
            };
            match side {
                Side::Front => {
                    let mask: &str = hint.unwrap_or("...");
                    format!("<span class='cloze'>[{mask}]</span>")
                }
                Side::Back => format!("<span class='cloze-reveal'>{answer}</span>"),
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Plain token substitution, with unknown fields going empty.
    #[test]
    fn test_substitution() {
        let f = fields(&[("Front", "hello"), ("Back", "world")]);
        assert_eq!(render("{{Front}} / {{Back}}", &f, Side::Front, None), "hello / world");
        assert_eq!(render("{{Missing}}!", &f, Side::Front, None), "!");
    }

    /// Field lookup falls back to normalized-name matching.
    #[test]
    fn test_normalized_lookup() {
        let f = fields(&[("Front", "hello")]);
        assert_eq!(render("{{ front }}", &f, Side::Front, None), "hello");
    }

    /// Positive and negative conditionals react to field blankness.
    #[test]
    fn test_conditionals() {
        let template = "{{#A}}X{{/A}}{{^A}}Y{{/A}}";
        let blank = fields(&[("A", "")]);
        assert_eq!(render(template, &blank, Side::Front, None), "Y");
        let set = fields(&[("A", "v")]);
        assert_eq!(render(template, &set, Side::Front, None), "X");
    }

    /// Nested conditionals reduce iteratively.
    #[test]
    fn test_nested_conditionals() {
        let template = "{{#A}}a{{#B}}b{{/B}}{{/A}}";
        let f = fields(&[("A", "x"), ("B", "")]);
        assert_eq!(render(template, &f, Side::Front, None), "a");
        let f = fields(&[("A", "x"), ("B", "y")]);
        assert_eq!(render(template, &f, Side::Front, None), "ab");
    }

    /// An unbalanced conditional tag is left literal.
    #[test]
    fn test_unbalanced_tag_stays_literal() {
        let f = fields(&[("A", "x")]);
        assert_eq!(render("{{#A}}no closer", &f, Side::Front, None), "{{#A}}no closer");
    }

    /// The front-reference keyword substitutes the front render, back
    /// side only.
    #[test]
    fn test_front_reference() {
        let f = fields(&[("Back", "answer")]);
        let back = render("{{FrontSide}}<hr>{{Back}}", &f, Side::Back, Some("question"));
        assert_eq!(back, "question<hr>answer");
        let front = render("{{FrontSide}}x", &f, Side::Front, Some("question"));
        assert_eq!(front, "x");
    }

    /// Reserved words substitute empty.
    #[test]
    fn test_reserved_words() {
        let f = fields(&[]);
        assert_eq!(render("[{{Tags}}{{Deck}}]", &f, Side::Front, None), "[]");
    }

    /// The text filter strips markup.
    #[test]
    fn test_text_filter() {
        let f = fields(&[("Front", "<b>bold</b> move")]);
        assert_eq!(render("{{text:Front}}", &f, Side::Front, None), "bold move");
    }

    /// The furigana filter converts bracket readings into ruby markup.
    #[test]
    fn test_furigana_filter() {
        let f = fields(&[("Reading", "日本[にほん]の 言葉[ことば]")]);
        assert_eq!(
            render("{{furigana:Reading}}", &f, Side::Front, None),
            "<ruby>日本<rt>にほん</rt></ruby>の<ruby>言葉<rt>ことば</rt></ruby>"
        );
    }

    /// The alternate inline reading syntax normalizes everywhere, with
    /// the annotation dropped and no residual bracket marker.
    #[test]
    fn test_inline_reading_normalization() {
        let f = fields(&[("Word", "日本語[にほんご;japanese]")]);
        assert_eq!(
            render("{{Word}}", &f, Side::Front, None),
            "<ruby>日本語<rt>にほんご</rt></ruby>"
        );
    }

    /// Cloze markers mask the answer on the front and reveal it on the
    /// back, hint or not.
    #[test]
    fn test_cloze_filter() {
        let f = fields(&[("Text", "{{c1::Tokyo::capital}} is in {{c2::Japan}}")]);
        let front = render("{{cloze:Text}}", &f, Side::Front, None);
        assert!(!front.contains("Tokyo"));
        assert!(front.contains("<span class='cloze'>[capital]</span>"));
        assert!(front.contains("<span class='cloze'>[...]</span>"));
        let back = render("{{cloze:Text}}", &f, Side::Back, None);
        assert!(back.contains("<span class='cloze-reveal'>Tokyo</span>"));
        assert!(back.contains("<span class='cloze-reveal'>Japan</span>"));
    }

    /// Newlines become line breaks.
    #[test]
    fn test_newlines() {
        let f = fields(&[("Front", "a\nb")]);
        assert_eq!(render("{{Front}}", &f, Side::Front, None), "a<br>b");
    }
}
