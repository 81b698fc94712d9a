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

//! Discovery, classification, deduplication, and upload of media
//! referenced from rendered HTML/CSS or raw field text.
//!
//! Failures here are per-reference: a missing file or a rejected upload
//! drops that one reference (emptied for inline tags, left literal in
//! CSS) and never aborts the import.

use std::collections::HashMap;
use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::catalog::MediaStore;
use crate::error::Fallible;

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "svg", "webp", "bmp", "avif"];
const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "wav", "ogg", "m4a", "flac", "opus", "aac"];
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "webm", "mov", "mkv", "avi"];

/// Font files referenced from stylesheets are never imported.
const FONT_EXTENSIONS: [&str; 5] = ["ttf", "otf", "woff", "woff2", "eot"];

/// The kind of a media file, as the destination classifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// A discovered media reference: the normalized locator plus its
/// classified kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub locator: String,
    pub kind: MediaKind,
}

/// Provides the raw bytes of a package-local media file by filename.
/// Each stream dialect backs this with its own storage.
pub trait MediaProvider {
    fn media_bytes(&mut self, file_name: &str) -> Fallible<Option<Vec<u8>>>;
}

/// Per-job cache of uploaded media: locator to uploaded id, plus a
/// content-hash map so identical bytes under different names upload once.
///
/// Passed by reference through the call chain; never process-global, so
/// concurrent jobs cannot cross-contaminate.
#[derive(Debug, Default)]
pub struct UploadCache {
    by_locator: HashMap<String, String>,
    by_hash: HashMap<String, String>,
}

impl UploadCache {
    pub fn new() -> Self {
        UploadCache::default()
    }

    pub fn len(&self) -> usize {
        self.by_locator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_locator.is_empty()
    }
}

fn sound_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[sound:([^\[\]]+)\]").unwrap())
}

fn src_dq_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(<(img|audio|video|source)\b[^>]*?src=")([^"]*)(")"#).unwrap()
    })
}

fn src_sq_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(<(img|audio|video|source)\b[^>]*?src=')([^']*)(')").unwrap()
    })
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"url\(\s*['"]?([^'"()]+?)['"]?\s*\)"#).unwrap())
}

/// Normalize a media locator: strip query/fragment, percent-decode,
/// strip a leading `./` or `/`. Idempotent.
pub fn normalize_locator(raw: &str) -> String {
    let mut s: &str = raw.trim();
    if let Some(idx) = s.find(['?', '#']) {
        s = &s[..idx];
    }
    let decoded: String = percent_decode_str(s)
        .decode_utf8()
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string());
    let stripped: &str = decoded
        .strip_prefix("./")
        .or_else(|| decoded.strip_prefix('/'))
        .unwrap_or(&decoded);
    stripped.to_string()
}

fn extension(locator: &str) -> Option<String> {
    let name: &str = locator.rsplit('/').next().unwrap_or(locator);
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

fn classify_by_extension(locator: &str) -> Option<MediaKind> {
    extension(locator).and_then(|ext| {
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Audio)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    })
}

/// Classify a locator by extension. A caller-supplied kind hint
/// overrides the extension.
pub fn classify(locator: &str, hint: Option<MediaKind>) -> MediaKind {
    hint.or_else(|| classify_by_extension(locator))
        .unwrap_or(MediaKind::Image)
}

/// The MIME type for a locator, by extension.
pub fn content_type(locator: &str) -> &'static str {
    match extension(locator).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

fn is_external(raw: &str) -> bool {
    raw.contains("://") || raw.starts_with("data:")
}

fn is_font(raw: &str) -> bool {
    extension(raw).is_some_and(|ext| FONT_EXTENSIONS.contains(&ext.as_str()))
}

fn kind_for_tag(tag: &str) -> MediaKind {
    match tag.to_lowercase().as_str() {
        "img" => MediaKind::Image,
        "audio" => MediaKind::Audio,
        _ => MediaKind::Video,
    }
}

/// Discover media references in text, in fixed non-overlapping order:
/// bracketed sound tokens, then inline `src` attributes, then CSS
/// `url(...)`. Absolute/data URIs and font files are skipped outright.
pub fn discover(text: &str) -> Vec<MediaRef> {
    let mut refs: Vec<MediaRef> = Vec::new();
    // The extension decides the kind; the surrounding markup only breaks
    // ties for unknown extensions.
    let mut push = |raw: &str, fallback: MediaKind| {
        if raw.trim().is_empty() || is_external(raw) || is_font(raw) {
            return;
        }
        let locator: String = normalize_locator(raw);
        if locator.is_empty() {
            return;
        }
        let kind: MediaKind = classify_by_extension(&locator).unwrap_or(fallback);
        let r = MediaRef { locator, kind };
        if !refs.contains(&r) {
            refs.push(r);
        }
    };
    for caps in sound_regex().captures_iter(text) {
        push(&caps[1], MediaKind::Audio);
    }
    for caps in src_dq_regex().captures_iter(text) {
        push(&caps[3], kind_for_tag(&caps[2]));
    }
    for caps in src_sq_regex().captures_iter(text) {
        push(&caps[3], kind_for_tag(&caps[2]));
    }
    for caps in css_url_regex().captures_iter(text) {
        push(&caps[1], MediaKind::Image);
    }
    refs
}

/// Remove media markup from a field value, leaving the plain text.
pub fn strip_media_tags(text: &str) -> String {
    let text = sound_regex().replace_all(text, "");
    static ELEMENT: OnceLock<Regex> = OnceLock::new();
    let element =
        ELEMENT.get_or_init(|| Regex::new(r"(?i)</?(img|audio|video|source)\b[^>]*>").unwrap());
    element.replace_all(&text, "").trim().to_string()
}

/// Resolves package media references into uploaded, content-addressed
/// ids, deduplicating through the per-job [`UploadCache`].
pub struct MediaResolver<'a> {
    provider: &'a mut dyn MediaProvider,
    store: &'a mut dyn MediaStore,
    cache: &'a mut UploadCache,
    owner_id: &'a str,
}

impl<'a> MediaResolver<'a> {
    pub fn new(
        provider: &'a mut dyn MediaProvider,
        store: &'a mut dyn MediaStore,
        cache: &'a mut UploadCache,
        owner_id: &'a str,
    ) -> Self {
        MediaResolver {
            provider,
            store,
            cache,
            owner_id,
        }
    }

    /// Resolve a normalized locator to an uploaded media id.
    ///
    /// A cache hit returns the cached id with no I/O. A miss reads the
    /// bytes from the provider and uploads once, retrying with just the
    /// base filename when the first attempt is rejected. `None` means the
    /// reference could not be resolved and should be dropped.
    pub fn resolve(&mut self, locator: &str, hint: Option<MediaKind>) -> Option<String> {
        if let Some(id) = self.cache.by_locator.get(locator) {
            return Some(id.clone());
        }
        let bytes: Vec<u8> = match self.read_bytes(locator) {
            Some(bytes) => bytes,
            None => {
                log::warn!("media file not found in package: {locator}");
                return None;
            }
        };
        let hash: String = blake3::hash(&bytes).to_hex().to_string();
        if let Some(id) = self.cache.by_hash.get(&hash) {
            let id = id.clone();
            self.cache.by_locator.insert(locator.to_string(), id.clone());
            return Some(id);
        }
        let kind: MediaKind = classify(locator, hint);
        let id: String = match self.upload(locator, kind, bytes) {
            Some(id) => id,
            None => return None,
        };
        self.cache.by_hash.insert(hash, id.clone());
        self.cache.by_locator.insert(locator.to_string(), id.clone());
        Some(id)
    }

    fn read_bytes(&mut self, locator: &str) -> Option<Vec<u8>> {
        match self.provider.media_bytes(locator) {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => {
                // Fall back to the bare filename for nested locators.
                let base: &str = locator.rsplit('/').next()?;
                if base == locator {
                    return None;
                }
                self.provider.media_bytes(base).ok().flatten()
            }
            Err(e) => {
                log::warn!("reading media {locator} failed: {e}");
                None
            }
        }
    }

    fn upload(&mut self, locator: &str, kind: MediaKind, bytes: Vec<u8>) -> Option<String> {
        let size: u64 = bytes.len() as u64;
        let ctype: &str = content_type(locator);
        match self
            .store
            .upload(self.owner_id, kind, ctype, locator, size, bytes.clone())
        {
            Ok(id) => Some(id),
            Err(first) => {
                let base: &str = locator.rsplit('/').next().unwrap_or(locator);
                if base == locator {
                    log::warn!("upload of {locator} failed: {first}");
                    return None;
                }
                match self.store.upload(self.owner_id, kind, ctype, base, size, bytes) {
                    Ok(id) => Some(id),
                    Err(second) => {
                        log::warn!("upload of {locator} failed twice: {first}; {second}");
                        None
                    }
                }
            }
        }
    }

    /// Rewrite every media reference in rendered HTML to its uploaded id.
    /// Unresolvable inline references are emptied.
    ///
    /// The `src`-attribute passes run before the sound-token pass: the
    /// tags emitted for sound tokens already carry uploaded ids and must
    /// not be re-matched as package locators.
    pub fn rewrite_html(&mut self, html: &str) -> String {
        let pass1 = self.rewrite_src(html, src_dq_regex());
        let pass2 = self.rewrite_src(&pass1, src_sq_regex());
        sound_regex()
            .replace_all(&pass2, |caps: &regex::Captures| {
                let locator: String = normalize_locator(&caps[1]);
                let kind: MediaKind =
                    classify_by_extension(&locator).unwrap_or(MediaKind::Audio);
                match self.resolve(&locator, Some(kind)) {
                    Some(id) => match kind {
                        MediaKind::Video => format!("<video controls src=\"{id}\"></video>"),
                        _ => format!("<audio controls src=\"{id}\"></audio>"),
                    },
                    None => String::new(),
                }
            })
            .to_string()
    }

    fn rewrite_src(&mut self, html: &str, re: &Regex) -> String {
        re.replace_all(html, |caps: &regex::Captures| {
            let raw: &str = &caps[3];
            if is_external(raw) {
                return caps[0].to_string();
            }
            let locator: String = normalize_locator(raw);
            let hint: MediaKind = kind_for_tag(&caps[2]);
            match self.resolve(&locator, Some(hint)) {
                Some(id) => format!("{}{}{}", &caps[1], id, &caps[4]),
                None => format!("{}{}", &caps[1], &caps[4]),
            }
        })
        .to_string()
    }

    /// Rewrite `url(...)` references in a stylesheet. Unresolvable ones
    /// are left literal.
    pub fn rewrite_css(&mut self, css: &str) -> String {
        css_url_regex()
            .replace_all(css, |caps: &regex::Captures| {
                let raw: &str = &caps[1];
                if is_external(raw) || is_font(raw) {
                    return caps[0].to_string();
                }
                let locator: String = normalize_locator(raw);
                match self.resolve(&locator, None) {
                    Some(id) => format!("url(\"{id}\")"),
                    None => caps[0].to_string(),
                }
            })
            .to_string()
    }
}
