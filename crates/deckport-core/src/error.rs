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

use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::string::FromUtf8Error;

/// Errors produced while importing a package.
///
/// Only `Format` is fatal by construction: it means the package itself is
/// unusable (no store entry, no resolvable field model) and nothing has
/// been written. `Collaborator` wraps failures from the destination
/// catalog or media storage; those propagate uncaught because retrying is
/// the job scheduler's responsibility, not ours.
#[derive(Debug)]
pub enum ImportError {
    /// The package cannot be used at all.
    Format(String),
    /// A binary blob failed to decode. Callers generally recover from this.
    Decode(String),
    /// An underlying I/O failure.
    Io(std::io::Error),
    /// An error from the embedded relational store.
    Store(rusqlite::Error),
    /// Malformed JSON in a manifest or metadata row.
    Json(serde_json::Error),
    /// The container archive is corrupt or truncated.
    Archive(zip::result::ZipError),
    /// A destination service call failed.
    Collaborator(String),
}

impl ImportError {
    pub fn format(msg: impl Into<String>) -> Self {
        ImportError::Format(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ImportError::Decode(msg.into())
    }

    pub fn collaborator(msg: impl Into<String>) -> Self {
        ImportError::Collaborator(msg.into())
    }

    /// Whether the error means the whole package is unusable.
    pub fn is_fatal_format(&self) -> bool {
        matches!(self, ImportError::Format(_))
    }
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ImportError::Format(msg) => write!(f, "format error: {msg}"),
            ImportError::Decode(msg) => write!(f, "decode error: {msg}"),
            ImportError::Io(e) => write!(f, "I/O error: {e}"),
            ImportError::Store(e) => write!(f, "store error: {e}"),
            ImportError::Json(e) => write!(f, "JSON error: {e}"),
            ImportError::Archive(e) => write!(f, "archive error: {e}"),
            ImportError::Collaborator(msg) => write!(f, "collaborator error: {msg}"),
        }
    }
}

impl Error for ImportError {}

impl From<std::io::Error> for ImportError {
    fn from(value: std::io::Error) -> Self {
        ImportError::Io(value)
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(value: rusqlite::Error) -> Self {
        ImportError::Store(value)
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(value: serde_json::Error) -> Self {
        ImportError::Json(value)
    }
}

impl From<zip::result::ZipError> for ImportError {
    fn from(value: zip::result::ZipError) -> Self {
        ImportError::Archive(value)
    }
}

impl From<FromUtf8Error> for ImportError {
    fn from(value: FromUtf8Error) -> Self {
        ImportError::Decode(format!("UTF-8 conversion error: {value}"))
    }
}

pub type Fallible<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Format errors are the only fatal class.
    #[test]
    fn test_fatal_classification() {
        assert!(ImportError::format("no store entry").is_fatal_format());
        assert!(!ImportError::decode("bad blob").is_fatal_format());
        assert!(!ImportError::collaborator("catalog down").is_fatal_format());
    }

    /// Display output carries the error class prefix.
    #[test]
    fn test_display() {
        let e = ImportError::format("no usable store entry");
        assert_eq!(e.to_string(), "format error: no usable store entry");
    }
}
