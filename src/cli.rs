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

use std::path::Path;

use clap::Parser;
use deckport_core::Dialect;
use deckport_core::Fallible;

use crate::cmd::inspect::inspect_package;
use crate::cmd::preview::preview_package;

#[derive(Parser)]
#[command(version, about, long_about = None)]
enum Command {
    /// Print a package's structure: fields, layout hint, record count.
    Inspect {
        /// Path to the package file.
        file: String,
        /// Package dialect: anki, pack, or store. Inferred from the file
        /// extension when omitted.
        #[arg(long)]
        dialect: Option<String>,
    },
    /// Stream records and print their rendered or raw content.
    Preview {
        /// Path to the package file.
        file: String,
        /// Package dialect: anki, pack, or store. Inferred from the file
        /// extension when omitted.
        #[arg(long)]
        dialect: Option<String>,
        /// Maximum number of records to print.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// The declared dialect wins; otherwise the extension decides.
fn resolve_dialect(file: &str, declared: Option<String>) -> Fallible<Dialect> {
    if let Some(declared) = declared {
        return declared.parse();
    }
    let extension: Option<&str> = Path::new(file).extension().and_then(|e| e.to_str());
    match extension {
        Some("apkg") => Ok(Dialect::Anki),
        Some("zip") => Ok(Dialect::Pack),
        _ => Ok(Dialect::Store),
    }
}

pub fn entrypoint() -> Fallible<()> {
    let cli: Command = Command::parse();
    match cli {
        Command::Inspect { file, dialect } => {
            let dialect: Dialect = resolve_dialect(&file, dialect)?;
            inspect_package(&file, dialect)
        }
        Command::Preview {
            file,
            dialect,
            limit,
        } => {
            let dialect: Dialect = resolve_dialect(&file, dialect)?;
            preview_package(&file, dialect, limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The extension decides the dialect when none is declared.
    #[test]
    fn test_dialect_from_extension() -> Fallible<()> {
        assert_eq!(resolve_dialect("deck.apkg", None)?, Dialect::Anki);
        assert_eq!(resolve_dialect("deck.zip", None)?, Dialect::Pack);
        assert_eq!(resolve_dialect("deck.db", None)?, Dialect::Store);
        assert_eq!(resolve_dialect("deck", None)?, Dialect::Store);
        Ok(())
    }

    /// A declared dialect overrides the extension.
    #[test]
    fn test_declared_dialect_wins() -> Fallible<()> {
        let dialect = resolve_dialect("deck.apkg", Some("pack".to_string()))?;
        assert_eq!(dialect, Dialect::Pack);
        Ok(())
    }

    /// An unknown declared dialect is an error.
    #[test]
    fn test_unknown_dialect() {
        assert!(resolve_dialect("deck.apkg", Some("csv".to_string())).is_err());
    }
}
