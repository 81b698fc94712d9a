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

use deckport_core::Dialect;
use deckport_core::Fallible;
use deckport_core::stream;

/// Open a package and print its structure without importing anything.
pub fn inspect_package(file: &str, dialect: Dialect) -> Fallible<()> {
    let bytes: Vec<u8> = std::fs::read(file)?;
    log::debug!("read {} bytes from {file}", bytes.len());
    let mut source = stream::open(bytes, dialect)?;

    println!("dialect: {dialect:?}");
    println!("fields: {}", serde_json::to_string(source.fields())?);
    match source.layout() {
        Some(layout) => {
            let doc = serde_json::json!({
                "front": layout.front_fields,
                "back": layout.back_fields,
            });
            println!("layout: {doc}");
        }
        None => println!("layout: none"),
    }
    match source.total_records() {
        Some(total) => println!("records: {total}"),
        None => println!("records: unknown"),
    }
    source.close()
}
