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

use std::collections::HashMap;

use deckport_core::Dialect;
use deckport_core::Fallible;
use deckport_core::Side;
use deckport_core::render;
use deckport_core::stream;

/// Stream up to `limit` records, rendering template-carrying ones and
/// dumping the raw fields of the rest.
pub fn preview_package(file: &str, dialect: Dialect, limit: usize) -> Fallible<()> {
    let bytes: Vec<u8> = std::fs::read(file)?;
    let mut source = stream::open(bytes, dialect)?;
    let field_names: Vec<String> = source.fields().to_vec();

    let mut shown: usize = 0;
    while shown < limit {
        let Some(record) = source.next_record()? else {
            break;
        };
        println!("--- record {}", record.order_index);
        match &record.template {
            Some(template) => {
                let fields: HashMap<String, String> = field_names
                    .iter()
                    .cloned()
                    .zip(record.fields.iter().cloned())
                    .collect();
                let front: String = render(&template.front, &fields, Side::Front, None);
                let back: String = render(&template.back, &fields, Side::Back, Some(&front));
                println!("front: {front}");
                println!("back: {back}");
            }
            None => {
                for (name, value) in field_names.iter().zip(&record.fields) {
                    println!("{name}: {value}");
                }
            }
        }
        if let Some(progress) = record.progress {
            println!(
                "progress: stability {:.1}d, difficulty {:.2}, {} reviews{}",
                progress.stability_days,
                progress.difficulty,
                progress.review_count,
                if progress.suspended { ", suspended" } else { "" }
            );
        }
        shown += 1;
    }
    source.close()
}
