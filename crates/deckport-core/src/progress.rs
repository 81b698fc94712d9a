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

//! Inference of destination scheduling state from legacy per-card fields.
//!
//! The origin scheduler tracks an interval in days, an ease factor in
//! permille, a repetition count, and queue/type state integers. The
//! destination wants a stability/difficulty pair. The mapping here is
//! derived, not decoded verbatim: a legacy ease of 2500 (the origin
//! default) lands at difficulty 0, and lower ease values (harder cards)
//! approach 1.

/// The minimum stability assigned to any reviewed card, in days.
const MIN_STABILITY_DAYS: f64 = 0.1;

/// The origin's default ease factor, as a ratio.
const DEFAULT_EASE: f64 = 2.5;

/// The queue state marking a suspended card.
const QUEUE_SUSPENDED: i64 = -1;

/// The card type marking a never-reviewed card.
const TYPE_NEW: i64 = 0;

/// Scheduling progress inferred for one card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyProgress {
    /// Memory stability in days. Always positive.
    pub stability_days: f64,
    /// Difficulty in `[0, 1]`.
    pub difficulty: f64,
    /// Number of past reviews.
    pub review_count: u32,
    /// Whether the card was suspended in the origin application.
    pub suspended: bool,
}

/// Infer destination progress from legacy scheduling fields.
///
/// A new, unseen card that is not suspended carries no progress worth
/// importing and yields `None`.
pub fn infer(
    interval: i64,
    ease_factor: i64,
    review_count: i64,
    queue: i64,
    card_type: i64,
) -> Option<LegacyProgress> {
    let suspended: bool = queue == QUEUE_SUSPENDED;
    if card_type == TYPE_NEW && !suspended {
        return None;
    }
    let stability_days: f64 = f64::max(MIN_STABILITY_DAYS, interval.unsigned_abs() as f64);
    let ease: f64 = if ease_factor > 0 {
        ease_factor as f64 / 1000.0
    } else {
        DEFAULT_EASE
    };
    let difficulty: f64 = ((DEFAULT_EASE - ease) / 1.5).clamp(0.0, 1.0);
    let review_count: u32 = review_count.max(0) as u32;
    Some(LegacyProgress {
        stability_days,
        difficulty,
        review_count,
        suspended,
    })
}

/// Pick the winner among two progress candidates for the same note
/// (e.g. forward/reverse card pairs): non-suspended over suspended, then
/// more reviews, then higher stability. The loser is discarded, never
/// merged. Deterministic regardless of argument order.
pub fn pick_better(a: LegacyProgress, b: LegacyProgress) -> LegacyProgress {
    if a.suspended != b.suspended {
        return if a.suspended { b } else { a };
    }
    if a.review_count != b.review_count {
        return if a.review_count > b.review_count {
            a
        } else {
            b
        };
    }
    if a.stability_days >= b.stability_days { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A new, unsuspended card yields no progress.
    #[test]
    fn test_new_card_is_none() {
        assert_eq!(infer(0, 0, 0, 0, TYPE_NEW), None);
    }

    /// A suspended card yields progress even when new.
    #[test]
    fn test_suspended_new_card() {
        let p = infer(0, 0, 0, QUEUE_SUSPENDED, TYPE_NEW).unwrap();
        assert!(p.suspended);
        assert_eq!(p.stability_days, MIN_STABILITY_DAYS);
    }

    /// A reviewed card maps interval/ease into stability/difficulty.
    #[test]
    fn test_reviewed_card() {
        let p = infer(21, 2500, 5, 2, 2).unwrap();
        assert_eq!(p.stability_days, 21.0);
        assert_eq!(p.difficulty, 0.0);
        assert_eq!(p.review_count, 5);
        assert!(!p.suspended);
    }

    /// Lower ease means higher difficulty; the bottom of the ease range
    /// saturates at 1.
    #[test]
    fn test_difficulty_scale() {
        let hard = infer(3, 1300, 9, 2, 2).unwrap();
        assert!((hard.difficulty - 0.8).abs() < 1e-9);
        let floor = infer(3, 1000, 9, 2, 2).unwrap();
        assert_eq!(floor.difficulty, 1.0);
    }

    /// A zero ease factor falls back to the origin default.
    #[test]
    fn test_zero_ease_default() {
        let p = infer(3, 0, 1, 2, 2).unwrap();
        assert_eq!(p.difficulty, 0.0);
    }

    /// Invariants hold over a spread of inputs: stability positive,
    /// difficulty within the unit interval, review count non-negative.
    #[test]
    fn test_invariants() {
        for interval in [-1000, -1, 0, 1, 365] {
            for ease in [-500, 0, 1000, 2500, 9999] {
                for reviews in [-3, 0, 7] {
                    for (queue, ctype) in [(2, 2), (QUEUE_SUSPENDED, 1), (0, 0), (1, 3)] {
                        if let Some(p) = infer(interval, ease, reviews, queue, ctype) {
                            assert!(p.stability_days > 0.0);
                            assert!((0.0..=1.0).contains(&p.difficulty));
                        }
                    }
                }
            }
        }
    }

    /// Two candidates differing only in suspension resolve to the
    /// non-suspended one, whichever order they arrive in.
    #[test]
    fn test_tie_break_suspension() {
        let active = infer(10, 2500, 3, 2, 2).unwrap();
        let suspended = infer(10, 2500, 3, QUEUE_SUSPENDED, 2).unwrap();
        assert_eq!(pick_better(active, suspended), active);
        assert_eq!(pick_better(suspended, active), active);
    }

    /// After suspension, more reviews win, then higher stability.
    #[test]
    fn test_tie_break_reviews_then_stability() {
        let few = infer(50, 2500, 2, 2, 2).unwrap();
        let many = infer(10, 2500, 8, 2, 2).unwrap();
        assert_eq!(pick_better(few, many), many);
        assert_eq!(pick_better(many, few), many);

        let shorter = infer(10, 2500, 8, 2, 2).unwrap();
        let longer = infer(40, 2500, 8, 2, 2).unwrap();
        assert_eq!(pick_better(shorter, longer), longer);
        assert_eq!(pick_better(longer, shorter), longer);
    }
}
