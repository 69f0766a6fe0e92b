// src/scoring.rs

//! Pure scoring rules for items.
//!
//! An item's score is derived from how many of its sub-questions were
//! answered correctly. Dichotomous items score all-or-nothing (0/1);
//! polytomous items use a fixed three-way band (0 = none correct,
//! 1 = some, 2 = all). The band is not proportional and does not
//! generalize past 2-point scoring.

use crate::models::exam::ScoringType;

/// Computes an item's score from its sub-question results.
///
/// `total` is the item's sub-question count and `correct` how many of them
/// currently have a correct response (a sub-question with no recorded
/// response counts as not correct). An item with zero sub-questions scores 0;
/// that usually means an incomplete exam definition, so callers should flag it.
pub fn compute_item_score(scoring_type: ScoringType, total: usize, correct: usize) -> i64 {
    if total == 0 {
        return 0;
    }

    match scoring_type {
        ScoringType::Dichotomous => {
            if correct == total {
                1
            } else {
                0
            }
        }
        ScoringType::Polytomous => {
            if correct == 0 {
                0
            } else if correct == total {
                2
            } else {
                1
            }
        }
    }
}

/// Resolves the digit exported for one (row, item) cell.
///
/// A stored item score always wins; otherwise the score is derived live from
/// the response counts. An item with no sub-questions and no stored score
/// resolves to `None` and is skipped entirely by the Winsteps serializer.
pub fn resolve_item_digit(
    direct_score: Option<i64>,
    scoring_type: ScoringType,
    total: usize,
    correct: usize,
) -> Option<i64> {
    if let Some(score) = direct_score {
        return Some(score);
    }
    if total == 0 {
        return None;
    }
    Some(compute_item_score(scoring_type, total, correct))
}

/// Checks a manually entered score against the item's scoring-mode range:
/// {0, 1} for dichotomous items, {0, 1, 2} for polytomous ones.
pub fn manual_score_in_range(scoring_type: ScoringType, score: i64) -> bool {
    match scoring_type {
        ScoringType::Dichotomous => (0..=1).contains(&score),
        ScoringType::Polytomous => (0..=2).contains(&score),
    }
}
