//! Scoring: engine answer -> points, pure functions only

use crate::outcome::{Outcome, ScoredResult};
use crate::position::PositionRecord;

/// Canonical form of a move in engine notation.
///
/// UCI long algebraic is lowercase (promotion pieces included), so engines
/// that print `E7E8Q` or pad the token still compare equal.
pub fn normalize_move(mv: &str) -> String {
    mv.split_whitespace()
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Points for a move on a position. Absent or unlisted moves score 0.
pub fn score_move(position: &PositionRecord, chosen_move: Option<&str>) -> u32 {
    match chosen_move {
        Some(mv) => position.points_for(&normalize_move(mv)),
        None => 0,
    }
}

/// Score an outcome; fault-flagged outcomes always score 0.
pub fn score(position: &PositionRecord, outcome: &Outcome) -> ScoredResult {
    let points_awarded = if outcome.is_fault() {
        0
    } else {
        score_move(position, outcome.chosen_move.as_deref())
    };

    ScoredResult {
        category: position.id.clone(),
        points_awarded,
        max_points: position.max_points(),
        faulted: outcome.is_fault(),
    }
}
