//! Position records: one graded test case from a suite.

use serde::{Deserialize, Serialize};

use crate::error::SuiteError;
use crate::scoring::normalize_move;

/// A single test position with its answer key.
///
/// Immutable once built; `max_points` is cached from `move_scores` at
/// construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Category identifier, e.g. `STS(v1.0)`
    pub id: String,
    /// Theme label, e.g. `Undermining`
    pub description: String,
    /// Full label as written in the suite, e.g. `STS(v1.0) Undermining.001`
    pub label: String,
    /// Six-field FEN handed to the engine verbatim
    pub board_state: String,
    move_scores: Vec<(String, u32)>,
    max_points: u32,
}

impl PositionRecord {
    /// Build a record, normalizing the reference moves.
    ///
    /// Fails if `move_scores` is empty or lists the same move twice.
    pub fn new(
        label: &str,
        board_state: &str,
        move_scores: Vec<(String, u32)>,
    ) -> Result<Self, SuiteError> {
        if move_scores.is_empty() {
            return Err(SuiteError::InvalidRecord(format!(
                "'{label}' has no scored moves"
            )));
        }

        let mut normalized: Vec<(String, u32)> = Vec::with_capacity(move_scores.len());
        for (mv, points) in move_scores {
            let mv = normalize_move(&mv);
            if mv.is_empty() {
                return Err(SuiteError::InvalidRecord(format!(
                    "'{label}' has an empty move"
                )));
            }
            if normalized.iter().any(|(m, _)| *m == mv) {
                return Err(SuiteError::InvalidRecord(format!(
                    "'{label}' lists move {mv} twice"
                )));
            }
            normalized.push((mv, points));
        }

        let max_points = normalized.iter().map(|(_, p)| *p).max().unwrap_or(0);
        let (id, description) = split_label(label);

        Ok(Self {
            id,
            description,
            label: label.trim().to_string(),
            board_state: board_state.trim().to_string(),
            move_scores: normalized,
            max_points,
        })
    }

    /// Reference moves in suite order.
    pub fn move_scores(&self) -> &[(String, u32)] {
        &self.move_scores
    }

    /// Points for an already normalized move; unlisted moves score 0.
    pub fn points_for(&self, mv: &str) -> u32 {
        self.move_scores
            .iter()
            .find(|(m, _)| m == mv)
            .map(|(_, p)| *p)
            .unwrap_or(0)
    }

    pub fn max_points(&self) -> u32 {
        self.max_points
    }

    /// `e2e4=10, d2d4=5` style rendering used in the details report.
    pub fn moves_display(&self) -> String {
        self.move_scores
            .iter()
            .map(|(m, p)| format!("{m}={p}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Split `STS(v1.0) Undermining.001` into (`STS(v1.0)`, `Undermining`).
fn split_label(label: &str) -> (String, String) {
    let label = label.trim();
    match label.split_once(char::is_whitespace) {
        Some((id, rest)) => (id.to_string(), strip_index_suffix(rest.trim()).to_string()),
        None => (label.to_string(), String::new()),
    }
}

/// Drop a trailing `.NNN` position index from a theme label.
fn strip_index_suffix(text: &str) -> &str {
    if let Some((head, tail)) = text.rsplit_once('.') {
        if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
            return head;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEN: &str = "1kr5/3n4/q3p2p/p2n2p1/PppB1P2/5BP1/1P2Q2P/3R2K1 w - - 0 1";

    #[test]
    fn test_label_split() {
        let rec = PositionRecord::new(
            "STS(v1.0) Undermining.001",
            FEN,
            vec![("f4f5".into(), 10)],
        )
        .unwrap();
        assert_eq!(rec.id, "STS(v1.0)");
        assert_eq!(rec.description, "Undermining");
        assert_eq!(rec.label, "STS(v1.0) Undermining.001");
    }

    #[test]
    fn test_label_without_description() {
        let rec = PositionRecord::new("BK.01", FEN, vec![("f4f5".into(), 1)]).unwrap();
        assert_eq!(rec.id, "BK.01");
        assert_eq!(rec.description, "");
    }

    #[test]
    fn test_max_points_cached() {
        let rec = PositionRecord::new(
            "T1 Theme.1",
            FEN,
            vec![("f4f5".into(), 10), ("b2b3".into(), 3), ("e2e4".into(), 7)],
        )
        .unwrap();
        assert_eq!(rec.max_points(), 10);
        assert_eq!(rec.points_for("e2e4"), 7);
        assert_eq!(rec.points_for("a2a3"), 0);
    }

    #[test]
    fn test_moves_are_normalized() {
        let rec = PositionRecord::new("T1 x.1", FEN, vec![(" E7E8Q ".into(), 10)]).unwrap();
        assert_eq!(rec.move_scores()[0].0, "e7e8q");
    }

    #[test]
    fn test_empty_scores_rejected() {
        assert!(PositionRecord::new("T1 x.1", FEN, vec![]).is_err());
    }

    #[test]
    fn test_duplicate_move_rejected() {
        let err = PositionRecord::new(
            "T1 x.1",
            FEN,
            vec![("e2e4".into(), 10), ("E2E4".into(), 5)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_all_zero_scores_allowed() {
        let rec = PositionRecord::new("T1 x.1", FEN, vec![("e2e4".into(), 0)]).unwrap();
        assert_eq!(rec.max_points(), 0);
    }

    #[test]
    fn test_moves_display() {
        let rec = PositionRecord::new(
            "T1 x.1",
            FEN,
            vec![("f4f5".into(), 10), ("b2b3".into(), 3)],
        )
        .unwrap();
        assert_eq!(rec.moves_display(), "f4f5=10, b2b3=3");
    }
}
