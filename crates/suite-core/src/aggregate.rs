//! Aggregation of scored results into per-category and overall views.
//!
//! The fold is a plain per-key sum, so results may arrive in any order and
//! partial aggregators can be merged.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::outcome::ScoredResult;

/// Strength/weakness tables list this many categories unless told otherwise
pub const DEFAULT_RANK_LIMIT: usize = 5;

/// Running sums for one category, or for the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub points: u64,
    pub max_points: u64,
    pub positions: u32,
    pub faults: u32,
}

impl Tally {
    fn add(&mut self, result: &ScoredResult) {
        self.points += u64::from(result.points_awarded);
        self.max_points += u64::from(result.max_points);
        self.positions += 1;
        if result.faulted {
            self.faults += 1;
        }
    }

    fn merge(&mut self, other: &Tally) {
        self.points += other.points;
        self.max_points += other.max_points;
        self.positions += other.positions;
        self.faults += other.faults;
    }

    /// Percentage of available points, `None` when nothing was available.
    pub fn pct(&self) -> Option<f64> {
        percentage(self.points, self.max_points)
    }
}

/// `points / total * 100` rounded to 2 decimals; `None` for a zero total.
pub fn percentage(points: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let pct = points as f64 / total as f64 * 100.0;
    Some((pct * 100.0).round() / 100.0)
}

/// Order category identifiers by the integers embedded in them, then by text.
///
/// `STS(v2.0)` sorts before `STS(v10.0)`, unlike a plain string sort.
pub fn canonical_order(a: &str, b: &str) -> Ordering {
    version_key(a).cmp(&version_key(b)).then_with(|| a.cmp(b))
}

fn version_key(id: &str) -> Vec<u64> {
    let mut key = Vec::new();
    let mut digits = String::new();
    for c in id.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            key.push(digits.parse().unwrap_or(u64::MAX));
            digits.clear();
        }
    }
    if !digits.is_empty() {
        key.push(digits.parse().unwrap_or(u64::MAX));
    }
    key
}

/// Owns all category totals for a run.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    categories: BTreeMap<String, Tally>,
    grand: Tally,
    descriptions: HashMap<String, String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregator that knows the theme label of each category.
    pub fn with_descriptions<I, K, V>(descriptions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut agg = Self::default();
        for (id, desc) in descriptions {
            agg.descriptions.entry(id.into()).or_insert_with(|| desc.into());
        }
        agg
    }

    /// Fold one scored result into its category and the grand total.
    pub fn fold(&mut self, result: &ScoredResult) {
        self.categories
            .entry(result.category.clone())
            .or_default()
            .add(result);
        self.grand.add(result);
    }

    /// Combine another aggregator's totals into this one.
    pub fn merge(&mut self, other: Aggregator) {
        for (id, tally) in &other.categories {
            self.categories.entry(id.clone()).or_default().merge(tally);
        }
        self.grand.merge(&other.grand);
        for (id, desc) in other.descriptions {
            self.descriptions.entry(id).or_insert(desc);
        }
    }

    pub fn category(&self, id: &str) -> Option<&Tally> {
        self.categories.get(id)
    }

    pub fn categories(&self) -> &BTreeMap<String, Tally> {
        &self.categories
    }

    pub fn grand(&self) -> &Tally {
        &self.grand
    }

    /// Finalize the views. Totals are not considered final before the run ends.
    pub fn report(&self, rank_limit: usize) -> Report {
        let mut summary: Vec<CategoryRow> = self
            .categories
            .iter()
            .map(|(id, tally)| CategoryRow {
                id: id.clone(),
                description: self.descriptions.get(id).cloned().unwrap_or_default(),
                points: tally.points,
                total: tally.max_points,
                positions: tally.positions,
                faults: tally.faults,
                pct: tally.pct(),
            })
            .collect();
        summary.sort_by(|a, b| canonical_order(&a.id, &b.id));

        let flagged_categories: Vec<String> = summary
            .iter()
            .filter(|row| row.pct.is_none())
            .map(|row| row.id.clone())
            .collect();

        let ranked: Vec<(f64, &CategoryRow)> = summary
            .iter()
            .filter_map(|row| row.pct.map(|pct| (pct, row)))
            .collect();

        let mut strength = ranked.clone();
        strength.sort_by(|(pa, a), (pb, b)| {
            pb.total_cmp(pa).then_with(|| canonical_order(&a.id, &b.id))
        });
        let mut weakness = ranked;
        weakness.sort_by(|(pa, a), (pb, b)| {
            pa.total_cmp(pb).then_with(|| canonical_order(&a.id, &b.id))
        });

        let strength: Vec<CategoryRow> = strength
            .into_iter()
            .take(rank_limit)
            .map(|(_, row)| row.clone())
            .collect();
        let weakness: Vec<CategoryRow> = weakness
            .into_iter()
            .take(rank_limit)
            .map(|(_, row)| row.clone())
            .collect();

        Report {
            strength,
            weakness,
            summary,
            grand: self.grand,
            grand_pct: self.grand.pct(),
            flagged_categories,
        }
    }
}

/// One category line in the summary/strength/weakness views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRow {
    pub id: String,
    pub description: String,
    pub points: u64,
    pub total: u64,
    pub positions: u32,
    pub faults: u32,
    /// `None` when the category has no available points
    pub pct: Option<f64>,
}

/// Finalized views of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Every category once, canonical order
    pub summary: Vec<CategoryRow>,
    /// Best categories by percentage
    pub strength: Vec<CategoryRow>,
    /// Worst categories by percentage
    pub weakness: Vec<CategoryRow>,
    pub grand: Tally,
    pub grand_pct: Option<f64>,
    /// Categories with zero available points, left out of ranked views
    pub flagged_categories: Vec<String>,
}

impl Report {
    /// Overall row for one engine configuration.
    pub fn points_row(&self, engine: &str, test_file: &str, move_time: f64) -> PointsRow {
        PointsRow {
            engine: engine.to_string(),
            test_file: test_file.to_string(),
            move_time,
            points: self.grand.points,
            total: self.grand.max_points,
            pct: self.grand_pct,
        }
    }
}

/// Grand totals for one engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsRow {
    pub engine: String,
    pub test_file: String,
    /// Seconds per move
    pub move_time: f64,
    pub points: u64,
    pub total: u64,
    pub pct: Option<f64>,
}

/// Sort points rows by test file, then move time, then best percentage first.
pub fn sort_points_rows(rows: &mut [PointsRow]) {
    rows.sort_by(|a, b| {
        a.test_file
            .cmp(&b.test_file)
            .then_with(|| a.move_time.total_cmp(&b.move_time))
            .then_with(|| {
                let pa = a.pct.unwrap_or(f64::NEG_INFINITY);
                let pb = b.pct.unwrap_or(f64::NEG_INFINITY);
                pb.total_cmp(&pa)
            })
    });
}
