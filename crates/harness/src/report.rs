//! CSV and JSON reports for a finished run
//!
//! File names are derived from the engine name. `points.csv` is shared
//! between runs: existing rows are read back, the new row is appended and the
//! whole file is rewritten sorted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use suite_core::aggregate::{canonical_order, sort_points_rows};
use suite_core::{scoring, CategoryRow, Outcome, PointsRow, PositionRecord, Report};
use tracing::{info, warn};

use crate::error::HarnessError;
use crate::pool::RunResult;

const DETAILS_HEADER: &str = "ID,FEN,EngineMove,EPDMoves,Points,Fault";
const SUMMARY_HEADER: &str = "Engine,Id,Description,MTS,Points,Total,Pct";
const RANKED_HEADER: &str = "Engine,TFile,ID,Description,Points,Total,Pct";
const POINTS_HEADER: &str = "Engine,TFile,MTS,Points,Total,Pct";

/// Where and under which names a run's reports go.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub out_dir: PathBuf,
    pub points_file: PathBuf,
    /// Base name of the EPD file, the `TFile` column
    pub test_file: String,
    /// Seconds per move, the `MTS` column
    pub move_time: f64,
    pub rank_limit: usize,
}

/// Paths of everything `write_reports` produced
#[derive(Debug, Clone)]
pub struct WrittenReports {
    pub details: PathBuf,
    pub summary: PathBuf,
    pub strength: PathBuf,
    pub weakness: PathBuf,
    pub points: PathBuf,
    pub outcomes: PathBuf,
}

#[derive(Serialize)]
struct OutcomeExport<'a> {
    engine: &'a str,
    test_file: &'a str,
    generated_at: DateTime<Utc>,
    move_time_secs: f64,
    elapsed_secs: f64,
    truncated: bool,
    faults: usize,
    outcomes: &'a [Outcome],
}

/// `Stockfish 16` -> `Stockfish_16`
pub fn file_stem(engine_name: &str) -> String {
    engine_name.replace(' ', "_")
}

/// Write every report for `result`.
pub fn write_reports(
    result: &RunResult,
    settings: &ReportSettings,
) -> Result<WrittenReports, HarnessError> {
    fs::create_dir_all(&settings.out_dir)?;

    let engine = result.engine_name.as_str();
    let stem = file_stem(engine);
    let report = result.report(settings.rank_limit);
    let path = |suffix: &str| settings.out_dir.join(format!("{stem}_{suffix}"));

    let written = WrittenReports {
        details: path("details.csv"),
        summary: path("summary.csv"),
        strength: path("strength.csv"),
        weakness: path("weakness.csv"),
        points: settings.points_file.clone(),
        outcomes: path("outcomes.json"),
    };

    fs::write(
        &written.details,
        details_csv(&result.positions, &result.outcomes),
    )?;
    fs::write(
        &written.summary,
        summary_csv(engine, settings.move_time, &report),
    )?;
    fs::write(
        &written.strength,
        ranked_csv(engine, &settings.test_file, &report.strength),
    )?;
    fs::write(
        &written.weakness,
        ranked_csv(engine, &settings.test_file, &report.weakness),
    )?;

    let row = report.points_row(engine, &settings.test_file, settings.move_time);
    update_points_file(&written.points, row)?;

    let export = OutcomeExport {
        engine,
        test_file: &settings.test_file,
        generated_at: Utc::now(),
        move_time_secs: settings.move_time,
        elapsed_secs: result.elapsed.as_secs_f64(),
        truncated: result.truncated,
        faults: result.fault_count(),
        outcomes: &result.outcomes,
    };
    fs::write(&written.outcomes, serde_json::to_string_pretty(&export)?)?;

    info!(
        dir = %settings.out_dir.display(),
        points = %written.points.display(),
        "Reports written"
    );
    Ok(written)
}

/// One row per outcome, ordered by the numbers embedded in the position label.
pub fn details_csv(positions: &[PositionRecord], outcomes: &[Outcome]) -> String {
    let mut rows: Vec<(&PositionRecord, &Outcome)> = outcomes
        .iter()
        .filter_map(|o| positions.get(o.position_index).map(|p| (p, o)))
        .collect();
    rows.sort_by(|a, b| canonical_order(&a.0.label, &b.0.label));

    let mut out = String::from(DETAILS_HEADER);
    out.push('\n');
    for (position, outcome) in rows {
        let points = scoring::score(position, outcome).points_awarded;
        let fields = [
            csv_field(&position.label),
            csv_field(&position.board_state),
            csv_field(outcome.chosen_move.as_deref().unwrap_or("")),
            csv_field(&position.moves_display()),
            points.to_string(),
            outcome.fault.map(|f| f.as_str()).unwrap_or("").to_string(),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub fn summary_csv(engine: &str, move_time: f64, report: &Report) -> String {
    let mut out = String::from(SUMMARY_HEADER);
    out.push('\n');
    for row in &report.summary {
        let fields = [
            csv_field(engine),
            csv_field(&row.id),
            csv_field(&row.description),
            format_move_time(move_time),
            row.points.to_string(),
            row.total.to_string(),
            format_pct(row.pct),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Strength and weakness files share one layout.
pub fn ranked_csv(engine: &str, test_file: &str, rows: &[CategoryRow]) -> String {
    let mut out = String::from(RANKED_HEADER);
    out.push('\n');
    for row in rows {
        let fields = [
            csv_field(engine),
            csv_field(test_file),
            csv_field(&row.id),
            csv_field(&row.description),
            row.points.to_string(),
            row.total.to_string(),
            format_pct(row.pct),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub fn points_csv(rows: &[PointsRow]) -> String {
    let mut out = String::from(POINTS_HEADER);
    out.push('\n');
    for row in rows {
        let fields = [
            csv_field(&row.engine),
            csv_field(&row.test_file),
            format_move_time(row.move_time),
            row.points.to_string(),
            row.total.to_string(),
            format_pct(row.pct),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

/// Rows already in `path`; a missing file is an empty history.
pub fn read_points_file(path: &Path) -> Result<Vec<PointsRow>, HarnessError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_points_line(line) {
            Some(row) => rows.push(row),
            None => warn!(
                file = %path.display(),
                line = idx + 1,
                "Skipping malformed points row"
            ),
        }
    }
    Ok(rows)
}

/// Append `row` to the points history and rewrite it sorted.
pub fn update_points_file(path: &Path, row: PointsRow) -> Result<Vec<PointsRow>, HarnessError> {
    let mut rows = read_points_file(path)?;
    rows.push(row);
    sort_points_rows(&mut rows);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, points_csv(&rows))?;
    Ok(rows)
}

fn parse_points_line(line: &str) -> Option<PointsRow> {
    let fields = split_csv_line(line);
    if fields.len() != 6 {
        return None;
    }
    let pct = match fields[5].trim() {
        "" => None,
        p => Some(p.parse().ok()?),
    };
    Some(PointsRow {
        engine: fields[0].clone(),
        test_file: fields[1].clone(),
        move_time: fields[2].trim().parse().ok()?,
        points: fields[3].trim().parse().ok()?,
        total: fields[4].trim().parse().ok()?,
        pct,
    })
}

/// Seconds with at least one decimal, so `1.0` stays `1.0` in the CSV
fn format_move_time(secs: f64) -> String {
    format!("{secs:?}")
}

fn format_pct(pct: Option<f64>) -> String {
    pct.map(|p| format!("{p:.2}")).unwrap_or_default()
}

/// Quote a field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Split one CSV line, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use suite_core::{Aggregator, Fault};

    use super::*;

    fn position(label: &str, moves: &[(&str, u32)]) -> PositionRecord {
        PositionRecord::new(
            label,
            "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1",
            moves.iter().map(|(m, p)| (m.to_string(), *p)).collect(),
        )
        .unwrap()
    }

    fn outcome(index: usize, p: &PositionRecord, mv: Option<&str>, fault: Option<Fault>) -> Outcome {
        Outcome {
            position_index: index,
            position_id: p.label.clone(),
            category: p.id.clone(),
            chosen_move: mv.map(String::from),
            elapsed: Duration::from_millis(100),
            engine_name: "Test Engine".into(),
            fault,
        }
    }

    fn run_result() -> RunResult {
        let positions = vec![
            position("STS10 Simplification.10", &[("e2e4", 10), ("e2e3", 3)]),
            position("STS2 Open Files.2", &[("e2e4", 10)]),
            position("STS10 Simplification.9", &[("e2e3", 10)]),
        ];
        let outcomes = vec![
            outcome(0, &positions[0], Some("e2e3"), None),
            outcome(1, &positions[1], Some("e2e4"), None),
            outcome(2, &positions[2], None, Some(Fault::ProcessFault)),
        ];
        let mut aggregator = Aggregator::with_descriptions(
            positions.iter().map(|p| (p.id.clone(), p.description.clone())),
        );
        for o in &outcomes {
            aggregator.fold(&scoring::score(&positions[o.position_index], o));
        }
        RunResult {
            engine_name: "Test Engine".into(),
            positions: Arc::new(positions),
            outcomes,
            aggregator,
            truncated: false,
            elapsed: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("e2e4=10, d2d4=5"), "\"e2e4=10, d2d4=5\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(
            split_csv_line("\"a, b\",c,\"say \"\"hi\"\"\""),
            vec!["a, b", "c", "say \"hi\""]
        );
    }

    #[test]
    fn test_details_sorted_by_label_numbers() {
        let result = run_result();
        let csv = details_csv(&result.positions, &result.outcomes);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], DETAILS_HEADER);
        assert!(lines[1].starts_with("STS2 Open Files.2,"));
        assert!(lines[2].starts_with("STS10 Simplification.9,"));
        assert!(lines[2].ends_with(",0,process_fault"));
        assert!(lines[3].starts_with("STS10 Simplification.10,"));
        assert!(lines[3].contains(",e2e3,\"e2e4=10, e2e3=3\",3,"));
    }

    #[test]
    fn test_summary_rows() {
        let result = run_result();
        let report = result.report(5);
        let csv = summary_csv("Test Engine", 1.5, &report);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "Test Engine,STS2,Open Files,1.5,10,10,100.00");
        assert_eq!(lines[2], "Test Engine,STS10,Simplification,1.5,3,20,15.00");
    }

    #[test]
    fn test_points_file_append_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");

        let row = |engine: &str, file: &str, mts: f64, pct: f64| PointsRow {
            engine: engine.into(),
            test_file: file.into(),
            move_time: mts,
            points: 0,
            total: 100,
            pct: Some(pct),
        };

        update_points_file(&path, row("A", "sts.epd", 1.0, 50.0)).unwrap();
        update_points_file(&path, row("B", "sts.epd", 1.0, 75.0)).unwrap();
        update_points_file(&path, row("C", "arasan.epd", 2.0, 10.0)).unwrap();
        let rows = update_points_file(&path, row("D, the engine", "sts.epd", 0.5, 5.0)).unwrap();

        let engines: Vec<&str> = rows.iter().map(|r| r.engine.as_str()).collect();
        assert_eq!(engines, vec!["C", "D, the engine", "B", "A"]);

        let reread = read_points_file(&path).unwrap();
        assert_eq!(reread, rows);
    }

    #[test]
    fn test_whole_second_move_time_keeps_decimal() {
        let result = run_result();
        let summary = summary_csv("Test Engine", 1.0, &result.report(5));
        assert_eq!(
            summary.lines().nth(1),
            Some("Test Engine,STS2,Open Files,1.0,10,10,100.00")
        );

        let rows = vec![PointsRow {
            engine: "Test Engine".into(),
            test_file: "sts.epd".into(),
            move_time: 1.0,
            points: 13,
            total: 30,
            pct: Some(43.33),
        }];
        assert_eq!(
            points_csv(&rows).lines().nth(1),
            Some("Test Engine,sts.epd,1.0,13,30,43.33")
        );
        assert_eq!(format_move_time(0.25), "0.25");
    }

    #[test]
    fn test_missing_points_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows = read_points_file(&dir.path().join("nope.csv")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_write_reports_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ReportSettings {
            out_dir: dir.path().join("out"),
            points_file: dir.path().join("points.csv"),
            test_file: "sts.epd".into(),
            move_time: 1.0,
            rank_limit: 5,
        };

        let written = write_reports(&run_result(), &settings).unwrap();
        assert!(written.details.ends_with("Test_Engine_details.csv"));
        for path in [
            &written.details,
            &written.summary,
            &written.strength,
            &written.weakness,
            &written.points,
            &written.outcomes,
        ] {
            assert!(path.exists(), "missing {}", path.display());
        }

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written.outcomes).unwrap()).unwrap();
        assert_eq!(json["engine"], "Test Engine");
        assert_eq!(json["truncated"], false);
        assert_eq!(json["faults"], 1);
        assert_eq!(json["outcomes"].as_array().unwrap().len(), 3);
    }
}
