//! EPD test suite loader, regex-based opcode parser.
//!
//! Graded suites carry the answer key in two opcodes: `c9` lists candidate
//! moves in UCI notation and `c8` the points for each, in the same order.
//!
//! ```text
//! 1kr5/3n4/q3p2p/p2n2p1/PppB1P2/5BP1/1P2Q2P/3R2K1 w - - bm f5; id "STS(v1.0) Undermining.001"; c8 "10 3 2"; c9 "f4f5 e2f2 b2b3";
//! ```

use std::path::Path;

use regex::Regex;
use shakmaty::fen::Fen;

use crate::error::SuiteError;
use crate::position::PositionRecord;

/// A suite line that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpdWarning {
    /// 1-based line number
    pub line: usize,
    pub reason: String,
}

/// Read and parse an EPD file.
///
/// Returns the usable positions in file order plus a warning per skipped line.
pub fn load_epd_file(path: &Path) -> Result<(Vec<PositionRecord>, Vec<EpdWarning>), SuiteError> {
    let text = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let (positions, warnings) = parse_epd(&text);
    if positions.is_empty() {
        return Err(SuiteError::Empty(path.display().to_string()));
    }
    Ok((positions, warnings))
}

/// Parse EPD text. Blank lines are ignored; bad lines become warnings.
pub fn parse_epd(text: &str) -> (Vec<PositionRecord>, Vec<EpdWarning>) {
    let op_re = Regex::new(r#"([A-Za-z][A-Za-z0-9_]*)\s*("[^"]*"|[^;]*);"#).unwrap();

    let mut positions = Vec::new();
    let mut warnings = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line, &op_re) {
            Ok(pos) => positions.push(pos),
            Err(reason) => warnings.push(EpdWarning {
                line: idx + 1,
                reason,
            }),
        }
    }

    (positions, warnings)
}

fn parse_line(line: &str, op_re: &Regex) -> Result<PositionRecord, String> {
    let board: Vec<&str> = line.split_whitespace().take(4).collect();
    if board.len() < 4 {
        return Err("fewer than four position fields".into());
    }

    // Everything after the four position fields is operations
    let ops_start = nth_field_end(line, 4).unwrap_or(line.len());
    let ops_text = &line[ops_start..];

    let mut id = None;
    let mut c8 = None;
    let mut c9 = None;
    let mut halfmoves = None;
    let mut fullmoves = None;

    for cap in op_re.captures_iter(ops_text) {
        let operand = unquote(cap[2].trim());
        match &cap[1] {
            "id" => id = Some(operand.to_string()),
            "c8" => c8 = Some(operand.to_string()),
            "c9" => c9 = Some(operand.to_string()),
            "hmvc" => halfmoves = Some(operand.to_string()),
            "fmvn" => fullmoves = Some(operand.to_string()),
            _ => {}
        }
    }

    let fen_text = format!(
        "{} {} {} {} {} {}",
        board[0],
        board[1],
        board[2],
        board[3],
        halfmoves.as_deref().unwrap_or("0"),
        fullmoves.as_deref().unwrap_or("1"),
    );
    let fen: Fen = fen_text
        .parse()
        .map_err(|e| format!("invalid position '{fen_text}': {e}"))?;

    let label = id.filter(|s| !s.trim().is_empty()).ok_or("missing id opcode")?;

    let moves: Vec<&str> = c9
        .as_deref()
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default();
    if moves.is_empty() {
        return Err(format!("'{label}' has no c9 moves"));
    }

    let points: Vec<u32> = match c8.as_deref() {
        Some(text) => text
            .split_whitespace()
            .map(|p| p.parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("'{label}' has bad c8 points: {e}"))?,
        None => vec![0; moves.len()],
    };
    if points.len() != moves.len() {
        return Err(format!(
            "'{label}' has {} c9 moves but {} c8 points",
            moves.len(),
            points.len()
        ));
    }

    let move_scores = moves
        .into_iter()
        .map(String::from)
        .zip(points)
        .collect();

    PositionRecord::new(&label, &fen.to_string(), move_scores).map_err(|e| e.to_string())
}

/// Byte offset just past the `n`-th whitespace separated field.
fn nth_field_end(line: &str, n: usize) -> Option<usize> {
    let mut seen = 0;
    let mut in_field = false;
    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if in_field {
                seen += 1;
                in_field = false;
                if seen == n {
                    return Some(i);
                }
            }
        } else {
            in_field = true;
        }
    }
    None
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}
