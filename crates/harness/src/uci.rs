//! UCI protocol vocabulary: commands we send and lines engines print

use std::fmt;

/// A request sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Uci,
    IsReady,
    SetOption { name: &'a str, value: &'a str },
    UciNewGame,
    PositionFen(&'a str),
    GoMoveTime(u64),
    Stop,
    Quit,
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Uci => f.write_str("uci"),
            Command::IsReady => f.write_str("isready"),
            Command::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            Command::UciNewGame => f.write_str("ucinewgame"),
            Command::PositionFen(fen) => write!(f, "position fen {fen}"),
            Command::GoMoveTime(ms) => write!(f, "go movetime {ms}"),
            Command::Stop => f.write_str("stop"),
            Command::Quit => f.write_str("quit"),
        }
    }
}

/// One line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    IdName(String),
    IdAuthor(String),
    /// Option advertised during the handshake
    Option { name: String },
    UciOk,
    ReadyOk,
    /// `None` for `bestmove (none)` / `bestmove 0000`
    BestMove(Option<String>),
    Info { depth: Option<u32> },
    /// Stockfish style `No such option: Foo`
    NoSuchOption(String),
    /// Anything else; tolerated and ignored
    Other(String),
}

/// Classify an engine output line. Never fails: unknown lines are `Other`.
pub fn parse_line(line: &str) -> EngineLine {
    let line = line.trim();
    let mut tokens = line.split_whitespace();

    match tokens.next() {
        Some("uciok") => EngineLine::UciOk,
        Some("readyok") => EngineLine::ReadyOk,
        Some("bestmove") => {
            let mv = tokens
                .next()
                .filter(|m| *m != "(none)" && *m != "0000")
                .map(String::from);
            EngineLine::BestMove(mv)
        }
        Some("info") => EngineLine::Info {
            depth: token_after(line, "depth").and_then(|d| d.parse().ok()),
        },
        Some("id") => match tokens.next() {
            Some("name") => EngineLine::IdName(rest_after(line, "name").to_string()),
            Some("author") => EngineLine::IdAuthor(rest_after(line, "author").to_string()),
            _ => EngineLine::Other(line.to_string()),
        },
        Some("option") => match parse_option_name(line) {
            Some(name) => EngineLine::Option { name },
            None => EngineLine::Other(line.to_string()),
        },
        _ => match line.strip_prefix("No such option:") {
            Some(name) => EngineLine::NoSuchOption(name.trim().to_string()),
            None => EngineLine::Other(line.to_string()),
        },
    }
}

/// Option names may contain spaces: `option name Skill Level type spin ...`
fn parse_option_name(line: &str) -> Option<String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let start = parts.iter().position(|p| *p == "name")? + 1;
    let end = parts[start..]
        .iter()
        .position(|p| *p == "type")
        .map(|i| start + i)
        .unwrap_or(parts.len());
    if start >= end {
        return None;
    }
    Some(parts[start..end].join(" "))
}

/// Token following `key`, e.g. the depth in `info depth 12 ...`
fn token_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == key && i + 1 < parts.len() {
            return Some(parts[i + 1]);
        }
    }
    None
}

/// Remainder of the line after the first `key` token.
fn rest_after<'a>(line: &'a str, key: &str) -> &'a str {
    match line.find(&format!(" {key} ")) {
        Some(idx) => line[idx + key.len() + 2..].trim(),
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_format() {
        assert_eq!(Command::GoMoveTime(1500).to_string(), "go movetime 1500");
        assert_eq!(
            Command::SetOption { name: "Skill Level", value: "5" }.to_string(),
            "setoption name Skill Level value 5"
        );
        assert_eq!(
            Command::PositionFen("8/8/8/8/8/8/8/K6k w - - 0 1").to_string(),
            "position fen 8/8/8/8/8/8/8/K6k w - - 0 1"
        );
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(
            parse_line("id name Stockfish 16.1"),
            EngineLine::IdName("Stockfish 16.1".into())
        );
        assert_eq!(
            parse_line("id author the Stockfish developers"),
            EngineLine::IdAuthor("the Stockfish developers".into())
        );
    }

    #[test]
    fn test_parse_option() {
        assert_eq!(
            parse_line("option name Skill Level type spin default 20 min 0 max 20"),
            EngineLine::Option { name: "Skill Level".into() }
        );
        assert_eq!(
            parse_line("option name Clear Hash type button"),
            EngineLine::Option { name: "Clear Hash".into() }
        );
    }

    #[test]
    fn test_parse_bestmove() {
        assert_eq!(
            parse_line("bestmove e2e4 ponder e7e5"),
            EngineLine::BestMove(Some("e2e4".into()))
        );
        assert_eq!(parse_line("bestmove (none)"), EngineLine::BestMove(None));
        assert_eq!(parse_line("bestmove 0000"), EngineLine::BestMove(None));
        assert_eq!(parse_line("bestmove"), EngineLine::BestMove(None));
    }

    #[test]
    fn test_parse_info_depth() {
        let line = "info depth 20 seldepth 25 multipv 1 score cp 35 nodes 100000 pv e2e4";
        assert_eq!(parse_line(line), EngineLine::Info { depth: Some(20) });
        assert_eq!(parse_line("info string hello"), EngineLine::Info { depth: None });
    }

    #[test]
    fn test_unknown_lines_tolerated() {
        assert_eq!(parse_line("uciok"), EngineLine::UciOk);
        assert_eq!(parse_line("  readyok  "), EngineLine::ReadyOk);
        assert_eq!(
            parse_line("No such option: Hashh"),
            EngineLine::NoSuchOption("Hashh".into())
        );
        assert_eq!(
            parse_line("Stockfish 16 by the Stockfish developers"),
            EngineLine::Other("Stockfish 16 by the Stockfish developers".into())
        );
        assert_eq!(parse_line(""), EngineLine::Other(String::new()));
    }
}
