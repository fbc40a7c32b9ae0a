//! Scripted UCI engine for integration tests.
//!
//! Behaviour comes from environment variables:
//!
//! - `UCI_STUB_NAME`: reported `id name` (default `UciStub`)
//! - `UCI_STUB_OPTIONS`: comma separated advertised options (default `Hash,Threads`)
//! - `UCI_STUB_REFUSE`: comma separated options answered with `No such option`
//! - `UCI_STUB_MOVES`: `fen-prefix=move` entries separated by `;`
//! - `UCI_STUB_DEFAULT_MOVE`: move for positions not in the table (default `e2e4`)
//! - `UCI_STUB_DELAY_MS`: think time before answering `go`
//! - `UCI_STUB_HANG`: `;` separated fen prefixes answered only on `stop`
//! - `UCI_STUB_CRASH`: `;` separated fen prefixes that make the process exit on `go`
//! - `UCI_STUB_IGNORE_STOP=1`: never answer `stop`
//! - `UCI_STUB_READY_LIMIT`: answer only the first N `isready`s
//! - `UCI_STUB_STARTUP`: `fail` exits at once, `silent` never answers the
//!   handshake, `fail-first:N` exits on the first N starts and `fail-after:N`
//!   on every start after the Nth
//! - `UCI_STUB_SPAWNS`: counter file of process starts, for `fail-first`/`fail-after`
//! - `UCI_STUB_LOG`: file that every received command is appended to

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::process;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

struct Script {
    name: String,
    options: Vec<String>,
    refuse: Vec<String>,
    moves: Vec<(String, String)>,
    default_move: String,
    delay: Duration,
    hang: Vec<String>,
    crash: Vec<String>,
    ignore_stop: bool,
    ready_limit: Option<usize>,
}

impl Script {
    fn from_env() -> Self {
        let list = |var: &str, sep: char| -> Vec<String> {
            env::var(var)
                .unwrap_or_default()
                .split(sep)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        };

        let moves = list("UCI_STUB_MOVES", ';')
            .into_iter()
            .filter_map(|entry| {
                let (fen, mv) = entry.rsplit_once('=')?;
                Some((fen.trim().to_string(), mv.trim().to_string()))
            })
            .collect();

        let options = match env::var("UCI_STUB_OPTIONS") {
            Ok(_) => list("UCI_STUB_OPTIONS", ','),
            Err(_) => vec!["Hash".to_string(), "Threads".to_string()],
        };

        Self {
            name: env::var("UCI_STUB_NAME").unwrap_or_else(|_| "UciStub".into()),
            options,
            refuse: list("UCI_STUB_REFUSE", ','),
            moves,
            default_move: env::var("UCI_STUB_DEFAULT_MOVE").unwrap_or_else(|_| "e2e4".into()),
            delay: Duration::from_millis(
                env::var("UCI_STUB_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            ),
            hang: list("UCI_STUB_HANG", ';'),
            crash: list("UCI_STUB_CRASH", ';'),
            ignore_stop: env::var("UCI_STUB_IGNORE_STOP").is_ok_and(|v| v == "1"),
            ready_limit: env::var("UCI_STUB_READY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    fn move_for(&self, fen: &str) -> &str {
        self.moves
            .iter()
            .find(|(prefix, _)| fen.starts_with(prefix.as_str()))
            .map(|(_, mv)| mv.as_str())
            .unwrap_or(self.default_move.as_str())
    }

    fn matches(prefixes: &[String], fen: &str) -> bool {
        prefixes.iter().any(|p| fen.starts_with(p.as_str()))
    }
}

struct Search {
    best_move: String,
    /// `None` until `stop`
    answer_at: Option<Instant>,
}

fn say(line: &str) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

/// Count this start in the `UCI_STUB_SPAWNS` file and return its number.
fn count_start() -> usize {
    let Ok(path) = env::var("UCI_STUB_SPAWNS") else {
        return 1;
    };
    let starts = fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(0)
        + 1;
    let _ = fs::write(&path, starts.to_string());
    starts
}

fn startup_fails(mode: &str) -> bool {
    if mode == "fail" {
        return true;
    }
    let Some((kind, n)) = mode.split_once(':') else {
        return false;
    };
    let Ok(n) = n.parse::<usize>() else {
        return false;
    };
    match kind {
        "fail-first" => count_start() <= n,
        "fail-after" => count_start() > n,
        _ => false,
    }
}

fn main() {
    let startup = env::var("UCI_STUB_STARTUP").unwrap_or_default();
    if startup_fails(&startup) {
        process::exit(1);
    }
    let silent = startup == "silent";
    let script = Script::from_env();

    let mut log = env::var("UCI_STUB_LOG")
        .ok()
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut fen = String::new();
    let mut ready_count = 0usize;
    let mut search: Option<Search> = None;

    loop {
        let received = match search.as_ref().and_then(|s| s.answer_at) {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let line = match received {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                if let Some(s) = search.take() {
                    say(&format!("bestmove {}", s.best_move));
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Some(file) = log.as_mut() {
            let _ = writeln!(file, "{line}");
        }
        if silent {
            continue;
        }

        let line = line.trim();
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("uci") => {
                say(&format!("id name {}", script.name));
                say("id author harness tests");
                for opt in &script.options {
                    say(&format!("option name {opt} type string default <empty>"));
                }
                say("uciok");
            }
            Some("isready") => {
                ready_count += 1;
                if script.ready_limit.map_or(true, |limit| ready_count <= limit) {
                    say("readyok");
                }
            }
            Some("setoption") => {
                let name = line
                    .split_once(" name ")
                    .map(|(_, rest)| rest.split(" value ").next().unwrap_or(rest).trim())
                    .unwrap_or("");
                let known = script.options.iter().any(|o| o.eq_ignore_ascii_case(name));
                let refused = script.refuse.iter().any(|o| o.eq_ignore_ascii_case(name));
                if !known || refused {
                    say(&format!("No such option: {name}"));
                }
            }
            Some("position") => {
                fen = line
                    .strip_prefix("position fen ")
                    .map(|rest| rest.split(" moves ").next().unwrap_or(rest).to_string())
                    .unwrap_or_default();
            }
            Some("go") => {
                if Script::matches(&script.crash, &fen) {
                    process::exit(3);
                }
                let answer_at = if Script::matches(&script.hang, &fen) {
                    None
                } else {
                    Some(Instant::now() + script.delay)
                };
                say("info depth 1 score cp 0");
                search = Some(Search {
                    best_move: script.move_for(&fen).to_string(),
                    answer_at,
                });
            }
            Some("stop") => {
                if !script.ignore_stop {
                    if let Some(s) = search.take() {
                        say(&format!("bestmove {}", s.best_move));
                    }
                }
            }
            Some("quit") => break,
            _ => {}
        }
    }
}
