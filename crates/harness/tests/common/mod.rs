#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use harness::config::{RunConfig, Timeouts};
use suite_core::PositionRecord;
use tempfile::TempDir;

pub const FEN_E4: &str = "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1";
pub const FEN_D4: &str = "4k3/8/8/8/8/8/3P4/4K3 w - - 0 1";
pub const FEN_C4: &str = "4k3/8/8/8/8/8/2P5/4K3 w - - 0 1";
pub const FEN_F4: &str = "4k3/8/8/8/8/8/5P2/4K3 w - - 0 1";

/// A `uci-stub` wrapped in a shell script carrying its scripted behaviour.
pub struct StubEngine {
    _dir: TempDir,
    pub path: PathBuf,
    pub log: PathBuf,
}

impl StubEngine {
    pub fn new(vars: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("uci.log");
        let path = dir.path().join("engine.sh");

        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!("export UCI_STUB_LOG='{}'\n", log.display()));
        script.push_str(&format!(
            "export UCI_STUB_SPAWNS='{}'\n",
            dir.path().join("spawns").display()
        ));
        for (key, value) in vars {
            script.push_str(&format!("export {key}='{value}'\n"));
        }
        script.push_str(&format!("exec '{}' \"$@\"\n", env!("CARGO_BIN_EXE_uci-stub")));

        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            _dir: dir,
            path,
            log,
        }
    }

    /// Commands the engine processes received, in order.
    pub fn received(&self) -> Vec<String> {
        read_lines(&self.log)
    }

    /// Number of engine processes that were started.
    pub fn spawn_count(&self) -> usize {
        self.received().iter().filter(|l| l.trim() == "uci").count()
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        startup: Duration::from_secs(5),
        move_overhead: Duration::from_millis(50),
        stop_grace: Duration::from_millis(500),
        quit_grace: Duration::from_millis(500),
    }
}

pub fn run_config(engine: &StubEngine, workers: usize, move_time_ms: u64) -> RunConfig {
    let mut config = RunConfig::new(&engine.path, "Stub");
    config.workers = workers;
    config.move_time = Duration::from_millis(move_time_ms);
    config.timeouts = fast_timeouts();
    config
}

pub fn position(label: &str, fen: &str, moves: &[(&str, u32)]) -> PositionRecord {
    PositionRecord::new(
        label,
        fen,
        moves.iter().map(|(m, p)| (m.to_string(), *p)).collect(),
    )
    .unwrap()
}

/// Stub answer table entry for a FEN.
pub fn answer(fen: &str, mv: &str) -> String {
    format!("{fen}={mv}")
}
