//! Run configuration: engine, worker count, time budget and policy timeouts

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::HarnessError;

/// Consecutive spawn failures a worker tolerates before abandoning
pub const DEFAULT_MAX_SPAWN_ATTEMPTS: u32 = 2;

/// Upper bound for the per-position search time and each policy timeout
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Policy timeouts around the engine process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Spawn + `uci`/`uciok` + `isready`/`readyok`
    pub startup: Duration,

    /// Slack past the move time before the session sends `stop`
    pub move_overhead: Duration,

    /// How long to wait for `bestmove` after `stop`
    pub stop_grace: Duration,

    /// How long to wait for the process to exit after `quit`
    pub quit_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup: Duration::from_secs(10),
            move_overhead: Duration::from_millis(250),
            stop_grace: Duration::from_secs(2),
            quit_grace: Duration::from_secs(2),
        }
    }
}

impl Timeouts {
    /// Defaults, overridden by `HARNESS_*_MS` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            startup: env_millis("HARNESS_STARTUP_TIMEOUT_MS").unwrap_or(defaults.startup),
            move_overhead: env_millis("HARNESS_MOVE_OVERHEAD_MS").unwrap_or(defaults.move_overhead),
            stop_grace: env_millis("HARNESS_STOP_GRACE_MS").unwrap_or(defaults.stop_grace),
            quit_grace: env_millis("HARNESS_QUIT_GRACE_MS").unwrap_or(defaults.quit_grace),
        }
    }
}

/// One `Name=Value` engine option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOption {
    pub name: String,
    pub value: String,
}

impl FromStr for EngineOption {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| HarnessError::Config(format!("option '{s}' is not Name=Value")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(HarnessError::Config(format!("option '{s}' has no name")));
        }
        Ok(Self {
            name: name.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Parse `Name=Value` strings, warning about and skipping malformed ones.
pub fn parse_options(raw: &[String]) -> Vec<EngineOption> {
    raw.iter()
        .filter_map(|s| match s.parse::<EngineOption>() {
            Ok(opt) => Some(opt),
            Err(e) => {
                warn!(option = %s, error = %e, "Ignoring invalid option format, use Name=Value");
                None
            }
        })
        .collect()
}

#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Path to the engine executable
    pub engine_path: PathBuf,

    /// Name used in outcomes and report file names
    pub engine_name: String,

    /// Number of parallel engine processes
    pub workers: usize,

    /// Search time per position
    pub move_time: Duration,

    /// Options applied once per session, in order
    pub options: Vec<EngineOption>,

    pub timeouts: Timeouts,

    /// Consecutive spawn failures before a worker gives up
    pub max_spawn_attempts: u32,

    /// Directory for per-worker UCI transcripts; `None` disables them
    pub uci_log_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(engine_path: impl Into<PathBuf>, engine_name: impl Into<String>) -> Self {
        Self {
            engine_path: engine_path.into(),
            engine_name: engine_name.into(),
            workers: 1,
            move_time: Duration::from_secs(1),
            options: Vec::new(),
            timeouts: Timeouts::default(),
            max_spawn_attempts: DEFAULT_MAX_SPAWN_ATTEMPTS,
            uci_log_dir: None,
        }
    }

    /// The harness checks only what it depends on; the rest is the caller's job.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.workers < 1 {
            return Err(HarnessError::Config("worker count must be at least 1".into()));
        }
        if self.move_time.is_zero() {
            return Err(HarnessError::Config("move time must be greater than 0".into()));
        }
        if self.move_time > MAX_DURATION {
            return Err(HarnessError::Config(format!(
                "move time {:?} exceeds {MAX_DURATION:?}",
                self.move_time
            )));
        }
        let t = &self.timeouts;
        for (name, value) in [
            ("startup timeout", t.startup),
            ("move overhead", t.move_overhead),
            ("stop grace", t.stop_grace),
            ("quit grace", t.quit_grace),
        ] {
            if value > MAX_DURATION {
                return Err(HarnessError::Config(format!(
                    "{name} {value:?} exceeds {MAX_DURATION:?}"
                )));
            }
        }
        if self.max_spawn_attempts < 1 {
            return Err(HarnessError::Config("max spawn attempts must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option() {
        let opt: EngineOption = "Hash = 128".parse().unwrap();
        assert_eq!(opt.name, "Hash");
        assert_eq!(opt.value, "128");

        let opt: EngineOption = "SyzygyPath=/tb/a=b".parse().unwrap();
        assert_eq!(opt.value, "/tb/a=b");

        assert!("Threads".parse::<EngineOption>().is_err());
        assert!("=4".parse::<EngineOption>().is_err());
    }

    #[test]
    fn test_parse_options_skips_malformed() {
        let raw = vec!["Threads=4".to_string(), "bogus".to_string(), "Hash=64".to_string()];
        let opts = parse_options(&raw);
        let names: Vec<&str> = opts.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Threads", "Hash"]);
    }

    #[test]
    fn test_validate() {
        let mut config = RunConfig::new("/usr/bin/stockfish", "Stockfish");
        assert!(config.validate().is_ok());

        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 4;
        config.move_time = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_absurd_durations() {
        let mut config = RunConfig::new("/usr/bin/stockfish", "Stockfish");
        config.move_time = MAX_DURATION;
        assert!(config.validate().is_ok());

        // --movetime 1e15
        config.move_time = Duration::from_secs_f64(1e15);
        assert!(matches!(config.validate(), Err(HarnessError::Config(_))));

        config.move_time = Duration::from_secs(1);
        config.timeouts.stop_grace = Duration::from_millis(u64::MAX);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stop grace"), "{err}");
    }
}
