//! Concurrent EPD test harness for UCI engines.
//!
//! Spawns engine processes, runs every suite position under a fixed time
//! budget and writes scored reports.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod report;
pub mod uci;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::{EngineOption, RunConfig, Timeouts};
pub use engine::{EngineSession, SessionState};
pub use error::HarnessError;
pub use pool::{run_suite, RunResult};
