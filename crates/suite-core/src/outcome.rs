//! Evaluation outcomes flowing from the worker pool to the aggregator

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why an outcome carries no usable move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// No move within the time budget; the engine answered only after `stop`
    Timeout,
    /// Engine crashed, closed its pipes or ignored `stop`
    ProcessFault,
    /// The worker could not start an engine for this position
    HandshakeFailed,
    /// No worker was left to evaluate this position
    Abandoned,
}

impl Fault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fault::Timeout => "timeout",
            Fault::ProcessFault => "process_fault",
            Fault::HandshakeFailed => "handshake_failed",
            Fault::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw result of evaluating one position, before scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Index of the position in the loaded suite
    pub position_index: usize,
    /// Full position label
    pub position_id: String,
    pub category: String,
    /// Move reported by the engine, if any
    pub chosen_move: Option<String>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub engine_name: String,
    pub fault: Option<Fault>,
}

impl Outcome {
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// Points awarded for one outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub category: String,
    pub points_awarded: u32,
    pub max_points: u32,
    pub faulted: bool,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
