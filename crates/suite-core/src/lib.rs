//! Test suite data model, scoring and aggregation.
//!
//! Everything here is pure: no processes, no I/O beyond reading a suite file.

pub mod aggregate;
pub mod epd;
pub mod error;
pub mod outcome;
pub mod position;
pub mod scoring;

pub use aggregate::{Aggregator, CategoryRow, PointsRow, Report, Tally};
pub use error::SuiteError;
pub use outcome::{Fault, Outcome, ScoredResult};
pub use position::PositionRecord;
