//! Evaluation sessions, run driver and result output.
//!
//! - [`session::EvalSession`]: one question about one image, turn by turn
//! - [`harness::Harness`]: every model over every corpus item
//! - [`report`]: result records, sinks and the CSV results file

pub mod harness;
pub mod report;
pub mod session;

pub use harness::{Harness, RunSummary};
pub use report::{CsvResultsWriter, RecordSink, ResultRecord, TableLayout, read_results};
pub use session::{EvalSession, SessionOutcome, SessionState};
