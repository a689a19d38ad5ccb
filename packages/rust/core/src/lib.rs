//! Pipeline orchestration for docfill.
//!
//! This crate ties together text extraction, variable identification, and
//! document filling into the session-based `upload → analyze → generate`
//! workflow.

pub mod pipeline;

pub use pipeline::{AnalyzeOutcome, Pipeline, ProgressReporter, SilentProgress};
