//! Output types returned by an extraction run.

use crate::pipeline::llm::RawResponse;
use crate::table::ResultTable;
use serde::{Serialize, Serializer};
use std::fmt;

/// Identifier of one extraction run (UUID v7, so ids sort by start time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex digits, for directory prefixes and short log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    pub run_id: RunId,
    /// One row per record returned by the model.
    pub table: ResultTable,
    /// The backend's answer before normalisation.
    pub raw_response: RawResponse,
    pub stats: ExtractionStats,
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    /// Page count of the source document.
    pub total_pages: usize,
    /// Pages rendered and sent to the model.
    pub sent_pages: usize,
    /// Rows in the result table.
    pub records: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub render_duration_ms: u64,
    pub model_duration_ms: u64,
    pub total_duration_ms: u64,
}
