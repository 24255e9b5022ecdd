// src/process/mod.rs
pub mod decode;
pub mod headers;
pub mod tokenize;
pub mod utils;

pub use decode::{decode_row, ColumnPolicy};
pub use headers::normalize_header;
pub use tokenize::split_line;

use crate::schema::Dataset;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Counters from one parse, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Non-blank lines, header included.
    pub lines: usize,
    pub rows: usize,
    pub skipped: usize,
}

/// Turns a delimited text blob into typed records.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetParser {
    policy: ColumnPolicy,
}

impl DatasetParser {
    pub fn new(policy: ColumnPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ColumnPolicy {
        self.policy
    }

    /// Parse `text`, typing the columns named in `numeric` as numbers.
    ///
    /// `numeric` may hold raw header names; they are normalized the same way
    /// as the header row. Malformed rows are dropped, never fatal.
    pub fn parse(&self, text: &str, numeric: &HashSet<String>) -> Dataset {
        let (dataset, stats) = self.parse_with_stats(text, numeric);
        if stats.skipped > 0 {
            warn!(
                rows = stats.rows,
                skipped = stats.skipped,
                policy = ?self.policy,
                "dropped malformed rows"
            );
        }
        dataset
    }

    pub fn parse_with_stats(&self, text: &str, numeric: &HashSet<String>) -> (Dataset, ParseStats) {
        let mut stats = ParseStats::default();

        // `lines()` splits on LF and strips a trailing CR
        let mut lines = utils::strip_bom(text)
            .lines()
            .filter(|l| !l.trim().is_empty());

        let Some(header_line) = lines.next() else {
            return (Vec::new(), stats);
        };
        stats.lines = 1;

        let headers: Vec<String> = split_line(header_line)
            .iter()
            .map(|h| normalize_header(h))
            .collect();
        let numeric: HashSet<String> = numeric.iter().map(|h| normalize_header(h)).collect();

        let mut dataset = Vec::new();
        for (idx, line) in lines.enumerate() {
            stats.lines += 1;
            match decode_row(split_line(line), &headers, &numeric, self.policy) {
                Ok(record) => dataset.push(record),
                Err(e) => {
                    stats.skipped += 1;
                    // +2: one for the header, one for 1-based numbering
                    debug!(row = idx + 2, error = %e, "skipping row");
                }
            }
        }
        stats.rows = dataset.len();

        (dataset, stats)
    }
}

/// Parse with the default (lenient) column policy.
pub fn parse_dataset(text: &str, numeric: &HashSet<String>) -> Dataset {
    DatasetParser::default().parse(text, numeric)
}
