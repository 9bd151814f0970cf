//! Netperf client output parsing
//!
//! The client runs `netperf -H <server>` with the default TCP_STREAM test,
//! which prints a fixed banner followed by a single result row:
//!
//! ```text
//! MIGRATED TCP STREAM TEST from 0.0.0.0 (0.0.0.0) port 0 AF_INET to 10.0.0.5 () port 0 AF_INET
//! Recv   Send    Send
//! Socket Socket  Message  Elapsed
//! Size   Size    Size     Time     Throughput
//! bytes  bytes   bytes    secs.    10^6bits/sec
//!
//!  87380  16384  16384    10.00    9408.31
//! ```
//!
//! The layout is owned by netperf; the line and field positions below must
//! stay exactly as they are.

use std::num::ParseFloatError;

/// Minimum number of lines in a complete netperf report
pub const MIN_LINES: usize = 7;
/// Zero-based index of the result row
pub const RESULT_LINE: usize = 6;
/// Zero-based whitespace-separated field holding the throughput
pub const THROUGHPUT_FIELD: usize = 4;

/// The client produced output that is not a netperf report
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    /// Output ended before the result row
    #[error("expected at least {MIN_LINES} lines of netperf output, got {0}")]
    TooFewLines(usize),

    /// The result row is shorter than expected
    #[error("result line {line:?} has no field {THROUGHPUT_FIELD}")]
    MissingField {
        /// The offending line
        line: String,
    },

    /// The throughput field does not parse as a float
    #[error("throughput field {value:?} is not a number: {source}")]
    NotNumeric {
        /// The raw field
        value: String,
        /// Float parse failure
        source: ParseFloatError,
    },

    /// The throughput field parsed to NaN or infinity
    #[error("throughput field {0:?} is not a finite number")]
    NotFinite(String),
}

/// Extract the throughput from a completed client's log output.
pub fn parse_throughput(raw: &str) -> Result<f64, FormatError> {
    let lines: Vec<&str> = raw.split('\n').collect();
    let line = match lines.get(RESULT_LINE) {
        Some(line) if lines.len() >= MIN_LINES => *line,
        _ => return Err(FormatError::TooFewLines(lines.len())),
    };

    let field = line
        .split_whitespace()
        .nth(THROUGHPUT_FIELD)
        .ok_or_else(|| FormatError::MissingField {
            line: line.to_string(),
        })?;

    let value: f64 = field.parse().map_err(|source| FormatError::NotNumeric {
        value: field.to_string(),
        source,
    })?;

    if !value.is_finite() {
        return Err(FormatError::NotFinite(field.to_string()));
    }
    Ok(value)
}
