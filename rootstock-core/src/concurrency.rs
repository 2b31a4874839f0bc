//! Optimistic concurrency tokens.
//!
//! An aggregate remembers the version of the stream it was rebuilt from
//! (`Some(position of last event)`), or `None` when it was added as a new
//! aggregate. Writers compare that expectation against the stream's current
//! version before appending and refuse the write on mismatch.

use thiserror::Error;

/// Position of the first event in a stream.
pub const INITIAL_VERSION: u64 = 0;

/// Error indicating that a stream moved on since the aggregate was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", format_conflict(.expected.as_ref(), .actual.as_ref()))]
pub struct ConcurrencyConflict {
    /// The version we expected (from when we loaded the aggregate).
    /// `None` indicates we expected no stream.
    pub expected: Option<u64>,
    /// The actual current version in the store.
    /// `None` indicates the stream does not exist.
    pub actual: Option<u64>,
}

impl ConcurrencyConflict {
    /// Check an expected version against the stream's current version.
    ///
    /// # Errors
    ///
    /// Returns the conflict if the two differ.
    pub const fn check(expected: Option<u64>, actual: Option<u64>) -> Result<(), Self> {
        match (expected, actual) {
            (None, None) => Ok(()),
            (Some(expected), Some(actual)) if expected == actual => Ok(()),
            _ => Err(Self { expected, actual }),
        }
    }
}

/// Build a human-readable message for a [`ConcurrencyConflict`], including an
/// actionable hint for the caller.
fn format_conflict(expected: Option<&u64>, actual: Option<&u64>) -> String {
    match (expected, actual) {
        (None, Some(actual)) => {
            format!(
                "concurrency conflict: expected no stream, found version {actual} (hint: another \
                 process created this aggregate; reload and retry)"
            )
        }
        (Some(expected), Some(actual)) => {
            format!(
                "concurrency conflict: expected version {expected}, found {actual} (hint: stream \
                 was modified; reload and retry)"
            )
        }
        (Some(expected), None) => {
            format!(
                "concurrency conflict: expected version {expected}, found no stream (hint: stream \
                 was deleted; reload and retry)"
            )
        }
        (None, None) => "concurrency conflict: unexpected empty state".to_string(),
    }
}
