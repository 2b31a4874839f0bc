//! Event log ports and the commit path.
//!
//! Repositories read history through [`EventStreamReader`] (blocking) or
//! [`AsyncEventStreamReader`]; new events leave a unit of work through
//! [`commit`] and an [`EventStreamWriter`]. Streams are addressed by the
//! aggregate identifier and versioned by the position of their last event.
//! A reference in-memory implementation lives in [`inmemory`].
use std::future::Future;

pub use nonempty::NonEmpty;
use thiserror::Error;

use crate::{concurrency::ConcurrencyConflict, event::SharedEvent, unit_of_work::UnitOfWork};

pub mod inmemory;

/// One page of a stream read forward from some position.
#[derive(Clone, Debug)]
pub struct StreamSlice {
    /// Events in stream order.
    pub events: Vec<SharedEvent>,
    /// Version of the stream: position of its last event.
    pub last_version: u64,
    /// Position to read the next page from.
    pub next_version: u64,
    /// Whether this page reaches the end of the stream.
    pub end_of_stream: bool,
}

/// Outcome of reading a slice of a stream.
#[derive(Clone, Debug)]
pub enum StreamRead {
    /// The stream does not exist or was deleted.
    NotFound,
    Slice(StreamSlice),
}

/// Blocking access to event streams.
pub trait EventStreamReader {
    /// Reader-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read up to `max_count` events of `identifier`'s stream, starting at
    /// position `start`.
    ///
    /// # Errors
    ///
    /// Returns a reader-specific error when the read fails.
    fn read_slice(
        &self,
        identifier: &str,
        start: u64,
        max_count: usize,
    ) -> Result<StreamRead, Self::Error>;
}

/// Asynchronous access to event streams.
///
/// Same contract as [`EventStreamReader`].
pub trait AsyncEventStreamReader: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// # Errors
    ///
    /// Returns a reader-specific error when the read fails.
    fn read_slice<'a>(
        &'a self,
        identifier: &'a str,
        start: u64,
        max_count: usize,
    ) -> impl Future<Output = Result<StreamRead, Self::Error>> + Send + 'a;
}

/// Result of a successful append operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AppendResult {
    /// Version of the stream after the append.
    pub last_version: u64,
}

/// Error from append operations with version checking.
#[derive(Debug, Error)]
pub enum AppendError<StoreError>
where
    StoreError: std::error::Error,
{
    /// Another writer modified the stream.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError: std::error::Error> AppendError<StoreError> {
    /// Create a store error variant.
    pub const fn store(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Appends events to streams with optimistic concurrency.
pub trait EventStreamWriter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append `events` to `identifier`'s stream.
    ///
    /// `expected_version` is the version the caller last saw, or `None` if it
    /// expects the stream not to exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Conflict`] if the version doesn't match, or
    /// [`AppendError::Store`] if persistence fails.
    fn append<'a>(
        &'a self,
        identifier: &'a str,
        expected_version: Option<u64>,
        events: NonEmpty<SharedEvent>,
    ) -> impl Future<Output = Result<AppendResult, AppendError<Self::Error>>> + Send + 'a;
}

/// Error from [`commit`]: the aggregate whose append failed.
#[derive(Debug, Error)]
#[error("failed to commit aggregate `{identifier}`: {source}")]
pub struct CommitError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    pub identifier: String,
    #[source]
    pub source: AppendError<StoreError>,
}

/// Persist every pending change in `uow`, ending it.
///
/// Aggregates are committed one at a time in attach order, each with its
/// loaded version as the expected version. A successful append clears that
/// root's changes. The first failure stops the commit; aggregates committed
/// before it stay committed.
///
/// The versions held by `uow` are stale once its changes are appended, so the
/// unit of work is consumed. Load into a new one to continue.
///
/// Returns the number of aggregates committed.
///
/// # Errors
///
/// Returns [`CommitError`] naming the aggregate whose append failed.
#[tracing::instrument(skip_all)]
pub async fn commit<W>(mut uow: UnitOfWork, writer: &W) -> Result<usize, CommitError<W::Error>>
where
    W: EventStreamWriter,
{
    let mut committed = 0;
    for aggregate in uow.changes_mut() {
        let Some(events) = NonEmpty::from_slice(aggregate.root().changes()) else {
            continue;
        };
        let event_count = events.len();
        let expected_version = aggregate.version();
        let result = writer
            .append(aggregate.identifier(), expected_version, events)
            .await
            .map_err(|source| CommitError {
                identifier: aggregate.identifier().to_string(),
                source,
            })?;

        aggregate.root_mut().clear_changes();
        committed += 1;
        tracing::debug!(
            identifier = aggregate.identifier(),
            aggregate_kind = aggregate.root().kind(),
            event_count,
            ?expected_version,
            last_version = result.last_version,
            "aggregate committed"
        );
    }
    Ok(committed)
}
