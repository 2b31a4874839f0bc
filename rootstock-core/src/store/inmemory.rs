//! In-memory event store implementation for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! every port in [`store`](super): blocking and async reads, and
//! version-checked appends. Streams can be soft-deleted, after which they
//! read as not found and reject appends.
//!
//! # Example
//!
//! ```
//! use rootstock_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! assert_eq!(store.stream_version("dog-1").unwrap(), None);
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use nonempty::NonEmpty;

use crate::{
    concurrency::ConcurrencyConflict,
    event::SharedEvent,
    store::{
        AppendError, AppendResult, AsyncEventStreamReader, EventStreamReader, EventStreamWriter,
        StreamRead, StreamSlice,
    },
};

/// In-memory event store that keeps streams in a hash map.
///
/// Clones share the same streams.
#[derive(Clone, Debug, Default)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<String, Stream>,
}

#[derive(Debug, Default)]
struct Stream {
    events: Vec<SharedEvent>,
    deleted: bool,
}

impl Stream {
    fn version(&self) -> Option<u64> {
        if self.deleted {
            return None;
        }
        self.events.len().checked_sub(1).map(|last| last as u64)
    }
}

/// Error type for in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("stream `{identifier}` was deleted")]
    StreamDeleted { identifier: String },
    #[error("in-memory store lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for InMemoryError {
    fn from(_: PoisonError<T>) -> Self {
        Self::Poisoned
    }
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read up to `max_count` events starting at `start`.
    ///
    /// Deleted and missing streams read as [`StreamRead::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`InMemoryError::Poisoned`] if the lock is poisoned.
    #[tracing::instrument(skip(self))]
    pub fn read_stream(
        &self,
        identifier: &str,
        start: u64,
        max_count: usize,
    ) -> Result<StreamRead, InMemoryError> {
        let inner = self.inner.read()?;
        let Some(stream) = inner.streams.get(identifier).filter(|stream| !stream.deleted) else {
            tracing::trace!("stream not found");
            return Ok(StreamRead::NotFound);
        };
        let Some(last_version) = stream.version() else {
            return Ok(StreamRead::NotFound);
        };

        let len = stream.events.len();
        let from = usize::try_from(start).unwrap_or(usize::MAX).min(len);
        let to = from.saturating_add(max_count).min(len);
        let slice = StreamSlice {
            events: stream.events[from..to].to_vec(),
            last_version,
            next_version: to as u64,
            end_of_stream: to == len,
        };
        drop(inner);

        tracing::trace!(
            events = slice.events.len(),
            next_version = slice.next_version,
            end_of_stream = slice.end_of_stream,
            "read slice"
        );
        Ok(StreamRead::Slice(slice))
    }

    /// Append `events` if the stream is at `expected_version`.
    ///
    /// `None` expects the stream not to exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Conflict`] on version mismatch, and
    /// [`AppendError::Store`] if the stream was deleted or the lock is
    /// poisoned.
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    pub fn append_events(
        &self,
        identifier: &str,
        expected_version: Option<u64>,
        events: NonEmpty<SharedEvent>,
    ) -> Result<AppendResult, AppendError<InMemoryError>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| AppendError::store(InMemoryError::from(e)))?;
        let current = match inner.streams.get(identifier) {
            Some(stream) if stream.deleted => {
                return Err(AppendError::store(InMemoryError::StreamDeleted {
                    identifier: identifier.to_string(),
                }));
            }
            Some(stream) => stream.version(),
            None => None,
        };

        if let Err(conflict) = ConcurrencyConflict::check(expected_version, current) {
            tracing::debug!(?expected_version, ?current, "version mismatch, rejecting append");
            return Err(conflict.into());
        }

        let result = Self::push(&mut inner, identifier, events);
        drop(inner);
        tracing::debug!(last_version = result.last_version, "events appended to stream");
        Ok(result)
    }

    /// Append `events` without checking the stream version.
    ///
    /// # Errors
    ///
    /// Returns [`InMemoryError::StreamDeleted`] if the stream was deleted.
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    pub fn append_unchecked(
        &self,
        identifier: &str,
        events: NonEmpty<SharedEvent>,
    ) -> Result<AppendResult, InMemoryError> {
        let mut inner = self.inner.write()?;
        if inner
            .streams
            .get(identifier)
            .is_some_and(|stream| stream.deleted)
        {
            return Err(InMemoryError::StreamDeleted {
                identifier: identifier.to_string(),
            });
        }

        let result = Self::push(&mut inner, identifier, events);
        drop(inner);
        tracing::debug!(last_version = result.last_version, "events appended to stream (unchecked)");
        Ok(result)
    }

    /// Soft-delete a stream. Returns whether a live stream was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`InMemoryError::Poisoned`] if the lock is poisoned.
    #[tracing::instrument(skip(self))]
    pub fn delete_stream(&self, identifier: &str) -> Result<bool, InMemoryError> {
        let mut inner = self.inner.write()?;
        let deleted = inner
            .streams
            .get_mut(identifier)
            .filter(|stream| !stream.deleted)
            .is_some_and(|stream| {
                stream.deleted = true;
                true
            });
        drop(inner);
        tracing::debug!(deleted, "delete stream");
        Ok(deleted)
    }

    /// Current version of a stream; `None` for missing or deleted streams.
    ///
    /// # Errors
    ///
    /// Returns [`InMemoryError::Poisoned`] if the lock is poisoned.
    pub fn stream_version(&self, identifier: &str) -> Result<Option<u64>, InMemoryError> {
        let inner = self.inner.read()?;
        let version = inner.streams.get(identifier).and_then(Stream::version);
        tracing::trace!(identifier, ?version, "retrieved stream version");
        Ok(version)
    }

    fn push(inner: &mut Inner, identifier: &str, events: NonEmpty<SharedEvent>) -> AppendResult {
        let stream = inner.streams.entry(identifier.to_string()).or_default();
        stream.events.extend(events);
        AppendResult {
            last_version: stream.events.len() as u64 - 1,
        }
    }
}

impl EventStreamReader for Store {
    type Error = InMemoryError;

    fn read_slice(
        &self,
        identifier: &str,
        start: u64,
        max_count: usize,
    ) -> Result<StreamRead, Self::Error> {
        self.read_stream(identifier, start, max_count)
    }
}

impl AsyncEventStreamReader for Store {
    type Error = InMemoryError;

    fn read_slice<'a>(
        &'a self,
        identifier: &'a str,
        start: u64,
        max_count: usize,
    ) -> impl Future<Output = Result<StreamRead, Self::Error>> + Send + 'a {
        std::future::ready(self.read_stream(identifier, start, max_count))
    }
}

impl EventStreamWriter for Store {
    type Error = InMemoryError;

    fn append<'a>(
        &'a self,
        identifier: &'a str,
        expected_version: Option<u64>,
        events: NonEmpty<SharedEvent>,
    ) -> impl Future<Output = Result<AppendResult, AppendError<Self::Error>>> + Send + 'a {
        std::future::ready(self.append_events(identifier, expected_version, events))
    }
}
