//! Loading aggregate roots into a unit of work.
//!
//! A repository composes a root factory, an event stream reader and a
//! [`UnitOfWork`]: roots already attached are returned as is, anything else
//! is rebuilt by replaying its stream page by page and attached with the
//! stream version it reflects. [`Repository`] drives a blocking
//! [`EventStreamReader`]; [`AsyncRepository`] an [`AsyncEventStreamReader`].
//!
//! The unit of work is borrowed mutably for the whole lookup, so each
//! identifier is read at most once per unit of work even for the async
//! repository.

use std::marker::PhantomData;

use thiserror::Error;

use crate::{
    aggregate::{AggregateRoot, AggregateRootEntity, AggregateState, RehydrationError},
    concurrency::INITIAL_VERSION,
    router::RouteError,
    store::{AsyncEventStreamReader, EventStreamReader, StreamRead, StreamSlice},
    unit_of_work::{Aggregate, UnitOfWork, UnitOfWorkError},
};

/// Events requested per read unless configured otherwise.
pub const DEFAULT_SLICE_SIZE: usize = 500;

/// Error type for repository lookups.
#[derive(Debug, Error)]
pub enum RepositoryError<ReadError>
where
    ReadError: std::error::Error + 'static,
{
    #[error("aggregate `{identifier}` of kind `{root_kind}` not found")]
    NotFound {
        identifier: String,
        root_kind: &'static str,
    },
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),
    #[error("failed to rebuild aggregate state: {0}")]
    Rehydration(#[from] RehydrationError),
    #[error("failed to create aggregate root: {0}")]
    Route(#[from] RouteError),
    #[error("aggregate `{identifier}` is attached as `{actual}`, not `{expected}`")]
    RootTypeMismatch {
        identifier: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("reader made no progress on stream `{identifier}` at position {position}")]
    StalledRead { identifier: String, position: u64 },
    #[error("failed to read stream: {0}")]
    Read(#[source] ReadError),
}

/// Creates pristine roots for the repository to replay history into.
pub trait RootFactory<R> {
    /// # Errors
    ///
    /// Returns [`RouteError`] if the root's routes cannot be built.
    fn create(&self) -> Result<R, RouteError>;
}

impl<R, F> RootFactory<R> for F
where
    F: Fn() -> Result<R, RouteError>,
{
    fn create(&self) -> Result<R, RouteError> {
        self()
    }
}

/// Factory for [`AggregateRootEntity`] over a `Default` state.
#[derive(Debug, Clone, Copy, Default)]
pub struct PristineFactory;

impl<S: AggregateState + Default> RootFactory<AggregateRootEntity<S>> for PristineFactory {
    fn create(&self) -> Result<AggregateRootEntity<S>, RouteError> {
        AggregateRootEntity::new(S::default())
    }
}

/// Repository over a blocking reader.
#[derive(Debug)]
pub struct Repository<R, F, Rd> {
    factory: F,
    reader: Rd,
    slice_size: usize,
    _root: PhantomData<fn() -> R>,
}

impl<R, F, Rd> Repository<R, F, Rd> {
    #[must_use]
    pub const fn new(factory: F, reader: Rd) -> Self {
        Self {
            factory,
            reader,
            slice_size: DEFAULT_SLICE_SIZE,
            _root: PhantomData,
        }
    }

    /// Number of events requested per read. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_slice_size(mut self, slice_size: usize) -> Self {
        self.slice_size = slice_size.max(1);
        self
    }

    #[must_use]
    pub const fn slice_size(&self) -> usize {
        self.slice_size
    }

    #[must_use]
    pub const fn reader(&self) -> &Rd {
        &self.reader
    }
}

impl<R, F, Rd> Repository<R, F, Rd>
where
    R: AggregateRoot,
    F: RootFactory<R>,
    Rd: EventStreamReader,
{
    /// Like [`Repository::try_get`], but a missing stream is an error.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the stream does not exist, or
    /// any error of [`Repository::try_get`].
    pub fn get<'u>(
        &self,
        uow: &'u mut UnitOfWork,
        identifier: &str,
    ) -> Result<&'u mut R, RepositoryError<Rd::Error>> {
        self.try_get(uow, identifier)?
            .ok_or_else(|| not_found::<R, _>(identifier))
    }

    /// Look up a root, replaying and attaching it on first access.
    ///
    /// Returns `None` if the stream does not exist; nothing is attached then.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the read fails, the root cannot be
    /// created or rebuilt, or the attached root is not an `R`.
    #[tracing::instrument(skip(self, uow), fields(root_kind = R::root_kind()))]
    pub fn try_get<'u>(
        &self,
        uow: &'u mut UnitOfWork,
        identifier: &str,
    ) -> Result<Option<&'u mut R>, RepositoryError<Rd::Error>> {
        if uow.contains(identifier) {
            tracing::trace!("identity map hit");
            return uow.try_get_mut(identifier).map(downcast).transpose();
        }

        let mut slice = match self.read(identifier, INITIAL_VERSION)? {
            StreamRead::NotFound => {
                tracing::debug!("stream not found");
                return Ok(None);
            }
            StreamRead::Slice(slice) => slice,
        };
        let mut replay = Replay::new(self.factory.create()?);
        loop {
            match replay.feed::<Rd::Error>(identifier, slice)? {
                Progress::Done => return replay.attach(uow, identifier).map(Some),
                Progress::More(next) => {
                    slice = match self.read(identifier, next)? {
                        StreamRead::NotFound => {
                            tracing::debug!(position = next, "stream vanished during replay");
                            return Ok(None);
                        }
                        StreamRead::Slice(slice) => slice,
                    };
                }
            }
        }
    }

    /// Attach a new root with no stream version.
    ///
    /// # Errors
    ///
    /// Returns [`UnitOfWorkError`] if `identifier` is empty or already
    /// attached.
    pub fn add(
        &self,
        uow: &mut UnitOfWork,
        identifier: &str,
        root: R,
    ) -> Result<(), UnitOfWorkError> {
        add(uow, identifier, root)
    }

    fn read(&self, identifier: &str, start: u64) -> Result<StreamRead, RepositoryError<Rd::Error>> {
        self.reader
            .read_slice(identifier, start, self.slice_size)
            .map_err(RepositoryError::Read)
    }
}

/// Repository over an asynchronous reader.
///
/// Same contract as [`Repository`]; only the reads suspend.
#[derive(Debug)]
pub struct AsyncRepository<R, F, Rd> {
    factory: F,
    reader: Rd,
    slice_size: usize,
    _root: PhantomData<fn() -> R>,
}

impl<R, F, Rd> AsyncRepository<R, F, Rd> {
    #[must_use]
    pub const fn new(factory: F, reader: Rd) -> Self {
        Self {
            factory,
            reader,
            slice_size: DEFAULT_SLICE_SIZE,
            _root: PhantomData,
        }
    }

    /// Number of events requested per read. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_slice_size(mut self, slice_size: usize) -> Self {
        self.slice_size = slice_size.max(1);
        self
    }

    #[must_use]
    pub const fn slice_size(&self) -> usize {
        self.slice_size
    }

    #[must_use]
    pub const fn reader(&self) -> &Rd {
        &self.reader
    }
}

impl<R, F, Rd> AsyncRepository<R, F, Rd>
where
    R: AggregateRoot,
    F: RootFactory<R> + Sync,
    Rd: AsyncEventStreamReader,
{
    /// Like [`AsyncRepository::try_get`], but a missing stream is an error.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the stream does not exist, or
    /// any error of [`AsyncRepository::try_get`].
    pub async fn get<'u>(
        &self,
        uow: &'u mut UnitOfWork,
        identifier: &str,
    ) -> Result<&'u mut R, RepositoryError<Rd::Error>> {
        self.try_get(uow, identifier)
            .await?
            .ok_or_else(|| not_found::<R, _>(identifier))
    }

    /// Look up a root, replaying and attaching it on first access.
    ///
    /// # Errors
    ///
    /// See [`Repository::try_get`].
    #[tracing::instrument(skip(self, uow), fields(root_kind = R::root_kind()))]
    pub async fn try_get<'u>(
        &self,
        uow: &'u mut UnitOfWork,
        identifier: &str,
    ) -> Result<Option<&'u mut R>, RepositoryError<Rd::Error>> {
        if uow.contains(identifier) {
            tracing::trace!("identity map hit");
            return uow.try_get_mut(identifier).map(downcast).transpose();
        }

        let mut slice = match self.read(identifier, INITIAL_VERSION).await? {
            StreamRead::NotFound => {
                tracing::debug!("stream not found");
                return Ok(None);
            }
            StreamRead::Slice(slice) => slice,
        };
        let mut replay = Replay::new(self.factory.create()?);
        loop {
            match replay.feed::<Rd::Error>(identifier, slice)? {
                Progress::Done => return replay.attach(uow, identifier).map(Some),
                Progress::More(next) => {
                    slice = match self.read(identifier, next).await? {
                        StreamRead::NotFound => {
                            tracing::debug!(position = next, "stream vanished during replay");
                            return Ok(None);
                        }
                        StreamRead::Slice(slice) => slice,
                    };
                }
            }
        }
    }

    /// Attach a new root with no stream version.
    ///
    /// # Errors
    ///
    /// Returns [`UnitOfWorkError`] if `identifier` is empty or already
    /// attached.
    pub fn add(
        &self,
        uow: &mut UnitOfWork,
        identifier: &str,
        root: R,
    ) -> Result<(), UnitOfWorkError> {
        add(uow, identifier, root)
    }

    async fn read(
        &self,
        identifier: &str,
        start: u64,
    ) -> Result<StreamRead, RepositoryError<Rd::Error>> {
        self.reader
            .read_slice(identifier, start, self.slice_size)
            .await
            .map_err(RepositoryError::Read)
    }
}

fn add<R: AggregateRoot>(
    uow: &mut UnitOfWork,
    identifier: &str,
    root: R,
) -> Result<(), UnitOfWorkError> {
    uow.attach(Aggregate::new(identifier, None, root)?)?;
    Ok(())
}

fn not_found<R: AggregateRoot, E: std::error::Error + 'static>(identifier: &str) -> RepositoryError<E> {
    RepositoryError::NotFound {
        identifier: identifier.to_string(),
        root_kind: R::root_kind(),
    }
}

fn downcast<R: AggregateRoot, E: std::error::Error + 'static>(
    aggregate: &mut Aggregate,
) -> Result<&mut R, RepositoryError<E>> {
    let actual = aggregate.root().kind();
    let identifier = aggregate.identifier().to_string();
    aggregate
        .downcast_mut::<R>()
        .ok_or_else(|| RepositoryError::RootTypeMismatch {
            identifier,
            expected: R::root_kind(),
            actual,
        })
}

enum Progress {
    More(u64),
    Done,
}

/// A root being rebuilt from consecutive slices of its stream.
struct Replay<R> {
    root: R,
    position: u64,
    version: Option<u64>,
}

impl<R: AggregateRoot> Replay<R> {
    const fn new(root: R) -> Self {
        Self {
            root,
            position: INITIAL_VERSION,
            version: None,
        }
    }

    fn feed<E: std::error::Error + 'static>(
        &mut self,
        identifier: &str,
        slice: StreamSlice,
    ) -> Result<Progress, RepositoryError<E>> {
        self.root.initialize(&slice.events)?;
        self.version = Some(slice.last_version);
        tracing::trace!(
            position = self.position,
            events = slice.events.len(),
            end_of_stream = slice.end_of_stream,
            "replayed slice"
        );

        if slice.end_of_stream {
            return Ok(Progress::Done);
        }
        if slice.next_version <= self.position {
            return Err(RepositoryError::StalledRead {
                identifier: identifier.to_string(),
                position: self.position,
            });
        }
        self.position = slice.next_version;
        Ok(Progress::More(self.position))
    }

    fn attach<'u, E: std::error::Error + 'static>(
        self,
        uow: &'u mut UnitOfWork,
        identifier: &str,
    ) -> Result<&'u mut R, RepositoryError<E>> {
        tracing::debug!(version = ?self.version, "aggregate rehydrated");
        let aggregate = uow.attach(Aggregate::new(identifier, self.version, self.root)?)?;
        downcast(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        error::Error as _,
        io,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{
        aggregate::Apply,
        event::{DomainEvent, SharedEvent},
        router::{EventRouter, ExactRouter},
    };

    #[derive(Debug)]
    struct Ticked;

    impl DomainEvent for Ticked {
        const KIND: &'static str = "ticked";
    }

    #[derive(Debug, Default)]
    struct Clock {
        ticks: u32,
    }

    impl Apply<Ticked> for Clock {
        fn apply(&mut self, _event: &Ticked) {
            self.ticks += 1;
        }
    }

    impl AggregateState for Clock {
        const KIND: &'static str = "clock";
        type Router = ExactRouter<Self>;

        fn routes(router: &mut Self::Router) -> Result<(), RouteError> {
            router.register::<Ticked, _>(<Self as Apply<Ticked>>::apply)
        }
    }

    type ClockRoot = AggregateRootEntity<Clock>;

    /// Answers reads from a fixed script.
    struct Scripted(Mutex<VecDeque<StreamRead>>);

    impl Scripted {
        fn new(reads: impl IntoIterator<Item = StreamRead>) -> Self {
            Self(Mutex::new(reads.into_iter().collect()))
        }
    }

    impl EventStreamReader for Scripted {
        type Error = io::Error;

        fn read_slice(&self, _: &str, _: u64, _: usize) -> Result<StreamRead, io::Error> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::other("script exhausted"))
        }
    }

    fn slice(ticks: usize, last_version: u64, next_version: u64, end: bool) -> StreamRead {
        let events = (0..ticks)
            .map(|_| Arc::new(Ticked) as SharedEvent)
            .collect();
        StreamRead::Slice(StreamSlice {
            events,
            last_version,
            next_version,
            end_of_stream: end,
        })
    }

    fn repository(reader: Scripted) -> Repository<ClockRoot, PristineFactory, Scripted> {
        Repository::new(PristineFactory, reader)
    }

    #[test]
    fn slice_size_defaults_and_is_at_least_one() {
        let repo = repository(Scripted::new([]));
        assert_eq!(repo.slice_size(), DEFAULT_SLICE_SIZE);
        assert_eq!(repo.with_slice_size(0).slice_size(), 1);
    }

    #[test]
    fn replays_every_slice_and_records_last_version() {
        let repo = repository(Scripted::new([
            slice(2, 4, 2, false),
            slice(2, 4, 4, false),
            slice(1, 4, 5, true),
        ]));
        let mut uow = UnitOfWork::new();

        let root = repo.get(&mut uow, "clock-1").unwrap();
        assert_eq!(root.state().ticks, 5);
        assert_eq!(uow.try_get("clock-1").unwrap().version(), Some(4));
    }

    #[test]
    fn stalled_reader_is_reported() {
        let repo = repository(Scripted::new([slice(1, 9, 0, false)]));
        let mut uow = UnitOfWork::new();

        let err = repo.try_get(&mut uow, "clock-1").unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::StalledRead { position: 0, .. }
        ));
        assert!(uow.is_empty());
    }

    #[test]
    fn stream_vanishing_mid_replay_reads_as_missing() {
        let repo = repository(Scripted::new([slice(1, 3, 1, false), StreamRead::NotFound]));
        let mut uow = UnitOfWork::new();

        assert!(repo.try_get(&mut uow, "clock-1").unwrap().is_none());
        assert!(uow.is_empty());
    }

    #[test]
    fn reader_errors_keep_their_source() {
        let repo = repository(Scripted::new([]));
        let mut uow = UnitOfWork::new();

        let err = repo.get(&mut uow, "clock-1").unwrap_err();
        assert!(matches!(err, RepositoryError::Read(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn failing_factory_surfaces_route_error() {
        let factory = || -> Result<ClockRoot, RouteError> {
            Err(RouteError::DuplicateRoute {
                event_type: "Ticked",
            })
        };
        let repo = Repository::new(factory, Scripted::new([slice(1, 0, 1, true)]));
        let mut uow = UnitOfWork::new();

        let err = repo.try_get(&mut uow, "clock-1").unwrap_err();
        assert!(matches!(err, RepositoryError::Route(_)));
    }

    #[test]
    fn not_found_names_identifier_and_kind() {
        let err: RepositoryError<io::Error> = not_found::<ClockRoot, _>("clock-9");
        let msg = err.to_string();
        assert!(msg.contains("clock-9"));
        assert!(msg.contains("clock"));
    }
}
