#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use rootstock_core::test;
pub use rootstock_core::{
    aggregate,
    aggregate::{AggregateRoot, AggregateRootEntity, AggregateState, Apply, Lifecycle},
    concurrency,
    concurrency::{ConcurrencyConflict, INITIAL_VERSION},
    event,
    event::{DomainEvent, Event, SharedEvent, Upcast},
    repository,
    repository::{AsyncRepository, PristineFactory, Repository, RepositoryError, RootFactory},
    router,
    unit_of_work,
    unit_of_work::{Aggregate, UnitOfWork},
};
// Re-export proc macro derives so consumers only depend on `rootstock`.
pub use rootstock_macros::{AggregateState, DomainEvent};

pub mod store {

    pub use rootstock_core::store::{
        AsyncEventStreamReader, CommitError, EventStreamReader, EventStreamWriter, NonEmpty,
        StreamRead, StreamSlice, commit,
    };

    // Re-export low-level append types for writer implementors.
    pub use rootstock_core::store::{AppendError, AppendResult};

    pub use rootstock_core::store::inmemory;
}
