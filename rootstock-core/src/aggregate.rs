//! Aggregate roots: state rebuilt from events, plus a buffer of new ones.
//!
//! Application state types implement [`AggregateState`] (usually through
//! `#[derive(AggregateState)]`) and one [`Apply<E>`] per event they react to.
//! [`AggregateRootEntity`] wraps such a state with its router and change
//! buffer. The object-safe [`AggregateRoot`] trait is the surface the unit of
//! work and the commit path see.

use std::{any::Any, fmt, sync::Arc};

use thiserror::Error;

use crate::{
    event::{DomainEvent, Event, SharedEvent},
    router::{EventRouter, RouteError},
};

/// Mutate state with an event.
///
/// `E` is a concrete event, a base type, or an interface (`dyn Trait`) the
/// state wants to observe.
///
/// ```ignore
/// #[derive(Default)]
/// struct Dog {
///     barks: u32,
/// }
///
/// impl Apply<Barked> for Dog {
///     fn apply(&mut self, _event: &Barked) {
///         self.barks += 1;
///     }
/// }
/// ```
pub trait Apply<E: ?Sized> {
    fn apply(&mut self, event: &E);
}

/// Derived state of an aggregate root.
///
/// Describes which router the root uses and which handlers it registers. The
/// hooks run around every [`AggregateRootEntity::apply`], never during replay.
pub trait AggregateState: Sized + Send + Sync + 'static {
    /// Aggregate type identifier, used in errors and logs.
    const KIND: &'static str;

    /// [`ExactRouter`](crate::router::ExactRouter) or
    /// [`PolymorphicRouter`](crate::router::PolymorphicRouter).
    type Router: EventRouter<Self>;

    /// Register this state's handlers.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if a type is registered twice.
    fn routes(router: &mut Self::Router) -> Result<(), RouteError>;

    fn before_apply(&mut self, _event: &dyn Event) {}

    fn after_apply(&mut self, _event: &dyn Event) {}
}

/// Where an aggregate root is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Nothing routed yet and no changes.
    Pristine,
    /// History routed, no pending changes.
    Initialized,
    /// Pending changes exist.
    Changed,
}

/// Error returned when replaying history into a root that has pending changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot rehydrate `{kind}` with {pending} pending change(s)")]
pub struct RehydrationError {
    pub kind: &'static str,
    pub pending: usize,
}

/// An aggregate root: state `S`, its router and the events applied since the
/// last commit.
///
/// Invariant: the state equals the fold of every event routed to this
/// instance, in order.
pub struct AggregateRootEntity<S: AggregateState> {
    state: S,
    router: S::Router,
    changes: Vec<SharedEvent>,
    routed: bool,
}

impl<S: AggregateState> AggregateRootEntity<S> {
    /// Wrap `state` and build its route table.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if `S::routes` registers a type twice.
    pub fn new(state: S) -> Result<Self, RouteError> {
        let mut router = S::Router::default();
        S::routes(&mut router)?;
        Ok(Self {
            state,
            router,
            changes: Vec::new(),
            routed: false,
        })
    }

    /// Register an additional handler.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if `T` already has a handler.
    pub fn register<T, F>(&mut self, handler: F) -> Result<(), RouteError>
    where
        T: ?Sized + 'static,
        F: Fn(&mut S, &T) + Send + Sync + 'static,
    {
        self.router.register(handler)
    }

    /// Replay historical events without recording them.
    ///
    /// May be called once per page of history.
    ///
    /// # Errors
    ///
    /// Returns [`RehydrationError`] if there are pending changes.
    pub fn initialize(&mut self, events: &[SharedEvent]) -> Result<(), RehydrationError> {
        if !self.changes.is_empty() {
            return Err(RehydrationError {
                kind: S::KIND,
                pending: self.changes.len(),
            });
        }

        for event in events {
            self.router.route(&mut self.state, event.as_ref());
        }
        self.routed |= !events.is_empty();
        tracing::trace!(
            aggregate_kind = S::KIND,
            events = events.len(),
            "replayed events"
        );
        Ok(())
    }

    /// Apply a new event and record it as a change.
    pub fn apply<E: DomainEvent>(&mut self, event: E) {
        self.apply_shared(Arc::new(event));
    }

    /// Apply an already shared event and record it as a change.
    pub fn apply_shared(&mut self, event: SharedEvent) {
        self.state.before_apply(event.as_ref());
        self.router.route(&mut self.state, event.as_ref());
        self.changes.push(Arc::clone(&event));
        self.routed = true;
        self.state.after_apply(event.as_ref());
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Pending changes, in application order.
    #[must_use]
    pub fn changes(&self) -> &[SharedEvent] {
        &self.changes
    }

    /// Forget pending changes. The state is left as is.
    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        if self.has_changes() {
            Lifecycle::Changed
        } else if self.routed {
            Lifecycle::Initialized
        } else {
            Lifecycle::Pristine
        }
    }
}

impl<S: AggregateState + fmt::Debug> fmt::Debug for AggregateRootEntity<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRootEntity")
            .field("kind", &S::KIND)
            .field("state", &self.state)
            .field("changes", &self.changes)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

/// Object-safe view of an aggregate root.
///
/// Implemented for every [`AggregateRootEntity`]. Hand-written roots (for
/// example a newtype around an entity) implement it by delegation.
pub trait AggregateRoot: Any + Send + Sync {
    /// Kind of this root type, available without an instance.
    fn root_kind() -> &'static str
    where
        Self: Sized;

    fn kind(&self) -> &'static str;

    /// See [`AggregateRootEntity::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`RehydrationError`] if there are pending changes.
    fn initialize(&mut self, events: &[SharedEvent]) -> Result<(), RehydrationError>;

    fn has_changes(&self) -> bool;

    fn changes(&self) -> &[SharedEvent];

    fn clear_changes(&mut self);
}

impl<S: AggregateState> AggregateRoot for AggregateRootEntity<S> {
    fn root_kind() -> &'static str {
        S::KIND
    }

    fn kind(&self) -> &'static str {
        S::KIND
    }

    fn initialize(&mut self, events: &[SharedEvent]) -> Result<(), RehydrationError> {
        Self::initialize(self, events)
    }

    fn has_changes(&self) -> bool {
        Self::has_changes(self)
    }

    fn changes(&self) -> &[SharedEvent] {
        Self::changes(self)
    }

    fn clear_changes(&mut self) {
        Self::clear_changes(self);
    }
}
