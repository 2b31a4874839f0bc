//! Type-keyed dispatch of events to state handlers.
//!
//! A router is populated once, when an aggregate root is constructed, and is
//! read-only afterwards. Handlers are keyed by the [`TypeId`] of the type they
//! accept: a concrete event, a base type, or an interface (`dyn Trait`).
//!
//! - [`ExactRouter`] dispatches on the concrete event type only.
//! - [`PolymorphicRouter`] walks the event's [`Lineage`](crate::event::Lineage)
//!   and fires every handler registered along the way.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt,
};

use crate::event::{Event, Facet};

/// Error raised while building a route table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("a handler for `{event_type}` is already registered")]
    DuplicateRoute { event_type: &'static str },
}

/// Dispatches events to handlers that mutate state `S`.
pub trait EventRouter<S>: Default + Send + Sync + 'static {
    /// Register `handler` for events viewable as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::DuplicateRoute`] if `T` already has a handler.
    fn register<T, F>(&mut self, handler: F) -> Result<(), RouteError>
    where
        T: ?Sized + 'static,
        F: Fn(&mut S, &T) + Send + Sync + 'static;

    /// Route `event` to the matching handlers and return how many fired.
    ///
    /// Events nothing is registered for are ignored.
    fn route(&self, state: &mut S, event: &dyn Event) -> usize;

    /// Whether a handler is registered for `T`.
    fn handles<T: ?Sized + 'static>(&self) -> bool;
}

type Handler<S> = Box<dyn Fn(&mut S, &Facet<'_>) + Send + Sync>;

struct Route<S> {
    type_name: &'static str,
    handler: Handler<S>,
}

struct RouteTable<S> {
    routes: HashMap<TypeId, Route<S>>,
}

impl<S: 'static> RouteTable<S> {
    fn insert<T, F>(&mut self, handler: F) -> Result<(), RouteError>
    where
        T: ?Sized + 'static,
        F: Fn(&mut S, &T) + Send + Sync + 'static,
    {
        let key = TypeId::of::<T>();
        if self.routes.contains_key(&key) {
            return Err(RouteError::DuplicateRoute {
                event_type: type_name::<T>(),
            });
        }

        let handler: Handler<S> = Box::new(move |state, facet| {
            if let Some(view) = facet.view::<T>() {
                handler(state, view);
            }
        });
        self.routes.insert(
            key,
            Route {
                type_name: type_name::<T>(),
                handler,
            },
        );
        Ok(())
    }

    /// Fire the handler registered for this facet, if any.
    fn fire(&self, state: &mut S, facet: &Facet<'_>) -> bool {
        self.routes.get(&facet.type_id()).is_some_and(|route| {
            (route.handler)(state, facet);
            true
        })
    }

    fn contains(&self, key: TypeId) -> bool {
        self.routes.contains_key(&key)
    }
}

impl<S> Default for RouteTable<S> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for RouteTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.routes.values().map(|route| route.type_name).collect();
        names.sort_unstable();
        f.debug_set().entries(names).finish()
    }
}

/// Routes each event to the handler of its concrete type.
///
/// Only concrete event types are routing keys here. Handlers registered for
/// an interface (`dyn Trait`) or a base type are accepted but never fire;
/// use [`PolymorphicRouter`] for those.
pub struct ExactRouter<S> {
    table: RouteTable<S>,
}

impl<S> Default for ExactRouter<S> {
    fn default() -> Self {
        Self {
            table: RouteTable::default(),
        }
    }
}

impl<S> fmt::Debug for ExactRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExactRouter")
            .field("routes", &self.table)
            .finish()
    }
}

impl<S: 'static> EventRouter<S> for ExactRouter<S> {
    fn register<T, F>(&mut self, handler: F) -> Result<(), RouteError>
    where
        T: ?Sized + 'static,
        F: Fn(&mut S, &T) + Send + Sync + 'static,
    {
        self.table.insert(handler)
    }

    fn route(&self, state: &mut S, event: &dyn Event) -> usize {
        if self.table.fire(state, &event.facet()) {
            1
        } else {
            tracing::trace!(event_kind = event.kind(), "no route for event");
            0
        }
    }

    fn handles<T: ?Sized + 'static>(&self) -> bool {
        self.table.contains(TypeId::of::<T>())
    }
}

/// Routes each event to every handler along its lineage.
///
/// Dispatch order is declared interfaces, then the concrete type, then the
/// base chain from the most derived base upward. Every match fires.
pub struct PolymorphicRouter<S> {
    table: RouteTable<S>,
}

impl<S> Default for PolymorphicRouter<S> {
    fn default() -> Self {
        Self {
            table: RouteTable::default(),
        }
    }
}

impl<S> fmt::Debug for PolymorphicRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolymorphicRouter")
            .field("routes", &self.table)
            .finish()
    }
}

impl<S: 'static> EventRouter<S> for PolymorphicRouter<S> {
    fn register<T, F>(&mut self, handler: F) -> Result<(), RouteError>
    where
        T: ?Sized + 'static,
        F: Fn(&mut S, &T) + Send + Sync + 'static,
    {
        self.table.insert(handler)
    }

    fn route(&self, state: &mut S, event: &dyn Event) -> usize {
        let mut fired = 0;
        event.walk(&mut |facet| {
            if self.table.fire(state, &facet) {
                fired += 1;
            }
        });
        if fired == 0 {
            tracing::trace!(event_kind = event.kind(), "no route for event");
        }
        fired
    }

    fn handles<T: ?Sized + 'static>(&self) -> bool {
        self.table.contains(TypeId::of::<T>())
    }
}
