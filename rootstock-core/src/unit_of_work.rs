//! Identity map for one logical operation.
//!
//! A [`UnitOfWork`] holds every [`Aggregate`] loaded or added during an
//! operation, at most one per identifier, in attach order. Repositories
//! consult it before touching the event log so that repeated lookups return
//! the same root instance.

use std::{
    any::Any,
    collections::{HashMap, hash_map::Entry},
    fmt,
};

use thiserror::Error;

use crate::aggregate::AggregateRoot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitOfWorkError {
    #[error("aggregate `{identifier}` is already attached to this unit of work")]
    DuplicateAttach { identifier: String },
    #[error("aggregate identifier must not be empty")]
    EmptyIdentifier,
}

/// An identified aggregate root and the stream version it was built from.
///
/// `version` is `Some(position of last event)` for roots rebuilt from a
/// stream and `None` for roots added as new.
pub struct Aggregate {
    identifier: String,
    version: Option<u64>,
    root: Box<dyn AggregateRoot>,
}

impl Aggregate {
    /// # Errors
    ///
    /// Returns [`UnitOfWorkError::EmptyIdentifier`] if `identifier` is empty.
    pub fn new<R: AggregateRoot>(
        identifier: impl Into<String>,
        version: Option<u64>,
        root: R,
    ) -> Result<Self, UnitOfWorkError> {
        Self::from_boxed(identifier, version, Box::new(root))
    }

    /// Like [`Aggregate::new`] for an already boxed root.
    ///
    /// # Errors
    ///
    /// Returns [`UnitOfWorkError::EmptyIdentifier`] if `identifier` is empty.
    pub fn from_boxed(
        identifier: impl Into<String>,
        version: Option<u64>,
        root: Box<dyn AggregateRoot>,
    ) -> Result<Self, UnitOfWorkError> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(UnitOfWorkError::EmptyIdentifier);
        }
        Ok(Self {
            identifier,
            version,
            root,
        })
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub const fn version(&self) -> Option<u64> {
        self.version
    }

    #[must_use]
    pub fn root(&self) -> &dyn AggregateRoot {
        self.root.as_ref()
    }

    pub fn root_mut(&mut self) -> &mut dyn AggregateRoot {
        self.root.as_mut()
    }

    /// Borrow the root as its concrete type.
    #[must_use]
    pub fn downcast_ref<R: AggregateRoot>(&self) -> Option<&R> {
        let root: &dyn Any = &*self.root;
        root.downcast_ref()
    }

    pub fn downcast_mut<R: AggregateRoot>(&mut self) -> Option<&mut R> {
        let root: &mut dyn Any = &mut *self.root;
        root.downcast_mut()
    }
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("identifier", &self.identifier)
            .field("version", &self.version)
            .field("kind", &self.root.kind())
            .field("pending", &self.root.changes().len())
            .finish()
    }
}

/// Aggregates attached during one logical operation, keyed by identifier.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    aggregates: Vec<Aggregate>,
    index: HashMap<String, usize>,
}

impl UnitOfWork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an aggregate and return it.
    ///
    /// # Errors
    ///
    /// Returns [`UnitOfWorkError::DuplicateAttach`] if an aggregate with the
    /// same identifier is already attached.
    pub fn attach(&mut self, aggregate: Aggregate) -> Result<&mut Aggregate, UnitOfWorkError> {
        match self.index.entry(aggregate.identifier.clone()) {
            Entry::Occupied(_) => Err(UnitOfWorkError::DuplicateAttach {
                identifier: aggregate.identifier,
            }),
            Entry::Vacant(slot) => {
                let position = self.aggregates.len();
                slot.insert(position);
                tracing::debug!(
                    identifier = %aggregate.identifier,
                    version = ?aggregate.version,
                    aggregate_kind = aggregate.root.kind(),
                    "attached aggregate"
                );
                self.aggregates.push(aggregate);
                Ok(&mut self.aggregates[position])
            }
        }
    }

    #[must_use]
    pub fn try_get(&self, identifier: &str) -> Option<&Aggregate> {
        self.index
            .get(identifier)
            .map(|&position| &self.aggregates[position])
    }

    pub fn try_get_mut(&mut self, identifier: &str) -> Option<&mut Aggregate> {
        self.index
            .get(identifier)
            .map(|&position| &mut self.aggregates[position])
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Every attached aggregate, in attach order.
    pub fn iter(&self) -> impl Iterator<Item = &Aggregate> {
        self.aggregates.iter()
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.aggregates
            .iter()
            .any(|aggregate| aggregate.root.has_changes())
    }

    /// Attached aggregates whose root has pending changes, in attach order.
    pub fn changes(&self) -> impl Iterator<Item = &Aggregate> {
        self.aggregates
            .iter()
            .filter(|aggregate| aggregate.root.has_changes())
    }

    pub fn changes_mut(&mut self) -> impl Iterator<Item = &mut Aggregate> {
        self.aggregates
            .iter_mut()
            .filter(|aggregate| aggregate.root.has_changes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::{AggregateRootEntity, AggregateState, Apply},
        event::DomainEvent,
        router::{EventRouter, ExactRouter, RouteError},
    };

    #[derive(Debug)]
    struct Opened;

    impl DomainEvent for Opened {
        const KIND: &'static str = "opened";
    }

    #[derive(Debug, Default)]
    struct Door {
        open: bool,
    }

    impl Apply<Opened> for Door {
        fn apply(&mut self, _event: &Opened) {
            self.open = true;
        }
    }

    impl AggregateState for Door {
        const KIND: &'static str = "door";
        type Router = ExactRouter<Self>;

        fn routes(router: &mut Self::Router) -> Result<(), RouteError> {
            router.register::<Opened, _>(<Self as Apply<Opened>>::apply)
        }
    }

    fn door(identifier: &str) -> Aggregate {
        let root = AggregateRootEntity::new(Door::default()).unwrap();
        Aggregate::new(identifier, None, root).unwrap()
    }

    #[test]
    fn empty_identifier_is_rejected() {
        let root = AggregateRootEntity::new(Door::default()).unwrap();
        let err = Aggregate::new("", Some(0), root).unwrap_err();
        assert_eq!(err, UnitOfWorkError::EmptyIdentifier);
    }

    #[test]
    fn attach_then_lookup() {
        let mut uow = UnitOfWork::new();
        assert!(uow.try_get("front").is_none());

        uow.attach(door("front")).unwrap();

        let found = uow.try_get("front").unwrap();
        assert_eq!(found.identifier(), "front");
        assert_eq!(found.version(), None);
        assert!(found.downcast_ref::<AggregateRootEntity<Door>>().is_some());
        assert!(uow.contains("front"));
        assert_eq!(uow.len(), 1);
    }

    #[test]
    fn duplicate_attach_fails_and_keeps_original() {
        let mut uow = UnitOfWork::new();
        uow.attach(door("front")).unwrap();

        let err = uow.attach(door("front")).unwrap_err();
        assert_eq!(
            err,
            UnitOfWorkError::DuplicateAttach {
                identifier: "front".to_string(),
            }
        );
        assert_eq!(uow.len(), 1);
    }

    #[test]
    fn changes_lists_changed_aggregates_in_attach_order() {
        let mut uow = UnitOfWork::new();
        for identifier in ["a", "b", "c"] {
            uow.attach(door(identifier)).unwrap();
        }
        assert!(!uow.has_changes());

        for identifier in ["c", "a"] {
            uow.try_get_mut(identifier)
                .and_then(Aggregate::downcast_mut::<AggregateRootEntity<Door>>)
                .unwrap()
                .apply(Opened);
        }

        assert!(uow.has_changes());
        let changed: Vec<_> = uow.changes().map(Aggregate::identifier).collect();
        assert_eq!(changed, vec!["a", "c"]);

        for aggregate in uow.changes_mut() {
            aggregate.root_mut().clear_changes();
        }
        assert!(!uow.has_changes());
        assert_eq!(uow.iter().count(), 3);
    }

    #[test]
    fn debug_shows_identity_and_kind() {
        let aggregate = door("front");
        let debug = format!("{aggregate:?}");
        assert!(debug.contains("front"));
        assert!(debug.contains("door"));
    }
}
