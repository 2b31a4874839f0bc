//! Domain events and their runtime type identity.
//!
//! `DomainEvent` is the trait every concrete event struct implements. Events
//! are immutable facts: once recorded they travel as [`SharedEvent`]
//! (`Arc<dyn Event>`), so replay, change tracking and commit all share the
//! same allocation.
//!
//! Routing is keyed by type. Every event answers to its concrete type; an
//! event may additionally declare a [`Lineage`] (the interfaces it
//! implements and the base types it extends) so a
//! [`PolymorphicRouter`](crate::router::PolymorphicRouter) can fan it out to
//! handlers registered for those types. Interfaces are Rust traits addressed
//! as `dyn Trait`; base types are any `'static` type the event can be viewed
//! as. Both views are provided through [`Upcast`].

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

/// An event shared between the change buffer, the unit of work and the
/// backing store.
pub type SharedEvent = Arc<dyn Event>;

/// Marker trait for concrete domain events.
///
/// Each event carries a unique [`Self::KIND`] identifier used for logging and
/// by stores that need a stable discriminator.
///
/// ```
/// use rootstock_core::event::{DomainEvent, Lineage, Upcast};
///
/// #[derive(Debug)]
/// struct DogBorn {
///     name: String,
/// }
///
/// #[derive(Debug)]
/// struct PuppyBorn {
///     dog: DogBorn,
/// }
///
/// impl DomainEvent for DogBorn {
///     const KIND: &'static str = "dog-born";
/// }
///
/// impl Upcast<DogBorn> for PuppyBorn {
///     fn upcast(&self) -> &DogBorn {
///         &self.dog
///     }
/// }
///
/// impl DomainEvent for PuppyBorn {
///     const KIND: &'static str = "puppy-born";
///
///     fn lineage() -> Lineage<Self> {
///         Lineage::new().extends::<DogBorn>()
///     }
/// }
/// ```
pub trait DomainEvent: Any + Send + Sync + fmt::Debug + Sized {
    const KIND: &'static str;

    /// Interfaces and base types this event also answers to.
    ///
    /// Only consulted by polymorphic routers. Defaults to none.
    fn lineage() -> Lineage<Self> {
        Lineage::new()
    }
}

/// View of an event as one of its interfaces or base types.
pub trait Upcast<T: ?Sized> {
    fn upcast(&self) -> &T;
}

/// Object-safe view of a [`DomainEvent`].
///
/// Implemented for every `DomainEvent`; never implement it by hand.
pub trait Event: Any + Send + Sync + fmt::Debug + 'static {
    /// The event's [`DomainEvent::KIND`].
    fn kind(&self) -> &'static str;

    /// Rust type name of the concrete event.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// The concrete type of this event as a routing key.
    fn facet(&self) -> Facet<'_>;

    /// Visit every routing key of this event in polymorphic dispatch order:
    /// declared interfaces, then the concrete type, then the base chain from
    /// the most derived base upward.
    fn walk<'a>(&'a self, visit: &mut dyn FnMut(Facet<'a>));
}

impl<E: DomainEvent> Event for E {
    fn kind(&self) -> &'static str {
        E::KIND
    }

    fn type_name(&self) -> &'static str {
        type_name::<E>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn facet(&self) -> Facet<'_> {
        Facet::concrete(self)
    }

    fn walk<'a>(&'a self, visit: &mut dyn FnMut(Facet<'a>)) {
        let ancestry = Ancestry::of::<E>();
        for ancestor in &ancestry.interfaces {
            visit(Facet::ancestor(*ancestor, self));
        }
        visit(Facet::concrete(self));
        for ancestor in &ancestry.bases {
            visit(Facet::ancestor(*ancestor, self));
        }
    }
}

impl dyn Event {
    /// Returns `true` if the concrete event is an `E`.
    #[must_use]
    pub fn is<E: DomainEvent>(&self) -> bool {
        self.as_any().is::<E>()
    }

    /// Borrow the concrete event as an `E`.
    #[must_use]
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.as_any().downcast_ref()
    }
}

/// Declared interfaces and base chain of an event type.
///
/// Built with [`Lineage::implements`] and [`Lineage::extends`]; the order of
/// calls is the dispatch order within each group. A type is declared at most
/// once: repeats, and the event type itself, are ignored.
///
/// [`DomainEvent::lineage`] is resolved once per event type and reused for
/// every routed event.
pub struct Lineage<E> {
    interfaces: Vec<Ancestor>,
    bases: Vec<Ancestor>,
    _event: PhantomData<fn() -> E>,
}

impl<E: DomainEvent> Lineage<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interfaces: Vec::new(),
            bases: Vec::new(),
            _event: PhantomData,
        }
    }

    /// Declare that `E` implements the interface `T` (usually `dyn Trait`).
    #[must_use]
    pub fn implements<T>(mut self) -> Self
    where
        T: ?Sized + 'static,
        E: Upcast<T>,
    {
        if !self.declares(TypeId::of::<T>()) {
            self.interfaces.push(Ancestor::of::<E, T>());
        }
        self
    }

    /// Declare the next base type in `E`'s chain.
    ///
    /// Call once per level, starting with the direct base.
    #[must_use]
    pub fn extends<T>(mut self) -> Self
    where
        T: 'static,
        E: Upcast<T>,
    {
        if !self.declares(TypeId::of::<T>()) {
            self.bases.push(Ancestor::of::<E, T>());
        }
        self
    }

    /// Type names of the declared interfaces, in dispatch order.
    pub fn interfaces(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.interfaces.iter().map(|ancestor| ancestor.type_name)
    }

    /// Type names of the declared base chain, most derived first.
    pub fn bases(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bases.iter().map(|ancestor| ancestor.type_name)
    }

    fn declares(&self, type_id: TypeId) -> bool {
        type_id == TypeId::of::<E>()
            || self
                .interfaces
                .iter()
                .chain(&self.bases)
                .any(|ancestor| ancestor.type_id == type_id)
    }
}

impl<E: DomainEvent> Default for Lineage<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Lineage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |ancestors: &[Ancestor]| {
            ancestors
                .iter()
                .map(|ancestor| ancestor.type_name)
                .collect::<Vec<_>>()
        };
        f.debug_struct("Lineage")
            .field("interfaces", &names(&self.interfaces))
            .field("bases", &names(&self.bases))
            .finish()
    }
}

/// A routing key of one event: the type it is viewed as, and the means to
/// produce that view.
pub struct Facet<'a> {
    type_id: TypeId,
    type_name: &'static str,
    event: &'a dyn Any,
    caster: &'static (dyn Any + Send + Sync),
}

impl<'a> Facet<'a> {
    fn concrete<E: DomainEvent>(event: &'a E) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: type_name::<E>(),
            event,
            caster: const { &Caster::<E>(identity::<E>) },
        }
    }

    fn ancestor(ancestor: Ancestor, event: &'a dyn Any) -> Self {
        Self {
            type_id: ancestor.type_id,
            type_name: ancestor.type_name,
            event,
            caster: ancestor.caster,
        }
    }

    /// The type this facet presents the event as.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// View the event as `T`, if this facet presents it as `T`.
    #[must_use]
    pub fn view<T: ?Sized + 'static>(&self) -> Option<&'a T> {
        let cast = self.caster.downcast_ref::<Caster<T>>()?.0;
        cast(self.event)
    }
}

impl fmt::Debug for Facet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Facet").field(&self.type_name).finish()
    }
}

#[derive(Clone, Copy)]
struct Ancestor {
    type_id: TypeId,
    type_name: &'static str,
    caster: &'static (dyn Any + Send + Sync),
}

impl Ancestor {
    fn of<E, T>() -> Self
    where
        E: Upcast<T> + 'static,
        T: ?Sized + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            caster: const { &Caster::<T>(upcast::<E, T>) },
        }
    }
}

/// The resolved lineage of one event type.
struct Ancestry {
    interfaces: Vec<Ancestor>,
    bases: Vec<Ancestor>,
}

impl Ancestry {
    fn of<E: DomainEvent>() -> Arc<Self> {
        static RESOLVED: OnceLock<RwLock<HashMap<TypeId, Arc<Ancestry>>>> = OnceLock::new();

        let resolved = RESOLVED.get_or_init(RwLock::default);
        let key = TypeId::of::<E>();
        if let Some(ancestry) = resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(ancestry);
        }

        let Lineage {
            interfaces, bases, ..
        } = E::lineage();
        let ancestry = Arc::new(Self { interfaces, bases });
        Arc::clone(
            resolved
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key)
                .or_insert(ancestry),
        )
    }
}

/// Recovers a `&T` view from the erased concrete event.
struct Caster<T: ?Sized + 'static>(fn(&dyn Any) -> Option<&T>);

fn identity<E: 'static>(event: &dyn Any) -> Option<&E> {
    event.downcast_ref()
}

fn upcast<E, T>(event: &dyn Any) -> Option<&T>
where
    E: Upcast<T> + 'static,
    T: ?Sized + 'static,
{
    event
        .downcast_ref::<E>()
        .map(|event| <E as Upcast<T>>::upcast(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named {
        fn name(&self) -> &str;
    }

    #[derive(Debug)]
    struct AnimalBorn;

    #[derive(Debug)]
    struct DogBorn {
        name: String,
        animal: AnimalBorn,
    }

    impl DomainEvent for DogBorn {
        const KIND: &'static str = "dog-born";

        fn lineage() -> Lineage<Self> {
            Lineage::new()
                .implements::<dyn Named>()
                .extends::<AnimalBorn>()
        }
    }

    impl Named for DogBorn {
        fn name(&self) -> &str {
            &self.name
        }
    }

    impl Upcast<dyn Named> for DogBorn {
        fn upcast(&self) -> &(dyn Named + 'static) {
            self
        }
    }

    impl Upcast<AnimalBorn> for DogBorn {
        fn upcast(&self) -> &AnimalBorn {
            &self.animal
        }
    }

    #[derive(Debug)]
    struct Barked;

    impl DomainEvent for Barked {
        const KIND: &'static str = "barked";
    }

    fn born(name: &str) -> DogBorn {
        DogBorn {
            name: name.to_string(),
            animal: AnimalBorn,
        }
    }

    fn facets(event: &dyn Event) -> Vec<Facet<'_>> {
        let mut facets = Vec::new();
        event.walk(&mut |facet| facets.push(facet));
        facets
    }

    #[test]
    fn kind_and_type_name_come_from_the_concrete_event() {
        let event: SharedEvent = Arc::new(Barked);
        assert_eq!(event.kind(), "barked");
        assert!(event.type_name().ends_with("Barked"));
    }

    #[test]
    fn downcast_recovers_concrete_event() {
        let event: SharedEvent = Arc::new(born("rex"));
        assert!(event.is::<DogBorn>());
        assert!(!event.is::<Barked>());
        assert_eq!(event.downcast_ref::<DogBorn>().unwrap().name, "rex");
    }

    #[test]
    fn walk_orders_interfaces_then_concrete_then_bases() {
        let event = born("rex");
        let walk = facets(&event);
        let ids: Vec<TypeId> = walk.iter().map(Facet::type_id).collect();
        assert_eq!(
            ids,
            vec![
                TypeId::of::<dyn Named>(),
                TypeId::of::<DogBorn>(),
                TypeId::of::<AnimalBorn>(),
            ]
        );
    }

    #[test]
    fn facets_only_view_as_their_own_type() {
        let event = born("rex");
        let walk = facets(&event);

        let named = walk[0].view::<dyn Named>().unwrap();
        assert_eq!(named.name(), "rex");
        assert!(walk[0].view::<DogBorn>().is_none());

        assert_eq!(walk[1].view::<DogBorn>().unwrap().name, "rex");
        assert!(walk[2].view::<AnimalBorn>().is_some());
    }

    #[test]
    fn events_without_lineage_walk_only_their_concrete_type() {
        let walk = facets(&Barked);
        assert_eq!(walk.len(), 1);
        assert_eq!(walk[0].type_id(), TypeId::of::<Barked>());
    }

    #[test]
    fn lineage_debug_lists_declared_types() {
        let lineage = DogBorn::lineage();
        assert_eq!(lineage.interfaces().count(), 1);
        assert_eq!(lineage.bases().count(), 1);
        let debug = format!("{lineage:?}");
        assert!(debug.contains("Named"));
        assert!(debug.contains("AnimalBorn"));
    }

    #[derive(Debug)]
    struct Echoed {
        animal: AnimalBorn,
    }

    impl DomainEvent for Echoed {
        const KIND: &'static str = "echoed";

        fn lineage() -> Lineage<Self> {
            Lineage::new()
                .implements::<dyn Named>()
                .extends::<AnimalBorn>()
                .implements::<dyn Named>()
                .extends::<AnimalBorn>()
                .extends::<Self>()
        }
    }

    impl Named for Echoed {
        fn name(&self) -> &str {
            "echo"
        }
    }

    impl Upcast<dyn Named> for Echoed {
        fn upcast(&self) -> &(dyn Named + 'static) {
            self
        }
    }

    impl Upcast<AnimalBorn> for Echoed {
        fn upcast(&self) -> &AnimalBorn {
            &self.animal
        }
    }

    impl Upcast<Self> for Echoed {
        fn upcast(&self) -> &Self {
            self
        }
    }

    #[test]
    fn repeated_lineage_entries_are_declared_once() {
        let lineage = Echoed::lineage();
        assert_eq!(lineage.interfaces().count(), 1);
        assert_eq!(lineage.bases().count(), 1);

        let event = Echoed { animal: AnimalBorn };
        let ids: Vec<TypeId> = facets(&event).iter().map(Facet::type_id).collect();
        assert_eq!(
            ids,
            vec![
                TypeId::of::<dyn Named>(),
                TypeId::of::<Echoed>(),
                TypeId::of::<AnimalBorn>(),
            ]
        );
    }

    #[test]
    fn walking_twice_yields_the_same_facets() {
        let event = born("rex");
        let first: Vec<&str> = facets(&event).iter().map(Facet::type_name).collect();
        let second: Vec<&str> = facets(&event).iter().map(Facet::type_name).collect();
        assert_eq!(first, second);
    }
}
