//! Core traits and types for the rootstock event-sourcing library.
//!
//! This crate provides the foundational abstractions:
//!
//! - [`event`] - Event traits and runtime type identity (`DomainEvent`, `Event`, `Lineage`)
//! - [`router`] - Type-keyed dispatch of events to handlers (`ExactRouter`, `PolymorphicRouter`)
//! - [`aggregate`] - Aggregate roots (`AggregateState`, `Apply`, `AggregateRootEntity`)
//! - [`unit_of_work`] - Identity map of attached aggregates (`UnitOfWork`, `Aggregate`)
//! - [`repository`] - Loading roots through the unit of work (`Repository`, `AsyncRepository`)
//! - [`store`] - Reader and writer ports, `commit`, and an in-memory store
//! - [`concurrency`] - Optimistic concurrency tokens (`ConcurrencyConflict`)
//!
//! # Example
//!
//! ```
//! use rootstock_core::{
//!     repository::{PristineFactory, Repository},
//!     store::inmemory,
//!     unit_of_work::UnitOfWork,
//! };
//! # use rootstock_core::{aggregate::{AggregateRootEntity, AggregateState}, router::{ExactRouter, RouteError}};
//! # #[derive(Default)]
//! # struct Dog;
//! # impl AggregateState for Dog {
//! #     const KIND: &'static str = "dog";
//! #     type Router = ExactRouter<Self>;
//! #     fn routes(_: &mut Self::Router) -> Result<(), RouteError> { Ok(()) }
//! # }
//!
//! let repo: Repository<AggregateRootEntity<Dog>, _, _> =
//!     Repository::new(PristineFactory, inmemory::Store::new());
//! let mut uow = UnitOfWork::new();
//! assert!(repo.try_get(&mut uow, "dog-1").unwrap().is_none());
//! ```
//!
//! Most users should depend on the [`rootstock`](https://docs.rs/rootstock) crate,
//! which re-exports these types together with the derive macros.

pub mod aggregate;
pub mod concurrency;
pub mod event;
pub mod repository;
pub mod router;
pub mod store;
pub mod unit_of_work;
