// Re-export at root for macro-generated code
#[allow(unused_imports)]
pub use rootstock_core::{
    aggregate::{AggregateState, Apply},
    event::{self, DomainEvent, Upcast},
    router,
};
