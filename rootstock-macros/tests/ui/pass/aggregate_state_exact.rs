extern crate self as rootstock;

#[path = "../common.rs"]
mod support;

pub use support::*;

use rootstock_core::aggregate::AggregateRootEntity;
use rootstock_macros::{AggregateState, DomainEvent};

#[derive(Debug, DomainEvent)]
pub struct DogBorn {
    pub name: String,
}

#[derive(Debug, DomainEvent)]
#[event(kind = "woof")]
pub struct DogBarked;

#[derive(Default, AggregateState)]
#[aggregate(events(DogBorn, DogBarked))]
pub struct Dog {
    name: String,
    barks: u32,
}

impl Apply<DogBorn> for Dog {
    fn apply(&mut self, event: &DogBorn) {
        self.name = event.name.clone();
    }
}

impl Apply<DogBarked> for Dog {
    fn apply(&mut self, _event: &DogBarked) {
        self.barks += 1;
    }
}

fn main() {
    assert_eq!(<Dog as AggregateState>::KIND, "dog");
    assert_eq!(<DogBarked as DomainEvent>::KIND, "woof");

    let mut root = AggregateRootEntity::new(Dog::default()).unwrap();
    root.apply(DogBorn {
        name: "Rex".to_string(),
    });
    root.apply(DogBarked);
    assert_eq!(root.state().name, "Rex");
    assert_eq!(root.state().barks, 1);
}
