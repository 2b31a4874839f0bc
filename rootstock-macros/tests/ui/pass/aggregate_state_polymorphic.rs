extern crate self as rootstock;

#[path = "../common.rs"]
mod support;

pub use support::*;

use rootstock_core::aggregate::AggregateRootEntity;
use rootstock_macros::{AggregateState, DomainEvent};

pub trait Named {
    fn name(&self) -> &str;
}

#[derive(Debug)]
pub struct AnimalBorn;

#[derive(Debug, DomainEvent)]
#[event(implements(Named), extends(AnimalBorn))]
pub struct DogBorn {
    animal: AnimalBorn,
    name: String,
}

impl Named for DogBorn {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Upcast<AnimalBorn> for DogBorn {
    fn upcast(&self) -> &AnimalBorn {
        &self.animal
    }
}

#[derive(Default, AggregateState)]
#[aggregate(polymorphic, interfaces(Named), events(DogBorn, AnimalBorn))]
pub struct Kennel {
    seen: Vec<String>,
}

impl Apply<dyn Named> for Kennel {
    fn apply(&mut self, event: &dyn Named) {
        self.seen.push(format!("named {}", event.name()));
    }
}

impl Apply<DogBorn> for Kennel {
    fn apply(&mut self, _event: &DogBorn) {
        self.seen.push("dog".to_string());
    }
}

impl Apply<AnimalBorn> for Kennel {
    fn apply(&mut self, _event: &AnimalBorn) {
        self.seen.push("animal".to_string());
    }
}

fn main() {
    let mut root = AggregateRootEntity::new(Kennel::default()).unwrap();
    root.apply(DogBorn {
        animal: AnimalBorn,
        name: "Rex".to_string(),
    });
    assert_eq!(root.state().seen, ["named Rex", "dog", "animal"]);
}
