extern crate self as rootstock;

#[path = "../common.rs"]
mod support;

pub use support::*;

use rootstock_macros::DomainEvent;

#[derive(Debug, DomainEvent)]
#[event(kind = "value-recorded")]
pub struct ValueRecorded<T: std::fmt::Debug + Send + Sync + 'static> {
    pub value: T,
}

#[derive(Debug, DomainEvent)]
pub enum DoorEvent {
    Opened,
    Closed,
}

fn main() {
    assert_eq!(<ValueRecorded<u8> as DomainEvent>::KIND, "value-recorded");
    assert_eq!(<DoorEvent as DomainEvent>::KIND, "door-event");
}
