//! Client code for stash.
//!
//! This crate provides the network fetch client, the notification relay
//! client, the strategy engine and the coordinator lifecycle shared by the
//! server.

pub mod clock;
pub mod fetch;
pub mod lifecycle;
pub mod relay;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, SystemClock};
pub use fetch::{FetchClient, FetchConfig, Network};
pub use lifecycle::{
    ControlMessage, Coordinator, CoordinatorStatus, Event, LifecycleSettings, Outcome, RegisterOutcome, Registration,
    RegistrationStatus, State, TaskDelivery,
};
pub use relay::{HttpRelay, Relay, RelayConfig, RelayError};
pub use strategy::{Handled, Source, StrategyEngine};
