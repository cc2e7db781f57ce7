//! Coordinator lifecycle state machine.
//!
//! `Lifecycle::step` is pure: it maps the current lifecycle and a signal to
//! the next lifecycle plus the effects the caller must carry out. Nothing here
//! touches the network or the store.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use stash_core::Error;

/// Lifecycle states, in the order a coordinator moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Uninitialized,
    Installing,
    /// Installed and waiting for activation.
    Installed,
    Activating,
    Active,
    /// Replaced by a newer coordinator. Terminal.
    Superseded,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Superseded => "superseded",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Install,
    InstallSucceeded,
    InstallFailed,
    Activate,
    Activated { at: DateTime<Utc> },
    SkipWaiting,
    RefreshNow,
    Tick(DateTime<Utc>),
    Sync(String),
    Supersede,
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::InstallSucceeded => "install_succeeded",
            Self::InstallFailed => "install_failed",
            Self::Activate => "activate",
            Self::Activated { .. } => "activated",
            Self::SkipWaiting => "skip_waiting",
            Self::RefreshNow => "refresh_now",
            Self::Tick(_) => "tick",
            Self::Sync(_) => "sync",
            Self::Supersede => "supersede",
        }
    }
}

/// Work the caller performs after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch and store the core and static resources.
    Precache,
    /// Delete every partition outside the current version set.
    PurgeStale,
    /// Start routing fetches for all clients, including existing ones.
    ClaimClients,
    /// Re-fetch the core partition in the background.
    RefreshCore,
    /// Hand the outbox for this tag to the relay.
    DeliverDeferred(String),
    /// Confirm a control message.
    Acknowledge,
    /// Ask the host to activate this coordinator now.
    RequestActivation,
}

/// Lifecycle data owned by one coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    pub state: State,
    pub skip_waiting: bool,
    pub refresh_interval: Duration,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Lifecycle,
    pub effects: Vec<Effect>,
}

impl Lifecycle {
    pub fn new(skip_waiting: bool, refresh_interval: Duration) -> Self {
        Self { state: State::Uninitialized, skip_waiting, refresh_interval, last_refresh: None }
    }

    fn to(&self, state: State) -> Self {
        Self { state, ..self.clone() }
    }

    fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        self.last_refresh.is_none_or(|last| now - last >= self.refresh_interval)
    }

    /// Compute the transition for `signal`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` when the signal is not accepted in
    /// the current state.
    pub fn step(&self, signal: &Signal) -> Result<Transition, Error> {
        use State::*;

        let (next, effects) = match (self.state, signal) {
            (Uninitialized, Signal::Install) => (self.to(Installing), vec![Effect::Precache]),
            (Installing, Signal::InstallSucceeded) => {
                let effects = if self.skip_waiting { vec![Effect::RequestActivation] } else { vec![] };
                (self.to(Installed), effects)
            }
            (Installing, Signal::InstallFailed) => (self.to(Uninitialized), vec![]),

            (Uninitialized | Installing, Signal::SkipWaiting) => {
                (Self { skip_waiting: true, ..self.clone() }, vec![Effect::Acknowledge])
            }
            (Installed, Signal::SkipWaiting) => (
                Self { skip_waiting: true, ..self.clone() },
                vec![Effect::Acknowledge, Effect::RequestActivation],
            ),
            (Active, Signal::SkipWaiting) => (self.clone(), vec![Effect::Acknowledge]),

            (Installed, Signal::Activate) => (self.to(Activating), vec![Effect::PurgeStale]),
            (Activating, Signal::Activated { at }) => {
                (Self { state: Active, last_refresh: Some(*at), ..self.clone() }, vec![Effect::ClaimClients])
            }
            (Active, Signal::Activate) => (self.clone(), vec![]),

            (Active, Signal::RefreshNow) => (self.clone(), vec![Effect::RefreshCore]),
            (Active, Signal::Tick(now)) if self.refresh_due(*now) => {
                (Self { last_refresh: Some(*now), ..self.clone() }, vec![Effect::RefreshCore])
            }
            (_, Signal::Tick(_)) => (self.clone(), vec![]),

            (Active, Signal::Sync(tag)) => (self.clone(), vec![Effect::DeliverDeferred(tag.clone())]),

            (Installed | Active, Signal::Supersede) => (self.to(Superseded), vec![]),

            (state, signal) => {
                return Err(Error::InvalidTransition { state: state.to_string(), event: signal.name().to_string() });
            }
        };

        Ok(Transition { next, effects })
    }
}
