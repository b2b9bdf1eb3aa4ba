//! Container lifecycle states and the transition table.
//!
//! The controller is a state machine driven by triggers: an explicit start,
//! namespace handlers appearing or disappearing, dependency trackers
//! flipping, and the startup timeout. [`dispatch`] maps the current state
//! and a trigger to the action the controller takes; the action itself
//! (running the state loop, refreshing publications, failing) lives in the
//! container.

use std::fmt;

/// Which of the two dependency passes the container is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Before processors and type converters run
    First,
    /// After processors and type converters have been applied
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unparsed,
    WaitingForInfrastructure,
    GraphBuilt,
    WaitingForDependencies(Pass),
    DependenciesSatisfied(Pass),
    Activating,
    Active,
    Failed,
    Destroyed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Failed | LifecycleState::Destroyed)
    }

    /// States in which publications follow their dependencies.
    pub fn publishes(self) -> bool {
        matches!(self, LifecycleState::Activating | LifecycleState::Active)
    }

    /// States holding a built graph with running trackers.
    pub fn has_graph(self) -> bool {
        matches!(
            self,
            LifecycleState::GraphBuilt
                | LifecycleState::WaitingForDependencies(_)
                | LifecycleState::DependenciesSatisfied(_)
                | LifecycleState::Activating
                | LifecycleState::Active
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Unparsed => f.write_str("Unparsed"),
            LifecycleState::WaitingForInfrastructure => f.write_str("WaitingForInfrastructure"),
            LifecycleState::GraphBuilt => f.write_str("GraphBuilt"),
            LifecycleState::WaitingForDependencies(Pass::First) => {
                f.write_str("WaitingForDependencies(1)")
            }
            LifecycleState::WaitingForDependencies(Pass::Second) => {
                f.write_str("WaitingForDependencies(2)")
            }
            LifecycleState::DependenciesSatisfied(Pass::First) => {
                f.write_str("DependenciesSatisfied(1)")
            }
            LifecycleState::DependenciesSatisfied(Pass::Second) => {
                f.write_str("DependenciesSatisfied(2)")
            }
            LifecycleState::Activating => f.write_str("Activating"),
            LifecycleState::Active => f.write_str("Active"),
            LifecycleState::Failed => f.write_str("Failed"),
            LifecycleState::Destroyed => f.write_str("Destroyed"),
        }
    }
}

/// Why the controller woke up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Trigger {
    Start,
    HandlerRegistered(String),
    HandlerUnregistered(String),
    /// A tracker's satisfaction or availability flipped
    DependencyChanged(String),
    Timeout,
}

/// What the controller does in response to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    /// Run the state loop from the current state
    Advance,
    /// Re-evaluate every conditional publication
    RefreshPublications,
    /// Tear the graph down and wait for infrastructure again
    Reset,
    /// Fail with the missing dependencies
    FailTimeout,
    Ignore,
}

pub(crate) fn dispatch(state: LifecycleState, trigger: &Trigger) -> Action {
    use LifecycleState::*;
    match (trigger, state) {
        (Trigger::Start, Unparsed) => Action::Advance,
        (Trigger::HandlerRegistered(_), WaitingForInfrastructure) => Action::Advance,
        (Trigger::HandlerUnregistered(_), s) if s.has_graph() => Action::Reset,
        (Trigger::DependencyChanged(_), WaitingForDependencies(_)) => Action::Advance,
        (Trigger::DependencyChanged(_), s) if s.publishes() => Action::RefreshPublications,
        (Trigger::Timeout, GraphBuilt | WaitingForDependencies(_) | DependenciesSatisfied(_)) => {
            Action::FailTimeout
        }
        _ => Action::Ignore,
    }
}
