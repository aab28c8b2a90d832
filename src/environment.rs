//! Environment adapter seam.
//!
//! The network simulation (topology, physical-layer checks, request arrival)
//! lives behind [`Environment`]. The trainer only needs functional
//! reset/step semantics and the validity masks of the current state.

use crate::error::Result;
use crate::rng::PrngKey;
use crate::types::{Action, ActionMasks};

/// Result of advancing one environment instance by one step.
#[derive(Debug, Clone)]
pub struct StepOutcome<S, O, I> {
    /// Observation after the step.
    pub observation: O,
    /// New environment state, replacing the one passed to `step`.
    pub state: S,
    pub reward: f64,
    /// Whether the episode terminated on this step.
    pub done: bool,
    /// Auxiliary, domain-specific information (blocking, utilisation, ...).
    pub info: I,
}

/// A single-instance environment with functional state.
///
/// The batch dimension is handled by the caller: one state per batch lane,
/// each advanced with its own key. Implementations are expected to handle
/// episode resets internally when `done` is returned.
///
/// # Lifecycle
///
/// 1. [`Environment::reset`] once per lane with a fresh key.
/// 2. [`Environment::action_masks`] on the current state before selecting.
/// 3. [`Environment::step`] with the selected action, consuming the state.
pub trait Environment {
    type State;
    type Observation: Clone;
    type Info: Clone;

    /// Starts a new episode.
    fn reset(&self, key: PrngKey) -> Result<(Self::Observation, Self::State)>;

    /// Advances one step.
    fn step(
        &self,
        key: PrngKey,
        state: Self::State,
        action: &Action,
    ) -> Result<StepOutcome<Self::State, Self::Observation, Self::Info>>;

    /// Validity masks for the current state, one per action head.
    ///
    /// Environments without invalid-action masking return [`ActionMasks::none`].
    fn action_masks(&self, state: &Self::State) -> ActionMasks;
}
