//! The state machine that drives the training rounds.
//!
//! # Overview
//!
//! Every round walks through the same sequence of phases:
//!
//! - [`WaitingForClients`]: waits until enough clients can be reached. Once all configured
//!   rounds are done the machine moves to [`Finished`] instead.
//! - [`Selecting`]: chooses the clients of the round with the selection generator.
//! - [`Distributing`]: sends every selected client the current global weights together with a
//!   round seed drawn from the numeric generator. Unreachable clients are excluded.
//! - [`Collecting`]: receives client messages until every selected client answered or the
//!   collection timeout elapsed. Messages of other rounds or unselected clients are discarded.
//! - [`Aggregating`]: combines the collected updates into the new global weights.
//! - [`Checkpointing`]: persists the round if a checkpoint is due and advances the round.
//!
//! A phase that fails moves the machine to the [`Failure`] phase. It restarts the round with
//! the global weights it started with, unless the error is fatal or the round failed too many
//! times in a row, in which case the machine moves to [`Shutdown`].
//!
//! # Events
//!
//! The machine publishes its progress through an [`EventPublisher`]. The [`EventSubscriber`]
//! returned by [`StateMachineInitializer::init()`] hands out listeners for the phases, the
//! global weights, the selected clients, the round statistics and the outcome of the run.
//!
//! [`EventPublisher`]: crate::state_machine::events::EventPublisher
//! [`EventSubscriber`]: crate::state_machine::events::EventSubscriber

pub mod coordinator;
pub mod events;
pub mod initializer;
pub mod phases;

#[cfg(test)]
pub(crate) mod tests;

use derive_more::From;

pub use self::initializer::{StateMachineInitializationError, StateMachineInitializer};
use self::phases::{
    Aggregating,
    Checkpointing,
    Collecting,
    Distributing,
    Failure,
    Finished,
    PhaseState,
    Selecting,
    Shutdown,
    WaitingForClients,
};
use crate::{storage::CheckpointStorage, transport::Transport};

/// The state machine with all its states.
#[derive(From)]
pub enum StateMachine<T, C> {
    WaitingForClients(PhaseState<WaitingForClients, T, C>),
    Selecting(PhaseState<Selecting, T, C>),
    Distributing(PhaseState<Distributing, T, C>),
    Collecting(PhaseState<Collecting, T, C>),
    Aggregating(PhaseState<Aggregating, T, C>),
    Checkpointing(PhaseState<Checkpointing, T, C>),
    Finished(PhaseState<Finished, T, C>),
    Failure(PhaseState<Failure, T, C>),
    Shutdown(PhaseState<Shutdown, T, C>),
}

impl<T, C> StateMachine<T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    /// Moves the [`StateMachine`] to the next state and consumes the current one.
    /// Returns the next state or `None` if the [`StateMachine`] reached the state [`Shutdown`].
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::WaitingForClients(state) => state.run_phase().await,
            StateMachine::Selecting(state) => state.run_phase().await,
            StateMachine::Distributing(state) => state.run_phase().await,
            StateMachine::Collecting(state) => state.run_phase().await,
            StateMachine::Aggregating(state) => state.run_phase().await,
            StateMachine::Checkpointing(state) => state.run_phase().await,
            StateMachine::Finished(state) => state.run_phase().await,
            StateMachine::Failure(state) => state.run_phase().await,
            StateMachine::Shutdown(state) => state.run_phase().await,
        }
    }

    /// Runs the state machine until it shuts down.
    pub async fn run(mut self) -> Option<()> {
        loop {
            self = self.next().await?;
        }
    }
}
