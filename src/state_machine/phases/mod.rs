//! This module provides the `PhaseStates` of the [`StateMachine`].

mod aggregating;
mod checkpointing;
mod collecting;
mod distributing;
mod failure;
mod finished;
mod selecting;
mod shutdown;
mod waiting;

use std::fmt;

use async_trait::async_trait;
use derive_more::Display;
use tracing::{error_span, info, warn};
use tracing_futures::Instrument;

pub use self::{
    aggregating::Aggregating,
    checkpointing::Checkpointing,
    collecting::Collecting,
    distributing::Distributing,
    failure::{Failure, PhaseError},
    finished::Finished,
    selecting::Selecting,
    shutdown::Shutdown,
    waiting::WaitingForClients,
};
use crate::{
    aggregator::Aggregator,
    model::Weights,
    rng::SeededRng,
    selector::Selector,
    state_machine::{
        coordinator::{CoordinatorSettings, RoundProgress, RoundState},
        events::EventPublisher,
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::Transport,
};

/// The name of the current phase.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PhaseName {
    #[display(fmt = "WaitingForClients")]
    WaitingForClients,
    #[display(fmt = "Selecting")]
    Selecting,
    #[display(fmt = "Distributing")]
    Distributing,
    #[display(fmt = "Collecting")]
    Collecting,
    #[display(fmt = "Aggregating")]
    Aggregating,
    #[display(fmt = "Checkpointing")]
    Checkpointing,
    #[display(fmt = "Finished")]
    Finished,
    #[display(fmt = "Failure")]
    Failure,
    #[display(fmt = "Shutdown")]
    Shutdown,
}

/// A trait that must be implemented by a state in order to move to a next state.
#[async_trait]
pub trait Phase<T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Performs the tasks of this phase.
    async fn process(&mut self) -> Result<(), PhaseError>;

    /// Moves from this phase to the next phase.
    fn next(self) -> Option<StateMachine<T, C>>;
}

/// The coordinator state and the I/O interfaces that are shared and accessible by all
/// `PhaseState`s.
pub struct Shared<T, C> {
    pub(in crate::state_machine) settings: CoordinatorSettings,
    /// The state of the round in progress.
    pub(in crate::state_machine) state: RoundState,
    pub(in crate::state_machine) progress: RoundProgress,
    /// The global weights at the start of the round in progress.
    pub(in crate::state_machine) round_start: Weights,
    /// The number of consecutive failed attempts of the round in progress.
    pub(in crate::state_machine) failed_rounds: u32,
    /// The generator driving the client selection.
    pub(in crate::state_machine) rng: SeededRng,
    /// The generator drawing the round seeds.
    pub(in crate::state_machine) numeric_rng: SeededRng,
    pub(in crate::state_machine) selector: Box<dyn Selector>,
    pub(in crate::state_machine) aggregator: Box<dyn Aggregator>,
    pub(in crate::state_machine) events: EventPublisher,
    pub(in crate::state_machine) transport: T,
    pub(in crate::state_machine) store: C,
}

impl<T, C> fmt::Debug for Shared<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .field("failed_rounds", &self.failed_rounds)
            .field("events", &self.events)
            .finish()
    }
}

impl<T, C> Shared<T, C> {
    #[allow(clippy::too_many_arguments)]
    /// Creates a new shared state.
    pub fn new(
        settings: CoordinatorSettings,
        state: RoundState,
        rng: SeededRng,
        numeric_rng: SeededRng,
        selector: Box<dyn Selector>,
        aggregator: Box<dyn Aggregator>,
        events: EventPublisher,
        transport: T,
        store: C,
    ) -> Self {
        let round_start = state.global_weights.clone();
        Self {
            settings,
            state,
            progress: RoundProgress::default(),
            round_start,
            failed_rounds: 0,
            rng,
            numeric_rng,
            selector,
            aggregator,
            events,
            transport,
            store,
        }
    }

    /// Sets the round in progress.
    pub fn set_round(&mut self, round: u32) {
        self.state.current_round = round;
        self.events.set_round(round);
    }

    /// Returns the round in progress.
    pub fn round(&self) -> u32 {
        self.state.current_round
    }

    /// Returns the current global weights.
    pub fn global_weights(&self) -> &Weights {
        &self.state.global_weights
    }
}

/// The state corresponding to a phase of a round.
///
/// This contains the state-dependent `private` state and the state-independent `shared` state
/// which is shared across state transitions.
pub struct PhaseState<S, T, C> {
    /// The private state.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state and I/O interfaces.
    pub(in crate::state_machine) shared: Shared<T, C>,
}

impl<S, T, C> PhaseState<S, T, C>
where
    S: Send,
    T: Transport,
    C: CheckpointStorage,
    Self: Phase<T, C>,
{
    /// Runs the current phase to completion.
    ///
    /// 1. Performs the phase tasks.
    /// 2. Transitions to the next phase, or to the [`Failure`] phase if the tasks failed.
    pub async fn run_phase(mut self) -> Option<StateMachine<T, C>> {
        let phase = Self::NAME;
        let span = error_span!("run_phase", phase = %phase, round = self.shared.round());

        async move {
            info!("starting phase");
            self.shared.events.broadcast_phase(phase);

            if let Err(err) = self.process().await {
                warn!("failed to perform the phase tasks");
                return Some(self.into_failure_state(err));
            }
            info!("phase ran successfully");

            self.next()
        }
        .instrument(span)
        .await
    }
}

impl<S, T, C> PhaseState<S, T, C> {
    fn into_failure_state(self, err: PhaseError) -> StateMachine<T, C> {
        PhaseState::<Failure, _, _>::new(self.shared, err).into()
    }
}
