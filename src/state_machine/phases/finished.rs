use async_trait::async_trait;
use tracing::info;

use crate::{
    state_machine::{
        events::RunOutcome,
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared, Shutdown},
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::Transport,
};

/// The terminal phase after the last round.
#[derive(Debug)]
pub struct Finished;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Finished, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Finished;

    async fn process(&mut self) -> Result<(), PhaseError> {
        info!(
            "training finished after {} rounds",
            self.shared.settings.rounds
        );
        self.shared.events.broadcast_outcome(RunOutcome::Finished);
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, C>> {
        Some(PhaseState::<Shutdown, _, _>::new(self.shared).into())
    }
}

impl<T, C> PhaseState<Finished, T, C> {
    /// Creates a new finished phase.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: Finished,
            shared,
        }
    }
}
