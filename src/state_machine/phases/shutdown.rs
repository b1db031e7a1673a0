use async_trait::async_trait;
use tracing::info;

use crate::{
    state_machine::{
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::Transport,
};

/// The shutdown state.
#[derive(Debug)]
pub struct Shutdown;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Shutdown, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Shutdown;

    async fn process(&mut self) -> Result<(), PhaseError> {
        info!("shutting down the coordinator");
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, C>> {
        None
    }
}

impl<T, C> PhaseState<Shutdown, T, C> {
    /// Creates a new shutdown state.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: Shutdown,
            shared,
        }
    }
}
