use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::{
    state_machine::{
        coordinator::RoundProgress,
        phases::{Finished, Phase, PhaseError, PhaseName, PhaseState, Selecting, Shared},
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::Transport,
};

/// The phase that opens a round: it waits until enough clients can be reached.
#[derive(Debug)]
pub struct WaitingForClients;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<WaitingForClients, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::WaitingForClients;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let shared = &mut self.shared;
        shared.state.selected_clients.clear();
        shared.progress = RoundProgress::default();
        shared.round_start = shared.state.global_weights.clone();

        if self.is_finished() {
            debug!("all rounds are done");
            return Ok(());
        }

        let count = self.shared.settings.per_round;
        debug!("waiting for {} clients", count);
        timeout(
            self.shared.settings.collect_timeout,
            self.shared.transport.wait_for_clients(count),
        )
        .await??;
        info!("{} clients are available", count);
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, C>> {
        if self.is_finished() {
            Some(PhaseState::<Finished, _, _>::new(self.shared).into())
        } else {
            Some(PhaseState::<Selecting, _, _>::new(self.shared).into())
        }
    }
}

impl<T, C> PhaseState<WaitingForClients, T, C> {
    /// Creates a new waiting phase.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: WaitingForClients,
            shared,
        }
    }

    fn is_finished(&self) -> bool {
        self.shared.round() > self.shared.settings.rounds
    }
}
