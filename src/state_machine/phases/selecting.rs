use async_trait::async_trait;
use tracing::info;

use crate::{
    common::ClientId,
    selector::choose_clients,
    state_machine::{
        phases::{Distributing, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::Transport,
};

/// The phase that selects the clients of a round.
#[derive(Debug)]
pub struct Selecting;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Selecting, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Selecting;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let shared = &mut self.shared;
        let pool: Vec<ClientId> = ClientId::range(shared.settings.total_clients).collect();
        let selected = choose_clients(
            &*shared.selector,
            &pool,
            shared.settings.per_round as usize,
            &mut shared.rng,
        );
        info!("selected clients {:?}", selected);

        shared.state.selected_clients = selected.iter().copied().collect();
        shared.events.broadcast_selection(selected);
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, C>> {
        Some(PhaseState::<Distributing, _, _>::new(self.shared).into())
    }
}

impl<T, C> PhaseState<Selecting, T, C> {
    /// Creates a new selecting phase.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: Selecting,
            shared,
        }
    }
}
