use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    state_machine::{
        phases::{Phase, PhaseError, PhaseName, PhaseState, Shared, WaitingForClients},
        StateMachine,
    },
    storage::{Checkpoint, CheckpointStorage},
    transport::Transport,
};

/// The phase that closes a round and persists it if it is due.
#[derive(Debug)]
pub struct Checkpointing;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Checkpointing, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Checkpointing;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let round = self.shared.round();
        if !self.shared.settings.is_checkpoint_round(round) {
            debug!("no checkpoint due after round {}", round);
            return Ok(());
        }

        let checkpoint = Checkpoint {
            round,
            weights: self.shared.state.global_weights.clone(),
            prng_state: self.shared.rng.state(),
            numeric_prng_state: self.shared.numeric_rng.state(),
        };
        let seed = self.shared.settings.seed;
        self.shared
            .store
            .save(seed, &checkpoint)
            .await
            .map_err(PhaseError::Checkpoint)?;
        info!("saved the checkpoint of round {}", round);
        Ok(())
    }

    fn next(mut self) -> Option<StateMachine<T, C>> {
        let round = self.shared.round();
        info!("round {} completed", round);
        self.shared.failed_rounds = 0;
        self.shared.set_round(round + 1);
        Some(PhaseState::<WaitingForClients, _, _>::new(self.shared).into())
    }
}

impl<T, C> PhaseState<Checkpointing, T, C> {
    /// Creates a new checkpointing phase.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: Checkpointing,
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::tests::weights,
        state_machine::tests::{builder::StateMachineBuilder, FailingStorage, NoopTransport},
        storage::FileStorage,
    };

    #[tokio::test]
    async fn test_checkpoint_is_written_when_due() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStorage::new(dir.path());
        let (state_machine, _events) = StateMachineBuilder::new(NoopTransport, store.clone())
            .with_seed(9)
            .with_rounds(5)
            .with_checkpoint_interval(2)
            .with_round(2)
            .with_weights(weights(&[("w", vec![4.])]))
            .with_phase(Checkpointing)
            .build();
        let rng_state = state_machine.shared().rng.state();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_waiting_for_clients());
        assert_eq!(state_machine.shared().round(), 3);

        let checkpoint = store.latest(9).await.unwrap().unwrap();
        assert_eq!(checkpoint.round, 2);
        assert_eq!(checkpoint.weights, weights(&[("w", vec![4.])]));
        assert_eq!(checkpoint.prng_state, rng_state);
    }

    #[tokio::test]
    async fn test_no_checkpoint_between_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStorage::new(dir.path());
        let (state_machine, _events) = StateMachineBuilder::new(NoopTransport, store.clone())
            .with_seed(9)
            .with_rounds(5)
            .with_checkpoint_interval(2)
            .with_round(3)
            .with_phase(Checkpointing)
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_waiting_for_clients());
        assert!(store.latest(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_checkpoint_restarts_the_round() {
        let (state_machine, _events) = StateMachineBuilder::new(NoopTransport, FailingStorage)
            .with_round(1)
            .with_phase(Checkpointing)
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_failure());
        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_waiting_for_clients());
        assert_eq!(state_machine.shared().round(), 1);
    }
}
