use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    aggregator::AggregationError,
    state_machine::{
        events::{ModelUpdate, RunOutcome},
        phases::{Phase, PhaseName, PhaseState, Shared, Shutdown, WaitingForClients},
        StateMachine,
    },
    storage::{CheckpointStorage, StorageError},
    transport::{Transport, TransportError},
};

/// Errors which can occur during the execution of the [`StateMachine`].
#[derive(Error, Debug)]
pub enum PhaseError {
    #[error("phase timeout")]
    PhaseTimeout(#[from] tokio::time::error::Elapsed),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("no client could be reached in round {0}")]
    NoClientsReached(u32),
    #[error("no update was received in round {0}")]
    NoUpdates(u32),
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("saving the checkpoint failed: {0}")]
    Checkpoint(StorageError),
}

impl PhaseError {
    /// Whether the error ends the run instead of restarting the round.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PhaseError::Transport(TransportError::Closed)
                | PhaseError::Aggregation(AggregationError::Shape { .. })
        )
    }
}

/// The failure state.
#[derive(Debug)]
pub struct Failure {
    pub(in crate::state_machine) error: PhaseError,
}

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Failure, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Failure;

    async fn process(&mut self) -> Result<(), PhaseError> {
        error!("phase state error: {}", self.private.error);
        self.shared.failed_rounds += 1;

        // forget everything the failed attempt produced
        self.shared.state.global_weights = self.shared.round_start.clone();
        self.shared
            .events
            .broadcast_model(ModelUpdate::Invalidate);
        Ok(())
    }

    fn next(mut self) -> Option<StateMachine<T, C>> {
        let failed = self.shared.failed_rounds;
        let max = self.shared.settings.max_failed_rounds;
        if self.private.error.is_fatal() || failed > max {
            warn!("giving up after {} failed attempts", failed);
            self.shared
                .events
                .broadcast_outcome(RunOutcome::Aborted(self.private.error.to_string()));
            return Some(PhaseState::<Shutdown, _, _>::new(self.shared).into());
        }

        info!(
            "restarting round {} ({} of {} retries)",
            self.shared.round(),
            failed,
            max
        );
        Some(PhaseState::<WaitingForClients, _, _>::new(self.shared).into())
    }
}

impl<T, C> PhaseState<Failure, T, C> {
    /// Creates a new failure phase.
    pub fn new(shared: Shared<T, C>, error: PhaseError) -> Self {
        Self {
            private: Failure { error },
            shared,
        }
    }
}
