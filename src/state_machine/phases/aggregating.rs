use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    aggregator::consolidate_masks,
    state_machine::{
        events::ModelUpdate,
        phases::{Checkpointing, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::Transport,
};

/// The phase that combines the collected updates into new global weights.
#[derive(Debug)]
pub struct Aggregating;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Aggregating, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Aggregating;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let round = self.shared.round();
        let mut updates = std::mem::take(&mut self.shared.progress.updates);
        // arrival order must not change the floating point result
        updates.sort_by_key(|update| update.report.client_id);

        let aggregate =
            self.shared
                .aggregator
                .aggregate(round, &self.shared.state.global_weights, &updates)?;
        match aggregate.threshold {
            Some(threshold) => info!(
                "aggregated {} of {} updates (threshold {})",
                aggregate.included.len(),
                updates.len(),
                threshold
            ),
            None => info!("aggregated {} updates", aggregate.included.len()),
        }

        let proposals: Vec<&[usize]> = updates
            .iter()
            .filter_map(|update| update.encrypt_mask.as_deref())
            .collect();
        if !proposals.is_empty() {
            let count = proposals.len();
            let mask = consolidate_masks(proposals);
            debug!(
                "consolidated the mask proposals of {} clients into {} indices",
                count,
                mask.len()
            );
            self.shared.events.broadcast_mask(mask);
        }

        self.shared.state.global_weights = aggregate.weights;
        self.shared
            .events
            .broadcast_model(ModelUpdate::New(Arc::new(
                self.shared.state.global_weights.clone(),
            )));
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, C>> {
        Some(PhaseState::<Checkpointing, _, _>::new(self.shared).into())
    }
}

impl<T, C> PhaseState<Aggregating, T, C> {
    /// Creates a new aggregating phase.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: Aggregating,
            shared,
        }
    }
}
