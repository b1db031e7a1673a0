use async_trait::async_trait;
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::{
    state_machine::{
        phases::{Collecting, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::{RoundAssignment, Transport, TransportError},
};

/// The phase that sends the global weights to the selected clients.
#[derive(Debug)]
pub struct Distributing;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Distributing, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Distributing;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let round = self.shared.round();
        let attempt = self.shared.failed_rounds;
        let selected: Vec<_> = self.shared.state.selected_clients.iter().copied().collect();

        for client_id in selected {
            // drawn for every selected client, reachable or not, to keep the sequence stable
            let round_seed = self.shared.numeric_rng.next_u64();
            let assignment = RoundAssignment {
                round,
                attempt,
                client_id,
                round_seed,
                weights: self.shared.state.global_weights.clone(),
            };
            match self.shared.transport.send(assignment).await {
                Ok(()) => {
                    debug!("sent the global weights to client {}", client_id);
                    self.shared.progress.awaiting.insert(client_id);
                    self.shared.progress.stats.sent += 1;
                }
                Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
                Err(err) => {
                    warn!("excluding client {} from round {}: {}", client_id, round, err);
                    self.shared.progress.stats.dropped += 1;
                }
            }
        }

        if self.shared.progress.awaiting.is_empty() {
            return Err(PhaseError::NoClientsReached(round));
        }
        info!(
            "distributed the global weights to {} clients",
            self.shared.progress.awaiting.len()
        );
        Ok(())
    }

    fn next(self) -> Option<StateMachine<T, C>> {
        Some(PhaseState::<Collecting, _, _>::new(self.shared).into())
    }
}

impl<T, C> PhaseState<Distributing, T, C> {
    /// Creates a new distributing phase.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: Distributing,
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        common::ClientId,
        state_machine::tests::{builder::StateMachineBuilder, ScriptedTransport},
        storage::NoopStorage,
    };

    fn ids(ids: &[u32]) -> BTreeSet<ClientId> {
        ids.iter().copied().map(ClientId::from).collect()
    }

    #[tokio::test]
    async fn test_unreachable_clients_are_excluded() {
        let transport = ScriptedTransport::default().unreachable(&[2]);
        let sent = transport.sent();
        let (state_machine, events) = StateMachineBuilder::new(transport, NoopStorage)
            .with_phase(Distributing)
            .with_selection(&[1, 2, 3])
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_collecting());
        let shared = state_machine.shared();
        assert_eq!(shared.progress.awaiting, ids(&[1, 3]));
        assert_eq!(shared.progress.stats.sent, 2);
        assert_eq!(shared.progress.stats.dropped, 1);
        assert_eq!(
            events.phase_listener().get_latest().event,
            PhaseName::Distributing
        );

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent
            .iter()
            .all(|assignment| assignment.round == 1 && assignment.attempt == 0));
        assert_ne!(sent[0].round_seed, sent[1].round_seed);
    }

    #[tokio::test]
    async fn test_no_reachable_client_fails_the_round() {
        let transport = ScriptedTransport::default().unreachable(&[1, 2]);
        let (state_machine, _events) = StateMachineBuilder::new(transport, NoopStorage)
            .with_phase(Distributing)
            .with_selection(&[1, 2])
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_failure());
    }
}
