use async_trait::async_trait;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::{
    state_machine::{
        phases::{Aggregating, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
    storage::CheckpointStorage,
    transport::{ClientMessage, Transport},
};

/// The phase that collects the updates of the selected clients.
#[derive(Debug)]
pub struct Collecting;

#[async_trait]
impl<T, C> Phase<T, C> for PhaseState<Collecting, T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    const NAME: PhaseName = PhaseName::Collecting;

    async fn process(&mut self) -> Result<(), PhaseError> {
        let deadline = Instant::now() + self.shared.settings.collect_timeout;

        while !self.shared.progress.awaiting.is_empty() {
            match timeout_at(deadline, self.shared.transport.receive()).await {
                Ok(message) => self.handle_message(message?),
                Err(_) => {
                    warn!(
                        "collection timed out, missing clients {:?}",
                        self.shared.progress.awaiting
                    );
                    break;
                }
            }
        }

        let progress = &mut self.shared.progress;
        progress.stats.missing = progress.awaiting.len() as u32;
        progress.awaiting.clear();
        let stats = progress.stats;
        info!(
            "collected {} updates ({} failed, {} missing)",
            stats.received, stats.failed, stats.missing
        );
        self.shared.events.broadcast_stats(stats);

        if self.shared.progress.updates.is_empty() {
            Err(PhaseError::NoUpdates(self.shared.round()))
        } else {
            Ok(())
        }
    }

    fn next(self) -> Option<StateMachine<T, C>> {
        Some(PhaseState::<Aggregating, _, _>::new(self.shared).into())
    }
}

impl<T, C> PhaseState<Collecting, T, C> {
    /// Creates a new collecting phase.
    pub fn new(shared: Shared<T, C>) -> Self {
        Self {
            private: Collecting,
            shared,
        }
    }

    fn handle_message(&mut self, message: ClientMessage) {
        let round = self.shared.round();
        let attempt = self.shared.failed_rounds;
        let progress = &mut self.shared.progress;
        let client_id = message.client_id;

        // late answers of a failed attempt belong to an abandoned round
        if message.round != round
            || message.attempt != attempt
            || !progress.awaiting.remove(&client_id)
        {
            debug!(
                "discarding message of client {} for round {} (attempt {})",
                client_id, message.round, message.attempt
            );
            progress.stats.discarded += 1;
            return;
        }

        match message.outcome {
            Ok(update) if update.report.client_id == client_id => {
                debug!("received the update of client {}", client_id);
                progress.stats.received += 1;
                progress.updates.push(update);
            }
            Ok(update) => {
                warn!(
                    "client {} sent a report of client {}",
                    client_id, update.report.client_id
                );
                progress.stats.discarded += 1;
            }
            Err(reason) => {
                warn!("client {} failed round {}: {}", client_id, round, reason);
                progress.stats.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        common::ClientId,
        state_machine::tests::{builder::StateMachineBuilder, update, ScriptedTransport},
        storage::NoopStorage,
    };

    fn message(round: u32, id: u32) -> ClientMessage {
        attempt_message(round, 0, id)
    }

    fn attempt_message(round: u32, attempt: u32, id: u32) -> ClientMessage {
        ClientMessage {
            client_id: ClientId::from(id),
            round,
            attempt,
            outcome: Ok(update(id, 10)),
        }
    }

    #[tokio::test]
    async fn test_collect_until_everyone_answered() {
        let transport = ScriptedTransport::default().with_messages(vec![
            message(1, 1),
            // stale and unselected messages
            message(0, 2),
            message(1, 4),
            ClientMessage {
                client_id: ClientId::from(3),
                round: 1,
                attempt: 0,
                outcome: Err("out of memory".into()),
            },
            message(1, 2),
        ]);
        let (state_machine, events) = StateMachineBuilder::new(transport, NoopStorage)
            .with_phase(Collecting)
            .with_awaiting(&[1, 2, 3])
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_aggregating());
        let shared = state_machine.shared();
        assert_eq!(shared.progress.updates.len(), 2);
        assert!(shared.progress.awaiting.is_empty());

        let stats = events.stats_listener().get_latest().event;
        assert_eq!(stats.received, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.missing, 0);
    }

    #[tokio::test]
    async fn test_answers_of_a_failed_attempt_are_discarded() {
        let transport = ScriptedTransport::default().with_messages(vec![
            attempt_message(1, 0, 1),
            attempt_message(1, 0, 2),
            attempt_message(1, 1, 2),
        ]);
        let (state_machine, events) = StateMachineBuilder::new(transport, NoopStorage)
            .with_phase(Collecting)
            .with_failed_rounds(1)
            .with_awaiting(&[1, 2])
            .with_collect_timeout(Duration::from_millis(50))
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_aggregating());
        let updates = &state_machine.shared().progress.updates;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].report.client_id, ClientId::from(2));

        let stats = events.stats_listener().get_latest().event;
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.missing, 1);
    }

    #[tokio::test]
    async fn test_collect_timeout_keeps_partial_updates() {
        let transport = ScriptedTransport::default().with_messages(vec![message(1, 1)]);
        let (state_machine, events) = StateMachineBuilder::new(transport, NoopStorage)
            .with_phase(Collecting)
            .with_awaiting(&[1, 2])
            .with_collect_timeout(Duration::from_millis(50))
            .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_aggregating());
        assert_eq!(state_machine.shared().progress.updates.len(), 1);
        assert_eq!(events.stats_listener().get_latest().event.missing, 1);
    }

    #[tokio::test]
    async fn test_collect_nothing_fails_the_round() {
        let (state_machine, _events) =
            StateMachineBuilder::new(ScriptedTransport::default(), NoopStorage)
                .with_phase(Collecting)
                .with_awaiting(&[1])
                .with_collect_timeout(Duration::from_millis(20))
                .build();

        let state_machine = state_machine.next().await.unwrap();
        assert!(state_machine.is_failure());
    }
}
