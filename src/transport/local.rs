use async_trait::async_trait;
use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::{
    client::{worker::Worker, Client, ClientFactory},
    common::ClientId,
    transport::{ClientMessage, RoundAssignment, Transport, TransportError},
};

/// An in-process transport backed by a pool of client workers.
///
/// Client ids are mapped onto the workers round-robin, so every id is always served by the
/// same worker.
pub struct LocalTransport {
    workers: Vec<mpsc::UnboundedSender<RoundAssignment>>,
    messages: mpsc::UnboundedReceiver<ClientMessage>,
    handles: Vec<JoinHandle<()>>,
}

impl LocalTransport {
    /// Spawns a worker task for every client.
    pub fn spawn<F: ClientFactory>(clients: Vec<Client<F>>) -> Self {
        let (message_tx, messages) = mpsc::unbounded_channel();
        let (workers, handles): (Vec<_>, Vec<_>) = clients
            .into_iter()
            .map(|client| {
                let (assignment_tx, assignment_rx) = mpsc::unbounded_channel();
                let worker = Worker::new(client, assignment_rx, message_tx.clone());
                (assignment_tx, tokio::spawn(worker.run()))
            })
            .unzip();
        debug!("spawned {} client workers", handles.len());
        Self {
            workers,
            messages,
            handles,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn worker_of(&self, client_id: ClientId) -> Option<&mpsc::UnboundedSender<RoundAssignment>> {
        if self.workers.is_empty() {
            return None;
        }
        let index = (client_id.get() as usize).saturating_sub(1) % self.workers.len();
        self.workers.get(index)
    }

    /// Closes all assignment channels and waits for the workers to finish.
    pub async fn shutdown(self) {
        let LocalTransport {
            workers, handles, ..
        } = self;
        drop(workers);
        join_all(handles).await;
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&mut self, assignment: RoundAssignment) -> Result<(), TransportError> {
        let client_id = assignment.client_id;
        self.worker_of(client_id)
            .ok_or(TransportError::Unreachable(client_id))?
            .send(assignment)
            .map_err(|_| TransportError::Unreachable(client_id))
    }

    async fn receive(&mut self) -> Result<ClientMessage, TransportError> {
        self.messages.recv().await.ok_or(TransportError::Closed)
    }

    /// Every client id is reachable as long as a single worker is alive.
    async fn wait_for_clients(&mut self, _count: u32) -> Result<(), TransportError> {
        if self.workers.iter().any(|worker| !worker.is_closed()) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        client::tests::{config, factory, iid_divider, source},
        model::{Tensor, Weights},
        trainer::CENTROIDS,
    };

    fn transport(workers: usize) -> LocalTransport {
        let datasource = source();
        let divider = iid_divider(datasource.clone());
        LocalTransport::spawn(
            (0..workers)
                .map(|_| Client::new(factory(), datasource.clone(), divider.clone(), config()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_more_clients_than_workers() {
        let mut transport = transport(2);
        assert_eq!(transport.num_workers(), 2);
        assert!(transport.wait_for_clients(5).await.is_ok());

        let mut weights = Weights::new();
        weights.insert(CENTROIDS, Tensor::zeros(&[4, 1]));
        for id in ClientId::range(5) {
            transport
                .send(RoundAssignment {
                    round: 1,
                    attempt: 0,
                    client_id: id,
                    round_seed: 0,
                    weights: weights.clone(),
                })
                .await
                .unwrap();
        }

        let mut answered = BTreeSet::new();
        for _ in 0..5 {
            let message = transport.receive().await.unwrap();
            assert!(message.outcome.is_ok());
            answered.insert(message.client_id);
        }
        assert_eq!(answered, ClientId::range(5).collect::<BTreeSet<_>>());

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_workers() {
        let mut transport = transport(0);
        assert_eq!(
            transport.wait_for_clients(1).await,
            Err(TransportError::Closed)
        );
        assert_eq!(
            transport
                .send(RoundAssignment {
                    round: 1,
                    attempt: 0,
                    client_id: ClientId::from(1),
                    round_seed: 0,
                    weights: Weights::new(),
                })
                .await,
            Err(TransportError::Unreachable(ClientId::from(1)))
        );
        assert_eq!(transport.receive().await, Err(TransportError::Closed));
    }
}
