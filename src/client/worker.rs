//! The task serving a [`Client`] over a channel.

use tokio::sync::mpsc;
use tracing::{debug, info_span, warn};

use crate::{
    client::{Client, ClientError, ClientFactory},
    common::ClientUpdate,
    transport::{ClientMessage, RoundAssignment},
};

/// Runs rounds for every assignment it receives and sends the outcome back.
pub struct Worker<F: ClientFactory> {
    client: Client<F>,
    assignments: mpsc::UnboundedReceiver<RoundAssignment>,
    messages: mpsc::UnboundedSender<ClientMessage>,
}

impl<F: ClientFactory> Worker<F> {
    pub fn new(
        client: Client<F>,
        assignments: mpsc::UnboundedReceiver<RoundAssignment>,
        messages: mpsc::UnboundedSender<ClientMessage>,
    ) -> Self {
        Self {
            client,
            assignments,
            messages,
        }
    }

    /// Serves assignments until either side of the channel is closed.
    pub async fn run(mut self) {
        while let Some(assignment) = self.assignments.recv().await {
            let message = self.serve(&assignment);
            let trained = message.outcome.is_ok();
            if self.messages.send(message).is_err() {
                debug!("coordinator is gone, stopping the worker");
                break;
            }
            if trained {
                if let Err(err) = self.client.finish_round() {
                    warn!("client {}: {}", assignment.client_id, err);
                    self.client.abort_round();
                }
            }
        }
    }

    /// Runs a single round. Failures are reported to the coordinator instead of ending the
    /// worker.
    pub fn serve(&mut self, assignment: &RoundAssignment) -> ClientMessage {
        let span = info_span!(
            "client_round",
            client_id = %assignment.client_id,
            round = assignment.round
        );
        let _span_guard = span.enter();

        let outcome = self.run_round(assignment).map_err(|err| {
            warn!("round failed: {}", err);
            self.client.abort_round();
            err.to_string()
        });
        ClientMessage {
            client_id: assignment.client_id,
            round: assignment.round,
            attempt: assignment.attempt,
            outcome,
        }
    }

    fn run_round(&mut self, assignment: &RoundAssignment) -> Result<ClientUpdate, ClientError> {
        self.client.configure(assignment.client_id)?;
        self.client.load_data(assignment.round)?;
        self.client
            .load_payload(&assignment.weights, assignment.round_seed)?;
        self.client.train()
    }
}
