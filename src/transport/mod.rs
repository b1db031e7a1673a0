//! Communication between the coordinator and its clients.
//!
//! The coordinator only depends on the [`Transport`] trait: it sends a [`RoundAssignment`] to
//! every selected client and receives [`ClientMessage`]s until the round is complete.

mod local;

use async_trait::async_trait;
use displaydoc::Display;
use thiserror::Error;

pub use self::local::LocalTransport;
use crate::{
    common::{ClientId, ClientUpdate},
    model::Weights,
};

#[derive(Debug, Clone, PartialEq)]
/// The work a selected client has to do in a round.
pub struct RoundAssignment {
    /// The (1-based) round.
    pub round: u32,
    /// The number of earlier failed attempts of this round.
    pub attempt: u32,
    pub client_id: ClientId,
    /// The seed of the client's local training in this round.
    pub round_seed: u64,
    /// The current global weights.
    pub weights: Weights,
}

#[derive(Debug, Clone, PartialEq)]
/// The answer of a client to a [`RoundAssignment`].
pub struct ClientMessage {
    pub client_id: ClientId,
    pub round: u32,
    /// The attempt of the round the message answers.
    pub attempt: u32,
    /// The update, or the reason why the client could not produce one.
    pub outcome: Result<ClientUpdate, String>,
}

/// Errors which can occur while talking to clients.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Client {0} is unreachable.
    Unreachable(ClientId),
    /// The transport is closed.
    Closed,
}

#[async_trait]
/// A channel between the coordinator and the clients.
pub trait Transport
where
    Self: Send + 'static,
{
    /// Delivers an assignment to its client.
    ///
    /// # Errors
    /// Fails if the client cannot be reached. The coordinator excludes that client from the
    /// round.
    async fn send(&mut self, assignment: RoundAssignment) -> Result<(), TransportError>;

    /// Waits for the next message of any client.
    ///
    /// # Errors
    /// Fails once no client can answer anymore.
    async fn receive(&mut self) -> Result<ClientMessage, TransportError>;

    /// Waits until at least `count` distinct clients can be reached.
    ///
    /// # Errors
    /// Fails if the transport can never reach that many clients.
    async fn wait_for_clients(&mut self, count: u32) -> Result<(), TransportError> {
        let _ = count;
        Ok(())
    }
}
