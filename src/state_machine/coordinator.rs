//! The coordinator state.

use std::{collections::BTreeSet, time::Duration};

use crate::{
    common::{ClientId, ClientUpdate},
    model::Weights,
    settings::Settings,
};

#[derive(Debug, Clone, PartialEq)]
/// The static parameters of a run.
pub struct CoordinatorSettings {
    /// The number of rounds after which the run is finished.
    pub rounds: u32,
    pub total_clients: u32,
    pub per_round: u32,
    pub seed: u64,
    /// The time to wait for clients, both before a round and for their updates.
    pub collect_timeout: Duration,
    /// A checkpoint is written every `checkpoint_interval` rounds and after the last one.
    pub checkpoint_interval: u32,
    pub max_failed_rounds: u32,
}

impl CoordinatorSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rounds: settings.server.rounds,
            total_clients: settings.clients.total_clients,
            per_round: settings.clients.per_round,
            seed: settings.server.random_seed,
            collect_timeout: Duration::from_secs(settings.server.collect_timeout),
            checkpoint_interval: settings.checkpoint.interval,
            max_failed_rounds: settings.server.max_failed_rounds,
        }
    }

    /// Whether `round` ends with a checkpoint.
    pub fn is_checkpoint_round(&self, round: u32) -> bool {
        round % self.checkpoint_interval.max(1) == 0 || round == self.rounds
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The state of the round in progress.
pub struct RoundState {
    /// The (1-based) round in progress.
    pub current_round: u32,
    pub selected_clients: BTreeSet<ClientId>,
    pub global_weights: Weights,
}

impl RoundState {
    pub fn new(current_round: u32, global_weights: Weights) -> Self {
        Self {
            current_round,
            selected_clients: BTreeSet::new(),
            global_weights,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters of a round.
pub struct RoundStats {
    /// Assignments delivered to clients.
    pub sent: u32,
    /// Assignments that could not be delivered.
    pub dropped: u32,
    /// Updates accepted for aggregation.
    pub received: u32,
    /// Clients that reported a failure.
    pub failed: u32,
    /// Selected clients that did not answer in time.
    pub missing: u32,
    /// Messages of unselected clients or other rounds.
    pub discarded: u32,
}

#[derive(Debug, Default)]
/// The bookkeeping of the round in progress.
pub struct RoundProgress {
    /// The clients whose answer is still outstanding.
    pub awaiting: BTreeSet<ClientId>,
    pub updates: Vec<ClientUpdate>,
    pub stats: RoundStats,
}
