//! This module provides the [`StateMachine`]'s `Events`, `EventSubscriber` and `EventPublisher`
//! types.
//!
//! [`StateMachine`]: crate::state_machine::StateMachine

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    common::ClientId,
    model::Weights,
    state_machine::{coordinator::RoundStats, phases::PhaseName},
};

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    /// The round in which the event was emitted.
    pub round: u32,
    /// The event itself.
    pub event: E,
}

/// Global model update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelUpdate {
    Invalidate,
    New(Arc<Weights>),
}

/// The outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Running,
    /// All rounds completed.
    Finished,
    /// The run was aborted with the given error.
    Aborted(String),
}

/// A convenience type to emit any coordinator event.
#[derive(Debug)]
pub struct EventPublisher {
    round: u32,
    phase_tx: watch::Sender<Event<PhaseName>>,
    model_tx: watch::Sender<Event<ModelUpdate>>,
    selection_tx: watch::Sender<Event<Vec<ClientId>>>,
    stats_tx: watch::Sender<Event<RoundStats>>,
    mask_tx: watch::Sender<Event<Option<Vec<usize>>>>,
    outcome_tx: watch::Sender<Event<RunOutcome>>,
}

/// The `EventSubscriber` hands out `EventListener`s for any coordinator event.
#[derive(Debug, Clone)]
pub struct EventSubscriber {
    phase_rx: EventListener<PhaseName>,
    model_rx: EventListener<ModelUpdate>,
    selection_rx: EventListener<Vec<ClientId>>,
    stats_rx: EventListener<RoundStats>,
    mask_rx: EventListener<Option<Vec<usize>>>,
    outcome_rx: EventListener<RunOutcome>,
}

impl EventPublisher {
    /// Initialize a new event publisher with the given initial events.
    pub fn init(round: u32, phase: PhaseName, model: ModelUpdate) -> (Self, EventSubscriber) {
        let event = |event| Event { round, event };
        let (phase_tx, phase_rx) = watch::channel(event(phase));
        let (model_tx, model_rx) = watch::channel(Event { round, event: model });
        let (selection_tx, selection_rx) = watch::channel(Event {
            round,
            event: Vec::new(),
        });
        let (stats_tx, stats_rx) = watch::channel(Event {
            round,
            event: RoundStats::default(),
        });
        let (mask_tx, mask_rx) = watch::channel(Event { round, event: None });
        let (outcome_tx, outcome_rx) = watch::channel(Event {
            round,
            event: RunOutcome::Running,
        });

        let publisher = EventPublisher {
            round,
            phase_tx,
            model_tx,
            selection_tx,
            stats_tx,
            mask_tx,
            outcome_tx,
        };
        let subscriber = EventSubscriber {
            phase_rx: phase_rx.into(),
            model_rx: model_rx.into(),
            selection_rx: selection_rx.into(),
            stats_rx: stats_rx.into(),
            mask_rx: mask_rx.into(),
            outcome_rx: outcome_rx.into(),
        };
        (publisher, subscriber)
    }

    /// Set the round that is attached to the events the publisher broadcasts.
    pub fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    fn event<T>(&self, event: T) -> Event<T> {
        Event {
            round: self.round,
            event,
        }
    }

    /// Emit a phase event
    pub fn broadcast_phase(&mut self, phase: PhaseName) {
        let _ = self.phase_tx.send(self.event(phase));
    }

    /// Emit a model event
    pub fn broadcast_model(&mut self, update: ModelUpdate) {
        let _ = self.model_tx.send(self.event(update));
    }

    /// Emit the clients selected for the current round
    pub fn broadcast_selection(&mut self, selection: Vec<ClientId>) {
        let _ = self.selection_tx.send(self.event(selection));
    }

    /// Emit the counters of the current round
    pub fn broadcast_stats(&mut self, stats: RoundStats) {
        let _ = self.stats_tx.send(self.event(stats));
    }

    /// Emit the consolidated encryption mask of the current round
    pub fn broadcast_mask(&mut self, mask: Vec<usize>) {
        let _ = self.mask_tx.send(self.event(Some(mask)));
    }

    /// Emit the outcome of the run
    pub fn broadcast_outcome(&mut self, outcome: RunOutcome) {
        let _ = self.outcome_tx.send(self.event(outcome));
    }
}

impl EventSubscriber {
    /// Get a listener for new phase events
    pub fn phase_listener(&self) -> EventListener<PhaseName> {
        self.phase_rx.clone()
    }

    /// Get a listener for new model events
    pub fn model_listener(&self) -> EventListener<ModelUpdate> {
        self.model_rx.clone()
    }

    /// Get a listener for client selections
    pub fn selection_listener(&self) -> EventListener<Vec<ClientId>> {
        self.selection_rx.clone()
    }

    /// Get a listener for round statistics
    pub fn stats_listener(&self) -> EventListener<RoundStats> {
        self.stats_rx.clone()
    }

    /// Get a listener for consolidated encryption masks
    pub fn mask_listener(&self) -> EventListener<Option<Vec<usize>>> {
        self.mask_rx.clone()
    }

    /// Get a listener for the outcome of the run
    pub fn outcome_listener(&self) -> EventListener<RunOutcome> {
        self.outcome_rx.clone()
    }
}

/// A listener for coordinator events. It can be used to either retrieve the latest `Event<E>`
/// emitted by the coordinator or to wait for the next one.
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E> From<watch::Receiver<Event<E>>> for EventListener<E> {
    fn from(receiver: watch::Receiver<Event<E>>) -> Self {
        EventListener(receiver)
    }
}

impl<E: Clone> EventListener<E> {
    /// Get the latest event emitted by the coordinator.
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }

    /// Waits for the next event and returns it, or `None` once the coordinator is gone.
    pub async fn changed(&mut self) -> Option<Event<E>> {
        self.0.changed().await.ok()?;
        Some(self.get_latest())
    }
}
