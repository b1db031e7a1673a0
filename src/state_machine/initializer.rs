//! Creation of a fresh or resumed [`StateMachine`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    aggregator::{Aggregator, FederatedAveraging},
    divider::{DividerConfig, DividerConfigError},
    model::Weights,
    rng::{SeededRng, NUMERIC_STREAM, SELECTION_STREAM},
    selector::{RandomSelector, Selector},
    settings::{CheckpointSettings, Settings},
    state_machine::{
        coordinator::{CoordinatorSettings, RoundState},
        events::{EventPublisher, EventSubscriber, ModelUpdate},
        phases::{PhaseName, PhaseState, Shared, WaitingForClients},
        StateMachine,
    },
    storage::{CheckpointStorage, ResumeError},
    transport::Transport,
};

type StateMachineInitializationResult<T> = Result<T, StateMachineInitializationError>;

/// Error that can occur during the initialization of the [`StateMachine`].
#[derive(Debug, Error)]
pub enum StateMachineInitializationError {
    #[error("invalid divider configuration: {0}")]
    Divider(#[from] DividerConfigError),
    #[error("failed to resume: {0}")]
    Resume(#[from] ResumeError),
}

/// Builds the divider configuration and checks that the datasource can serve it.
///
/// # Errors
/// Fails if the settings don't describe a valid divider or if the IID partitions of a round
/// don't fit into `num_train_examples`.
pub fn divider_config(
    settings: &Settings,
    num_train_examples: usize,
) -> StateMachineInitializationResult<DividerConfig> {
    let config = DividerConfig::from_settings(&settings.data)?;
    config.validate_capacity(num_train_examples, &settings.clients)?;
    Ok(config)
}

/// The restored or fresh coordinator state.
struct Start {
    state: RoundState,
    rng: SeededRng,
    numeric_rng: SeededRng,
}

/// The state machine initializer that initializes a new state machine.
pub struct StateMachineInitializer<T, C> {
    settings: CoordinatorSettings,
    checkpoint: CheckpointSettings,
    initial_weights: Weights,
    selector: Box<dyn Selector>,
    aggregator: Box<dyn Aggregator>,
    transport: T,
    store: C,
}

impl<T, C> StateMachineInitializer<T, C>
where
    T: Transport,
    C: CheckpointStorage,
{
    /// Creates a new [`StateMachineInitializer`].
    ///
    /// `initial_weights` are the global weights of a fresh run. They also define the model
    /// layout a checkpoint must match.
    pub fn new(settings: &Settings, initial_weights: Weights, transport: T, store: C) -> Self {
        Self {
            settings: CoordinatorSettings::from_settings(settings),
            checkpoint: settings.checkpoint.clone(),
            initial_weights,
            selector: Box::new(RandomSelector),
            aggregator: Box::new(FederatedAveraging::from_settings(&settings.server)),
            transport,
            store,
        }
    }

    /// Replaces the client selection policy.
    pub fn with_selector(mut self, selector: impl Selector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Replaces the aggregation strategy.
    pub fn with_aggregator(mut self, aggregator: impl Aggregator + 'static) -> Self {
        self.aggregator = Box::new(aggregator);
        self
    }

    /// Initializes a new [`StateMachine`] with the given settings.
    ///
    /// Resumes from the latest checkpoint of the configured seed if resuming is enabled.
    ///
    /// # Errors
    /// Fails if resuming fails and falling back to a fresh start is disabled.
    pub async fn init(
        mut self,
    ) -> StateMachineInitializationResult<(StateMachine<T, C>, EventSubscriber)> {
        let start = if self.checkpoint.resume {
            match self.resume().await {
                Ok(start) => start,
                Err(err) if self.checkpoint.fallback_to_fresh => {
                    warn!("{}, starting a fresh run", err);
                    self.fresh()
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            self.fresh()
        };
        Ok(self.init_state_machine(start))
    }

    fn fresh(&self) -> Start {
        info!("starting a fresh run with seed {}", self.settings.seed);
        Start {
            state: RoundState::new(1, self.initial_weights.clone()),
            rng: SeededRng::new(self.settings.seed, SELECTION_STREAM),
            numeric_rng: SeededRng::new(self.settings.seed, NUMERIC_STREAM),
        }
    }

    async fn resume(&mut self) -> Result<Start, ResumeError> {
        let seed = self.settings.seed;
        let checkpoint = self
            .store
            .latest(seed)
            .await
            .map_err(ResumeError::Unreadable)?
            .ok_or(ResumeError::NotFound(seed))?;

        if checkpoint.round > self.settings.rounds {
            return Err(ResumeError::Finished {
                round: checkpoint.round,
                rounds: self.settings.rounds,
            });
        }
        self.initial_weights
            .check_layout(&checkpoint.weights)
            .map_err(|err| ResumeError::Unreadable(err.into()))?;

        info!("resuming after round {}", checkpoint.round);
        Ok(Start {
            state: RoundState::new(checkpoint.round + 1, checkpoint.weights),
            rng: SeededRng::from_state(&checkpoint.prng_state),
            numeric_rng: SeededRng::from_state(&checkpoint.numeric_prng_state),
        })
    }

    fn init_state_machine(self, start: Start) -> (StateMachine<T, C>, EventSubscriber) {
        let Start {
            state,
            rng,
            numeric_rng,
        } = start;
        let (events, subscriber) = EventPublisher::init(
            state.current_round,
            PhaseName::WaitingForClients,
            ModelUpdate::New(Arc::new(state.global_weights.clone())),
        );
        let shared = Shared::new(
            self.settings,
            state,
            rng,
            numeric_rng,
            self.selector,
            self.aggregator,
            events,
            self.transport,
            self.store,
        );
        let state_machine = PhaseState::<WaitingForClients, _, _>::new(shared).into();
        (state_machine, subscriber)
    }
}
