//! Wiring of an in-process simulation: the synthetic datasource, the divider and the client
//! workers behind a [`LocalTransport`].

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::{
    algorithm::{Algorithm, AlgorithmError},
    client::{CentroidFactory, Client, ClientConfig, ClientFactory},
    common::ClientId,
    data::{Datasource, SyntheticDatasource},
    divider::{Divider, DividerConfigError},
    model::Weights,
    settings::Settings,
    state_machine::{initializer::divider_config, StateMachineInitializationError},
    transport::LocalTransport,
};

#[derive(Debug, Error)]
/// Errors that can occur while setting up a simulation.
pub enum SimulationError {
    #[error(transparent)]
    Setup(#[from] StateMachineInitializationError),
    #[error("failed to set up the divider: {0}")]
    Divider(#[from] DividerConfigError),
    #[error("failed to build the initial model: {0}")]
    Algorithm(#[from] AlgorithmError),
}

/// The shared, read-only parts of a simulation.
pub struct Simulation {
    datasource: Arc<dyn Datasource>,
    divider: Arc<Divider>,
    factory: Arc<CentroidFactory>,
    config: ClientConfig,
    workers: u32,
}

impl Simulation {
    /// Generates the datasource and sets up the divider described by `settings`.
    ///
    /// # Errors
    /// Fails if the divider configuration is invalid or doesn't fit the datasource.
    pub fn new(settings: &Settings) -> Result<Self, SimulationError> {
        let source = &settings.datasource;
        let seed = settings.server.random_seed;
        let datasource: Arc<dyn Datasource> = Arc::new(SyntheticDatasource::generate(
            source.num_train_examples,
            source.num_test_examples,
            source.num_labels,
            source.num_features,
            seed,
        ));

        let config = divider_config(settings, datasource.num_train_examples())?;
        let divider = Divider::new(
            &config,
            datasource.clone(),
            settings.clients.total_clients,
            seed,
        )?;
        info!(
            "{} divider over {} training examples",
            divider.kind(),
            datasource.num_train_examples()
        );

        Ok(Self {
            datasource,
            divider: Arc::new(divider),
            factory: Arc::new(CentroidFactory::from_settings(settings)),
            config: ClientConfig::from_settings(settings),
            workers: settings.clients.workers(),
        })
    }

    /// The global weights of a fresh run: the untrained model.
    pub fn initial_weights(&self) -> Result<Weights, AlgorithmError> {
        let id = ClientId::from(1);
        let trainer = self.factory.trainer(id);
        self.factory.algorithm(id).extract_weights(&trainer)
    }

    /// Spawns the client workers.
    pub fn spawn_clients(&self) -> LocalTransport {
        let clients = (0..self.workers)
            .map(|_| {
                Client::new(
                    self.factory.clone(),
                    self.datasource.clone(),
                    self.divider.clone(),
                    self.config.clone(),
                )
            })
            .collect();
        LocalTransport::spawn(clients)
    }
}
