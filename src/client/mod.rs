//! A simulated federated learning client.
//!
//! # Round state machine
//!
//! A [`Client`] goes through the same states in every round it is selected for:
//!
//! `Idle → Configured → DataLoaded → PayloadReceived → Training → ReportReady → Idle`
//!
//! Calling an operation in the wrong state fails with [`ClientError::InvalidState`]. Any
//! other failure during a round moves the client back to `Idle` and keeps the data it already
//! loaded, so the next round starts from a clean state.
//!
//! # Virtual clients
//!
//! One [`Client`] can act for many client ids. [`Client::configure()`] with a new id rebuilds
//! the trainer and algorithm via the [`ClientFactory`] and drops the data of the previous id.

pub mod privacy;
pub mod worker;

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc, time::Instant};

use derive_more::Display;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    algorithm::{Algorithm, AlgorithmError, FlatWeights},
    common::{ClientId, ClientUpdate, Report},
    data::{DataPartition, Datasource},
    divider::{Divider, PartitionError},
    model::{ShapeError, Weights},
    rng::SeededRng,
    settings::Settings,
    trainer::{CentroidTrainer, Trainer, TrainerError},
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
/// The state of a client within a round.
pub enum ClientState {
    #[display(fmt = "Idle")]
    Idle,
    #[display(fmt = "Configured")]
    Configured,
    #[display(fmt = "DataLoaded")]
    DataLoaded,
    #[display(fmt = "PayloadReceived")]
    PayloadReceived,
    #[display(fmt = "Training")]
    Training,
    #[display(fmt = "ReportReady")]
    ReportReady,
}

#[derive(Error, Debug)]
/// Errors that can occur while a client takes part in a round.
pub enum ClientError {
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ClientState,
    },
    #[error("loading the partition failed: {0}")]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),
    #[error("training failed: {0}")]
    Trainer(#[from] TrainerError),
    #[error("proposing an encryption mask failed: {0}")]
    Mask(ShapeError),
}

/// Builds the trainer and the algorithm of a client.
pub trait ClientFactory: Send + Sync + 'static {
    type Trainer: Trainer;
    type Algorithm: Algorithm<Self::Trainer>;

    fn trainer(&self, client_id: ClientId) -> Self::Trainer;

    fn algorithm(&self, client_id: ClientId) -> Self::Algorithm;
}

#[derive(Debug, Clone)]
/// Builds [`CentroidTrainer`]s with the [`FlatWeights`] algorithm.
pub struct CentroidFactory {
    pub num_labels: u32,
    pub num_features: usize,
    pub learning_rate: f32,
}

impl CentroidFactory {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            num_labels: settings.datasource.num_labels,
            num_features: settings.datasource.num_features,
            learning_rate: settings.trainer.learning_rate,
        }
    }
}

impl ClientFactory for CentroidFactory {
    type Trainer = CentroidTrainer;
    type Algorithm = FlatWeights;

    fn trainer(&self, _client_id: ClientId) -> CentroidTrainer {
        CentroidTrainer::new(self.num_labels, self.num_features, self.learning_rate)
    }

    fn algorithm(&self, _client_id: ClientId) -> FlatWeights {
        FlatWeights
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The client side settings.
pub struct ClientConfig {
    pub seed: u64,
    pub do_test: bool,
    pub reload_data: bool,
    pub encrypt_ratio: Option<f64>,
    pub random_mask: bool,
    pub model_dir: Option<PathBuf>,
    pub model_name: String,
}

impl ClientConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            seed: settings.server.random_seed,
            do_test: settings.clients.do_test,
            reload_data: settings.data.reload_data,
            encrypt_ratio: settings.clients.encrypt_ratio,
            random_mask: settings.clients.random_mask,
            model_dir: settings.clients.model_dir.clone(),
            model_name: settings.trainer.model_name.clone(),
        }
    }
}

/// The trainer, algorithm and data bound to a client id.
struct Session<F: ClientFactory> {
    client_id: ClientId,
    trainer: F::Trainer,
    algorithm: F::Algorithm,
    trainset: Option<DataPartition>,
    testset: Option<DataPartition>,
    data_loading_time: f64,
    exposed: Option<Weights>,
    round_seed: u64,
}

/// A client that trains on its private partition.
pub struct Client<F: ClientFactory> {
    factory: Arc<F>,
    datasource: Arc<dyn Datasource>,
    divider: Arc<Divider>,
    config: ClientConfig,
    state: ClientState,
    session: Option<Session<F>>,
    /// The number of reports sent per client id.
    reports: HashMap<ClientId, u32>,
}

impl<F: ClientFactory> fmt::Debug for Client<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.client_id())
            .field("state", &self.state)
            .field("reports", &self.reports)
            .finish()
    }
}

impl<F: ClientFactory> Client<F> {
    pub fn new(
        factory: Arc<F>,
        datasource: Arc<dyn Datasource>,
        divider: Arc<Divider>,
        config: ClientConfig,
    ) -> Self {
        Self {
            factory,
            datasource,
            divider,
            config,
            state: ClientState::Idle,
            session: None,
            reports: HashMap::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The id this client currently acts for.
    pub fn client_id(&self) -> Option<ClientId> {
        self.session.as_ref().map(|session| session.client_id)
    }

    /// The partition of the current id, if loaded.
    pub fn trainset(&self) -> Option<&DataPartition> {
        self.session.as_ref()?.trainset.as_ref()
    }

    /// The number of reports sent for `client_id`.
    pub fn reports_sent(&self, client_id: ClientId) -> u32 {
        self.reports.get(&client_id).copied().unwrap_or(0)
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: &[ClientState],
    ) -> Result<(), ClientError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Moves back to `Idle` after a failed operation.
    fn fail<T>(&mut self, error: impl Into<ClientError>) -> Result<T, ClientError> {
        self.state = ClientState::Idle;
        Err(error.into())
    }

    // invariant: a session exists in every state but `Idle`
    fn session_mut(&mut self, operation: &'static str) -> Result<&mut Session<F>, ClientError> {
        let state = self.state;
        self.session
            .as_mut()
            .ok_or(ClientError::InvalidState { operation, state })
    }

    /// Binds the client to `client_id`.
    ///
    /// Keeps the trainer and data if the client already acts for `client_id`.
    pub fn configure(&mut self, client_id: ClientId) -> Result<(), ClientError> {
        self.expect_state("configure", &[ClientState::Idle, ClientState::Configured])?;

        if self.client_id() != Some(client_id) {
            debug!("client {} takes over from {:?}", client_id, self.client_id());
            self.session = Some(Session {
                client_id,
                trainer: self.factory.trainer(client_id),
                algorithm: self.factory.algorithm(client_id),
                trainset: None,
                testset: None,
                data_loading_time: 0.,
                exposed: None,
                round_seed: 0,
            });
        }
        self.state = ClientState::Configured;
        Ok(())
    }

    /// Extracts the partition of the current id from the datasource.
    ///
    /// The partition is loaded once per id, or every round if data reloading is enabled. A
    /// reloaded partition is drawn from the id's generator of `round`, so it doesn't depend
    /// on which rounds this particular client served before.
    pub fn load_data(&mut self, round: u32) -> Result<(), ClientError> {
        self.expect_state("load data", &[ClientState::Configured])?;
        let (seed, reload, do_test) = (
            self.config.seed,
            self.config.reload_data,
            self.config.do_test,
        );
        let divider = self.divider.clone();
        let datasource = self.datasource.clone();

        let session = self.session_mut("load data")?;
        if session.trainset.is_some() && !reload {
            debug!("client {} keeps its partition", session.client_id);
            self.state = ClientState::DataLoaded;
            return Ok(());
        }

        let client_id = session.client_id;
        let start = Instant::now();
        let mut rng = if reload {
            SeededRng::for_client_round(seed, client_id, round)
        } else {
            SeededRng::for_client(seed, client_id)
        };

        let partition = match divider.partition_for(client_id, &mut rng) {
            Ok(partition) => partition,
            Err(err) => return self.fail(err),
        };
        info!(
            "client {} loaded {} examples from the {} divider",
            client_id,
            partition.len(),
            divider.kind()
        );

        let session = self.session_mut("load data")?;
        session.trainset = Some(partition);
        session.testset = if do_test {
            Some(datasource.get_test_set())
        } else {
            None
        };
        session.data_loading_time = start.elapsed().as_secs_f64();
        self.state = ClientState::DataLoaded;
        Ok(())
    }

    /// Loads the global weights of a round into the trainer.
    pub fn load_payload(&mut self, weights: &Weights, round_seed: u64) -> Result<(), ClientError> {
        self.expect_state("load the payload", &[ClientState::DataLoaded])?;
        let keep_exposed = self.config.encrypt_ratio.is_some();

        let session = self.session_mut("load the payload")?;
        if let Err(err) = session.algorithm.load_weights(&mut session.trainer, weights) {
            return self.fail(err);
        }
        session.exposed = if keep_exposed {
            Some(weights.clone())
        } else {
            None
        };
        session.round_seed = round_seed;
        self.state = ClientState::PayloadReceived;
        Ok(())
    }

    /// Trains on the partition and prepares the update for the server.
    pub fn train(&mut self) -> Result<ClientUpdate, ClientError> {
        self.expect_state("train", &[ClientState::PayloadReceived])?;
        self.state = ClientState::Training;
        match self.run_training() {
            Ok(update) => {
                *self.reports.entry(update.report.client_id).or_insert(0) += 1;
                self.state = ClientState::ReportReady;
                Ok(update)
            }
            Err(err) => self.fail(err),
        }
    }

    fn run_training(&mut self) -> Result<ClientUpdate, ClientError> {
        let config = self.config.clone();
        let first_report = self
            .client_id()
            .map_or(true, |id| self.reports_sent(id) == 0);
        let session = self.session_mut("train")?;
        let client_id = session.client_id;
        let trainset = session.trainset.as_ref().ok_or(ClientError::InvalidState {
            operation: "train",
            state: ClientState::Training,
        })?;

        let start = Instant::now();
        info!("client {} started training", client_id);
        let metrics = session.trainer.train(trainset, session.round_seed)?;
        let weights = session.algorithm.extract_weights(&session.trainer)?;

        let accuracy = match &session.testset {
            Some(testset) => {
                let accuracy = session.trainer.test(testset)?;
                info!("client {} test accuracy: {:.2}%", client_id, 100. * accuracy);
                accuracy
            }
            None => 0.,
        };
        let training_time = start.elapsed().as_secs_f64();

        if let Some(dir) = &config.model_dir {
            let name = format!("{}_client_{}", config.model_name, client_id);
            let path = session.trainer.save_model(&name, dir)?;
            debug!("client {} saved its model to {}", client_id, path.display());
        }

        let encrypt_mask = match (config.encrypt_ratio, &session.exposed) {
            (Some(ratio), _) if config.random_mask => {
                let mut rng = SeededRng::new(session.round_seed, u64::from(client_id.get()));
                Some(privacy::random_mask(weights.num_parameters(), ratio, &mut rng))
            }
            (Some(ratio), Some(exposed)) => {
                let gradients = session
                    .trainer
                    .gradients()
                    .ok_or(TrainerError::NoModel)?;
                Some(
                    privacy::propose_mask(exposed, &weights, gradients, ratio)
                        .map_err(ClientError::Mask)?,
                )
            }
            _ => None,
        };

        let report = Report {
            client_id,
            num_samples: trainset.len(),
            accuracy,
            training_time,
            data_loading_time: if first_report {
                session.data_loading_time
            } else {
                0.
            },
            metrics,
        };
        Ok(ClientUpdate {
            report,
            weights,
            encrypt_mask,
        })
    }

    /// Ends the round once the update has been handed over.
    pub fn finish_round(&mut self) -> Result<(), ClientError> {
        self.expect_state("finish the round", &[ClientState::ReportReady])?;
        self.state = ClientState::Idle;
        Ok(())
    }

    /// Abandons the current round, keeping the loaded data.
    pub fn abort_round(&mut self) {
        self.state = ClientState::Idle;
    }
}
