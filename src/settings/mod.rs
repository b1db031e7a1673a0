//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables. An
//! example configuration file can be found in the `configs/` directory located in the
//! repository root.

use std::{collections::BTreeSet, fmt, path::Path, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    aggregator::Weighting,
    common::ClientId,
    data::dists::LabelDistribution,
    divider::{DividerConfig, DividerConfigError, DividerKind},
};

#[cfg(test)]
pub(crate) mod tests;

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("invalid divider configuration: {0}")]
    Divider(#[from] DividerConfigError),
}

#[derive(Debug, Validate, Deserialize)]
#[validate(schema(function = "validate_settings"))]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub data: DataSettings,
    #[serde(default)]
    #[validate]
    pub datasource: DatasourceSettings,
    #[validate]
    pub clients: ClientSettings,
    #[validate]
    pub server: ServerSettings,
    #[validate]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub trainer: TrainerSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed, including
    /// an unknown divider kind or fields missing for the selected divider.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        DividerConfig::from_settings(&settings.data)?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        config.merge(config::File::from(path.as_ref()))?;
        config.merge(Environment::with_prefix("fedsim").separator("__"))?;
        config.try_into()
    }

    /// Checks that the mixed divider only names existing clients.
    fn validate_client_sets(&self) -> Result<(), ValidationError> {
        let total = self.clients.total_clients;
        let in_range = |ids: &Option<BTreeSet<ClientId>>| {
            ids.iter()
                .flatten()
                .all(|id| 1 <= id.get() && id.get() <= total)
        };
        if in_range(&self.data.iid_clients) && in_range(&self.data.non_iid_clients) {
            Ok(())
        } else {
            Err(ValidationError::new("mixed divider client id out of range"))
        }
    }
}

fn validate_settings(s: &Settings) -> Result<(), ValidationError> {
    s.validate_client_sets()
}

fn default_bias_primary() -> f64 {
    0.8
}

fn default_shards_per_client() -> usize {
    2
}

#[derive(Debug, Clone, Validate, Deserialize)]
#[validate(schema(function = "validate_data"))]
/// Data division settings.
pub struct DataSettings {
    /// The division strategy: `iid`, `biased`, `sharded` or `mixed`. Any other value is
    /// rejected when the settings are loaded.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [data]
    /// divider = "iid"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSIM_DATA__DIVIDER=iid
    /// ```
    pub divider: DividerKind,

    /// The number of examples per client. Required by the `iid`, `biased` and `mixed`
    /// dividers.
    #[serde(default)]
    pub partition_size: Option<usize>,

    /// The distribution used to pick preferred labels: `uniform` or `normal`. Required by the
    /// `biased` and `mixed` dividers.
    #[serde(default)]
    pub label_distribution: Option<LabelDistribution>,

    /// The fraction of a biased partition drawn from the preferred label (`0 <= x <= 1`).
    #[serde(default = "default_bias_primary")]
    pub bias_primary: f64,

    /// The number of label-sorted shards every client receives from the `sharded` divider.
    #[serde(default = "default_shards_per_client")]
    pub shards_per_client: usize,

    /// The clients drawing IID partitions under the `mixed` divider.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [data]
    /// divider = "mixed"
    /// iid_clients = [1, 2, 3]
    /// non_iid_clients = [4, 5]
    /// ```
    #[serde(default)]
    pub iid_clients: Option<BTreeSet<ClientId>>,

    /// The clients drawing biased partitions under the `mixed` divider.
    #[serde(default)]
    pub non_iid_clients: Option<BTreeSet<ClientId>>,

    /// Whether clients reload their partition every round they are selected.
    #[serde(default)]
    pub reload_data: bool,
}

fn validate_data(s: &DataSettings) -> Result<(), ValidationError> {
    if !(0. ..=1.).contains(&s.bias_primary) {
        return Err(ValidationError::new("bias_primary must be in [0, 1]"));
    }
    if s.shards_per_client == 0 {
        return Err(ValidationError::new("shards_per_client must be positive"));
    }
    if s.partition_size == Some(0) {
        return Err(ValidationError::new("partition_size must be positive"));
    }
    Ok(())
}

#[derive(Debug, Clone, Validate, Deserialize)]
#[validate(schema(function = "validate_datasource"))]
/// Settings of the synthetic datasource used by the simulation.
pub struct DatasourceSettings {
    pub num_train_examples: usize,
    pub num_test_examples: usize,
    pub num_labels: u32,
    pub num_features: usize,
}

impl Default for DatasourceSettings {
    fn default() -> Self {
        Self {
            num_train_examples: 6000,
            num_test_examples: 1000,
            num_labels: 10,
            num_features: 8,
        }
    }
}

fn validate_datasource(s: &DatasourceSettings) -> Result<(), ValidationError> {
    if s.num_labels == 0 || s.num_train_examples == 0 {
        Err(ValidationError::new("the datasource must not be empty"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Validate, Deserialize)]
#[validate(schema(function = "validate_clients"))]
/// Client settings.
pub struct ClientSettings {
    /// The total number of clients. Client ids are `1..=total_clients`.
    pub total_clients: u32,

    /// The number of clients selected per round (`1 <= per_round <= total_clients`).
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [clients]
    /// total_clients = 10
    /// per_round = 5
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSIM_CLIENTS__PER_ROUND=5
    /// ```
    pub per_round: u32,

    /// Whether clients evaluate their model on the test set after training.
    #[serde(default)]
    pub do_test: bool,

    /// The fraction of parameters a client proposes for encryption (`0 < x <= 1`). Leave this
    /// out to disable mask proposals.
    #[serde(default)]
    pub encrypt_ratio: Option<f64>,

    /// Whether mask proposals are drawn at random instead of ranked by sensitivity.
    #[serde(default)]
    pub random_mask: bool,

    /// The number of simulated client workers. Defaults to `per_round`.
    #[serde(default)]
    pub concurrency: Option<u32>,

    /// A directory where clients save their model after every round.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,
}

impl ClientSettings {
    /// The number of simulated client workers.
    pub fn workers(&self) -> u32 {
        self.concurrency.unwrap_or(self.per_round)
    }
}

fn validate_clients(s: &ClientSettings) -> Result<(), ValidationError> {
    if s.per_round == 0 || s.per_round > s.total_clients {
        return Err(ValidationError::new(
            "per_round must be in [1, total_clients]",
        ));
    }
    if let Some(ratio) = s.encrypt_ratio {
        if !(0. < ratio && ratio <= 1.) {
            return Err(ValidationError::new("encrypt_ratio must be in (0, 1]"));
        }
    }
    if s.concurrency == Some(0) {
        return Err(ValidationError::new("concurrency must be positive"));
    }
    Ok(())
}

fn default_percentile() -> f64 {
    100.
}

fn default_collect_timeout() -> u64 {
    60
}

fn default_max_failed_rounds() -> u32 {
    3
}

#[derive(Debug, Clone, Validate, Deserialize)]
#[validate(schema(function = "validate_server"))]
/// Server (coordinator) settings.
pub struct ServerSettings {
    /// The number of rounds after which training is finished.
    pub rounds: u32,

    /// The seed of every pseudo-random generator.
    pub random_seed: u64,

    /// How the updates of a round are weighted: `mean` (default) or `samples`.
    #[serde(default)]
    pub aggregation: Weighting,

    /// The report metric used to gate updates by percentile. Leave this out to aggregate
    /// every update.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [server]
    /// percentile_aggregate = "loss"
    /// percentile = 50
    /// percentile_increase = 10
    /// ```
    #[serde(default)]
    pub percentile_aggregate: Option<String>,

    /// The percentile (`0 <= x <= 100`) used in the first round.
    #[serde(default = "default_percentile")]
    pub percentile: f64,

    /// The amount the percentile grows every round, capped at `100`.
    #[serde(default)]
    pub percentile_increase: f64,

    /// The maximal amount of time, in seconds, the server waits for client reports.
    #[serde(default = "default_collect_timeout")]
    pub collect_timeout: u64,

    /// The number of consecutive failed rounds after which the server shuts down.
    #[serde(default = "default_max_failed_rounds")]
    pub max_failed_rounds: u32,
}

fn validate_server(s: &ServerSettings) -> Result<(), ValidationError> {
    if s.rounds == 0 {
        return Err(ValidationError::new("rounds must be positive"));
    }
    if !(0. ..=100.).contains(&s.percentile) || s.percentile_increase < 0. {
        return Err(ValidationError::new("invalid percentile schedule"));
    }
    if matches!(&s.percentile_aggregate, Some(metric) if metric.is_empty()) {
        return Err(ValidationError::new("empty percentile metric"));
    }
    if s.collect_timeout == 0 {
        return Err(ValidationError::new("collect_timeout must be positive"));
    }
    Ok(())
}

fn default_checkpoint_interval() -> u32 {
    1
}

#[derive(Debug, Clone, Validate, Deserialize)]
#[validate(schema(function = "validate_checkpoint"))]
/// Checkpoint settings.
pub struct CheckpointSettings {
    /// The directory holding the checkpoint files.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [checkpoint]
    /// path = "./checkpoints"
    /// interval = 5
    /// resume = true
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSIM_CHECKPOINT__PATH=./checkpoints
    /// ```
    pub path: PathBuf,

    /// A checkpoint is written every `interval` rounds and after the last round.
    #[serde(default = "default_checkpoint_interval")]
    pub interval: u32,

    /// Whether to resume from the latest checkpoint of the configured seed.
    #[serde(default)]
    pub resume: bool,

    /// Whether to start afresh if resuming fails.
    #[serde(default)]
    pub fallback_to_fresh: bool,
}

fn validate_checkpoint(s: &CheckpointSettings) -> Result<(), ValidationError> {
    if s.interval == 0 {
        Err(ValidationError::new("checkpoint interval must be positive"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Settings of the simulated trainer.
pub struct TrainerSettings {
    pub model_name: String,
    pub learning_rate: f32,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            model_name: "centroid".into(),
            learning_rate: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDSIM_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.2.15/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
