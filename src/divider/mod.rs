//! Data division strategies.
//!
//! A divider hands every client its private [`DataPartition`] of the global [`Datasource`].
//! The available strategies are listed in [`DividerKind`]; which one is used, and with which
//! parameters, is decided by the `[data]` settings and checked by
//! [`DividerConfig::from_settings()`] and [`DividerConfig::validate_capacity()`] before any
//! training starts.
//!
//! All random draws of a divider come from the generator passed in by the caller. Clients
//! pass their own stream of the configured seed (see [`SeededRng::for_client()`]) so that a
//! client's partition only depends on the seed and its id.

mod biased;
mod iid;
mod mixed;
mod sharded;

use std::{collections::BTreeSet, sync::Arc};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use self::{biased::BiasedDivider, iid::IidDivider, mixed::MixedDivider, sharded::ShardedDivider};
use crate::{
    common::ClientId,
    data::{dists::LabelDistribution, DataPartition, Datasource, Label},
    rng::SeededRng,
    settings::{ClientSettings, DataSettings},
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The available division strategies.
pub enum DividerKind {
    #[display(fmt = "iid")]
    Iid,
    #[display(fmt = "biased")]
    Biased,
    #[display(fmt = "sharded")]
    Sharded,
    #[display(fmt = "mixed")]
    Mixed,
}

#[derive(Error, Debug, Clone, PartialEq)]
/// A divider configuration that cannot work.
pub enum DividerConfigError {
    #[error("the {divider} divider requires `data.{field}` to be set")]
    MissingField {
        divider: DividerKind,
        field: &'static str,
    },
    #[error(
        "partition size {partition_size} for {per_round} clients per round exceeds the {available} training examples"
    )]
    PoolCapacity {
        partition_size: usize,
        per_round: u32,
        available: usize,
    },
    #[error("client {0} is listed as both iid and non-iid")]
    OverlappingClients(ClientId),
    #[error("cannot cut {available} training examples into {shards} shards")]
    TooManyShards { shards: usize, available: usize },
    #[error("the datasource has no labeled training examples")]
    NoLabels,
}

#[derive(Error, Debug, Clone, PartialEq)]
/// A partition request the divider cannot satisfy.
pub enum PartitionError {
    #[error("requested {requested} examples of {label:?} but only {available} are available")]
    InsufficientExamples {
        label: Option<Label>,
        requested: usize,
        available: usize,
    },
    #[error("client {0} is not covered by the divider")]
    UnknownClient(ClientId),
    #[error("preferred label {0} does not exist")]
    UnknownLabel(Label),
}

#[derive(Debug, Clone, PartialEq)]
/// The parameters of a biased division.
pub struct BiasConfig {
    pub partition_size: usize,
    pub label_distribution: LabelDistribution,
    /// The fraction of the partition drawn from the preferred label.
    pub primary: f64,
}

#[derive(Debug, Clone, PartialEq)]
/// A fully specified divider configuration.
pub enum DividerConfig {
    Iid {
        partition_size: usize,
    },
    Biased(BiasConfig),
    Sharded {
        shards_per_client: usize,
    },
    Mixed {
        bias: BiasConfig,
        iid_clients: BTreeSet<ClientId>,
        non_iid_clients: BTreeSet<ClientId>,
    },
}

impl DividerConfig {
    /// Builds the configuration of the selected divider, checking that every field the
    /// divider needs is present.
    pub fn from_settings(data: &DataSettings) -> Result<Self, DividerConfigError> {
        let kind = data.divider;
        let partition_size = || {
            data.partition_size.ok_or(DividerConfigError::MissingField {
                divider: kind,
                field: "partition_size",
            })
        };
        let bias = || -> Result<BiasConfig, DividerConfigError> {
            Ok(BiasConfig {
                partition_size: partition_size()?,
                label_distribution: data.label_distribution.ok_or(
                    DividerConfigError::MissingField {
                        divider: kind,
                        field: "label_distribution",
                    },
                )?,
                primary: data.bias_primary,
            })
        };

        let config = match kind {
            DividerKind::Iid => DividerConfig::Iid {
                partition_size: partition_size()?,
            },
            DividerKind::Biased => DividerConfig::Biased(bias()?),
            DividerKind::Sharded => DividerConfig::Sharded {
                shards_per_client: data.shards_per_client,
            },
            DividerKind::Mixed => {
                let iid_clients =
                    data.iid_clients
                        .clone()
                        .ok_or(DividerConfigError::MissingField {
                            divider: kind,
                            field: "iid_clients",
                        })?;
                let non_iid_clients =
                    data.non_iid_clients
                        .clone()
                        .ok_or(DividerConfigError::MissingField {
                            divider: kind,
                            field: "non_iid_clients",
                        })?;
                if let Some(id) = iid_clients.intersection(&non_iid_clients).next() {
                    return Err(DividerConfigError::OverlappingClients(*id));
                }
                DividerConfig::Mixed {
                    bias: bias()?,
                    iid_clients,
                    non_iid_clients,
                }
            }
        };
        Ok(config)
    }

    pub fn kind(&self) -> DividerKind {
        match self {
            DividerConfig::Iid { .. } => DividerKind::Iid,
            DividerConfig::Biased(_) => DividerKind::Biased,
            DividerConfig::Sharded { .. } => DividerKind::Sharded,
            DividerConfig::Mixed { .. } => DividerKind::Mixed,
        }
    }

    /// Checks that the IID partitions of one round fit into the training set, i.e.
    /// `partition_size * per_round <= num_train_examples`.
    pub fn validate_capacity(
        &self,
        num_train_examples: usize,
        clients: &ClientSettings,
    ) -> Result<(), DividerConfigError> {
        let partition_size = match self {
            DividerConfig::Iid { partition_size } => *partition_size,
            DividerConfig::Mixed { bias, .. } => bias.partition_size,
            _ => return Ok(()),
        };
        let needed = partition_size.checked_mul(clients.per_round as usize);
        match needed {
            Some(needed) if needed <= num_train_examples => Ok(()),
            _ => Err(DividerConfigError::PoolCapacity {
                partition_size,
                per_round: clients.per_round,
                available: num_train_examples,
            }),
        }
    }
}

/// A divider of one of the available kinds.
pub enum Divider {
    Iid(IidDivider),
    Biased(BiasedDivider),
    Sharded(ShardedDivider),
    Mixed(MixedDivider),
}

impl Divider {
    /// Sets up the divider described by `config` on top of `datasource`.
    pub fn new(
        config: &DividerConfig,
        datasource: Arc<dyn Datasource>,
        total_clients: u32,
        seed: u64,
    ) -> Result<Self, DividerConfigError> {
        debug!("setting up the {} divider", config.kind());
        let divider = match config {
            DividerConfig::Iid { partition_size } => {
                Divider::Iid(IidDivider::new(datasource, *partition_size))
            }
            DividerConfig::Biased(bias) => {
                Divider::Biased(BiasedDivider::new(datasource, bias.clone(), total_clients)?)
            }
            DividerConfig::Sharded { shards_per_client } => Divider::Sharded(ShardedDivider::new(
                datasource,
                total_clients,
                *shards_per_client,
                seed,
            )?),
            DividerConfig::Mixed {
                bias,
                iid_clients,
                non_iid_clients,
            } => Divider::Mixed(MixedDivider::new(
                datasource,
                bias.clone(),
                total_clients,
                iid_clients.clone(),
                non_iid_clients.clone(),
            )?),
        };
        Ok(divider)
    }

    pub fn kind(&self) -> DividerKind {
        match self {
            Divider::Iid(_) => DividerKind::Iid,
            Divider::Biased(_) => DividerKind::Biased,
            Divider::Sharded(_) => DividerKind::Sharded,
            Divider::Mixed(_) => DividerKind::Mixed,
        }
    }

    /// Extracts the partition of a client.
    ///
    /// Chooses the selector arguments each strategy needs (a size, a preferred label or the
    /// client id) and draws all randomness from `rng`.
    pub fn partition_for(
        &self,
        client_id: ClientId,
        rng: &mut SeededRng,
    ) -> Result<DataPartition, PartitionError> {
        match self {
            Divider::Iid(divider) => divider.get_partition(divider.partition_size(), rng),
            Divider::Biased(divider) => {
                let pref = divider.preferred_label(rng);
                debug!("client {} prefers label {}", client_id, pref);
                divider.get_partition(divider.partition_size(), pref, rng)
            }
            Divider::Sharded(divider) => divider.get_partition(client_id),
            Divider::Mixed(divider) => divider.get_partition(client_id, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::tests::labeled_source,
        settings::tests::{client_settings, data_settings},
    };

    #[test]
    fn test_iid_capacity() {
        let config = DividerConfig::Iid { partition_size: 50 };
        let clients = ClientSettings {
            total_clients: 10,
            per_round: 5,
            ..client_settings()
        };
        assert!(config.validate_capacity(1000, &clients).is_ok());
        // only the clients of one round need disjoint partitions
        assert!(config.validate_capacity(400, &clients).is_ok());
        assert!(config.validate_capacity(250, &clients).is_ok());
        assert_eq!(
            config.validate_capacity(249, &clients),
            Err(DividerConfigError::PoolCapacity {
                partition_size: 50,
                per_round: 5,
                available: 249
            })
        );
    }

    #[test]
    fn test_missing_fields() {
        let data = DataSettings {
            divider: DividerKind::Iid,
            partition_size: None,
            ..data_settings()
        };
        assert_eq!(
            DividerConfig::from_settings(&data),
            Err(DividerConfigError::MissingField {
                divider: DividerKind::Iid,
                field: "partition_size"
            })
        );

        let data = DataSettings {
            divider: DividerKind::Biased,
            label_distribution: None,
            ..data_settings()
        };
        assert!(matches!(
            DividerConfig::from_settings(&data),
            Err(DividerConfigError::MissingField {
                field: "label_distribution",
                ..
            })
        ));

        let data = DataSettings {
            divider: DividerKind::Mixed,
            iid_clients: Some((1..=2).map(ClientId::from).collect()),
            non_iid_clients: None,
            ..data_settings()
        };
        assert!(matches!(
            DividerConfig::from_settings(&data),
            Err(DividerConfigError::MissingField {
                field: "non_iid_clients",
                ..
            })
        ));
    }

    #[test]
    fn test_mixed_overlap() {
        let data = DataSettings {
            divider: DividerKind::Mixed,
            iid_clients: Some((1..=3).map(ClientId::from).collect()),
            non_iid_clients: Some((3..=5).map(ClientId::from).collect()),
            ..data_settings()
        };
        assert_eq!(
            DividerConfig::from_settings(&data),
            Err(DividerConfigError::OverlappingClients(ClientId::from(3)))
        );
    }

    #[test]
    fn test_iid_partitions_of_a_round_fit_the_pool() {
        let source: Arc<dyn Datasource> = Arc::new(labeled_source(10, 100));
        let config = DividerConfig::Iid { partition_size: 50 };
        let clients = ClientSettings {
            total_clients: 10,
            per_round: 5,
            ..client_settings()
        };
        config
            .validate_capacity(source.num_train_examples(), &clients)
            .unwrap();

        let divider = Divider::new(&config, source.clone(), 10, 1).unwrap();
        let total: usize = ClientId::range(5)
            .map(|id| {
                let mut rng = SeededRng::for_client(1, id);
                divider.partition_for(id, &mut rng).unwrap().len()
            })
            .sum();
        assert!(total <= source.num_train_examples());
        assert_eq!(total, 250);
    }

    #[test]
    fn test_partition_is_reproducible_per_client() {
        let source: Arc<dyn Datasource> = Arc::new(labeled_source(4, 50));
        let config = DividerConfig::Biased(BiasConfig {
            partition_size: 20,
            label_distribution: LabelDistribution::Uniform,
            primary: 0.8,
        });
        let divider = Divider::new(&config, source, 8, 3).unwrap();
        let id = ClientId::from(4);
        let first = divider
            .partition_for(id, &mut SeededRng::for_client(3, id))
            .unwrap();
        let second = divider
            .partition_for(id, &mut SeededRng::for_client(3, id))
            .unwrap();
        assert_eq!(first, second);
    }
}
