use std::collections::BTreeMap;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::model::Weights;

#[derive(
    Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Copy, Clone, Display, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
/// A client identifier.
///
/// Ids are 1-based and stable across rounds: the same id always refers to the same data
/// partition.
pub struct ClientId(u32);

impl ClientId {
    /// Returns the numeric value of this id.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Returns the ids `1..=total`.
    pub fn range(total: u32) -> impl Iterator<Item = ClientId> {
        (1..=total).map(ClientId)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The report a client sends along with its weights at the end of a round.
pub struct Report {
    /// The client that produced this report.
    pub client_id: ClientId,
    /// The number of samples the client trained on.
    pub num_samples: usize,
    /// The test accuracy, `0` if local testing is disabled.
    pub accuracy: f64,
    /// Wall clock training time in seconds.
    pub training_time: f64,
    /// Data loading time in seconds. Only non-zero the first time a client reports.
    pub data_loading_time: f64,
    /// Additional trainer metrics such as `loss` or `grad_norm`.
    pub metrics: BTreeMap<String, f64>,
}

impl Report {
    /// Returns the value of the named metric, if the trainer produced it.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Everything a client hands back to the server for one round.
pub struct ClientUpdate {
    pub report: Report,
    /// The locally trained weights (full weights, not deltas).
    pub weights: Weights,
    /// Indices of the parameters proposed for encryption, if the client computes a mask.
    pub encrypt_mask: Option<Vec<usize>>,
}
