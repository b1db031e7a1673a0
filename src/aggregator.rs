//! Aggregation of client updates into a new global model.
//!
//! Clients send their fully trained weights. The aggregator turns them into deltas against the
//! current global weights, weighs the deltas and adds their weighted sum to the global
//! weights. Every update must have exactly the layout of the global model.

use std::{cmp::Ordering, collections::BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    common::{ClientId, ClientUpdate},
    model::{ShapeError, Weights},
    settings::ServerSettings,
};

#[derive(Error, Debug, Clone, PartialEq)]
/// Errors that can occur while aggregating a round.
pub enum AggregationError {
    #[error("no updates to aggregate")]
    NoUpdates,
    #[error("the update of client {client_id} does not match the global model: {source}")]
    Shape {
        client_id: ClientId,
        #[source]
        source: ShapeError,
    },
    #[error("client {client_id} did not report the metric {metric}")]
    MissingMetric { client_id: ClientId, metric: String },
    #[error("the aggregated updates were trained on zero samples")]
    NoSamples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// How the included updates are weighted against each other.
pub enum Weighting {
    /// Every update gets the same weight.
    Mean,
    /// Updates are weighted by the number of samples they were trained on.
    Samples,
}

impl Default for Weighting {
    fn default() -> Self {
        Weighting::Mean
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Only includes updates whose metric is at or below a round-dependent percentile.
pub struct PercentileGate {
    /// The report metric the gate looks at.
    pub metric: String,
    /// The percentile of the first round.
    pub percentile: f64,
    /// The growth of the percentile per round.
    pub increase: f64,
}

impl PercentileGate {
    /// The percentile applied in the given (1-based) round, capped at `100`.
    pub fn effective_percentile(&self, round: u32) -> f64 {
        let grown = self.percentile + self.increase * f64::from(round.saturating_sub(1));
        grown.min(100.)
    }
}

/// Computes the `p`-th percentile of `values` with linear interpolation between the closest
/// ranks.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let rank = p.max(0.).min(100.) / 100. * (sorted.len() - 1) as f64;
    let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

#[derive(Debug, Clone, PartialEq)]
/// The result of aggregating a round.
pub struct Aggregate {
    /// The new global weights.
    pub weights: Weights,
    /// The clients whose updates contributed.
    pub included: Vec<ClientId>,
    /// The metric threshold of the percentile gate, if any.
    pub threshold: Option<f64>,
}

/// A strategy combining the updates of a round.
pub trait Aggregator: Send {
    /// Aggregates `updates` into new global weights.
    ///
    /// # Errors
    /// Fails if there are no updates or if any update doesn't fit the global model.
    fn aggregate(
        &self,
        round: u32,
        global: &Weights,
        updates: &[ClientUpdate],
    ) -> Result<Aggregate, AggregationError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Federated averaging with an optional percentile gate.
pub struct FederatedAveraging {
    pub weighting: Weighting,
    pub gate: Option<PercentileGate>,
}

impl FederatedAveraging {
    pub fn new(weighting: Weighting, gate: Option<PercentileGate>) -> Self {
        Self { weighting, gate }
    }

    pub fn from_settings(settings: &ServerSettings) -> Self {
        let gate = settings
            .percentile_aggregate
            .as_ref()
            .map(|metric| PercentileGate {
                metric: metric.clone(),
                percentile: settings.percentile,
                increase: settings.percentile_increase,
            });
        Self::new(settings.aggregation, gate)
    }

    /// Decides which updates pass the percentile gate.
    fn gate(
        &self,
        round: u32,
        updates: &[ClientUpdate],
    ) -> Result<(Vec<bool>, Option<f64>), AggregationError> {
        let gate = match &self.gate {
            Some(gate) => gate,
            None => return Ok((vec![true; updates.len()], None)),
        };
        let metrics = updates
            .iter()
            .map(|update| {
                update
                    .report
                    .metric(&gate.metric)
                    .ok_or_else(|| AggregationError::MissingMetric {
                        client_id: update.report.client_id,
                        metric: gate.metric.clone(),
                    })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let effective = gate.effective_percentile(round);
        let threshold = percentile(&metrics, effective).ok_or(AggregationError::NoUpdates)?;
        info!(
            "aggregating {} at or below the {}th percentile ({})",
            gate.metric, effective, threshold
        );
        Ok((
            metrics.iter().map(|metric| *metric <= threshold).collect(),
            Some(threshold),
        ))
    }

    /// Computes the weight of every update. Excluded updates get weight `0`.
    fn weights(
        &self,
        updates: &[ClientUpdate],
        included: &[bool],
    ) -> Result<Vec<f32>, AggregationError> {
        let passing = included.iter().filter(|i| **i).count();
        if passing == 0 {
            return Err(AggregationError::NoUpdates);
        }
        match self.weighting {
            Weighting::Mean => Ok(included
                .iter()
                .map(|i| if *i { 1. / passing as f32 } else { 0. })
                .collect()),
            Weighting::Samples => {
                let total: usize = updates
                    .iter()
                    .zip(included)
                    .filter(|(_, i)| **i)
                    .map(|(update, _)| update.report.num_samples)
                    .sum();
                if total == 0 {
                    return Err(AggregationError::NoSamples);
                }
                Ok(updates
                    .iter()
                    .zip(included)
                    .map(|(update, i)| {
                        if *i {
                            update.report.num_samples as f32 / total as f32
                        } else {
                            0.
                        }
                    })
                    .collect())
            }
        }
    }

    /// Aggregates the weight deltas of all received updates.
    pub fn federated_averaging(
        &self,
        round: u32,
        global: &Weights,
        updates: &[ClientUpdate],
    ) -> Result<Aggregate, AggregationError> {
        if updates.is_empty() {
            return Err(AggregationError::NoUpdates);
        }

        let deltas = updates
            .iter()
            .map(|update| {
                update
                    .weights
                    .delta(global)
                    .map_err(|source| AggregationError::Shape {
                        client_id: update.report.client_id,
                        source,
                    })
            })
            .collect::<Result<Vec<Weights>, _>>()?;

        let (included, threshold) = self.gate(round, updates)?;
        let factors = self.weights(updates, &included)?;

        let mut avg_update = global.zeros_like();
        for ((delta, factor), update) in deltas.iter().zip(factors).zip(updates) {
            if factor == 0. {
                debug!("skipping the update of client {}", update.report.client_id);
                continue;
            }
            avg_update
                .add_scaled(delta, factor)
                .map_err(|source| AggregationError::Shape {
                    client_id: update.report.client_id,
                    source,
                })?;
        }

        let mut weights = global.clone();
        // safe: the average has the layout of the global weights by construction
        weights
            .add_scaled(&avg_update, 1.)
            .map_err(|source| AggregationError::Shape {
                client_id: updates[0].report.client_id,
                source,
            })?;

        Ok(Aggregate {
            weights,
            included: updates
                .iter()
                .zip(included)
                .filter(|(_, i)| *i)
                .map(|(update, _)| update.report.client_id)
                .collect(),
            threshold,
        })
    }
}

impl Aggregator for FederatedAveraging {
    fn aggregate(
        &self,
        round: u32,
        global: &Weights,
        updates: &[ClientUpdate],
    ) -> Result<Aggregate, AggregationError> {
        self.federated_averaging(round, global, updates)
    }
}

/// Merges the encryption mask proposals of a round into a single mask.
///
/// The proposals are interleaved rank by rank, so the highest ranked indices of every client
/// come first, and repeated indices are dropped. The mask is as long as the longest proposal.
pub fn consolidate_masks<'a, I>(proposals: I) -> Vec<usize>
where
    I: IntoIterator<Item = &'a [usize]>,
{
    let proposals: Vec<&[usize]> = proposals.into_iter().collect();
    let len = proposals.iter().map(|proposal| proposal.len()).max().unwrap_or(0);

    let mut seen = BTreeSet::new();
    let mut mask = Vec::with_capacity(len);
    for rank in 0..len {
        for index in proposals.iter().filter_map(|proposal| proposal.get(rank)) {
            if mask.len() < len && seen.insert(*index) {
                mask.push(*index);
            }
        }
    }
    mask
}
