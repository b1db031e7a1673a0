//! Datasets, partitions and the datasource contract.

pub mod dists;
mod synthetic;

use std::collections::BTreeSet;

use derive_more::{AsRef, Deref, From, Into};
use serde::{Deserialize, Serialize};

pub use self::synthetic::SyntheticDatasource;

/// A class label.
pub type Label = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single `(sample, label)` pair.
pub struct Example {
    pub sample: Vec<f32>,
    pub label: Label,
}

#[derive(Debug, Clone, Default, PartialEq, AsRef, Deref, From, Into, Serialize, Deserialize)]
/// An ordered sequence of examples assigned to a client.
pub struct DataPartition(Vec<Example>);

impl DataPartition {
    /// Returns the distinct labels present in this partition.
    pub fn labels(&self) -> BTreeSet<Label> {
        self.0.iter().map(|example| example.label).collect()
    }

    /// Counts the examples of every label in `0..num_labels`.
    pub fn label_counts(&self, num_labels: usize) -> Vec<usize> {
        let mut counts = vec![0; num_labels];
        for example in self.0.iter() {
            if let Some(count) = counts.get_mut(example.label as usize) {
                *count += 1;
            }
        }
        counts
    }
}

impl std::iter::FromIterator<Example> for DataPartition {
    fn from_iter<I: IntoIterator<Item = Example>>(iter: I) -> Self {
        DataPartition(iter.into_iter().collect())
    }
}

/// The global dataset the dividers draw partitions from.
///
/// A datasource is shared read-only by all clients once it has been set up.
pub trait Datasource: Send + Sync {
    /// All training examples.
    fn trainset(&self) -> &[Example];

    /// All test examples.
    fn testset(&self) -> &[Example];

    fn num_train_examples(&self) -> usize {
        self.trainset().len()
    }

    /// The sorted distinct labels of the training set.
    fn labels(&self) -> Vec<Label> {
        self.trainset()
            .iter()
            .map(|example| example.label)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn get_test_set(&self) -> DataPartition {
        self.testset().to_vec().into()
    }
}

#[derive(Debug, Clone, Default)]
/// A datasource backed by in-memory vectors.
pub struct InMemoryDatasource {
    trainset: Vec<Example>,
    testset: Vec<Example>,
}

impl InMemoryDatasource {
    pub fn new(trainset: Vec<Example>, testset: Vec<Example>) -> Self {
        Self { trainset, testset }
    }
}

impl Datasource for InMemoryDatasource {
    fn trainset(&self) -> &[Example] {
        &self.trainset
    }

    fn testset(&self) -> &[Example] {
        &self.testset
    }
}
