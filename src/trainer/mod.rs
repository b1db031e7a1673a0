//! Local training.
//!
//! A [`Trainer`] owns a model and knows how to optimize it on a [`DataPartition`]. The
//! protocol itself never looks into the model: weights are moved in and out of a trainer by
//! an [`Algorithm`](crate::algorithm::Algorithm).

mod centroid;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use thiserror::Error;

pub use self::centroid::{CentroidTrainer, CENTROIDS};
use crate::{
    data::DataPartition,
    model::{ShapeError, Tensor, Weights},
    storage::StorageError,
};

/// Named scalar results of a training run, e.g. `loss`.
pub type TrainingMetrics = BTreeMap<String, f64>;

#[derive(Error, Debug)]
/// Errors that can occur while training or evaluating a model.
pub enum TrainerError {
    #[error("the trainer holds no model")]
    NoModel,
    #[error("cannot train on an empty partition")]
    EmptyPartition,
    #[error("example has {found} features, expected {expected}")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("label {0} is unknown to the model")]
    UnknownLabel(u32),
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("saving the model failed: {0}")]
    Save(StorageError),
}

/// A local model together with its optimization routine.
pub trait Trainer: Send {
    /// The model the trainer optimizes.
    type Model;

    fn model(&self) -> Option<&Self::Model>;

    fn model_mut(&mut self) -> Option<&mut Self::Model>;

    /// Trains the model on `partition`. All randomness of the run derives from `seed`.
    fn train(&mut self, partition: &DataPartition, seed: u64)
        -> Result<TrainingMetrics, TrainerError>;

    /// Evaluates the model on `partition` and returns its accuracy in `[0, 1]`.
    fn test(&self, partition: &DataPartition) -> Result<f64, TrainerError>;

    /// A zero tensor of the given shape.
    fn zeros(&self, shape: &[usize]) -> Tensor {
        Tensor::zeros(shape)
    }

    /// Saves the model as `name` in `dir` and returns the written path.
    fn save_model(&self, name: &str, dir: &Path) -> Result<PathBuf, TrainerError>;

    /// The averaged gradients of the latest training run, shaped like the model weights.
    fn gradients(&self) -> Option<&Weights>;
}
