//! Moving weights between a trainer and the protocol.

use thiserror::Error;

use crate::{
    model::{ShapeError, Weights},
    trainer::Trainer,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlgorithmError {
    #[error("the trainer holds no model")]
    NoModel,
    #[error("weights do not fit the model: {0}")]
    Shape(#[from] ShapeError),
}

/// Extracts weights from and loads weights into the model of a trainer.
pub trait Algorithm<T: Trainer>: Send {
    /// Returns a copy of the current model weights.
    ///
    /// # Errors
    /// Fails if the trainer holds no model.
    fn extract_weights(&self, trainer: &T) -> Result<Weights, AlgorithmError>;

    /// Overwrites the model state with `weights`.
    ///
    /// # Errors
    /// Fails if the trainer holds no model or if the names or shapes of `weights` don't match
    /// the model. The model is left untouched in that case.
    fn load_weights(&self, trainer: &mut T, weights: &Weights) -> Result<(), AlgorithmError>;
}

#[derive(Debug, Default, Clone, Copy)]
/// The algorithm for trainers whose model already is a set of named tensors.
pub struct FlatWeights;

impl<T> Algorithm<T> for FlatWeights
where
    T: Trainer<Model = Weights>,
{
    fn extract_weights(&self, trainer: &T) -> Result<Weights, AlgorithmError> {
        trainer.model().cloned().ok_or(AlgorithmError::NoModel)
    }

    fn load_weights(&self, trainer: &mut T, weights: &Weights) -> Result<(), AlgorithmError> {
        let model = trainer.model_mut().ok_or(AlgorithmError::NoModel)?;
        model.check_layout(weights)?;
        *model = weights.clone();
        Ok(())
    }
}
