use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use crate::{
    data::{DataPartition, Example},
    model::{ShapeError, Tensor, Weights},
    storage::write_atomic,
    trainer::{Trainer, TrainerError, TrainingMetrics},
};

/// The name of the single model parameter, a `[num_labels, num_features]` tensor.
pub const CENTROIDS: &str = "centroids";

/// A nearest-centroid classifier trained by stochastic gradient descent.
///
/// Every step pulls the centroid of the example's label towards the example. The loss is the
/// mean squared distance between examples and the centroids of their labels.
#[derive(Debug, Clone)]
pub struct CentroidTrainer {
    num_labels: usize,
    num_features: usize,
    learning_rate: f32,
    model: Option<Weights>,
    gradients: Option<Weights>,
}

impl CentroidTrainer {
    pub fn new(num_labels: u32, num_features: usize, learning_rate: f32) -> Self {
        let num_labels = num_labels as usize;
        let mut model = Weights::new();
        model.insert(CENTROIDS, Tensor::zeros(&[num_labels, num_features]));
        Self {
            num_labels,
            num_features,
            learning_rate,
            model: Some(model),
            gradients: None,
        }
    }

    fn check_example(&self, example: &Example) -> Result<(), TrainerError> {
        if example.sample.len() != self.num_features {
            return Err(TrainerError::FeatureMismatch {
                expected: self.num_features,
                found: example.sample.len(),
            });
        }
        if example.label as usize >= self.num_labels {
            return Err(TrainerError::UnknownLabel(example.label));
        }
        Ok(())
    }

    fn centroids(&self) -> Result<&Tensor, TrainerError> {
        self.model
            .as_ref()
            .ok_or(TrainerError::NoModel)?
            .get(CENTROIDS)
            .ok_or_else(|| ShapeError::MissingKey(CENTROIDS.into()).into())
    }

    /// The label whose centroid is closest to `sample`.
    fn predict(&self, centroids: &Tensor, sample: &[f32]) -> usize {
        centroids
            .data()
            .chunks(self.num_features.max(1))
            .map(|centroid| squared_distance(centroid, sample))
            .enumerate()
            .fold((0, f32::INFINITY), |best, (label, dist)| {
                if dist < best.1 {
                    (label, dist)
                } else {
                    best
                }
            })
            .0
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

impl Trainer for CentroidTrainer {
    type Model = Weights;

    fn model(&self) -> Option<&Weights> {
        self.model.as_ref()
    }

    fn model_mut(&mut self) -> Option<&mut Weights> {
        self.model.as_mut()
    }

    fn train(
        &mut self,
        partition: &DataPartition,
        seed: u64,
    ) -> Result<TrainingMetrics, TrainerError> {
        if partition.is_empty() {
            return Err(TrainerError::EmptyPartition);
        }
        for example in partition.iter() {
            self.check_example(example)?;
        }

        let (num_features, learning_rate) = (self.num_features, self.learning_rate);
        let centroids = self
            .model
            .as_mut()
            .ok_or(TrainerError::NoModel)?
            .get_mut(CENTROIDS)
            .ok_or_else(|| ShapeError::MissingKey(CENTROIDS.into()))?;
        let shape = centroids.shape().to_vec();

        let mut order: Vec<usize> = (0..partition.len()).collect();
        order.shuffle(&mut ChaCha20Rng::seed_from_u64(seed));

        let mut grad = vec![0_f32; centroids.len()];
        let mut loss = 0_f64;
        for i in order {
            let example = &partition[i];
            let offset = example.label as usize * num_features;
            let row = &mut centroids.data_mut()[offset..offset + num_features];
            for ((c, x), g) in row
                .iter_mut()
                .zip(example.sample.iter())
                .zip(grad[offset..offset + num_features].iter_mut())
            {
                let diff = *c - *x;
                loss += f64::from(diff * diff);
                *g += diff;
                *c -= learning_rate * diff;
            }
        }

        let n = partition.len() as f32;
        grad.iter_mut().for_each(|g| *g /= n);
        let grad_norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
        let mut gradients = Weights::new();
        gradients.insert(CENTROIDS, Tensor::new(shape, grad)?);
        self.gradients = Some(gradients);

        let mut metrics = TrainingMetrics::new();
        metrics.insert("loss".into(), loss / f64::from(n));
        metrics.insert("grad_norm".into(), f64::from(grad_norm));
        debug!("trained on {} examples: {:?}", partition.len(), metrics);
        Ok(metrics)
    }

    fn test(&self, partition: &DataPartition) -> Result<f64, TrainerError> {
        if partition.is_empty() {
            return Err(TrainerError::EmptyPartition);
        }
        let centroids = self.centroids()?;
        let mut correct = 0_u32;
        for example in partition.iter() {
            self.check_example(example)?;
            if self.predict(centroids, &example.sample) == example.label as usize {
                correct += 1;
            }
        }
        Ok(f64::from(correct) / partition.len() as f64)
    }

    fn save_model(&self, name: &str, dir: &Path) -> Result<PathBuf, TrainerError> {
        let model = self.model.as_ref().ok_or(TrainerError::NoModel)?;
        let path = dir.join(name);
        fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))
            .map_err(TrainerError::Save)?;
        let bytes = bincode::serialize(model)
            .context("encoding the model")
            .map_err(TrainerError::Save)?;
        write_atomic(&path, &bytes).map_err(TrainerError::Save)?;
        Ok(path)
    }

    fn gradients(&self) -> Option<&Weights> {
        self.gradients.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clusters() -> DataPartition {
        (0..20)
            .map(|i| {
                let jitter = (i % 5) as f32 * 0.1;
                if i % 2 == 0 {
                    Example {
                        sample: vec![jitter, -jitter],
                        label: 0,
                    }
                } else {
                    Example {
                        sample: vec![10. + jitter, 10. - jitter],
                        label: 1,
                    }
                }
            })
            .collect()
    }

    #[test]
    fn test_training_separates_clusters() {
        let mut trainer = CentroidTrainer::new(2, 2, 0.5);
        let data = two_clusters();

        let first = trainer.train(&data, 1).unwrap();
        let second = trainer.train(&data, 2).unwrap();
        assert!(second["loss"] < first["loss"]);
        assert_eq!(trainer.test(&data).unwrap(), 1.);
    }

    #[test]
    fn test_training_is_reproducible() {
        let data = two_clusters();
        let mut a = CentroidTrainer::new(2, 2, 0.3);
        let mut b = CentroidTrainer::new(2, 2, 0.3);
        assert_eq!(a.train(&data, 7).unwrap(), b.train(&data, 7).unwrap());
        assert_eq!(a.model(), b.model());
    }

    #[test]
    fn test_gradients_match_model_layout() {
        let mut trainer = CentroidTrainer::new(3, 2, 0.1);
        assert!(trainer.gradients().is_none());
        trainer.train(&two_clusters(), 0).unwrap();
        let gradients = trainer.gradients().unwrap();
        assert!(trainer.model().unwrap().check_layout(gradients).is_ok());
        // label 2 never occurs
        assert_eq!(&gradients.get(CENTROIDS).unwrap().data()[4..], &[0., 0.]);
    }

    #[test]
    fn test_invalid_examples() {
        let mut trainer = CentroidTrainer::new(2, 3, 0.1);
        assert!(matches!(
            trainer.train(&two_clusters(), 0),
            Err(TrainerError::FeatureMismatch {
                expected: 3,
                found: 2
            })
        ));
        assert!(matches!(
            trainer.train(&DataPartition::default(), 0),
            Err(TrainerError::EmptyPartition)
        ));

        let mut trainer = CentroidTrainer::new(1, 2, 0.1);
        assert!(matches!(
            trainer.train(&two_clusters(), 0),
            Err(TrainerError::UnknownLabel(1))
        ));
    }

    #[test]
    fn test_save_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = CentroidTrainer::new(2, 2, 0.5);
        trainer.train(&two_clusters(), 3).unwrap();

        let path = trainer
            .save_model("centroid_client_4", &dir.path().join("models"))
            .unwrap();
        let saved: Weights = bincode::deserialize(&fs::read(path).unwrap()).unwrap();
        assert_eq!(Some(&saved), trainer.model());
    }
}
