//! Weight representation and arithmetic.
//!
//! A [`Weights`] payload maps parameter names to shaped [`Tensor`]s. It is the only model
//! representation the protocol knows about; model families convert to and from it through
//! an [`Algorithm`].
//!
//! [`Algorithm`]: crate::algorithm::Algorithm

use std::{
    collections::{btree_map, BTreeMap},
    convert::TryFrom,
};

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors related to combining weights of incompatible layouts.
pub enum ShapeError {
    #[error("parameter {0} is missing")]
    MissingKey(String),
    #[error("unexpected parameter {0}")]
    UnexpectedKey(String),
    #[error("parameter {name} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("tensor data of length {len} does not fit shape {shape:?}")]
    InvalidData { shape: Vec<usize>, len: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
/// A dense `f32` tensor in row-major order.
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

#[derive(Deserialize)]
/// A decoded tensor whose data length is not checked yet.
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = ShapeError;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Tensor::new(raw.shape, raw.data)
    }
}

impl Tensor {
    /// Creates a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ShapeError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShapeError::InvalidData {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a tensor of the given shape filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![0.; shape.iter().product()],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Adds `factor * other` to this tensor element-wise.
    ///
    /// The caller guarantees that both shapes are equal.
    fn add_scaled(&mut self, other: &Tensor, factor: f32) {
        for (x, y) in self.data.iter_mut().zip(other.data.iter()) {
            *x += factor * y;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, From, Into, Serialize, Deserialize)]
/// The weights payload exchanged between server and clients.
pub struct Weights(BTreeMap<String, Tensor>);

impl Weights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a named tensor, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.0.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.0.get_mut(name)
    }

    pub fn iter(&self) -> btree_map::Iter<String, Tensor> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns weights with the same layout as `self` and all values set to zero.
    pub fn zeros_like(&self) -> Self {
        self.0
            .iter()
            .map(|(name, tensor)| (name.clone(), Tensor::zeros(tensor.shape())))
            .collect::<BTreeMap<_, _>>()
            .into()
    }

    /// Total number of scalar parameters.
    pub fn num_parameters(&self) -> usize {
        self.0.values().map(Tensor::len).sum()
    }

    /// Concatenates all parameters in key order.
    pub fn flatten(&self) -> Vec<f32> {
        self.0
            .values()
            .flat_map(|tensor| tensor.data().iter().copied())
            .collect()
    }

    /// Checks that `other` has exactly the keys and shapes of `self`.
    pub fn check_layout(&self, other: &Weights) -> Result<(), ShapeError> {
        for (name, tensor) in self.0.iter() {
            match other.0.get(name) {
                None => return Err(ShapeError::MissingKey(name.clone())),
                Some(found) if found.shape() != tensor.shape() => {
                    return Err(ShapeError::ShapeMismatch {
                        name: name.clone(),
                        expected: tensor.shape().to_vec(),
                        found: found.shape().to_vec(),
                    })
                }
                Some(_) => {}
            }
        }
        if let Some(name) = other.0.keys().find(|name| !self.0.contains_key(*name)) {
            return Err(ShapeError::UnexpectedKey(name.clone()));
        }
        Ok(())
    }

    /// Computes `self - base` for every parameter.
    pub fn delta(&self, base: &Weights) -> Result<Weights, ShapeError> {
        base.check_layout(self)?;
        let mut delta = self.clone();
        delta.add_scaled(base, -1.)?;
        Ok(delta)
    }

    /// Adds `factor * other` to every parameter.
    pub fn add_scaled(&mut self, other: &Weights, factor: f32) -> Result<(), ShapeError> {
        self.check_layout(other)?;
        for (name, tensor) in self.0.iter_mut() {
            // checked above
            if let Some(other) = other.0.get(name) {
                tensor.add_scaled(other, factor);
            }
        }
        Ok(())
    }
}

impl std::iter::FromIterator<(String, Tensor)> for Weights {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Weights(iter.into_iter().collect())
    }
}

impl IntoIterator for Weights {
    type Item = (String, Tensor);
    type IntoIter = btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn weights(values: &[(&str, Vec<f32>)]) -> Weights {
        values
            .iter()
            .map(|(name, data)| {
                (
                    name.to_string(),
                    Tensor::new(vec![data.len()], data.clone()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_tensor_new_checks_shape() {
        assert!(Tensor::new(vec![2, 3], vec![0.; 6]).is_ok());
        assert_eq!(
            Tensor::new(vec![2, 3], vec![0.; 5]).unwrap_err(),
            ShapeError::InvalidData {
                shape: vec![2, 3],
                len: 5
            }
        );
    }

    #[test]
    fn test_decoding_checks_shape() {
        let tensor: Tensor = serde_json::from_str(r#"{"shape":[2],"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(tensor.len(), 2);

        let err = serde_json::from_str::<Tensor>(r#"{"shape":[2],"data":[1.0]}"#).unwrap_err();
        assert!(err.to_string().contains("does not fit shape"));
    }

    #[test]
    fn test_delta_and_add_scaled() {
        let base = weights(&[("a", vec![1., 2.]), ("b", vec![3.])]);
        let trained = weights(&[("a", vec![2., 0.]), ("b", vec![4.])]);

        let delta = trained.delta(&base).unwrap();
        assert_eq!(delta, weights(&[("a", vec![1., -2.]), ("b", vec![1.])]));

        let mut restored = base.clone();
        restored.add_scaled(&delta, 1.).unwrap();
        assert_eq!(restored, trained);
    }

    #[test]
    fn test_check_layout() {
        let base = weights(&[("a", vec![1., 2.])]);
        assert_eq!(
            base.check_layout(&Weights::new()),
            Err(ShapeError::MissingKey("a".into()))
        );
        assert_eq!(
            base.check_layout(&weights(&[("a", vec![1., 2.]), ("z", vec![0.])])),
            Err(ShapeError::UnexpectedKey("z".into()))
        );
        assert!(matches!(
            base.check_layout(&weights(&[("a", vec![1.])])),
            Err(ShapeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_zeros_like_and_flatten() {
        let base = weights(&[("b", vec![3.]), ("a", vec![1., 2.])]);
        assert_eq!(base.flatten(), vec![1., 2., 3.]);
        assert_eq!(base.zeros_like().flatten(), vec![0., 0., 0.]);
        assert_eq!(base.num_parameters(), 3);
    }
}
