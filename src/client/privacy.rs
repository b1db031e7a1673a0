//! Encryption mask proposals.
//!
//! A client proposes the parameter indices that should be encrypted before its weights leave
//! the device. Indices refer to the flattened weights, i.e. [`Weights::flatten()`].

use std::cmp::Ordering;

use rand::seq::index;

use crate::{
    model::{ShapeError, Weights},
    rng::SeededRng,
};

/// The number of indices proposed for `len` parameters.
pub fn mask_len(len: usize, ratio: f64) -> usize {
    ((ratio * len as f64).floor() as usize).min(len)
}

/// Ranks the parameters by `(exposed - latest) * gradient` and proposes the highest ranked
/// `ratio` of them, in descending order.
///
/// `exposed` are the weights an observer already knows, `latest` the freshly trained ones.
pub fn propose_mask(
    exposed: &Weights,
    latest: &Weights,
    gradients: &Weights,
    ratio: f64,
) -> Result<Vec<usize>, ShapeError> {
    latest.check_layout(exposed)?;
    latest.check_layout(gradients)?;

    let product: Vec<f32> = exposed
        .flatten()
        .into_iter()
        .zip(latest.flatten())
        .zip(gradients.flatten())
        .map(|((e, l), g)| (e - l) * g)
        .collect();

    let mut indices: Vec<usize> = (0..product.len()).collect();
    indices.sort_by(|a, b| {
        product[*b]
            .partial_cmp(&product[*a])
            .unwrap_or(Ordering::Equal)
    });
    indices.truncate(mask_len(product.len(), ratio));
    Ok(indices)
}

/// Proposes a uniformly random `ratio` of the `len` parameters.
pub fn random_mask(len: usize, ratio: f64, rng: &mut SeededRng) -> Vec<usize> {
    index::sample(rng, len, mask_len(len, ratio)).into_vec()
}
