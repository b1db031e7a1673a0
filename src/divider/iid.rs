use std::sync::Arc;

use rand::seq::index;

use crate::{
    data::{DataPartition, Datasource},
    divider::PartitionError,
    rng::SeededRng,
};

/// Draws uniformly random partitions from the whole training set.
pub struct IidDivider {
    datasource: Arc<dyn Datasource>,
    partition_size: usize,
}

impl IidDivider {
    pub fn new(datasource: Arc<dyn Datasource>, partition_size: usize) -> Self {
        Self {
            datasource,
            partition_size,
        }
    }

    /// The configured partition size.
    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    /// Samples `size` distinct training examples.
    pub fn get_partition(
        &self,
        size: usize,
        rng: &mut SeededRng,
    ) -> Result<DataPartition, PartitionError> {
        let trainset = self.datasource.trainset();
        if size > trainset.len() {
            return Err(PartitionError::InsufficientExamples {
                label: None,
                requested: size,
                available: trainset.len(),
            });
        }
        Ok(index::sample(rng, trainset.len(), size)
            .into_iter()
            .map(|i| trainset[i].clone())
            .collect())
    }
}
