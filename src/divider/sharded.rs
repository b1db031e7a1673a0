use std::{ops::Range, sync::Arc};

use rand::seq::SliceRandom;

use crate::{
    common::ClientId,
    data::{DataPartition, Datasource},
    divider::{DividerConfigError, PartitionError},
    rng::{SeededRng, LAYOUT_STREAM},
};

/// Splits `total` items into `count` contiguous, balanced ranges and returns range `i`.
///
/// Range sizes differ by at most one.
fn shard_range(total: usize, i: usize, count: usize) -> Range<usize> {
    let base = total / count;
    let rem = total % count;
    let start = i * base + i.min(rem);
    let end = start + base + usize::from(i < rem);
    start..end
}

/// Assigns label-sorted shards of the training set to clients.
///
/// The assignment only depends on the seed and the client id.
pub struct ShardedDivider {
    datasource: Arc<dyn Datasource>,
    /// Training set indices sorted by label.
    sorted: Vec<usize>,
    /// `shards[i]` lists the shards of client `i + 1`.
    shards: Vec<Vec<usize>>,
    num_shards: usize,
}

impl ShardedDivider {
    pub fn new(
        datasource: Arc<dyn Datasource>,
        total_clients: u32,
        shards_per_client: usize,
        seed: u64,
    ) -> Result<Self, DividerConfigError> {
        let trainset = datasource.trainset();
        let num_shards = total_clients as usize * shards_per_client;
        if num_shards == 0 || num_shards > trainset.len() {
            return Err(DividerConfigError::TooManyShards {
                shards: num_shards,
                available: trainset.len(),
            });
        }

        let mut sorted: Vec<usize> = (0..trainset.len()).collect();
        sorted.sort_by_key(|i| trainset[*i].label);

        let mut order: Vec<usize> = (0..num_shards).collect();
        order.shuffle(&mut SeededRng::new(seed, LAYOUT_STREAM));
        let shards = order
            .chunks(shards_per_client)
            .map(<[usize]>::to_vec)
            .collect();

        Ok(Self {
            datasource,
            sorted,
            shards,
            num_shards,
        })
    }

    /// Returns the shards of the given client.
    pub fn get_partition(&self, client_id: ClientId) -> Result<DataPartition, PartitionError> {
        let shards = (client_id.get() as usize)
            .checked_sub(1)
            .and_then(|i| self.shards.get(i))
            .ok_or(PartitionError::UnknownClient(client_id))?;
        let trainset = self.datasource.trainset();
        Ok(shards
            .iter()
            .flat_map(|shard| self.sorted[shard_range(self.sorted.len(), *shard, self.num_shards)].iter())
            .map(|i| trainset[*i].clone())
            .collect())
    }
}
