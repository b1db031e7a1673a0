use std::{collections::BTreeMap, sync::Arc};

use rand::{
    distributions::{Distribution, WeightedIndex},
    seq::{index, SliceRandom},
};

use crate::{
    data::{DataPartition, Datasource, Example, Label},
    divider::{BiasConfig, DividerConfigError, PartitionError},
    rng::SeededRng,
};

/// Draws partitions skewed towards a preferred label.
pub struct BiasedDivider {
    datasource: Arc<dyn Datasource>,
    config: BiasConfig,
    total_clients: u32,
    labels: Vec<Label>,
    /// Indices into the training set, grouped by label.
    groups: BTreeMap<Label, Vec<usize>>,
}

impl BiasedDivider {
    pub fn new(
        datasource: Arc<dyn Datasource>,
        config: BiasConfig,
        total_clients: u32,
    ) -> Result<Self, DividerConfigError> {
        let mut groups: BTreeMap<Label, Vec<usize>> = BTreeMap::new();
        for (i, example) in datasource.trainset().iter().enumerate() {
            groups.entry(example.label).or_default().push(i);
        }
        if groups.is_empty() {
            return Err(DividerConfigError::NoLabels);
        }
        let labels = groups.keys().copied().collect();
        Ok(Self {
            datasource,
            config,
            total_clients,
            labels,
            groups,
        })
    }

    pub fn partition_size(&self) -> usize {
        self.config.partition_size
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Picks a preferred label, weighted by a freshly generated label distribution over all
    /// clients.
    pub fn preferred_label(&self, rng: &mut SeededRng) -> Label {
        let mut dist = self.config.label_distribution.generate(
            self.total_clients as usize,
            self.labels.len(),
            rng,
        );
        dist.shuffle(rng);
        match WeightedIndex::new(&dist) {
            Ok(weighted) => self.labels[weighted.sample(rng)],
            // all weights are zero if there are no clients to distribute
            Err(_) => *self.labels.choose(rng).unwrap_or(&self.labels[0]),
        }
    }

    /// Extracts `size` examples of which the configured primary fraction has label `pref`
    /// and the rest is spread evenly over the other labels.
    pub fn get_partition(
        &self,
        size: usize,
        pref: Label,
        rng: &mut SeededRng,
    ) -> Result<DataPartition, PartitionError> {
        if !self.groups.contains_key(&pref) {
            return Err(PartitionError::UnknownLabel(pref));
        }
        let others: Vec<Label> = self.labels.iter().copied().filter(|l| *l != pref).collect();
        let primary = if others.is_empty() {
            size
        } else {
            ((size as f64 * self.config.primary).round() as usize).min(size)
        };
        let secondary = size - primary;

        let mut partition = self.extract(pref, primary, rng)?;
        if !others.is_empty() {
            let per_label = secondary / others.len();
            let remainder = secondary % others.len();
            for (i, label) in others.iter().enumerate() {
                let count = per_label + usize::from(i < remainder);
                partition.extend(self.extract(*label, count, rng)?);
            }
        }
        partition.shuffle(rng);
        Ok(partition.into())
    }

    fn extract(
        &self,
        label: Label,
        count: usize,
        rng: &mut SeededRng,
    ) -> Result<Vec<Example>, PartitionError> {
        let group = self.groups.get(&label).map(Vec::as_slice).unwrap_or(&[]);
        if count > group.len() {
            return Err(PartitionError::InsufficientExamples {
                label: Some(label),
                requested: count,
                available: group.len(),
            });
        }
        let trainset = self.datasource.trainset();
        Ok(index::sample(rng, group.len(), count)
            .into_iter()
            .map(|i| trainset[group[i]].clone())
            .collect())
    }
}
