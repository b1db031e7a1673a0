use rand::Rng;

use crate::{
    data::{Datasource, Example, Label},
    rng::{SeededRng, LAYOUT_STREAM},
};

#[derive(Debug, Clone)]
/// A generated classification dataset.
///
/// Every label owns a random center in feature space and its samples are scattered
/// uniformly around it. Labels are assigned round-robin so all labels are equally frequent.
pub struct SyntheticDatasource {
    trainset: Vec<Example>,
    testset: Vec<Example>,
}

impl SyntheticDatasource {
    pub fn generate(
        num_train: usize,
        num_test: usize,
        num_labels: u32,
        num_features: usize,
        seed: u64,
    ) -> Self {
        let mut rng = SeededRng::new(seed, LAYOUT_STREAM);
        let centers: Vec<Vec<f32>> = (0..num_labels)
            .map(|_| (0..num_features).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();

        let mut draw = |count: usize| -> Vec<Example> {
            (0..count)
                .map(|i| {
                    let label = (i as u32) % num_labels.max(1);
                    let sample = centers
                        .get(label as usize)
                        .map(|center| {
                            center
                                .iter()
                                .map(|c| c + rng.gen_range(-0.25..0.25))
                                .collect()
                        })
                        .unwrap_or_default();
                    Example {
                        sample,
                        label: label as Label,
                    }
                })
                .collect()
        };

        let trainset = draw(num_train);
        let testset = draw(num_test);
        Self { trainset, testset }
    }
}

impl Datasource for SyntheticDatasource {
    fn trainset(&self) -> &[Example] {
        &self.trainset
    }

    fn testset(&self) -> &[Example] {
        &self.testset
    }
}
