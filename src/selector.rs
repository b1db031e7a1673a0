//! Client selection.

use rand::seq::SliceRandom;

use crate::{common::ClientId, rng::SeededRng};

/// A policy choosing the clients that take part in a round.
///
/// Implementations may only draw randomness from the generator they are handed, so that a
/// resumed run selects the same clients as an uninterrupted one.
pub trait Selector: Send {
    /// Selects `count` distinct clients out of `pool`.
    fn select(&self, pool: &[ClientId], count: usize, rng: &mut SeededRng) -> Vec<ClientId>;
}

/// Selects clients uniformly at random without replacement.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelector;

impl Selector for RandomSelector {
    fn select(&self, pool: &[ClientId], count: usize, rng: &mut SeededRng) -> Vec<ClientId> {
        pool.choose_multiple(rng, count).copied().collect()
    }
}

/// Chooses `count` clients out of `pool` with the given policy.
pub fn choose_clients<S: Selector + ?Sized>(
    selector: &S,
    pool: &[ClientId],
    count: usize,
    rng: &mut SeededRng,
) -> Vec<ClientId> {
    let mut selected = selector.select(pool, count, rng);
    selected.sort();
    selected
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::rng::SELECTION_STREAM;

    #[test]
    fn test_selection_is_unique_and_complete() {
        let pool: Vec<_> = ClientId::range(10).collect();
        let mut rng = SeededRng::new(1, SELECTION_STREAM);
        let selected = choose_clients(&RandomSelector, &pool, 5, &mut rng);
        assert_eq!(selected.len(), 5);
        assert_eq!(selected.iter().collect::<BTreeSet<_>>().len(), 5);
        assert!(selected.iter().all(|id| pool.contains(id)));

        // asking for more than the pool holds returns the whole pool
        let all = choose_clients(&RandomSelector, &pool, 20, &mut rng);
        assert_eq!(all, pool);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let pool: Vec<_> = ClientId::range(50).collect();
        let rounds = |seed| {
            let mut rng = SeededRng::new(seed, SELECTION_STREAM);
            (0..4)
                .map(|_| choose_clients(&RandomSelector, &pool, 5, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(rounds(3), rounds(3));
        assert_ne!(rounds(3), rounds(4));
    }
}
