//! Seedable pseudo-random generators with serializable state.
//!
//! All randomness in the framework flows through explicitly owned [`SeededRng`] handles. Every
//! handle is a ChaCha20 stream of the configured seed, so independent consumers (the server's
//! client selection, each client's data division, ...) never share a generator, and the exact
//! position of a generator can be checkpointed and restored.

use rand::{Error, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::common::ClientId;

/// Stream of the server's general purpose generator (client selection).
pub const SELECTION_STREAM: u64 = 0;
/// Stream of the server's numeric generator (round seeds).
pub const NUMERIC_STREAM: u64 = u64::MAX;
/// Stream used for seed-only decisions such as the shard layout.
pub const LAYOUT_STREAM: u64 = u64::MAX - 1;

/// Each round of a client's data stream spans `2^40` words.
const ROUND_WORDS_BITS: u32 = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The complete state of a [`SeededRng`].
pub struct RngState {
    pub seed: [u8; 32],
    pub stream: u64,
    pub word_pos: u128,
}

#[derive(Debug, Clone, PartialEq)]
/// A seedable generator handle.
pub struct SeededRng(ChaCha20Rng);

impl SeededRng {
    /// Creates the generator for the given seed and stream.
    pub fn new(seed: u64, stream: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        Self(rng)
    }

    /// Creates the data generator of a client.
    pub fn for_client(seed: u64, client_id: ClientId) -> Self {
        Self::new(seed, u64::from(client_id.get()))
    }

    /// Creates the data generator of a client for one round.
    ///
    /// The round selects a position far into the client's stream, so the draws of a round
    /// depend on nothing but the seed, the id and the round.
    pub fn for_client_round(seed: u64, client_id: ClientId, round: u32) -> Self {
        let mut rng = Self::for_client(seed, client_id);
        rng.0.set_word_pos(u128::from(round) << ROUND_WORDS_BITS);
        rng
    }

    /// Captures the current state.
    pub fn state(&self) -> RngState {
        RngState {
            seed: self.0.get_seed(),
            stream: self.0.get_stream(),
            word_pos: self.0.get_word_pos(),
        }
    }

    /// Recreates a generator at the exact position captured by [`SeededRng::state()`].
    pub fn from_state(state: &RngState) -> Self {
        let mut rng = ChaCha20Rng::from_seed(state.seed);
        rng.set_stream(state.stream);
        rng.set_word_pos(state.word_pos);
        Self(rng)
    }
}

impl RngCore for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.0.try_fill_bytes(dest)
    }
}
