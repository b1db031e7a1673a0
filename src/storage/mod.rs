//! Checkpoint storage.
//!
//! A [`Checkpoint`] holds everything needed to continue a run exactly where it stopped: the
//! number of the last completed round, the global weights after that round and the states of
//! both coordinator generators. Checkpoints are keyed by the seed of the run, so runs with
//! different seeds can share a directory.

mod file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::file::{write_atomic, FileStorage};
use crate::{model::Weights, rng::RngState};

/// The error type for storage operations that are not directly related to application domain.
/// These include, for example IO errors like file not found, corrupted files, etc.
pub type StorageError = anyhow::Error;

/// The result of the storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A snapshot of the coordinator after a completed round.
pub struct Checkpoint {
    pub round: u32,
    pub weights: Weights,
    pub prng_state: RngState,
    pub numeric_prng_state: RngState,
}

#[derive(Error, Debug)]
/// Errors that can occur while resuming from a checkpoint.
pub enum ResumeError {
    #[error("no checkpoint exists for seed {0}")]
    NotFound(u64),
    #[error("loading the checkpoint failed: {0}")]
    Unreadable(StorageError),
    #[error("the checkpoint of round {round} is beyond the last round {rounds}")]
    Finished { round: u32, rounds: u32 },
}

#[async_trait]
/// An abstract checkpoint storage.
pub trait CheckpointStorage
where
    Self: Send + Sync + 'static,
{
    /// Persists a checkpoint of the run with the given seed.
    ///
    /// # Behavior
    ///
    /// - A checkpoint becomes visible to [`latest()`] only once all of its parts are written.
    /// - An older checkpoint of the same seed stays loadable until the new one is complete.
    ///
    /// [`latest()`]: CheckpointStorage::latest
    async fn save(&mut self, seed: u64, checkpoint: &Checkpoint) -> StorageResult<()>;

    /// Returns the latest checkpoint of the run with the given seed.
    ///
    /// # Behavior
    ///
    /// - If no checkpoint has been written yet, return `StorageResult::Ok(Option::None)`.
    /// - If a checkpoint exists but cannot be read, return an error.
    async fn latest(&mut self, seed: u64) -> StorageResult<Option<Checkpoint>>;
}

#[derive(Debug, Clone, Copy, Default)]
/// A storage that forgets every checkpoint.
pub struct NoopStorage;

#[async_trait]
impl CheckpointStorage for NoopStorage {
    async fn save(&mut self, _seed: u64, _checkpoint: &Checkpoint) -> StorageResult<()> {
        Ok(())
    }

    async fn latest(&mut self, _seed: u64) -> StorageResult<Option<Checkpoint>> {
        Ok(None)
    }
}
