//! A checkpoint storage on the local filesystem.
//!
//! Every part of a checkpoint is an independently loadable file in the checkpoint directory:
//!
//! | file                                    | content                        |
//! | --------------------------------------- | ------------------------------ |
//! | `current_round_seed_{seed}.json`        | the latest checkpointed round  |
//! | `global_weights_{round}_seed_{seed}.bin`| the global weights (bincode)   |
//! | `prng_state_{round}_seed_{seed}.json`   | the selection generator state  |
//! | `numeric_prng_state_{round}_seed_{seed}.json` | the numeric generator state |
//!
//! Files are written to a temporary sibling and renamed into place. The round pointer is
//! written last.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::task;
use tracing::debug;

use crate::{
    model::Weights,
    rng::RngState,
    storage::{Checkpoint, CheckpointStorage, StorageResult},
};

/// Writes `bytes` to `path` such that readers see either the old or the new content.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("{} is not a file path", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, bytes).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("moving {} into place", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone)]
/// Stores checkpoints as files in a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current_round_path(&self, seed: u64) -> PathBuf {
        self.dir.join(format!("current_round_seed_{}.json", seed))
    }

    fn weights_path(&self, round: u32, seed: u64) -> PathBuf {
        self.dir
            .join(format!("global_weights_{}_seed_{}.bin", round, seed))
    }

    fn prng_state_path(&self, round: u32, seed: u64) -> PathBuf {
        self.dir
            .join(format!("prng_state_{}_seed_{}.json", round, seed))
    }

    fn numeric_prng_state_path(&self, round: u32, seed: u64) -> PathBuf {
        self.dir
            .join(format!("numeric_prng_state_{}_seed_{}.json", round, seed))
    }

    fn save_blocking(&self, seed: u64, checkpoint: &Checkpoint) -> StorageResult<()> {
        let round = checkpoint.round;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;

        write_atomic(
            &self.weights_path(round, seed),
            &bincode::serialize(&checkpoint.weights)?,
        )?;
        write_atomic(
            &self.prng_state_path(round, seed),
            &serde_json::to_vec(&checkpoint.prng_state)?,
        )?;
        write_atomic(
            &self.numeric_prng_state_path(round, seed),
            &serde_json::to_vec(&checkpoint.numeric_prng_state)?,
        )?;
        // the pointer makes the checkpoint visible
        write_atomic(&self.current_round_path(seed), &serde_json::to_vec(&round)?)
    }

    fn latest_blocking(&self, seed: u64) -> StorageResult<Option<Checkpoint>> {
        let pointer = self.current_round_path(seed);
        if !pointer.exists() {
            debug!("no checkpoint pointer at {}", pointer.display());
            return Ok(None);
        }
        let round: u32 = read_json(&pointer)?;

        let weights_path = self.weights_path(round, seed);
        let bytes =
            fs::read(&weights_path).with_context(|| format!("reading {}", weights_path.display()))?;
        let weights: Weights = bincode::deserialize(&bytes)
            .with_context(|| format!("decoding {}", weights_path.display()))?;
        let prng_state: RngState = read_json(&self.prng_state_path(round, seed))?;
        let numeric_prng_state: RngState = read_json(&self.numeric_prng_state_path(round, seed))?;

        Ok(Some(Checkpoint {
            round,
            weights,
            prng_state,
            numeric_prng_state,
        }))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("decoding {}", path.display()))
}

#[async_trait]
impl CheckpointStorage for FileStorage {
    async fn save(&mut self, seed: u64, checkpoint: &Checkpoint) -> StorageResult<()> {
        let storage = self.clone();
        let checkpoint = checkpoint.clone();
        task::spawn_blocking(move || storage.save_blocking(seed, &checkpoint)).await?
    }

    async fn latest(&mut self, seed: u64) -> StorageResult<Option<Checkpoint>> {
        let storage = self.clone();
        task::spawn_blocking(move || storage.latest_blocking(seed)).await?
    }
}
