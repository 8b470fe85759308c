//! Checkpoint Management - per-epoch checkpoints and their training state

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const TRAINING_STATE_FILENAME: &str = "training_state.json";
pub const BEST_STATE_FILENAME: &str = "best_state.json";

/// Training state for serialization
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct TrainingState {
    pub epoch: usize,
    pub train_loss: f32,
    pub validation_loss: f32,
    /// Higher is better.
    pub validation_score: f64,
    pub date: String,
    /// Checkpoint file name, relative to the save directory.
    pub checkpoint: String,
}

impl TrainingState {
    pub fn new(
        epoch: usize,
        train_loss: f32,
        validation_loss: f32,
        validation_score: f64,
    ) -> Self {
        Self {
            epoch,
            train_loss,
            validation_loss,
            validation_score,
            date: chrono::Local::now().to_rfc3339(),
            checkpoint: checkpoint_filename(epoch),
        }
    }
}

pub fn checkpoint_filename(epoch: usize) -> String {
    format!("model_{}.safetensors", epoch)
}

/// Runs `save` while holding an exclusive lock on `<path>.lock`.
pub fn save_securely<F>(path: &Path, save: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let lock_path = PathBuf::from(format!("{}.lock", path.display()));
    let lock_file = File::create(&lock_path)
        .with_context(|| format!("Failed to create lock {:?}", lock_path))?;
    lock_file.lock_exclusive()?;
    let result = save(path);
    lock_file.unlock()?;
    result
}

fn write_state(path: &Path, state: &TrainingState) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, state)?;
    Ok(())
}

fn read_state(path: &Path) -> Result<TrainingState> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {:?}", path))
}

/// Save training state alongside the checkpoint file, and as the latest state.
pub fn save_training_state(directory: &Path, state: &TrainingState) -> Result<()> {
    write_state(&directory.join(format!("model_{}.json", state.epoch)), state)?;
    write_state(&directory.join(TRAINING_STATE_FILENAME), state)
}

pub fn save_best_state(directory: &Path, state: &TrainingState) -> Result<()> {
    write_state(&directory.join(BEST_STATE_FILENAME), state)
}

pub fn load_training_state(directory: &Path) -> Result<TrainingState> {
    read_state(&directory.join(TRAINING_STATE_FILENAME))
}

pub fn load_best_state(directory: &Path) -> Result<TrainingState> {
    read_state(&directory.join(BEST_STATE_FILENAME))
}

/// Path of the best checkpoint recorded in `directory`.
pub fn find_best_checkpoint(directory: &Path) -> Result<PathBuf> {
    let state = load_best_state(directory)?;
    let path = directory.join(&state.checkpoint);
    if !path.exists() {
        anyhow::bail!("Best checkpoint {:?} is missing", path);
    }
    Ok(path)
}

/// Deletes a checkpoint and its state record.
pub fn remove_checkpoint(directory: &Path, epoch: usize) -> Result<()> {
    for name in [checkpoint_filename(epoch), format!("model_{}.json", epoch)] {
        let path = directory.join(&name);
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
        }
        let lock = directory.join(format!("{}.lock", name));
        if lock.exists() {
            std::fs::remove_file(&lock)?;
        }
    }
    tracing::debug!("Removed checkpoint of epoch {}", epoch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_checkpoint_lookup() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let state = TrainingState::new(3, 0.5, 0.6, 0.75);
        save_training_state(dir.path(), &state)?;
        save_best_state(dir.path(), &state)?;

        assert_eq!(load_training_state(dir.path())?, state);
        assert!(find_best_checkpoint(dir.path()).is_err());

        let path = dir.path().join(checkpoint_filename(3));
        save_securely(&path, |p| Ok(std::fs::write(p, b"weights")?))?;
        assert_eq!(find_best_checkpoint(dir.path())?, path);

        remove_checkpoint(dir.path(), 3)?;
        assert!(!path.exists());
        assert!(!dir.path().join("model_3.json").exists());
        Ok(())
    }
}
