//! Program configuration
//!
//! One JSON document with a section per concern. Every field has a default,
//! so a partial file is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub use agent_model::{ModelArgs, Task};

/// Name of the resolved configuration written into every save directory.
pub const ARGS_FILENAME: &str = "args.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DataArgs {
    /// Directory holding `train.json` and `dev.json`.
    pub data_directory: PathBuf,
    /// Words seen fewer times than this in training instructions map to `<unk>`.
    pub minimum_word_occurrence: usize,
    /// Share of training games held out when re-splitting randomly.
    pub validation_proportion: f64,
    pub split_seed: u64,
}

impl Default for DataArgs {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            minimum_word_occurrence: 1,
            validation_proportion: 0.05,
            split_seed: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GameArgs {
    pub board_width: usize,
    pub board_height: usize,
}

impl Default for GameArgs {
    fn default() -> Self {
        Self {
            board_width: 10,
            board_height: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrainingArgs {
    pub experiment_name: String,
    /// Parent of the per-experiment save directory.
    pub save_directory: PathBuf,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Epochs without a better validation score before stopping. At least 1.
    pub patience: usize,
    /// Newest checkpoints kept on disk besides the best one.
    pub keep_checkpoints: usize,
    pub seed: u64,
    pub log_with_slack: bool,
    pub slack_webhook_url: Option<String>,
    pub slack_channel: String,
    /// Hostname of a crayon server. Scalars go to a local log when unset.
    pub experiment_server: Option<String>,
    pub experiment_port: u16,
}

impl Default for TrainingArgs {
    fn default() -> Self {
        Self {
            experiment_name: "default".to_string(),
            save_directory: PathBuf::from("experiments"),
            num_epochs: 20,
            batch_size: 16,
            learning_rate: 1e-3,
            patience: 5,
            keep_checkpoints: 3,
            seed: 42,
            log_with_slack: false,
            slack_webhook_url: None,
            slack_channel: String::new(),
            experiment_server: None,
            experiment_port: 8889,
        }
    }
}

impl TrainingArgs {
    pub fn get_experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn get_save_directory(&self) -> PathBuf {
        self.save_directory.join(&self.experiment_name)
    }

    pub fn log_with_slack(&self) -> bool {
        self.log_with_slack
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EvaluationArgs {
    /// Greedy decoding stops after this many actions even without `Stop`.
    pub maximum_generation_length: usize,
    pub batch_size: usize,
}

impl Default for EvaluationArgs {
    fn default() -> Self {
        Self {
            maximum_generation_length: 25,
            batch_size: 32,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ProgramArgs {
    pub data: DataArgs,
    pub game: GameArgs,
    pub model: ModelArgs,
    pub training: TrainingArgs,
    pub evaluation: EvaluationArgs,
}

impl ProgramArgs {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
        let args: ProgramArgs = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(args)
    }

    pub fn get_data_args(&self) -> &DataArgs {
        &self.data
    }

    pub fn get_game_args(&self) -> &GameArgs {
        &self.game
    }

    pub fn get_model_args(&self) -> &ModelArgs {
        &self.model
    }

    pub fn get_training_args(&self) -> &TrainingArgs {
        &self.training
    }

    pub fn get_evaluation_args(&self) -> &EvaluationArgs {
        &self.evaluation
    }

    pub fn validate(&self) -> Result<()> {
        if self.game.board_width == 0 || self.game.board_height == 0 {
            anyhow::bail!("Board dimensions must be positive");
        }
        if !(0.0..1.0).contains(&self.data.validation_proportion) {
            anyhow::bail!(
                "validation_proportion must lie in [0, 1), got {}",
                self.data.validation_proportion
            );
        }
        if self.training.batch_size == 0 || self.evaluation.batch_size == 0 {
            anyhow::bail!("Batch sizes must be positive");
        }
        if self.training.patience == 0 {
            anyhow::bail!("patience must be at least 1 epoch");
        }
        if self.training.experiment_name.is_empty() {
            anyhow::bail!("experiment_name must not be empty");
        }
        if self.training.log_with_slack && self.training.slack_webhook_url.is_none() {
            anyhow::bail!("log_with_slack requires slack_webhook_url");
        }
        self.model.validate()
    }
}

/// Writes the resolved configuration to `<directory>/args.json`.
pub fn save_args<P: AsRef<Path>>(args: &ProgramArgs, directory: P) -> Result<PathBuf> {
    let directory = directory.as_ref();
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create save directory {:?}", directory))?;
    let path = directory.join(ARGS_FILENAME);
    let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, args)?;
    tracing::info!("Saved arguments to {:?}", path);
    Ok(path)
}

pub fn load_args<P: AsRef<Path>>(directory: P) -> Result<ProgramArgs> {
    ProgramArgs::from_file(directory.as_ref().join(ARGS_FILENAME))
}
