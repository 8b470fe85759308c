//! Evaluation - task metrics, and re-evaluation of a finished run

pub mod action_generator_metrics;
pub mod plan_metrics;

use agent_model::DeviceTopology;
use anyhow::Result;
use std::path::Path;

use crate::cli::EvaluateCommand;
use crate::config;
use crate::data::{loading, DatasetSplit, GameDataset, InstructionExample};
use crate::learning::checkpoint;
use crate::learning::training::{self, DevEvaluation, Notifier};
use crate::model_wrappers::get_model_wrapper;

/// Rebuilds the model of the run saved in `save_directory`, loads
/// `checkpoint_path` (the run's best checkpoint by default) and evaluates it
/// on `split`.
pub fn evaluate_saved_run(
    save_directory: &Path,
    checkpoint_path: Option<&Path>,
    split: DatasetSplit,
    topology: &DeviceTopology,
) -> Result<DevEvaluation> {
    let args = config::load_args(save_directory)?;
    let model_args = args.get_model_args();

    let vocabulary_directory = training::pretrained_vocabulary_directory(model_args)
        .unwrap_or_else(|| save_directory.to_path_buf());
    let vocabulary = loading::load_vocabulary(&vocabulary_directory)?;

    let train_games = loading::load_data(DatasetSplit::Train, args.get_data_args(), args.get_game_args())?;
    let dev_games = loading::load_data(DatasetSplit::Dev, args.get_data_args(), args.get_game_args())?;
    let validation_ids = GameDataset::load_validation_split(save_directory)?;
    let dataset = GameDataset::new(
        train_games,
        dev_games,
        &validation_ids,
        args.get_data_args(),
        false,
    )?;

    let mut model = get_model_wrapper(
        model_args,
        args.get_game_args(),
        &vocabulary,
        topology,
        None,
        false,
    )?;
    let checkpoint_path = match checkpoint_path {
        Some(path) => path.to_path_buf(),
        None => checkpoint::find_best_checkpoint(save_directory)?,
    };
    tracing::info!("Evaluating {:?} on {}", checkpoint_path, split);
    model.load(&checkpoint_path)?;

    let examples = dataset.get_examples(split);
    let examples: Vec<&InstructionExample> = examples.values().collect();
    training::evaluate_on_dev(&model, &args, &examples)
}

pub fn run(command: EvaluateCommand) -> Result<()> {
    let evaluation = evaluate_saved_run(
        &command.save_directory,
        command.checkpoint.as_deref(),
        command.split,
        &DeviceTopology::detect()?,
    )?;
    training::report_evaluation(&evaluation, &Notifier::disabled())
}
