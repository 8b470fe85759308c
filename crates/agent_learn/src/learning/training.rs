//! Training driver - one full run from configuration to dev-set metrics

use agent_model::{DeviceTopology, ModelArgs, Task};
use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{self, ProgramArgs};
use crate::data::loading;
use crate::data::{DatasetSplit, GameDataset, InstructionExample, Vocabulary};
use crate::evaluation::action_generator_metrics;
use crate::evaluation::plan_metrics::{self, PlanMetrics};
use crate::experiment;
use crate::model_wrappers::{get_model_wrapper, AgentModel};
use crate::notify::SlackNotifier;

/// Metrics of the post-training evaluation, by task.
#[derive(Clone, Debug, PartialEq)]
pub enum DevEvaluation {
    Plan(PlanMetrics),
    Execution(BTreeMap<String, f64>),
}

/// Result of [`run_training`].
pub struct TrainingOutcome {
    pub best_checkpoint: PathBuf,
    pub vocabulary: Vocabulary,
    pub model: AgentModel,
    pub evaluation: DevEvaluation,
}

/// Sends messages under the experiment's name when Slack logging is on.
pub struct Notifier {
    slack: Option<SlackNotifier>,
    username: String,
}

impl Notifier {
    pub fn new(slack: Option<SlackNotifier>, username: &str) -> Self {
        Self {
            slack,
            username: username.to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, "")
    }

    pub fn notify(&self, message: &str) -> Result<()> {
        match &self.slack {
            Some(slack) => slack.send_message(&self.username, message),
            None => Ok(()),
        }
    }
}

/// Directory the vocabulary of a pretrained plan predictor lives in: the
/// parent directory of its checkpoint.
pub fn pretrained_vocabulary_directory(model_args: &ModelArgs) -> Option<PathBuf> {
    model_args
        .get_decoder_args()
        .pretrained_plan_predictor_filepath()
        .map(|path| match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        })
}

/// Loads the pretrained plan predictor's vocabulary when one is configured,
/// otherwise derives the vocabulary from the dataset and saves it to
/// `save_directory`.
pub fn resolve_vocabulary(
    model_args: &ModelArgs,
    dataset: &GameDataset,
    save_directory: &Path,
) -> Result<Vocabulary> {
    match pretrained_vocabulary_directory(model_args) {
        Some(directory) => {
            info!("Loading vocabulary from {:?}", directory);
            loading::load_vocabulary(&directory)
        }
        None => dataset.save_vocabulary(save_directory),
    }
}

/// Runs the task's evaluation on `examples`.
pub fn evaluate_on_dev(
    model: &AgentModel,
    args: &ProgramArgs,
    examples: &[&InstructionExample],
) -> Result<DevEvaluation> {
    match (model.get_task(), model) {
        (Task::PlanPredictor, AgentModel::PlanPredictor(m)) => {
            info!("Running on dev after training for plan prediction...");
            Ok(DevEvaluation::Plan(plan_metrics::plan_metric_results(
                m,
                args.get_evaluation_args(),
                examples,
            )?))
        }
        (Task::ActionGenerator, AgentModel::ActionGenerator(m)) => {
            info!("Running on dev after training for action prediction...");
            Ok(DevEvaluation::Execution(
                action_generator_metrics::execution_accuracies(
                    m,
                    args.get_game_args(),
                    args.get_evaluation_args(),
                    examples,
                )?,
            ))
        }
        (task, _) => anyhow::bail!("Model does not implement its configured task {}", task),
    }
}

/// Prints and logs the metrics, notifying each one.
pub fn report_evaluation(evaluation: &DevEvaluation, notifier: &Notifier) -> Result<()> {
    match evaluation {
        DevEvaluation::Plan(metrics) => {
            println!("{}", metrics);
            info!("{}", metrics);
            notifier.notify(&format!(
                "Final goal-prediction accuracy: {:.2}%",
                100. * metrics.goal_accuracy
            ))?;
        }
        DevEvaluation::Execution(results) => {
            for (metric_name, result) in results {
                let message = format!("{} after training: {:.2}", metric_name, result);
                notifier.notify(&message)?;
                println!("{}", message);
                info!("{}", message);
            }
        }
    }
    Ok(())
}

/// Trains on every device found on this machine.
pub fn train(args: &ProgramArgs) -> Result<()> {
    run_training(args, &DeviceTopology::detect()?)?;
    Ok(())
}

/// One full training run on `topology`.
pub fn run_training(args: &ProgramArgs, topology: &DeviceTopology) -> Result<TrainingOutcome> {
    args.validate()?;
    let training_arguments = args.get_training_args();
    let save_directory = training_arguments.get_save_directory();

    let experiment = experiment::open_experiment(training_arguments)?;
    let notifier = Notifier::new(
        SlackNotifier::from_training_args(training_arguments)?,
        training_arguments.get_experiment_name(),
    );
    notifier.notify("Starting!")?;

    config::save_args(args, &save_directory)?;

    let train_games = loading::load_data(DatasetSplit::Train, args.get_data_args(), args.get_game_args())?;
    let dev_games = loading::load_data(DatasetSplit::Dev, args.get_data_args(), args.get_game_args())?;
    // The splits on disk are final; no re-splitting.
    let dataset = GameDataset::new(
        train_games,
        dev_games,
        &HashSet::new(),
        args.get_data_args(),
        false,
    )?;
    info!("Loaded {} games", dataset.len());

    dataset.save_validation_split(&save_directory)?;

    let model_args = args.get_model_args();
    let vocabulary = resolve_vocabulary(model_args, &dataset, &save_directory)?;
    info!("Vocabulary contains {} word types", vocabulary.len());

    let mut model = get_model_wrapper(
        model_args,
        args.get_game_args(),
        &vocabulary,
        topology,
        Some(experiment.clone()),
        model_args.get_decoder_args().end_to_end(),
    )?;
    info!("Created model:\n{}", model);

    let best_checkpoint = model.train_loop(
        &dataset,
        args.get_game_args(),
        args.get_evaluation_args(),
        training_arguments,
        experiment.as_ref(),
    )?;
    model.load(&best_checkpoint)?;
    notifier.notify(&format!(
        "Model finished training! Best epoch filename: {}",
        best_checkpoint.display()
    ))?;

    let dev = dataset.get_examples(DatasetSplit::Dev);
    let dev: Vec<&InstructionExample> = dev.values().collect();
    let evaluation = evaluate_on_dev(&model, args, &dev)?;
    report_evaluation(&evaluation, &notifier)?;

    Ok(TrainingOutcome {
        best_checkpoint,
        vocabulary,
        model,
        evaluation,
    })
}
