use agent_model::{DeviceTopology, ModelArgs, Task};
use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ActionGeneratorModelWrapper, ModelWrapper, PlanPredictorModelWrapper};
use crate::config::{EvaluationArgs, GameArgs, TrainingArgs};
use crate::data::{GameDataset, Vocabulary};
use crate::experiment::ExperimentLog;

/// A model wrapper of either task.
pub enum AgentModel {
    PlanPredictor(PlanPredictorModelWrapper),
    ActionGenerator(ActionGeneratorModelWrapper),
}

impl AgentModel {
    pub fn get_task(&self) -> Task {
        match self {
            AgentModel::PlanPredictor(m) => m.get_task(),
            AgentModel::ActionGenerator(m) => m.get_task(),
        }
    }

    pub fn is_parallelized(&self) -> bool {
        match self {
            AgentModel::PlanPredictor(m) => m.is_parallelized(),
            AgentModel::ActionGenerator(m) => m.is_parallelized(),
        }
    }

    pub fn train_loop(
        &mut self,
        dataset: &GameDataset,
        game_arguments: &GameArgs,
        evaluation_arguments: &EvaluationArgs,
        training_arguments: &TrainingArgs,
        experiment: &dyn ExperimentLog,
    ) -> Result<PathBuf> {
        match self {
            AgentModel::PlanPredictor(m) => m.train_loop(
                dataset,
                game_arguments,
                evaluation_arguments,
                training_arguments,
                experiment,
            ),
            AgentModel::ActionGenerator(m) => m.train_loop(
                dataset,
                game_arguments,
                evaluation_arguments,
                training_arguments,
                experiment,
            ),
        }
    }

    pub fn save(&self, filename: &Path) -> Result<()> {
        match self {
            AgentModel::PlanPredictor(m) => m.save(filename),
            AgentModel::ActionGenerator(m) => m.save(filename),
        }
    }

    pub fn load(&mut self, filename: &Path) -> Result<()> {
        match self {
            AgentModel::PlanPredictor(m) => m.load(filename),
            AgentModel::ActionGenerator(m) => m.load(filename),
        }
    }
}

impl fmt::Display for AgentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentModel::PlanPredictor(m) => write!(f, "{}", m),
            AgentModel::ActionGenerator(m) => write!(f, "{}", m),
        }
    }
}

/// Builds the wrapper for the configured task on the primary device of
/// `topology`.
pub fn get_model_wrapper(
    model_args: &ModelArgs,
    game_args: &GameArgs,
    vocabulary: &Vocabulary,
    topology: &DeviceTopology,
    logger: Option<Arc<dyn ExperimentLog>>,
    load_pretrained: bool,
) -> Result<AgentModel> {
    model_args.validate()?;
    Ok(match model_args.get_task() {
        Task::PlanPredictor => AgentModel::PlanPredictor(PlanPredictorModelWrapper::new(
            model_args, game_args, vocabulary, topology, logger,
        )?),
        Task::ActionGenerator => AgentModel::ActionGenerator(ActionGeneratorModelWrapper::new(
            model_args,
            game_args,
            vocabulary,
            topology,
            logger,
            load_pretrained,
        )?),
    })
}
