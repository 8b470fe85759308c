use agent_model::{
    BatchModule, DeviceTopology, ModelArgs, Network, PlanBatch, PlanPrediction, PlanPredictor,
    PlanPredictorConfig, Task,
};
use anyhow::Result;
use candle_core::Tensor;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::model_wrapper::{ModelWrapper, WrapperBase};
use crate::config::{EvaluationArgs, GameArgs, TrainingArgs};
use crate::data::batching::{self, CELL_FEATURE_DIM};
use crate::data::{DatasetSplit, GameDataset, InstructionExample, Vocabulary};
use crate::evaluation::plan_metrics;
use crate::experiment::ExperimentLog;
use crate::learning::auxiliary::{self, Auxiliary, AuxiliaryData};
use crate::learning::training_loop;

/// Plan predictor configuration for a model with `vocab_size` word types.
pub fn plan_predictor_config(args: &ModelArgs, vocab_size: usize) -> PlanPredictorConfig {
    PlanPredictorConfig {
        vocab_size,
        embedding_dim: args.embedding_size,
        hidden_dim: args.hidden_size,
        cell_feature_dim: CELL_FEATURE_DIM,
        dropout: args.dropout,
    }
}

/// Trajectory and goal weights that are switched on.
pub fn plan_auxiliaries(args: &ModelArgs) -> BTreeMap<Auxiliary, f64> {
    [
        (Auxiliary::Trajectory, args.auxiliary_weights.trajectory),
        (Auxiliary::FinalGoal, args.auxiliary_weights.final_goal),
    ]
    .into_iter()
    .filter(|(_, w)| *w > 0.0)
    .collect()
}

pub struct PlanPredictorModelWrapper {
    base: WrapperBase<PlanPredictor>,
    game_args: GameArgs,
    vocabulary: Vocabulary,
}

impl PlanPredictorModelWrapper {
    pub fn new(
        args: &ModelArgs,
        game_args: &GameArgs,
        vocabulary: &Vocabulary,
        topology: &DeviceTopology,
        logger: Option<Arc<dyn ExperimentLog>>,
    ) -> Result<Self> {
        if args.get_task() != Task::PlanPredictor {
            anyhow::bail!("Cannot build a plan predictor for task {}", args.get_task());
        }
        let config = plan_predictor_config(args, vocabulary.len());
        let network = Network::<PlanPredictor>::new(config, topology.primary())?;
        Ok(Self {
            base: WrapperBase::new(args, network, topology, logger),
            game_args: game_args.clone(),
            vocabulary: vocabulary.clone(),
        })
    }

    pub fn batch(&self, examples: &[&InstructionExample]) -> Result<PlanBatch> {
        batching::plan_batch(
            examples,
            &self.vocabulary,
            &self.game_args,
            self.get_arguments().maximum_instruction_length,
            self.base.device(),
        )
    }

    /// Single-device predictions for `examples`.
    pub fn predict(&self, examples: &[&InstructionExample]) -> Result<PlanPrediction> {
        self.get_predictions(&self.batch(examples)?)
    }

    pub fn game_args(&self) -> &GameArgs {
        &self.game_args
    }

    /// Logs every plan metric and scores the epoch by goal accuracy.
    pub fn validation_score(
        &self,
        evaluation_arguments: &EvaluationArgs,
        examples: &[&InstructionExample],
        epoch: usize,
    ) -> Result<f64> {
        let metrics = plan_metrics::plan_metric_results(self, evaluation_arguments, examples)?;
        for (name, value) in metrics.as_map() {
            self.base.log_scalar(&format!("validation_{}", name), value, epoch)?;
        }
        Ok(metrics.goal_accuracy)
    }
}

impl ModelWrapper for PlanPredictorModelWrapper {
    type Module = PlanPredictor;

    fn base(&self) -> &WrapperBase<PlanPredictor> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WrapperBase<PlanPredictor> {
        &mut self.base
    }

    fn train_loop(
        &mut self,
        dataset: &GameDataset,
        _game_arguments: &GameArgs,
        evaluation_arguments: &EvaluationArgs,
        training_arguments: &TrainingArgs,
        experiment: &dyn ExperimentLog,
    ) -> Result<PathBuf> {
        let train = dataset.get_examples(DatasetSplit::Train);
        let validation = dataset.get_examples(DatasetSplit::Validation);
        let train: Vec<&InstructionExample> = train.values().collect();
        let validation: Vec<&InstructionExample> = validation.values().collect();

        training_loop::run_epochs(
            self,
            &train,
            &validation,
            training_arguments,
            experiment,
            |wrapper, examples, epoch| {
                wrapper.validation_score(evaluation_arguments, examples, epoch)
            },
        )
    }

    fn loss(&self, examples: &[&InstructionExample]) -> Result<(Tensor, AuxiliaryData)> {
        let batch = self.batch(examples)?;
        let logits = self.base.model().forward(&batch)?;
        let targets = batching::plan_targets(examples, &self.game_args, self.base.device())?;

        let (total, data) = auxiliary::plan_losses(&logits, &targets, &self.get_auxiliaries())?;
        match total {
            Some(total) => Ok((total, data)),
            None => anyhow::bail!("{} has no active objective", PlanPredictor::NAME),
        }
    }

    fn get_auxiliaries(&self) -> BTreeMap<Auxiliary, f64> {
        plan_auxiliaries(self.get_arguments())
    }
}

impl fmt::Display for PlanPredictorModelWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}
