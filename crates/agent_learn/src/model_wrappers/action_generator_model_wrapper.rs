use agent_model::model::action_generator::PLAN_PREDICTOR_PREFIX;
use agent_model::{
    ActionBatch, ActionGenerator, ActionGeneratorConfig, BatchModule, DeviceTopology, ModelArgs,
    Network, Task,
};
use anyhow::{Context, Result};
use candle_core::Tensor;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::model_wrapper::{ModelWrapper, WrapperBase};
use super::plan_predictor_model_wrapper::{plan_auxiliaries, plan_predictor_config};
use crate::config::{EvaluationArgs, GameArgs, TrainingArgs};
use crate::data::batching::{self, DecodingStep, STATE_FEATURE_DIM};
use crate::data::{DatasetSplit, GameDataset, InstructionExample, Vocabulary};
use crate::evaluation::action_generator_metrics::{self, STATE_ACCURACY};
use crate::experiment::ExperimentLog;
use crate::game::{self, Action, AgentState};
use crate::learning::auxiliary::{self, Auxiliary, AuxiliaryData};
use crate::learning::training_loop;

pub struct ActionGeneratorModelWrapper {
    base: WrapperBase<ActionGenerator>,
    game_args: GameArgs,
    vocabulary: Vocabulary,
    end_to_end: bool,
}

impl ActionGeneratorModelWrapper {
    /// With `load_pretrained`, the embedded plan predictor of an end-to-end
    /// model starts from the configured pretrained checkpoint.
    pub fn new(
        args: &ModelArgs,
        game_args: &GameArgs,
        vocabulary: &Vocabulary,
        topology: &DeviceTopology,
        logger: Option<Arc<dyn ExperimentLog>>,
        load_pretrained: bool,
    ) -> Result<Self> {
        if args.get_task() != Task::ActionGenerator {
            anyhow::bail!("Cannot build an action generator for task {}", args.get_task());
        }
        let decoder = args.get_decoder_args();
        let end_to_end = decoder.end_to_end();
        let config = ActionGeneratorConfig {
            vocab_size: vocabulary.len(),
            embedding_dim: args.embedding_size,
            hidden_dim: args.hidden_size,
            state_feature_dim: STATE_FEATURE_DIM,
            num_actions: Action::COUNT,
            dropout: args.dropout,
            plan_predictor: end_to_end.then(|| plan_predictor_config(args, vocabulary.len())),
        };
        let mut network = Network::<ActionGenerator>::new(config, topology.primary())?;

        if load_pretrained {
            match decoder.pretrained_plan_predictor_filepath() {
                Some(path) if end_to_end => {
                    network.load_pretrained(path, PLAN_PREDICTOR_PREFIX)?;
                }
                Some(path) => tracing::warn!(
                    "Ignoring pretrained plan predictor {:?}: the model is not end-to-end",
                    path
                ),
                None => tracing::info!("No pretrained plan predictor configured, training it from scratch"),
            }
        }

        Ok(Self {
            base: WrapperBase::new(args, network, topology, logger),
            game_args: game_args.clone(),
            vocabulary: vocabulary.clone(),
            end_to_end,
        })
    }

    pub fn action_batch(&self, steps: &[DecodingStep]) -> Result<ActionBatch> {
        let config = self.base.model().module().config();
        batching::action_batch(
            steps,
            &self.vocabulary,
            &self.game_args,
            self.get_arguments().maximum_instruction_length,
            config.start_action_id(),
            self.base.device(),
        )
    }

    pub fn game_args(&self) -> &GameArgs {
        &self.game_args
    }

    /// Greedy decoding. Each sequence ends with the first predicted `Stop`
    /// or after `maximum_generation_length` actions.
    pub fn generate(
        &self,
        examples: &[&InstructionExample],
        maximum_generation_length: usize,
    ) -> Result<Vec<Vec<Action>>> {
        let mut states: Vec<AgentState> = examples.iter().map(|e| e.initial_state).collect();
        let mut previous: Vec<Option<Action>> = vec![None; examples.len()];
        let mut sequences: Vec<Vec<Action>> = vec![Vec::new(); examples.len()];
        let mut active: Vec<usize> = (0..examples.len()).collect();

        for _ in 0..maximum_generation_length {
            if active.is_empty() {
                break;
            }
            let steps: Vec<DecodingStep> = active
                .iter()
                .map(|&i| DecodingStep {
                    example: examples[i],
                    state: states[i],
                    previous_action: previous[i],
                })
                .collect();
            let predicted = self.get_predictions(&self.action_batch(&steps)?)?;

            let mut still_active = Vec::with_capacity(active.len());
            for (&i, &index) in active.iter().zip(predicted.iter()) {
                let action = Action::from_index(index)
                    .with_context(|| format!("Predicted action id {} is out of range", index))?;
                sequences[i].push(action);
                if action == Action::Stop {
                    continue;
                }
                states[i] = game::step(states[i], action, &self.game_args, &examples[i].obstacles);
                previous[i] = Some(action);
                still_active.push(i);
            }
            active = still_active;
        }
        Ok(sequences)
    }

    /// Logs every execution accuracy and scores the epoch by final-state accuracy.
    pub fn validation_score(
        &self,
        evaluation_arguments: &EvaluationArgs,
        examples: &[&InstructionExample],
        epoch: usize,
    ) -> Result<f64> {
        let results = action_generator_metrics::execution_accuracies(
            self,
            &self.game_args,
            evaluation_arguments,
            examples,
        )?;
        for (name, value) in &results {
            self.base.log_scalar(&format!("validation_{}", name), *value, epoch)?;
        }
        results
            .get(STATE_ACCURACY)
            .copied()
            .context("Execution accuracies lack the final-state accuracy")
    }
}

impl ModelWrapper for ActionGeneratorModelWrapper {
    type Module = ActionGenerator;

    fn base(&self) -> &WrapperBase<ActionGenerator> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WrapperBase<ActionGenerator> {
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

    /// Cross-entropy of every gold next action, plus the weighted
    /// plan objectives of an end-to-end model.
    fn loss(&self, examples: &[&InstructionExample]) -> Result<(Tensor, AuxiliaryData)> {
        let (steps, targets): (Vec<DecodingStep>, Vec<Action>) =
            batching::gold_steps(examples, &self.game_args).into_iter().unzip();
        let batch = self.action_batch(&steps)?;
        let output = self.base.model().forward(&batch)?;

        let targets: Vec<u32> = targets.iter().map(|a| a.index() as u32).collect();
        let targets = Tensor::new(targets, self.base.device())?;
        let action_loss = candle_nn::loss::cross_entropy(&output.action_logits, &targets)?;

        let Some(plan_logits) = output.plan_logits else {
            return Ok((action_loss, AuxiliaryData::new()));
        };
        let step_examples: Vec<&InstructionExample> = steps.iter().map(|s| s.example).collect();
        let plan_targets =
            batching::plan_targets(&step_examples, &self.game_args, self.base.device())?;
        let (plan_loss, data) =
            auxiliary::plan_losses(&plan_logits, &plan_targets, &self.get_auxiliaries())?;
        let total = match plan_loss {
            Some(plan_loss) => (action_loss + plan_loss)?,
            None => action_loss,
        };
        Ok((total, data))
    }

    fn get_auxiliaries(&self) -> BTreeMap<Auxiliary, f64> {
        if self.end_to_end {
            plan_auxiliaries(self.get_arguments())
        } else {
            BTreeMap::new()
        }
    }
}

impl fmt::Display for ActionGeneratorModelWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if self.end_to_end {
            write!(f, "(end-to-end with {})", agent_model::PlanPredictor::NAME)?;
        }
        Ok(())
    }
}
