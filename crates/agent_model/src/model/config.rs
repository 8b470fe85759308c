//! ModelArgs - Model configuration shared by every task

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which downstream objective a model implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    #[default]
    PlanPredictor,
    ActionGenerator,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::PlanPredictor => write!(f, "plan_predictor"),
            Task::ActionGenerator => write!(f, "action_generator"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderArgs {
    /// Checkpoint of a plan predictor trained in an earlier run.
    pub pretrained_plan_predictor_filepath: Option<PathBuf>,
    /// Train the action generator jointly with an embedded plan predictor.
    pub end_to_end: bool,
}

impl DecoderArgs {
    pub fn pretrained_plan_predictor(&self) -> bool {
        self.pretrained_plan_predictor_filepath.is_some()
    }

    pub fn pretrained_plan_predictor_filepath(&self) -> Option<&PathBuf> {
        self.pretrained_plan_predictor_filepath.as_ref()
    }

    pub fn end_to_end(&self) -> bool {
        self.end_to_end
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxiliaryWeights {
    pub trajectory: f64,
    pub final_goal: f64,
}

impl Default for AuxiliaryWeights {
    fn default() -> Self {
        Self {
            trajectory: 1.0,
            final_goal: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelArgs {
    pub task: Task,
    pub embedding_size: usize,
    pub hidden_size: usize,
    pub dropout: f32,
    pub maximum_instruction_length: usize,
    pub auxiliary_weights: AuxiliaryWeights,
    pub decoder: DecoderArgs,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            task: Task::PlanPredictor,
            embedding_size: 64,
            hidden_size: 128,
            dropout: 0.1,
            maximum_instruction_length: 64,
            auxiliary_weights: AuxiliaryWeights::default(),
            decoder: DecoderArgs::default(),
        }
    }
}

impl ModelArgs {
    pub fn get_task(&self) -> Task {
        self.task
    }

    pub fn get_decoder_args(&self) -> &DecoderArgs {
        &self.decoder
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding_size == 0 || self.hidden_size == 0 {
            anyhow::bail!("Embedding and hidden sizes must be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            anyhow::bail!("Dropout must lie in [0, 1), got {}", self.dropout);
        }
        if self.maximum_instruction_length == 0 {
            anyhow::bail!("maximum_instruction_length must be positive");
        }
        match self.task {
            Task::PlanPredictor => {
                if self.decoder.end_to_end {
                    anyhow::bail!("end_to_end training only applies to the action generator");
                }
                let w = &self.auxiliary_weights;
                if w.trajectory <= 0.0 && w.final_goal <= 0.0 {
                    anyhow::bail!("The plan predictor needs a positive trajectory or final-goal weight");
                }
            }
            Task::ActionGenerator => {}
        }
        Ok(())
    }
}
