//! Model Module - trainable modules for instruction following
//!
//! - PlanPredictor: per-cell trajectory and goal logits
//! - ActionGenerator: next-action logits, optionally end-to-end with a plan predictor
//! - ModelArgs / Task: model configuration
//! - batch: batch tensors and their scatter/gather rules

pub mod action_generator;
pub mod batch;
pub mod config;
pub mod plan_predictor;

pub use action_generator::{ActionGenerator, ActionGeneratorConfig};
pub use batch::{
    ActionBatch, ActionOutput, Gather, InstructionInput, PlanBatch, Scatter, PAD_ID,
};
pub use config::{AuxiliaryWeights, DecoderArgs, ModelArgs, Task};
pub use plan_predictor::{PlanPrediction, PlanPredictor, PlanPredictorConfig};

use candle_core::Result;
use candle_nn::VarBuilder;

/// A module that is built from a `VarBuilder` and runs on whole batches.
///
/// Building from a `VarBuilder` is what lets the data-parallel container
/// rebuild a replica on another device from copies of the master tensors.
pub trait BatchModule: Sized {
    type Config: Clone + std::fmt::Debug;
    type Batch: Scatter;
    type Output: Gather;
    type Prediction;

    /// Short name used in logs and summaries.
    const NAME: &'static str;

    fn load(config: &Self::Config, vb: VarBuilder) -> Result<Self>;

    fn forward(&self, batch: &Self::Batch, train: bool) -> Result<Self::Output>;

    /// Inference entry point; never dropout, never parallel.
    fn predict(&self, batch: &Self::Batch) -> Result<Self::Prediction>;
}
