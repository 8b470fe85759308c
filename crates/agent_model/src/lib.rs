//! Agent Model Engine
//!
//! Trainable modules for instruction following (plan prediction and action
//! generation) on top of candle, plus the parameter store and the
//! data-parallel container the training toolchain drives them through.

pub mod device_utils;
pub mod layers;
pub mod model;
pub mod network;
pub mod parallel;

pub use device_utils::DeviceTopology;
pub use model::{
    ActionBatch, ActionGenerator, ActionGeneratorConfig, ActionOutput, AuxiliaryWeights,
    BatchModule, DecoderArgs, InstructionInput, ModelArgs, PlanBatch, PlanPrediction,
    PlanPredictor, PlanPredictorConfig, Task,
};
pub use network::Network;
pub use parallel::{DataParallel, ModuleContainer};
