//! Agent Learn - training toolchain for instruction-following agents
//!
//! Loads games and instructions, builds the vocabulary and the model
//! wrapper for the configured task, trains it and evaluates it on dev.

pub mod cli;
pub mod config;
pub mod data;
pub mod evaluation;
pub mod experiment;
pub mod game;
pub mod learning;
pub mod model_wrappers;
pub mod notify;

pub use config::ProgramArgs;
pub use learning::{run_training, train, DevEvaluation};
pub use model_wrappers::{AgentModel, ModelWrapper};
