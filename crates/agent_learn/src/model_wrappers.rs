//! Model Wrappers - task-specific adapters over the trainable networks
//!
//! - ModelWrapper / WrapperBase: lifecycle shared by every task
//! - PlanPredictorModelWrapper: trajectory and goal prediction
//! - ActionGeneratorModelWrapper: next-action generation, optionally end-to-end
//! - create_model_wrapper: builds the wrapper for the configured task

pub mod action_generator_model_wrapper;
pub mod create_model_wrapper;
pub mod model_wrapper;
pub mod plan_predictor_model_wrapper;

pub use action_generator_model_wrapper::ActionGeneratorModelWrapper;
pub use create_model_wrapper::{get_model_wrapper, AgentModel};
pub use model_wrapper::{ModelWrapper, WrapperBase};
pub use plan_predictor_model_wrapper::PlanPredictorModelWrapper;
