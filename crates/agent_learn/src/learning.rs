//! Learning Module - objectives, the epoch loop and the training driver
//!
//! - auxiliary: plan objectives shared by both tasks
//! - checkpoint: checkpoint files and their training state
//! - training_loop: epoch loop used by every model wrapper
//! - training: the driver for a complete run

pub mod auxiliary;
pub mod checkpoint;
pub mod training;
pub mod training_loop;

pub use auxiliary::Auxiliary;
pub use training::{run_training, train, DevEvaluation};
