//! Layers Module - Neural network building blocks
//!
//! - RMSNorm: Root Mean Square Layer Normalization
//! - SwiGLU: Gated MLP with SiLU activation
//! - InstructionEncoder: Embedding + LSTM instruction encoder

pub mod instruction_encoder;
pub mod rms_norm;
pub mod swiglu;

pub use instruction_encoder::InstructionEncoder;
pub use rms_norm::RMSNorm;
pub use swiglu::SwiGLU;
