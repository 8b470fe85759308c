//! SwiGLU - Gated MLP with SiLU activation

use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

/// SwiGLU MLP block (Gate, Down, Up projections)
pub struct SwiGLU {
    pub w1: Linear, // Gate
    pub w2: Linear, // Down
    pub w3: Linear, // Up
}

impl SwiGLU {
    pub fn load(hidden_dim: usize, intermediate_dim: usize, vb: VarBuilder) -> Result<Self> {
        let w1 = candle_nn::linear_no_bias(hidden_dim, intermediate_dim, vb.pp("gate_proj"))?;
        let w2 = candle_nn::linear_no_bias(intermediate_dim, hidden_dim, vb.pp("down_proj"))?;
        let w3 = candle_nn::linear_no_bias(hidden_dim, intermediate_dim, vb.pp("up_proj"))?;
        Ok(Self { w1, w2, w3 })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x_gate = self.w1.forward(x)?;
        let x_up = self.w3.forward(x)?;
        let silu_gate = candle_nn::ops::silu(&x_gate)?;
        let hidden = (silu_gate * x_up)?;
        self.w2.forward(&hidden)
    }
}
