//! PlanPredictor - which cells will the agent visit, and where will it stop

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::layers::{InstructionEncoder, RMSNorm, SwiGLU};
use crate::model::{BatchModule, PlanBatch};

const RMS_NORM_EPS: f64 = 1e-5;

/// Channel of the output holding trajectory logits.
pub const TRAJECTORY_CHANNEL: usize = 0;
/// Channel of the output holding goal logits.
pub const GOAL_CHANNEL: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanPredictorConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub cell_feature_dim: usize,
    pub dropout: f32,
}

pub struct PlanPredictor {
    pub encoder: InstructionEncoder,
    pub cell_proj: Linear,
    pub norm: RMSNorm,
    pub mlp: SwiGLU,
    pub head: Linear,
    pub config: PlanPredictorConfig,
}

/// Raw per-row plan predictions.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanPrediction {
    /// Sigmoid trajectory probability per cell.
    pub trajectory_probabilities: Vec<Vec<f32>>,
    /// Argmax goal cell index per row.
    pub goal_cells: Vec<usize>,
}

impl PlanPredictor {
    /// Splits `(B, C, 2)` logits into trajectory and goal logits, each `(B, C)`.
    pub fn split_logits(logits: &Tensor) -> Result<(Tensor, Tensor)> {
        let trajectory = logits.narrow(D::Minus1, TRAJECTORY_CHANNEL, 1)?.squeeze(D::Minus1)?;
        let goal = logits.narrow(D::Minus1, GOAL_CHANNEL, 1)?.squeeze(D::Minus1)?;
        Ok((trajectory, goal))
    }
}

impl BatchModule for PlanPredictor {
    type Config = PlanPredictorConfig;
    type Batch = PlanBatch;
    type Output = Tensor;
    type Prediction = PlanPrediction;

    const NAME: &'static str = "PlanPredictor";

    fn load(config: &PlanPredictorConfig, vb: VarBuilder) -> Result<Self> {
        let encoder = InstructionEncoder::load(
            config.vocab_size,
            config.embedding_dim,
            config.hidden_dim,
            vb.pp("encoder"),
        )?;
        let cell_proj = candle_nn::linear(config.cell_feature_dim, config.hidden_dim, vb.pp("cell_proj"))?;
        let norm = RMSNorm::load(config.hidden_dim, RMS_NORM_EPS, vb.pp("norm"))?;
        let mlp = SwiGLU::load(config.hidden_dim, config.hidden_dim * 2, vb.pp("mlp"))?;
        let head = candle_nn::linear(config.hidden_dim, 2, vb.pp("head"))?;
        Ok(Self {
            encoder,
            cell_proj,
            norm,
            mlp,
            head,
            config: *config,
        })
    }

    /// Returns `(B, C, 2)` logits.
    fn forward(&self, batch: &PlanBatch, train: bool) -> Result<Tensor> {
        let dropout = train.then_some(self.config.dropout);
        let instruction = self.encoder.forward(&batch.instruction, dropout)?; // (B, H)
        let cells = self.cell_proj.forward(&batch.cells)?; // (B, C, H)

        let fused = (cells.broadcast_mul(&instruction.unsqueeze(1)?)? + &cells)?;
        let hidden = (self.mlp.forward(&self.norm.forward(&fused)?)? + fused)?;
        let hidden = match dropout {
            Some(p) if p > 0.0 => candle_nn::ops::dropout(&hidden, p)?,
            _ => hidden,
        };
        self.head.forward(&hidden)
    }

    fn predict(&self, batch: &PlanBatch) -> Result<PlanPrediction> {
        let logits = self.forward(batch, false)?;
        let (trajectory, goal) = Self::split_logits(&logits)?;
        let trajectory_probabilities = candle_nn::ops::sigmoid(&trajectory)?.to_vec2::<f32>()?;
        let goal_cells = goal
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?
            .into_iter()
            .map(|c| c as usize)
            .collect();
        Ok(PlanPrediction {
            trajectory_probabilities,
            goal_cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstructionInput;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_forward_and_predict_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = PlanPredictorConfig {
            vocab_size: 12,
            embedding_dim: 4,
            hidden_dim: 8,
            cell_feature_dim: 3,
            dropout: 0.0,
        };
        let model = PlanPredictor::load(&config, vb)?;

        let instruction = InstructionInput::from_token_ids(&[vec![2, 3], vec![4]], &device)?;
        let cells = Tensor::rand(0f32, 1., (2, 9, 3), &device)?;
        let batch = PlanBatch::new(instruction, cells)?;

        assert_eq!(model.forward(&batch, true)?.dims(), &[2, 9, 2]);
        let prediction = model.predict(&batch)?;
        assert_eq!(prediction.goal_cells.len(), 2);
        assert!(prediction.goal_cells.iter().all(|&c| c < 9));
        assert!(prediction
            .trajectory_probabilities
            .iter()
            .flatten()
            .all(|p| (0.0..=1.0).contains(p)));
        Ok(())
    }
}
