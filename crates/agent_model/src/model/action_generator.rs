//! ActionGenerator - next-action prediction, one decoding step per row

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{Embedding, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::layers::{InstructionEncoder, RMSNorm, SwiGLU};
use crate::model::{ActionBatch, ActionOutput, BatchModule, PlanPredictor, PlanPredictorConfig};

const RMS_NORM_EPS: f64 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionGeneratorConfig {
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub state_feature_dim: usize,
    pub num_actions: usize,
    pub dropout: f32,
    /// Embedded plan predictor for end-to-end training.
    pub plan_predictor: Option<PlanPredictorConfig>,
}

impl ActionGeneratorConfig {
    /// Id fed as the previous action before the first step.
    pub fn start_action_id(&self) -> u32 {
        self.num_actions as u32
    }
}

pub struct ActionGenerator {
    pub encoder: InstructionEncoder,
    pub action_embedding: Embedding,
    pub state_proj: Linear,
    pub previous_proj: Linear,
    pub norm: RMSNorm,
    pub mlp: SwiGLU,
    pub head: Linear,
    pub plan_predictor: Option<PlanPredictor>,
    pub config: ActionGeneratorConfig,
}

/// Prefix under which the embedded plan predictor's parameters live.
pub const PLAN_PREDICTOR_PREFIX: &str = "plan_predictor";

impl BatchModule for ActionGenerator {
    type Config = ActionGeneratorConfig;
    type Batch = ActionBatch;
    type Output = ActionOutput;
    type Prediction = Vec<usize>;

    const NAME: &'static str = "ActionGenerator";

    fn load(config: &ActionGeneratorConfig, vb: VarBuilder) -> Result<Self> {
        let encoder = InstructionEncoder::load(
            config.vocab_size,
            config.embedding_dim,
            config.hidden_dim,
            vb.pp("encoder"),
        )?;
        let action_embedding = candle_nn::embedding(
            config.num_actions + 1,
            config.embedding_dim,
            vb.pp("action_embedding"),
        )?;

        let plan_predictor = match &config.plan_predictor {
            Some(pp) => Some(PlanPredictor::load(pp, vb.pp(PLAN_PREDICTOR_PREFIX))?),
            None => None,
        };
        // The expected board features under the predicted goal distribution
        // are appended to the agent-state features.
        let state_dim = config.state_feature_dim
            + config
                .plan_predictor
                .as_ref()
                .map_or(0, |pp| pp.cell_feature_dim);

        let state_proj = candle_nn::linear(state_dim, config.hidden_dim, vb.pp("state_proj"))?;
        let previous_proj =
            candle_nn::linear(config.embedding_dim, config.hidden_dim, vb.pp("previous_proj"))?;
        let norm = RMSNorm::load(config.hidden_dim, RMS_NORM_EPS, vb.pp("norm"))?;
        let mlp = SwiGLU::load(config.hidden_dim, config.hidden_dim * 2, vb.pp("mlp"))?;
        let head = candle_nn::linear(config.hidden_dim, config.num_actions, vb.pp("head"))?;

        Ok(Self {
            encoder,
            action_embedding,
            state_proj,
            previous_proj,
            norm,
            mlp,
            head,
            plan_predictor,
            config: *config,
        })
    }

    fn forward(&self, batch: &ActionBatch, train: bool) -> Result<ActionOutput> {
        let dropout = train.then_some(self.config.dropout);
        let instruction = self.encoder.forward(&batch.plan.instruction, dropout)?; // (N, H)

        let (state, plan_logits) = match &self.plan_predictor {
            Some(plan_predictor) => {
                let logits = plan_predictor.forward(&batch.plan, train)?;
                let (_trajectory, goal) = PlanPredictor::split_logits(&logits)?;
                let goal_probs = candle_nn::ops::softmax(&goal, D::Minus1)?; // (N, C)
                let expected = goal_probs
                    .unsqueeze(1)?
                    .matmul(&batch.plan.cells.contiguous()?)?
                    .squeeze(1)?; // (N, F)
                (Tensor::cat(&[&batch.state, &expected], 1)?, Some(logits))
            }
            None => (batch.state.clone(), None),
        };

        let previous = self.action_embedding.forward(&batch.previous_action)?;
        let hidden = ((self.state_proj.forward(&state)? + self.previous_proj.forward(&previous)?)?
            + instruction)?;
        let hidden = (self.mlp.forward(&self.norm.forward(&hidden)?)? + hidden)?;
        let hidden = match dropout {
            Some(p) if p > 0.0 => candle_nn::ops::dropout(&hidden, p)?,
            _ => hidden,
        };

        Ok(ActionOutput {
            action_logits: self.head.forward(&hidden)?,
            plan_logits,
        })
    }

    fn predict(&self, batch: &ActionBatch) -> Result<Vec<usize>> {
        let output = self.forward(batch, false)?;
        Ok(output
            .action_logits
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?
            .into_iter()
            .map(|a| a as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstructionInput, PlanBatch};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn batch(device: &Device, rows: usize) -> Result<ActionBatch> {
        let ids: Vec<Vec<u32>> = (0..rows).map(|i| vec![2 + i as u32 % 3, 3]).collect();
        let instruction = InstructionInput::from_token_ids(&ids, device)?;
        let cells = Tensor::rand(0f32, 1., (rows, 4, 3), device)?;
        Ok(ActionBatch {
            plan: PlanBatch::new(instruction, cells)?,
            state: Tensor::rand(0f32, 1., (rows, 5), device)?,
            previous_action: Tensor::new(vec![4u32; rows], device)?,
        })
    }

    fn config(plan_predictor: bool) -> ActionGeneratorConfig {
        ActionGeneratorConfig {
            vocab_size: 8,
            embedding_dim: 4,
            hidden_dim: 8,
            state_feature_dim: 5,
            num_actions: 4,
            dropout: 0.1,
            plan_predictor: plan_predictor.then_some(PlanPredictorConfig {
                vocab_size: 8,
                embedding_dim: 4,
                hidden_dim: 8,
                cell_feature_dim: 3,
                dropout: 0.1,
            }),
        }
    }

    #[test]
    fn test_action_logits_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = ActionGenerator::load(&config(false), vb)?;

        let out = model.forward(&batch(&device, 3)?, true)?;
        assert_eq!(out.action_logits.dims(), &[3, 4]);
        assert!(out.plan_logits.is_none());
        assert!(model.predict(&batch(&device, 3)?)?.iter().all(|&a| a < 4));
        Ok(())
    }

    #[test]
    fn test_end_to_end_registers_plan_predictor() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = ActionGenerator::load(&config(true), vb)?;

        let out = model.forward(&batch(&device, 2)?, false)?;
        assert_eq!(out.plan_logits.as_ref().map(|t| t.dims().to_vec()), Some(vec![2, 4, 2]));

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().any(|n| n.starts_with("plan_predictor.encoder.")));
        Ok(())
    }
}
