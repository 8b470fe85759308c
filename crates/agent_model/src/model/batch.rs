//! Batch tensors fed to the modules, and how they split across devices

use candle_core::{DType, Device, Result, Tensor};

/// Padding id used for instruction tokens.
pub const PAD_ID: u32 = 0;

/// A batch whose rows can be divided between devices.
pub trait Scatter: Sized {
    fn batch_size(&self) -> usize;
    fn narrow(&self, start: usize, len: usize) -> Result<Self>;
    fn to_device(&self, device: &Device) -> Result<Self>;
}

/// A module output that can be reassembled from per-device shards.
pub trait Gather: Sized {
    fn gather(parts: Vec<Self>, device: &Device) -> Result<Self>;
}

impl Gather for Tensor {
    fn gather(parts: Vec<Self>, device: &Device) -> Result<Self> {
        let parts = parts
            .iter()
            .map(|p| p.to_device(device))
            .collect::<Result<Vec<_>>>()?;
        Tensor::cat(&parts, 0)
    }
}

/// Padded instruction token ids.
#[derive(Clone, Debug)]
pub struct InstructionInput {
    /// `(B, L)` u32 token ids, padded with [`PAD_ID`].
    pub tokens: Tensor,
    /// `(B, L, 1)` f32, one at each row's last real token.
    pub last_token_mask: Tensor,
}

impl InstructionInput {
    /// Pads `rows` to a common length. Empty rows become a single pad token.
    pub fn from_token_ids(rows: &[Vec<u32>], device: &Device) -> Result<Self> {
        let batch = rows.len();
        let max_len = rows.iter().map(|r| r.len()).max().unwrap_or(0).max(1);

        let mut tokens = vec![PAD_ID; batch * max_len];
        let mut mask = vec![0f32; batch * max_len];
        for (b, row) in rows.iter().enumerate() {
            tokens[b * max_len..b * max_len + row.len()].copy_from_slice(row);
            let last = row.len().max(1) - 1;
            mask[b * max_len + last] = 1.0;
        }

        Ok(Self {
            tokens: Tensor::from_vec(tokens, (batch, max_len), device)?,
            last_token_mask: Tensor::from_vec(mask, (batch, max_len, 1), device)?,
        })
    }
}

impl Scatter for InstructionInput {
    fn batch_size(&self) -> usize {
        self.tokens.dims()[0]
    }

    fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        Ok(Self {
            tokens: self.tokens.narrow(0, start, len)?,
            last_token_mask: self.last_token_mask.narrow(0, start, len)?,
        })
    }

    fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            tokens: self.tokens.to_device(device)?,
            last_token_mask: self.last_token_mask.to_device(device)?,
        })
    }
}

/// Input of the plan predictor: one instruction and one board per row.
#[derive(Clone, Debug)]
pub struct PlanBatch {
    pub instruction: InstructionInput,
    /// `(B, C, F)` f32 per-cell board features.
    pub cells: Tensor,
}

impl PlanBatch {
    pub fn new(instruction: InstructionInput, cells: Tensor) -> Result<Self> {
        let (b, _c, _f) = cells.dims3()?;
        if b != instruction.batch_size() {
            candle_core::bail!(
                "plan batch mismatch: {} instructions vs {} boards",
                instruction.batch_size(),
                b
            );
        }
        Ok(Self {
            instruction,
            cells: cells.to_dtype(DType::F32)?,
        })
    }
}

impl Scatter for PlanBatch {
    fn batch_size(&self) -> usize {
        self.instruction.batch_size()
    }

    fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        Ok(Self {
            instruction: self.instruction.narrow(start, len)?,
            cells: self.cells.narrow(0, start, len)?,
        })
    }

    fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            instruction: self.instruction.to_device(device)?,
            cells: self.cells.to_device(device)?,
        })
    }
}

/// Input of the action generator: one decoding step per row.
#[derive(Clone, Debug)]
pub struct ActionBatch {
    pub plan: PlanBatch,
    /// `(N, S)` f32 agent-state features.
    pub state: Tensor,
    /// `(N,)` u32 previous action ids (the start id before the first step).
    pub previous_action: Tensor,
}

impl Scatter for ActionBatch {
    fn batch_size(&self) -> usize {
        self.plan.batch_size()
    }

    fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        Ok(Self {
            plan: self.plan.narrow(start, len)?,
            state: self.state.narrow(0, start, len)?,
            previous_action: self.previous_action.narrow(0, start, len)?,
        })
    }

    fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            plan: self.plan.to_device(device)?,
            state: self.state.to_device(device)?,
            previous_action: self.previous_action.to_device(device)?,
        })
    }
}

/// Action logits plus, for end-to-end models, the embedded plan logits.
#[derive(Clone, Debug)]
pub struct ActionOutput {
    /// `(N, A)`
    pub action_logits: Tensor,
    /// `(N, C, 2)`
    pub plan_logits: Option<Tensor>,
}

impl Gather for ActionOutput {
    fn gather(parts: Vec<Self>, device: &Device) -> Result<Self> {
        let mut actions = Vec::with_capacity(parts.len());
        let mut plans = Vec::with_capacity(parts.len());
        for part in parts {
            actions.push(part.action_logits);
            if let Some(p) = part.plan_logits {
                plans.push(p);
            }
        }
        let plan_logits = if plans.is_empty() {
            None
        } else {
            Some(<Tensor as Gather>::gather(plans, device)?)
        };
        Ok(Self {
            action_logits: <Tensor as Gather>::gather(actions, device)?,
            plan_logits,
        })
    }
}
