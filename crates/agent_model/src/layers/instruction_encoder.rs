//! InstructionEncoder - Embedding + LSTM over instruction tokens

use candle_core::{Module, Result, Tensor};
use candle_nn::{Embedding, LSTMConfig, VarBuilder, LSTM, RNN};

use crate::model::InstructionInput;

/// Encodes a padded batch of instructions into one vector per instruction.
///
/// The encoding is the LSTM hidden state at each instruction's last real
/// token, selected with the one-hot `last_token_mask` carried by the batch.
pub struct InstructionEncoder {
    pub embedding: Embedding,
    pub lstm: LSTM,
    pub hidden_dim: usize,
}

impl InstructionEncoder {
    pub fn load(
        vocab_size: usize,
        embedding_dim: usize,
        hidden_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = candle_nn::embedding(vocab_size, embedding_dim, vb.pp("embedding"))?;
        let lstm = candle_nn::lstm(
            embedding_dim,
            hidden_dim,
            LSTMConfig::default(),
            vb.pp("lstm"),
        )?;
        Ok(Self {
            embedding,
            lstm,
            hidden_dim,
        })
    }

    /// Returns `(batch, hidden_dim)`.
    pub fn forward(&self, input: &InstructionInput, dropout: Option<f32>) -> Result<Tensor> {
        let embedded = self.embedding.forward(&input.tokens)?;
        let embedded = match dropout {
            Some(p) if p > 0.0 => candle_nn::ops::dropout(&embedded, p)?,
            _ => embedded,
        };

        let states = self.lstm.seq(&embedded)?;
        let hidden = self.lstm.states_to_tensor(&states)?; // (B, L, H)
        hidden.broadcast_mul(&input.last_token_mask)?.sum(1)
    }
}
