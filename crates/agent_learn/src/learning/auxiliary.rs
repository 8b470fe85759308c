//! Auxiliary plan objectives

use anyhow::Result;
use candle_core::Tensor;
use std::collections::BTreeMap;
use std::fmt;

use crate::data::batching::PlanTargets;
use agent_model::PlanPredictor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Auxiliary {
    /// Per-cell prediction of the cells the gold trajectory visits.
    Trajectory,
    /// Prediction of the cell the gold trajectory ends on.
    FinalGoal,
}

impl Auxiliary {
    pub fn name(self) -> &'static str {
        match self {
            Auxiliary::Trajectory => "trajectory",
            Auxiliary::FinalGoal => "final_goal",
        }
    }
}

impl fmt::Display for Auxiliary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar value of each auxiliary loss in one batch.
pub type AuxiliaryData = BTreeMap<Auxiliary, f32>;

/// Mean binary cross-entropy on logits: `max(x, 0) - x*t + log(1 + exp(-|x|))`.
pub fn binary_cross_entropy_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let loss = ((logits.relu()? - logits.mul(targets)?)? + softplus)?;
    Ok(loss.mean_all()?)
}

/// Weighted sum of the active plan losses, plus each loss's value.
///
/// `plan_logits` is the `(B, C, 2)` output of a plan predictor.
pub fn plan_losses(
    plan_logits: &Tensor,
    targets: &PlanTargets,
    weights: &BTreeMap<Auxiliary, f64>,
) -> Result<(Option<Tensor>, AuxiliaryData)> {
    let (trajectory, goal) = PlanPredictor::split_logits(plan_logits)?;

    let mut total: Option<Tensor> = None;
    let mut data = AuxiliaryData::new();
    for (&auxiliary, &weight) in weights {
        let loss = match auxiliary {
            Auxiliary::Trajectory => binary_cross_entropy_with_logits(&trajectory, &targets.trajectory)?,
            Auxiliary::FinalGoal => candle_nn::loss::cross_entropy(&goal, &targets.goal)?,
        };
        data.insert(auxiliary, loss.to_scalar::<f32>()?);
        let weighted = (loss * weight)?;
        total = Some(match total {
            Some(t) => (t + weighted)?,
            None => weighted,
        });
    }
    Ok((total, data))
}
