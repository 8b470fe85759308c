//! Plan metrics - goal accuracy and trajectory precision/recall

use agent_model::PlanPrediction;
use anyhow::Result;
use serde::Serialize;
use std::fmt;

use crate::config::{EvaluationArgs, GameArgs};
use crate::data::InstructionExample;
use crate::model_wrappers::PlanPredictorModelWrapper;

/// Cells at or above this probability count as predicted trajectory.
pub const TRAJECTORY_THRESHOLD: f32 = 0.5;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PlanMetrics {
    pub num_examples: usize,
    pub goal_accuracy: f64,
    pub trajectory_precision: f64,
    pub trajectory_recall: f64,
    pub trajectory_f1: f64,
}

impl PlanMetrics {
    pub fn as_map(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("goal_accuracy", self.goal_accuracy),
            ("trajectory_precision", self.trajectory_precision),
            ("trajectory_recall", self.trajectory_recall),
            ("trajectory_f1", self.trajectory_f1),
        ]
    }
}

impl fmt::Display for PlanMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan metrics on {} examples: goal accuracy {:.2}%, trajectory P/R/F1 {:.3}/{:.3}/{:.3}",
            self.num_examples,
            100. * self.goal_accuracy,
            self.trajectory_precision,
            self.trajectory_recall,
            self.trajectory_f1
        )
    }
}

/// Running counts over prediction batches, micro-averaged over cells.
#[derive(Default)]
struct PlanCounts {
    examples: usize,
    correct_goals: usize,
    true_positives: usize,
    false_positives: usize,
    false_negatives: usize,
}

impl PlanCounts {
    fn add(&mut self, prediction: &PlanPrediction, examples: &[&InstructionExample], game: &GameArgs) {
        let rows = prediction
            .goal_cells
            .iter()
            .zip(prediction.trajectory_probabilities.iter());
        for (example, (&goal, probabilities)) in examples.iter().zip(rows) {
            self.examples += 1;
            if goal == example.goal_cell(game) {
                self.correct_goals += 1;
            }
            let gold = example.plan_cells(game);
            for (cell, &p) in probabilities.iter().enumerate() {
                match (p >= TRAJECTORY_THRESHOLD, gold.contains(&cell)) {
                    (true, true) => self.true_positives += 1,
                    (true, false) => self.false_positives += 1,
                    (false, true) => self.false_negatives += 1,
                    (false, false) => {}
                }
            }
        }
    }

    fn metrics(&self) -> PlanMetrics {
        let ratio = |a: usize, b: usize| if b == 0 { 0.0 } else { a as f64 / b as f64 };
        let precision = ratio(self.true_positives, self.true_positives + self.false_positives);
        let recall = ratio(self.true_positives, self.true_positives + self.false_negatives);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        PlanMetrics {
            num_examples: self.examples,
            goal_accuracy: ratio(self.correct_goals, self.examples),
            trajectory_precision: precision,
            trajectory_recall: recall,
            trajectory_f1: f1,
        }
    }
}

/// Predicts plans for `examples` in batches of `evaluation_arguments.batch_size`
/// and scores them against the gold plans.
pub fn plan_metric_results(
    model: &PlanPredictorModelWrapper,
    evaluation_arguments: &EvaluationArgs,
    examples: &[&InstructionExample],
) -> Result<PlanMetrics> {
    let mut counts = PlanCounts::default();
    for chunk in examples.chunks(evaluation_arguments.batch_size.max(1)) {
        let prediction = model.predict(chunk)?;
        counts.add(&prediction, chunk, model.game_args());
    }
    Ok(counts.metrics())
}
