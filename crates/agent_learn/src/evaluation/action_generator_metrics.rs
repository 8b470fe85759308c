//! Execution accuracies of greedily generated action sequences

use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::{EvaluationArgs, GameArgs};
use crate::data::InstructionExample;
use crate::game::{self, Action};
use crate::model_wrappers::ActionGeneratorModelWrapper;

/// Generated actions equal the gold actions exactly.
pub const SEQUENCE_ACCURACY: &str = "sequence_accuracy";
/// The agent ends on the gold final cell.
pub const POSITION_ACCURACY: &str = "position_accuracy";
/// The agent ends on the gold final cell with the gold heading.
pub const STATE_ACCURACY: &str = "state_accuracy";

#[derive(Default)]
struct ExecutionCounts {
    examples: usize,
    exact_sequences: usize,
    correct_positions: usize,
    correct_states: usize,
}

impl ExecutionCounts {
    fn add(&mut self, example: &InstructionExample, generated: &[Action], game_arguments: &GameArgs) {
        let gold = example.actions_with_stop();
        let predicted_state = *game::trajectory(
            example.initial_state,
            generated,
            game_arguments,
            &example.obstacles,
        )
        .last()
        .unwrap_or(&example.initial_state);
        let gold_state = example.final_state(game_arguments);

        self.examples += 1;
        if generated == gold.as_slice() {
            self.exact_sequences += 1;
        }
        if predicted_state.position == gold_state.position {
            self.correct_positions += 1;
            if predicted_state.rotation == gold_state.rotation {
                self.correct_states += 1;
            }
        }
    }

    fn results(&self) -> BTreeMap<String, f64> {
        let ratio = |n: usize| {
            if self.examples == 0 {
                0.0
            } else {
                n as f64 / self.examples as f64
            }
        };
        BTreeMap::from([
            (SEQUENCE_ACCURACY.to_string(), ratio(self.exact_sequences)),
            (POSITION_ACCURACY.to_string(), ratio(self.correct_positions)),
            (STATE_ACCURACY.to_string(), ratio(self.correct_states)),
        ])
    }
}

/// Decodes every example greedily and scores where the generated actions
/// leave the agent.
pub fn execution_accuracies(
    model: &ActionGeneratorModelWrapper,
    game_arguments: &GameArgs,
    evaluation_arguments: &EvaluationArgs,
    instruction_examples: &[&InstructionExample],
) -> Result<BTreeMap<String, f64>> {
    let mut counts = ExecutionCounts::default();
    for chunk in instruction_examples.chunks(evaluation_arguments.batch_size.max(1)) {
        let generated = model.generate(chunk, evaluation_arguments.maximum_generation_length)?;
        for (example, actions) in chunk.iter().zip(generated.iter()) {
            counts.add(example, actions, game_arguments);
        }
    }
    Ok(counts.results())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{AgentState, Position, Rotation};

    fn example() -> InstructionExample {
        InstructionExample {
            example_id: "e".to_string(),
            instruction: "go east".to_string(),
            initial_state: AgentState {
                position: Position::new(0, 0),
                rotation: Rotation::North,
            },
            obstacles: vec![],
            target_actions: vec![Action::TurnRight, Action::Forward],
        }
    }

    #[test]
    fn test_accuracies_distinguish_sequence_position_and_state() {
        let game = GameArgs {
            board_width: 3,
            board_height: 3,
        };
        let ex = example();
        let mut counts = ExecutionCounts::default();
        // Exact.
        counts.add(&ex, &[Action::TurnRight, Action::Forward, Action::Stop], &game);
        // Same state, different route: the blocked move north is a no-op.
        counts.add(
            &ex,
            &[Action::Forward, Action::TurnRight, Action::Forward, Action::Stop],
            &game,
        );
        // Right cell, wrong heading, never stopped.
        counts.add(
            &ex,
            &[Action::TurnRight, Action::Forward, Action::TurnLeft],
            &game,
        );
        // Wrong cell.
        counts.add(&ex, &[Action::Stop], &game);

        let results = counts.results();
        assert_eq!(results[SEQUENCE_ACCURACY], 0.25);
        assert_eq!(results[POSITION_ACCURACY], 0.75);
        assert_eq!(results[STATE_ACCURACY], 0.5);
    }
}
