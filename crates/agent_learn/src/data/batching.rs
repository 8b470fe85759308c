//! Batching - board/state features and model batches built from examples

use agent_model::{ActionBatch, InstructionInput, PlanBatch};
use anyhow::Result;
use candle_core::{Device, Tensor};

use super::{InstructionExample, Vocabulary};
use crate::config::GameArgs;
use crate::game::{Action, AgentState, Rotation};

/// Per cell: agent present, obstacle present, normalized x, normalized y.
pub const CELL_FEATURE_DIM: usize = 4;
/// Normalized x and y, then a one-hot heading.
pub const STATE_FEATURE_DIM: usize = 2 + Rotation::ALL.len();

fn normalized(v: i32, extent: usize) -> f32 {
    if extent <= 1 {
        0.0
    } else {
        v as f32 / (extent - 1) as f32
    }
}

/// Flattened `(C, F)` board features for the example's initial board.
pub fn cell_features(example: &InstructionExample, game: &GameArgs) -> Vec<f32> {
    let mut features = Vec::with_capacity(game.num_cells() * CELL_FEATURE_DIM);
    for cell in 0..game.num_cells() {
        let p = game.cell_position(cell);
        let agent = p == example.initial_state.position;
        let obstacle = example.obstacles.contains(&p);
        features.extend_from_slice(&[
            agent as u8 as f32,
            obstacle as u8 as f32,
            normalized(p.x, game.board_width),
            normalized(p.y, game.board_height),
        ]);
    }
    features
}

pub fn state_features(state: &AgentState, game: &GameArgs) -> [f32; STATE_FEATURE_DIM] {
    let mut features = [0f32; STATE_FEATURE_DIM];
    features[0] = normalized(state.position.x, game.board_width);
    features[1] = normalized(state.position.y, game.board_height);
    features[2 + state.rotation.index()] = 1.0;
    features
}

pub fn instruction_ids(
    examples: &[&InstructionExample],
    vocabulary: &Vocabulary,
    maximum_length: usize,
) -> Result<Vec<Vec<u32>>> {
    examples
        .iter()
        .map(|e| {
            let mut ids = vocabulary.encode(&e.instruction)?;
            ids.truncate(maximum_length);
            Ok(ids)
        })
        .collect()
}

pub fn plan_batch(
    examples: &[&InstructionExample],
    vocabulary: &Vocabulary,
    game: &GameArgs,
    maximum_instruction_length: usize,
    device: &Device,
) -> Result<PlanBatch> {
    let ids = instruction_ids(examples, vocabulary, maximum_instruction_length)?;
    let instruction = InstructionInput::from_token_ids(&ids, device)?;

    let cells: Vec<f32> = examples
        .iter()
        .flat_map(|e| cell_features(e, game))
        .collect();
    let cells = Tensor::from_vec(
        cells,
        (examples.len(), game.num_cells(), CELL_FEATURE_DIM),
        device,
    )?;
    Ok(PlanBatch::new(instruction, cells)?)
}

/// Supervision for the plan predictor.
pub struct PlanTargets {
    /// `(B, C)` f32, one on every cell of the gold trajectory.
    pub trajectory: Tensor,
    /// `(B,)` u32 goal cell index.
    pub goal: Tensor,
}

pub fn plan_targets(
    examples: &[&InstructionExample],
    game: &GameArgs,
    device: &Device,
) -> Result<PlanTargets> {
    let cells = game.num_cells();
    let mut trajectory = vec![0f32; examples.len() * cells];
    let mut goal = Vec::with_capacity(examples.len());
    for (row, example) in examples.iter().enumerate() {
        for cell in example.plan_cells(game) {
            trajectory[row * cells + cell] = 1.0;
        }
        goal.push(example.goal_cell(game) as u32);
    }
    Ok(PlanTargets {
        trajectory: Tensor::from_vec(trajectory, (examples.len(), cells), device)?,
        goal: Tensor::new(goal, device)?,
    })
}

/// One row of an action batch: an example, the agent's current state and
/// the action taken before it (`None` at the first step).
#[derive(Clone, Copy, Debug)]
pub struct DecodingStep<'a> {
    pub example: &'a InstructionExample,
    pub state: AgentState,
    pub previous_action: Option<Action>,
}

/// Teacher-forced decoding steps along each gold trajectory, paired with
/// the gold next action. Every example ends with a `Stop` step.
pub fn gold_steps<'a>(
    examples: &[&'a InstructionExample],
    game: &GameArgs,
) -> Vec<(DecodingStep<'a>, Action)> {
    let mut steps = Vec::new();
    for &example in examples {
        let actions = example.actions_with_stop();
        let states = example.trajectory(game);
        let mut previous_action = None;
        for (state, &action) in states.iter().zip(actions.iter()) {
            steps.push((
                DecodingStep {
                    example,
                    state: *state,
                    previous_action,
                },
                action,
            ));
            previous_action = Some(action);
        }
    }
    steps
}

pub fn action_batch(
    steps: &[DecodingStep],
    vocabulary: &Vocabulary,
    game: &GameArgs,
    maximum_instruction_length: usize,
    start_action_id: u32,
    device: &Device,
) -> Result<ActionBatch> {
    let examples: Vec<&InstructionExample> = steps.iter().map(|s| s.example).collect();
    let plan = plan_batch(&examples, vocabulary, game, maximum_instruction_length, device)?;

    let state: Vec<f32> = steps
        .iter()
        .flat_map(|s| state_features(&s.state, game))
        .collect();
    let previous_action: Vec<u32> = steps
        .iter()
        .map(|s| s.previous_action.map_or(start_action_id, |a| a.index() as u32))
        .collect();

    Ok(ActionBatch {
        plan,
        state: Tensor::from_vec(state, (steps.len(), STATE_FEATURE_DIM), device)?,
        previous_action: Tensor::new(previous_action, device)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Position;

    fn example() -> InstructionExample {
        InstructionExample {
            example_id: "e".to_string(),
            instruction: "turn right then go".to_string(),
            initial_state: AgentState {
                position: Position::new(0, 0),
                rotation: Rotation::North,
            },
            obstacles: vec![Position::new(1, 1)],
            target_actions: vec![Action::TurnRight, Action::Forward],
        }
    }

    fn game() -> GameArgs {
        GameArgs {
            board_width: 2,
            board_height: 2,
        }
    }

    #[test]
    fn test_cell_features_mark_agent_and_obstacle() {
        let f = cell_features(&example(), &game());
        assert_eq!(f.len(), 4 * CELL_FEATURE_DIM);
        assert_eq!(&f[0..4], &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(&f[12..16], &[0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_gold_steps_feed_previous_actions() {
        let ex = example();
        let steps = gold_steps(&[&ex], &game());
        let targets: Vec<Action> = steps.iter().map(|(_, a)| *a).collect();
        assert_eq!(targets, vec![Action::TurnRight, Action::Forward, Action::Stop]);
        assert_eq!(steps[0].0.previous_action, None);
        assert_eq!(steps[2].0.previous_action, Some(Action::Forward));
        assert_eq!(steps[2].0.state.position, Position::new(1, 0));
    }

    #[test]
    fn test_batches_have_expected_shapes() -> Result<()> {
        let ex = example();
        let vocabulary = Vocabulary::from_words(["go", "right"].map(String::from))?;
        let device = Device::Cpu;

        let plan = plan_batch(&[&ex, &ex], &vocabulary, &game(), 3, &device)?;
        assert_eq!(plan.cells.dims(), &[2, 4, CELL_FEATURE_DIM]);
        assert_eq!(plan.instruction.tokens.dims(), &[2, 3]);

        let targets = plan_targets(&[&ex], &game(), &device)?;
        assert_eq!(targets.trajectory.to_vec2::<f32>()?, vec![vec![1.0, 1.0, 0.0, 0.0]]);
        assert_eq!(targets.goal.to_vec1::<u32>()?, vec![1]);

        let steps: Vec<DecodingStep> = gold_steps(&[&ex], &game()).into_iter().map(|(s, _)| s).collect();
        let batch = action_batch(&steps, &vocabulary, &game(), 8, 5, &device)?;
        assert_eq!(batch.state.dims(), &[3, STATE_FEATURE_DIM]);
        assert_eq!(batch.previous_action.to_vec1::<u32>()?, vec![5, 3, 0]);
        Ok(())
    }
}
