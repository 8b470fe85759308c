//! Instruction examples and the games that contain them

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::GameArgs;
use crate::game::{self, Action, AgentState, Position};

/// One natural-language instruction with its gold action sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstructionExample {
    pub example_id: String,
    pub instruction: String,
    pub initial_state: AgentState,
    #[serde(default)]
    pub obstacles: Vec<Position>,
    /// Gold actions. A trailing `Stop` is implicit.
    pub target_actions: Vec<Action>,
}

impl InstructionExample {
    /// Gold actions up to the first `Stop`, followed by exactly one `Stop`.
    pub fn actions_with_stop(&self) -> Vec<Action> {
        let mut actions: Vec<Action> = self
            .target_actions
            .iter()
            .copied()
            .take_while(|&a| a != Action::Stop)
            .collect();
        actions.push(Action::Stop);
        actions
    }

    /// States visited by the gold actions, starting with the initial state.
    pub fn trajectory(&self, game: &GameArgs) -> Vec<AgentState> {
        game::trajectory(self.initial_state, &self.target_actions, game, &self.obstacles)
    }

    pub fn final_state(&self, game: &GameArgs) -> AgentState {
        *self
            .trajectory(game)
            .last()
            .unwrap_or(&self.initial_state)
    }

    /// Distinct cells on the gold trajectory.
    pub fn plan_cells(&self, game: &GameArgs) -> BTreeSet<usize> {
        self.trajectory(game)
            .iter()
            .map(|s| game.cell_index(s.position))
            .collect()
    }

    /// Cell where the gold trajectory ends.
    pub fn goal_cell(&self, game: &GameArgs) -> usize {
        game.cell_index(self.final_state(game).position)
    }

    pub fn validate(&self, game: &GameArgs) -> Result<()> {
        if !game.in_bounds(self.initial_state.position) {
            anyhow::bail!(
                "Example {} starts off the board at {}",
                self.example_id,
                self.initial_state.position
            );
        }
        if let Some(p) = self.obstacles.iter().find(|p| !game.in_bounds(**p)) {
            anyhow::bail!("Example {} has an obstacle off the board at {}", self.example_id, p);
        }
        if self.obstacles.contains(&self.initial_state.position) {
            anyhow::bail!("Example {} starts on an obstacle", self.example_id);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub examples: Vec<InstructionExample>,
}
