//! Game - board geometry, agent state and the deterministic simulator

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::GameArgs;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    North,
    East,
    South,
    West,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [Rotation::North, Rotation::East, Rotation::South, Rotation::West];

    pub fn index(self) -> usize {
        match self {
            Rotation::North => 0,
            Rotation::East => 1,
            Rotation::South => 2,
            Rotation::West => 3,
        }
    }

    fn offset(self) -> (i32, i32) {
        match self {
            Rotation::North => (0, -1),
            Rotation::East => (1, 0),
            Rotation::South => (0, 1),
            Rotation::West => (-1, 0),
        }
    }

    fn left(self) -> Self {
        Self::ALL[(self.index() + 3) % 4]
    }

    fn right(self) -> Self {
        Self::ALL[(self.index() + 1) % 4]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    Stop,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Forward,
        Action::Backward,
        Action::TurnLeft,
        Action::TurnRight,
        Action::Stop,
    ];
    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        match self {
            Action::Forward => 0,
            Action::Backward => 1,
            Action::TurnLeft => 2,
            Action::TurnRight => 3,
            Action::Stop => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentState {
    pub position: Position,
    pub rotation: Rotation,
}

impl GameArgs {
    pub fn num_cells(&self) -> usize {
        self.board_width * self.board_height
    }

    pub fn in_bounds(&self, p: Position) -> bool {
        p.x >= 0 && p.y >= 0 && (p.x as usize) < self.board_width && (p.y as usize) < self.board_height
    }

    /// Row-major cell index of an on-board position.
    pub fn cell_index(&self, p: Position) -> usize {
        p.y as usize * self.board_width + p.x as usize
    }

    pub fn cell_position(&self, index: usize) -> Position {
        Position::new((index % self.board_width) as i32, (index / self.board_width) as i32)
    }
}

/// Executes one action. Blocked moves leave the agent in place.
pub fn step(state: AgentState, action: Action, game: &GameArgs, obstacles: &[Position]) -> AgentState {
    let (dx, dy) = state.rotation.offset();
    let target = match action {
        Action::Forward => Position::new(state.position.x + dx, state.position.y + dy),
        Action::Backward => Position::new(state.position.x - dx, state.position.y - dy),
        Action::TurnLeft => {
            return AgentState {
                rotation: state.rotation.left(),
                ..state
            }
        }
        Action::TurnRight => {
            return AgentState {
                rotation: state.rotation.right(),
                ..state
            }
        }
        Action::Stop => return state,
    };

    if game.in_bounds(target) && !obstacles.contains(&target) {
        AgentState {
            position: target,
            ..state
        }
    } else {
        state
    }
}

/// Every state visited while executing `actions`, starting with `initial`.
/// Execution ends at the first `Stop`.
pub fn trajectory(
    initial: AgentState,
    actions: &[Action],
    game: &GameArgs,
    obstacles: &[Position],
) -> Vec<AgentState> {
    let mut states = Vec::with_capacity(actions.len() + 1);
    states.push(initial);
    let mut current = initial;
    for &action in actions {
        if action == Action::Stop {
            break;
        }
        current = step(current, action, game, obstacles);
        states.push(current);
    }
    states
}
