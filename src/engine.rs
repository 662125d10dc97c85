//! The seam between the generic solver and a game's rules.

use anyhow::Result;

use std::hash::Hash;

pub type Score = f64;

/// Score given to the starting position.
pub const START: Score = 0.0;

/// Reserved for won or provably dead positions; never produced by a heuristic.
pub const END: Score = 1_000_000.0;

pub trait Engine {
    type State: Clone;
    type Move: Clone;
    /// Canonical encoding of a state, equal exactly when the states are equal in value.
    type Key: Hash + Eq + Clone;

    fn moves_for_state(&self, state: &Self::State) -> Vec<Self::Move>;

    fn score_for_state(&self, state: &Self::State) -> Score;

    /// Builds the successor state. Never touches `state`.
    fn apply_move_to_state(&self, mov: &Self::Move, state: &Self::State) -> Result<Self::State>;

    fn encode_state(&self, state: &Self::State) -> Self::Key;

    fn describe_state(&self, state: &Self::State) -> String;

    fn describe_move(&self, mov: &Self::Move) -> String;
}
