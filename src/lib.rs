pub mod action;
pub mod board;
pub mod deals;
pub mod engine;
pub mod logger;
pub mod rules;
pub mod solver;

pub use engine::{END, Engine, START, Score};
pub use rules::ChurchillEngine;
pub use solver::{SolveOutcome, SolveResult, Solution, SolverConfig, solve, solve_with_config};
