//! Memoized best-first search over any [`Engine`].

mod memo;

pub use memo::MemoTable;

use crate::engine::{END, Engine, START, Score};

use anyhow::{Context, Result};
use log::{Level, debug, info, log_enabled, warn};
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    time::{Duration, Instant},
};

const DEFAULT_MEMO_CAPACITY: usize = 10_000;
const DEFAULT_PROGRESS_INTERVAL: usize = 10_000;
const PROGRESS_LAST_MOVES: usize = 20;

#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Positions to expand before giving up, 0 for no limit.
    pub max_steps: usize,
    pub memo_capacity: usize,
    /// Steps between progress reports, 0 for none.
    pub progress_interval: usize,
    /// Return the first winning line instead of draining the frontier.
    pub stop_at_first_win: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_steps: 0,
            memo_capacity: DEFAULT_MEMO_CAPACITY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            stop_at_first_win: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution<M> {
    pub moves: Vec<M>,
    pub score: Score,
}

impl<M> Solution<M> {
    pub fn move_count(&self) -> usize {
        self.moves.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome<M> {
    /// A winning line was found.
    Solved(Solution<M>),
    /// The step budget ran out; carries the line being expanded at that point.
    Exhausted(Solution<M>),
    NotFound,
}

impl<M> SolveOutcome<M> {
    pub fn is_solved(&self) -> bool {
        matches!(self, SolveOutcome::Solved(_))
    }

    pub fn solution(&self) -> Option<&Solution<M>> {
        match self {
            SolveOutcome::Solved(solution) | SolveOutcome::Exhausted(solution) => Some(solution),
            SolveOutcome::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchStats {
    pub steps: usize,
    /// Entries left in the memo table.
    pub seen: usize,
    /// Children dropped because their position was already in the memo table.
    pub avoided: usize,
    /// Memo entries that were reached again by a shorter line.
    pub improved: usize,
    pub winners: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct SolveResult<M> {
    pub outcome: SolveOutcome<M>,
    pub stats: SearchStats,
}

pub fn solve<E: Engine>(
    initial: &E::State,
    max_steps: usize,
    engine: &E,
) -> Result<SolveResult<E::Move>> {
    let config = SolverConfig {
        max_steps,
        ..Default::default()
    };
    solve_with_config(initial, &config, engine)
}

pub fn solve_with_config<E: Engine>(
    initial: &E::State,
    config: &SolverConfig,
    engine: &E,
) -> Result<SolveResult<E::Move>> {
    Search::new(initial, config, engine).run()
}

/// Describes a line: header, moves and the board it ends on.
pub fn debug_solution<E: Engine>(
    solution: &Solution<E::Move>,
    initial: &E::State,
    engine: &E,
    omit_moves: bool,
    last_moves: Option<usize>,
) -> Result<String> {
    let mut output = format!("{} moves, score {}\n", solution.move_count(), solution.score);
    if !omit_moves {
        let skip = match last_moves {
            Some(last) => solution.moves.len().saturating_sub(last),
            None => 0,
        };
        let lines: Vec<String> = solution.moves[skip..]
            .iter()
            .map(|mov| engine.describe_move(mov))
            .collect();
        output.push_str(&lines.join("\n"));
        output.push_str("\n\n");
    }

    let states = replay_solution(&solution.moves, initial, engine)?;
    let last = states.last().unwrap_or(initial);
    output.push_str(&engine.describe_state(last));
    Ok(output)
}

/// Positions reached after each move, in order.
pub fn replay_solution<E: Engine>(
    moves: &[E::Move],
    initial: &E::State,
    engine: &E,
) -> Result<Vec<E::State>> {
    let mut states: Vec<E::State> = Vec::with_capacity(moves.len());
    for (i, mov) in moves.iter().enumerate() {
        let state = states.last().unwrap_or(initial);
        let next = engine.apply_move_to_state(mov, state).with_context(|| {
            format!("Failed to replay move {}: {}", i + 1, engine.describe_move(mov))
        })?;
        states.push(next);
    }
    Ok(states)
}

#[derive(Debug)]
struct Node<S, M> {
    /// Dropped once the node has been expanded.
    state: Option<S>,
    moves: usize,
    score: Score,
    previous: Option<usize>,
    last_move: Option<M>,
}

/// Frontier entry. The greatest entry is expanded first.
#[derive(Debug, Clone, Copy)]
struct OpenNode {
    score: Score,
    moves: usize,
    sequence: usize,
    index: usize,
}

impl OpenNode {
    fn rank(&self) -> (bool, Score) {
        (self.score == END, self.score)
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        let (self_end, self_score) = self.rank();
        let (other_end, other_score) = other.rank();
        self_end
            .cmp(&other_end)
            .then_with(|| self_score.total_cmp(&other_score))
            .then_with(|| other.moves.cmp(&self.moves))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

struct Search<'a, E: Engine> {
    engine: &'a E,
    config: &'a SolverConfig,
    initial: &'a E::State,
    nodes: Vec<Node<E::State, E::Move>>,
    open: BinaryHeap<OpenNode>,
    memo: MemoTable<E::Key, usize>,
    winners: Vec<usize>,
    sequence: usize,
    best_reported: Option<usize>,
    stats: SearchStats,
}

impl<'a, E: Engine> Search<'a, E> {
    fn new(initial: &'a E::State, config: &'a SolverConfig, engine: &'a E) -> Self {
        Self {
            engine,
            config,
            initial,
            nodes: vec![],
            open: BinaryHeap::new(),
            memo: MemoTable::new(config.memo_capacity),
            winners: vec![],
            sequence: 0,
            best_reported: None,
            stats: SearchStats::default(),
        }
    }

    fn run(mut self) -> Result<SolveResult<E::Move>> {
        let timer = Instant::now();

        self.memo.insert(self.engine.encode_state(self.initial), 0);
        self.push_node(Node {
            state: Some(self.initial.clone()),
            moves: 0,
            score: START,
            previous: None,
            last_move: None,
        });

        while let Some(entry) = self.open.pop() {
            let current = entry.index;
            if let Some(winner) = self.expand(current)? {
                let outcome = SolveOutcome::Solved(self.solution(winner));
                return Ok(self.finish(outcome, timer));
            }

            self.stats.steps += 1;
            if self.config.progress_interval > 0
                && self.stats.steps % self.config.progress_interval == 0
            {
                self.report_progress(current)?;
            }

            if self.config.max_steps > 0 && self.stats.steps >= self.config.max_steps {
                warn!(
                    "Quitting after {} steps with {} open positions",
                    self.stats.steps,
                    self.open.len()
                );
                let outcome = SolveOutcome::Exhausted(self.solution(current));
                return Ok(self.finish(outcome, timer));
            }
        }

        let outcome = match self.best_winner() {
            Some(winner) => SolveOutcome::Solved(self.solution(winner)),
            None => {
                info!("Failed to find a solution after {} steps", self.stats.steps);
                SolveOutcome::NotFound
            }
        };
        Ok(self.finish(outcome, timer))
    }

    /// Expands one node. Returns a winner when the search should stop on it.
    fn expand(&mut self, current: usize) -> Result<Option<usize>> {
        let Some(state) = self.nodes[current].state.take() else {
            return Ok(None);
        };
        let moves = self.nodes[current].moves + 1;

        let mut children = vec![];
        for mov in self.engine.moves_for_state(&state) {
            let next = self
                .engine
                .apply_move_to_state(&mov, &state)
                .with_context(|| format!("Failed to apply {}", self.engine.describe_move(&mov)))?;
            let key = self.engine.encode_state(&next);

            if let Some(seen) = self.memo.get(&key).copied() {
                let node = &mut self.nodes[seen];
                if node.moves > moves {
                    node.moves = moves;
                    node.previous = Some(current);
                    node.last_move = Some(mov);
                    self.stats.improved += 1;
                }
                self.stats.avoided += 1;
                continue;
            }

            let score = self.engine.score_for_state(&next);
            let index = self.nodes.len();
            let won = score == END;
            self.nodes.push(Node {
                state: (!won).then_some(next),
                moves,
                score,
                previous: Some(current),
                last_move: Some(mov),
            });
            self.memo.insert(key, index);

            if won {
                self.winners.push(index);
                if self.config.stop_at_first_win {
                    return Ok(Some(index));
                }
            } else {
                children.push(index);
            }
        }

        for index in children {
            self.push_open(index);
        }
        Ok(None)
    }

    fn push_node(&mut self, node: Node<E::State, E::Move>) {
        let index = self.nodes.len();
        self.nodes.push(node);
        self.push_open(index);
    }

    fn push_open(&mut self, index: usize) {
        let node = &self.nodes[index];
        self.open.push(OpenNode {
            score: node.score,
            moves: node.moves,
            sequence: self.sequence,
            index,
        });
        self.sequence += 1;
    }

    /// Fewest moves wins, the earliest discovered on a tie.
    fn best_winner(&self) -> Option<usize> {
        self.winners
            .iter()
            .copied()
            .min_by_key(|&index| self.nodes[index].moves)
    }

    fn solution(&self, index: usize) -> Solution<E::Move> {
        let mut moves = vec![];
        let mut cursor = Some(index);
        while let Some(i) = cursor {
            let node = &self.nodes[i];
            if let Some(mov) = &node.last_move {
                moves.push(mov.clone());
            }
            cursor = node.previous;
        }
        moves.reverse();
        Solution {
            moves,
            score: self.nodes[index].score,
        }
    }

    fn report_progress(&mut self, current: usize) -> Result<()> {
        let best = self.best_winner();
        info!(
            "{} steps, {} open, {} seen ({} avoided, {} improved), {} winners (best moves {})",
            self.stats.steps,
            self.open.len(),
            self.memo.len(),
            self.stats.avoided,
            self.stats.improved,
            self.winners.len(),
            self.best_reported.unwrap_or_default(),
        );

        if let Some(best) = best {
            let best_moves = self.nodes[best].moves;
            if self.best_reported.is_none_or(|reported| best_moves < reported) {
                info!("Best move is {best_moves}");
                if log_enabled!(Level::Debug) {
                    let solution = self.solution(best);
                    debug!(
                        "{}",
                        debug_solution(&solution, self.initial, self.engine, false, None)?
                    );
                }
                self.best_reported = Some(best_moves);
            }
        }

        if log_enabled!(Level::Debug) {
            let solution = self.solution(current);
            debug!(
                "Current solution\n{}",
                debug_solution(
                    &solution,
                    self.initial,
                    self.engine,
                    false,
                    Some(PROGRESS_LAST_MOVES)
                )?
            );
        }
        Ok(())
    }

    fn finish(mut self, outcome: SolveOutcome<E::Move>, timer: Instant) -> SolveResult<E::Move> {
        self.stats.seen = self.memo.len();
        self.stats.winners = self.winners.len();
        self.stats.elapsed = timer.elapsed();
        SolveResult {
            outcome,
            stats: self.stats,
        }
    }
}
