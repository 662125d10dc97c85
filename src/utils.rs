use anyhow::{Result, bail};
use churchill_solver::{
    ChurchillEngine,
    action::{Action, describe_action, format_actions},
    board::Board,
    solver::{
        SearchStats, SolveOutcome, SolveResult, Solution, SolverConfig, debug_solution,
        replay_solution, solve_with_config,
    },
};
use log::{LevelFilter, info};

use std::{
    io::{IsTerminal, Write, stderr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

const SPINNER_CHARS: [char; 4] = ['|', '/', '-', '\\'];

pub fn do_solve(board: &Board, config: &SolverConfig, replay: bool) -> Result<()> {
    println!("{}\n", board.pretty_print());
    let engine = ChurchillEngine::new();
    let SolveResult { outcome, stats } = with_spinner("Solving the deal...", || {
        solve_with_config(board, config, &engine)
    })?;
    let SearchStats {
        steps,
        seen,
        avoided,
        improved,
        winners,
        elapsed,
    } = stats;
    let elapsed_str = format_elapsed(elapsed);
    info!("{seen} seen ({avoided} avoided, {improved} improved), {winners} winners");

    match outcome {
        SolveOutcome::Solved(solution) => {
            println!(
                "✓ Solved in {}. Time: {elapsed_str}, Steps: {steps}\n",
                count_moves(&solution.moves)
            );
            if replay {
                print_replay(&solution, board, &engine)?;
            }
            println!("{}", format_actions(&solution.moves));
        }
        SolveOutcome::Exhausted(solution) => {
            println!(
                "✗ Gave up after {steps} steps. Time: {elapsed_str}, Winners so far: {winners}\n"
            );
            println!("{}\n", debug_solution(&solution, board, &engine, true, None)?);
            if replay {
                print_replay(&solution, board, &engine)?;
            }
            println!("{}", format_actions(&solution.moves));
            println!(
                "Position reached, save it to continue from there:\n\n{}",
                reached_notation(&solution, board, &engine)?
            );
        }
        SolveOutcome::NotFound => bail!("No solution found after {steps} steps."),
    }
    Ok(())
}

fn count_moves(actions: &[Action]) -> String {
    let deal_count = actions.iter().filter(|a| a.is_deal()).count();
    let mut output = format!("{} Moves", actions.len() - deal_count);
    match deal_count {
        0 => {}
        1 => output.push_str(", 1 Deal"),
        n => output.push_str(&format!(", {n} Deals")),
    }
    output
}

/// Deal file text of the board a line ends on.
fn reached_notation(
    solution: &Solution<Action>,
    board: &Board,
    engine: &ChurchillEngine,
) -> Result<String> {
    let states = replay_solution(&solution.moves, board, engine)?;
    Ok(states.last().unwrap_or(board).to_notation())
}

fn print_replay(
    solution: &Solution<Action>,
    board: &Board,
    engine: &ChurchillEngine,
) -> Result<()> {
    let states = replay_solution(&solution.moves, board, engine)?;
    for (i, (action, state)) in solution.moves.iter().zip(&states).enumerate() {
        println!("{:>3}. {}\n{}\n", i + 1, describe_action(action), state.pretty_print());
    }
    Ok(())
}

/// Progress logs share stderr, so the spinner only runs when they are off.
fn spinner_enabled() -> bool {
    stderr().is_terminal() && log::max_level() <= LevelFilter::Warn
}

/// Spins on stderr until dropped.
struct Spinner {
    spinning: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    fn start(message: &str) -> Self {
        let spinning = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&spinning);
        let message = message.to_string();

        let handle = thread::spawn(move || {
            let mut out = stderr().lock();
            let _ = write!(out, "\x1b[?25l"); // hide cursor
            for spinner_char in SPINNER_CHARS.iter().cycle() {
                if !flag.load(Ordering::Relaxed) {
                    break;
                }
                let _ = write!(out, "\r{spinner_char} {message}");
                let _ = out.flush();
                thread::sleep(Duration::from_millis(100));
            }
            let _ = write!(out, "\r\x1b[2K\r\x1b[?25h"); // clear line and show cursor
            let _ = out.flush();
        });

        Self {
            spinning,
            handle: Some(handle),
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.spinning.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn with_spinner<T, F: FnOnce() -> T>(message: &str, f: F) -> T {
    let _spinner = spinner_enabled().then(|| Spinner::start(message));
    f()
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 90 {
        format!("{secs}.{:03}s", elapsed.subsec_millis())
    } else {
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use churchill_solver::deals::BuiltinDeal;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(1_234)), "1.234s");
        assert_eq!(format_elapsed(Duration::from_secs(89)), "89.000s");
        assert_eq!(format_elapsed(Duration::from_secs(150)), "2m 30s");
    }

    #[test]
    fn test_count_moves() {
        assert_eq!(count_moves(&[]), "0 Moves");
        assert_eq!(count_moves(&[Action::Deal]), "0 Moves, 1 Deal");
        assert_eq!(count_moves(&[Action::Deal, Action::Deal]), "0 Moves, 2 Deals");
    }

    #[test]
    fn test_spinner_stops_when_dropped() {
        assert_eq!(with_spinner("Working...", || 42), 42);
        let spinner = Spinner::start("Working...");
        drop(spinner);
    }

    #[test]
    fn test_reached_notation() {
        let engine = ChurchillEngine::new();
        let board = BuiltinDeal::Easy.board().unwrap();
        let solution = Solution {
            moves: vec![Action::Deal],
            score: 0.0,
        };
        let text = reached_notation(&solution, &board, &engine).unwrap();
        let reached = Board::parse(&text).unwrap();
        let dealt = board.stacks.iter().filter(|s| !s.is_led_by_king()).count();
        assert_eq!(dealt, 9);
        assert_eq!(reached.stock.len(), board.stock.len() - dealt);
        reached.validate().unwrap();

        let empty = Solution {
            moves: vec![],
            score: 0.0,
        };
        assert_eq!(reached_notation(&empty, &board, &engine).unwrap(), board.to_notation());
    }
}
