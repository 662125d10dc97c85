mod utils;

use crate::utils::*;

use anyhow::{Context, Result, bail};
use churchill_solver::{board::Board, deals::BuiltinDeal, logger, solver::SolverConfig};
use clap::{ArgAction, Parser};

use std::{
    io::{IsTerminal, Read, stdin},
    path::PathBuf,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Solve one of the built-in deals
    #[arg(short, long, value_enum, value_name = "DEAL")]
    deal: Option<BuiltinDeal>,
    /// Positions to expand before giving up (0 for no limit)
    #[arg(short = 's', long, default_value_t = 0, value_name = "NUM")]
    max_steps: usize,
    /// Positions remembered for duplicate detection
    #[arg(long, default_value_t = SolverConfig::default().memo_capacity, value_name = "NUM")]
    memo_capacity: usize,
    /// Stop at the first winning line (may not be the shortest)
    #[arg(short, long)]
    fast: bool,
    /// Preview the initial board without solving
    #[arg(short, long)]
    preview: bool,
    /// Print every board along the solution
    #[arg(short, long)]
    replay: bool,
    /// Log search progress (-v), the lines being expanded (-vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Path to a deal file to solve
    file: Option<PathBuf>,
}

fn main() -> Result<()> {
    let Cli {
        deal,
        max_steps,
        memo_capacity,
        fast,
        preview,
        replay,
        verbose,
        file,
    } = Cli::parse();

    logger::init(logger::level_for_verbosity(verbose)).context("Failed to install logger")?;

    let board = if let Some(file) = file {
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        Board::parse(&content).context("Failed to parse deal")?
    } else if let Some(deal) = deal {
        deal.board()?
    } else if !stdin().is_terminal() {
        let mut content = String::new();
        stdin()
            .read_to_string(&mut content)
            .context("Failed to read from stdin")?;
        Board::parse(&content).context("Failed to parse deal")?
    } else {
        bail!("No deal `file` or `--deal` provided.");
    };
    board.validate().context("Invalid initial board state.")?;

    if preview {
        println!("{}", board.pretty_print());
        return Ok(());
    }

    let config = SolverConfig {
        max_steps,
        memo_capacity,
        stop_at_first_win: fast,
        ..Default::default()
    };
    do_solve(&board, &config, replay)
}
