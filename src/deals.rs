use crate::board::Board;

use anyhow::{Context, Result};
use clap::ValueEnum;

/// Deals shipped with the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuiltinDeal {
    Easy,
    #[value(name = "challenge-9")]
    Challenge9,
    #[value(name = "challenge-19")]
    Challenge19,
}

impl BuiltinDeal {
    pub const ALL: [BuiltinDeal; 3] = [
        BuiltinDeal::Easy,
        BuiltinDeal::Challenge9,
        BuiltinDeal::Challenge19,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinDeal::Easy => "easy",
            BuiltinDeal::Challenge9 => "challenge-9",
            BuiltinDeal::Challenge19 => "challenge-19",
        }
    }

    pub fn content(self) -> &'static str {
        match self {
            BuiltinDeal::Easy => include_str!("../deals/easy.txt"),
            BuiltinDeal::Challenge9 => include_str!("../deals/challenge-9.txt"),
            BuiltinDeal::Challenge19 => include_str!("../deals/challenge-19.txt"),
        }
    }

    pub fn board(self) -> Result<Board> {
        Board::parse(self.content())
            .with_context(|| format!("Failed to parse built-in deal `{}`", self.name()))
    }
}
