//! Rules of Churchill patience: move generation, scoring and move application.

use crate::action::{Action, describe_action};
use crate::board::{Board, Card, ObjectId, Stack, TOTAL_CARDS, TOTAL_FOUNDATIONS, TOTAL_STACKS};
use crate::engine::{END, Engine, Score};

use anyhow::{Context, Result, bail};
use log::trace;
use smallvec::SmallVec;

const FOUNDATION_FACTOR: Score = 3.0;
/// A deal puts ~10 cards out and at worst starts 10 new runs.
const STOCK_FACTOR: Score = 1.5;
const DEVILS_FACTOR: Score = 1.0;
const KING_RUN_FACTOR: Score = 2.0;
const RUN_FACTOR: Score = 2.0;
const CLOSED_CARD_FACTOR: Score = 2.0;

const OPEN_SEPARATOR: u8 = 0xfe;
const PILE_SEPARATOR: u8 = 0xff;

/// Value-only encoding of a board. Card identities and exclusions are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey(Box<[u8]>);

impl StateKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChurchillEngine;

impl ChurchillEngine {
    pub fn new() -> Self {
        Self
    }

    fn compute_column_moves(&self, board: &Board, possible_moves: &mut Vec<Action>) {
        for (from, stack) in board.stacks.iter().enumerate() {
            let open_len = stack.open.len();
            for count in 1..=stack.run_length() {
                let card = stack.open[open_len - count];
                let excluded = board.exclusions.get(&card.id());

                let mut targets: SmallVec<[(usize, Option<Card>, ObjectId); TOTAL_STACKS]> =
                    SmallVec::new();
                for (to, target) in board.stacks.iter().enumerate() {
                    if to == from {
                        continue;
                    }
                    let onto = target.peek_top().copied();
                    let stackable = match &onto {
                        Some(onto) => card.stacks_onto(onto),
                        None => card.is_king(),
                    };
                    if !stackable {
                        continue;
                    }
                    let destination = target.destination_id();
                    if excluded.is_some_and(|list| list.contains(&destination)) {
                        trace!("Skipping excluded move of {card} to #{}", to + 1);
                        continue;
                    }
                    targets.push((to, onto, destination));
                }

                let origin = origin_id(stack, count);
                for &(to, onto, _) in &targets {
                    let mut exclude: SmallVec<[ObjectId; 4]> = targets
                        .iter()
                        .filter(|(other, _, _)| *other != to)
                        .map(|&(_, _, destination)| destination)
                        .collect();
                    exclude.push(origin);
                    possible_moves.push(Action::Column {
                        from,
                        to,
                        count,
                        card,
                        onto,
                        exclude,
                    });
                }
            }
        }
    }
}

impl Engine for ChurchillEngine {
    type State = Board;
    type Move = Action;
    type Key = StateKey;

    fn moves_for_state(&self, board: &Board) -> Vec<Action> {
        let mut possible_moves = Vec::new();

        if !board.stock.is_empty() {
            if board.stacks.iter().any(|stack| !stack.is_led_by_king()) {
                possible_moves.push(Action::Deal);
            } else {
                trace!("No stack can take a dealt card");
            }
        }

        // Banking an Ace never hurts, so it is the only move offered.
        if let Some(&card) = board.devils.last()
            && board.foundation_slot_for(&card).is_some()
        {
            if card.is_ace() {
                return vec![Action::Devil(card)];
            }
            possible_moves.push(Action::Devil(card));
        }

        for (from, stack) in board.stacks.iter().enumerate() {
            if let Some(&card) = stack.peek_top()
                && board.foundation_slot_for(&card).is_some()
            {
                let mov = Action::Foundation { from, card };
                if card.is_ace() {
                    return vec![mov];
                }
                possible_moves.push(mov);
            }
        }

        self.compute_column_moves(board, &mut possible_moves);
        possible_moves
    }

    fn score_for_state(&self, board: &Board) -> Score {
        if board.is_complete() || board.has_uncovered_unknown() {
            return END;
        }

        let foundations = board.foundation_score() as Score;
        let king_runs: usize = board
            .stacks
            .iter()
            .filter(|stack| stack.is_led_by_king())
            .map(|stack| stack.open.len())
            .sum();
        let runs: usize = board.stacks.iter().map(Stack::count_runs).sum();
        let closed: usize = board.stacks.iter().map(|stack| stack.closed.len()).sum();

        let mut score = foundations * FOUNDATION_FACTOR
            - board.stock.len() as Score * STOCK_FACTOR
            - board.devils.len() as Score * DEVILS_FACTOR
            + king_runs as Score * KING_RUN_FACTOR
            - runs as Score * RUN_FACTOR
            - closed as Score * CLOSED_CARD_FACTOR;

        if score == END {
            score -= 1.0;
        }
        score
    }

    fn apply_move_to_state(&self, mov: &Action, board: &Board) -> Result<Board> {
        let mut board = board.clone();
        match mov {
            Action::Deal => {
                if board.stock.is_empty() {
                    bail!("Deal with an empty stock");
                }
                for stack in board.stacks.iter_mut() {
                    if stack.is_led_by_king() {
                        continue;
                    }
                    let Some(card) = board.stock.pop() else {
                        break;
                    };
                    stack.open.push(card);
                }
                board.exclusions.clear();
            }
            Action::Devil(card) => {
                let top = board.devils.pop().context("Devil move with an empty devil's row")?;
                if top.id() != card.id() {
                    bail!("Devil move expected {card} but found {top}");
                }
                bank(&mut board, top)?;
            }
            Action::Foundation { from, card } => {
                let stack = board
                    .stacks
                    .get_mut(*from)
                    .with_context(|| format!("No stack #{}", from + 1))?;
                let top = stack
                    .open
                    .pop()
                    .with_context(|| format!("Foundation move from empty stack #{}", from + 1))?;
                if top.id() != card.id() {
                    bail!("Foundation move expected {card} but found {top}");
                }
                stack.reveal();
                bank(&mut board, top)?;
            }
            Action::Column {
                from,
                to,
                count,
                card,
                exclude,
                ..
            } => {
                let total = board.stacks.len();
                if from == to || *from >= total || *to >= total {
                    bail!("Invalid column move from #{} to #{}", from + 1, to + 1);
                }
                let source = &mut board.stacks[*from];
                let open_len = source.open.len();
                if *count == 0 || *count > open_len {
                    bail!("Column move of {count} cards from a stack with {open_len} open cards");
                }
                let moved: SmallVec<[Card; 16]> = source.open.drain(open_len - count..).collect();
                if moved[0].id() != card.id() {
                    bail!("Column move expected {card} but found {}", moved[0]);
                }
                source.reveal();
                board.stacks[*to].open.extend(moved);

                let excluded = board.exclusions.entry(card.id()).or_default();
                for &id in exclude {
                    if !excluded.contains(&id) {
                        excluded.push(id);
                    }
                }
            }
        }
        Ok(board)
    }

    fn encode_state(&self, board: &Board) -> StateKey {
        let mut key =
            Vec::with_capacity(TOTAL_CARDS + TOTAL_FOUNDATIONS + 2 * board.stacks.len() + 2);
        key.extend(board.stock.iter().map(Card::code));
        key.push(PILE_SEPARATOR);
        key.extend(board.devils.iter().map(Card::code));
        key.push(PILE_SEPARATOR);
        key.extend(board.foundations.iter().map(Card::code));
        for stack in &board.stacks {
            key.extend(stack.closed.iter().map(Card::code));
            key.push(OPEN_SEPARATOR);
            key.extend(stack.open.iter().map(Card::code));
            key.push(PILE_SEPARATOR);
        }
        StateKey(key.into_boxed_slice())
    }

    fn describe_state(&self, board: &Board) -> String {
        board.pretty_print()
    }

    fn describe_move(&self, mov: &Action) -> String {
        describe_action(mov)
    }
}

/// Identity the run would have to be moved onto to go straight back.
fn origin_id(stack: &Stack, count: usize) -> ObjectId {
    let below = stack.open.len() - count;
    if below > 0 {
        stack.open[below - 1].id()
    } else if let Some(card) = stack.closed.last() {
        card.id()
    } else {
        stack.id
    }
}

fn bank(board: &mut Board, card: Card) -> Result<()> {
    let slot = board
        .foundation_slot_for(&card)
        .with_context(|| format!("Failed to bank {card}: no foundation takes it"))?;
    board.foundations[slot] = card;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Deal, IdAllocator, Rank};

    fn board(stock: &str, devils: &str, foundations: Option<&str>, stacks: &[&str]) -> Board {
        Board::from_deal(&Deal {
            stock: stock.to_string(),
            devils: devils.to_string(),
            foundations: foundations.map(str::to_string),
            stacks: stacks.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    fn stacks(stacks: &[&str]) -> Board {
        board("", "", None, stacks)
    }

    fn column(mov: &Action) -> (usize, usize, usize) {
        match mov {
            Action::Column {
                from, to, count, ..
            } => (*from, *to, *count),
            other => panic!("Expected a column move, found {other:?}"),
        }
    }

    fn renumbered(board: &Board, offset: ObjectId) -> Board {
        let shift = |card: &Card| Card::new(card.id() + offset, card.rank(), card.suit());
        let mut board = board.clone();
        for card in board.stock.iter_mut().chain(board.devils.iter_mut()) {
            *card = shift(card);
        }
        for card in board.foundations.iter_mut() {
            *card = shift(card);
        }
        for stack in board.stacks.iter_mut() {
            stack.id += offset;
            for card in stack.closed.iter_mut().chain(stack.open.iter_mut()) {
                *card = shift(card);
            }
        }
        board
    }

    #[test]
    fn test_move_to_foundation() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["|AH"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert!(matches!(moves[0], Action::Foundation { from: 0, .. }));

        let next = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert!(next.stacks[0].open.is_empty());
        assert_eq!(next.foundations[0].rank(), Rank::ACE);
    }

    #[test]
    fn test_move_to_foundation_reveals_closed_card() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["9D|AH"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);

        let next = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert!(next.stacks[0].closed.is_empty());
        assert_eq!(next.stacks[0].open.len(), 1);
        assert_eq!(next.stacks[0].open[0].notation(), "9D");
        assert_eq!(next.foundations[0].notation(), "AH");
    }

    #[test]
    fn test_devil_move() {
        let engine = ChurchillEngine::new();
        let initial = board("", "AD", None, &[]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert!(matches!(moves[0], Action::Devil(_)));

        let next = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert!(next.devils.is_empty());
        assert_eq!(next.foundations[1].rank(), Rank::ACE);
    }

    #[test]
    fn test_ace_discards_every_other_move() {
        let engine = ChurchillEngine::new();
        let initial = board("2S 3S", "2H", Some("AH ?D ?C ?S ?H ?D ?C ?S"), &[
            "|8C",
            "|9D",
            "5C|AS",
        ]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert!(matches!(moves[0], Action::Foundation { from: 2, .. }));

        let initial = board("2S 3S", "AC", None, &["|8C", "|9D", "5C|AS"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert!(matches!(moves[0], Action::Devil(_)));
    }

    #[test]
    fn test_move_order() {
        let engine = ChurchillEngine::new();
        let initial = board("2S", "2H", Some("AH ?D ?C ?S ?H ?D ?C ?S"), &["|8C", "|9D", "|2H"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 4);
        assert!(moves[0].is_deal());
        assert!(matches!(moves[1], Action::Devil(_)));
        assert!(matches!(moves[2], Action::Foundation { from: 2, .. }));
        assert!(matches!(moves[3], Action::Column { .. }));
    }

    #[test]
    fn test_column_move() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["|8C", "|9D", "|XH 9S", "|XC 9H"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 2);
        assert_eq!(column(&moves[0]), (0, 1, 1));
        assert_eq!(column(&moves[1]), (0, 3, 1));

        let next = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert!(next.stacks[0].open.is_empty());
        assert_eq!(next.stacks[1].open.len(), 2);
    }

    #[test]
    fn test_column_move_exclusions() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["|8C", "|9D", "|XH 9S", "|XC 9H"]);
        let moves = engine.moves_for_state(&initial);
        let Action::Column { card, exclude, .. } = &moves[0] else {
            panic!("Expected a column move");
        };
        // Sibling destination (9♥) plus the emptied source stack.
        let nine_of_hearts = initial.stacks[3].destination_id();
        assert_eq!(exclude.as_slice(), &[nine_of_hearts, initial.stacks[0].id]);

        let next = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert_eq!(next.exclusions[&card.id()].as_slice(), exclude.as_slice());
        // 8♣ may not hop over to the rejected 9♥.
        assert!(engine.moves_for_state(&next).is_empty());
    }

    #[test]
    fn test_column_move_cannot_return() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["|XD 9C", "|XH"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert_eq!(column(&moves[0]), (0, 1, 1));

        let next = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert_eq!(next.stacks[1].open.len(), 2);
        assert!(engine.moves_for_state(&next).is_empty());

        let mut forgetful = next.clone();
        forgetful.exclusions.clear();
        assert_eq!(engine.moves_for_state(&forgetful).len(), 1);
    }

    #[test]
    fn test_king_move() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["|", "|9D KH"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert_eq!(column(&moves[0]), (1, 0, 1));
    }

    #[test]
    fn test_multi_card_run() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["4S|XD 9C 8H", "|JS", "|XH"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 3);
        assert_eq!(column(&moves[0]), (0, 2, 2));
        assert_eq!(column(&moves[1]), (0, 1, 3));
        assert_eq!(column(&moves[2]), (2, 1, 1));

        let next = engine.apply_move_to_state(&moves[1], &initial).unwrap();
        assert_eq!(next.stacks[0].open[0].notation(), "4S");
        assert!(next.stacks[0].closed.is_empty());
        let moved: Vec<_> = next.stacks[1].open.iter().map(Card::notation).collect();
        assert_eq!(moved, ["JS", "XD", "9C", "8H"]);
    }

    #[test]
    fn test_column_legality() {
        let engine = ChurchillEngine::new();
        let cases = [
            (&["|9C", "|XD"][..], 1),
            (&["|9C", "|XS"][..], 0),
            (&["|9C", "|JD"][..], 0),
            (&["|QC", "|"][..], 0),
            (&["|KC", "|"][..], 1),
            (&["|2C", "|"][..], 0),
        ];
        for (layout, expected) in cases {
            let moves = engine.moves_for_state(&stacks(layout));
            assert_eq!(moves.len(), expected, "{layout:?}");
        }
    }

    #[test]
    fn test_reveal_closed_cards() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["AH|XD", "|JC"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert_eq!(column(&moves[0]), (0, 1, 1));

        let next = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert!(next.stacks[0].closed.is_empty());
        assert_eq!(next.stacks[0].open.len(), 1);
    }

    #[test]
    fn test_deal() {
        let engine = ChurchillEngine::new();
        let mut initial = board("2S 3S 4S", "", None, &["|KH QC", "|5D", "|7C"]);
        initial.exclusions.insert(1, SmallVec::from_slice(&[2]));
        let moves = engine.moves_for_state(&initial);
        assert!(moves[0].is_deal());

        let next = engine.apply_move_to_state(&Action::Deal, &initial).unwrap();
        assert_eq!(next.stacks[0].open.len(), 2);
        assert_eq!(next.stacks[1].peek_top().unwrap().notation(), "4S");
        assert_eq!(next.stacks[2].peek_top().unwrap().notation(), "3S");
        assert_eq!(next.stock.len(), 1);
        assert!(next.exclusions.is_empty());

        let short = board("2S", "", None, &["|5D", "|7C"]);
        let next = engine.apply_move_to_state(&Action::Deal, &short).unwrap();
        assert_eq!(next.stacks[0].open.len(), 2);
        assert_eq!(next.stacks[1].open.len(), 1);
    }

    #[test]
    fn test_no_deal_onto_finished_stacks() {
        let engine = ChurchillEngine::new();
        let initial = board("2S", "", None, &["|KH QC", "|KS QD JC"]);
        assert!(engine.moves_for_state(&initial).is_empty());

        let initial = board("2S", "", None, &["|KH 5C", "|KS QD JC"]);
        assert!(engine.moves_for_state(&initial).is_empty());

        let initial = board("2S", "", None, &["|QH KH", "|KS QD JC"]);
        assert!(engine.moves_for_state(&initial)[0].is_deal());
    }

    #[test]
    fn test_king_led_stack_with_broken_tail() {
        let engine = ChurchillEngine::new();
        let initial = board("2S 3S", "", None, &["|KH 5C", "|7D"]);
        // -1.5*2 + 2*2 - 2*(2+1)
        assert_eq!(engine.score_for_state(&initial), -5.0);

        let next = engine.apply_move_to_state(&Action::Deal, &initial).unwrap();
        assert_eq!(next.stacks[0].open.len(), 2);
        assert_eq!(next.stacks[1].peek_top().unwrap().notation(), "3S");
        assert_eq!(next.stock.len(), 1);
        assert_eq!(engine.score_for_state(&next), -5.5);
    }

    #[test]
    fn test_score_runs_in_stacks() {
        fn better(a: &[&str], b: &[&str]) {
            let engine = ChurchillEngine::new();
            let (a, b) = (stacks(a), stacks(b));
            assert!(engine.score_for_state(&a) > engine.score_for_state(&b));
        }
        better(&["|XD 9C"], &["|XD 9H"]);
        better(&["|XD 9C 8H"], &["|XD 9H"]);
        better(&["|XD 9C 8H 7D"], &["|XD 9H JC"]);
        better(&["|KD QC"], &["|QD JC"]);
        better(&["|XD"], &["2C|XD"]);
    }

    #[test]
    fn test_score_formula() {
        let engine = ChurchillEngine::new();
        let state = board("2S 3S", "4H", Some("AH 2D ?C ?S ?H ?D ?C ?S"), &[
            "5C 6C|KH QC",
            "|KD QS",
            "|9H 8H",
            "|",
        ]);
        // 3*3 - 1.5*2 - 1 + 2*2 - 2*(1+1+2) - 2*2
        assert_eq!(engine.score_for_state(&state), -3.0);
    }

    #[test]
    fn test_score_terminal() {
        let engine = ChurchillEngine::new();
        let complete = board("", "", Some("KH KD KC KS KH KD KC KS"), &["|"]);
        assert_eq!(engine.score_for_state(&complete), END);

        let dead = stacks(&["|??", "|KH"]);
        assert_eq!(engine.score_for_state(&dead), END);

        let hidden = stacks(&["??|KH"]);
        assert_ne!(engine.score_for_state(&hidden), END);
    }

    #[test]
    fn test_end_game_from_devils() {
        let engine = ChurchillEngine::new();
        let initial = board("", "KS", Some("KH KD KC QS KH KD KC KS"), &["|"]);
        let moves = engine.moves_for_state(&initial);
        assert_eq!(moves.len(), 1);
        assert!(matches!(moves[0], Action::Devil(_)));

        let complete = engine.apply_move_to_state(&moves[0], &initial).unwrap();
        assert_eq!(engine.score_for_state(&complete), END);
    }

    #[test]
    fn test_apply_leaves_input_untouched() {
        let engine = ChurchillEngine::new();
        let initial = stacks(&["9D|AH", "|XS", "|JD"]);
        let before = engine.encode_state(&initial);
        for mov in engine.moves_for_state(&initial) {
            engine.apply_move_to_state(&mov, &initial).unwrap();
        }
        assert_eq!(engine.encode_state(&initial), before);
        assert!(initial.exclusions.is_empty());
    }

    #[test]
    fn test_bank_mismatch_is_an_error() {
        let engine = ChurchillEngine::new();
        let initial = board("", "5H", None, &["|5S"]);
        let card = *initial.devils.last().unwrap();
        let err = engine.apply_move_to_state(&Action::Devil(card), &initial).unwrap_err();
        assert!(err.to_string().contains("Failed to bank"));

        let card = *initial.stacks[0].peek_top().unwrap();
        let mov = Action::Foundation { from: 0, card };
        assert!(engine.apply_move_to_state(&mov, &initial).is_err());

        let empty = stacks(&["|"]);
        assert!(engine.apply_move_to_state(&Action::Devil(card), &empty).is_err());
        assert!(engine.apply_move_to_state(&Action::Deal, &empty).is_err());
    }

    #[test]
    fn test_encoding_ignores_identity() {
        let engine = ChurchillEngine::new();
        let initial = Board::parse(include_str!("../deals/challenge-19.txt")).unwrap();
        let other = renumbered(&initial, 500);
        assert_ne!(initial.stacks[0].open[0].id(), other.stacks[0].open[0].id());
        assert_eq!(engine.encode_state(&initial), engine.encode_state(&other));

        let mut ids = IdAllocator::new();
        let mut changed = initial.clone();
        changed.stacks[0].open[0] = Card::parse("QD", &mut ids).unwrap();
        assert_ne!(engine.encode_state(&initial), engine.encode_state(&changed));
    }

    #[test]
    fn test_encoding_tracks_placement() {
        fn key(layout: &[&str]) -> StateKey {
            ChurchillEngine::new().encode_state(&stacks(layout))
        }
        let engine = ChurchillEngine::new();
        assert_ne!(key(&["9D|AH"]), key(&["|9D AH"]));
        assert_ne!(key(&["|9D", "|AH"]), key(&["|9D AH", "|"]));
        assert_ne!(key(&["|9D", "|AH"]), key(&["|AH", "|9D"]));
        assert_eq!(key(&["|9D", "|AH"]), key(&["|9D", "|AH"]));
        // Two empty piles, eight foundations, then closed, separator, open, separator per stack.
        assert_eq!(key(&["|9D", "|AH"]).as_bytes().len(), 2 + 8 + 3 + 3);
        assert_ne!(
            engine.encode_state(&board("AH", "", None, &[])),
            engine.encode_state(&board("", "AH", None, &[]))
        );
    }

    #[test]
    fn test_cards_are_conserved() {
        let engine = ChurchillEngine::new();
        let mut state = Board::parse(include_str!("../deals/easy.txt")).unwrap();
        for step in 0..300 {
            let moves = engine.moves_for_state(&state);
            if moves.is_empty() {
                break;
            }
            state = engine
                .apply_move_to_state(&moves[step % moves.len()], &state)
                .unwrap();
            assert_eq!(state.card_count(), TOTAL_CARDS);
            state.validate().unwrap();
        }
    }
}
