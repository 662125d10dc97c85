use anyhow::{Context, Result, bail};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use std::fmt;

pub const TOTAL_FOUNDATIONS: usize = 8;
pub const TOTAL_STACKS: usize = 10;
pub const TOTAL_DECKS: usize = 2;
pub const TOTAL_CARDS: usize = TOTAL_DECKS * 52;
pub const STOCK_SIZE: usize = 68;
pub const DEVILS_SIZE: usize = 6;

const DEFAULT_FOUNDATIONS: &str = "?H ?D ?C ?S ?H ?D ?C ?S";
const SUITS: [char; 5] = ['♥', '♦', '♣', '♠', '?'];
const SUIT_LETTERS: [char; 5] = ['H', 'D', 'C', 'S', '?'];
const RANKS: [char; 14] = [
    '?', 'A', '2', '3', '4', '5', '6', '7', '8', '9', 'X', 'J', 'Q', 'K',
];

/// Identity of a card or a stack. Stable for the lifetime of a deal and
/// independent of the card's value.
pub type ObjectId = u16;

/// Forbidden destinations per moving card, keyed by the card's identity.
pub type Exclusions = FxHashMap<ObjectId, SmallVec<[ObjectId; 4]>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colour {
    Red,
    Black,
    Unknown,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn colour(self) -> Colour {
        match self {
            Suit::Hearts | Suit::Diamonds => Colour::Red,
            Suit::Clubs | Suit::Spades => Colour::Black,
            Suit::Unknown => Colour::Unknown,
        }
    }

    fn from_char(c: char) -> Option<Suit> {
        let idx = SUIT_LETTERS
            .iter()
            .position(|&s| s == c)
            .or_else(|| SUITS.iter().position(|&s| s == c))?;
        Some(match idx {
            0 => Suit::Hearts,
            1 => Suit::Diamonds,
            2 => Suit::Clubs,
            3 => Suit::Spades,
            _ => Suit::Unknown,
        })
    }
}

/// Card rank, `0` is the unknown placeholder, `1..=13` is Ace to King.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(u8);

impl Rank {
    pub const UNKNOWN: Rank = Rank(0);
    pub const ACE: Rank = Rank(1);
    pub const KING: Rank = Rank(13);

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }

    /// The rank that has to follow this one on a foundation.
    pub fn next(self) -> Option<Rank> {
        (self.0 < Rank::KING.0).then_some(Rank(self.0 + 1))
    }

    fn from_char(c: char) -> Option<Rank> {
        RANKS.iter().position(|&r| r == c).map(|idx| Rank(idx as u8))
    }

    fn to_char(self) -> char {
        RANKS[self.0 as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Card {
    id: ObjectId,
    suit: Suit,
    rank: Rank,
}

impl Card {
    pub const UNKNOWN: Card = Card {
        id: 0,
        suit: Suit::Unknown,
        rank: Rank::UNKNOWN,
    };

    pub fn new(id: ObjectId, rank: Rank, suit: Suit) -> Self {
        Self { id, suit, rank }
    }

    pub fn parse(token: &str, ids: &mut IdAllocator) -> Result<Self> {
        let mut chars = token.chars();
        let (Some(rank), Some(suit), None) = (chars.next(), chars.next(), chars.next()) else {
            bail!("Invalid card '{token}'");
        };
        let rank =
            Rank::from_char(rank).with_context(|| format!("Invalid rank at card {token}"))?;
        let suit =
            Suit::from_char(suit).with_context(|| format!("Invalid suit at card {token}"))?;
        let id = ids
            .next_id()
            .with_context(|| format!("No identity left for card {token}"))?;
        Ok(Card::new(id, rank, suit))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn suit(&self) -> Suit {
        self.suit
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn colour(&self) -> Colour {
        self.suit.colour()
    }

    pub fn is_king(&self) -> bool {
        self.rank == Rank::KING
    }

    pub fn is_ace(&self) -> bool {
        self.rank == Rank::ACE
    }

    /// Whether this card may lie directly on `onto`: opposite colour and one rank lower.
    pub fn stacks_onto(&self, onto: &Card) -> bool {
        let (colour, onto_colour) = (self.colour(), onto.colour());
        !self.rank.is_unknown()
            && colour != Colour::Unknown
            && onto_colour != Colour::Unknown
            && colour != onto_colour
            && self.rank.value() + 1 == onto.rank.value()
    }

    /// Value-only code, unique per (suit, rank) and always below `0xf0`.
    pub fn code(&self) -> u8 {
        self.suit.index() as u8 * (Rank::KING.0 + 1) + self.rank.0
    }

    pub fn notation(&self) -> String {
        format!("{}{}", self.rank.to_char(), SUIT_LETTERS[self.suit.index()])
    }

    pub fn pretty_print(&self) -> String {
        format!("{}{}", self.rank.to_char(), SUITS[self.suit.index()])
    }
}

impl Default for Card {
    fn default() -> Self {
        Card::UNKNOWN
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_print())
    }
}

/// Hands out card and stack identities while a board is being built.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: ObjectId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> Result<ObjectId> {
        let id = self.next;
        self.next = id.checked_add(1).context("Ran out of card identities")?;
        Ok(id)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    pub id: ObjectId,
    /// Face-down cards, the last one is turned over next.
    pub closed: SmallVec<[Card; 8]>,
    /// Face-up cards, the last one is accessible.
    pub open: SmallVec<[Card; 16]>,
}

impl Stack {
    pub fn parse(s: &str, ids: &mut IdAllocator) -> Result<Self> {
        let mut parts = s.split('|');
        let (Some(closed), Some(open), None) = (parts.next(), parts.next(), parts.next()) else {
            bail!("Invalid card stack '{s}'");
        };
        let id = ids.next_id()?;
        Ok(Self {
            id,
            closed: parse_cards(closed, ids)?.into_iter().collect(),
            open: parse_cards(open, ids)?.into_iter().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty() && self.open.is_empty()
    }

    pub fn len(&self) -> usize {
        self.closed.len() + self.open.len()
    }

    pub fn peek_top(&self) -> Option<&Card> {
        self.open.last()
    }

    /// Identity a card has to be placed on to land on this stack.
    pub fn destination_id(&self) -> ObjectId {
        self.peek_top().map_or(self.id, Card::id)
    }

    /// Turns the last face-down card over once the face-up side runs out.
    pub fn reveal(&mut self) -> bool {
        if self.open.is_empty()
            && let Some(card) = self.closed.pop()
        {
            self.open.push(card);
            return true;
        }
        false
    }

    /// Number of cards at the top that form one movable run.
    pub fn run_length(&self) -> usize {
        let len = self.open.len();
        if len == 0 {
            return 0;
        }
        let mut count = 1;
        while count < len && self.open[len - count].stacks_onto(&self.open[len - count - 1]) {
            count += 1;
        }
        count
    }

    pub fn count_runs(&self) -> usize {
        let mut runs = 0;
        let mut previous: Option<&Card> = None;
        for card in &self.open {
            match previous {
                Some(previous) if card.stacks_onto(previous) => {}
                _ => runs += 1,
            }
            previous = Some(card);
        }
        runs
    }

    /// Nothing face down and a King at the bottom. Such a stack takes no dealt cards.
    pub fn is_led_by_king(&self) -> bool {
        self.closed.is_empty() && self.open.first().is_some_and(Card::is_king)
    }

    fn notation(&self) -> String {
        format!("{}|{}", cards_to_notation(&self.closed), cards_to_notation(&self.open))
    }
}

/// A deal in text notation, before identities are handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deal {
    /// Top card last.
    pub stock: String,
    /// Top card last.
    pub devils: String,
    pub foundations: Option<String>,
    pub stacks: Vec<String>,
}

impl Deal {
    pub fn parse(content: &str) -> Result<Self> {
        let mut deal = Deal::default();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let line_context = || format!("Failed to parse at '{line}'");
            let Some((prefix, rest)) = line.split_once(':') else {
                bail!("Missing ':' separator at '{line}'");
            };
            let rest = rest.trim().to_string();
            match prefix.trim() {
                "Stock" => deal.stock = rest,
                "Devils" => deal.devils = rest,
                "Foundations" => deal.foundations = Some(rest),
                prefix => {
                    let Some(idx) = prefix.strip_prefix("Stack") else {
                        bail!("Unknown section '{prefix}' at '{line}'");
                    };
                    if !idx.is_empty() {
                        let idx = idx
                            .parse::<usize>()
                            .context("Invalid stack index")
                            .with_context(line_context)?;
                        if idx != deal.stacks.len() + 1 {
                            bail!("Stack{idx} is out of order at '{line}'");
                        }
                    }
                    deal.stacks.push(rest);
                }
            }
        }
        Ok(deal)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Board {
    /// Cards still to be dealt, top card last.
    pub stock: Vec<Card>,
    /// The devil's row, top card last.
    pub devils: SmallVec<[Card; DEVILS_SIZE]>,
    /// Highest card banked on each foundation pile.
    pub foundations: [Card; TOTAL_FOUNDATIONS],
    pub stacks: SmallVec<[Stack; TOTAL_STACKS]>,
    pub exclusions: Exclusions,
}

impl Board {
    pub fn from_deal(deal: &Deal) -> Result<Self> {
        let mut ids = IdAllocator::new();
        let stock = parse_cards(&deal.stock, &mut ids).context("Failed to parse stock")?;
        let devils = parse_cards(&deal.devils, &mut ids).context("Failed to parse devils")?;
        let foundations = deal.foundations.as_deref().unwrap_or(DEFAULT_FOUNDATIONS);
        let foundations =
            parse_cards(foundations, &mut ids).context("Failed to parse foundations")?;
        let Ok(foundations) = <[Card; TOTAL_FOUNDATIONS]>::try_from(foundations.as_slice()) else {
            bail!(
                "Expected {TOTAL_FOUNDATIONS} foundation cards, found {}",
                foundations.len()
            );
        };
        let mut stacks = SmallVec::new();
        for s in &deal.stacks {
            let stack =
                Stack::parse(s, &mut ids).with_context(|| format!("Failed to parse stack '{s}'"))?;
            stacks.push(stack);
        }
        Ok(Self {
            stock,
            devils: devils.into_iter().collect(),
            foundations,
            stacks,
            exclusions: Exclusions::default(),
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        Self::from_deal(&Deal::parse(content)?)
    }

    /// Foundation slot the card can be banked on, if any.
    pub fn foundation_slot_for(&self, card: &Card) -> Option<usize> {
        self.foundations.iter().position(|top| {
            top.suit == card.suit && top.rank.next().is_some_and(|next| next == card.rank)
        })
    }

    pub fn foundation_score(&self) -> u32 {
        self.foundations.iter().map(|c| c.rank.value() as u32).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.foundations.iter().all(Card::is_king)
    }

    pub fn has_uncovered_unknown(&self) -> bool {
        self.stacks
            .iter()
            .filter_map(Stack::peek_top)
            .any(|card| card.rank.is_unknown())
    }

    pub fn card_count(&self) -> usize {
        self.stock.len()
            + self.devils.len()
            + self.foundation_score() as usize
            + self.stacks.iter().map(Stack::len).sum::<usize>()
    }

    /// Checks the board holds exactly two full decks and no identity twice.
    pub fn validate(&self) -> Result<()> {
        let mut expected: FxHashMap<(Suit, Rank), usize> = FxHashMap::default();
        for suit in Suit::ALL {
            for rank in 1..=Rank::KING.0 {
                expected.insert((suit, Rank(rank)), TOTAL_DECKS);
            }
        }

        let mut errors = vec![];
        let mut check = |suit: Suit, rank: Rank| {
            if rank.is_unknown() {
                return;
            }
            match expected.get_mut(&(suit, rank)) {
                Some(count) if *count > 0 => *count -= 1,
                _ => errors.push(format!(
                    "Found an unexpected {}",
                    Card::new(0, rank, suit).pretty_print()
                )),
            }
        };
        for card in self.physical_cards() {
            check(card.suit, card.rank);
        }
        for top in &self.foundations {
            for rank in 1..=top.rank.0 {
                check(top.suit, Rank(rank));
            }
        }

        let mut missing: Vec<_> = expected
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .collect();
        missing.sort();
        for ((suit, rank), count) in missing {
            for _ in 0..count {
                errors.push(format!("Missing a {}", Card::new(0, rank, suit).pretty_print()));
            }
        }

        let mut seen = FxHashSet::default();
        let card_ids = self.physical_cards().map(Card::id);
        let stack_ids = self.stacks.iter().map(|s| s.id);
        let foundation_ids = self.foundations.iter().map(Card::id);
        for id in card_ids.chain(stack_ids).chain(foundation_ids) {
            if !seen.insert(id) {
                errors.push(format!("Duplicate identity #{id}"));
            }
        }

        if !errors.is_empty() {
            bail!(errors.join("\n"));
        }
        Ok(())
    }

    fn physical_cards(&self) -> impl Iterator<Item = &Card> {
        self.stock
            .iter()
            .chain(self.devils.iter())
            .chain(self.stacks.iter().flat_map(|s| s.closed.iter().chain(s.open.iter())))
    }

    pub fn pretty_print(&self) -> String {
        let mut output = format!(
            "{:02}  {}  {}\n\n",
            self.stock.len(),
            cards_to_string(&self.devils),
            cards_to_string(&self.foundations)
        );

        let mut level = 0;
        loop {
            let mut line = String::new();
            let mut found = false;
            for stack in &self.stacks {
                if level < stack.closed.len() {
                    line.push_str("-- ");
                    found = true;
                } else if level < stack.len() {
                    line.push_str(&stack.open[level - stack.closed.len()].pretty_print());
                    line.push(' ');
                    found = true;
                } else {
                    line.push_str("   ");
                }
            }
            if !found {
                break;
            }
            output.push_str(line.trim_end());
            output.push('\n');
            level += 1;
        }

        output
    }

    /// Deal file text for this board. Exclusions are not part of the notation.
    pub fn to_notation(&self) -> String {
        let mut output = String::new();
        if !self.stock.is_empty() {
            output.push_str(&format!("Stock: {}\n", cards_to_notation(&self.stock)));
        }
        if !self.devils.is_empty() {
            output.push_str(&format!("Devils: {}\n", cards_to_notation(&self.devils)));
        }
        output.push_str(&format!("Foundations: {}", cards_to_notation(&self.foundations)));
        for (i, stack) in self.stacks.iter().enumerate() {
            output.push_str(&format!("\nStack{}: {}", i + 1, stack.notation()));
        }
        output
    }
}

pub fn parse_cards(s: &str, ids: &mut IdAllocator) -> Result<Vec<Card>> {
    s.split_whitespace().map(|token| Card::parse(token, ids)).collect()
}

pub fn cards_to_string(cards: &[Card]) -> String {
    cards.iter().map(Card::pretty_print).collect::<Vec<_>>().join(" ")
}

fn cards_to_notation(cards: &[Card]) -> String {
    cards.iter().map(Card::notation).collect::<Vec<_>>().join(" ")
}
