use crate::board::{Card, ObjectId};

use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deal one stock card onto every stack that is not led by a King.
    Deal,
    /// Bank the top card of the devil's row.
    Devil(Card),
    /// Bank the exposed card of a stack.
    Foundation { from: usize, card: Card },
    /// Relocate the top `count` cards of `from` as one run.
    Column {
        from: usize,
        to: usize,
        count: usize,
        /// Lead card of the moved run.
        card: Card,
        /// Card the run lands on, `None` for an empty stack.
        onto: Option<Card>,
        /// Destinations the lead card may not be moved to afterwards.
        exclude: SmallVec<[ObjectId; 4]>,
    },
}

impl Action {
    pub fn is_deal(&self) -> bool {
        matches!(self, Action::Deal)
    }
}

pub fn describe_action(action: &Action) -> String {
    match action {
        Action::Deal => "DEAL".to_string(),
        Action::Devil(card) => format!("DEVIL {card}"),
        Action::Foundation { from, card } => format!("{card} from #{} to foundation", from + 1),
        Action::Column {
            from,
            to,
            count,
            card,
            onto,
            ..
        } => {
            let mut output = card.to_string();
            if *count > 1 {
                output.push_str(&format!(" +{}", count - 1));
            }
            if let Some(onto) = onto {
                output.push_str(&format!(" to {onto}"));
            }
            output.push_str(&format!(" (from #{} to #{})", from + 1, to + 1));
            output
        }
    }
}

/// Short codes, ten per row: `D` deal, `V` devil, `S3:F` to foundation, `S1:S4@3` run of three.
pub fn format_actions(actions: &[Action]) -> String {
    let mut list = vec![];
    let mut i = 0;
    while i < actions.len() {
        match &actions[i] {
            Action::Deal => {
                let mut count = 1;
                while i + count < actions.len() && actions[i + count].is_deal() {
                    count += 1;
                }
                let str = if count == 1 {
                    "D".into()
                } else {
                    format!("{count}D")
                };
                list.push(str);
                i += count;
                continue;
            }
            Action::Devil(_) => list.push("V".to_string()),
            Action::Foundation { from, .. } => list.push(format!("S{}:F", from + 1)),
            Action::Column {
                from, to, count, ..
            } => {
                let mut str = format!("S{}:S{}", from + 1, to + 1);
                if *count > 1 {
                    str.push_str(&format!("@{count}"));
                }
                list.push(str);
            }
        }
        i += 1;
    }

    let mut output = String::new();
    let max_width = list.iter().map(|s| s.len()).max().unwrap_or_default() + 1;
    for chunk in list.chunks(10) {
        for cmd in chunk {
            output.push_str(&format!("{cmd:<width$}", width = max_width));
        }
        output.push('\n');
    }

    output
}
