//! Token approximation
//!
//! The backend reports exact usage after the fact. Before a request is sent
//! all we need is a cheap, deterministic estimate to decide whether a
//! history is long enough to compact: one token per four characters,
//! rounded down.

use crate::proxy::transformation::content::InputItem;

/// Characters per token used by every estimate in this crate
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate tokens for a character count (integer division)
pub fn approximate_tokens(chars: usize) -> usize {
    chars / CHARS_PER_TOKEN
}

/// Approximate tokens for a list of items
///
/// Counts message text, tool outputs and tool-call name plus arguments.
pub fn approximate_item_tokens(items: &[InputItem]) -> usize {
    approximate_tokens(items.iter().map(InputItem::char_count).sum())
}

/// Token counts before and after a transformation, for logging
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenDelta {
    pub before: usize,
    pub after: usize,
}

impl TokenDelta {
    pub fn new(before: usize, after: usize) -> Self {
        Self { before, after }
    }

    /// Tokens added (positive) or removed (negative)
    pub fn delta(&self) -> i64 {
        self.after as i64 - self.before as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::transformation::content::Role;

    #[test]
    fn test_integer_division() {
        assert_eq!(approximate_tokens(0), 0);
        assert_eq!(approximate_tokens(3), 0);
        assert_eq!(approximate_tokens(4), 1);
        assert_eq!(approximate_tokens(11), 2);
    }

    #[test]
    fn test_item_tokens_sum_all_items() {
        let items = vec![
            InputItem::message(Role::User, "abcd"),
            InputItem::message(Role::Assistant, "efgh"),
        ];
        assert_eq!(approximate_item_tokens(&items), 2);
    }

    #[test]
    fn test_delta_sign() {
        assert_eq!(TokenDelta::new(100, 40).delta(), -60);
        assert_eq!(TokenDelta::new(10, 25).delta(), 15);
    }
}
