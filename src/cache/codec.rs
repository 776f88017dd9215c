//! List element codec.
//!
//! A cached relationship list holds literal member ids and stubs marking
//! what is not cached yet: `<n>` stands for exactly `n` unknown members and
//! `<?>` for an unknown-length remainder. Legal ids never use the bracket
//! syntax, so anything bracketed is a stub.

use crate::error::{FeedCacheError, Result};
use std::fmt;

const OPEN_TOKEN: &str = "<?>";

/// One decoded list element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Id(String),
    Skip(usize),
    Open,
}

impl Slot {
    pub fn id(id: impl Into<String>) -> Self {
        Slot::Id(id.into())
    }

    pub fn encode(&self) -> String {
        match self {
            Slot::Id(id) => id.clone(),
            Slot::Skip(n) => format!("<{}>", n),
            Slot::Open => OPEN_TOKEN.to_string(),
        }
    }

    pub fn decode(token: &str) -> Result<Self> {
        if !(token.starts_with('<') && token.ends_with('>')) {
            return Ok(Slot::Id(token.to_string()));
        }
        if token == OPEN_TOKEN {
            return Ok(Slot::Open);
        }
        let inner = &token[1..token.len() - 1];
        inner
            .parse::<usize>()
            .map(Slot::Skip)
            .map_err(|_| FeedCacheError::CorruptEncoding(format!("stub token '{}'", token)))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

pub fn decode_list(tokens: &[String]) -> Result<Vec<Slot>> {
    tokens.iter().map(|t| Slot::decode(t)).collect()
}

/// Encode a list, dropping empty skips and merging adjacent ones
pub fn encode_list(slots: &[Slot]) -> Vec<String> {
    let mut out: Vec<Slot> = Vec::with_capacity(slots.len());
    for slot in slots {
        match (slot, out.last_mut()) {
            (Slot::Skip(0), _) => {}
            (Slot::Skip(n), Some(Slot::Skip(prev))) => *prev += n,
            _ => out.push(slot.clone()),
        }
    }
    out.iter().map(Slot::encode).collect()
}

/// Literal ids of a list in order, stubs skipped
pub fn literal_ids(slots: &[Slot]) -> impl Iterator<Item = &str> {
    slots.iter().filter_map(|s| match s {
        Slot::Id(id) => Some(id.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_tokens() {
        assert_eq!(Slot::Skip(12).encode(), "<12>");
        assert_eq!(Slot::Open.encode(), "<?>");
        assert_eq!(Slot::decode("<12>").unwrap(), Slot::Skip(12));
        assert_eq!(Slot::decode("<?>").unwrap(), Slot::Open);
    }

    #[test]
    fn test_literals_are_never_stubs() {
        for token in ["alice", "42", "Repost(bob, 42)", "<alice", "bob>", ""] {
            assert_eq!(Slot::decode(token).unwrap(), Slot::id(token));
        }
    }

    #[test]
    fn test_malformed_stubs_are_corrupt() {
        for token in ["<abc>", "<-1>", "<>", "<1.5>"] {
            assert!(
                matches!(Slot::decode(token), Err(FeedCacheError::CorruptEncoding(_))),
                "{} should be corrupt",
                token
            );
        }
    }

    #[test]
    fn test_encode_list_compacts_skips() {
        let slots = vec![
            Slot::id("a"),
            Slot::Skip(2),
            Slot::Skip(3),
            Slot::Skip(0),
            Slot::id("b"),
            Slot::Open,
        ];
        assert_eq!(encode_list(&slots), vec!["a", "<5>", "b", "<?>"]);
    }
}
