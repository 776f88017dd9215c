//! List splicing upsert.
//!
//! After a page has been fetched from the system-of-record, its ids are
//! overlaid onto the cached list at their logical positions. The list is
//! rebuilt in memory and persisted by delete-then-rewrite, which is not
//! atomic: a concurrent reader may briefly see an empty or short list.

use super::codec::{decode_list, encode_list, Slot};
use super::keys::{self, EntityKind, ListField};
use super::FeedCache;
use crate::error::Result;
use crate::source::ListPage;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// Overlay `fetched` onto `list` starting at logical position `offset`.
///
/// `exhausted` means the relationship ends right after the fetched block,
/// so any cached tail beyond it is dropped along with a trailing `Open`.
pub fn splice(list: Vec<Slot>, offset: usize, fetched: Vec<String>, exhausted: bool) -> Vec<Slot> {
    if fetched.is_empty() && !exhausted {
        return list;
    }

    let original = list.clone();
    let mut rest: VecDeque<Slot> = list.into();
    let mut out = Vec::with_capacity(rest.len() + fetched.len());
    let mut position = 0;

    while position < offset {
        match rest.pop_front() {
            None => {
                // The cached list ended early; the relationship grew since.
                out.push(Slot::Skip(offset - position));
                position = offset;
            }
            Some(Slot::Id(id)) => {
                out.push(Slot::Id(id));
                position += 1;
            }
            Some(Slot::Skip(n)) if position + n <= offset => {
                out.push(Slot::Skip(n));
                position += n;
            }
            Some(Slot::Skip(n)) => {
                out.push(Slot::Skip(offset - position));
                rest.push_front(Slot::Skip(position + n - offset));
                position = offset;
            }
            Some(Slot::Open) => {
                if fetched.is_empty() {
                    return original;
                }
                out.push(Slot::Skip(offset - position));
                out.extend(fetched.into_iter().map(Slot::Id));
                if !exhausted {
                    out.push(Slot::Open);
                }
                return out;
            }
        }
    }

    let mut incoming: VecDeque<String> = fetched.into();
    let mut block_end = out.len();
    let mut past_end = false;

    while !incoming.is_empty() {
        match rest.pop_front() {
            None => {
                out.extend(incoming.drain(..).map(Slot::Id));
                past_end = true;
            }
            Some(Slot::Id(_)) => {
                if let Some(id) = incoming.pop_front() {
                    out.push(Slot::Id(id));
                }
            }
            Some(Slot::Skip(n)) => {
                let take = n.min(incoming.len());
                out.extend(incoming.drain(..take).map(Slot::Id));
                if n > take {
                    rest.push_front(Slot::Skip(n - take));
                }
            }
            Some(Slot::Open) => {
                out.extend(incoming.drain(..).map(Slot::Id));
                rest.push_front(Slot::Open);
            }
        }
        block_end = out.len();
    }

    if exhausted {
        out.truncate(block_end);
    } else {
        out.extend(rest);
        // More may follow what was fetched past the cached end
        if past_end {
            out.push(Slot::Open);
        }
    }
    out
}

impl FeedCache {
    pub(crate) async fn load_list(
        &self,
        kind: EntityKind,
        id: &str,
        list: ListField,
    ) -> Result<Vec<Slot>> {
        let tokens = self.store.lrange(&keys::list_key(kind, id, list)).await?;
        decode_list(&tokens)
    }

    /// Replace a list wholesale and arm its expiry
    pub(crate) async fn persist_list(&self, key: &str, slots: &[Slot], at: DateTime<Utc>) -> Result<()> {
        let tokens = encode_list(slots);
        self.store.del(&[key.to_string()]).await?;
        if !tokens.is_empty() {
            self.store.rpush(key, &tokens).await?;
            self.store.expire_at(&[key.to_string()], at).await?;
        }
        Ok(())
    }

    /// Splice a fetched page into an owner's cached list, then refresh the
    /// owner's TTL family.
    pub(crate) async fn splice_page(
        &self,
        kind: EntityKind,
        id: &str,
        list: ListField,
        page: &ListPage,
    ) -> Result<()> {
        let started = Instant::now();
        let at = self.expiry_instant();
        let cached = self.load_list(kind, id, list).await?;
        let spliced = splice(cached, page.offset, page.ids(), page.exhausted);

        self.persist_list(&keys::list_key(kind, id, list), &spliced, at)
            .await?;
        self.metrics
            .record_splice(started.elapsed().as_secs_f64());
        debug!(
            kind = %kind,
            id = %id,
            list = %list,
            offset = page.offset,
            fetched = page.members.len(),
            "Spliced page into cached list"
        );

        self.refresh_at(kind, keys::Detail::Full, id, at).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::decode_list;

    fn list(tokens: &[&str]) -> Vec<Slot> {
        let owned: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        decode_list(&owned).unwrap()
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn encoded(slots: &[Slot]) -> Vec<String> {
        encode_list(slots)
    }

    #[test]
    fn test_fill_inner_skip() {
        let l = list(&["a", "b", "<2>", "e"]);
        let out = splice(l, 2, ids(&["c", "d"]), false);
        assert_eq!(encoded(&out), ids(&["a", "b", "c", "d", "e"]));
    }

    #[test]
    fn test_partial_fill_shrinks_skip() {
        let l = list(&["a", "<5>", "z"]);
        let out = splice(l, 1, ids(&["b", "c"]), false);
        assert_eq!(encoded(&out), ids(&["a", "b", "c", "<3>", "z"]));
    }

    #[test]
    fn test_fill_merged_gap_replaces_inner_literals() {
        let l = list(&["a", "b", "<1>", "c", "<1>", "d"]);
        let out = splice(l, 2, ids(&["x", "c", "y"]), false);
        assert_eq!(encoded(&out), ids(&["a", "b", "x", "c", "y", "d"]));
    }

    #[test]
    fn test_open_tail_extended() {
        let l = list(&["a", "<?>"]);
        let out = splice(l.clone(), 1, ids(&["b", "c"]), false);
        assert_eq!(encoded(&out), ids(&["a", "b", "c", "<?>"]));

        let out = splice(l, 1, ids(&["b"]), true);
        assert_eq!(encoded(&out), ids(&["a", "b"]));
    }

    #[test]
    fn test_open_reached_before_offset() {
        let l = list(&["a", "<?>"]);
        let out = splice(l, 4, ids(&["e", "f"]), false);
        assert_eq!(encoded(&out), ids(&["a", "<3>", "e", "f", "<?>"]));
    }

    #[test]
    fn test_skip_straddling_offset_is_split() {
        let l = list(&["<4>", "z"]);
        let out = splice(l, 2, ids(&["c", "d"]), false);
        assert_eq!(encoded(&out), ids(&["<2>", "c", "d", "z"]));
    }

    #[test]
    fn test_exhausted_fetch_truncates_tail() {
        let l = list(&["a", "<3>", "stale", "<?>"]);
        let out = splice(l, 1, ids(&["b"]), true);
        assert_eq!(encoded(&out), ids(&["a", "b"]));
    }

    #[test]
    fn test_empty_fetch_leaves_list_alone() {
        let l = list(&["a", "<?>"]);
        assert_eq!(splice(l.clone(), 5, vec![], false), l);
        assert_eq!(splice(l.clone(), 5, vec![], true), l);
    }

    #[test]
    fn test_empty_exhausted_fetch_ends_list() {
        let l = list(&["a", "b", "<2>", "<?>"]);
        let out = splice(l, 2, vec![], true);
        assert_eq!(encoded(&out), ids(&["a", "b"]));
    }

    #[test]
    fn test_fetch_past_known_end_appends() {
        let l = list(&["a"]);
        let out = splice(l.clone(), 1, ids(&["b", "c"]), false);
        assert_eq!(encoded(&out), ids(&["a", "b", "c", "<?>"]));

        let out = splice(l, 1, ids(&["b", "c"]), true);
        assert_eq!(encoded(&out), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_fetch_beyond_short_list_leaves_open_tail() {
        let l = list(&["a"]);
        let out = splice(l, 3, ids(&["d"]), false);
        assert_eq!(encoded(&out), ids(&["a", "<2>", "d", "<?>"]));
    }
}
