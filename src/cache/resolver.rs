//! Hit / partial hit / miss classification of a requested page.
//!
//! The resolver walks a decoded list in logical positions: a literal covers
//! one position and `Skip(n)` covers `n`. Every stub the window touches is
//! merged into a single gap so a partial hit needs exactly one contiguous
//! fetch from the system-of-record.

use super::codec::Slot;
use serde::Serialize;

/// A requested page of a relationship list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub offset: usize,
    /// `None` reads to the end of the list
    pub count: Option<usize>,
}

impl Window {
    pub fn new(offset: usize, count: Option<usize>) -> Self {
        Self { offset, count }
    }

    pub fn all() -> Self {
        Self::new(0, None)
    }

    /// Build a window from API-style arguments where a negative count
    /// means unbounded. Negative offsets clamp to zero.
    pub fn from_signed(offset: i64, count: i64) -> Self {
        Self {
            offset: offset.max(0) as usize,
            count: usize::try_from(count).ok(),
        }
    }
}

/// The merged uncached run inside a window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gap {
    /// Known number of positions between prefix and suffix
    Skip(usize),
    /// Runs to the end of the window (or list)
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialHit {
    /// Literals before the first touched stub
    pub prefix: Vec<String>,
    pub gap: Gap,
    /// Literals after the last touched stub
    pub suffix: Vec<String>,
    /// List indices of the first and last touched stub
    pub first_stub: usize,
    pub last_stub: usize,
}

impl PartialHit {
    /// The page to fetch from the system-of-record to fill the gap
    pub fn fetch_window(&self, window: Window) -> Window {
        let offset = window.offset + self.prefix.len();
        let count = match self.gap {
            Gap::Skip(n) => Some(n),
            Gap::Open => window.count.map(|c| c.saturating_sub(self.prefix.len())),
        };
        Window::new(offset, count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Hit(Vec<String>),
    Partial(PartialHit),
    Miss,
}

/// Classify `window` against the cached list `list`
pub fn resolve(list: &[Slot], window: Window) -> Resolution {
    let mut i = 0;
    let mut consumed = 0;
    // Positions of a skip straddling the offset that fall inside the window
    let mut lead = 0;

    while consumed < window.offset {
        let Some(slot) = list.get(i) else {
            return Resolution::Hit(Vec::new());
        };
        match slot {
            Slot::Id(_) => {
                consumed += 1;
                i += 1;
            }
            Slot::Skip(n) if consumed + n <= window.offset => {
                consumed += n;
                i += 1;
            }
            Slot::Skip(n) => {
                lead = consumed + n - window.offset;
                consumed = window.offset;
            }
            Slot::Open => return Resolution::Miss,
        }
    }

    let mut remaining = window.count;
    let mut prefix = Vec::new();
    let mut pending = Vec::new();
    let mut gap_len = 0;
    let mut gap_open = false;
    let mut touched: Option<(usize, usize)> = None;

    while remaining != Some(0) {
        let Some(slot) = list.get(i) else {
            break;
        };
        let slot = match (slot, lead) {
            (Slot::Skip(_), lead) if lead > 0 => Slot::Skip(lead),
            (slot, _) => slot.clone(),
        };
        lead = 0;

        match slot {
            Slot::Id(id) => {
                if touched.is_none() {
                    prefix.push(id);
                } else {
                    pending.push(id);
                }
                remaining = remaining.map(|r| r - 1);
            }
            Slot::Skip(n) => {
                let effective = remaining.map_or(n, |r| n.min(r));
                touched = Some((touched.map_or(i, |(first, _)| first), i));
                gap_len += pending.len() + effective;
                pending.clear();
                remaining = remaining.map(|r| r - effective);
            }
            Slot::Open => {
                touched = Some((touched.map_or(i, |(first, _)| first), i));
                gap_len += pending.len();
                pending.clear();
                gap_open = true;
                break;
            }
        }
        i += 1;
    }

    let Some((first_stub, last_stub)) = touched else {
        return Resolution::Hit(prefix);
    };
    if prefix.is_empty() && pending.is_empty() {
        return Resolution::Miss;
    }

    Resolution::Partial(PartialHit {
        prefix,
        gap: if gap_open { Gap::Open } else { Gap::Skip(gap_len) },
        suffix: pending,
        first_stub,
        last_stub,
    })
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

    #[test]
    fn test_hit_after_leading_skip() {
        let l = list(&["<10>", "a", "b", "c", "d", "e", "<?>"]);
        assert_eq!(
            resolve(&l, Window::new(10, Some(5))),
            Resolution::Hit(ids(&["a", "b", "c", "d", "e"]))
        );
    }

    #[test]
    fn test_partial_merges_stubs_into_one_gap() {
        let l = list(&["a", "b", "<1>", "c", "<1>", "d"]);
        let Resolution::Partial(hit) = resolve(&l, Window::new(0, Some(6))) else {
            panic!("expected partial hit");
        };
        assert_eq!(hit.prefix, ids(&["a", "b"]));
        assert_eq!(hit.gap, Gap::Skip(3));
        assert_eq!(hit.suffix, ids(&["d"]));
        assert_eq!((hit.first_stub, hit.last_stub), (2, 4));
        assert_eq!(
            hit.fetch_window(Window::new(0, Some(6))),
            Window::new(2, Some(3))
        );
    }

    #[test]
    fn test_miss_without_literal_edges() {
        let l = list(&["<1>", "x", "<1>"]);
        assert_eq!(resolve(&l, Window::new(0, Some(3))), Resolution::Miss);
    }

    #[test]
    fn test_short_list_is_truncated_hit() {
        let l = list(&["a", "b", "c"]);
        assert_eq!(
            resolve(&l, Window::new(0, Some(100))),
            Resolution::Hit(ids(&["a", "b", "c"]))
        );
        assert_eq!(resolve(&l, Window::new(5, Some(2))), Resolution::Hit(vec![]));
    }

    #[test]
    fn test_open_during_offset_is_miss() {
        let l = list(&["a", "<?>"]);
        assert_eq!(resolve(&l, Window::new(3, Some(2))), Resolution::Miss);
    }

    #[test]
    fn test_open_tail_gap() {
        let l = list(&["a", "b", "<?>"]);
        let Resolution::Partial(hit) = resolve(&l, Window::new(0, Some(5))) else {
            panic!("expected partial hit");
        };
        assert_eq!(hit.gap, Gap::Open);
        assert!(hit.suffix.is_empty());
        assert_eq!(
            hit.fetch_window(Window::new(0, Some(5))),
            Window::new(2, Some(3))
        );
        assert_eq!(hit.fetch_window(Window::all()), Window::new(2, None));
    }

    #[test]
    fn test_skip_straddling_offset_counts_as_touched() {
        // positions: a=0, <3>=1..3, b=4
        let l = list(&["a", "<3>", "b", "c"]);
        let Resolution::Partial(hit) = resolve(&l, Window::new(2, Some(4))) else {
            panic!("expected partial hit");
        };
        assert!(hit.prefix.is_empty());
        assert_eq!(hit.gap, Gap::Skip(2));
        assert_eq!(hit.suffix, ids(&["b", "c"]));
        assert_eq!(hit.first_stub, 1);
    }

    #[test]
    fn test_skip_straddling_window_end_is_clamped() {
        let l = list(&["a", "b", "<50>", "c"]);
        let Resolution::Partial(hit) = resolve(&l, Window::new(0, Some(4))) else {
            panic!("expected partial hit");
        };
        assert_eq!(hit.gap, Gap::Skip(2));
        assert_eq!(hit.prefix, ids(&["a", "b"]));
    }

    #[test]
    fn test_window_from_signed() {
        assert_eq!(Window::from_signed(3, -1), Window::new(3, None));
        assert_eq!(Window::from_signed(-2, 4), Window::new(0, Some(4)));
    }
}
