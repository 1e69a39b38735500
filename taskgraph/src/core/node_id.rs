//! Hierarchical node identifiers.
//!
//! Top-level nodes are lettered (`A`, `B`, …, `Z`, `AA`, …) and breakdowns
//! append dotted numeric segments (`B.1`, `B.2.1`). Ids stay opaque strings
//! as graph keys; ordering and range checks go through the parsed path, a
//! sequence of small integers compared in tree order.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Id for the `index`-th (0-based) top-level step: `A`..`Z`, then `AA`, `AB`, …
    pub fn top_level(index: usize) -> Self {
        let mut n = index + 1;
        let mut letters = Vec::new();
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push(b'A' + rem as u8);
            n = (n - 1) / 26;
        }
        letters.reverse();
        Self(String::from_utf8_lossy(&letters).into_owned())
    }

    /// Id of the `ordinal`-th (1-based) child produced by breaking this node down.
    pub fn child(&self, ordinal: u32) -> Self {
        Self(format!("{}.{}", self.0, ordinal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parsed tree path, or `None` when the id does not follow the dotted scheme.
    ///
    /// The leading segment may be alphabetic (bijective base-26, `A` = 1) or
    /// numeric; later segments must be numeric or alphabetic as well.
    pub fn path(&self) -> Option<Vec<u32>> {
        self.0.split('.').map(parse_segment).collect()
    }

    /// True if `self` sits strictly below `ancestor` in the id hierarchy.
    pub fn is_descendant_of(&self, ancestor: &NodeId) -> bool {
        match (self.path(), ancestor.path()) {
            (Some(path), Some(prefix)) => path.len() > prefix.len() && path.starts_with(&prefix),
            _ => false,
        }
    }

    /// True if `self` falls in the inclusive range spanned by `a` and `b`.
    ///
    /// The bounds may be given in either order. Descendants of the upper
    /// bound are inside the range. Ids that do not parse only match a bound
    /// exactly.
    pub fn in_range(&self, a: &NodeId, b: &NodeId) -> bool {
        if self == a || self == b {
            return true;
        }
        let (Some(path), Some(pa), Some(pb)) = (self.path(), a.path(), b.path()) else {
            return false;
        };
        let (lo, hi) = if pa <= pb { (pa, pb) } else { (pb, pa) };
        path >= lo && (path <= hi || path.starts_with(&hi))
    }
}

fn parse_segment(segment: &str) -> Option<u32> {
    if segment.is_empty() {
        return None;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return segment.parse().ok();
    }
    if segment.bytes().all(|b| b.is_ascii_alphabetic()) {
        let mut value: u32 = 0;
        for b in segment.bytes() {
            let digit = u32::from(b.to_ascii_uppercase() - b'A') + 1;
            value = value.checked_mul(26)?.checked_add(digit)?;
        }
        return Some(value);
    }
    None
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.path(), other.path()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for NodeId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> NodeId {
        NodeId::from(raw)
    }

    #[test]
    fn top_level_ids_extend_past_z() {
        assert_eq!(NodeId::top_level(0).as_str(), "A");
        assert_eq!(NodeId::top_level(25).as_str(), "Z");
        assert_eq!(NodeId::top_level(26).as_str(), "AA");
        assert_eq!(NodeId::top_level(27).as_str(), "AB");
        assert_eq!(NodeId::top_level(701).as_str(), "ZZ");
        assert_eq!(NodeId::top_level(702).as_str(), "AAA");
    }

    #[test]
    fn top_level_ids_sort_in_generation_order() {
        let ids: Vec<NodeId> = (0..60).map(NodeId::top_level).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn tree_order_places_children_between_siblings() {
        let mut ids = vec![id("C"), id("B.2"), id("B"), id("B.10"), id("B.1"), id("A")];
        ids.sort();
        let raw: Vec<&str> = ids.iter().map(NodeId::as_str).collect();
        assert_eq!(raw, vec!["A", "B", "B.1", "B.2", "B.10", "C"]);
    }

    #[test]
    fn unparsed_ids_sort_after_hierarchical_ids() {
        let mut ids = vec![id("setup_step"), id("Z.3")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "Z.3");
        assert!(id("setup_step").path().is_none());
        assert!(id("B..1").path().is_none());
    }

    #[test]
    fn child_ids_extend_the_path() {
        let child = id("B.2").child(1);
        assert_eq!(child.as_str(), "B.2.1");
        assert!(child.is_descendant_of(&id("B")));
        assert!(child.is_descendant_of(&id("B.2")));
        assert!(!child.is_descendant_of(&id("B.2.1")));
        assert!(!id("BA").is_descendant_of(&id("B")));
    }

    #[test]
    fn range_is_inclusive_and_order_independent() {
        assert!(id("B").in_range(&id("C"), &id("B")));
        assert!(id("C").in_range(&id("B"), &id("C")));
        assert!(id("B.3").in_range(&id("B"), &id("C")));
        assert!(!id("A").in_range(&id("B"), &id("C")));
        assert!(!id("D").in_range(&id("B"), &id("C")));
    }

    #[test]
    fn range_includes_descendants_of_upper_bound() {
        assert!(id("C.1").in_range(&id("B"), &id("C")));
        assert!(id("C.1.4").in_range(&id("C"), &id("C")));
        assert!(!id("B.1").in_range(&id("C"), &id("C")));
    }

    #[test]
    fn deep_hierarchies_are_not_pruned_in_bulk() {
        // Only B.2 and below are affected when rewinding within B.2's subtree.
        assert!(id("B.2.1").in_range(&id("B.2"), &id("B.2.1")));
        assert!(!id("B.1").in_range(&id("B.2"), &id("B.2.1")));
        assert!(!id("B.3").in_range(&id("B.2"), &id("B.2.1")));
    }

    #[test]
    fn opaque_ids_only_match_bounds() {
        assert!(id("cleanup").in_range(&id("cleanup"), &id("B")));
        assert!(!id("cleanup").in_range(&id("A"), &id("Z")));
        assert!(!id("B").in_range(&id("cleanup"), &id("Z")));
    }
}
