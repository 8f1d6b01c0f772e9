use std::collections::BTreeMap;
use std::hash::Hash;

use rustc_hash::FxHashSet;

/// Interval index over one axis, used to find the area broadcasters whose
/// row span covers a written row.
///
/// Intervals are keyed by their low end; each `[low, high]` pair owns a small
/// set of values. Queries walk the B-tree up to the query's high end and keep
/// the nodes whose high end reaches the query's low end.
#[derive(Debug, Clone)]
struct IntervalNode<T: Eq + Hash> {
    high: u32,
    values: FxHashSet<T>,
}

#[derive(Debug, Clone)]
pub struct IntervalTree<T: Eq + Hash> {
    map: BTreeMap<u32, Vec<IntervalNode<T>>>,
    size: usize,
}

impl<T: Eq + Hash> Default for IntervalTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> IntervalTree<T> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            size: 0,
        }
    }

    /// Number of distinct intervals.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn insert(&mut self, low: u32, high: u32, value: T) {
        let nodes = self.map.entry(low).or_default();
        if let Some(node) = nodes.iter_mut().find(|n| n.high == high) {
            node.values.insert(value);
        } else {
            let mut values = FxHashSet::default();
            values.insert(value);
            nodes.push(IntervalNode { high, values });
            self.size += 1;
        }
    }

    /// Visit every value whose interval overlaps `[q_low, q_high]`.
    pub fn for_each_overlapping(&self, q_low: u32, q_high: u32, mut f: impl FnMut(&T)) {
        for nodes in self.map.range(..=q_high).map(|(_, n)| n) {
            for node in nodes {
                if node.high >= q_low {
                    node.values.iter().for_each(&mut f);
                }
            }
        }
    }

    pub fn remove(&mut self, low: u32, high: u32, value: &T) -> bool {
        let Some(nodes) = self.map.get_mut(&low) else {
            return false;
        };
        let Some(node) = nodes.iter_mut().find(|n| n.high == high) else {
            return false;
        };
        let removed = node.values.remove(value);
        if node.values.is_empty() {
            nodes.retain(|n| n.high != high);
            self.size -= 1;
        }
        if nodes.is_empty() {
            self.map.remove(&low);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlapping(tree: &IntervalTree<&'static str>, lo: u32, hi: u32) -> Vec<&'static str> {
        let mut out = Vec::new();
        tree.for_each_overlapping(lo, hi, |v| out.push(*v));
        out.sort_unstable();
        out
    }

    #[test]
    fn nested_and_partial_overlaps() {
        let mut tree = IntervalTree::new();
        tree.insert(10, 100, "A");
        tree.insert(20, 50, "B");
        tree.insert(30, 40, "C");
        tree.insert(5, 15, "D");
        tree.insert(95, 105, "E");

        assert_eq!(overlapping(&tree, 35, 35), vec!["A", "B", "C"]);
        assert_eq!(overlapping(&tree, 98, 102), vec!["A", "E"]);
        assert!(overlapping(&tree, 106, 200).is_empty());
    }

    #[test]
    fn size_counts_intervals_not_values() {
        let mut tree = IntervalTree::new();
        tree.insert(10, 10, "one");
        tree.insert(10, 10, "two");
        assert_eq!(tree.len(), 1);

        assert!(tree.remove(10, 10, &"one"));
        assert_eq!(tree.len(), 1);
        assert!(tree.remove(10, 10, &"two"));
        assert!(tree.is_empty());
        assert!(!tree.remove(10, 10, &"two"));
    }

    #[test]
    fn sparse_tail_query() {
        let mut tree = IntervalTree::new();
        for i in (0..1_000_000u32).step_by(10_000) {
            tree.insert(i, i, i);
        }
        let mut hits = 0;
        tree.for_each_overlapping(500_000, u32::MAX, |_| hits += 1);
        assert_eq!(hits, 50);
    }
}
