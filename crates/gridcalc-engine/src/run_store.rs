//! Run-length compressed attribute arrays.
//!
//! A [`RunStore`] maps every index in `0..=max` to a value, stored as sorted,
//! contiguous, non-overlapping runs. Adjacent runs never hold equal values:
//! every mutation re-merges the neighbourhood it touched, so the run layout is
//! canonical for a given logical content.
//!
//! Point reads keep a cached last-hit run index, so sequential scans are O(1)
//! amortised. The cache is an atomic so that a store can be read from several
//! evaluation threads at once.

use std::sync::atomic::{AtomicUsize, Ordering};

use gridcalc_common::{SheetError, SheetResult};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

/// A run `[start, end]` holding `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run<T> {
    pub start: u32,
    pub end: u32,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry<T> {
    end: u32,
    value: T,
}

pub struct RunStore<T> {
    entries: Vec<Entry<T>>,
    max: u32,
    hint: AtomicUsize,
}

impl<T: Copy + PartialEq> Clone for RunStore<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            max: self.max,
            hint: AtomicUsize::new(0),
        }
    }
}

impl<T: Copy + PartialEq + std::fmt::Debug> std::fmt::Debug for RunStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.runs()).finish()
    }
}

impl<T: Copy + PartialEq> PartialEq for RunStore<T> {
    fn eq(&self, other: &Self) -> bool {
        self.max == other.max && self.entries == other.entries
    }
}

/// Accumulates runs in index order, merging equal neighbours and clamping to `max`.
struct Builder<T> {
    out: Vec<Entry<T>>,
    max: u32,
}

impl<T: Copy + PartialEq> Builder<T> {
    fn new(max: u32, capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
            max,
        }
    }

    fn next_start(&self) -> u32 {
        self.out.last().map(|e| e.end + 1).unwrap_or(0)
    }

    fn full(&self) -> bool {
        self.out.last().is_some_and(|e| e.end >= self.max)
    }

    fn push(&mut self, end: u32, value: T) {
        if self.full() || end < self.next_start() {
            return;
        }
        let end = end.min(self.max);
        match self.out.last_mut() {
            Some(last) if last.value == value => last.end = end,
            _ => self.out.push(Entry { end, value }),
        }
    }

    fn finish(self) -> Vec<Entry<T>> {
        self.out
    }
}

impl<T: Copy + PartialEq> RunStore<T> {
    /// A store covering `0..=max`, uniformly `value`.
    pub fn new(max: u32, value: T) -> Self {
        Self {
            entries: vec![Entry { end: max, value }],
            max,
            hint: AtomicUsize::new(0),
        }
    }

    /// Rebuild from explicit runs, validating contiguity and coverage.
    pub fn from_runs(max: u32, runs: &[Run<T>]) -> SheetResult<Self> {
        let mut builder = Builder::new(max, runs.len());
        let mut expected = 0u32;
        for run in runs {
            if run.start != expected || run.end < run.start || run.end > max {
                return Err(SheetError::Cache(format!(
                    "run [{}, {}] does not continue at {expected}",
                    run.start, run.end
                )));
            }
            builder.push(run.end, run.value);
            expected = run.end.saturating_add(1);
        }
        if !builder.full() {
            return Err(SheetError::Cache(format!("runs stop before {max}")));
        }
        Ok(Self {
            entries: builder.finish(),
            max,
            hint: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn max_index(&self) -> u32 {
        self.max
    }

    #[inline]
    pub fn run_count(&self) -> usize {
        self.entries.len()
    }

    fn check(&self, index: u32) -> SheetResult<()> {
        if index <= self.max {
            Ok(())
        } else {
            Err(SheetError::IndexOutOfRange {
                what: "run-store",
                index: index as u64,
                max: self.max as u64,
            })
        }
    }

    fn check_span(&self, start: u32, end: u32) -> SheetResult<()> {
        self.check(end)?;
        if start > end {
            return Err(SheetError::InvalidRange(format!(
                "run-store span {start}..={end} is reversed"
            )));
        }
        Ok(())
    }

    #[inline]
    fn run_start(&self, i: usize) -> u32 {
        if i == 0 { 0 } else { self.entries[i - 1].end + 1 }
    }

    /// Index of the entry containing `index`; caller guarantees `index <= max`.
    fn entry_index(&self, index: u32) -> usize {
        let hint = self.hint.load(Ordering::Relaxed);
        if hint < self.entries.len()
            && self.entries[hint].end >= index
            && self.run_start(hint) <= index
        {
            return hint;
        }
        let i = self.entries.partition_point(|e| e.end < index);
        self.hint.store(i, Ordering::Relaxed);
        i
    }

    pub fn get(&self, index: u32) -> SheetResult<T> {
        self.check(index)?;
        Ok(self.entries[self.entry_index(index)].value)
    }

    /// Read with `index` clamped to `max`.
    pub fn get_clamped(&self, index: u32) -> T {
        self.entries[self.entry_index(index.min(self.max))].value
    }

    /// The whole run containing `index`.
    pub fn get_with_bounds(&self, index: u32) -> SheetResult<Run<T>> {
        self.check(index)?;
        let i = self.entry_index(index);
        Ok(Run {
            start: self.run_start(i),
            end: self.entries[i].end,
            value: self.entries[i].value,
        })
    }

    /// Merge equal neighbours within `lo..=hi` (entry indices).
    fn coalesce(&mut self, lo: usize, hi: usize) {
        let mut hi = hi.min(self.entries.len().saturating_sub(1));
        let mut i = lo;
        while i < hi {
            if self.entries[i].value == self.entries[i + 1].value {
                self.entries.remove(i);
                hi -= 1;
            } else {
                i += 1;
            }
        }
    }

    pub fn set_range(&mut self, start: u32, end: u32, value: T) -> SheetResult<()> {
        self.check_span(start, end)?;
        let first = self.entry_index(start);
        let last = self.entry_index(end);
        let first_start = self.run_start(first);
        let last_entry = self.entries[last];

        let mut replacement: SmallVec<[Entry<T>; 3]> = smallvec![];
        if first_start < start {
            replacement.push(Entry {
                end: start - 1,
                value: self.entries[first].value,
            });
        }
        replacement.push(Entry { end, value });
        if last_entry.end > end {
            replacement.push(last_entry);
        }
        let inserted = replacement.len();
        self.entries.splice(first..=last, replacement);
        self.coalesce(first.saturating_sub(1), first + inserted);
        self.hint.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Replace each value in `start..=end` with `f(value)`.
    pub fn apply_range(&mut self, start: u32, end: u32, f: impl Fn(T) -> T) -> SheetResult<()> {
        self.check_span(start, end)?;
        let mut pieces: SmallVec<[Run<T>; 8]> = SmallVec::new();
        self.for_each_run(start, end, |run| pieces.push(run));
        for run in pieces {
            let next = f(run.value);
            if next != run.value {
                self.set_range(run.start, run.end, next)?;
            }
        }
        Ok(())
    }

    /// The highest index whose value differs from the value at `max`, i.e.
    /// everything after the returned index is uniform. `None` if the store
    /// holds a single run.
    pub fn last_changed(&self) -> Option<u32> {
        let n = self.entries.len();
        (n > 1).then(|| self.entries[n - 2].end)
    }

    /// Visit runs intersecting `start..=end`, clipped to that span.
    pub fn for_each_run(&self, start: u32, end: u32, mut f: impl FnMut(Run<T>)) {
        if start > end || start > self.max {
            return;
        }
        let end = end.min(self.max);
        let mut i = self.entry_index(start);
        let mut s = start;
        while i < self.entries.len() && s <= end {
            let e = self.entries[i].end.min(end);
            f(Run {
                start: s,
                end: e,
                value: self.entries[i].value,
            });
            s = e + 1;
            i += 1;
        }
    }

    pub fn runs(&self) -> impl Iterator<Item = Run<T>> + '_ {
        self.entries.iter().enumerate().map(|(i, e)| Run {
            start: self.run_start(i),
            end: e.end,
            value: e.value,
        })
    }

    /// Open `count` indices at `start`, shifting later values up. Values pushed
    /// past `max` are dropped; the opened span repeats the value before `start`.
    pub fn insert(&mut self, start: u32, count: u32) -> SheetResult<()> {
        self.check(start)?;
        if count == 0 {
            return Ok(());
        }
        let fill = self.get_clamped(start.saturating_sub(1));
        let mut b = Builder::new(self.max, self.entries.len() + 2);
        let mut filled = false;
        for run in self.runs() {
            if run.end < start {
                b.push(run.end, run.value);
                continue;
            }
            if run.start < start {
                b.push(start - 1, run.value);
            }
            if !filled {
                b.push(start.saturating_add(count - 1), fill);
                filled = true;
            }
            b.push(run.end.saturating_add(count), run.value);
        }
        self.entries = b.finish();
        self.hint.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Remove `count` indices at `start`, shifting later values down. The
    /// vacated tail repeats the value that was at `max`.
    pub fn remove(&mut self, start: u32, count: u32) -> SheetResult<()> {
        self.check(start)?;
        let count = count.min(self.max - start + 1);
        if count == 0 {
            return Ok(());
        }
        let end = start + count - 1;
        let tail = self.get_clamped(self.max);
        let mut b = Builder::new(self.max, self.entries.len());
        for run in self.runs() {
            let before = if run.start < start {
                run.end.min(start - 1) - run.start + 1
            } else {
                0
            };
            let after = if run.end > end {
                run.end - run.start.max(end + 1) + 1
            } else {
                0
            };
            let kept = before + after;
            if kept > 0 {
                let next = b.next_start();
                b.push(next + kept - 1, run.value);
            }
        }
        b.push(self.max, tail);
        self.entries = b.finish();
        self.hint.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Number of indices in `start..=end` whose value satisfies `pred`.
    pub fn count_matching(&self, start: u32, end: u32, pred: impl Fn(T) -> bool) -> u32 {
        let mut n = 0;
        self.for_each_run(start, end, |run| {
            if pred(run.value) {
                n += run.end - run.start + 1;
            }
        });
        n
    }

    pub fn first_matching(&self, start: u32, end: u32, pred: impl Fn(T) -> bool) -> Option<u32> {
        let mut found = None;
        self.for_each_run(start, end, |run| {
            if found.is_none() && pred(run.value) {
                found = Some(run.start);
            }
        });
        found
    }

    pub fn last_matching(&self, start: u32, end: u32, pred: impl Fn(T) -> bool) -> Option<u32> {
        let mut found = None;
        self.for_each_run(start, end, |run| {
            if pred(run.value) {
                found = Some(run.end);
            }
        });
        found
    }
}

impl<T: Copy + PartialEq + Into<u64>> RunStore<T> {
    /// Sum of the values over every index in `start..=end`.
    pub fn sum_range(&self, start: u32, end: u32) -> u64 {
        let mut total = 0u64;
        self.for_each_run(start, end, |run| {
            total += (run.end - run.start + 1) as u64 * run.value.into();
        });
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout<T: Copy + PartialEq>(s: &RunStore<T>) -> Vec<(u32, u32, T)> {
        s.runs().map(|r| (r.start, r.end, r.value)).collect()
    }

    #[test]
    fn equal_neighbours_collapse() {
        let mut s = RunStore::new(99, 0u16);
        s.set_range(0, 9, 7).unwrap();
        s.set_range(10, 19, 7).unwrap();
        assert_eq!(layout(&s), vec![(0, 19, 7), (20, 99, 0)]);
        assert_eq!(s.last_changed(), Some(19));
    }

    #[test]
    fn set_splits_and_remerges() {
        let mut s = RunStore::new(20, false);
        s.set_range(5, 10, true).unwrap();
        s.set_range(7, 8, false).unwrap();
        assert_eq!(
            layout(&s),
            vec![(0, 4, false), (5, 6, true), (7, 8, false), (9, 10, true), (11, 20, false)]
        );
        s.set_range(7, 8, true).unwrap();
        assert_eq!(layout(&s), vec![(0, 4, false), (5, 10, true), (11, 20, false)]);
        s.set_range(0, 20, false).unwrap();
        assert_eq!(s.run_count(), 1);
        assert_eq!(s.last_changed(), None);
    }

    #[test]
    fn out_of_range_is_rejected_not_clamped() {
        let mut s = RunStore::new(9, 1u16);
        assert!(matches!(
            s.get(10),
            Err(SheetError::IndexOutOfRange { index: 10, .. })
        ));
        assert!(s.set_range(5, 10, 2).is_err());
        assert_eq!(s.run_count(), 1);
        assert_eq!(s.get_clamped(1_000), 1);
    }

    #[test]
    fn insert_repeats_preceding_value() {
        let mut s = RunStore::new(9, 0u16);
        s.set_range(2, 3, 5).unwrap();
        s.insert(3, 2).unwrap();
        assert_eq!(layout(&s), vec![(0, 1, 0), (2, 5, 5), (6, 9, 0)]);
        s.insert(0, 1).unwrap();
        assert_eq!(layout(&s), vec![(0, 2, 0), (3, 6, 5), (7, 9, 0)]);
    }

    #[test]
    fn remove_fills_tail_with_last_value() {
        let mut s = RunStore::new(9, 0u16);
        s.set_range(8, 9, 3).unwrap();
        s.set_range(2, 4, 1).unwrap();
        s.remove(2, 3).unwrap();
        assert_eq!(layout(&s), vec![(0, 4, 0), (5, 9, 3)]);
    }

    #[test]
    fn apply_and_queries() {
        let mut s = RunStore::new(15, 0u8);
        s.set_range(4, 7, 1).unwrap();
        s.apply_range(6, 9, |v| v | 2).unwrap();
        assert_eq!(layout(&s), vec![(0, 3, 0), (4, 5, 1), (6, 7, 3), (8, 9, 2), (10, 15, 0)]);
        assert_eq!(s.count_matching(0, 15, |v| v & 2 != 0), 4);
        assert_eq!(s.first_matching(0, 15, |v| v != 0), Some(4));
        assert_eq!(s.last_matching(0, 15, |v| v != 0), Some(9));
        assert_eq!(s.sum_range(0, 15), 2 + 3 * 2 + 2 * 2);
        let run = s.get_with_bounds(7).unwrap();
        assert_eq!((run.start, run.end, run.value), (6, 7, 3));
    }

    #[test]
    fn from_runs_validates() {
        let runs = [
            Run { start: 0, end: 3, value: 1u16 },
            Run { start: 4, end: 9, value: 1u16 },
        ];
        let s = RunStore::from_runs(9, &runs).unwrap();
        assert_eq!(s.run_count(), 1);
        let gap = [Run { start: 1, end: 9, value: 1u16 }];
        assert!(RunStore::from_runs(9, &gap).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u32, u32, u8),
        Insert(u32, u32),
        Remove(u32, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..64, 0u32..64, 0u8..3).prop_map(|(a, b, v)| Op::Set(a.min(b), a.max(b), v)),
            (0u32..64, 1u32..8).prop_map(|(a, n)| Op::Insert(a, n)),
            (0u32..64, 1u32..8).prop_map(|(a, n)| Op::Remove(a, n)),
        ]
    }

    proptest! {
        #[test]
        fn matches_dense_model(ops in proptest::collection::vec(op(), 1..40)) {
            let max = 63u32;
            let mut store = RunStore::new(max, 0u8);
            let mut model = vec![0u8; 64];
            for op in ops {
                match op {
                    Op::Set(a, b, v) => {
                        store.set_range(a, b, v).unwrap();
                        for x in &mut model[a as usize..=b as usize] { *x = v; }
                    }
                    Op::Insert(a, n) => {
                        store.insert(a, n).unwrap();
                        let fill = model[a.saturating_sub(1) as usize];
                        for _ in 0..n { model.insert(a as usize, fill); }
                        model.truncate(64);
                    }
                    Op::Remove(a, n) => {
                        store.remove(a, n).unwrap();
                        let n = n.min(max - a + 1) as usize;
                        let tail = model[63];
                        model.drain(a as usize..a as usize + n);
                        model.resize(64, tail);
                    }
                }
                for (i, v) in model.iter().enumerate() {
                    prop_assert_eq!(store.get(i as u32).unwrap(), *v);
                }
                let runs: Vec<_> = store.runs().collect();
                for pair in runs.windows(2) {
                    prop_assert!(pair[0].value != pair[1].value);
                    prop_assert_eq!(pair[0].end + 1, pair[1].start);
                }
                prop_assert_eq!(runs.last().map(|r| r.end), Some(max));
            }
        }
    }
}
