use gridcalc_common::{SheetError, SheetResult};
use serde::{Deserialize, Serialize};

pub const MAX_OUTLINE_DEPTH: u8 = 8;

/// One collapsible row or column group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub start: u32,
    pub end: u32,
    /// Nesting level, 1 for outermost groups.
    pub level: u8,
    pub hidden: bool,
}

impl OutlineEntry {
    fn contains(&self, start: u32, end: u32) -> bool {
        self.start <= start && end <= self.end
    }

    fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start <= end && start <= self.end
    }
}

/// Nested groups along one axis. Groups either nest or are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    entries: Vec<OutlineEntry>,
}

impl Outline {
    pub fn entries(&self) -> &[OutlineEntry] {
        &self.entries
    }

    pub fn depth(&self) -> u8 {
        self.entries.iter().map(|e| e.level).max().unwrap_or(0)
    }

    /// Add a group over `start..=end`; returns its level.
    pub fn add(&mut self, start: u32, end: u32) -> SheetResult<u8> {
        if start > end {
            return Err(SheetError::InvalidRange(format!("outline {start}..={end}")));
        }
        if self.entries.iter().any(|e| e.start == start && e.end == end) {
            return Err(SheetError::InvalidRange(format!(
                "outline {start}..={end} already exists"
            )));
        }
        let crossing = self.entries.iter().any(|e| {
            e.overlaps(start, end) && !e.contains(start, end) && !(start <= e.start && e.end <= end)
        });
        if crossing {
            return Err(SheetError::InvalidRange(format!(
                "outline {start}..={end} crosses an existing group"
            )));
        }
        let level = 1 + self
            .entries
            .iter()
            .filter(|e| e.contains(start, end))
            .map(|e| e.level)
            .max()
            .unwrap_or(0);
        let deepest_inner = self
            .entries
            .iter()
            .filter(|e| start <= e.start && e.end <= end)
            .map(|e| e.level)
            .max()
            .unwrap_or(0);
        if level.max(deepest_inner + 1) > MAX_OUTLINE_DEPTH {
            return Err(SheetError::InvalidRange(format!(
                "outline deeper than {MAX_OUTLINE_DEPTH} levels"
            )));
        }
        for e in &mut self.entries {
            if start <= e.start && e.end <= end {
                e.level += 1;
            }
        }
        self.entries.push(OutlineEntry {
            start,
            end,
            level,
            hidden: false,
        });
        self.entries.sort_by_key(|e| (e.start, e.level));
        Ok(level)
    }

    /// Remove the group exactly covering `start..=end`; nested groups move
    /// up one level.
    pub fn remove(&mut self, start: u32, end: u32) -> bool {
        let Some(i) = self
            .entries
            .iter()
            .position(|e| e.start == start && e.end == end)
        else {
            return false;
        };
        self.entries.remove(i);
        for e in &mut self.entries {
            if start <= e.start && e.end <= end {
                e.level -= 1;
            }
        }
        true
    }

    /// Collapse or expand the group at `start..=end`. Returns the spans whose
    /// visibility must change: the whole group when collapsing, and when
    /// expanding the parts not covered by a still-collapsed nested group.
    pub fn show(&mut self, start: u32, end: u32, show: bool) -> Option<Vec<(u32, u32)>> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.start == start && e.end == end)?;
        entry.hidden = !show;
        if !show {
            return Some(vec![(start, end)]);
        }
        let mut collapsed: Vec<(u32, u32)> = self
            .entries
            .iter()
            .filter(|e| e.hidden && start <= e.start && e.end <= end)
            .map(|e| (e.start, e.end))
            .collect();
        collapsed.sort_unstable();
        let mut spans = Vec::new();
        let mut cursor = start;
        for (s, e) in collapsed {
            if s > cursor {
                spans.push((cursor, s - 1));
            }
            cursor = cursor.max(e.saturating_add(1));
        }
        if cursor <= end {
            spans.push((cursor, end));
        }
        Some(spans)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn insert(&mut self, at: u32, count: u32, max: u32) {
        for e in &mut self.entries {
            if e.start >= at {
                e.start = e.start.saturating_add(count).min(max);
                e.end = e.end.saturating_add(count).min(max);
            } else if e.end >= at {
                e.end = e.end.saturating_add(count).min(max);
            }
        }
    }

    /// Shift for a delete of `at..at+count`; groups that vanish entirely are
    /// dropped.
    pub(crate) fn delete(&mut self, at: u32, count: u32) {
        if count == 0 {
            return;
        }
        let last = at + count - 1;
        self.entries.retain_mut(|e| {
            if e.start >= at && e.end <= last {
                return false;
            }
            e.start = shrink_start(e.start, at, last, count);
            e.end = shrink_end(e.end, at, last, count);
            true
        });
    }
}

fn shrink_start(v: u32, at: u32, last: u32, count: u32) -> u32 {
    if v < at {
        v
    } else if v > last {
        v - count
    } else {
        at
    }
}

fn shrink_end(v: u32, at: u32, last: u32, count: u32) -> u32 {
    if v < at {
        v
    } else if v > last {
        v - count
    } else {
        at - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_levels_and_removal() {
        let mut o = Outline::default();
        assert_eq!(o.add(2, 10).unwrap(), 1);
        assert_eq!(o.add(4, 6).unwrap(), 2);
        assert_eq!(o.add(0, 20).unwrap(), 1);
        assert_eq!(o.depth(), 3);
        assert!(o.add(5, 12).is_err());
        assert!(o.remove(2, 10));
        assert_eq!(o.depth(), 2);
    }

    #[test]
    fn expanding_keeps_collapsed_children_hidden() {
        let mut o = Outline::default();
        o.add(0, 9).unwrap();
        o.add(3, 4).unwrap();
        assert_eq!(o.show(3, 4, false), Some(vec![(3, 4)]));
        assert_eq!(o.show(0, 9, false), Some(vec![(0, 9)]));
        assert_eq!(o.show(0, 9, true), Some(vec![(0, 2), (5, 9)]));
    }

    #[test]
    fn shifts_follow_structural_edits() {
        let mut o = Outline::default();
        o.add(5, 9).unwrap();
        o.add(20, 21).unwrap();
        o.insert(7, 3, 100);
        assert_eq!((o.entries()[0].start, o.entries()[0].end), (5, 12));
        o.delete(20, 5);
        assert_eq!(o.entries().len(), 1);
        o.delete(4, 3);
        assert_eq!((o.entries()[0].start, o.entries()[0].end), (4, 9));
    }
}
