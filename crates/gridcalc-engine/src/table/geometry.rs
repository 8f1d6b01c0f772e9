//! Row/column sizes, visibility, page breaks and outlines of a table.

use std::collections::BTreeSet;

use gridcalc_common::SheetResult;

use super::{Outline, Table};
use crate::flags::ColRowFlags;
use crate::run_store::RunStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Rows,
    Cols,
}

impl Table {
    /* ────────────────────────────── Sizes ────────────────────────────── */

    pub fn col_width(&self, col: u32) -> u16 {
        self.col_widths.get_clamped(col)
    }

    pub fn set_col_width(&mut self, col1: u32, col2: u32, width: u16) -> SheetResult<()> {
        self.col_widths.set_range(col1, col2, width)?;
        self.col_flags
            .apply_range(col1, col2, |f| f | ColRowFlags::MANUAL_SIZE)
    }

    pub fn row_height(&self, row: u32) -> u16 {
        self.row_heights.get_clamped(row)
    }

    /// Set heights of `row1..=row2`. A `manual` height is kept when content
    /// changes; otherwise the flag is cleared.
    pub fn set_row_height(&mut self, row1: u32, row2: u32, height: u16, manual: bool) -> SheetResult<()> {
        self.row_heights.set_range(row1, row2, height)?;
        self.row_flags.apply_range(row1, row2, |f| {
            if manual {
                f | ColRowFlags::MANUAL_SIZE
            } else {
                f - ColRowFlags::MANUAL_SIZE
            }
        })
    }

    pub fn is_manual_row_height(&self, row: u32) -> bool {
        self.row_flags
            .get_clamped(row)
            .contains(ColRowFlags::MANUAL_SIZE)
    }

    pub fn row_flags(&self) -> &RunStore<ColRowFlags> {
        &self.row_flags
    }

    pub fn col_flags(&self) -> &RunStore<ColRowFlags> {
        &self.col_flags
    }

    /// Total height of `row1..=row2` in twips, optionally counting hidden
    /// rows as zero.
    pub fn total_row_height(&self, row1: u32, row2: u32, hidden_as_zero: bool) -> u64 {
        if !hidden_as_zero {
            return self.row_heights.sum_range(row1, row2);
        }
        let mut total = 0;
        self.hidden_rows.for_each_run(row1, row2, |run| {
            if !run.value {
                total += self.row_heights.sum_range(run.start, run.end);
            }
        });
        total
    }

    pub fn total_col_width(&self, col1: u32, col2: u32, hidden_as_zero: bool) -> u64 {
        if !hidden_as_zero {
            return self.col_widths.sum_range(col1, col2);
        }
        let mut total = 0;
        self.hidden_cols.for_each_run(col1, col2, |run| {
            if !run.value {
                total += self.col_widths.sum_range(run.start, run.end);
            }
        });
        total
    }

    /* ─────────────────────────── Visibility ──────────────────────────── */

    pub fn set_row_hidden(&mut self, row1: u32, row2: u32, hidden: bool) -> SheetResult<()> {
        self.hidden_rows.set_range(row1, row2, hidden)
    }

    pub fn is_row_hidden(&self, row: u32) -> bool {
        self.hidden_rows.get_clamped(row)
    }

    /// The maximal span around `row` sharing its hidden state.
    pub fn row_hidden_span(&self, row: u32) -> SheetResult<(u32, u32, bool)> {
        let run = self.hidden_rows.get_with_bounds(row)?;
        Ok((run.start, run.end, run.value))
    }

    pub fn set_col_hidden(&mut self, col1: u32, col2: u32, hidden: bool) -> SheetResult<()> {
        self.hidden_cols.set_range(col1, col2, hidden)
    }

    pub fn is_col_hidden(&self, col: u32) -> bool {
        self.hidden_cols.get_clamped(col)
    }

    pub fn set_row_filtered(&mut self, row1: u32, row2: u32, filtered: bool) -> SheetResult<()> {
        self.filtered_rows.set_range(row1, row2, filtered)
    }

    pub fn is_row_filtered(&self, row: u32) -> bool {
        self.filtered_rows.get_clamped(row)
    }

    pub fn has_filtered_rows(&self, row1: u32, row2: u32) -> bool {
        self.filtered_rows.first_matching(row1, row2, |f| f).is_some()
    }

    pub fn filtered_rows(&self) -> &RunStore<bool> {
        &self.filtered_rows
    }

    pub fn count_visible_rows(&self, row1: u32, row2: u32) -> u32 {
        self.hidden_rows.count_matching(row1, row2, |h| !h)
    }

    pub fn first_visible_row(&self, row1: u32, row2: u32) -> Option<u32> {
        self.hidden_rows.first_matching(row1, row2, |h| !h)
    }

    pub fn last_visible_row(&self, row1: u32, row2: u32) -> Option<u32> {
        self.hidden_rows.last_matching(row1, row2, |h| !h)
    }

    /// Rows of `row1..=row2` not removed by a filter, in order.
    pub fn visible_rows(&self, row1: u32, row2: u32) -> impl Iterator<Item = u32> + '_ {
        let mut spans = Vec::new();
        self.filtered_rows.for_each_run(row1, row2, |run| {
            if !run.value {
                spans.push(run.start..=run.end);
            }
        });
        spans.into_iter().flatten()
    }

    /* ─────────────────────────── Page breaks ─────────────────────────── */

    fn break_stores(&mut self, axis: Axis) -> (&mut RunStore<ColRowFlags>, &mut BTreeSet<u32>) {
        match axis {
            Axis::Rows => (&mut self.row_flags, &mut self.row_auto_breaks),
            Axis::Cols => (&mut self.col_flags, &mut self.col_auto_breaks),
        }
    }

    /// Add a page break before `index`.
    pub fn set_break(&mut self, axis: Axis, index: u32, manual: bool) -> SheetResult<()> {
        let (flags, auto) = self.break_stores(axis);
        if manual {
            flags.apply_range(index, index, |f| f | ColRowFlags::MANUAL_BREAK)
        } else {
            flags.get(index)?;
            auto.insert(index);
            Ok(())
        }
    }

    pub fn remove_break(&mut self, axis: Axis, index: u32, manual: bool) -> SheetResult<()> {
        let (flags, auto) = self.break_stores(axis);
        if manual {
            flags.apply_range(index, index, |f| f - ColRowFlags::MANUAL_BREAK)
        } else {
            auto.remove(&index);
            Ok(())
        }
    }

    pub fn has_manual_break(&self, axis: Axis, index: u32) -> bool {
        let flags = match axis {
            Axis::Rows => &self.row_flags,
            Axis::Cols => &self.col_flags,
        };
        flags.get_clamped(index).contains(ColRowFlags::MANUAL_BREAK)
    }

    pub fn has_page_break(&self, axis: Axis, index: u32) -> bool {
        let auto = match axis {
            Axis::Rows => &self.row_auto_breaks,
            Axis::Cols => &self.col_auto_breaks,
        };
        auto.contains(&index) || self.has_manual_break(axis, index)
    }

    /// First manual break at or after `from`.
    pub fn next_manual_break(&self, axis: Axis, from: u32) -> Option<u32> {
        let (flags, max) = match axis {
            Axis::Rows => (&self.row_flags, self.limits.max_row),
            Axis::Cols => (&self.col_flags, self.limits.max_col),
        };
        flags.first_matching(from, max, |f| f.contains(ColRowFlags::MANUAL_BREAK))
    }

    /// Every break position (manual and automatic), sorted.
    pub fn breaks(&self, axis: Axis) -> Vec<u32> {
        let (flags, auto, max) = match axis {
            Axis::Rows => (&self.row_flags, &self.row_auto_breaks, self.limits.max_row),
            Axis::Cols => (&self.col_flags, &self.col_auto_breaks, self.limits.max_col),
        };
        let mut out: BTreeSet<u32> = auto.clone();
        flags.for_each_run(0, max, |run| {
            if run.value.contains(ColRowFlags::MANUAL_BREAK) {
                out.extend(run.start..=run.end);
            }
        });
        out.into_iter().collect()
    }

    pub fn remove_manual_breaks(&mut self, axis: Axis) -> SheetResult<()> {
        let (flags, _) = self.break_stores(axis);
        let max = flags.max_index();
        flags.apply_range(0, max, |f| f - ColRowFlags::MANUAL_BREAK)
    }

    pub fn clear_auto_breaks(&mut self, axis: Axis) {
        self.break_stores(axis).1.clear();
    }

    /* ──────────────────────────── Outlines ───────────────────────────── */

    pub fn outline(&self, axis: Axis) -> &Outline {
        match axis {
            Axis::Rows => &self.row_outline,
            Axis::Cols => &self.col_outline,
        }
    }

    pub fn add_outline(&mut self, axis: Axis, start: u32, end: u32) -> SheetResult<u8> {
        match axis {
            Axis::Rows => {
                self.limits.check_row(end)?;
                self.row_outline.add(start, end)
            }
            Axis::Cols => {
                self.limits.check_col(end)?;
                self.col_outline.add(start, end)
            }
        }
    }

    pub fn remove_outline(&mut self, axis: Axis, start: u32, end: u32) -> bool {
        match axis {
            Axis::Rows => self.row_outline.remove(start, end),
            Axis::Cols => self.col_outline.remove(start, end),
        }
    }

    /// Collapse (`show == false`) or expand a group, hiding or showing the
    /// rows/columns it covers. Returns `false` when no such group exists.
    pub fn show_outline(&mut self, axis: Axis, start: u32, end: u32, show: bool) -> SheetResult<bool> {
        let spans = match axis {
            Axis::Rows => self.row_outline.show(start, end, show),
            Axis::Cols => self.col_outline.show(start, end, show),
        };
        let Some(spans) = spans else {
            return Ok(false);
        };
        for (s, e) in spans {
            match axis {
                Axis::Rows => self.set_row_hidden(s, e, !show)?,
                Axis::Cols => self.set_col_hidden(s, e, !show)?,
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{DEFAULT_COL_WIDTH, DEFAULT_ROW_HEIGHT};
    use gridcalc_common::SheetLimits;

    fn table() -> Table {
        Table::new(0, "S", SheetLimits::new(99, 999), 1)
    }

    #[test]
    fn heights_and_hidden_rows() {
        let mut t = table();
        t.set_row_height(10, 19, 400, true).unwrap();
        assert_eq!(t.row_height(15), 400);
        assert!(t.is_manual_row_height(10));
        assert!(!t.is_manual_row_height(9));
        t.set_row_hidden(12, 13, true).unwrap();
        assert_eq!(t.total_row_height(10, 19, false), 4000);
        assert_eq!(t.total_row_height(10, 19, true), 3200);
        assert_eq!(t.count_visible_rows(10, 19), 8);
        assert_eq!(t.first_visible_row(12, 20), Some(14));
        assert_eq!(t.last_visible_row(0, 13), Some(11));
        assert_eq!(t.row_hidden_span(12).unwrap(), (12, 13, true));
        assert_eq!(t.col_width(3), DEFAULT_COL_WIDTH);
        assert_eq!(t.row_height(0), DEFAULT_ROW_HEIGHT);
    }

    #[test]
    fn manual_and_automatic_breaks() {
        let mut t = table();
        t.set_break(Axis::Rows, 40, true).unwrap();
        t.set_break(Axis::Rows, 20, false).unwrap();
        assert!(t.has_manual_break(Axis::Rows, 40));
        assert!(t.has_page_break(Axis::Rows, 20));
        assert!(!t.has_manual_break(Axis::Rows, 20));
        assert_eq!(t.next_manual_break(Axis::Rows, 0), Some(40));
        assert_eq!(t.breaks(Axis::Rows), vec![20, 40]);

        t.insert_rows(0, 99, 10, 5).unwrap();
        assert_eq!(t.breaks(Axis::Rows), vec![25, 45]);

        t.remove_manual_breaks(Axis::Rows).unwrap();
        assert_eq!(t.breaks(Axis::Rows), vec![25]);
        assert!(t.set_break(Axis::Cols, 100, false).is_err());
    }

    #[test]
    fn outline_collapse_hides_rows() {
        let mut t = table();
        assert_eq!(t.add_outline(Axis::Rows, 5, 9).unwrap(), 1);
        assert!(t.show_outline(Axis::Rows, 5, 9, false).unwrap());
        assert!(t.is_row_hidden(7));
        assert!(t.show_outline(Axis::Rows, 5, 9, true).unwrap());
        assert!(!t.is_row_hidden(7));
        assert!(!t.show_outline(Axis::Rows, 0, 1, true).unwrap());
    }

    #[test]
    fn visible_rows_skip_filtered() {
        let mut t = table();
        t.set_row_filtered(2, 3, true).unwrap();
        let rows: Vec<u32> = t.visible_rows(0, 5).collect();
        assert_eq!(rows, vec![0, 1, 4, 5]);
        assert!(t.has_filtered_rows(0, 5));
        assert!(!t.has_filtered_rows(4, 9));
    }
}
