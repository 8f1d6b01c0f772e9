//! A sheet: its columns, sheet-level run-stores and metadata.
//!
//! Columns are allocated lazily and contiguously from column 0; reads past
//! the allocated width go through a shared empty default column and never
//! allocate. Operations that need to keep the dependency graph in step take
//! a [`ColumnStorageAccess`]; the rest are plain storage edits.

mod geometry;
mod meta;
mod outline;

pub use geometry::Axis;
pub use meta::{
    ConditionalFormat, NamedRange, PrintSetup, Scenario, SheetMeta, SheetProtection, Visibility,
};
pub use outline::{MAX_OUTLINE_DEPTH, Outline, OutlineEntry};

use std::collections::BTreeSet;

use gridcalc_common::{CellAddr, RangeAddr, SheetError, SheetLimits, SheetResult, SheetTab};

use crate::access::ColumnStorageAccess;
use crate::arena::FormulaArena;
use crate::cell::CellView;
use crate::column::{Column, RemovedRows};
use crate::flags::{ColRowFlags, MergeFlags};
use crate::query::QueryParam;
use crate::run_store::RunStore;
use crate::sort::SortParam;

/// Default column width in twips.
pub const DEFAULT_COL_WIDTH: u16 = 1280;
/// Default row height in twips.
pub const DEFAULT_ROW_HEIGHT: u16 = 256;

#[derive(Debug, Clone)]
pub struct Table {
    tab: SheetTab,
    limits: SheetLimits,
    columns: Vec<Column>,
    default_column: Column,
    pub meta: SheetMeta,
    col_widths: RunStore<u16>,
    row_heights: RunStore<u16>,
    row_flags: RunStore<ColRowFlags>,
    col_flags: RunStore<ColRowFlags>,
    hidden_rows: RunStore<bool>,
    hidden_cols: RunStore<bool>,
    filtered_rows: RunStore<bool>,
    row_auto_breaks: BTreeSet<u32>,
    col_auto_breaks: BTreeSet<u32>,
    row_outline: Outline,
    col_outline: Outline,
    merges: Vec<RangeAddr>,
    pub(crate) sort_param: Option<SortParam>,
    pub(crate) query_param: Option<QueryParam>,
}

impl Table {
    pub fn new(tab: SheetTab, name: impl Into<String>, limits: SheetLimits, eager_columns: u32) -> Self {
        let eager = eager_columns.min(limits.max_col + 1);
        Self {
            tab,
            limits,
            columns: (0..eager).map(|c| Column::new(tab, c, limits.max_row)).collect(),
            default_column: Column::new(tab, 0, limits.max_row),
            meta: SheetMeta::new(name),
            col_widths: RunStore::new(limits.max_col, DEFAULT_COL_WIDTH),
            row_heights: RunStore::new(limits.max_row, DEFAULT_ROW_HEIGHT),
            row_flags: RunStore::new(limits.max_row, ColRowFlags::empty()),
            col_flags: RunStore::new(limits.max_col, ColRowFlags::empty()),
            hidden_rows: RunStore::new(limits.max_row, false),
            hidden_cols: RunStore::new(limits.max_col, false),
            filtered_rows: RunStore::new(limits.max_row, false),
            row_auto_breaks: BTreeSet::new(),
            col_auto_breaks: BTreeSet::new(),
            row_outline: Outline::default(),
            col_outline: Outline::default(),
            merges: Vec::new(),
            sort_param: None,
            query_param: None,
        }
    }

    #[inline]
    pub fn tab(&self) -> SheetTab {
        self.tab
    }

    pub(crate) fn set_tab(&mut self, tab: SheetTab) {
        self.tab = tab;
        for (i, col) in self.columns.iter_mut().enumerate() {
            col.set_position(tab, i as u32);
        }
        self.default_column.set_position(tab, 0);
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    #[inline]
    pub fn limits(&self) -> &SheetLimits {
        &self.limits
    }

    /* ───────────────────────────── Columns ───────────────────────────── */

    pub fn allocated_columns(&self) -> u32 {
        self.columns.len() as u32
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The column at `col`, or the shared empty default when unallocated.
    pub fn column(&self, col: u32) -> &Column {
        self.columns.get(col as usize).unwrap_or(&self.default_column)
    }

    pub fn allocated_column_mut(&mut self, col: u32) -> Option<&mut Column> {
        self.columns.get_mut(col as usize)
    }

    /// The column at `col`, allocating it (and every column before it).
    pub fn column_mut(&mut self, col: u32) -> SheetResult<&mut Column> {
        self.limits.check_col(col)?;
        while self.columns.len() <= col as usize {
            let next = self.columns.len() as u32;
            tracing::trace!(tab = self.tab, col = next, "allocate column");
            self.columns
                .push(Column::new(self.tab, next, self.limits.max_row));
        }
        Ok(&mut self.columns[col as usize])
    }

    /// Clamp `col2` to the allocated width when the request reaches the
    /// last column of the sheet, so whole-row operations do not allocate
    /// every column.
    pub fn clamp_to_allocated(&self, col1: u32, col2: u32) -> Option<(u32, u32)> {
        if col2 < self.limits.max_col {
            return Some((col1, col2));
        }
        let last = self.allocated_columns().checked_sub(1)?;
        (col1 <= last).then_some((col1, last))
    }

    pub fn get_cell<'a>(&'a self, col: u32, row: u32, formulas: &'a FormulaArena) -> CellView<'a> {
        self.column(col).get_cell(row, formulas)
    }

    /* ─────────────────────────── Used area ───────────────────────────── */

    pub fn get_cell_count(&self) -> usize {
        self.columns.iter().map(Column::cell_count).sum()
    }

    pub fn cell_count_in(&self, range: &RangeAddr) -> usize {
        (range.col1..=range.col2.min(self.allocated_columns().saturating_sub(1)))
            .map(|c| self.column(c).iter_range(range.row1, range.row2).count())
            .sum()
    }

    /// Bounding box of every non-empty cell.
    pub fn get_cell_area(&self) -> Option<RangeAddr> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for col in self.columns.iter().filter(|c| !c.is_empty()) {
            let (Some(first), Some(last)) = (col.first_data_row(), col.last_data_row()) else {
                continue;
            };
            let c = col.col();
            bounds = Some(match bounds {
                None => (c, first, c, last),
                Some((c1, r1, _, r2)) => (c1, r1.min(first), c, r2.max(last)),
            });
        }
        bounds.map(|(c1, r1, c2, r2)| RangeAddr::new(self.tab, c1, r1, c2, r2))
    }

    /// First cell in column-major order.
    pub fn get_first_data_pos(&self) -> Option<CellAddr> {
        self.columns
            .iter()
            .find_map(|c| c.first_data_row().map(|r| CellAddr::new(self.tab, c.col(), r)))
    }

    /// Last column holding data together with the last row used by any
    /// column.
    pub fn get_last_data_pos(&self) -> Option<CellAddr> {
        let area = self.get_cell_area()?;
        Some(CellAddr::new(self.tab, area.col2, area.row2))
    }

    pub fn last_data_row(&self, col1: u32, col2: u32) -> Option<u32> {
        let (col1, col2) = self.clamp_to_allocated(col1, col2)?;
        (col1..=col2.min(self.allocated_columns().saturating_sub(1)))
            .filter_map(|c| self.column(c).last_data_row())
            .max()
    }

    pub fn is_block_empty(&self, col1: u32, row1: u32, col2: u32, row2: u32, ignore_notes: bool) -> bool {
        let Some((col1, col2)) = self.clamp_to_allocated(col1, col2) else {
            return true;
        };
        (col1..=col2).all(|c| {
            let column = self.column(c);
            column.is_empty_block(row1, row2)
                && (ignore_notes || column.notes().all(|(r, _)| r < row1 || r > row2))
        })
    }

    /// Area of data around `range`. With `include_neighbours` the area
    /// grows while an adjacent row or column holds data; the result is then
    /// trimmed to the rows and columns actually used.
    pub fn get_data_area(&self, range: RangeAddr, include_neighbours: bool) -> RangeAddr {
        let (mut c1, mut r1, mut c2, mut r2) = (range.col1, range.row1, range.col2, range.row2);
        if include_neighbours {
            loop {
                let mut grown = false;
                let lo_r = r1.saturating_sub(1);
                let hi_r = (r2 + 1).min(self.limits.max_row);
                if c1 > 0 && self.column(c1 - 1).has_data(lo_r, hi_r) {
                    c1 -= 1;
                    grown = true;
                }
                if c2 < self.limits.max_col && self.column(c2 + 1).has_data(lo_r, hi_r) {
                    c2 += 1;
                    grown = true;
                }
                let lo_c = c1.saturating_sub(1);
                let hi_c = (c2 + 1).min(self.limits.max_col);
                if r1 > 0 && !self.is_block_empty(lo_c, r1 - 1, hi_c, r1 - 1, true) {
                    r1 -= 1;
                    grown = true;
                }
                if r2 < self.limits.max_row && !self.is_block_empty(lo_c, r2 + 1, hi_c, r2 + 1, true) {
                    r2 += 1;
                    grown = true;
                }
                if !grown {
                    break;
                }
            }
        }
        while c1 < c2 && self.column(c1).is_empty_block(r1, r2) {
            c1 += 1;
        }
        while c2 > c1 && self.column(c2).is_empty_block(r1, r2) {
            c2 -= 1;
        }
        while r1 < r2 && self.is_block_empty(c1, r1, c2, r1, true) {
            r1 += 1;
        }
        while r2 > r1 && self.is_block_empty(c1, r2, c2, r2, true) {
            r2 -= 1;
        }
        RangeAddr::new(self.tab, c1, r1, c2, r2)
    }

    /* ────────────────────────── Merged cells ─────────────────────────── */

    pub fn merged_areas(&self) -> &[RangeAddr] {
        &self.merges
    }

    pub fn merged_area_at(&self, col: u32, row: u32) -> Option<RangeAddr> {
        let addr = CellAddr::new(self.tab, col, row);
        self.merges.iter().copied().find(|m| m.contains(addr))
    }

    pub fn is_merged(&self, col: u32, row: u32) -> bool {
        self.merged_area_at(col, row).is_some()
    }

    /// True when a merged area spanning more than one row touches `range`.
    pub fn has_vertical_merges(&self, range: &RangeAddr) -> bool {
        self.merges
            .iter()
            .any(|m| m.height() > 1 && m.intersects(range))
    }

    pub fn set_merged_cells(&mut self, range: RangeAddr) -> SheetResult<()> {
        self.limits.check_range(&range)?;
        let range = range.with_tab(self.tab);
        if range.is_single_cell() {
            return Err(SheetError::InvalidRange(format!(
                "{} is a single cell",
                range.to_a1()
            )));
        }
        if self.merges.iter().any(|m| m.intersects(&range)) {
            return Err(SheetError::MergedCellsInRange(range.to_a1()));
        }
        self.column_mut(range.col2)?;
        self.merges.push(range);
        self.apply_merge_markers(&range)
    }

    /// Remove the merged area containing `(col, row)`.
    pub fn remove_merge(&mut self, col: u32, row: u32) -> SheetResult<bool> {
        let Some(area) = self.merged_area_at(col, row) else {
            return Ok(false);
        };
        self.merges.retain(|m| *m != area);
        for c in area.col1..=area.col2 {
            if let Some(column) = self.allocated_column_mut(c) {
                column.apply_merge_flags(area.row1, area.row2, |f| {
                    f & MergeFlags::AUTO_FILTER
                })?;
            }
        }
        Ok(true)
    }

    fn apply_merge_markers(&mut self, area: &RangeAddr) -> SheetResult<()> {
        for c in area.col1..=area.col2 {
            let column = self.column_mut(c)?;
            for row in area.row1..=area.row2 {
                let mut marker = MergeFlags::empty();
                if c == area.col1 && row == area.row1 {
                    marker |= MergeFlags::ORIGIN;
                }
                if c > area.col1 {
                    marker |= MergeFlags::HOR_OVERLAPPED;
                }
                if row > area.row1 {
                    marker |= MergeFlags::VER_OVERLAPPED;
                }
                column.apply_merge_flags(row, row, |f| f | marker)?;
            }
        }
        Ok(())
    }

    /// Re-derive every column's merge markers from the merged-area list.
    pub(crate) fn rebuild_merge_flags(&mut self) -> SheetResult<()> {
        let max_row = self.limits.max_row;
        for column in &mut self.columns {
            column.apply_merge_flags(0, max_row, |f| f & MergeFlags::AUTO_FILTER)?;
        }
        for area in self.merges.clone() {
            self.apply_merge_markers(&area)?;
        }
        Ok(())
    }

    pub(crate) fn map_merges(&mut self, mut f: impl FnMut(RangeAddr) -> Option<RangeAddr>) {
        self.merges = self
            .merges
            .iter()
            .filter_map(|m| f(*m))
            .filter(|m| !m.is_single_cell())
            .collect();
    }

    /* ─────────────────────── Structural primitives ───────────────────── */

    /// Fails with `WouldPushDataOut` when inserting `count` rows in
    /// `col1..=col2` would move data past the last row.
    pub fn can_insert_rows(&self, col1: u32, col2: u32, count: u32) -> SheetResult<()> {
        if count == 0 || count > self.limits.max_row {
            return Err(SheetError::InvalidRange(format!("cannot insert {count} rows")));
        }
        let first_lost = self.limits.max_row + 1 - count;
        if !self.is_block_empty(col1, first_lost, col2, self.limits.max_row, false) {
            return Err(SheetError::WouldPushDataOut { count });
        }
        Ok(())
    }

    pub fn can_insert_cols(&self, count: u32) -> SheetResult<()> {
        if count == 0 || count > self.limits.max_col {
            return Err(SheetError::InvalidRange(format!("cannot insert {count} columns")));
        }
        let first_lost = self.limits.max_col + 1 - count;
        if (first_lost..self.allocated_columns()).any(|c| !self.column(c).is_empty()) {
            return Err(SheetError::WouldPushDataOut { count });
        }
        Ok(())
    }

    fn full_width(&self, col1: u32, col2: u32) -> bool {
        col1 == 0 && col2 >= self.limits.max_col
    }

    /// Shift cells of `col1..=col2` at or below `row` down by `count`. When
    /// the span covers every column the sheet-level row stores move too.
    pub(crate) fn insert_rows(&mut self, col1: u32, col2: u32, row: u32, count: u32) -> SheetResult<()> {
        if let Some((c1, c2)) = self.clamp_to_allocated(col1, col2) {
            for c in c1..=c2.min(self.allocated_columns().saturating_sub(1)) {
                self.columns[c as usize].insert_rows(row, count)?;
            }
        }
        if self.full_width(col1, col2) {
            let max = self.limits.max_row;
            self.row_heights.insert(row, count)?;
            self.row_flags.insert(row, count)?;
            let last = row.saturating_add(count - 1).min(max);
            self.row_flags
                .apply_range(row, last, |f| f - ColRowFlags::MANUAL_BREAK)?;
            self.hidden_rows.insert(row, count)?;
            self.filtered_rows.insert(row, count)?;
            shift_set_insert(&mut self.row_auto_breaks, row, count, max);
            self.row_outline.insert(row, count, max);
        }
        Ok(())
    }

    /// Remove rows `row..row+count` in `col1..=col2`; returns what was
    /// removed from each column so formula cells can be detached.
    pub(crate) fn delete_rows(
        &mut self,
        col1: u32,
        col2: u32,
        row: u32,
        count: u32,
    ) -> SheetResult<Vec<RemovedRows>> {
        let mut removed = Vec::new();
        if let Some((c1, c2)) = self.clamp_to_allocated(col1, col2) {
            for c in c1..=c2.min(self.allocated_columns().saturating_sub(1)) {
                removed.push(self.columns[c as usize].delete_rows(row, count)?);
            }
        }
        if self.full_width(col1, col2) {
            self.row_heights.remove(row, count)?;
            self.row_flags.remove(row, count)?;
            self.hidden_rows.remove(row, count)?;
            self.filtered_rows.remove(row, count)?;
            shift_set_delete(&mut self.row_auto_breaks, row, count);
            self.row_outline.delete(row, count);
        }
        Ok(removed)
    }

    /// Open `count` empty columns at `col`, shifting later columns right.
    pub(crate) fn insert_cols(&mut self, col: u32, count: u32) -> SheetResult<()> {
        let max = self.limits.max_col;
        if (col as usize) < self.columns.len() {
            let (tab, max_row) = (self.tab, self.limits.max_row);
            let fresh = (0..count).map(|_| Column::new(tab, 0, max_row));
            self.columns.splice(col as usize..col as usize, fresh);
            self.columns.truncate(max as usize + 1);
            self.renumber_columns();
        }
        self.col_widths.insert(col, count)?;
        self.col_flags.insert(col, count)?;
        let last = col.saturating_add(count - 1).min(max);
        self.col_flags
            .apply_range(col, last, |f| f - ColRowFlags::MANUAL_BREAK)?;
        self.hidden_cols.insert(col, count)?;
        shift_set_insert(&mut self.col_auto_breaks, col, count, max);
        self.col_outline.insert(col, count, max);
        Ok(())
    }

    /// Remove columns `col..col+count`; the removed columns are returned.
    pub(crate) fn delete_cols(&mut self, col: u32, count: u32) -> SheetResult<Vec<Column>> {
        let len = self.columns.len() as u32;
        let removed: Vec<Column> = if col < len {
            let end = col.saturating_add(count).min(len);
            self.columns.drain(col as usize..end as usize).collect()
        } else {
            Vec::new()
        };
        self.renumber_columns();
        self.col_widths.remove(col, count)?;
        self.col_flags.remove(col, count)?;
        self.hidden_cols.remove(col, count)?;
        shift_set_delete(&mut self.col_auto_breaks, col, count);
        self.col_outline.delete(col, count);
        Ok(removed)
    }

    fn renumber_columns(&mut self) {
        let tab = self.tab;
        for (i, column) in self.columns.iter_mut().enumerate() {
            column.set_position(tab, i as u32);
        }
    }

    /// Detach every formula cell of the sheet and drop all content. Used
    /// before the sheet itself is removed.
    pub(crate) fn clear_all(&mut self, access: &mut ColumnStorageAccess<'_>) {
        for column in &mut self.columns {
            let ids: Vec<_> = column.formula_rows().map(|(_, id)| id).collect();
            for id in ids {
                access.detach_formula(id);
            }
        }
        let max_row = self.limits.max_row;
        self.columns = (0..self.columns.len() as u32)
            .map(|c| Column::new(self.tab, c, max_row))
            .collect();
    }
}

fn shift_set_insert(set: &mut BTreeSet<u32>, at: u32, count: u32, max: u32) {
    let tail = set.split_off(&at);
    set.extend(
        tail.into_iter()
            .filter_map(|v| v.checked_add(count).filter(|v| *v <= max)),
    );
}

fn shift_set_delete(set: &mut BTreeSet<u32>, at: u32, count: u32) {
    let end = at.saturating_add(count);
    let tail = set.split_off(&at);
    set.extend(tail.into_iter().filter(|v| *v >= end).map(|v| v - count));
}
