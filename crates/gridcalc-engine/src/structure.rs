//! Structural edits: row/column insert and delete, and copy, move and
//! transpose of cell blocks.
//!
//! Every operation validates completely before touching storage, so an
//! `Err` leaves the document unchanged. After storage moves, formula cell
//! positions are resynchronised, the reference-update pass rewrites
//! operands, and the shifted area is broadcast.

use std::sync::Arc;

use gridcalc_common::{CellAddr, RangeAddr, SheetError, SheetResult, SheetTab};
use gridcalc_formula::{Formula, Reference, SheetScope};

use crate::arena::FormulaCell;
use crate::cell::{Cell, Note, Sparkline};
use crate::column::Column;
use crate::document::Document;
use crate::flags::ProtectionAllow;
use crate::ref_update::RefUpdate;

/// Cell content lifted out of a block before it is written elsewhere.
enum Lifted {
    Plain(Cell),
    Formula(Arc<Formula>),
    Moved(FormulaCell),
}

/// A note or sparkline travelling with its cell.
enum Attached {
    Note(Note),
    Sparkline(Sparkline),
}

impl Attached {
    fn place(self, column: &mut Column, row: u32) -> SheetResult<()> {
        match self {
            Attached::Note(n) => column.set_note(row, Some(n)),
            Attached::Sparkline(s) => column.set_sparkline(row, Some(s)),
        }
    }
}

struct LiftedCell {
    dcol: u32,
    drow: u32,
    content: Lifted,
}

impl Document {
    fn check_structural(&self, tab: SheetTab, action: ProtectionAllow) -> SheetResult<()> {
        self.check_unlocked()?;
        self.sheet(tab)?.meta.check_allowed(action)
    }

    /// Refuse partial-width edits that would split a merged area.
    fn check_merges_for_rows(
        &self,
        tab: SheetTab,
        col1: u32,
        col2: u32,
        row: u32,
    ) -> SheetResult<()> {
        let table = self.sheet(tab)?;
        let limits = self.config.limits;
        if col1 == 0 && col2 >= limits.max_col {
            return Ok(());
        }
        let below = RangeAddr::new(tab, 0, row, limits.max_col, limits.max_row);
        for m in table.merged_areas() {
            let overlaps = m.col2 >= col1 && m.col1 <= col2;
            let sticks_out = m.col1 < col1 || m.col2 > col2;
            if m.intersects(&below) && overlaps && sticks_out {
                return Err(SheetError::MergedCellsInRange(m.to_a1()));
            }
        }
        Ok(())
    }

    fn notify_shifted(&mut self, area: RangeAddr) {
        self.deps.access().notify_range(area);
    }

    /* ──────────────────────────── Rows ───────────────────────────────── */

    pub fn insert_rows(&mut self, tab: SheetTab, row: u32, count: u32) -> SheetResult<()> {
        let max_col = self.config.limits.max_col;
        self.insert_rows_in(tab, 0, max_col, row, count)
    }

    /// Insert `count` rows at `row`, shifting only columns `col1..=col2`.
    pub fn insert_rows_in(
        &mut self,
        tab: SheetTab,
        col1: u32,
        col2: u32,
        row: u32,
        count: u32,
    ) -> SheetResult<()> {
        let limits = self.config.limits;
        self.check_structural(tab, ProtectionAllow::INSERT_ROWS)?;
        limits.check_row(row)?;
        limits.check_col(col2)?;
        if col1 > col2 {
            return Err(SheetError::InvalidRange(format!("columns {col1}..={col2}")));
        }
        self.sheet(tab)?.can_insert_rows(col1, col2, count)?;
        self.check_merges_for_rows(tab, col1, col2, row)?;

        self.tables[tab as usize].insert_rows(col1, col2, row, count)?;
        self.resync_positions(tab);
        self.update_references(&RefUpdate::InsertRows {
            tab,
            col1,
            col2,
            row,
            count,
        })?;
        self.notify_shifted(RangeAddr::new(tab, col1, row, col2, limits.max_row));
        tracing::debug!(tab, row, count, col1, col2, "rows inserted");
        self.after_edit();
        Ok(())
    }

    pub fn delete_rows(&mut self, tab: SheetTab, row: u32, count: u32) -> SheetResult<()> {
        let max_col = self.config.limits.max_col;
        self.delete_rows_in(tab, 0, max_col, row, count)
    }

    /// Delete rows `row..row+count` in columns `col1..=col2`, shifting the
    /// cells below up.
    pub fn delete_rows_in(
        &mut self,
        tab: SheetTab,
        col1: u32,
        col2: u32,
        row: u32,
        count: u32,
    ) -> SheetResult<()> {
        let limits = self.config.limits;
        self.check_structural(tab, ProtectionAllow::DELETE_ROWS)?;
        limits.check_row(row)?;
        limits.check_col(col2)?;
        if col1 > col2 || count == 0 {
            return Err(SheetError::InvalidRange(format!(
                "delete {count} rows in columns {col1}..={col2}"
            )));
        }
        let count = count.min(limits.max_row - row + 1);
        self.check_merges_for_rows(tab, col1, col2, row)?;

        let removed = self.tables[tab as usize].delete_rows(col1, col2, row, count)?;
        let mut access = self.deps.access();
        for part in removed {
            for (_, cell) in part.cells {
                if let Cell::Formula(id) = cell {
                    access.detach_formula(id);
                }
            }
        }
        self.resync_positions(tab);
        self.update_references(&RefUpdate::DeleteRows {
            tab,
            col1,
            col2,
            row,
            count,
        })?;
        self.notify_shifted(RangeAddr::new(tab, col1, row, col2, limits.max_row));
        tracing::debug!(tab, row, count, col1, col2, "rows deleted");
        self.after_edit();
        Ok(())
    }

    /* ─────────────────────────── Columns ─────────────────────────────── */

    pub fn insert_cols(&mut self, tab: SheetTab, col: u32, count: u32) -> SheetResult<()> {
        let limits = self.config.limits;
        self.check_structural(tab, ProtectionAllow::INSERT_COLUMNS)?;
        limits.check_col(col)?;
        self.sheet(tab)?.can_insert_cols(count)?;

        self.tables[tab as usize].insert_cols(col, count)?;
        self.resync_positions(tab);
        self.update_references(&RefUpdate::InsertCols { tab, col, count })?;
        self.notify_shifted(RangeAddr::new(tab, col, 0, limits.max_col, limits.max_row));
        tracing::debug!(tab, col, count, "columns inserted");
        self.after_edit();
        Ok(())
    }

    pub fn delete_cols(&mut self, tab: SheetTab, col: u32, count: u32) -> SheetResult<()> {
        let limits = self.config.limits;
        self.check_structural(tab, ProtectionAllow::DELETE_COLUMNS)?;
        limits.check_col(col)?;
        if count == 0 {
            return Err(SheetError::InvalidRange("delete 0 columns".into()));
        }
        let count = count.min(limits.max_col - col + 1);

        let removed = self.tables[tab as usize].delete_cols(col, count)?;
        let mut access = self.deps.access();
        for column in &removed {
            for (_, id) in column.formula_rows() {
                access.detach_formula(id);
            }
        }
        self.resync_positions(tab);
        self.update_references(&RefUpdate::DeleteCols { tab, col, count })?;
        self.notify_shifted(RangeAddr::new(tab, col, 0, limits.max_col, limits.max_row));
        tracing::debug!(tab, col, count, "columns deleted");
        self.after_edit();
        Ok(())
    }

    /* ──────────────────────── Copy / move / transpose ─────────────────── */

    fn check_block(
        &self,
        src: &RangeAddr,
        dest: CellAddr,
        transpose: bool,
    ) -> SheetResult<RangeAddr> {
        let limits = self.config.limits;
        self.sheet(src.tab)?;
        limits.check_range(src)?;
        let (w, h) = if transpose {
            (src.height(), src.width())
        } else {
            (src.width(), src.height())
        };
        let target = RangeAddr::new(
            dest.tab,
            dest.col,
            dest.row,
            dest.col + w - 1,
            dest.row + h - 1,
        );
        self.sheet(dest.tab)?
            .meta
            .check_allowed(ProtectionAllow::EDIT_CELLS)?;
        limits.check_range(&target)?;
        Ok(target)
    }

    /// Copy the content of `src` so its top-left lands on `dest`. Relative
    /// references in copied formulas move with the cell.
    pub fn copy_range(&mut self, src: RangeAddr, dest: CellAddr) -> SheetResult<()> {
        self.copy_block(src, dest, false)
    }

    /// Copy `src` to `dest` with rows and columns swapped.
    pub fn transpose_range(&mut self, src: RangeAddr, dest: CellAddr) -> SheetResult<()> {
        self.copy_block(src, dest, true)
    }

    fn copy_block(&mut self, src: RangeAddr, dest: CellAddr, transpose: bool) -> SheetResult<()> {
        let target = self.check_block(&src, dest, transpose)?;
        let lifted = self.lift(&src, false);
        let attached = self.lift_attached(&src, false);
        let limits = self.config.limits;

        let mut access = self.deps.access();
        let table = &mut self.tables[dest.tab as usize];
        for c in target.col1..=target.col2.min(table.allocated_columns().saturating_sub(1)) {
            if let Some(column) = table.allocated_column_mut(c) {
                column.clear_range(target.row1, target.row2, &mut access)?;
            }
        }
        for item in lifted {
            let (dc, dr) = if transpose {
                (item.drow, item.dcol)
            } else {
                (item.dcol, item.drow)
            };
            let (col, row) = (dest.col + dc, dest.row + dr);
            let column = table.column_mut(col)?;
            match item.content {
                Lifted::Plain(cell) => column.put_cell(row, cell, &mut access)?,
                Lifted::Formula(f) => {
                    let dcol = col as i64 - (src.col1 + item.dcol) as i64;
                    let drow = row as i64 - (src.row1 + item.drow) as i64;
                    let f = retarget_local(&f.rebased(dcol, drow, &limits), src.tab, dest.tab);
                    column.set_formula(row, Arc::new(f), &mut access)?;
                }
                Lifted::Moved(_) => {}
            }
        }
        for (dc, dr, item) in attached {
            let (dc, dr) = if transpose { (dr, dc) } else { (dc, dr) };
            item.place(table.column_mut(dest.col + dc)?, dest.row + dr)?;
        }
        tracing::debug!(%src, %dest, transpose, "block copied");
        self.after_edit();
        Ok(())
    }

    /// Move the content of `src` to `dest`. References anywhere in the
    /// document that point into `src` follow the data.
    pub fn move_range(&mut self, src: RangeAddr, dest: CellAddr) -> SheetResult<()> {
        self.check_unlocked()?;
        let target = self.check_block(&src, dest, false)?;
        self.sheet(src.tab)?
            .meta
            .check_allowed(ProtectionAllow::EDIT_CELLS)?;
        if src.start() == dest {
            return Ok(());
        }
        let lifted = self.lift(&src, true);
        let attached = self.lift_attached(&src, true);

        let mut access = self.deps.access();
        let table = &mut self.tables[dest.tab as usize];
        for c in target.col1..=target.col2.min(table.allocated_columns().saturating_sub(1)) {
            if let Some(column) = table.allocated_column_mut(c) {
                column.clear_range(target.row1, target.row2, &mut access)?;
            }
        }
        for item in lifted {
            let column = table.column_mut(dest.col + item.dcol)?;
            let row = dest.row + item.drow;
            match item.content {
                Lifted::Plain(cell) => column.put_cell(row, cell, &mut access)?,
                Lifted::Moved(cell) => {
                    column.put_formula_cell(row, cell, &mut access)?;
                }
                Lifted::Formula(f) => {
                    column.set_formula(row, f, &mut access)?;
                }
            }
        }
        for (dc, dr, item) in attached {
            item.place(table.column_mut(dest.col + dc)?, dest.row + dr)?;
        }
        access.notify_range(src);
        self.update_references(&RefUpdate::MoveRange { from: src, to: dest })?;
        tracing::debug!(%src, %dest, "block moved");
        self.after_edit();
        Ok(())
    }

    /// Collect the cells of `src` relative to its top-left corner. With
    /// `take` the cells are removed and formula cells detached whole.
    fn lift(&mut self, src: &RangeAddr, take: bool) -> Vec<LiftedCell> {
        let mut out = Vec::new();
        let mut access = self.deps.access();
        let table = &mut self.tables[src.tab as usize];
        let last = src.col2.min(table.allocated_columns().saturating_sub(1));
        if table.allocated_columns() == 0 || src.col1 > last {
            return out;
        }
        for c in src.col1..=last {
            let Some(column) = table.allocated_column_mut(c) else {
                continue;
            };
            let rows: Vec<u32> = column.iter_range(src.row1, src.row2).map(|(r, _)| r).collect();
            for row in rows {
                let content = if take {
                    match column.take_raw(row) {
                        Some(Cell::Formula(id)) => match access.detach_formula(id) {
                            Some(cell) => Lifted::Moved(cell),
                            None => continue,
                        },
                        Some(cell) => Lifted::Plain(cell),
                        None => continue,
                    }
                } else {
                    match column.cell(row) {
                        Some(Cell::Formula(id)) => match access.formula(*id) {
                            Some(fc) => Lifted::Formula(fc.formula.clone()),
                            None => continue,
                        },
                        Some(cell) => Lifted::Plain(cell.clone()),
                        None => continue,
                    }
                };
                out.push(LiftedCell {
                    dcol: c - src.col1,
                    drow: row - src.row1,
                    content,
                });
            }
            if take {
                column.split_formula_groups(src.row1);
            }
        }
        out
    }

    /// Notes and sparklines of `src`, relative to its top-left corner.
    fn lift_attached(&mut self, src: &RangeAddr, take: bool) -> Vec<(u32, u32, Attached)> {
        let table = &mut self.tables[src.tab as usize];
        let rows = src.row1..=src.row2;
        let mut out = Vec::new();
        for c in src.col1..=src.col2.min(table.allocated_columns().saturating_sub(1)) {
            let Some(column) = table.allocated_column_mut(c) else {
                continue;
            };
            let note_rows: Vec<u32> = column
                .notes()
                .map(|(r, _)| r)
                .filter(|r| rows.contains(r))
                .collect();
            let spark_rows: Vec<u32> = column
                .sparklines()
                .map(|(r, _)| r)
                .filter(|r| rows.contains(r))
                .collect();
            for row in note_rows {
                let note = if take {
                    column.take_note(row)
                } else {
                    column.note(row).cloned()
                };
                if let Some(note) = note {
                    out.push((c - src.col1, row - src.row1, Attached::Note(note)));
                }
            }
            for row in spark_rows {
                let sparkline = if take {
                    column.take_sparkline(row)
                } else {
                    column.sparkline(row).cloned()
                };
                if let Some(s) = sparkline {
                    out.push((c - src.col1, row - src.row1, Attached::Sparkline(s)));
                }
            }
        }
        out
    }
}

/// Point unqualified references at `to` when a formula is copied from sheet
/// `from` to another sheet.
fn retarget_local(formula: &Formula, from: SheetTab, to: SheetTab) -> Formula {
    if from == to {
        return formula.clone();
    }
    let retarget = |sheet: &SheetScope| {
        if !sheet.explicit && sheet.tab == from {
            SheetScope::local(to)
        } else {
            *sheet
        }
    };
    formula
        .map_references(|r| match r {
            Reference::Cell { sheet, at } => Reference::Cell {
                sheet: retarget(sheet),
                at: *at,
            },
            Reference::Area { sheet, start, end } => Reference::Area {
                sheet: retarget(sheet),
                start: *start,
                end: *end,
            },
            Reference::Invalid => Reference::Invalid,
        })
        .unwrap_or_else(|| formula.clone())
}
