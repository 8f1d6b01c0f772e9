//! Reference-update pass run after structural edits.
//!
//! A [`RefUpdate`] describes one structural change. The pass rewrites every
//! formula operand, dynamic dependency, external listener range and
//! sheet-local range (merges, named ranges, print ranges, ...) in the
//! document in one go. Rewritten formula cells are re-registered under
//! their new targets and marked dirty.
//!
//! References move regardless of `$` anchors; anchors only matter when a
//! formula is copied.

use std::sync::Arc;

use gridcalc_common::{CellAddr, CellValue, RangeAddr, SheetLimits, SheetResult, SheetTab};
use gridcalc_formula::{RefPoint, Reference, SheetScope};
use smallvec::SmallVec;

use crate::arena::FormulaId;
use crate::broadcast::Listener;
use crate::cell::Cell;
use crate::config::DeletedRefPolicy;
use crate::context::StringPool;
use crate::document::Document;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdate {
    /// `count` rows opened at `row` in columns `col1..=col2`.
    InsertRows {
        tab: SheetTab,
        col1: u32,
        col2: u32,
        row: u32,
        count: u32,
    },
    DeleteRows {
        tab: SheetTab,
        col1: u32,
        col2: u32,
        row: u32,
        count: u32,
    },
    InsertCols {
        tab: SheetTab,
        col: u32,
        count: u32,
    },
    DeleteCols {
        tab: SheetTab,
        col: u32,
        count: u32,
    },
    InsertTab {
        tab: SheetTab,
    },
    DeleteTab {
        tab: SheetTab,
    },
    MoveTab {
        from: SheetTab,
        to: SheetTab,
    },
    /// Rows `row1..row1+targets.len()` of `col1..=col2` were permuted; the
    /// row at offset `i` moved to offset `targets[i]`. Only single-cell
    /// references follow their data.
    Reorder {
        tab: SheetTab,
        col1: u32,
        col2: u32,
        row1: u32,
        targets: Arc<[u32]>,
    },
    /// The block `from` was moved so its top-left corner is now `to`.
    MoveRange { from: RangeAddr, to: CellAddr },
}

fn shift_insert(lo: u32, hi: u32, at: u32, count: u32, max: u32) -> Option<(u32, u32)> {
    if hi < at {
        return Some((lo, hi));
    }
    if lo >= at {
        let lo = lo.checked_add(count).filter(|v| *v <= max)?;
        return Some((lo, hi.saturating_add(count).min(max)));
    }
    Some((lo, hi.saturating_add(count).min(max)))
}

fn shift_delete(lo: u32, hi: u32, at: u32, count: u32) -> Option<(u32, u32)> {
    let last = at + count - 1;
    if hi < at {
        return Some((lo, hi));
    }
    if lo > last {
        return Some((lo - count, hi - count));
    }
    if lo >= at && hi <= last {
        return None;
    }
    let lo = if lo < at { lo } else { at };
    let hi = if hi > last { hi - count } else { at - 1 };
    Some((lo, hi))
}

fn moved_tab(t: SheetTab, from: SheetTab, to: SheetTab) -> SheetTab {
    if t == from {
        to
    } else if from < to && t > from && t <= to {
        t - 1
    } else if to < from && t >= to && t < from {
        t + 1
    } else {
        t
    }
}

impl RefUpdate {
    pub fn is_delete(&self) -> bool {
        matches!(self, RefUpdate::DeleteRows { .. } | RefUpdate::DeleteCols { .. })
    }

    /// Where `range` ends up, or `None` when its target no longer exists.
    pub fn adjust_range(&self, range: RangeAddr, limits: &SheetLimits) -> Option<RangeAddr> {
        let r = range;
        match *self {
            RefUpdate::InsertRows {
                tab,
                col1,
                col2,
                row,
                count,
            } => {
                if r.tab != tab || r.col1 < col1 || r.col2 > col2 {
                    return Some(r);
                }
                let (r1, r2) = shift_insert(r.row1, r.row2, row, count, limits.max_row)?;
                Some(RangeAddr::new(r.tab, r.col1, r1, r.col2, r2))
            }
            RefUpdate::DeleteRows {
                tab,
                col1,
                col2,
                row,
                count,
            } => {
                if r.tab != tab || r.col1 < col1 || r.col2 > col2 || count == 0 {
                    return Some(r);
                }
                let (r1, r2) = shift_delete(r.row1, r.row2, row, count)?;
                Some(RangeAddr::new(r.tab, r.col1, r1, r.col2, r2))
            }
            RefUpdate::InsertCols { tab, col, count } => {
                if r.tab != tab {
                    return Some(r);
                }
                let (c1, c2) = shift_insert(r.col1, r.col2, col, count, limits.max_col)?;
                Some(RangeAddr::new(r.tab, c1, r.row1, c2, r.row2))
            }
            RefUpdate::DeleteCols { tab, col, count } => {
                if r.tab != tab || count == 0 {
                    return Some(r);
                }
                let (c1, c2) = shift_delete(r.col1, r.col2, col, count)?;
                Some(RangeAddr::new(r.tab, c1, r.row1, c2, r.row2))
            }
            RefUpdate::InsertTab { tab } => {
                Some(if r.tab >= tab { r.with_tab(r.tab + 1) } else { r })
            }
            RefUpdate::DeleteTab { tab } => match r.tab.cmp(&tab) {
                std::cmp::Ordering::Equal => None,
                std::cmp::Ordering::Greater => Some(r.with_tab(r.tab - 1)),
                std::cmp::Ordering::Less => Some(r),
            },
            RefUpdate::MoveTab { from, to } => Some(r.with_tab(moved_tab(r.tab, from, to))),
            RefUpdate::Reorder {
                tab,
                col1,
                col2,
                row1,
                ref targets,
            } => {
                if !r.is_single_cell() || r.tab != tab || r.col1 < col1 || r.col1 > col2 {
                    return Some(r);
                }
                let Some(offset) = r.row1.checked_sub(row1) else {
                    return Some(r);
                };
                match targets.get(offset as usize) {
                    Some(t) => Some(RangeAddr::single(CellAddr::new(tab, r.col1, row1 + t))),
                    None => Some(r),
                }
            }
            RefUpdate::MoveRange { from, to } => {
                if !from.contains_range(&r) {
                    return Some(r);
                }
                let c1 = to.col + (r.col1 - from.col1);
                let r1 = to.row + (r.row1 - from.row1);
                let c2 = c1 + (r.col2 - r.col1);
                let r2 = r1 + (r.row2 - r.row1);
                (limits.valid_col(c2) && limits.valid_row(r2))
                    .then(|| RangeAddr::new(to.tab, c1, r1, c2, r2))
            }
        }
    }

    pub fn adjust_cell(&self, addr: CellAddr, limits: &SheetLimits) -> Option<CellAddr> {
        self.adjust_range(RangeAddr::single(addr), limits)
            .map(|r| r.start())
    }

    /// Rewrite one formula operand. Deleted targets become
    /// [`Reference::Invalid`].
    pub fn adjust_reference(&self, reference: &Reference, limits: &SheetLimits) -> Reference {
        let Some(range) = reference.range() else {
            return Reference::Invalid;
        };
        let Some(next) = self.adjust_range(range, limits) else {
            return Reference::Invalid;
        };
        if next == range {
            return reference.clone();
        }
        match reference {
            Reference::Cell { sheet, at } => Reference::Cell {
                sheet: SheetScope {
                    tab: next.tab,
                    ..*sheet
                },
                at: at.with_position(next.col1, next.row1),
            },
            Reference::Area { sheet, start, end } => Reference::Area {
                sheet: SheetScope {
                    tab: next.tab,
                    ..*sheet
                },
                start: RefPoint::with_position(*start, next.col1, next.row1),
                end: RefPoint::with_position(*end, next.col2, next.row2),
            },
            Reference::Invalid => Reference::Invalid,
        }
    }
}

/// The plain cell a clean formula collapses to when all its operands are deleted.
fn value_cell(result: &CellValue, strings: &mut StringPool) -> Option<Cell> {
    match result {
        CellValue::Number(n) => Some(Cell::Numeric(*n)),
        CellValue::Text(s) => Some(Cell::Text(strings.intern(s))),
        CellValue::Bool(b) => Some(Cell::Numeric(if *b { 1.0 } else { 0.0 })),
        CellValue::Empty | CellValue::Error(_) => None,
    }
}

impl Table {
    /// Rewrite the sheet-local ranges this table holds.
    pub(crate) fn apply_range_update(
        &mut self,
        update: &RefUpdate,
        limits: &SheetLimits,
    ) -> SheetResult<()> {
        self.meta.map_ranges(|r| update.adjust_range(r, limits));
        let before = self.merged_areas().to_vec();
        self.map_merges(|r| update.adjust_range(r, limits));
        if let Some(p) = &mut self.sort_param {
            if let Some(r) = update.adjust_range(p.range, limits) {
                p.range = r;
            } else {
                self.sort_param = None;
            }
        }
        if let Some(p) = &mut self.query_param {
            if let Some(r) = update.adjust_range(p.range, limits) {
                p.range = r;
            } else {
                self.query_param = None;
            }
        }
        if before != self.merged_areas() {
            self.rebuild_merge_flags()?;
        }
        Ok(())
    }
}

impl Document {
    /// Rewrite formula cell positions of sheet `tab` from column storage.
    pub(crate) fn resync_positions(&mut self, tab: SheetTab) {
        let Some(table) = self.tables.get(tab as usize) else {
            return;
        };
        for column in table.columns() {
            for (row, id) in column.formula_rows() {
                if let Some(cell) = self.deps.formulas.get_mut(id) {
                    cell.pos = CellAddr::new(tab, column.col(), row);
                }
            }
        }
    }

    /// Run the reference-update pass for `update` over the whole document.
    pub(crate) fn update_references(&mut self, update: &RefUpdate) -> SheetResult<()> {
        let _span = tracing::debug_span!("update_references", ?update).entered();
        let limits = self.config.limits;
        let convert = update.is_delete()
            && self.config.deleted_ref_policy == DeletedRefPolicy::ConvertToValue;

        let mut rewritten: Vec<(FormulaId, SmallVec<[RangeAddr; 4]>)> = Vec::new();
        let mut to_value: Vec<(CellAddr, Cell)> = Vec::new();
        for (id, cell) in self.deps.formulas.iter_mut() {
            let formula = cell
                .formula
                .map_references(|r| update.adjust_reference(r, &limits));
            let dynamic: SmallVec<[RangeAddr; 2]> = cell
                .dynamic_deps
                .iter()
                .filter_map(|r| update.adjust_range(*r, &limits))
                .collect();
            let dynamic_changed = dynamic != cell.dynamic_deps;
            if formula.is_none() && !dynamic_changed {
                continue;
            }
            if let Some(f) = &formula
                && convert
                && !cell.dirty
                && f.all_references_invalid()
                && !f.is_dynamic()
                && !cell.formula.has_invalid_reference()
                && let Some(value) = value_cell(&cell.result, &mut self.ctx.strings)
            {
                to_value.push((cell.pos, value));
                continue;
            }
            let old = cell.listen_ranges();
            if let Some(f) = formula {
                cell.formula = Arc::new(f);
            }
            cell.dynamic_deps = dynamic;
            rewritten.push((id, old));
        }

        let mut access = self.deps.access();
        for (id, old) in &rewritten {
            access.reregister(*id, old);
            access.mark_dirty(*id);
        }
        for (pos, value) in to_value.iter().cloned() {
            let Some(table) = self.tables.get_mut(pos.tab as usize) else {
                continue;
            };
            table
                .column_mut(pos.col)?
                .put_cell(pos.row, value, &mut access)?;
        }

        let externals: Vec<_> = self.deps.externals.iter().map(|(k, v)| (*k, *v)).collect();
        for (id, range) in externals {
            match update.adjust_range(range, &limits) {
                Some(next) if next == range => {}
                Some(next) => {
                    self.deps.graph.unregister(Listener::External(id), range);
                    self.deps.graph.register(Listener::External(id), next);
                    self.deps.externals.insert(id, next);
                }
                None => {
                    tracing::debug!(?id, %range, "external listener target deleted");
                    self.deps.unregister_external(id);
                }
            }
        }

        for table in &mut self.tables {
            table.apply_range_update(update, &limits)?;
        }
        tracing::debug!(
            rewritten = rewritten.len(),
            converted = to_value.len(),
            "references updated"
        );
        Ok(())
    }
}
