//! Per-column typed cell storage.
//!
//! Cells are kept in a row-keyed B-tree: positional lookup is O(log n) and an
//! in-order walk is O(1) amortised per cell. Rows without an entry are empty.
//! Alongside the cells each column owns run-stores for attribute pattern ids
//! and merge markers, plus notes and sparklines keyed by row.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use gridcalc_common::{CellAddr, RangeAddr, SheetError, SheetResult, SheetTab};
use gridcalc_formula::Formula;

use crate::access::ColumnStorageAccess;
use crate::arena::{FormulaArena, FormulaCell, FormulaId};
use crate::cell::{Cell, CellView, Note, RichText, Sparkline};
use crate::context::SharedString;
use crate::flags::MergeFlags;
use crate::run_store::RunStore;

/// Identifier of a cell attribute pattern; `0` is the default pattern.
pub type PatternId = u32;

/// A run of vertically adjacent formula cells whose formulas read the same
/// relative neighbourhood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaGroup {
    pub start: u32,
    pub len: u32,
    pub signature: Arc<str>,
}

impl FormulaGroup {
    pub fn rows(&self) -> RangeInclusive<u32> {
        self.start..=self.start + self.len - 1
    }
}

/// Everything removed from a span of rows, as handed back to the caller.
#[derive(Debug, Default)]
pub struct RemovedRows {
    pub cells: Vec<(u32, Cell)>,
    pub notes: Vec<(u32, Note)>,
    pub sparklines: Vec<(u32, Sparkline)>,
}

#[derive(Debug, Clone)]
pub struct Column {
    tab: SheetTab,
    col: u32,
    max_row: u32,
    cells: BTreeMap<u32, Cell>,
    patterns: RunStore<PatternId>,
    merge_flags: RunStore<MergeFlags>,
    notes: BTreeMap<u32, Note>,
    sparklines: BTreeMap<u32, Sparkline>,
    groups: Vec<FormulaGroup>,
    groups_valid: bool,
}

impl Column {
    pub fn new(tab: SheetTab, col: u32, max_row: u32) -> Self {
        Self {
            tab,
            col,
            max_row,
            cells: BTreeMap::new(),
            patterns: RunStore::new(max_row, 0),
            merge_flags: RunStore::new(max_row, MergeFlags::empty()),
            notes: BTreeMap::new(),
            sparklines: BTreeMap::new(),
            groups: Vec::new(),
            groups_valid: true,
        }
    }

    #[inline]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[inline]
    pub fn tab(&self) -> SheetTab {
        self.tab
    }

    pub(crate) fn set_position(&mut self, tab: SheetTab, col: u32) {
        self.tab = tab;
        self.col = col;
    }

    #[inline]
    fn addr(&self, row: u32) -> CellAddr {
        CellAddr::new(self.tab, self.col, row)
    }

    fn check_row(&self, row: u32) -> SheetResult<()> {
        if row <= self.max_row {
            Ok(())
        } else {
            Err(SheetError::IndexOutOfRange {
                what: "row",
                index: row as u64,
                max: self.max_row as u64,
            })
        }
    }

    fn check_rows(&self, row1: u32, row2: u32) -> SheetResult<()> {
        self.check_row(row2)?;
        if row1 > row2 {
            return Err(SheetError::InvalidRange(format!(
                "rows {row1}..={row2} are reversed"
            )));
        }
        Ok(())
    }

    /* ─────────────────────────────── Reads ─────────────────────────────── */

    #[inline]
    pub fn cell(&self, row: u32) -> Option<&Cell> {
        self.cells.get(&row)
    }

    /// Resolved view of the cell at `row`; unset rows read as empty.
    pub fn get_cell<'a>(&'a self, row: u32, formulas: &'a FormulaArena) -> CellView<'a> {
        match self.cells.get(&row) {
            None => CellView::Empty,
            Some(Cell::Numeric(n)) => CellView::Numeric(*n),
            Some(Cell::Text(s)) => CellView::Text(s.as_str()),
            Some(Cell::EditText(rt)) => CellView::EditText(rt),
            Some(Cell::Formula(id)) => match formulas.get(*id) {
                Some(fc) => CellView::Formula {
                    id: *id,
                    formula: &fc.formula,
                    result: &fc.result,
                    dirty: fc.dirty,
                },
                None => CellView::Empty,
            },
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u32, &Cell)> + '_ {
        self.cells.iter().map(|(r, c)| (*r, c))
    }

    pub fn iter_range(
        &self,
        row1: u32,
        row2: u32,
    ) -> impl DoubleEndedIterator<Item = (u32, &Cell)> + '_ {
        (row1 <= row2)
            .then(|| self.cells.range(row1..=row2))
            .into_iter()
            .flatten()
            .map(|(r, c)| (*r, c))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn has_data(&self, row1: u32, row2: u32) -> bool {
        self.iter_range(row1, row2).next().is_some()
    }

    pub fn is_empty_block(&self, row1: u32, row2: u32) -> bool {
        !self.has_data(row1, row2)
    }

    pub fn first_data_row(&self) -> Option<u32> {
        self.cells.first_key_value().map(|(r, _)| *r)
    }

    pub fn last_data_row(&self) -> Option<u32> {
        self.cells.last_key_value().map(|(r, _)| *r)
    }

    /// Nearest non-empty row strictly after (`forward`) or before `row`.
    pub fn next_data_row(&self, row: u32, forward: bool) -> Option<u32> {
        if forward {
            self.cells
                .range(row.checked_add(1)?..)
                .next()
                .map(|(r, _)| *r)
        } else {
            self.cells.range(..row).next_back().map(|(r, _)| *r)
        }
    }

    pub fn formula_rows(&self) -> impl Iterator<Item = (u32, FormulaId)> + '_ {
        self.cells
            .iter()
            .filter_map(|(r, c)| c.formula_id().map(|id| (*r, id)))
    }

    pub fn note(&self, row: u32) -> Option<&Note> {
        self.notes.get(&row)
    }

    pub fn notes(&self) -> impl Iterator<Item = (u32, &Note)> + '_ {
        self.notes.iter().map(|(r, n)| (*r, n))
    }

    pub fn sparkline(&self, row: u32) -> Option<&Sparkline> {
        self.sparklines.get(&row)
    }

    pub fn sparklines(&self) -> impl Iterator<Item = (u32, &Sparkline)> + '_ {
        self.sparklines.iter().map(|(r, s)| (*r, s))
    }

    pub fn pattern(&self, row: u32) -> PatternId {
        self.patterns.get_clamped(row)
    }

    pub fn patterns(&self) -> &RunStore<PatternId> {
        &self.patterns
    }

    pub fn merge_flags(&self) -> &RunStore<MergeFlags> {
        &self.merge_flags
    }

    /* ───────────────────────────── Mutators ────────────────────────────── */

    /// Replace whatever sits at `row`: detach the old formula cell, install
    /// `cell`, then broadcast the change.
    fn put(&mut self, row: u32, cell: Option<Cell>, access: &mut ColumnStorageAccess<'_>) {
        let old = match cell {
            Some(c) => self.cells.insert(row, c),
            None => self.cells.remove(&row),
        };
        if let Some(Cell::Formula(id)) = old {
            access.detach_formula(id);
        }
        self.split_formula_groups(row);
        access.notify_cell(self.addr(row));
    }

    pub fn set_value(
        &mut self,
        row: u32,
        value: f64,
        access: &mut ColumnStorageAccess<'_>,
    ) -> SheetResult<()> {
        self.check_row(row)?;
        self.put(row, Some(Cell::Numeric(value)), access);
        Ok(())
    }

    pub fn set_string(
        &mut self,
        row: u32,
        text: SharedString,
        access: &mut ColumnStorageAccess<'_>,
    ) -> SheetResult<()> {
        self.check_row(row)?;
        self.put(row, Some(Cell::Text(text)), access);
        Ok(())
    }

    pub fn set_edit_text(
        &mut self,
        row: u32,
        text: RichText,
        access: &mut ColumnStorageAccess<'_>,
    ) -> SheetResult<()> {
        self.check_row(row)?;
        self.put(row, Some(Cell::EditText(Arc::new(text))), access);
        Ok(())
    }

    pub fn set_formula(
        &mut self,
        row: u32,
        formula: Arc<Formula>,
        access: &mut ColumnStorageAccess<'_>,
    ) -> SheetResult<FormulaId> {
        self.check_row(row)?;
        if let Some(Cell::Formula(old)) = self.cells.remove(&row) {
            access.detach_formula(old);
        }
        let id = access.attach_formula(self.addr(row), formula);
        self.put(row, Some(Cell::Formula(id)), access);
        Ok(id)
    }

    /// Install an existing formula cell (moved, copied or restored).
    pub fn put_formula_cell(
        &mut self,
        row: u32,
        mut cell: FormulaCell,
        access: &mut ColumnStorageAccess<'_>,
    ) -> SheetResult<FormulaId> {
        self.check_row(row)?;
        if let Some(Cell::Formula(old)) = self.cells.remove(&row) {
            access.detach_formula(old);
        }
        cell.pos = self.addr(row);
        let id = access.attach_formula_cell(cell);
        self.put(row, Some(Cell::Formula(id)), access);
        Ok(id)
    }

    /// Install a non-formula cell value as-is.
    pub fn put_cell(
        &mut self,
        row: u32,
        cell: Cell,
        access: &mut ColumnStorageAccess<'_>,
    ) -> SheetResult<()> {
        self.check_row(row)?;
        self.put(row, Some(cell), access);
        Ok(())
    }

    pub fn clear(&mut self, row: u32, access: &mut ColumnStorageAccess<'_>) -> SheetResult<()> {
        self.check_row(row)?;
        if self.cells.contains_key(&row) {
            self.put(row, None, access);
        }
        Ok(())
    }

    /// Clear every cell in `row1..=row2`; returns how many were removed.
    pub fn clear_range(
        &mut self,
        row1: u32,
        row2: u32,
        access: &mut ColumnStorageAccess<'_>,
    ) -> SheetResult<usize> {
        self.check_rows(row1, row2)?;
        let rows: Vec<u32> = self.iter_range(row1, row2).map(|(r, _)| r).collect();
        for &row in &rows {
            if let Some(Cell::Formula(id)) = self.cells.remove(&row) {
                access.detach_formula(id);
            }
        }
        if !rows.is_empty() {
            self.split_formula_groups(row1);
            access.notify_range(RangeAddr::new(self.tab, self.col, row1, self.col, row2));
        }
        Ok(rows.len())
    }

    pub fn set_note(&mut self, row: u32, note: Option<Note>) -> SheetResult<()> {
        self.check_row(row)?;
        match note {
            Some(n) => self.notes.insert(row, n),
            None => self.notes.remove(&row),
        };
        Ok(())
    }

    pub fn set_sparkline(&mut self, row: u32, sparkline: Option<Sparkline>) -> SheetResult<()> {
        self.check_row(row)?;
        match sparkline {
            Some(s) => self.sparklines.insert(row, s),
            None => self.sparklines.remove(&row),
        };
        Ok(())
    }

    pub fn set_pattern(&mut self, row1: u32, row2: u32, pattern: PatternId) -> SheetResult<()> {
        self.patterns.set_range(row1, row2, pattern)
    }

    pub fn apply_merge_flags(
        &mut self,
        row1: u32,
        row2: u32,
        f: impl Fn(MergeFlags) -> MergeFlags,
    ) -> SheetResult<()> {
        self.merge_flags.apply_range(row1, row2, f)
    }

    pub(crate) fn replace_attributes(
        &mut self,
        patterns: RunStore<PatternId>,
        merge_flags: RunStore<MergeFlags>,
    ) {
        self.patterns = patterns;
        self.merge_flags = merge_flags;
    }

    /* ───────────────────── Raw moves (no broadcasting) ─────────────────── */

    /// Take the raw cell at `row` without detaching or broadcasting. The
    /// caller owns re-installing or detaching any formula id it returns.
    pub(crate) fn take_raw(&mut self, row: u32) -> Option<Cell> {
        self.cells.remove(&row)
    }

    pub(crate) fn put_raw(&mut self, row: u32, cell: Cell) -> Option<Cell> {
        self.cells.insert(row, cell)
    }

    pub(crate) fn take_note(&mut self, row: u32) -> Option<Note> {
        self.notes.remove(&row)
    }

    pub(crate) fn take_sparkline(&mut self, row: u32) -> Option<Sparkline> {
        self.sparklines.remove(&row)
    }

    /// Shift everything at or after `start` down by `count` rows. The caller
    /// has checked that no cell would be pushed past the last row.
    pub fn insert_rows(&mut self, start: u32, count: u32) -> SheetResult<()> {
        self.check_row(start)?;
        shift_up(&mut self.cells, start, count, self.max_row);
        shift_up(&mut self.notes, start, count, self.max_row);
        shift_up(&mut self.sparklines, start, count, self.max_row);
        self.patterns.insert(start, count)?;
        self.merge_flags.insert(start, count)?;
        self.split_formula_groups(start);
        Ok(())
    }

    /// Remove `start..start+count` and shift later rows up. The removed
    /// content is returned so formula ids can be detached by the caller.
    pub fn delete_rows(&mut self, start: u32, count: u32) -> SheetResult<RemovedRows> {
        self.check_row(start)?;
        let removed = RemovedRows {
            cells: shift_down(&mut self.cells, start, count),
            notes: shift_down(&mut self.notes, start, count),
            sparklines: shift_down(&mut self.sparklines, start, count),
        };
        self.patterns.remove(start, count)?;
        self.merge_flags.remove(start, count)?;
        self.split_formula_groups(start);
        Ok(removed)
    }

    /// Permute rows `row1..=row1+order.len()-1`: the content of row
    /// `row1 + order[i]` ends up at row `row1 + i`. Cells, notes, sparklines
    /// and patterns move; merge flags are left for the caller to re-derive.
    pub fn reorder_rows(&mut self, row1: u32, order: &[u32]) -> SheetResult<()> {
        let Some(last) = (order.len() as u32).checked_sub(1) else {
            return Ok(());
        };
        self.check_rows(row1, row1 + last)?;
        permute(&mut self.cells, row1, order);
        permute(&mut self.notes, row1, order);
        permute(&mut self.sparklines, row1, order);
        let old: Vec<PatternId> = (0..order.len() as u32)
            .map(|i| self.patterns.get_clamped(row1 + i))
            .collect();
        for (i, src) in order.iter().enumerate() {
            let p = old[*src as usize];
            self.patterns.set_range(row1 + i as u32, row1 + i as u32, p)?;
        }
        self.split_formula_groups(row1);
        Ok(())
    }

    /* ─────────────────────────── Formula groups ─────────────────────────── */

    /// Drop group information after an edit at `row`.
    pub fn split_formula_groups(&mut self, row: u32) {
        if self.groups_valid && !self.groups.is_empty() {
            tracing::trace!(tab = self.tab, col = self.col, row, "split formula groups");
            self.groups.clear();
        }
        self.groups_valid = false;
    }

    /// Rebuild groups from the signatures of contiguous formula cells.
    pub fn regroup_formula_cells(&mut self, formulas: &FormulaArena) {
        let mut groups = Vec::new();
        let mut current: Option<FormulaGroup> = None;
        for (row, id) in self.formula_rows() {
            let Some(cell) = formulas.get(id) else {
                continue;
            };
            let sig = cell.formula.signature(self.col, row);
            match current.as_mut() {
                Some(g) if g.start + g.len == row && *g.signature == *sig => g.len += 1,
                _ => {
                    if let Some(g) = current.take()
                        && g.len > 1
                    {
                        groups.push(g);
                    }
                    current = Some(FormulaGroup {
                        start: row,
                        len: 1,
                        signature: Arc::from(sig),
                    });
                }
            }
        }
        if let Some(g) = current
            && g.len > 1
        {
            groups.push(g);
        }
        self.groups = groups;
        self.groups_valid = true;
    }

    pub fn formula_groups(&self) -> Option<&[FormulaGroup]> {
        self.groups_valid.then_some(self.groups.as_slice())
    }

    pub fn formula_group_at(&self, row: u32) -> Option<&FormulaGroup> {
        if !self.groups_valid {
            return None;
        }
        self.groups.iter().find(|g| g.rows().contains(&row))
    }
}

fn shift_up<V>(map: &mut BTreeMap<u32, V>, start: u32, count: u32, max_row: u32) {
    let tail = map.split_off(&start);
    for (row, v) in tail {
        if let Some(r) = row.checked_add(count)
            && r <= max_row
        {
            map.insert(r, v);
        }
    }
}

fn shift_down<V>(map: &mut BTreeMap<u32, V>, start: u32, count: u32) -> Vec<(u32, V)> {
    let mut tail = map.split_off(&start);
    let rest = match start.checked_add(count) {
        Some(end) => tail.split_off(&end),
        None => BTreeMap::new(),
    };
    for (row, v) in rest {
        map.insert(row - count, v);
    }
    tail.into_iter().collect()
}

fn permute<V>(map: &mut BTreeMap<u32, V>, row1: u32, order: &[u32]) {
    let end = row1 + order.len() as u32;
    let mut block = map.split_off(&row1);
    let mut rest = block.split_off(&end);
    for (i, src) in order.iter().enumerate() {
        if let Some(v) = block.remove(&(row1 + src)) {
            map.insert(row1 + i as u32, v);
        }
    }
    map.append(&mut rest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::DependencyState;
    use gridcalc_common::CellType;
    use gridcalc_formula::{Expr, Reference};

    #[test]
    fn set_then_get_round_trips() {
        let mut state = DependencyState::default();
        let mut col = Column::new(0, 0, 99);
        col.set_value(5, 3.5, &mut state.access()).unwrap();
        let view = col.get_cell(5, state.formulas());
        assert_eq!(view, CellView::Numeric(3.5));
        assert_eq!(view.cell_type(), CellType::Numeric);
        assert!(col.get_cell(6, state.formulas()).is_empty());
        assert!(col.set_value(100, 1.0, &mut state.access()).is_err());
        assert_eq!(col.cell_count(), 1);
    }

    #[test]
    fn formula_overwrite_detaches_listeners() {
        let mut state = DependencyState::default();
        let mut col = Column::new(0, 1, 99);
        let f = Arc::new(Formula::new(Expr::Ref(Reference::cell(0, 0, 0))));
        col.set_formula(0, f, &mut state.access()).unwrap();
        assert_eq!(state.graph().broadcaster_count(), 1);
        col.set_value(0, 1.0, &mut state.access()).unwrap();
        assert_eq!(state.graph().broadcaster_count(), 0);
        assert!(state.formulas().is_empty());
    }

    #[test]
    fn used_area_tracking() {
        let mut state = DependencyState::default();
        let mut col = Column::new(0, 0, 99);
        let mut access = state.access();
        for row in [3, 7, 20] {
            col.set_value(row, row as f64, &mut access).unwrap();
        }
        assert_eq!(col.first_data_row(), Some(3));
        assert_eq!(col.last_data_row(), Some(20));
        assert_eq!(col.next_data_row(7, true), Some(20));
        assert_eq!(col.next_data_row(7, false), Some(3));
        assert!(col.is_empty_block(8, 19));
        assert_eq!(col.clear_range(0, 10, &mut access).unwrap(), 2);
        assert_eq!(col.first_data_row(), Some(20));
    }

    #[test]
    fn insert_and_delete_rows_shift_content() {
        let mut state = DependencyState::default();
        let mut col = Column::new(0, 0, 99);
        let mut access = state.access();
        col.set_value(2, 2.0, &mut access).unwrap();
        col.set_value(5, 5.0, &mut access).unwrap();
        col.set_note(5, Some(Note { author: "a".into(), text: "n".into() })).unwrap();
        col.set_pattern(5, 5, 9).unwrap();

        col.insert_rows(3, 2).unwrap();
        assert_eq!(col.cell(7), Some(&Cell::Numeric(5.0)));
        assert!(col.note(7).is_some());
        assert_eq!(col.pattern(7), 9);

        let removed = col.delete_rows(2, 3).unwrap();
        assert_eq!(removed.cells, vec![(2, Cell::Numeric(2.0))]);
        assert_eq!(col.cell(4), Some(&Cell::Numeric(5.0)));
        assert_eq!(col.pattern(4), 9);
    }

    #[test]
    fn reorder_moves_cells_and_patterns() {
        let mut state = DependencyState::default();
        let mut col = Column::new(0, 0, 99);
        let mut access = state.access();
        for row in 10..13 {
            col.set_value(row, row as f64, &mut access).unwrap();
        }
        col.set_pattern(12, 12, 4).unwrap();
        col.reorder_rows(10, &[2, 0, 1]).unwrap();
        assert_eq!(col.cell(10), Some(&Cell::Numeric(12.0)));
        assert_eq!(col.cell(11), Some(&Cell::Numeric(10.0)));
        assert_eq!(col.pattern(10), 4);
        assert_eq!(col.pattern(12), 0);
    }

    #[test]
    fn groups_follow_signatures() {
        let mut state = DependencyState::default();
        let mut col = Column::new(0, 1, 99);
        let mut access = state.access();
        for row in 0..4 {
            let f = Formula::new(Expr::Ref(Reference::cell(0, 0, row)));
            col.set_formula(row, Arc::new(f), &mut access).unwrap();
        }
        let odd = Formula::new(Expr::Ref(Reference::cell(0, 0, 0)));
        col.set_formula(4, Arc::new(odd), &mut access).unwrap();
        col.regroup_formula_cells(state.formulas());
        let groups = col.formula_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].rows(), 0..=3);
        assert!(col.formula_group_at(4).is_none());

        col.set_value(2, 0.0, &mut state.access()).unwrap();
        assert!(col.formula_groups().is_none());
    }
}
