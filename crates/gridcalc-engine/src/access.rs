//! Privileged mutation capability for column storage.
//!
//! Every cell write has to keep three structures in step: the formula arena,
//! the broadcaster graph and the pending dirty set. [`DependencyState`] owns
//! all three; code that mutates cells receives a [`ColumnStorageAccess`]
//! borrowed from it, which is the only way to attach/detach formula cells
//! and to broadcast changes.

use std::sync::Arc;

use gridcalc_common::{CellAddr, CellValue, ErrorKind, RangeAddr};
use gridcalc_formula::Formula;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::{FormulaArena, FormulaCell, FormulaId};
use crate::broadcast::{BroadcasterGraph, ExternalListenerId, Listener};

/// A change reported to a host-side listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub listener: ExternalListenerId,
    pub changed: RangeAddr,
}

#[derive(Debug, Default)]
pub struct DependencyState {
    pub(crate) formulas: FormulaArena,
    pub(crate) graph: BroadcasterGraph,
    /// Formula cells that went from clean to dirty and have not been
    /// evaluated yet. May contain stale ids; consumers re-check.
    pub(crate) pending: Vec<FormulaId>,
    pub(crate) notifications: Vec<Notification>,
    pub(crate) externals: FxHashMap<ExternalListenerId, RangeAddr>,
    next_external: u64,
}

impl DependencyState {
    pub fn access(&mut self) -> ColumnStorageAccess<'_> {
        ColumnStorageAccess { state: self }
    }

    #[inline]
    pub fn formulas(&self) -> &FormulaArena {
        &self.formulas
    }

    #[inline]
    pub fn graph(&self) -> &BroadcasterGraph {
        &self.graph
    }

    pub fn register_external(&mut self, range: RangeAddr) -> ExternalListenerId {
        let id = ExternalListenerId(self.next_external);
        self.next_external += 1;
        self.externals.insert(id, range);
        self.graph.register(Listener::External(id), range);
        id
    }

    pub fn unregister_external(&mut self, id: ExternalListenerId) -> bool {
        match self.externals.remove(&id) {
            Some(range) => self.graph.unregister(Listener::External(id), range),
            None => false,
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Tell external listeners that the value shown at `addr` changed
    /// without dirtying any formula.
    pub(crate) fn notify_externals(&mut self, addr: CellAddr) {
        for listener in self.graph.listeners_at(addr) {
            if let Listener::External(id) = listener {
                self.notifications.push(Notification {
                    listener: id,
                    changed: RangeAddr::single(addr),
                });
            }
        }
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.formulas.iter().filter(|(_, c)| c.dirty).count()
    }
}

/// Borrowed capability handed to column/table mutators.
pub struct ColumnStorageAccess<'a> {
    state: &'a mut DependencyState,
}

impl ColumnStorageAccess<'_> {
    #[inline]
    pub fn formulas(&self) -> &FormulaArena {
        &self.state.formulas
    }

    #[inline]
    pub fn formula(&self, id: FormulaId) -> Option<&FormulaCell> {
        self.state.formulas.get(id)
    }

    /// Create a dirty formula cell at `pos` and register its listeners.
    ///
    /// A formula with a reference that cannot be resolved is still stored;
    /// its cached result starts out as `#REF!`.
    pub fn attach_formula(&mut self, pos: CellAddr, formula: Arc<Formula>) -> FormulaId {
        let mut cell = FormulaCell::new(pos, formula);
        if cell.formula.has_invalid_reference() {
            cell.result = CellValue::Error(ErrorKind::Ref);
        }
        self.attach_formula_cell(cell)
    }

    /// Install an existing formula cell (moved or restored), keeping its
    /// result and dirty state.
    pub fn attach_formula_cell(&mut self, cell: FormulaCell) -> FormulaId {
        let ranges = cell.listen_ranges();
        let dirty = cell.dirty;
        let id = self.state.formulas.insert(cell);
        for range in ranges {
            self.state.graph.register(Listener::Formula(id), range);
        }
        if dirty {
            self.state.pending.push(id);
        }
        id
    }

    /// Unregister and remove a formula cell. Returns the removed cell.
    pub fn detach_formula(&mut self, id: FormulaId) -> Option<FormulaCell> {
        let cell = self.state.formulas.remove(id)?;
        for range in cell.listen_ranges() {
            self.state.graph.unregister(Listener::Formula(id), range);
        }
        Some(cell)
    }

    /// Replace the listener registrations of `id` after its formula or
    /// dynamic targets changed.
    pub fn reregister(&mut self, id: FormulaId, old_ranges: &[RangeAddr]) {
        for range in old_ranges {
            self.state.graph.unregister(Listener::Formula(id), *range);
        }
        let Some(cell) = self.state.formulas.get(id) else {
            return;
        };
        for range in cell.listen_ranges() {
            self.state.graph.register(Listener::Formula(id), range);
        }
    }

    /// Mark one formula cell dirty and spread dirtiness to its dependents.
    pub fn mark_dirty(&mut self, id: FormulaId) {
        let Some(cell) = self.state.formulas.get_mut(id) else {
            return;
        };
        if cell.dirty {
            return;
        }
        cell.dirty = true;
        let pos = cell.pos;
        self.state.pending.push(id);
        self.spread_dirty(pos);
    }

    /// Content at `addr` changed: notify every listener of the address.
    pub fn notify_cell(&mut self, addr: CellAddr) {
        let listeners = self.state.graph.listeners_at(addr);
        self.dispatch(&listeners, RangeAddr::single(addr));
    }

    /// Content somewhere in `range` changed.
    pub fn notify_range(&mut self, range: RangeAddr) {
        let listeners = self.state.graph.listeners_in_range(&range);
        self.dispatch(&listeners, range);
    }

    fn dispatch(&mut self, listeners: &[Listener], changed: RangeAddr) {
        for listener in listeners {
            match *listener {
                Listener::Formula(id) => self.mark_dirty(id),
                Listener::External(id) => self.state.notifications.push(Notification {
                    listener: id,
                    changed,
                }),
            }
        }
    }

    /// Transitively dirty the formula listeners of `start`. Only clean cells
    /// are visited, so each cell is enqueued at most once per wave.
    fn spread_dirty(&mut self, start: CellAddr) {
        let mut work: SmallVec<[CellAddr; 16]> = SmallVec::new();
        work.push(start);
        while let Some(addr) = work.pop() {
            for listener in self.state.graph.listeners_at(addr) {
                let Listener::Formula(id) = listener else {
                    continue;
                };
                if let Some(cell) = self.state.formulas.get_mut(id)
                    && !cell.dirty
                {
                    cell.dirty = true;
                    self.state.pending.push(id);
                    work.push(cell.pos);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_formula::{Expr, Reference};

    fn formula_on(tab: u16, col: u32, row: u32) -> Arc<Formula> {
        Arc::new(Formula::new(Expr::Ref(Reference::cell(tab, col, row))))
    }

    #[test]
    fn notify_dirties_transitively_once() {
        let mut state = DependencyState::default();
        let mut access = state.access();
        // B1 = A1, C1 = B1
        let b1 = access.attach_formula(CellAddr::new(0, 1, 0), formula_on(0, 0, 0));
        let c1 = access.attach_formula(CellAddr::new(0, 2, 0), formula_on(0, 1, 0));
        for id in [b1, c1] {
            access.state.formulas.get_mut(id).unwrap().dirty = false;
        }
        access.state.pending.clear();

        access.notify_cell(CellAddr::new(0, 0, 0));
        assert!(access.formula(b1).unwrap().dirty);
        assert!(access.formula(c1).unwrap().dirty);
        assert_eq!(state.pending, vec![b1, c1]);
    }

    #[test]
    fn detach_removes_registrations() {
        let mut state = DependencyState::default();
        let mut access = state.access();
        let id = access.attach_formula(CellAddr::new(0, 1, 0), formula_on(0, 0, 0));
        assert!(access.detach_formula(id).is_some());
        assert_eq!(state.graph.broadcaster_count(), 0);
        assert!(state.formulas.is_empty());
    }

    #[test]
    fn invalid_reference_starts_as_ref_error() {
        let mut state = DependencyState::default();
        let f = Arc::new(Formula::new(Expr::Ref(Reference::Invalid)));
        let id = state.access().attach_formula(CellAddr::new(0, 0, 0), f);
        assert_eq!(
            state.formulas.get(id).unwrap().result,
            CellValue::Error(ErrorKind::Ref)
        );
    }

    #[test]
    fn external_listeners_receive_notifications() {
        let mut state = DependencyState::default();
        let id = state.register_external(RangeAddr::new(0, 0, 0, 3, 3));
        state.access().notify_cell(CellAddr::new(0, 2, 2));
        let notes = state.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].listener, id);
        assert!(state.unregister_external(id));
        state.access().notify_cell(CellAddr::new(0, 2, 2));
        assert!(state.take_notifications().is_empty());
    }
}
