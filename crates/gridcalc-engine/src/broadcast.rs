//! Address-keyed broadcaster/listener graph.
//!
//! A listener registers on either a single cell or an area. Cell
//! broadcasters live in a hash map keyed by address; area broadcasters are
//! keyed by their rectangle and additionally indexed per sheet by row span,
//! so a write to one cell finds the enclosing areas without scanning every
//! registered range.
//!
//! The graph only records registrations. Turning a notification into dirty
//! formula cells is the job of [`crate::access::ColumnStorageAccess`].

use gridcalc_common::{CellAddr, RangeAddr, SheetTab};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::arena::FormulaId;
use crate::interval_tree::IntervalTree;

/// Handle for a host-side listener (e.g. a view that repaints a range).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalListenerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Listener {
    Formula(FormulaId),
    External(ExternalListenerId),
}

/// Listener set owned by one address or area.
#[derive(Debug, Clone, Default)]
pub struct Broadcaster {
    listeners: SmallVec<[Listener; 4]>,
}

impl Broadcaster {
    /// Returns `false` if the listener was already present.
    fn add(&mut self, listener: Listener) -> bool {
        if self.listeners.contains(&listener) {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    fn remove(&mut self, listener: Listener) -> bool {
        match self.listeners.iter().position(|l| *l == listener) {
            Some(i) => {
                self.listeners.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BroadcasterGraph {
    cells: FxHashMap<CellAddr, Broadcaster>,
    areas: FxHashMap<RangeAddr, Broadcaster>,
    area_rows: FxHashMap<SheetTab, IntervalTree<RangeAddr>>,
}

impl BroadcasterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` on `range`, creating the broadcaster if needed.
    /// Registering twice is a no-op.
    pub fn register(&mut self, listener: Listener, range: RangeAddr) {
        if range.is_single_cell() {
            self.cells.entry(range.start()).or_default().add(listener);
            return;
        }
        let broadcaster = self.areas.entry(range).or_default();
        if broadcaster.is_empty() {
            self.area_rows
                .entry(range.tab)
                .or_default()
                .insert(range.row1, range.row2, range);
        }
        broadcaster.add(listener);
    }

    /// Remove `listener` from `range`. A broadcaster left without listeners is
    /// reclaimed. Returns whether the listener was registered.
    pub fn unregister(&mut self, listener: Listener, range: RangeAddr) -> bool {
        if range.is_single_cell() {
            let addr = range.start();
            let Some(b) = self.cells.get_mut(&addr) else {
                return false;
            };
            let removed = b.remove(listener);
            if b.is_empty() {
                self.cells.remove(&addr);
                tracing::trace!(%addr, "reclaimed cell broadcaster");
            }
            return removed;
        }
        let Some(b) = self.areas.get_mut(&range) else {
            return false;
        };
        let removed = b.remove(listener);
        if b.is_empty() {
            self.areas.remove(&range);
            if let Some(tree) = self.area_rows.get_mut(&range.tab) {
                tree.remove(range.row1, range.row2, &range);
                if tree.is_empty() {
                    self.area_rows.remove(&range.tab);
                }
            }
            tracing::trace!(%range, "reclaimed area broadcaster");
        }
        removed
    }

    pub fn has_broadcaster(&self, range: &RangeAddr) -> bool {
        if range.is_single_cell() {
            self.cells.contains_key(&range.start())
        } else {
            self.areas.contains_key(range)
        }
    }

    /// Number of listeners on exactly `range` (0 if no broadcaster exists).
    pub fn listener_count(&self, range: &RangeAddr) -> usize {
        let b = if range.is_single_cell() {
            self.cells.get(&range.start())
        } else {
            self.areas.get(range)
        };
        b.map_or(0, Broadcaster::len)
    }

    pub fn broadcaster_count(&self) -> usize {
        self.cells.len() + self.areas.len()
    }

    /// Every listener affected by a change at `addr`: the cell broadcaster
    /// plus all area broadcasters containing it.
    pub fn listeners_at(&self, addr: CellAddr) -> SmallVec<[Listener; 8]> {
        let mut out = SmallVec::new();
        if let Some(b) = self.cells.get(&addr) {
            out.extend_from_slice(b.listeners());
        }
        if let Some(tree) = self.area_rows.get(&addr.tab) {
            tree.for_each_overlapping(addr.row, addr.row, |area| {
                if area.contains(addr)
                    && let Some(b) = self.areas.get(area)
                {
                    out.extend_from_slice(b.listeners());
                }
            });
        }
        out
    }

    /// Every listener affected by a change anywhere in `range`.
    pub fn listeners_in_range(&self, range: &RangeAddr) -> Vec<Listener> {
        let mut out = Vec::new();
        if range.cell_count() <= self.cells.len() as u64 {
            for addr in range.cells() {
                if let Some(b) = self.cells.get(&addr) {
                    out.extend_from_slice(b.listeners());
                }
            }
        } else {
            for (addr, b) in &self.cells {
                if range.contains(*addr) {
                    out.extend_from_slice(b.listeners());
                }
            }
        }
        if let Some(tree) = self.area_rows.get(&range.tab) {
            tree.for_each_overlapping(range.row1, range.row2, |area| {
                if area.intersects(range)
                    && let Some(b) = self.areas.get(area)
                {
                    out.extend_from_slice(b.listeners());
                }
            });
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Drop every broadcaster. Used before a full rebuild.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.areas.clear();
        self.area_rows.clear();
    }
}
