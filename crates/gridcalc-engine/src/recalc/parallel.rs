//! Threaded path of `calc_all`.
//!
//! Dirty formulas are grouped into slices: connected components of the
//! (sheet, column) pairs they live in, joined whenever a formula reads a
//! column that holds another dirty formula inside the read area. No slice
//! ever reads a cell another slice writes, so each worker settles its slice
//! against the shared frozen document and its own overlay.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use gridcalc_common::SheetTab;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use super::{Outcome, Settler};
use crate::arena::FormulaId;
use crate::document::Document;

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }
}

type ColumnKey = (SheetTab, u32);

/// Split `roots` (sorted) into independent slices; each slice keeps the
/// roots' relative order.
pub(crate) fn partition(doc: &Document, roots: &[FormulaId]) -> Vec<Vec<FormulaId>> {
    let formulas = &doc.deps.formulas;
    let mut dirty_rows: BTreeMap<ColumnKey, Vec<u32>> = BTreeMap::new();
    for id in roots {
        if let Some(cell) = formulas.get(*id) {
            dirty_rows
                .entry((cell.pos.tab, cell.pos.col))
                .or_default()
                .push(cell.pos.row);
        }
    }
    let mut index: FxHashMap<ColumnKey, usize> = FxHashMap::default();
    for (i, (key, rows)) in dirty_rows.iter_mut().enumerate() {
        rows.sort_unstable();
        index.insert(*key, i);
    }

    let mut sets = DisjointSet::new(index.len());
    for id in roots {
        let Some(cell) = formulas.get(*id) else {
            continue;
        };
        let own = index[&(cell.pos.tab, cell.pos.col)];
        for range in cell.listen_ranges() {
            let span = (range.tab, range.col1)..=(range.tab, range.col2);
            for (key, rows) in dirty_rows.range(span) {
                let i = rows.partition_point(|r| *r < range.row1);
                if i < rows.len() && rows[i] <= range.row2 {
                    sets.union(own, index[key]);
                }
            }
        }
    }

    let mut slot_of_root: FxHashMap<usize, usize> = FxHashMap::default();
    let mut slices: Vec<Vec<FormulaId>> = Vec::new();
    for id in roots {
        let Some(cell) = formulas.get(*id) else {
            continue;
        };
        let root = sets.find(index[&(cell.pos.tab, cell.pos.col)]);
        let slot = *slot_of_root.entry(root).or_insert_with(|| {
            slices.push(Vec::new());
            slices.len() - 1
        });
        slices[slot].push(*id);
    }
    slices
}

impl Document {
    /// Slices for a threaded pass, or `None` when the pass must stay
    /// sequential.
    pub(super) fn parallel_slices(&self, roots: &[FormulaId]) -> Option<Vec<Vec<FormulaId>>> {
        self.thread_pool.as_ref()?;
        if !self.config.enable_parallel || roots.len() < self.config.min_parallel_cells {
            return None;
        }
        let formulas = &self.deps.formulas;
        if roots
            .iter()
            .any(|id| formulas.get(*id).is_some_and(|c| c.formula.is_dynamic()))
        {
            tracing::debug!("dynamic formulas dirty, calculating sequentially");
            return None;
        }
        let slices = partition(self, roots);
        (slices.len() > 1).then_some(slices)
    }

    pub(super) fn run_parallel(&self, slices: &[Vec<FormulaId>], cancel: Option<&AtomicBool>) -> Outcome {
        let Some(pool) = self.thread_pool.as_ref() else {
            let roots: Vec<FormulaId> = slices.iter().flatten().copied().collect();
            return Settler::new(self).run(&roots, cancel);
        };
        let outcomes: Vec<Outcome> = pool.install(|| {
            slices
                .par_iter()
                .map(|slice| {
                    if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                        return Outcome {
                            cancelled: true,
                            ..Outcome::default()
                        };
                    }
                    Settler::new(self).run(slice, cancel)
                })
                .collect()
        });
        let mut merged = Outcome::default();
        for outcome in outcomes {
            merged.absorb(outcome);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use gridcalc_common::{CellAddr, SheetLimits};

    fn config(parallel: bool) -> EngineConfig {
        EngineConfig::default()
            .with_parallel(parallel)
            .with_max_threads(4)
            .with_min_parallel_cells(1)
            .with_limits(SheetLimits::new(63, 999))
    }

    fn build(parallel: bool) -> Document {
        let mut doc = Document::new(config(parallel));
        doc.append_sheet("Sheet1").unwrap();
        for row in 0..20u32 {
            doc.set_value(CellAddr::new(0, 0, row), f64::from(row)).unwrap();
            doc.set_value(CellAddr::new(0, 3, row), f64::from(row) * 0.5).unwrap();
            let r = row + 1;
            doc.set_formula_text(CellAddr::new(0, 1, row), &format!("=A{r}*2+1"))
                .unwrap();
            doc.set_formula_text(CellAddr::new(0, 4, row), &format!("=D{r}/3"))
                .unwrap();
        }
        doc.set_formula_text(CellAddr::new(0, 2, 0), "=SUM(B1:B20)").unwrap();
        doc
    }

    #[test]
    fn partition_separates_independent_columns() {
        let doc = build(false);
        let roots: Vec<FormulaId> = {
            let mut ids: Vec<_> = doc.formulas().iter().map(|(id, _)| id).collect();
            ids.sort_unstable();
            ids
        };
        let slices = partition(&doc, &roots);
        assert_eq!(slices.len(), 2);
        let sizes: Vec<usize> = slices.iter().map(Vec::len).collect();
        assert!(sizes.contains(&21));
        assert!(sizes.contains(&20));
    }

    #[test]
    fn threaded_results_match_sequential() {
        let mut seq = build(false);
        let mut par = build(true);
        let s = seq.calc_all();
        let p = par.calc_all();
        assert!(!s.threaded);
        assert!(p.threaded);
        assert_eq!(p.slices, 2);
        assert_eq!(s.computed, p.computed);
        for col in 0..5 {
            for row in 0..20 {
                let at = CellAddr::new(0, col, row);
                let a = seq.get_value(at).unwrap();
                let b = par.get_value(at).unwrap();
                assert!(a.bit_eq(&b), "{at}: {a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn dynamic_formulas_force_sequential() {
        let mut doc = build(true);
        doc.set_formula_text(CellAddr::new(0, 6, 0), "=INDIRECT(\"A1\")")
            .unwrap();
        let summary = doc.calc_all();
        assert!(!summary.threaded);
        assert_eq!(summary.slices, 1);
    }
}
