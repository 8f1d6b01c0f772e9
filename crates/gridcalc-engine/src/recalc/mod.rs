//! Recalculation: draining dirty formula cells to a fixed point.
//!
//! A pass evaluates against the document as it stood when the pass began.
//! Each result goes into an overlay owned by the pass, and the overlay is
//! written back in one step by the single writer (`&mut Document`) when the
//! pass ends. Worker threads run the same driver over disjoint slices, so
//! the threaded and sequential paths share every line of evaluation code.

mod interpreter;
mod parallel;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use gridcalc_common::{CellAddr, CellValue, ErrorKind, RangeAddr, SheetError, SheetResult};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::arena::FormulaId;
use crate::cell::Cell;
use crate::document::Document;

pub(crate) use interpreter::EvalContext;
use interpreter::{Interpreter, Suspend};

/// Outcome of a recalculation entry point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalcSummary {
    /// Formula cells evaluated (cycle members excluded).
    pub computed: usize,
    /// Formula cells that received `#CIRC!`.
    pub circular: usize,
    pub threaded: bool,
    /// Independent slices the pass was split into (1 when sequential).
    pub slices: usize,
    pub elapsed: Duration,
}

/// Results of one driver run, not yet written back.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub(crate) results: Vec<(FormulaId, CellValue)>,
    pub(crate) dynamic: Vec<(FormulaId, SmallVec<[RangeAddr; 2]>)>,
    pub(crate) computed: usize,
    pub(crate) circular: usize,
    pub(crate) cancelled: bool,
}

impl Outcome {
    fn absorb(&mut self, other: Outcome) {
        self.results.extend(other.results);
        self.dynamic.extend(other.dynamic);
        self.computed += other.computed;
        self.circular += other.circular;
        self.cancelled |= other.cancelled;
    }
}

struct Frame {
    id: FormulaId,
    deps: SmallVec<[FormulaId; 8]>,
    next: usize,
}

/// Iterative settling driver. Evaluates a cell only after every dirty
/// formula it reads has been settled; cycles are cut and reported.
pub(crate) struct Settler<'a> {
    doc: &'a Document,
    ctx: EvalContext,
    overlay: FxHashMap<FormulaId, CellValue>,
    dynamic: FxHashMap<FormulaId, SmallVec<[RangeAddr; 2]>>,
    computed: usize,
    circular: usize,
}

const CANCEL_CHECK_INTERVAL: usize = 256;

impl<'a> Settler<'a> {
    pub(crate) fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            ctx: EvalContext::new(doc.ctx.number().clone()),
            overlay: FxHashMap::default(),
            dynamic: FxHashMap::default(),
            computed: 0,
            circular: 0,
        }
    }

    fn is_settled(&self, id: FormulaId) -> bool {
        self.overlay.contains_key(&id)
            || !self.doc.deps.formulas.get(id).is_some_and(|c| c.dirty)
    }

    /// Settle every root in order. With a cancel flag the run stops between
    /// roots once the flag is raised; settled results are kept.
    pub(crate) fn run(mut self, roots: &[FormulaId], cancel: Option<&AtomicBool>) -> Outcome {
        let mut cancelled = false;
        for (i, &root) in roots.iter().enumerate() {
            if let Some(flag) = cancel
                && i % CANCEL_CHECK_INTERVAL == 0
                && flag.load(Ordering::Relaxed)
            {
                cancelled = true;
                break;
            }
            self.settle(root);
        }
        let mut results: Vec<_> = self.overlay.into_iter().collect();
        results.sort_unstable_by_key(|(id, _)| *id);
        let mut dynamic: Vec<_> = self.dynamic.into_iter().collect();
        dynamic.sort_unstable_by_key(|(id, _)| *id);
        Outcome {
            results,
            dynamic,
            computed: self.computed,
            circular: self.circular,
            cancelled,
        }
    }

    fn settle(&mut self, root: FormulaId) {
        if self.is_settled(root) {
            return;
        }
        let mut stack: Vec<Frame> = vec![self.frame(root)];
        let mut on_stack: FxHashSet<FormulaId> = FxHashSet::default();
        on_stack.insert(root);

        while let Some(top) = stack.last_mut() {
            if top.next < top.deps.len() {
                let dep = top.deps[top.next];
                top.next += 1;
                if self.is_settled(dep) {
                    continue;
                }
                if on_stack.contains(&dep) {
                    self.cut_cycle(&mut stack, &mut on_stack, dep);
                } else {
                    on_stack.insert(dep);
                    stack.push(self.frame(dep));
                }
                continue;
            }
            let id = top.id;
            match self.evaluate(id) {
                Ok(value) => {
                    self.overlay.insert(id, value);
                    self.computed += 1;
                    on_stack.remove(&id);
                    stack.pop();
                }
                Err(Suspend(dep)) if on_stack.contains(&dep) => {
                    self.cut_cycle(&mut stack, &mut on_stack, dep);
                }
                Err(Suspend(dep)) => {
                    on_stack.insert(dep);
                    stack.push(self.frame(dep));
                }
            }
        }
    }

    /// Every frame from `dep` to the top of the stack lies on one cycle.
    fn cut_cycle(
        &mut self,
        stack: &mut Vec<Frame>,
        on_stack: &mut FxHashSet<FormulaId>,
        dep: FormulaId,
    ) {
        let Some(start) = stack.iter().position(|f| f.id == dep) else {
            return;
        };
        let members = stack.len() - start;
        for frame in stack.drain(start..) {
            on_stack.remove(&frame.id);
            self.overlay
                .insert(frame.id, CellValue::Error(ErrorKind::Circular));
        }
        self.circular += members;
        if let Some(cell) = self.doc.deps.formulas.get(dep) {
            tracing::warn!(at = %cell.pos, members, "circular reference");
        }
    }

    /// A frame for `id` listing the dirty formulas its static and last-known
    /// dynamic operands cover.
    fn frame(&self, id: FormulaId) -> Frame {
        let mut deps = SmallVec::new();
        if let Some(cell) = self.doc.deps.formulas.get(id) {
            for range in cell.listen_ranges() {
                self.doc.dirty_formulas_in(&range, &mut deps);
            }
        }
        deps.retain(|d| !self.is_settled(*d));
        Frame { id, deps, next: 0 }
    }

    fn evaluate(&mut self, id: FormulaId) -> Result<CellValue, Suspend> {
        let doc = self.doc;
        let Some(cell) = doc.deps.formulas.get(id) else {
            return Ok(CellValue::Empty);
        };
        let mut interp = Interpreter::new(doc, &self.overlay, &mut self.ctx, cell.pos);
        let value = interp.run(&cell.formula)?;
        if cell.formula.is_dynamic() {
            self.dynamic.insert(id, interp.dynamic);
        }
        Ok(value)
    }
}

impl Document {
    /// Push every dirty formula id located in `range` onto `out`.
    pub(crate) fn dirty_formulas_in<A: smallvec::Array<Item = FormulaId>>(
        &self,
        range: &RangeAddr,
        out: &mut SmallVec<A>,
    ) {
        let Some(table) = self.tables.get(range.tab as usize) else {
            return;
        };
        let Some((c1, c2)) = table.clamp_to_allocated(range.col1, range.col2) else {
            return;
        };
        for col in c1..=c2.min(table.allocated_columns().saturating_sub(1)) {
            for (_, cell) in table.column(col).iter_range(range.row1, range.row2) {
                if let Cell::Formula(id) = cell
                    && self.deps.formulas.get(*id).is_some_and(|c| c.dirty)
                {
                    out.push(*id);
                }
            }
        }
    }

    fn pending_roots(&mut self) -> Vec<FormulaId> {
        let mut roots = std::mem::take(&mut self.deps.pending);
        roots.sort_unstable();
        roots.dedup();
        roots.retain(|id| self.deps.formulas.get(*id).is_some_and(|c| c.dirty));
        roots
    }

    /// Write a pass's results back and register newly discovered dynamic
    /// dependencies.
    fn commit(&mut self, outcome: &mut Outcome) {
        let mut changed: Vec<CellAddr> = Vec::new();
        for (id, value) in outcome.results.drain(..) {
            let Some(cell) = self.deps.formulas.get_mut(id) else {
                continue;
            };
            if !cell.result.bit_eq(&value) {
                changed.push(cell.pos);
            }
            cell.result = value;
            cell.dirty = false;
        }
        for addr in changed {
            self.deps.notify_externals(addr);
        }
        for (id, ranges) in outcome.dynamic.drain(..) {
            let Some(cell) = self.deps.formulas.get_mut(id) else {
                continue;
            };
            if cell.dynamic_deps == ranges {
                continue;
            }
            let old = cell.listen_ranges();
            cell.dynamic_deps = ranges;
            tracing::trace!(at = %cell.pos, "dynamic dependencies changed");
            self.deps.access().reregister(id, &old);
        }
        let formulas = &self.deps.formulas;
        self.deps
            .pending
            .retain(|id| formulas.get(*id).is_some_and(|c| c.dirty));
    }

    fn run_sequential(
        &mut self,
        roots: &[FormulaId],
        cancel: Option<&AtomicBool>,
    ) -> (Outcome, CalcSummary) {
        let mut outcome = Settler::new(self).run(roots, cancel);
        let summary = CalcSummary {
            computed: outcome.computed,
            circular: outcome.circular,
            threaded: false,
            slices: 1,
            elapsed: Duration::ZERO,
        };
        self.commit(&mut outcome);
        (outcome, summary)
    }

    /// Interactive recalculation of the cells dirtied since the last pass.
    /// Always single-threaded.
    pub fn recalc(&mut self) -> CalcSummary {
        let start = Instant::now();
        let roots = self.pending_roots();
        if roots.is_empty() {
            return CalcSummary::default();
        }
        let _span = tracing::info_span!("recalc", dirty = roots.len()).entered();
        let (_, mut summary) = self.run_sequential(&roots, None);
        summary.elapsed = start.elapsed();
        summary
    }

    /// Bulk recalculation of every dirty formula. Fans out over the thread
    /// pool when the dirty set splits into independent column slices.
    pub fn calc_all(&mut self) -> CalcSummary {
        match self.calc_all_inner(None) {
            Ok(summary) => summary,
            Err(_) => CalcSummary::default(),
        }
    }

    /// [`Document::calc_all`] with cooperative cancellation between roots
    /// and slices. On cancellation the finished results are kept, the
    /// unfinished cells stay dirty, and `Err(Cancelled)` is returned.
    pub fn calc_all_cancellable(&mut self, cancel: &AtomicBool) -> SheetResult<CalcSummary> {
        self.calc_all_inner(Some(cancel))
    }

    fn calc_all_inner(&mut self, cancel: Option<&AtomicBool>) -> SheetResult<CalcSummary> {
        let start = Instant::now();
        let _span = tracing::info_span!("calc_all").entered();
        let mut roots: Vec<FormulaId> = self
            .deps
            .formulas
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(id, _)| id)
            .collect();
        roots.sort_unstable();
        self.deps.pending.clear();
        self.deps.pending.extend_from_slice(&roots);
        if roots.is_empty() {
            return Ok(CalcSummary::default());
        }

        let (cancelled, mut summary) = match self.parallel_slices(&roots) {
            Some(slices) => {
                let mut outcome = self.run_parallel(&slices, cancel);
                let summary = CalcSummary {
                    computed: outcome.computed,
                    circular: outcome.circular,
                    threaded: true,
                    slices: slices.len(),
                    elapsed: Duration::ZERO,
                };
                self.commit(&mut outcome);
                (outcome.cancelled, summary)
            }
            None => {
                let (outcome, summary) = self.run_sequential(&roots, cancel);
                (outcome.cancelled, summary)
            }
        };
        summary.elapsed = start.elapsed();
        tracing::debug!(
            computed = summary.computed,
            circular = summary.circular,
            threaded = summary.threaded,
            slices = summary.slices,
            "calc_all finished"
        );
        if cancelled {
            return Err(SheetError::Cancelled);
        }
        Ok(summary)
    }

    /// Mark every formula dirty and recalculate the whole document.
    pub fn hard_recalc(&mut self) -> CalcSummary {
        self.set_all_dirty();
        self.calc_all()
    }

    /// Demand-driven evaluation: settle only the dirty formulas inside
    /// `range` and whatever they read.
    pub fn interpret_dirty(&mut self, range: RangeAddr) -> CalcSummary {
        let start = Instant::now();
        let mut roots: SmallVec<[FormulaId; 8]> = SmallVec::new();
        self.dirty_formulas_in(&range, &mut roots);
        if roots.is_empty() {
            return CalcSummary::default();
        }
        let _span = tracing::info_span!("interpret_dirty", %range, dirty = roots.len()).entered();
        let (_, mut summary) = self.run_sequential(&roots, None);
        summary.elapsed = start.elapsed();
        summary
    }

    /// Mark the formula at `addr` dirty, spreading to its dependents.
    /// Returns `false` if `addr` does not hold a formula.
    pub fn mark_dirty(&mut self, addr: CellAddr) -> SheetResult<bool> {
        let table = self.sheet(addr.tab)?;
        self.config.limits.check_col(addr.col)?;
        self.config.limits.check_row(addr.row)?;
        let Some(Cell::Formula(id)) = table.column(addr.col).cell(addr.row).cloned() else {
            return Ok(false);
        };
        self.deps.access().mark_dirty(id);
        Ok(true)
    }

    pub fn set_all_dirty(&mut self) {
        let mut ids = Vec::with_capacity(self.deps.formulas.len());
        for (id, cell) in self.deps.formulas.iter_mut() {
            cell.dirty = true;
            ids.push(id);
        }
        self.deps.pending = ids;
    }

    /// Number of formula cells currently waiting for evaluation.
    pub fn dirty_count(&self) -> usize {
        self.deps.dirty_count()
    }
}
