//! Host-facing coordinator owning every table and the dependency state.

use std::sync::Arc;

use gridcalc_common::{
    CellAddr, CellType, CellValue, ErrorKind, RangeAddr, SheetError, SheetResult, SheetTab,
};
use gridcalc_formula::{Formula, ParseContext, SheetNames, parse_formula};
use rayon::ThreadPoolBuilder;

use crate::access::{DependencyState, Notification};
use crate::arena::{FormulaArena, FormulaCell, FormulaId};
use crate::broadcast::{BroadcasterGraph, ExternalListenerId};
use crate::cell::{Cell, CellView, Note, RichText, Sparkline};
use crate::config::EngineConfig;
use crate::context::{DocumentContext, NumberContext};
use crate::flags::{DeleteFlags, ProtectionAllow};
use crate::ref_update::RefUpdate;
use crate::table::Table;

pub struct Document {
    pub(crate) config: EngineConfig,
    pub(crate) ctx: DocumentContext,
    pub(crate) tables: Vec<Table>,
    pub(crate) deps: DependencyState,
    structural_locks: u32,
    pub(crate) thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("sheets", &self.sheet_names())
            .field("formulas", &self.deps.formulas.len())
            .field("structural_locks", &self.structural_locks)
            .finish()
    }
}

impl Document {
    pub fn new(config: EngineConfig) -> Self {
        let thread_pool = if config.enable_parallel {
            let mut builder = ThreadPoolBuilder::new();
            if let Some(max_threads) = config.max_threads {
                builder = builder.num_threads(max_threads);
            }
            match builder.build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    tracing::warn!(error = %e, "thread pool unavailable, calculating sequentially");
                    None
                }
            }
        } else {
            None
        };
        Self::build(config, thread_pool)
    }

    /// Share an existing pool between documents.
    pub fn with_thread_pool(config: EngineConfig, thread_pool: Arc<rayon::ThreadPool>) -> Self {
        Self::build(config, Some(thread_pool))
    }

    fn build(config: EngineConfig, thread_pool: Option<Arc<rayon::ThreadPool>>) -> Self {
        Self {
            ctx: DocumentContext::new(config.limits),
            config,
            tables: Vec::new(),
            deps: DependencyState::default(),
            structural_locks: 0,
            thread_pool,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &DocumentContext {
        &self.ctx
    }

    pub fn thread_pool(&self) -> Option<&Arc<rayon::ThreadPool>> {
        self.thread_pool.as_ref()
    }

    pub fn formulas(&self) -> &FormulaArena {
        self.deps.formulas()
    }

    pub fn dependency_graph(&self) -> &BroadcasterGraph {
        self.deps.graph()
    }

    /* ──────────────────────────── Sheets ─────────────────────────────── */

    pub fn sheet_count(&self) -> usize {
        self.tables.len()
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.tables.iter().map(Table::name).collect()
    }

    pub fn sheet_index(&self, name: &str) -> Option<SheetTab> {
        self.tab_of(name)
    }

    pub fn sheet(&self, tab: SheetTab) -> SheetResult<&Table> {
        self.tables
            .get(tab as usize)
            .ok_or(SheetError::NoSuchSheet(tab as u32))
    }

    pub fn sheet_mut(&mut self, tab: SheetTab) -> SheetResult<&mut Table> {
        self.tables
            .get_mut(tab as usize)
            .ok_or(SheetError::NoSuchSheet(tab as u32))
    }

    fn validate_name(&self, name: &str, except: Option<SheetTab>) -> SheetResult<()> {
        let bad = name.is_empty()
            || name.starts_with('\'')
            || name.ends_with('\'')
            || name.contains(['[', ']', '*', '?', ':', '/', '\\']);
        if bad {
            return Err(SheetError::InvalidSheetName(name.to_string()));
        }
        match self.tab_of(name) {
            Some(t) if Some(t) != except => Err(SheetError::DuplicateSheetName(name.to_string())),
            _ => Ok(()),
        }
    }

    pub fn append_sheet(&mut self, name: &str) -> SheetResult<SheetTab> {
        let tab = SheetTab::try_from(self.tables.len())
            .map_err(|_| SheetError::NoSuchSheet(self.tables.len() as u32))?;
        self.insert_sheet(tab, name)
    }

    /// Insert a sheet before `tab`; references to later sheets are renumbered.
    pub fn insert_sheet(&mut self, tab: SheetTab, name: &str) -> SheetResult<SheetTab> {
        self.check_unlocked()?;
        self.validate_name(name, None)?;
        if tab as usize > self.tables.len() || self.tables.len() >= SheetTab::MAX as usize {
            return Err(SheetError::NoSuchSheet(tab as u32));
        }
        let table = Table::new(tab, name, self.config.limits, self.config.eager_columns);
        self.tables.insert(tab as usize, table);
        let appended = tab as usize + 1 == self.tables.len();
        if !appended {
            self.renumber_tables(tab as usize + 1);
            self.update_references(&RefUpdate::InsertTab { tab })?;
        }
        tracing::debug!(tab, name, "sheet inserted");
        self.dirty_dynamic();
        self.after_edit();
        Ok(tab)
    }

    /// Delete a sheet. Formulas elsewhere that read it get `#REF!` operands.
    pub fn delete_sheet(&mut self, tab: SheetTab) -> SheetResult<()> {
        self.check_unlocked()?;
        self.sheet(tab)?;
        // References first: nothing is dropped if the pass fails.
        self.update_references(&RefUpdate::DeleteTab { tab })?;
        let mut access = self.deps.access();
        self.tables[tab as usize].clear_all(&mut access);
        self.tables.remove(tab as usize);
        self.renumber_tables(tab as usize);
        tracing::debug!(tab, "sheet deleted");
        self.dirty_dynamic();
        self.after_edit();
        Ok(())
    }

    pub fn move_sheet(&mut self, from: SheetTab, to: SheetTab) -> SheetResult<()> {
        self.check_unlocked()?;
        self.sheet(from)?;
        self.sheet(to)?;
        if from == to {
            return Ok(());
        }
        let table = self.tables.remove(from as usize);
        self.tables.insert(to as usize, table);
        self.renumber_tables(from.min(to) as usize);
        self.update_references(&RefUpdate::MoveTab { from, to })?;
        tracing::debug!(from, to, "sheet moved");
        self.dirty_dynamic();
        self.after_edit();
        Ok(())
    }

    pub fn rename_sheet(&mut self, tab: SheetTab, name: &str) -> SheetResult<()> {
        self.sheet(tab)?;
        self.validate_name(name, Some(tab))?;
        self.tables[tab as usize].meta.name = name.to_string();
        self.dirty_dynamic();
        self.after_edit();
        Ok(())
    }

    fn renumber_tables(&mut self, from: usize) {
        for i in from..self.tables.len() {
            self.tables[i].set_tab(i as SheetTab);
            self.resync_positions(i as SheetTab);
        }
    }

    /// Formulas resolving references from text must re-run after sheet
    /// names change.
    fn dirty_dynamic(&mut self) {
        let ids: Vec<FormulaId> = self
            .deps
            .formulas
            .iter()
            .filter(|(_, c)| c.formula.is_dynamic())
            .map(|(id, _)| id)
            .collect();
        let mut access = self.deps.access();
        for id in ids {
            access.mark_dirty(id);
        }
    }

    /* ─────────────────────── Structural lock ─────────────────────────── */

    /// Forbid structural changes until the matching unlock. Reentrant.
    pub fn lock_structural_changes(&mut self) {
        self.structural_locks += 1;
    }

    pub fn unlock_structural_changes(&mut self) {
        self.structural_locks = self.structural_locks.saturating_sub(1);
    }

    pub fn structural_lock_count(&self) -> u32 {
        self.structural_locks
    }

    pub(crate) fn check_unlocked(&self) -> SheetResult<()> {
        if self.structural_locks > 0 {
            return Err(SheetError::StructuralConflict(self.structural_locks));
        }
        Ok(())
    }

    /* ───────────────────────────── Reads ─────────────────────────────── */

    fn check_addr(&self, addr: CellAddr) -> SheetResult<&Table> {
        let table = self.sheet(addr.tab)?;
        self.config.limits.check_col(addr.col)?;
        self.config.limits.check_row(addr.row)?;
        Ok(table)
    }

    pub fn get_cell(&self, addr: CellAddr) -> SheetResult<CellView<'_>> {
        let table = self.check_addr(addr)?;
        Ok(table.get_cell(addr.col, addr.row, &self.deps.formulas))
    }

    pub fn get_value(&self, addr: CellAddr) -> SheetResult<CellValue> {
        Ok(self.get_cell(addr)?.value())
    }

    pub fn cell_type(&self, addr: CellAddr) -> SheetResult<CellType> {
        Ok(self.get_cell(addr)?.cell_type())
    }

    pub fn get_error(&self, addr: CellAddr) -> SheetResult<Option<ErrorKind>> {
        Ok(self.get_value(addr)?.as_error())
    }

    /// Display text of a cell under the document's number context.
    pub fn get_string(&self, addr: CellAddr) -> SheetResult<String> {
        Ok(match self.get_value(addr)? {
            CellValue::Number(n) => self.ctx.number().number_to_text(n),
            other => other.to_string(),
        })
    }

    pub fn get_formula_text(&self, addr: CellAddr) -> SheetResult<Option<String>> {
        Ok(match self.get_cell(addr)? {
            CellView::Formula { formula, .. } => Some(formula.to_text(self, addr.tab)),
            _ => None,
        })
    }

    pub fn formula_cell(&self, addr: CellAddr) -> Option<&FormulaCell> {
        let id = self.tables.get(addr.tab as usize)?.column(addr.col).cell(addr.row)?.formula_id()?;
        self.deps.formulas.get(id)
    }

    pub fn get_note(&self, addr: CellAddr) -> SheetResult<Option<&Note>> {
        Ok(self.check_addr(addr)?.column(addr.col).note(addr.row))
    }

    pub fn get_sparkline(&self, addr: CellAddr) -> SheetResult<Option<&Sparkline>> {
        Ok(self.check_addr(addr)?.column(addr.col).sparkline(addr.row))
    }

    pub fn parse_context(&self, tab: SheetTab) -> ParseContext<'_> {
        ParseContext::new(tab, self, self.config.limits)
    }

    /* ───────────────────────────── Writes ────────────────────────────── */

    fn editable_table(&mut self, addr: CellAddr) -> SheetResult<&mut Table> {
        self.check_addr(addr)?;
        let table = &mut self.tables[addr.tab as usize];
        table.meta.check_allowed(ProtectionAllow::EDIT_CELLS)?;
        Ok(table)
    }

    pub(crate) fn after_edit(&mut self) {
        if self.config.auto_calc {
            self.recalc();
        }
    }

    pub fn set_value(&mut self, addr: CellAddr, value: f64) -> SheetResult<()> {
        self.editable_table(addr)?;
        let mut access = self.deps.access();
        self.tables[addr.tab as usize]
            .column_mut(addr.col)?
            .set_value(addr.row, value, &mut access)?;
        self.after_edit();
        Ok(())
    }

    pub fn set_string(&mut self, addr: CellAddr, text: &str) -> SheetResult<()> {
        self.editable_table(addr)?;
        let text = self.ctx.strings.intern(text);
        let mut access = self.deps.access();
        self.tables[addr.tab as usize]
            .column_mut(addr.col)?
            .set_string(addr.row, text, &mut access)?;
        self.after_edit();
        Ok(())
    }

    pub fn set_edit_text(&mut self, addr: CellAddr, text: RichText) -> SheetResult<()> {
        self.editable_table(addr)?;
        let mut access = self.deps.access();
        self.tables[addr.tab as usize]
            .column_mut(addr.col)?
            .set_edit_text(addr.row, text, &mut access)?;
        self.after_edit();
        Ok(())
    }

    /// Store a compiled formula. The cell starts dirty; an operand that
    /// cannot be resolved makes its cached result `#REF!`.
    pub fn set_formula(&mut self, addr: CellAddr, formula: Formula) -> SheetResult<FormulaId> {
        self.editable_table(addr)?;
        let mut access = self.deps.access();
        let id = self.tables[addr.tab as usize]
            .column_mut(addr.col)?
            .set_formula(addr.row, Arc::new(formula), &mut access)?;
        self.after_edit();
        Ok(id)
    }

    pub fn set_formula_text(&mut self, addr: CellAddr, text: &str) -> SheetResult<FormulaId> {
        let formula = parse_formula(text, &self.parse_context(addr.tab))
            .map_err(|e| SheetError::Parse(e.to_string()))?;
        self.set_formula(addr, formula)
    }

    pub fn clear_cell(&mut self, addr: CellAddr) -> SheetResult<()> {
        self.editable_table(addr)?;
        let mut access = self.deps.access();
        if let Some(column) = self.tables[addr.tab as usize].allocated_column_mut(addr.col) {
            column.clear(addr.row, &mut access)?;
        }
        self.after_edit();
        Ok(())
    }

    /// Remove the kinds of content selected by `flags` from `range`.
    pub fn delete_area(&mut self, range: RangeAddr, flags: DeleteFlags) -> SheetResult<()> {
        self.editable_table(range.start())?;
        self.config.limits.check_range(&range)?;
        let table = &mut self.tables[range.tab as usize];
        let mut access = self.deps.access();
        let Some((c1, c2)) = table.clamp_to_allocated(range.col1, range.col2) else {
            return Ok(());
        };
        for c in c1..=c2.min(table.allocated_columns().saturating_sub(1)) {
            let Some(column) = table.allocated_column_mut(c) else {
                continue;
            };
            if flags.contains(DeleteFlags::CONTENTS) {
                column.clear_range(range.row1, range.row2, &mut access)?;
            } else if flags.intersects(DeleteFlags::CONTENTS) {
                let rows: Vec<u32> = column
                    .iter_range(range.row1, range.row2)
                    .filter(|(_, cell)| match cell {
                        Cell::Numeric(_) => flags.contains(DeleteFlags::VALUES),
                        Cell::Text(_) | Cell::EditText(_) => flags.contains(DeleteFlags::STRINGS),
                        Cell::Formula(_) => flags.contains(DeleteFlags::FORMULAS),
                    })
                    .map(|(r, _)| r)
                    .collect();
                for row in rows {
                    column.clear(row, &mut access)?;
                }
            }
            if flags.contains(DeleteFlags::NOTES) || flags.contains(DeleteFlags::SPARKLINES) {
                let rows: Vec<u32> = column
                    .notes()
                    .map(|(r, _)| r)
                    .chain(column.sparklines().map(|(r, _)| r))
                    .filter(|r| (range.row1..=range.row2).contains(r))
                    .collect();
                for row in rows {
                    if flags.contains(DeleteFlags::NOTES) {
                        column.set_note(row, None)?;
                    }
                    if flags.contains(DeleteFlags::SPARKLINES) {
                        column.set_sparkline(row, None)?;
                    }
                }
            }
            if flags.contains(DeleteFlags::ATTRIBUTES) {
                column.set_pattern(range.row1, range.row2, 0)?;
            }
        }
        self.after_edit();
        Ok(())
    }

    pub fn set_note(&mut self, addr: CellAddr, note: Option<Note>) -> SheetResult<()> {
        self.editable_table(addr)?.column_mut(addr.col)?.set_note(addr.row, note)
    }

    pub fn set_sparkline(
        &mut self,
        addr: CellAddr,
        sparkline: Option<Sparkline>,
    ) -> SheetResult<()> {
        self.editable_table(addr)?
            .column_mut(addr.col)?
            .set_sparkline(addr.row, sparkline)
    }

    pub fn set_pattern(&mut self, range: RangeAddr, pattern: u32) -> SheetResult<()> {
        self.config.limits.check_range(&range)?;
        let table = self.editable_table(range.start())?;
        for c in range.col1..=range.col2 {
            table.column_mut(c)?.set_pattern(range.row1, range.row2, pattern)?;
        }
        Ok(())
    }

    /* ──────────────────────── External listeners ─────────────────────── */

    pub fn register_external_listener(
        &mut self,
        range: RangeAddr,
    ) -> SheetResult<ExternalListenerId> {
        self.sheet(range.tab)?;
        self.config.limits.check_range(&range)?;
        Ok(self.deps.register_external(range))
    }

    pub fn unregister_external_listener(&mut self, id: ExternalListenerId) -> bool {
        self.deps.unregister_external(id)
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.deps.take_notifications()
    }

    /* ─────────────────────────── Context ─────────────────────────────── */

    /// Replace the number context. A change invalidates every cached result,
    /// so a full recalculation runs immediately.
    pub fn set_number_context(&mut self, number: NumberContext) -> bool {
        if !self.ctx.set_number(number) {
            return false;
        }
        tracing::debug!(epoch = self.ctx.epoch(), "number context changed");
        self.hard_recalc();
        true
    }
}

impl SheetNames for Document {
    fn tab_of(&self, name: &str) -> Option<SheetTab> {
        self.tables
            .iter()
            .position(|t| t.name().eq_ignore_ascii_case(name))
            .and_then(|i| SheetTab::try_from(i).ok())
    }

    fn name_of(&self, tab: SheetTab) -> Option<&str> {
        self.tables.get(tab as usize).map(Table::name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        let mut d = Document::new(EngineConfig::default().with_parallel(false));
        d.append_sheet("Sheet1").unwrap();
        d
    }

    #[test]
    fn sheet_names_are_validated() {
        let mut d = doc();
        assert_eq!(
            d.append_sheet("sheet1"),
            Err(SheetError::DuplicateSheetName("sheet1".into()))
        );
        assert!(matches!(d.append_sheet("a/b"), Err(SheetError::InvalidSheetName(_))));
        assert_eq!(d.append_sheet("Data").unwrap(), 1);
        assert!(d.rename_sheet(1, "DATA").is_ok());
        assert_eq!(d.sheet_index("data"), Some(1));
    }

    #[test]
    fn protected_sheets_reject_edits() {
        let mut d = doc();
        d.sheet_mut(0).unwrap().meta.protection =
            Some(crate::table::SheetProtection::new(None, ProtectionAllow::empty()));
        assert_eq!(
            d.set_value(CellAddr::new(0, 0, 0), 1.0),
            Err(SheetError::ProtectedSheet("Sheet1".into()))
        );
    }

    #[test]
    fn structural_lock_is_reentrant() {
        let mut d = doc();
        d.lock_structural_changes();
        d.lock_structural_changes();
        assert_eq!(d.append_sheet("X"), Err(SheetError::StructuralConflict(2)));
        d.unlock_structural_changes();
        assert_eq!(d.append_sheet("X"), Err(SheetError::StructuralConflict(1)));
        d.unlock_structural_changes();
        assert!(d.append_sheet("X").is_ok());
    }

    #[test]
    fn formula_text_round_trips() {
        let mut d = doc();
        d.append_sheet("Other sheet").unwrap();
        let a1 = CellAddr::new(0, 0, 0);
        d.set_formula_text(a1, "=SUM('Other sheet'!A1:B2)*2").unwrap();
        assert_eq!(
            d.get_formula_text(a1).unwrap().as_deref(),
            Some("=SUM('Other sheet'!A1:B2)*2")
        );
        assert!(matches!(d.set_formula_text(a1, "=1+"), Err(SheetError::Parse(_))));
    }

    #[test]
    fn delete_area_respects_flags() {
        let mut d = doc();
        d.set_value(CellAddr::new(0, 0, 0), 1.0).unwrap();
        d.set_string(CellAddr::new(0, 0, 1), "x").unwrap();
        d.set_note(
            CellAddr::new(0, 0, 1),
            Some(Note {
                author: "me".into(),
                text: "hi".into(),
            }),
        )
        .unwrap();
        d.delete_area(RangeAddr::new(0, 0, 0, 0, 5), DeleteFlags::VALUES | DeleteFlags::NOTES)
            .unwrap();
        assert_eq!(d.cell_type(CellAddr::new(0, 0, 0)).unwrap(), CellType::Empty);
        assert_eq!(d.cell_type(CellAddr::new(0, 0, 1)).unwrap(), CellType::String);
        assert!(d.get_note(CellAddr::new(0, 0, 1)).unwrap().is_none());
    }
}
