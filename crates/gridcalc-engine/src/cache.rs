//! Sheet snapshots for out-of-process consumers.
//!
//! `store_to_cache` serialises one sheet's cell content (values, strings,
//! rich text, formulas with their cached results) plus notes as JSON.
//! `restore_from_cache` replaces a sheet's content with such a snapshot.
//! Formulas are stored as text and recompiled on restore, so references to
//! other sheets resolve by name.

use std::sync::Arc;

use gridcalc_common::{CellAddr, CellValue, RangeAddr, SheetError, SheetResult, SheetTab};
use gridcalc_formula::parse_formula;
use serde::{Deserialize, Serialize};

use crate::arena::FormulaCell;
use crate::cell::{Cell, Note, RichText};
use crate::document::Document;
use crate::flags::ProtectionAllow;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SheetCache {
    version: u32,
    name: String,
    columns: Vec<ColumnCache>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnCache {
    col: u32,
    cells: Vec<CellCache>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    notes: Vec<(u32, Note)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CellCache {
    Number {
        row: u32,
        value: f64,
    },
    Text {
        row: u32,
        text: String,
    },
    EditText {
        row: u32,
        text: RichText,
    },
    Formula {
        row: u32,
        text: String,
        result: CellValue,
        dirty: bool,
    },
}

impl Document {
    /// Serialise the content of sheet `tab`.
    pub fn store_to_cache(&self, tab: SheetTab) -> SheetResult<Vec<u8>> {
        let table = self.sheet(tab)?;
        let formulas = self.formulas();
        let mut columns = Vec::new();
        for column in table.columns() {
            if column.is_empty() && column.notes().next().is_none() {
                continue;
            }
            let mut cells = Vec::with_capacity(column.cell_count());
            for (row, cell) in column.iter() {
                cells.push(match cell {
                    Cell::Numeric(value) => CellCache::Number { row, value: *value },
                    Cell::Text(s) => CellCache::Text {
                        row,
                        text: s.as_str().to_string(),
                    },
                    Cell::EditText(rt) => CellCache::EditText {
                        row,
                        text: (**rt).clone(),
                    },
                    Cell::Formula(id) => {
                        let Some(fc) = formulas.get(*id) else {
                            continue;
                        };
                        CellCache::Formula {
                            row,
                            text: fc.formula.to_text(self, tab),
                            result: fc.result.clone(),
                            dirty: fc.dirty,
                        }
                    }
                });
            }
            let notes = column.notes().map(|(r, n)| (r, n.clone())).collect();
            columns.push(ColumnCache {
                col: column.col(),
                cells,
                notes,
            });
        }
        let cache = SheetCache {
            version: CACHE_VERSION,
            name: table.name().to_string(),
            columns,
        };
        serde_json::to_vec(&cache).map_err(|e| SheetError::Cache(e.to_string()))
    }

    /// Replace the content of sheet `tab` with a snapshot from
    /// [`Document::store_to_cache`]. The snapshot is fully decoded and every
    /// formula compiled before the sheet is touched.
    pub fn restore_from_cache(&mut self, tab: SheetTab, bytes: &[u8]) -> SheetResult<()> {
        self.sheet(tab)?
            .meta
            .check_allowed(ProtectionAllow::EDIT_CELLS)?;
        let cache: SheetCache =
            serde_json::from_slice(bytes).map_err(|e| SheetError::Cache(e.to_string()))?;
        if cache.version != CACHE_VERSION {
            return Err(SheetError::Cache(format!(
                "unsupported cache version {}",
                cache.version
            )));
        }
        let limits = self.config.limits;
        let mut decoded: Vec<(u32, u32, Decoded)> = Vec::new();
        let mut notes: Vec<(u32, u32, Note)> = Vec::new();
        {
            let pctx = self.parse_context(tab);
            for column in cache.columns {
                limits.check_col(column.col)?;
                for cell in column.cells {
                    let (row, value) = match cell {
                        CellCache::Number { row, value } => (row, Decoded::Number(value)),
                        CellCache::Text { row, text } => (row, Decoded::Text(text)),
                        CellCache::EditText { row, text } => (row, Decoded::EditText(text)),
                        CellCache::Formula {
                            row,
                            text,
                            result,
                            dirty,
                        } => {
                            let formula = parse_formula(&text, &pctx)
                                .map_err(|e| SheetError::Parse(e.to_string()))?;
                            (row, Decoded::Formula(formula, result, dirty))
                        }
                    };
                    limits.check_row(row)?;
                    decoded.push((column.col, row, value));
                }
                for (row, note) in column.notes {
                    limits.check_row(row)?;
                    notes.push((column.col, row, note));
                }
            }
        }

        let mut access = self.deps.access();
        let table = &mut self.tables[tab as usize];
        table.clear_all(&mut access);
        for (col, row, value) in decoded {
            let column = table.column_mut(col)?;
            match value {
                Decoded::Number(n) => column.set_value(row, n, &mut access)?,
                Decoded::Text(s) => {
                    let s = self.ctx.strings.intern(&s);
                    column.set_string(row, s, &mut access)?;
                }
                Decoded::EditText(rt) => column.set_edit_text(row, rt, &mut access)?,
                Decoded::Formula(formula, result, dirty) => {
                    let pos = CellAddr::new(tab, col, row);
                    let mut cell = FormulaCell::new(pos, Arc::new(formula));
                    cell.result = result;
                    cell.dirty = dirty;
                    column.put_formula_cell(row, cell, &mut access)?;
                }
            }
        }
        for (col, row, note) in notes {
            table.column_mut(col)?.set_note(row, Some(note))?;
        }
        access.notify_range(RangeAddr::new(tab, 0, 0, limits.max_col, limits.max_row));
        tracing::debug!(tab, name = %cache.name, "sheet restored from cache");
        self.after_edit();
        Ok(())
    }
}

enum Decoded {
    Number(f64),
    Text(String),
    EditText(RichText),
    Formula(gridcalc_formula::Formula, CellValue, bool),
}
