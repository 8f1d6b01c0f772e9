use std::sync::Arc;

use gridcalc_common::{CellType, CellValue, RangeAddr};
use gridcalc_formula::Formula;
use serde::{Deserialize, Serialize};

use crate::arena::FormulaId;
use crate::context::SharedString;

/// One run of rich text with its character attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
            italic: false,
        }
    }
}

/// Multi-run formatted text ("edit text").
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RichText {
    pub runs: Vec<TextRun>,
}

impl RichText {
    pub fn new(runs: Vec<TextRun>) -> Self {
        Self { runs }
    }

    /// Concatenated text without formatting.
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// A cell comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub author: String,
    pub text: String,
}

/// A miniature chart drawn inside one cell from a data range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sparkline {
    pub data: RangeAddr,
    pub group: u32,
}

/// Stored content of a non-empty cell. Empty cells are simply absent.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Numeric(f64),
    Text(SharedString),
    EditText(Arc<RichText>),
    Formula(FormulaId),
}

impl Cell {
    pub fn cell_type(&self) -> CellType {
        match self {
            Cell::Numeric(_) => CellType::Numeric,
            Cell::Text(_) => CellType::String,
            Cell::EditText(_) => CellType::EditText,
            Cell::Formula(_) => CellType::Formula,
        }
    }

    #[inline]
    pub fn formula_id(&self) -> Option<FormulaId> {
        match self {
            Cell::Formula(id) => Some(*id),
            _ => None,
        }
    }
}

/// Borrowed, resolved view of a cell as returned by readers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellView<'a> {
    Empty,
    Numeric(f64),
    Text(&'a str),
    EditText(&'a RichText),
    Formula {
        id: FormulaId,
        formula: &'a Formula,
        result: &'a CellValue,
        dirty: bool,
    },
}

impl CellView<'_> {
    pub fn cell_type(&self) -> CellType {
        match self {
            CellView::Empty => CellType::Empty,
            CellView::Numeric(_) => CellType::Numeric,
            CellView::Text(_) => CellType::String,
            CellView::EditText(_) => CellType::EditText,
            CellView::Formula { .. } => CellType::Formula,
        }
    }

    /// The value a reader sees: literal content or the cached formula result.
    pub fn value(&self) -> CellValue {
        match self {
            CellView::Empty => CellValue::Empty,
            CellView::Numeric(n) => CellValue::Number(*n),
            CellView::Text(s) => CellValue::text(*s),
            CellView::EditText(rt) => CellValue::text(rt.plain_text()),
            CellView::Formula { result, .. } => (*result).clone(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, CellView::Empty)
    }
}
