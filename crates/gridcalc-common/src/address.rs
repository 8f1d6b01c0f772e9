//! Sheet-scoped cell and area addresses.
//!
//! All indices are **zero-based**. A sheet is addressed by its tab position
//! (`SheetTab`), which is stable until the sheet is deleted or moved; the
//! document rewrites every stored reference when that happens.
//!
//! Ordering of [`CellAddr`] is column-major (`tab`, `col`, `row`), matching the
//! way cells are stored and scanned column by column.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{SheetError, SheetResult};

/// Tab position of a sheet inside its document.
pub type SheetTab = u16;

/* ───────────────────────────── Limits ───────────────────────────── */

/// Document-wide address bounds (inclusive maxima).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetLimits {
    pub max_col: u32,
    pub max_row: u32,
}

impl Default for SheetLimits {
    fn default() -> Self {
        Self {
            max_col: 16_383,
            max_row: 1_048_575,
        }
    }
}

impl SheetLimits {
    pub const fn new(max_col: u32, max_row: u32) -> Self {
        Self { max_col, max_row }
    }

    #[inline]
    pub const fn valid_col(&self, col: u32) -> bool {
        col <= self.max_col
    }

    #[inline]
    pub const fn valid_row(&self, row: u32) -> bool {
        row <= self.max_row
    }

    pub fn check_col(&self, col: u32) -> SheetResult<()> {
        if self.valid_col(col) {
            Ok(())
        } else {
            Err(SheetError::IndexOutOfRange {
                what: "column",
                index: col as u64,
                max: self.max_col as u64,
            })
        }
    }

    pub fn check_row(&self, row: u32) -> SheetResult<()> {
        if self.valid_row(row) {
            Ok(())
        } else {
            Err(SheetError::IndexOutOfRange {
                what: "row",
                index: row as u64,
                max: self.max_row as u64,
            })
        }
    }

    pub fn check_range(&self, range: &RangeAddr) -> SheetResult<()> {
        self.check_col(range.col2)?;
        self.check_row(range.row2)
    }

    /// The whole-sheet area for `tab`.
    pub fn full_sheet(&self, tab: SheetTab) -> RangeAddr {
        RangeAddr::new(tab, 0, 0, self.max_col, self.max_row)
    }
}

/* ──────────────────────────── CellAddr ──────────────────────────── */

/// A single cell position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddr {
    pub tab: SheetTab,
    pub col: u32,
    pub row: u32,
}

impl CellAddr {
    #[inline]
    pub const fn new(tab: SheetTab, col: u32, row: u32) -> Self {
        Self { tab, col, row }
    }

    /// Offset by signed deltas, returning `None` on underflow.
    pub fn offset(self, dcol: i64, drow: i64) -> Option<Self> {
        let col = u32::try_from(self.col as i64 + dcol).ok()?;
        let row = u32::try_from(self.row as i64 + drow).ok()?;
        Some(Self::new(self.tab, col, row))
    }

    /// `A1`-style rendering without a sheet qualifier.
    pub fn to_a1(self) -> String {
        format!("{}{}", col_to_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.tab, self.to_a1())
    }
}

/* ──────────────────────────── RangeAddr ─────────────────────────── */

/// A rectangular area on one sheet. `col1 <= col2` and `row1 <= row2` always hold.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeAddr {
    pub tab: SheetTab,
    pub col1: u32,
    pub row1: u32,
    pub col2: u32,
    pub row2: u32,
}

impl RangeAddr {
    /// Build a range, normalising the corner order.
    pub fn new(tab: SheetTab, col1: u32, row1: u32, col2: u32, row2: u32) -> Self {
        Self {
            tab,
            col1: col1.min(col2),
            row1: row1.min(row2),
            col2: col1.max(col2),
            row2: row1.max(row2),
        }
    }

    pub const fn single(addr: CellAddr) -> Self {
        Self {
            tab: addr.tab,
            col1: addr.col,
            row1: addr.row,
            col2: addr.col,
            row2: addr.row,
        }
    }

    pub fn from_corners(start: CellAddr, end: CellAddr) -> SheetResult<Self> {
        if start.tab != end.tab {
            return Err(SheetError::InvalidRange(
                "range corners refer to different sheets".to_string(),
            ));
        }
        Ok(Self::new(start.tab, start.col, start.row, end.col, end.row))
    }

    #[inline]
    pub fn start(&self) -> CellAddr {
        CellAddr::new(self.tab, self.col1, self.row1)
    }

    #[inline]
    pub fn end(&self) -> CellAddr {
        CellAddr::new(self.tab, self.col2, self.row2)
    }

    #[inline]
    pub fn is_single_cell(&self) -> bool {
        self.col1 == self.col2 && self.row1 == self.row2
    }

    #[inline]
    pub fn contains(&self, addr: CellAddr) -> bool {
        addr.tab == self.tab
            && (self.col1..=self.col2).contains(&addr.col)
            && (self.row1..=self.row2).contains(&addr.row)
    }

    pub fn contains_range(&self, other: &RangeAddr) -> bool {
        self.tab == other.tab
            && self.col1 <= other.col1
            && other.col2 <= self.col2
            && self.row1 <= other.row1
            && other.row2 <= self.row2
    }

    pub fn intersects(&self, other: &RangeAddr) -> bool {
        self.tab == other.tab
            && self.col1 <= other.col2
            && other.col1 <= self.col2
            && self.row1 <= other.row2
            && other.row1 <= self.row2
    }

    pub fn intersection(&self, other: &RangeAddr) -> Option<RangeAddr> {
        if !self.intersects(other) {
            return None;
        }
        Some(RangeAddr::new(
            self.tab,
            self.col1.max(other.col1),
            self.row1.max(other.row1),
            self.col2.min(other.col2),
            self.row2.min(other.row2),
        ))
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.col2 - self.col1 + 1
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.row2 - self.row1 + 1
    }

    pub fn cell_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Iterate every address in column-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellAddr> + '_ {
        (self.col1..=self.col2).flat_map(move |col| {
            (self.row1..=self.row2).map(move |row| CellAddr::new(self.tab, col, row))
        })
    }

    pub fn with_tab(mut self, tab: SheetTab) -> Self {
        self.tab = tab;
        self
    }

    /// `A1:B2`-style rendering without a sheet qualifier.
    pub fn to_a1(&self) -> String {
        if self.is_single_cell() {
            self.start().to_a1()
        } else {
            format!("{}:{}", self.start().to_a1(), self.end().to_a1())
        }
    }
}

impl fmt::Display for RangeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.tab, self.to_a1())
    }
}

/* ───────────────────── Column letter helpers ────────────────────── */

/// Convert a zero-based column into letters (0 ⇒ `A`, 26 ⇒ `AA`).
pub fn col_to_letters(mut col: u32) -> String {
    let mut buf = Vec::with_capacity(4);
    loop {
        buf.push(b'A' + (col % 26) as u8);
        col /= 26;
        if col == 0 {
            break;
        }
        col -= 1;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Convert letters (`"AA"`, case-insensitive) back into a zero-based column.
pub fn letters_to_col(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 7 {
        return None;
    }
    let mut col: u32 = 0;
    for ch in s.bytes() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (ch.to_ascii_uppercase() - b'A') as u32 + 1;
    }
    Some(col - 1)
}
