//! Error types.
//!
//! Two families live here:
//!
//! * [`ErrorKind`] is a cell-level error. It is *data*: it is stored as a
//!   formula result and flows to dependents like any other value.
//! * [`SheetError`] is a structural or API error reported synchronously to the
//!   caller. An operation that returns it has left the document unmodified.

use core::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cell-level error codes, displayed Excel-style.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    Na,
    Circular,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Null,
        ErrorKind::Div0,
        ErrorKind::Value,
        ErrorKind::Ref,
        ErrorKind::Name,
        ErrorKind::Num,
        ErrorKind::Na,
        ErrorKind::Circular,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::Null => "#NULL!",
            ErrorKind::Div0 => "#DIV/0!",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Num => "#NUM!",
            ErrorKind::Na => "#N/A",
            ErrorKind::Circular => "#CIRC!",
        }
    }

    /// Parse an error literal, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        Self::ALL.into_iter().find(|k| k.code() == upper)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

/// Structural and API errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SheetError {
    #[error("{what} index {index} is outside 0..={max}")]
    IndexOutOfRange {
        what: &'static str,
        index: u64,
        max: u64,
    },

    #[error("no sheet at tab {0}")]
    NoSuchSheet(u32),

    #[error("a sheet named '{0}' already exists")]
    DuplicateSheetName(String),

    #[error("invalid sheet name '{0}'")]
    InvalidSheetName(String),

    #[error("structural changes are locked (lock count {0})")]
    StructuralConflict(u32),

    #[error("operation cancelled")]
    Cancelled,

    #[error("inserting {count} rows/columns would push data beyond the sheet bounds")]
    WouldPushDataOut { count: u32 },

    #[error("range {0} contains merged cells that cannot be split")]
    MergedCellsInRange(String),

    #[error("sheet '{0}' is protected")]
    ProtectedSheet(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("formula parse error: {0}")]
    Parse(String),

    #[error("cache error: {0}")]
    Cache(String),
}

pub type SheetResult<T> = Result<T, SheetError>;
