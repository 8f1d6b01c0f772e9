//! Shared address, value, and error types for the gridcalc crates.

pub mod address;
pub mod error;
pub mod value;

pub use address::{CellAddr, RangeAddr, SheetLimits, SheetTab, col_to_letters, letters_to_col};
pub use error::{ErrorKind, SheetError, SheetResult};
pub use value::{CellType, CellValue, format_number};
