//! Meta crate that re-exports the gridcalc building blocks. Depend on this
//! crate and pick layers with feature flags; the underlying crates stay
//! reachable for deeper integration.

#[cfg(feature = "common")]
pub use gridcalc_common as common;

#[cfg(feature = "formula")]
pub use gridcalc_formula as formula;

#[cfg(feature = "engine")]
pub use gridcalc_engine as engine;

#[cfg(feature = "common")]
pub use gridcalc_common::{
    CellAddr, CellType, CellValue, ErrorKind, RangeAddr, SheetError, SheetLimits, SheetResult,
    SheetTab,
};

#[cfg(feature = "formula")]
pub use gridcalc_formula::{Formula, parse_formula};

#[cfg(feature = "engine")]
pub use gridcalc_engine::{
    CalcSummary, DeletedRefPolicy, Document, EngineConfig, ExternalListenerId, MarkData,
    Notification, QueryEntry, QueryOp, QueryParam, QueryValue, SortKey, SortParam,
};
