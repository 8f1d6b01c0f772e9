//! Common test helpers
use gridcalc_common::{CellAddr, SheetLimits};
use tracing_subscriber::EnvFilter;

use crate::{Document, EngineConfig};

/// Route engine traces to the test writer. Honours `RUST_LOG`.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn small_config() -> EngineConfig {
    EngineConfig::default()
        .with_parallel(false)
        .with_limits(SheetLimits::new(63, 999))
}

/// A document with one sheet named `Sheet1`.
pub fn one_sheet(config: EngineConfig) -> Document {
    init_test_tracing();
    let mut doc = Document::new(config);
    doc.append_sheet("Sheet1").unwrap();
    doc
}

pub fn at(col: u32, row: u32) -> CellAddr {
    CellAddr::new(0, col, row)
}
