pub mod access;
pub mod arena;
pub mod broadcast;
pub mod cache;
pub mod cell;
pub mod column;
pub mod config;
pub mod context;
pub mod document;
pub mod flags;
pub mod interval_tree;
pub mod query;
pub mod recalc;
pub mod ref_update;
pub mod run_store;
pub mod selection;
pub mod sort;
pub mod structure;
pub mod table;

pub use access::{ColumnStorageAccess, Notification};
pub use arena::{FormulaCell, FormulaId};
pub use broadcast::ExternalListenerId;
pub use cell::{Cell, CellView, Note, RichText, Sparkline, TextRun};
pub use column::Column;
pub use config::{DeletedRefPolicy, EngineConfig};
pub use context::{DocumentContext, NumberContext, SharedString, UserList};
pub use document::Document;
pub use flags::{ColRowFlags, DeleteFlags, MergeFlags, ProtectionAllow};
pub use query::{Connector, FilterEntries, MatchMode, QueryEntry, QueryOp, QueryParam, QueryValue};
pub use recalc::CalcSummary;
pub use ref_update::RefUpdate;
pub use run_store::RunStore;
pub use selection::MarkData;
pub use sort::{SortKey, SortParam};
pub use table::Table;

#[cfg(test)]
mod tests;
