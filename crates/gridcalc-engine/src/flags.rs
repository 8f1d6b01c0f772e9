use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-row / per-column layout flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ColRowFlags: u8 {
        /// Size was set explicitly and is not recomputed from content.
        const MANUAL_SIZE = 0b0000_0001;
        /// A manual page break precedes this row/column.
        const MANUAL_BREAK = 0b0000_0010;
    }
}

bitflags! {
    /// Per-cell merge markers, stored in each column's run-store.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MergeFlags: u8 {
        /// Top-left cell of a merged area.
        const ORIGIN = 0b0000_0001;
        const HOR_OVERLAPPED = 0b0000_0010;
        const VER_OVERLAPPED = 0b0000_0100;
        /// Header cell carrying an auto-filter button.
        const AUTO_FILTER = 0b0000_1000;
    }
}

bitflags! {
    /// Actions still allowed on a protected sheet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ProtectionAllow: u16 {
        const SELECT_LOCKED = 0b0000_0001;
        const SELECT_UNLOCKED = 0b0000_0010;
        const INSERT_ROWS = 0b0000_0100;
        const INSERT_COLUMNS = 0b0000_1000;
        const DELETE_ROWS = 0b0001_0000;
        const DELETE_COLUMNS = 0b0010_0000;
        const SORT = 0b0100_0000;
        const AUTO_FILTER = 0b1000_0000;
        const EDIT_CELLS = 0b0001_0000_0000;
    }
}

bitflags! {
    /// What a range-delete removes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeleteFlags: u8 {
        const VALUES = 0b0000_0001;
        const STRINGS = 0b0000_0010;
        const FORMULAS = 0b0000_0100;
        const NOTES = 0b0000_1000;
        const SPARKLINES = 0b0001_0000;
        const ATTRIBUTES = 0b0010_0000;
        const CONTENTS = Self::VALUES.bits() | Self::STRINGS.bits() | Self::FORMULAS.bits();
    }
}
