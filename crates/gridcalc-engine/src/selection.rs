//! Selection marks and the per-column visitor that applies a closure to
//! every marked row span.

use gridcalc_common::{CellAddr, RangeAddr, SheetResult, SheetTab};
use smallvec::SmallVec;

use crate::access::ColumnStorageAccess;
use crate::column::Column;
use crate::document::Document;
use crate::table::Table;

/// A set of selected ranges, possibly overlapping and on several sheets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkData {
    ranges: Vec<RangeAddr>,
}

impl MarkData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_range(range: RangeAddr) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    pub fn add(&mut self, range: RangeAddr) {
        self.ranges.push(range);
    }

    pub fn ranges(&self) -> &[RangeAddr] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_marked(&self, addr: CellAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }

    /// Bounding box of the marks on `tab`.
    pub fn bounds(&self, tab: SheetTab) -> Option<RangeAddr> {
        self.ranges
            .iter()
            .filter(|r| r.tab == tab)
            .copied()
            .reduce(|a, b| {
                RangeAddr::new(
                    tab,
                    a.col1.min(b.col1),
                    a.row1.min(b.row1),
                    a.col2.max(b.col2),
                    a.row2.max(b.row2),
                )
            })
    }

    /// Disjoint, sorted row spans marked in column `col` of `tab`.
    pub fn column_spans(&self, tab: SheetTab, col: u32) -> SmallVec<[(u32, u32); 4]> {
        let mut spans: SmallVec<[(u32, u32); 4]> = self
            .ranges
            .iter()
            .filter(|r| r.tab == tab && r.col1 <= col && col <= r.col2)
            .map(|r| (r.row1, r.row2))
            .collect();
        spans.sort_unstable();
        let mut merged: SmallVec<[(u32, u32); 4]> = SmallVec::new();
        for (s, e) in spans {
            match merged.last_mut() {
                Some(last) if s <= last.1.saturating_add(1) => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        merged
    }

    fn columns(&self, tab: SheetTab) -> Option<(u32, u32)> {
        self.bounds(tab).map(|b| (b.col1, b.col2))
    }
}

impl Table {
    /// Call `f` once per marked row span of every marked column, allocating
    /// columns as needed. Overlapping marks are visited once.
    pub fn apply_with_allocation<F>(&mut self, mark: &MarkData, mut f: F) -> SheetResult<()>
    where
        F: FnMut(&mut Column, u32, u32) -> SheetResult<()>,
    {
        let tab = self.tab();
        let Some((col1, col2)) = mark.columns(tab) else {
            return Ok(());
        };
        for range in mark.ranges().iter().filter(|r| r.tab == tab) {
            self.limits().check_range(range)?;
        }
        for col in col1..=col2 {
            let spans = mark.column_spans(tab, col);
            if spans.is_empty() {
                continue;
            }
            let column = self.column_mut(col)?;
            for (row1, row2) in spans {
                f(column, row1, row2)?;
            }
        }
        Ok(())
    }

    /// Like [`Table::apply_with_allocation`] but capped to the columns that
    /// already exist; unallocated columns hold nothing to visit.
    pub fn apply_to_allocated<F>(&mut self, mark: &MarkData, mut f: F) -> SheetResult<()>
    where
        F: FnMut(&mut Column, u32, u32) -> SheetResult<()>,
    {
        let tab = self.tab();
        let Some((col1, col2)) = mark.columns(tab) else {
            return Ok(());
        };
        let Some((col1, col2)) = self.clamp_to_allocated(col1, col2) else {
            return Ok(());
        };
        for col in col1..=col2 {
            let spans = mark.column_spans(tab, col);
            let Some(column) = self.allocated_column_mut(col) else {
                continue;
            };
            for (row1, row2) in spans {
                f(column, row1, row2)?;
            }
        }
        Ok(())
    }
}

impl Document {
    /// Run `f` over the marked spans of every sheet, handing it the
    /// privileged storage capability so it may write cells.
    pub fn apply_to_selection<F>(&mut self, mark: &MarkData, mut f: F) -> SheetResult<()>
    where
        F: FnMut(&mut Column, u32, u32, &mut ColumnStorageAccess<'_>) -> SheetResult<()>,
    {
        let mut tabs: SmallVec<[SheetTab; 4]> = mark.ranges().iter().map(|r| r.tab).collect();
        tabs.sort_unstable();
        tabs.dedup();
        for &tab in &tabs {
            self.sheet(tab)?;
        }
        let mut access = self.deps.access();
        for tab in tabs {
            let table = &mut self.tables[tab as usize];
            table.apply_with_allocation(mark, |column, row1, row2| f(column, row1, row2, &mut access))?;
        }
        self.after_edit();
        Ok(())
    }

    /// Clear every marked cell.
    pub fn clear_selection(&mut self, mark: &MarkData) -> SheetResult<usize> {
        let mut removed = 0;
        let mut tabs: SmallVec<[SheetTab; 4]> = mark.ranges().iter().map(|r| r.tab).collect();
        tabs.sort_unstable();
        tabs.dedup();
        for &tab in &tabs {
            self.sheet(tab)?;
        }
        let mut access = self.deps.access();
        for tab in tabs {
            self.tables[tab as usize].apply_to_allocated(mark, |column, row1, row2| {
                removed += column.clear_range(row1, row2, &mut access)?;
                Ok(())
            })?;
        }
        self.after_edit();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_common::{CellValue, SheetLimits};

    fn doc() -> Document {
        let config = crate::EngineConfig::default().with_limits(SheetLimits::new(63, 999));
        let mut doc = Document::new(config);
        doc.append_sheet("Sheet1").unwrap();
        doc
    }

    #[test]
    fn overlapping_marks_are_visited_once() {
        let mut mark = MarkData::new();
        mark.add(RangeAddr::new(0, 0, 0, 1, 4));
        mark.add(RangeAddr::new(0, 1, 3, 2, 9));
        assert_eq!(mark.column_spans(0, 1).as_slice(), &[(0, 9)]);
        assert_eq!(mark.column_spans(0, 2).as_slice(), &[(3, 9)]);
        assert!(mark.column_spans(0, 3).is_empty());
        assert_eq!(mark.bounds(0), Some(RangeAddr::new(0, 0, 0, 2, 9)));
    }

    #[test]
    fn apply_allocates_marked_columns() {
        let mut doc = doc();
        let mark = MarkData::from_range(RangeAddr::new(0, 5, 0, 5, 2));
        let mut visits = Vec::new();
        doc.sheet_mut(0)
            .unwrap()
            .apply_with_allocation(&mark, |column, r1, r2| {
                visits.push((column.col(), r1, r2));
                Ok(())
            })
            .unwrap();
        assert_eq!(visits, vec![(5, 0, 2)]);
        assert!(doc.sheet(0).unwrap().allocated_columns() >= 6);
    }

    #[test]
    fn selection_writes_and_clears() {
        let mut doc = doc();
        let mark = MarkData::from_range(RangeAddr::new(0, 0, 0, 1, 1));
        doc.apply_to_selection(&mark, |column, r1, r2, access| {
            for row in r1..=r2 {
                column.set_value(row, 7.0, access)?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(
            doc.get_value(CellAddr::new(0, 1, 1)).unwrap(),
            CellValue::Number(7.0)
        );
        assert_eq!(doc.clear_selection(&mark).unwrap(), 4);
        assert!(doc.get_value(CellAddr::new(0, 1, 1)).unwrap().is_empty());
    }
}
