//! Row sorting and the generic row reorder primitive.
//!
//! Sorting computes a permutation of the data rows and hands it to
//! [`Document::reorder`], which moves cells, notes, sparklines and
//! patterns, re-derives merge markers and runs the reference-update pass so
//! single-cell references follow their data.

use std::cmp::Ordering;
use std::sync::Arc;

use gridcalc_common::{CellValue, RangeAddr, SheetError, SheetResult, SheetTab};

use crate::context::DocumentContext;
use crate::document::Document;
use crate::flags::ProtectionAllow;
use crate::ref_update::RefUpdate;

pub const MAX_SORT_KEYS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub col: u32,
    pub ascending: bool,
    pub case_sensitive: bool,
    /// Compare digit runs by numeric value ("item2" before "item10").
    pub natural: bool,
    /// Index into the document's user lists; listed texts sort in list order.
    pub user_list: Option<usize>,
}

impl SortKey {
    pub fn ascending(col: u32) -> Self {
        Self {
            col,
            ascending: true,
            case_sensitive: false,
            natural: false,
            user_list: None,
        }
    }

    pub fn descending(col: u32) -> Self {
        Self {
            ascending: false,
            ..Self::ascending(col)
        }
    }

    pub fn natural(mut self) -> Self {
        self.natural = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn with_user_list(mut self, index: usize) -> Self {
        self.user_list = Some(index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortParam {
    pub range: RangeAddr,
    /// First row of `range` is a header and stays in place.
    pub has_header: bool,
    pub keys: Vec<SortKey>,
}

impl SortParam {
    pub fn new(range: RangeAddr) -> Self {
        Self {
            range,
            has_header: false,
            keys: Vec::new(),
        }
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_key(mut self, key: SortKey) -> Self {
        self.keys.push(key);
        self
    }

    /// Rows that move: `range` minus the header row.
    pub fn data_range(&self) -> Option<RangeAddr> {
        let row1 = self.range.row1 + u32::from(self.has_header);
        (row1 <= self.range.row2).then(|| {
            RangeAddr::new(
                self.range.tab,
                self.range.col1,
                row1,
                self.range.col2,
                self.range.row2,
            )
        })
    }
}

fn type_rank(v: &CellValue) -> u8 {
    match v {
        CellValue::Number(_) => 0,
        CellValue::Text(_) => 1,
        CellValue::Bool(_) => 2,
        CellValue::Error(_) => 3,
        CellValue::Empty => 4,
    }
}

/// Compare two strings treating runs of ASCII digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        let da = a.bytes().take_while(u8::is_ascii_digit).count();
        let db = b.bytes().take_while(u8::is_ascii_digit).count();
        let ord = if da > 0 && db > 0 {
            let (na, nb) = (a[..da].trim_start_matches('0'), b[..db].trim_start_matches('0'));
            na.len().cmp(&nb.len()).then_with(|| na.cmp(nb))
        } else {
            let ca = a.chars().next().unwrap_or_default();
            let cb = b.chars().next().unwrap_or_default();
            ca.cmp(&cb)
        };
        if ord != Ordering::Equal {
            return ord;
        }
        let (sa, sb) = if da > 0 && db > 0 {
            (da, db)
        } else {
            let ca = a.chars().next().map_or(0, char::len_utf8);
            let cb = b.chars().next().map_or(0, char::len_utf8);
            (ca, cb)
        };
        a = &a[sa..];
        b = &b[sb..];
    }
}

fn text_cmp(a: &str, b: &str, key: &SortKey, ctx: &DocumentContext) -> Ordering {
    if let Some(list) = key.user_list.and_then(|i| ctx.user_list(i)) {
        match (
            list.position(a, key.case_sensitive),
            list.position(b, key.case_sensitive),
        ) {
            (Some(x), Some(y)) => return x.cmp(&y),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }
    }
    let folded;
    let (a, b) = if key.case_sensitive {
        (a, b)
    } else {
        folded = (a.to_lowercase(), b.to_lowercase());
        (folded.0.as_str(), folded.1.as_str())
    };
    if key.natural {
        natural_cmp(a, b)
    } else {
        a.cmp(b)
    }
}

/// Ordering of two cell values under `key`. Empty cells sort last in
/// either direction.
pub fn compare_for_sort(
    a: &CellValue,
    b: &CellValue,
    key: &SortKey,
    ctx: &DocumentContext,
) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    let ord = match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::Text(x), CellValue::Text(y)) => text_cmp(x, y, key, ctx),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        (CellValue::Error(x), CellValue::Error(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    };
    if key.ascending { ord } else { ord.reverse() }
}

fn check_permutation(order: &[u32]) -> SheetResult<()> {
    let mut seen = vec![false; order.len()];
    for &i in order {
        match seen.get_mut(i as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => {
                return Err(SheetError::InvalidRange(format!(
                    "row order is not a permutation (offset {i})"
                )));
            }
        }
    }
    Ok(())
}

impl Document {
    /// Sort the data rows of `param.range` and remember the parameters on
    /// the sheet.
    pub fn sort(&mut self, param: SortParam) -> SheetResult<()> {
        let tab = param.range.tab;
        self.check_unlocked()?;
        self.config.limits.check_range(&param.range)?;
        self.sheet(tab)?.meta.check_allowed(ProtectionAllow::SORT)?;
        if param.keys.is_empty() || param.keys.len() > MAX_SORT_KEYS {
            return Err(SheetError::InvalidRange(format!(
                "{} sort keys",
                param.keys.len()
            )));
        }
        if let Some(key) = param
            .keys
            .iter()
            .find(|k| k.col < param.range.col1 || k.col > param.range.col2)
        {
            return Err(SheetError::IndexOutOfRange {
                what: "sort key column",
                index: key.col as u64,
                max: param.range.col2 as u64,
            });
        }
        let Some(data) = param.data_range() else {
            self.tables[tab as usize].sort_param = Some(param);
            return Ok(());
        };
        let order = self.sort_order(&data, &param.keys)?;
        if order.iter().enumerate().any(|(i, o)| i as u32 != *o) {
            self.reorder(tab, data, &order)?;
        }
        tracing::debug!(tab, range = %param.range, keys = param.keys.len(), "sorted");
        self.tables[tab as usize].sort_param = Some(param);
        Ok(())
    }

    /// The stable permutation that sorts `data` by `keys`: entry `i` is the
    /// offset of the row that goes to offset `i`.
    pub fn sort_order(&self, data: &RangeAddr, keys: &[SortKey]) -> SheetResult<Vec<u32>> {
        let table = self.sheet(data.tab)?;
        let formulas = self.formulas();
        let height = data.height();
        let columns: Vec<Vec<CellValue>> = keys
            .iter()
            .map(|k| {
                (data.row1..=data.row2)
                    .map(|row| table.get_cell(k.col, row, formulas).value())
                    .collect()
            })
            .collect();
        let mut order: Vec<u32> = (0..height).collect();
        order.sort_by(|&a, &b| {
            keys.iter()
                .zip(&columns)
                .map(|(key, values)| {
                    compare_for_sort(&values[a as usize], &values[b as usize], key, &self.ctx)
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(order)
    }

    /// Permute the rows of `range`: the row at offset `order[i]` moves to
    /// offset `i`. References to single cells in the range follow the data.
    pub fn reorder(&mut self, tab: SheetTab, range: RangeAddr, order: &[u32]) -> SheetResult<()> {
        let range = range.with_tab(tab);
        self.check_unlocked()?;
        self.config.limits.check_range(&range)?;
        self.sheet(tab)?.meta.check_allowed(ProtectionAllow::SORT)?;
        if order.len() as u64 != u64::from(range.height()) {
            return Err(SheetError::InvalidRange(format!(
                "order has {} entries for {} rows",
                order.len(),
                range.height()
            )));
        }
        check_permutation(order)?;
        let table = self.sheet(tab)?;
        if table.has_vertical_merges(&range) {
            let m = table
                .merged_areas()
                .iter()
                .find(|m| m.height() > 1 && m.intersects(&range))
                .map(|m| m.to_a1())
                .unwrap_or_default();
            return Err(SheetError::MergedCellsInRange(m));
        }

        let mut targets = vec![0u32; order.len()];
        for (i, &src) in order.iter().enumerate() {
            targets[src as usize] = i as u32;
        }
        let targets: Arc<[u32]> = targets.into();

        let table = &mut self.tables[tab as usize];
        let last = range.col2.min(table.allocated_columns().saturating_sub(1));
        if table.allocated_columns() > 0 {
            for col in range.col1..=last {
                if let Some(column) = table.allocated_column_mut(col) {
                    column.reorder_rows(range.row1, order)?;
                }
            }
        }
        table.map_merges(|m| {
            if m.row1 == m.row2 && range.contains_range(&m) {
                let row = range.row1 + targets[(m.row1 - range.row1) as usize];
                Some(RangeAddr::new(m.tab, m.col1, row, m.col2, row))
            } else {
                Some(m)
            }
        });
        table.rebuild_merge_flags()?;

        self.resync_positions(tab);
        self.update_references(&RefUpdate::Reorder {
            tab,
            col1: range.col1,
            col2: range.col2,
            row1: range.row1,
            targets,
        })?;

        // Moved formulas may depend on their own position (ROW, INDIRECT).
        let table = &self.tables[tab as usize];
        let mut moved = Vec::new();
        for col in range.col1..=last {
            moved.extend(
                table
                    .column(col)
                    .formula_rows()
                    .filter(|(row, _)| (range.row1..=range.row2).contains(row))
                    .map(|(_, id)| id),
            );
        }
        let mut access = self.deps.access();
        for id in moved {
            access.mark_dirty(id);
        }
        access.notify_range(range);
        self.after_edit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_common::{ErrorKind, SheetLimits};

    fn ctx() -> DocumentContext {
        DocumentContext::new(SheetLimits::new(63, 999))
    }

    #[test]
    fn natural_order_compares_digit_runs() {
        assert_eq!(natural_cmp("item2", "item10"), Ordering::Less);
        assert_eq!(natural_cmp("item010", "item10"), Ordering::Equal);
        assert_eq!(natural_cmp("a", "b"), Ordering::Less);
        assert_eq!(natural_cmp("x1y", "x1"), Ordering::Greater);
    }

    #[test]
    fn types_order_and_empties_last() {
        let ctx = ctx();
        let asc = SortKey::ascending(0);
        let desc = SortKey::descending(0);
        let n = CellValue::Number(1.0);
        let t = CellValue::text("a");
        let b = CellValue::Bool(true);
        let e = CellValue::Error(ErrorKind::Na);
        assert_eq!(compare_for_sort(&n, &t, &asc, &ctx), Ordering::Less);
        assert_eq!(compare_for_sort(&t, &b, &asc, &ctx), Ordering::Less);
        assert_eq!(compare_for_sort(&b, &e, &asc, &ctx), Ordering::Less);
        assert_eq!(compare_for_sort(&CellValue::Empty, &n, &asc, &ctx), Ordering::Greater);
        assert_eq!(compare_for_sort(&CellValue::Empty, &n, &desc, &ctx), Ordering::Greater);
        assert_eq!(compare_for_sort(&n, &t, &desc, &ctx), Ordering::Greater);
    }

    #[test]
    fn user_lists_sort_in_list_order() {
        let ctx = ctx();
        let key = SortKey::ascending(0).with_user_list(0);
        let list = ctx.user_list(0).unwrap();
        let first = CellValue::text(list.items[0].as_str());
        let second = CellValue::text(list.items[1].as_str());
        assert_eq!(compare_for_sort(&second, &first, &key, &ctx), Ordering::Greater);
        assert_eq!(
            compare_for_sort(&first, &CellValue::text("zzz"), &key, &ctx),
            Ordering::Less
        );
    }

    #[test]
    fn permutation_check_rejects_duplicates() {
        assert!(check_permutation(&[2, 0, 1]).is_ok());
        assert!(check_permutation(&[0, 0, 1]).is_err());
        assert!(check_permutation(&[0, 3]).is_err());
    }
}
