use gridcalc_common::{CellValue, RangeAddr};
use proptest::prelude::*;

use super::common::{at, one_sheet, small_config};
use crate::{
    Document, MatchMode, QueryEntry, QueryOp, QueryParam, QueryValue, SortKey, SortParam,
};

fn fruit_table() -> Document {
    let mut doc = one_sheet(small_config());
    doc.set_string(at(0, 0), "Name").unwrap();
    doc.set_string(at(1, 0), "Qty").unwrap();
    let rows = [
        ("apple", 5.0),
        ("banana", 12.0),
        ("cherry", 7.0),
        ("apricot", 20.0),
        ("date", 1.0),
    ];
    for (i, (name, qty)) in rows.into_iter().enumerate() {
        let row = i as u32 + 1;
        doc.set_string(at(0, row), name).unwrap();
        doc.set_value(at(1, row), qty).unwrap();
    }
    doc
}

fn table_range() -> RangeAddr {
    RangeAddr::new(0, 0, 0, 1, 5)
}

fn hidden_rows(doc: &Document) -> Vec<u32> {
    let table = doc.sheet(0).unwrap();
    (0..=5).filter(|r| table.is_row_hidden(*r)).collect()
}

#[test]
fn sort_with_header_keeps_formulas_on_their_rows() {
    let mut doc = fruit_table();
    for row in 1..=5u32 {
        let r = row + 1;
        doc.set_formula_text(at(2, row), &format!("=B{r}*10")).unwrap();
    }
    // Outside the sorted block, pointing at apple's quantity.
    doc.set_formula_text(at(4, 0), "=B2").unwrap();
    doc.recalc();

    let param = SortParam::new(RangeAddr::new(0, 0, 0, 2, 5))
        .with_header(true)
        .with_key(SortKey::descending(1));
    doc.sort(param).unwrap();
    doc.recalc();

    let names: Vec<String> = (1..=5).map(|r| doc.get_string(at(0, r)).unwrap()).collect();
    assert_eq!(names, ["apricot", "banana", "cherry", "apple", "date"]);
    assert_eq!(doc.get_string(at(0, 0)).unwrap(), "Name");
    for row in 1..=5 {
        let qty = doc.get_value(at(1, row)).unwrap().to_number().unwrap();
        assert_eq!(
            doc.get_value(at(2, row)).unwrap(),
            CellValue::Number(qty * 10.0)
        );
    }
    assert_eq!(
        doc.get_formula_text(at(4, 0)).unwrap().as_deref(),
        Some("=B5")
    );
    assert_eq!(doc.get_value(at(4, 0)).unwrap(), CellValue::Number(5.0));
    assert!(doc.sheet(0).unwrap().sort_param.is_some());
}

#[test]
fn sort_rejects_key_outside_range() {
    let mut doc = fruit_table();
    let param = SortParam::new(table_range()).with_key(SortKey::ascending(3));
    assert!(doc.sort(param).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn sorting_by_index_column_restores_order(values in prop::collection::vec(-50i32..50, 2..40)) {
        let mut doc = one_sheet(small_config());
        for (i, v) in values.iter().enumerate() {
            doc.set_value(at(0, i as u32), f64::from(*v)).unwrap();
            doc.set_value(at(1, i as u32), i as f64).unwrap();
        }
        let range = RangeAddr::new(0, 0, 0, 1, values.len() as u32 - 1);
        doc.sort(SortParam::new(range).with_key(SortKey::ascending(0))).unwrap();

        let sorted: Vec<f64> = (0..values.len() as u32)
            .map(|r| doc.get_value(at(0, r)).unwrap().to_number().unwrap())
            .collect();
        prop_assert!(sorted.windows(2).all(|w| w[0] <= w[1]));

        doc.sort(SortParam::new(range).with_key(SortKey::ascending(1))).unwrap();
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(
                doc.get_value(at(0, i as u32)).unwrap(),
                CellValue::Number(f64::from(*v))
            );
        }
    }
}

#[test]
fn query_hides_rows_that_fail_and_remove_filter_shows_them() {
    let mut doc = fruit_table();
    let param = QueryParam::new(table_range()).with_entry(QueryEntry::new(
        1,
        QueryOp::Greater,
        QueryValue::Number(6.0),
    ));
    assert_eq!(doc.query(param).unwrap(), 3);
    assert_eq!(hidden_rows(&doc), [1, 5]);
    assert!(doc.sheet(0).unwrap().is_row_filtered(1));
    assert!(doc.query_param(0).is_some());

    assert!(doc.remove_filter(0).unwrap());
    assert!(hidden_rows(&doc).is_empty());
    assert!(doc.query_param(0).is_none());
    assert!(!doc.remove_filter(0).unwrap());
}

#[test]
fn query_or_entries_and_wildcards() {
    let mut doc = fruit_table();
    let param = QueryParam::new(table_range())
        .with_entry(QueryEntry::new(1, QueryOp::Greater, QueryValue::Number(15.0)))
        .with_entry(
            QueryEntry::new(0, QueryOp::Equal, QueryValue::Text("CHERRY".into())).or(),
        );
    assert_eq!(doc.query(param).unwrap(), 2);
    assert_eq!(hidden_rows(&doc), [1, 2, 5]);

    let param = QueryParam::new(table_range())
        .with_mode(MatchMode::Wildcard)
        .with_entry(QueryEntry::new(0, QueryOp::Equal, QueryValue::Text("ap*".into())));
    assert_eq!(doc.query(param).unwrap(), 2);
    assert_eq!(hidden_rows(&doc), [2, 3, 5]);
    assert!(doc.valid_query(4, doc.query_param(0).unwrap()).unwrap());
    assert!(!doc.valid_query(2, doc.query_param(0).unwrap()).unwrap());
}

#[test]
fn filter_entries_lists_distinct_sorted_values() {
    let mut doc = fruit_table();
    doc.set_string(at(0, 7), "Apple").unwrap();
    let entries = doc.filter_entries(0, 0, 1, 7).unwrap();
    let names: Vec<String> = entries
        .values
        .iter()
        .map(|v| v.to_text().unwrap())
        .collect();
    assert_eq!(names, ["apple", "apricot", "banana", "cherry", "date"]);
    assert!(entries.has_empty);
}

#[test]
fn sort_recomputes_position_dependent_formulas() {
    let mut doc = one_sheet(small_config());
    doc.set_value(at(0, 0), 2.0).unwrap();
    doc.set_value(at(0, 1), 1.0).unwrap();
    doc.set_formula_text(at(1, 0), "=ROW()").unwrap();
    doc.set_formula_text(at(1, 1), "=ROW()*10").unwrap();
    doc.recalc();
    assert_eq!(doc.get_value(at(1, 0)).unwrap(), CellValue::Number(1.0));

    let range = RangeAddr::new(0, 0, 0, 1, 1);
    doc.sort(SortParam::new(range).with_key(SortKey::ascending(0)))
        .unwrap();
    assert_eq!(doc.dirty_count(), 2);
    doc.recalc();
    assert_eq!(
        doc.get_formula_text(at(1, 0)).unwrap().as_deref(),
        Some("=ROW()*10")
    );
    assert_eq!(doc.get_value(at(1, 0)).unwrap(), CellValue::Number(10.0));
    assert_eq!(doc.get_value(at(1, 1)).unwrap(), CellValue::Number(2.0));
}

#[test]
fn new_query_releases_rows_hidden_by_the_previous_one() {
    let mut doc = fruit_table();
    let wide = QueryParam::new(table_range()).with_entry(QueryEntry::new(
        1,
        QueryOp::Greater,
        QueryValue::Number(6.0),
    ));
    doc.query(wide).unwrap();
    assert_eq!(hidden_rows(&doc), [1, 5]);

    let narrow = QueryParam::new(RangeAddr::new(0, 0, 0, 1, 3)).with_entry(QueryEntry::new(
        1,
        QueryOp::Greater,
        QueryValue::Number(10.0),
    ));
    assert_eq!(doc.query(narrow).unwrap(), 1);
    assert_eq!(hidden_rows(&doc), [1, 3]);
    assert!(!doc.sheet(0).unwrap().is_row_filtered(5));
}
