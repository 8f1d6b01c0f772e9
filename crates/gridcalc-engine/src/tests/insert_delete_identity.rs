use gridcalc_common::{CellValue, SheetLimits};
use proptest::prelude::*;

use super::common::{at, one_sheet, small_config};
use crate::{Document, EngineConfig};

const ROWS: u32 = 30;

#[derive(Debug, PartialEq)]
enum Snap {
    Formula(String, CellValue),
    Value(CellValue),
}

fn build(config: EngineConfig) -> Document {
    let mut doc = one_sheet(config);
    for row in 0..ROWS {
        let r = row + 1;
        doc.set_value(at(0, row), f64::from(row * 3 % 11)).unwrap();
        doc.set_formula_text(at(1, row), &format!("=A{r}*2")).unwrap();
    }
    doc.set_formula_text(at(2, 0), "=SUM(A1:A30)").unwrap();
    doc.set_formula_text(at(3, 0), "=B30-$B$1").unwrap();
    doc.calc_all();
    doc
}

fn snapshot(doc: &Document) -> Vec<Snap> {
    let mut out = Vec::new();
    for col in 0..5 {
        for row in 0..ROWS + 10 {
            let addr = at(col, row);
            let value = doc.get_value(addr).unwrap();
            out.push(match doc.get_formula_text(addr).unwrap() {
                Some(text) => Snap::Formula(text, value),
                None => Snap::Value(value),
            });
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn inserting_then_deleting_rows_is_identity(row in 0u32..35, count in 1u32..8) {
        let mut doc = build(small_config());
        let before = snapshot(&doc);
        doc.insert_rows(0, row, count).unwrap();
        doc.delete_rows(0, row, count).unwrap();
        doc.calc_all();
        prop_assert_eq!(snapshot(&doc), before);
        prop_assert_eq!(doc.dirty_count(), 0);
    }

    #[test]
    fn inserting_then_deleting_cols_is_identity(col in 0u32..5, count in 1u32..4) {
        let mut doc = build(small_config());
        let before = snapshot(&doc);
        doc.insert_cols(0, col, count).unwrap();
        doc.delete_cols(0, col, count).unwrap();
        doc.calc_all();
        prop_assert_eq!(snapshot(&doc), before);
    }
}

#[test]
fn inserted_rows_shift_formulas_and_widen_ranges() {
    let mut doc = build(small_config());
    doc.insert_rows(0, 5, 2).unwrap();
    assert_eq!(
        doc.get_formula_text(at(2, 0)).unwrap().as_deref(),
        Some("=SUM(A1:A32)")
    );
    assert_eq!(
        doc.get_formula_text(at(1, 7)).unwrap().as_deref(),
        Some("=A8*2")
    );
    assert!(doc.get_value(at(1, 5)).unwrap().is_empty());

    doc.set_value(at(0, 5), 100.0).unwrap();
    doc.recalc();
    let sum: f64 = (0..ROWS).map(|r| f64::from(r * 3 % 11)).sum::<f64>() + 100.0;
    assert_eq!(doc.get_value(at(2, 0)).unwrap(), CellValue::Number(sum));
}

#[test]
fn insert_refuses_to_push_data_off_the_sheet() {
    let config = small_config().with_limits(SheetLimits::new(63, 39));
    let mut doc = build(config);
    assert!(matches!(
        doc.insert_rows(0, 0, 20),
        Err(gridcalc_common::SheetError::WouldPushDataOut { .. })
    ));
    // Nothing moved.
    assert_eq!(
        doc.get_formula_text(at(1, 0)).unwrap().as_deref(),
        Some("=A1*2")
    );
}
