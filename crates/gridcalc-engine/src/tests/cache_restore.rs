use gridcalc_common::{CellAddr, CellValue, ErrorKind, RangeAddr, SheetError};

use super::common::{at, one_sheet, small_config};
use crate::{Note, RichText, TextRun};

#[test]
fn snapshot_restores_content_and_cached_results() {
    let mut doc = one_sheet(small_config());
    doc.append_sheet("Totals").unwrap();
    doc.set_value(at(0, 0), 2.5).unwrap();
    doc.set_string(at(0, 1), "label").unwrap();
    doc.set_edit_text(
        at(0, 2),
        RichText::new(vec![TextRun {
            text: "bold".into(),
            bold: true,
            italic: false,
        }]),
    )
    .unwrap();
    doc.set_formula_text(at(1, 0), "=A1*4").unwrap();
    doc.set_formula_text(at(1, 1), "=Totals!A1+1").unwrap();
    doc.set_note(
        at(0, 0),
        Some(Note {
            author: "qa".into(),
            text: "checked".into(),
        }),
    )
    .unwrap();
    doc.recalc();

    let bytes = doc.store_to_cache(0).unwrap();

    doc.clear_cell(at(0, 0)).unwrap();
    doc.set_value(at(5, 5), 9.0).unwrap();
    doc.restore_from_cache(0, &bytes).unwrap();

    assert!(doc.get_value(at(5, 5)).unwrap().is_empty());
    assert_eq!(doc.get_value(at(0, 0)).unwrap(), CellValue::Number(2.5));
    assert_eq!(doc.get_string(at(0, 1)).unwrap(), "label");
    assert_eq!(doc.get_string(at(0, 2)).unwrap(), "bold");
    assert_eq!(doc.get_note(at(0, 0)).unwrap().map(|n| n.text.as_str()), Some("checked"));
    assert_eq!(
        doc.get_formula_text(at(1, 1)).unwrap().as_deref(),
        Some("=Totals!A1+1")
    );
    // Cached results come back without a recalc.
    assert_eq!(doc.get_value(at(1, 0)).unwrap(), CellValue::Number(10.0));
    assert_eq!(doc.get_value(at(1, 1)).unwrap(), CellValue::Number(1.0));

    // Restored formulas are wired into the graph again.
    doc.set_value(CellAddr::new(1, 0, 0), 41.0).unwrap();
    doc.recalc();
    assert_eq!(doc.get_value(at(1, 1)).unwrap(), CellValue::Number(42.0));
}

#[test]
fn restore_notifies_dependents_on_other_sheets() {
    let mut doc = one_sheet(small_config());
    doc.append_sheet("Report").unwrap();
    doc.set_value(at(0, 0), 1.0).unwrap();
    let bytes = doc.store_to_cache(0).unwrap();

    doc.set_value(at(0, 0), 7.0).unwrap();
    doc.set_formula_text(CellAddr::new(1, 0, 0), "=SUM(Sheet1!A1:A10)")
        .unwrap();
    doc.recalc();
    assert_eq!(
        doc.get_value(CellAddr::new(1, 0, 0)).unwrap(),
        CellValue::Number(7.0)
    );
    let listener = doc
        .register_external_listener(RangeAddr::new(0, 0, 0, 3, 3))
        .unwrap();

    doc.restore_from_cache(0, &bytes).unwrap();
    assert!(doc.take_notifications().iter().any(|n| n.listener == listener));
    doc.recalc();
    assert_eq!(
        doc.get_value(CellAddr::new(1, 0, 0)).unwrap(),
        CellValue::Number(1.0)
    );
}

#[test]
fn dirty_and_error_results_survive_the_round_trip() {
    let mut doc = one_sheet(small_config());
    doc.set_formula_text(at(0, 0), "=1/0").unwrap();
    doc.recalc();
    doc.set_formula_text(at(0, 1), "=2+2").unwrap();
    let bytes = doc.store_to_cache(0).unwrap();

    let mut other = one_sheet(small_config());
    other.restore_from_cache(0, &bytes).unwrap();
    assert_eq!(
        other.get_value(at(0, 0)).unwrap(),
        CellValue::Error(ErrorKind::Div0)
    );
    assert_eq!(other.dirty_count(), 1);
    other.recalc();
    assert_eq!(other.get_value(at(0, 1)).unwrap(), CellValue::Number(4.0));
}

#[test]
fn malformed_snapshots_leave_the_sheet_alone() {
    let mut doc = one_sheet(small_config());
    doc.set_value(at(0, 0), 3.0).unwrap();
    assert!(matches!(
        doc.restore_from_cache(0, b"{not json"),
        Err(SheetError::Cache(_))
    ));
    let bad_formula =
        br#"{"version":1,"name":"Sheet1","columns":[{"col":0,"cells":[{"kind":"formula","row":0,"text":"=SUM(","result":"Empty","dirty":true}]}]}"#;
    assert!(matches!(
        doc.restore_from_cache(0, bad_formula),
        Err(SheetError::Parse(_))
    ));
    let future = br#"{"version":9,"name":"Sheet1","columns":[]}"#;
    assert!(matches!(
        doc.restore_from_cache(0, future),
        Err(SheetError::Cache(_))
    ));
    assert_eq!(doc.get_value(at(0, 0)).unwrap(), CellValue::Number(3.0));
}
