use gridcalc_common::{CellAddr, CellValue, RangeAddr, SheetError};

use super::common::{at, one_sheet, small_config};
use crate::table::SheetProtection;
use crate::{MarkData, ProtectionAllow, Sparkline};

#[test]
fn structural_lock_blocks_shape_changes_only() {
    let mut doc = one_sheet(small_config());
    doc.set_value(at(0, 0), 1.0).unwrap();
    doc.lock_structural_changes();
    assert_eq!(
        doc.insert_rows(0, 0, 1),
        Err(SheetError::StructuralConflict(1))
    );
    assert!(doc.delete_cols(0, 0, 1).is_err());
    assert!(doc.append_sheet("Other").is_err());
    doc.set_value(at(0, 1), 2.0).unwrap();

    doc.unlock_structural_changes();
    assert_eq!(doc.structural_lock_count(), 0);
    doc.insert_rows(0, 0, 1).unwrap();
    assert_eq!(doc.get_value(at(0, 1)).unwrap(), CellValue::Number(1.0));
}

#[test]
fn protection_gates_each_action() {
    let mut doc = one_sheet(small_config());
    doc.set_value(at(0, 0), 1.0).unwrap();
    doc.sheet_mut(0).unwrap().meta.protection = Some(SheetProtection::new(
        Some("pw"),
        ProtectionAllow::INSERT_ROWS | ProtectionAllow::SELECT_UNLOCKED,
    ));
    doc.insert_rows(0, 0, 1).unwrap();
    assert!(matches!(
        doc.delete_rows(0, 0, 1),
        Err(SheetError::ProtectedSheet(_))
    ));
    assert!(matches!(
        doc.set_value(at(3, 3), 1.0),
        Err(SheetError::ProtectedSheet(_))
    ));
    assert!(doc.sheet(0).unwrap().meta.protection.as_ref().unwrap().verify(Some("pw")));
}

#[test]
fn partial_insert_refuses_to_split_a_merge() {
    let mut doc = one_sheet(small_config());
    doc.sheet_mut(0)
        .unwrap()
        .set_merged_cells(RangeAddr::new(0, 0, 0, 1, 1))
        .unwrap();
    assert!(matches!(
        doc.insert_rows_in(0, 1, 5, 1, 1),
        Err(SheetError::MergedCellsInRange(_))
    ));
    // Full-width rows move the merge as a whole.
    doc.insert_rows(0, 0, 2).unwrap();
    assert_eq!(
        doc.sheet(0).unwrap().merged_areas(),
        [RangeAddr::new(0, 0, 2, 1, 3)]
    );
}

#[test]
fn copy_rebases_relative_references() {
    let mut doc = one_sheet(small_config());
    doc.set_value(at(0, 0), 1.0).unwrap();
    doc.set_formula_text(at(0, 1), "=A1*2+$A$1").unwrap();
    doc.copy_range(RangeAddr::new(0, 0, 0, 0, 1), at(2, 4)).unwrap();
    assert_eq!(
        doc.get_formula_text(at(2, 5)).unwrap().as_deref(),
        Some("=C5*2+$A$1")
    );
    doc.set_value(at(2, 4), 10.0).unwrap();
    doc.recalc();
    assert_eq!(doc.get_value(at(2, 5)).unwrap(), CellValue::Number(21.0));
    // The source is untouched.
    assert_eq!(
        doc.get_formula_text(at(0, 1)).unwrap().as_deref(),
        Some("=A1*2+$A$1")
    );
}

#[test]
fn transpose_swaps_axes() {
    let mut doc = one_sheet(small_config());
    doc.set_value(at(0, 0), 1.0).unwrap();
    doc.set_formula_text(at(0, 1), "=A1*2").unwrap();
    doc.transpose_range(RangeAddr::new(0, 0, 0, 0, 1), at(2, 0))
        .unwrap();
    assert_eq!(doc.get_value(at(2, 0)).unwrap(), CellValue::Number(1.0));
    assert_eq!(
        doc.get_formula_text(at(3, 0)).unwrap().as_deref(),
        Some("=C1*2")
    );
    doc.recalc();
    assert_eq!(doc.get_value(at(3, 0)).unwrap(), CellValue::Number(2.0));
}

#[test]
fn copy_to_another_sheet_keeps_local_references_local() {
    let mut doc = one_sheet(small_config());
    doc.append_sheet("Sheet2").unwrap();
    doc.set_value(at(0, 0), 4.0).unwrap();
    doc.set_formula_text(at(0, 1), "=A1*2").unwrap();
    doc.copy_range(RangeAddr::new(0, 0, 0, 0, 1), CellAddr::new(1, 0, 0))
        .unwrap();
    assert_eq!(
        doc.get_formula_text(CellAddr::new(1, 0, 1)).unwrap().as_deref(),
        Some("=A1*2")
    );
    doc.set_value(CellAddr::new(1, 0, 0), 7.0).unwrap();
    doc.recalc();
    assert_eq!(
        doc.get_value(CellAddr::new(1, 0, 1)).unwrap(),
        CellValue::Number(14.0)
    );
    assert_eq!(doc.get_value(at(0, 1)).unwrap(), CellValue::Number(8.0));
}

#[test]
fn move_carries_data_and_the_references_to_it() {
    let mut doc = one_sheet(small_config());
    doc.set_value(at(0, 0), 3.0).unwrap();
    doc.set_formula_text(at(0, 1), "=A1*2").unwrap();
    doc.set_formula_text(at(1, 0), "=A2+1").unwrap();
    doc.recalc();

    doc.move_range(RangeAddr::new(0, 0, 0, 0, 1), at(4, 9)).unwrap();
    assert!(doc.get_value(at(0, 0)).unwrap().is_empty());
    assert!(doc.get_value(at(0, 1)).unwrap().is_empty());
    assert_eq!(
        doc.get_formula_text(at(4, 10)).unwrap().as_deref(),
        Some("=E10*2")
    );
    assert_eq!(
        doc.get_formula_text(at(1, 0)).unwrap().as_deref(),
        Some("=E11+1")
    );

    doc.set_value(at(4, 9), 5.0).unwrap();
    doc.recalc();
    assert_eq!(doc.get_value(at(1, 0)).unwrap(), CellValue::Number(11.0));
}

#[test]
fn clear_selection_clears_every_marked_range() {
    let mut doc = one_sheet(small_config());
    for row in 0..6 {
        doc.set_value(at(0, row), 1.0).unwrap();
        doc.set_value(at(1, row), 1.0).unwrap();
    }
    doc.set_formula_text(at(2, 0), "=SUM(A1:B6)").unwrap();
    doc.recalc();

    let mut mark = MarkData::from_range(RangeAddr::new(0, 0, 0, 0, 2));
    mark.add(RangeAddr::new(0, 0, 1, 1, 1));
    assert_eq!(doc.clear_selection(&mark).unwrap(), 4);
    doc.recalc();
    assert_eq!(doc.get_value(at(2, 0)).unwrap(), CellValue::Number(8.0));
}

#[test]
fn deleting_a_sheet_invalidates_references_to_it() {
    let mut doc = one_sheet(small_config());
    doc.append_sheet("Data").unwrap();
    doc.set_value(CellAddr::new(1, 0, 0), 2.0).unwrap();
    doc.set_formula_text(at(0, 0), "=Data!A1*2").unwrap();
    doc.recalc();
    assert_eq!(doc.get_value(at(0, 0)).unwrap(), CellValue::Number(4.0));

    doc.delete_sheet(1).unwrap();
    assert_eq!(doc.sheet_count(), 1);
    assert!(doc.get_formula_text(at(0, 0)).unwrap().is_some());
    assert_eq!(doc.dirty_count(), 1);
    doc.recalc();
    assert_eq!(
        doc.get_value(at(0, 0)).unwrap(),
        CellValue::Error(gridcalc_common::ErrorKind::Ref)
    );
}

#[test]
fn sparklines_travel_with_copied_and_moved_cells() {
    let mut doc = one_sheet(small_config());
    let spark = Sparkline {
        data: RangeAddr::new(0, 1, 0, 4, 0),
        group: 3,
    };
    doc.set_value(at(0, 0), 1.0).unwrap();
    doc.set_sparkline(at(0, 0), Some(spark.clone())).unwrap();

    doc.copy_range(RangeAddr::single(at(0, 0)), at(2, 2)).unwrap();
    assert_eq!(doc.get_sparkline(at(0, 0)).unwrap(), Some(&spark));
    assert_eq!(doc.get_sparkline(at(2, 2)).unwrap(), Some(&spark));

    doc.move_range(RangeAddr::single(at(0, 0)), at(5, 5)).unwrap();
    assert_eq!(doc.get_sparkline(at(0, 0)).unwrap(), None);
    assert_eq!(doc.get_sparkline(at(5, 5)).unwrap(), Some(&spark));
    assert_eq!(doc.get_value(at(5, 5)).unwrap(), CellValue::Number(1.0));
}

#[test]
fn inserted_and_moved_sheets_keep_cross_sheet_dependencies() {
    let mut doc = one_sheet(small_config());
    doc.append_sheet("Data").unwrap();
    doc.set_formula_text(at(0, 0), "=Data!B2*2").unwrap();
    doc.set_formula_text(CellAddr::new(1, 0, 0), "=B2+1").unwrap();
    doc.recalc();

    doc.insert_sheet(0, "Front").unwrap();
    assert_eq!(doc.sheet_names(), ["Front", "Sheet1", "Data"]);
    assert_eq!(
        doc.get_formula_text(CellAddr::new(1, 0, 0)).unwrap().as_deref(),
        Some("=Data!B2*2")
    );
    doc.recalc();
    doc.set_value(CellAddr::new(2, 1, 1), 5.0).unwrap();
    assert_eq!(doc.dirty_count(), 2);
    doc.recalc();
    assert_eq!(
        doc.get_value(CellAddr::new(1, 0, 0)).unwrap(),
        CellValue::Number(10.0)
    );
    assert_eq!(
        doc.get_value(CellAddr::new(2, 0, 0)).unwrap(),
        CellValue::Number(6.0)
    );

    doc.move_sheet(2, 0).unwrap();
    assert_eq!(doc.sheet_names(), ["Data", "Front", "Sheet1"]);
    doc.recalc();
    doc.set_value(CellAddr::new(0, 1, 1), 7.0).unwrap();
    assert_eq!(doc.dirty_count(), 2);
    doc.recalc();
    assert_eq!(
        doc.get_value(CellAddr::new(2, 0, 0)).unwrap(),
        CellValue::Number(14.0)
    );
    assert_eq!(
        doc.get_value(CellAddr::new(0, 0, 0)).unwrap(),
        CellValue::Number(8.0)
    );
}

#[test]
fn deleting_a_sheet_drops_its_formulas_and_listeners() {
    let mut doc = one_sheet(small_config());
    doc.append_sheet("Data").unwrap();
    doc.set_value(at(0, 0), 4.0).unwrap();
    doc.set_formula_text(CellAddr::new(1, 0, 0), "=Sheet1!A1*2").unwrap();
    doc.set_formula_text(at(1, 0), "=Data!A1+1").unwrap();
    doc.recalc();
    assert_eq!(doc.get_value(at(1, 0)).unwrap(), CellValue::Number(9.0));
    let listener = doc
        .register_external_listener(RangeAddr::new(1, 0, 0, 2, 2))
        .unwrap();

    doc.delete_sheet(1).unwrap();
    assert_eq!(doc.formulas().len(), 1);
    assert_eq!(doc.dependency_graph().broadcaster_count(), 0);
    assert!(!doc.unregister_external_listener(listener));

    doc.recalc();
    doc.set_value(at(0, 0), 5.0).unwrap();
    assert_eq!(doc.dirty_count(), 0);
    assert_eq!(
        doc.get_value(at(1, 0)).unwrap(),
        CellValue::Error(gridcalc_common::ErrorKind::Ref)
    );
}
