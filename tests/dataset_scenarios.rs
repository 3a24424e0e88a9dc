//! End-to-end dataset scenarios: typed columns, level tables, filters
//! and the type-change state machine, exercised through the public API.

use tabula::{
    read_data_frame, ColumnType, ColumnValues, DataSet, DataSetW, DataType, MeasureType,
    ReadOptions, StoreError, MISSING_INT,
};

fn create(dir: &tempfile::TempDir, name: &str) -> DataSetW {
    DataSetW::create(dir.path().join(name)).unwrap()
}

#[test]
fn test_integer_column_with_missing_cell() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "age.tab");

    ds.append_column("age", None).unwrap();
    ds.append_rows(3).unwrap();
    {
        let mut age = ds.column_mut_by_name("age").unwrap();
        age.set_i_value(0, 25).unwrap();
        age.set_i_value(1, MISSING_INT).unwrap();
        age.set_i_value(2, 40).unwrap();
    }

    assert_eq!(ds.row_count(), 3);
    let age = ds.column_by_name("age").unwrap();
    assert_eq!(age.ivalue(1).unwrap(), MISSING_INT);
    // Missing never becomes a level.
    assert_eq!(age.level_count(), 2);
    assert!(age.has_level_value(25));
    assert!(age.has_level_value(40));
}

#[test]
fn test_text_level_removal_renumbers_codes() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "color.tab");

    ds.append_column("color", None).unwrap();
    ds.append_rows(3).unwrap();
    {
        let mut color = ds.column_mut(0).unwrap();
        color
            .change_dm_type(Some(DataType::Text), Some(MeasureType::Nominal))
            .unwrap();
        color.set_s_value(1, Some("blue")).unwrap();
        color.set_s_value(0, Some("red")).unwrap();
        color.set_s_value(2, Some("red")).unwrap();
        // Keep "blue"'s level alive after its cell goes away.
        color.set_trim_levels(false);
    }

    let color = ds.column(0).unwrap();
    assert_eq!(color.level_count(), 2);
    let red_code = color.ivalue(0).unwrap();
    assert_eq!(color.get_label(red_code).unwrap(), "red");

    let blue_code = color.value_for_label("blue").unwrap();
    {
        let mut color = ds.column_mut(0).unwrap();
        color.set_s_value(1, None).unwrap();
        color.remove_level(blue_code);
    }

    let color = ds.column(0).unwrap();
    assert_eq!(color.level_count(), 1);
    let new_red_code = color.ivalue(0).unwrap();
    if blue_code < red_code {
        assert_eq!(new_red_code, red_code - 1);
    } else {
        assert_eq!(new_red_code, red_code);
    }
    assert_eq!(color.get_label(new_red_code).unwrap(), "red");
    assert_eq!(color.ivalue(2).unwrap(), new_red_code);
}

#[test]
fn test_filter_column_hides_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "filter.tab");

    {
        let mut keep = ds.append_column("keep", None).unwrap();
        keep.set_column_type(ColumnType::Filter);
    }
    ds.append_column("data", None).unwrap();
    ds.append_rows(3).unwrap();
    for (row, v) in [(0, 1), (1, 0), (2, 1)] {
        ds.column_mut(0).unwrap().set_i_value(row, v).unwrap();
    }
    for (row, v) in [(0, 10), (1, 20), (2, 30)] {
        ds.column_mut(1).unwrap().set_i_value(row, v).unwrap();
    }
    ds.refresh_filter_state().unwrap();
    ds.flush().unwrap();

    assert!(ds.is_row_filtered(1).unwrap());
    assert!(!ds.is_row_filtered(0).unwrap());
    assert_eq!(ds.row_count_ex_filtered(), 2);
    assert_eq!(ds.index_ex_filtered(0).unwrap(), Some(0));
    assert_eq!(ds.index_ex_filtered(1).unwrap(), Some(2));
    assert_eq!(ds.index_ex_filtered(2).unwrap(), None);

    let reader = DataSet::attach(ds.region().path()).unwrap();
    assert_eq!(reader.row_count_ex_filtered(), 2);
    let options = ReadOptions {
        columns: Some(vec!["data".to_string()]),
        ..Default::default()
    };
    let frame = read_data_frame(&reader, &options).unwrap();
    assert_eq!(frame.row_count, 2);
    match &frame.columns[0].values {
        ColumnValues::Factor(f) => {
            let labels: Vec<&str> = f
                .codes
                .iter()
                .map(|c| f.labels[c.unwrap()].as_str())
                .collect();
            assert_eq!(labels, vec!["10", "30"]);
        }
        other => panic!("expected factor values, got {:?}", other),
    }
}

#[test]
fn test_inactive_filters_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "inactive.tab");

    {
        let mut keep = ds.append_column("keep", None).unwrap();
        keep.set_column_type(ColumnType::Filter);
    }
    ds.append_rows(2).unwrap();
    ds.column_mut(0).unwrap().set_i_value(0, 0).unwrap();
    ds.column_mut(0).unwrap().set_i_value(1, 0).unwrap();
    ds.refresh_filter_state().unwrap();
    assert_eq!(ds.row_count_ex_filtered(), 0);

    ds.column_mut(0).unwrap().set_active(false);
    ds.refresh_filter_state().unwrap();
    assert_eq!(ds.row_count_ex_filtered(), 2);
}

#[test]
fn test_refresh_filter_state_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "idem.tab");

    {
        let mut keep = ds.append_column("keep", None).unwrap();
        keep.set_column_type(ColumnType::Filter);
    }
    ds.append_column("data", None).unwrap();
    ds.append_rows(5).unwrap();
    for (row, v) in [(0, 1), (1, 0), (2, 1), (3, 0), (4, 1)] {
        ds.column_mut(0).unwrap().set_i_value(row, v).unwrap();
    }

    ds.refresh_filter_state().unwrap();
    let count = ds.row_count_ex_filtered();
    let indices: Vec<_> = (0..5).map(|p| ds.index_ex_filtered(p).unwrap()).collect();

    ds.refresh_filter_state().unwrap();
    assert_eq!(ds.row_count_ex_filtered(), count);
    let again: Vec<_> = (0..5).map(|p| ds.index_ex_filtered(p).unwrap()).collect();
    assert_eq!(indices, again);
}

#[test]
fn test_level_counts_match_cells() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "counts.tab");

    {
        let mut keep = ds.append_column("keep", None).unwrap();
        keep.set_column_type(ColumnType::Filter);
    }
    ds.append_column("grp", None).unwrap();
    ds.append_rows(6).unwrap();
    for (row, v) in [(0, 1), (1, 1), (2, 0), (3, 1), (4, 0), (5, 1)] {
        ds.column_mut(0).unwrap().set_i_value(row, v).unwrap();
    }
    for (row, v) in [(0, 7), (1, 7), (2, 7), (3, 9), (4, 9), (5, MISSING_INT)] {
        ds.column_mut(1).unwrap().set_i_value(row, v).unwrap();
    }
    ds.refresh_filter_state().unwrap();
    ds.column_mut(1).unwrap().update_level_counts().unwrap();

    let grp = ds.column(1).unwrap();
    let levels = grp.levels();
    let seven = levels.iter().find(|l| l.value == 7).unwrap();
    let nine = levels.iter().find(|l| l.value == 9).unwrap();
    assert_eq!(seven.count, 3);
    assert_eq!(seven.count_ex_filtered, 2);
    assert_eq!(nine.count, 2);
    assert_eq!(nine.count_ex_filtered, 1);
}

#[test]
fn test_type_change_round_trip_restores_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "roundtrip.tab");

    ds.append_column("n", None).unwrap();
    ds.append_rows(4).unwrap();
    {
        let mut n = ds.column_mut(0).unwrap();
        n.set_trim_levels(false);
        n.set_i_value(0, 3).unwrap();
        n.set_i_value(1, MISSING_INT).unwrap();
        n.set_i_value(2, 17).unwrap();
        n.set_i_value(3, 3).unwrap();
    }

    ds.column_mut(0)
        .unwrap()
        .change_dm_type(Some(DataType::Text), None)
        .unwrap();
    {
        let n = ds.column(0).unwrap();
        assert_eq!(n.data_type(), DataType::Text);
        assert_eq!(n.svalue(0).unwrap().as_deref(), Some("3"));
        assert_eq!(n.svalue(1).unwrap(), None);
        assert_eq!(n.svalue(2).unwrap().as_deref(), Some("17"));
    }
    assert_eq!(ds.scratch_column_id(), Some(0));

    // Changing straight back swaps the original storage in wholesale.
    ds.column_mut(0)
        .unwrap()
        .change_dm_type(Some(DataType::Integer), Some(MeasureType::Nominal))
        .unwrap();
    let n = ds.column(0).unwrap();
    assert_eq!(n.data_type(), DataType::Integer);
    assert_eq!(n.ivalue(0).unwrap(), 3);
    assert_eq!(n.ivalue(1).unwrap(), MISSING_INT);
    assert_eq!(n.ivalue(2).unwrap(), 17);
    assert_eq!(n.ivalue(3).unwrap(), 3);
}

#[test]
fn test_discard_scratch_prevents_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "discard.tab");

    ds.append_column("n", None).unwrap();
    ds.append_rows(2).unwrap();
    ds.column_mut(0).unwrap().set_i_value(0, 5).unwrap();

    ds.column_mut(0)
        .unwrap()
        .change_dm_type(Some(DataType::Text), None)
        .unwrap();
    ds.discard_scratch_column();
    assert_eq!(ds.scratch_column_id(), None);

    // With the scratch invalidated the change back converts from the
    // text representation instead of swapping; values still survive.
    ds.column_mut(0)
        .unwrap()
        .change_dm_type(Some(DataType::Integer), Some(MeasureType::Nominal))
        .unwrap();
    assert_eq!(ds.column(0).unwrap().ivalue(0).unwrap(), 5);
}

#[test]
fn test_integer_to_decimal_and_back_to_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "chain.tab");

    ds.append_column("x", None).unwrap();
    ds.append_rows(3).unwrap();
    {
        let mut x = ds.column_mut(0).unwrap();
        x.set_i_value(0, 2).unwrap();
        x.set_i_value(1, 5).unwrap();
    }

    ds.column_mut(0)
        .unwrap()
        .change_dm_type(Some(DataType::Decimal), None)
        .unwrap();
    {
        let x = ds.column(0).unwrap();
        assert_eq!(x.measure_type(), MeasureType::Continuous);
        assert_eq!(x.dvalue(0).unwrap(), 2.0);
        assert!(x.dvalue(2).unwrap().is_nan());
    }

    ds.column_mut(0)
        .unwrap()
        .change_dm_type(Some(DataType::Text), Some(MeasureType::Nominal))
        .unwrap();
    let x = ds.column(0).unwrap();
    assert_eq!(x.svalue(0).unwrap().as_deref(), Some("2"));
    assert_eq!(x.svalue(1).unwrap().as_deref(), Some("5"));
    assert_eq!(x.svalue(2).unwrap(), None);
}

#[test]
fn test_set_levels_recodes_text_cells() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "recode.tab");

    ds.append_column("answer", None).unwrap();
    ds.append_rows(3).unwrap();
    {
        let mut col = ds.column_mut(0).unwrap();
        col.change_dm_type(Some(DataType::Text), Some(MeasureType::Nominal))
            .unwrap();
        col.set_s_value(0, Some("yes")).unwrap();
        col.set_s_value(1, Some("no")).unwrap();
        col.set_s_value(2, Some("yes")).unwrap();
    }

    // Reorder and drop "no"; its cells become missing.
    let mut target = ds.column(0).unwrap().levels();
    target.retain(|l| l.label == "yes");
    ds.column_mut(0).unwrap().set_levels(&target).unwrap();

    let col = ds.column(0).unwrap();
    assert_eq!(col.level_count(), 1);
    assert_eq!(col.svalue(0).unwrap().as_deref(), Some("yes"));
    assert_eq!(col.svalue(1).unwrap(), None);
    assert_eq!(col.ivalue(0).unwrap(), 0);
}

#[test]
fn test_missing_value_rules() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "rules.tab");

    ds.append_column("score", None).unwrap();
    ds.append_rows(3).unwrap();
    {
        let mut col = ds.column_mut(0).unwrap();
        col.set_i_value(0, -99).unwrap();
        col.set_i_value(1, 42).unwrap();
        col.set_missing_values(&[tabula::MissingValue::Int {
            op: tabula::MissingValueOp::Eq,
            value: -99,
        }])
        .unwrap();
    }

    let col = ds.column(0).unwrap();
    assert!(col.should_treat_as_missing(0).unwrap());
    assert!(!col.should_treat_as_missing(1).unwrap());
    // Sentinel cells are already missing, rules do not apply.
    assert!(!col.should_treat_as_missing(2).unwrap());
}

#[test]
fn test_lookup_failures_are_typed() {
    let dir = tempfile::tempdir().unwrap();
    let mut ds = create(&dir, "errors.tab");
    ds.append_column("a", None).unwrap();

    assert!(matches!(
        ds.column_by_name("missing"),
        Err(StoreError::ColumnNotFound(_))
    ));
    assert!(matches!(
        ds.column(0).unwrap().value_for_label("nope"),
        Err(StoreError::LevelNotFound(_))
    ));
    assert!(matches!(
        ds.column(0).unwrap().ivalue(0),
        Err(StoreError::IndexOutOfBounds { .. })
    ));
}
