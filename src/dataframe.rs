//! Dataframe materialization for the analysis boundary.
//!
//! Builds a table-like value from a read-only dataset: one sequence
//! per column, restricted to the rows surviving the active filters.
//! This is the shape the statistical runtime consumes; it involves no
//! write traffic back to the store.

use crate::column::{Column, DataType, MeasureType};
use crate::dataset::DataSet;
use crate::error::Result;
use crate::layout::MISSING_INT;
use crate::levels::LevelData;

/// What to materialize.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Column names to include; `None` means all columns. Names with
    /// no matching column are silently skipped.
    pub columns: Option<Vec<String>>,
    /// Materialize column structure and level tables only, no cells.
    pub header_only: bool,
    /// Report which levels are flagged treat-as-missing, for callers
    /// that decode missing values themselves.
    pub with_missings: bool,
}

/// A categorical column: cell codes indexing into a level table.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorValues {
    /// Per surviving row, an index into `labels`; `None` for missing
    /// or unmapped cells.
    pub codes: Vec<Option<usize>>,
    pub labels: Vec<String>,
    /// Underlying cell values parallel to `labels`. For TEXT columns
    /// these are the dense positions themselves.
    pub values: Vec<i32>,
    pub ordered: bool,
    /// Set when trimming is off and some level has no occurrence among
    /// the surviving rows.
    pub has_unused_levels: bool,
    /// Labels flagged treat-as-missing; populated only when
    /// [`ReadOptions::with_missings`] was set.
    pub missing_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Doubles(Vec<Option<f64>>),
    Ints(Vec<Option<i32>>),
    Strings(Vec<Option<String>>),
    Factor(FactorValues),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrameColumn {
    pub name: String,
    pub values: ColumnValues,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub columns: Vec<DataFrameColumn>,
    /// 1-based row numbers of the surviving rows, as display strings.
    pub row_labels: Vec<String>,
    pub row_count: usize,
}

/// Materialize the filtered dataset.
pub fn read_data_frame(dataset: &DataSet, options: &ReadOptions) -> Result<DataFrame> {
    let row_count = if options.header_only {
        0
    } else {
        dataset.row_count()
    };

    let mut surviving = Vec::new();
    for row in 0..row_count {
        if !dataset.is_row_filtered(row)? {
            surviving.push(row);
        }
    }
    let row_labels = surviving.iter().map(|r| (r + 1).to_string()).collect();

    let mut columns = Vec::new();
    for i in 0..dataset.column_count() {
        let column = dataset.column(i)?;
        let name = column.name();
        if let Some(required) = &options.columns {
            if !required.iter().any(|r| r == &name) {
                continue;
            }
        }
        let values = materialize_column(&column, &surviving, options)?;
        columns.push(DataFrameColumn { name, values });
    }

    Ok(DataFrame {
        columns,
        row_labels,
        row_count: surviving.len(),
    })
}

fn materialize_column(
    column: &Column<'_>,
    surviving: &[usize],
    options: &ReadOptions,
) -> Result<ColumnValues> {
    if column.data_type() == DataType::Decimal {
        let mut v = Vec::with_capacity(surviving.len());
        for &row in surviving {
            let d = column.dvalue(row)?;
            v.push(if d.is_nan() { None } else { Some(d) });
        }
        return Ok(ColumnValues::Doubles(v));
    }

    if column.data_type() == DataType::Text && column.measure_type() == MeasureType::Id {
        let mut v = Vec::with_capacity(surviving.len());
        for &row in surviving {
            v.push(column.svalue(row)?);
        }
        return Ok(ColumnValues::Strings(v));
    }

    // Continuous and integer ID columns carry no level table; their
    // cells are plain integers.
    if column.measure_type() == MeasureType::Continuous
        || column.measure_type() == MeasureType::Id
    {
        let mut v = Vec::with_capacity(surviving.len());
        for &row in surviving {
            let i = column.ivalue(row)?;
            v.push(if i == MISSING_INT { None } else { Some(i) });
        }
        return Ok(ColumnValues::Ints(v));
    }

    // Categorical: codes into a level table. With trimming on, only
    // the levels in use among surviving rows are exposed.
    let levels: Vec<LevelData> = if column.trim_levels() {
        column.levels_ex_filtered()
    } else {
        column.levels()
    };

    let mut labels = Vec::with_capacity(levels.len());
    let mut values = Vec::with_capacity(levels.len());
    let mut missing_labels = Vec::new();
    for (j, level) in levels.iter().enumerate() {
        // TEXT codes are dense positions; INTEGER levels keep their
        // user-visible value.
        let value = if column.data_type() == DataType::Text {
            j as i32
        } else {
            level.value
        };
        labels.push(level.label.clone());
        values.push(value);
        if options.with_missings && level.treat_as_missing {
            missing_labels.push(level.label.clone());
        }
    }

    let index_of = |cell: i32| -> Option<usize> { values.iter().position(|&v| v == cell) };

    let mut codes = Vec::with_capacity(surviving.len());
    for &row in surviving {
        let cell = column.ivalue(row)?;
        codes.push(if cell == MISSING_INT {
            None
        } else {
            index_of(cell)
        });
    }

    Ok(ColumnValues::Factor(FactorValues {
        codes,
        labels,
        values,
        ordered: column.measure_type() == MeasureType::Ordinal,
        has_unused_levels: !column.trim_levels() && column.has_unused_levels(),
        missing_labels,
    }))
}
