//! Memory-mapped columnar dataset store.
//!
//! `tabula` keeps a statistical dataset (typed columns, categorical
//! level tables, missing-value rules, filter columns) in a single
//! file-backed memory region. Every internal reference is a relative
//! offset, so any number of reader processes can attach the same file
//! concurrently without copying or deserialization, while one writer
//! process mutates it in place.
//!
//! ```no_run
//! use tabula::{DataSet, DataSetW};
//!
//! # fn main() -> tabula::Result<()> {
//! let mut ds = DataSetW::create("session/buffer")?;
//! ds.append_column("age", None)?;
//! ds.append_rows(3)?;
//! ds.column_mut(0)?.set_i_value(0, 25)?;
//! ds.flush()?;
//!
//! // A separate process attaches read-only.
//! let reader = DataSet::attach("session/buffer")?;
//! assert_eq!(reader.column_by_name("age")?.ivalue(0)?, 25);
//! # Ok(())
//! # }
//! ```

mod cells;
mod column;
mod dataframe;
mod dataset;
mod error;
mod layout;
mod levels;
mod region;

pub use column::{Column, ColumnType, ColumnW, DataType, MeasureType};
pub use dataframe::{
    read_data_frame, ColumnValues, DataFrame, DataFrameColumn, FactorValues, ReadOptions,
};
pub use dataset::{DataSet, DataSetW, DEFAULT_DATASET_SIZE};
pub use error::{Result, StoreError};
pub use layout::MISSING_INT;
pub use levels::{LevelData, MissingValue, MissingValueOp};
pub use region::{
    Offset, Pod, Region, Str, DEFAULT_GROWTH_PERCENT, MAGIC, ROOT_OFFSET, VERSION_MAJOR,
    VERSION_MINOR,
};
