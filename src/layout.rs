//! On-disk structures and format constants.
//!
//! Everything here is `#[repr(C)]` and read/written by value through
//! [`crate::region::Region`]. Field order is part of the file format.

use crate::region::{Offset, Pod, Str};

/// Size of one cell block, header included.
pub(crate) const BLOCK_SIZE: usize = 32 * 1024;

/// Size of the block header (`BlockStruct`).
pub(crate) const BLOCK_HEADER_SIZE: usize = 16;

/// Bytes of packed cell payload per block.
pub(crate) const VALUES_SPACE: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE;

/// Maximum number of columns a dataset can hold. Fixed at creation.
pub(crate) const COLUMN_CAPACITY: u32 = 65_536;

/// Initial capacity of a column's level table.
pub(crate) const INITIAL_LEVEL_CAPACITY: u32 = 50;

/// Initial capacity of a column's block list.
pub(crate) const INITIAL_BLOCK_LIST_CAPACITY: u32 = 1024;

/// Missing sentinel for integer cells (and level codes).
pub const MISSING_INT: i32 = i32::MIN;

/// Dataset root structure, always at [`crate::region::ROOT_OFFSET`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct DataSetStruct {
    pub row_count: u32,
    pub column_count: u32,
    /// Capacity of the `columns` offset array. Fixed at creation.
    pub capacity: u32,
    /// Next column id to hand out. Ids are never reused.
    pub next_column_id: i32,
    /// Rows surviving the filter columns, as of the last refresh.
    pub row_count_ex_filtered: u32,
    /// Id of the weights column, -1 when none.
    pub weights: i32,
    /// Id of the column whose previous representation sits in
    /// `scratch`, -1 when the scratch content is discarded.
    pub scratch_id: i32,
    pub _pad: u32,
    pub scratch: Offset<ColumnStruct>,
    /// Internal Int32 column mapping post-filter position to row
    /// number. Not part of the visible column array.
    pub indices: Offset<ColumnStruct>,
    pub columns: Offset<Offset<ColumnStruct>>,
}

unsafe impl Pod for DataSetStruct {}

/// Per-column structure. Referenced from the dataset's column array
/// (and from the scratch slot during a type change).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnStruct {
    pub id: i32,
    pub column_type: u8,
    pub data_type: u8,
    pub measure_type: u8,
    pub auto_measure: u8,
    pub active: u8,
    pub trim_levels: u8,
    /// Decimal places used when rendering DECIMAL values as text.
    pub dps: u8,
    pub _pad0: u8,
    /// Bumped by every mutation, so clients can cheaply detect change.
    pub changes: u32,
    pub row_count: u32,
    pub blocks_used: u32,
    pub block_capacity: u32,
    pub levels_used: u32,
    pub levels_capacity: u32,
    pub missing_used: u32,
    pub missing_capacity: u32,
    /// Byte capacity of the formula string buffer, for in-place reuse.
    pub formula_capacity: u32,
    pub formula_message_capacity: u32,
    pub _pad1: u32,
    pub name: Str,
    pub import_name: Str,
    pub description: Str,
    pub blocks: Offset<Offset<BlockStruct>>,
    pub levels: Offset<LevelStruct>,
    pub missing_values: Offset<MissingValueStruct>,
    pub formula: Str,
    pub formula_message: Str,
}

unsafe impl Pod for ColumnStruct {}

impl ColumnStruct {
    /// A zeroed column with null references. Callers fill in identity
    /// and storage before publishing it.
    pub(crate) fn blank() -> ColumnStruct {
        ColumnStruct {
            id: 0,
            column_type: 0,
            data_type: 0,
            measure_type: 0,
            auto_measure: 0,
            active: 0,
            trim_levels: 0,
            dps: 0,
            _pad0: 0,
            changes: 0,
            row_count: 0,
            blocks_used: 0,
            block_capacity: 0,
            levels_used: 0,
            levels_capacity: 0,
            missing_used: 0,
            missing_capacity: 0,
            formula_capacity: 0,
            formula_message_capacity: 0,
            _pad1: 0,
            name: Str::NULL,
            import_name: Str::NULL,
            description: Str::NULL,
            blocks: Offset::NULL,
            levels: Offset::NULL,
            missing_values: Offset::NULL,
            formula: Str::NULL,
            formula_message: Str::NULL,
        }
    }
}

/// Block header. The cell payload starts `BLOCK_HEADER_SIZE` bytes
/// after the block's offset.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockStruct {
    /// Row index of the first cell stored in this block.
    pub start: i32,
    /// Cells currently in use.
    pub length: i32,
    /// Cells this block can hold for the column's cell width.
    pub capacity: i32,
    pub _pad: i32,
}

unsafe impl Pod for BlockStruct {}

/// One level (category) entry in a column's level table.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct LevelStruct {
    pub value: i32,
    pub count: u32,
    pub count_ex_filtered: u32,
    pub treat_as_missing: u8,
    pub _pad: [u8; 3],
    pub label: Str,
    pub import_value: Str,
}

unsafe impl Pod for LevelStruct {}

pub(crate) const MISSING_KIND_INT: u8 = 1;
pub(crate) const MISSING_KIND_DOUBLE: u8 = 2;
pub(crate) const MISSING_KIND_STRING: u8 = 3;

/// One user-defined missing-value rule.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct MissingValueStruct {
    pub kind: u8,
    pub op: u8,
    pub _pad: [u8; 2],
    pub ivalue: i32,
    pub dvalue: f64,
    pub svalue: Str,
}

unsafe impl Pod for MissingValueStruct {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn test_struct_sizes_are_stable() {
        // These sizes are part of the file format.
        assert_eq!(size_of::<DataSetStruct>(), 56);
        assert_eq!(size_of::<ColumnStruct>(), 120);
        assert_eq!(size_of::<BlockStruct>(), BLOCK_HEADER_SIZE);
        assert_eq!(size_of::<LevelStruct>(), 32);
        assert_eq!(size_of::<MissingValueStruct>(), 24);
    }

    #[test]
    fn test_alignment_fits_allocator() {
        // The bump allocator hands out 8-byte aligned spans.
        assert!(align_of::<DataSetStruct>() <= 8);
        assert!(align_of::<ColumnStruct>() <= 8);
        assert!(align_of::<LevelStruct>() <= 8);
        assert!(align_of::<MissingValueStruct>() <= 8);
    }

    #[test]
    fn test_values_space() {
        assert_eq!(VALUES_SPACE, 32_752);
        assert_eq!(VALUES_SPACE % 8, 0);
    }
}
