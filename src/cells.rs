//! Typed cell storage over fixed-size blocks.
//!
//! Cells live in 32 KiB blocks tracked by a per-column block list.
//! Within a column all cells share one physical representation, so a
//! cell's block and in-block position follow from its row number
//! alone: `block = row * width / VALUES_SPACE`. Blocks are allocated
//! on demand and their payload is filled with the representation's
//! missing sentinel, so any cell exposed by growth reads as missing.

use crate::error::Result;
use crate::layout::{
    BlockStruct, ColumnStruct, BLOCK_HEADER_SIZE, BLOCK_SIZE, INITIAL_BLOCK_LIST_CAPACITY,
    MISSING_INT, VALUES_SPACE,
};
use crate::region::{Offset, Region};

/// Physical cell representation of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellRepr {
    /// INTEGER data, and TEXT with a non-ID measure (level codes).
    Int32,
    /// DECIMAL data.
    Float64,
    /// TEXT with ID measure: offset of a length-prefixed string,
    /// zero for missing.
    StrHandle,
}

impl CellRepr {
    pub(crate) fn width(self) -> usize {
        match self {
            CellRepr::Int32 => 4,
            CellRepr::Float64 => 8,
            CellRepr::StrHandle => 8,
        }
    }

    pub(crate) fn cells_per_block(self) -> usize {
        VALUES_SPACE / self.width()
    }
}

fn write_sentinel(region: &mut Region, repr: CellRepr, addr: u64) {
    match repr {
        CellRepr::Int32 => region.write_at::<i32>(addr, MISSING_INT),
        CellRepr::Float64 => region.write_at::<f64>(addr, f64::NAN),
        CellRepr::StrHandle => region.write_at::<u64>(addr, 0),
    }
}

/// Byte address of a cell. The row must be within the column's
/// allocated blocks.
pub(crate) fn cell_addr(
    region: &Region,
    col: Offset<ColumnStruct>,
    repr: CellRepr,
    row: usize,
) -> u64 {
    let st: ColumnStruct = region.read(col);
    let width = repr.width();
    let block_index = row * width / VALUES_SPACE;
    debug_assert!(block_index < st.blocks_used as usize);
    let block: Offset<BlockStruct> = region.read(st.blocks.at(block_index));
    let index = row % repr.cells_per_block();
    block.to_u64() + BLOCK_HEADER_SIZE as u64 + (index * width) as u64
}

pub(crate) fn get_i32(region: &Region, col: Offset<ColumnStruct>, row: usize) -> i32 {
    region.read_at(cell_addr(region, col, CellRepr::Int32, row))
}

pub(crate) fn get_f64(region: &Region, col: Offset<ColumnStruct>, row: usize) -> f64 {
    region.read_at(cell_addr(region, col, CellRepr::Float64, row))
}

pub(crate) fn get_handle(region: &Region, col: Offset<ColumnStruct>, row: usize) -> u64 {
    region.read_at(cell_addr(region, col, CellRepr::StrHandle, row))
}

pub(crate) fn set_i32(region: &mut Region, col: Offset<ColumnStruct>, row: usize, value: i32) {
    let addr = cell_addr(region, col, CellRepr::Int32, row);
    region.write_at(addr, value);
}

pub(crate) fn set_f64(region: &mut Region, col: Offset<ColumnStruct>, row: usize, value: f64) {
    let addr = cell_addr(region, col, CellRepr::Float64, row);
    region.write_at(addr, value);
}

pub(crate) fn set_handle(region: &mut Region, col: Offset<ColumnStruct>, row: usize, value: u64) {
    let addr = cell_addr(region, col, CellRepr::StrHandle, row);
    region.write_at(addr, value);
}

/// Copy one cell to another row of the same column.
pub(crate) fn copy_cell(
    region: &mut Region,
    col: Offset<ColumnStruct>,
    repr: CellRepr,
    from: usize,
    to: usize,
) {
    match repr {
        CellRepr::Int32 => {
            let v = get_i32(region, col, from);
            set_i32(region, col, to, v);
        }
        CellRepr::Float64 => {
            let v = get_f64(region, col, from);
            set_f64(region, col, to, v);
        }
        CellRepr::StrHandle => {
            let v = get_handle(region, col, from);
            set_handle(region, col, to, v);
        }
    }
}

/// Write the missing sentinel into one cell.
pub(crate) fn clear_cell(
    region: &mut Region,
    col: Offset<ColumnStruct>,
    repr: CellRepr,
    row: usize,
) {
    let addr = cell_addr(region, col, repr, row);
    write_sentinel(region, repr, addr);
}

/// Give the column a fresh, empty block list. Any previous blocks stay
/// allocated in the region (the bump allocator never frees).
pub(crate) fn reset_storage(region: &mut Region, col: Offset<ColumnStruct>) -> Result<()> {
    let blocks = region.allocate::<Offset<BlockStruct>>(INITIAL_BLOCK_LIST_CAPACITY as usize)?;
    let mut st: ColumnStruct = region.read(col);
    st.blocks = blocks;
    st.block_capacity = INITIAL_BLOCK_LIST_CAPACITY;
    st.blocks_used = 0;
    st.row_count = 0;
    region.write(col, st);
    Ok(())
}

/// Resize the column's cell storage to `new_count` rows, allocating
/// and sentinel-filling blocks as needed. Cells in the grown range
/// read as missing afterwards; cells below the old count are
/// untouched.
pub(crate) fn set_row_count(
    region: &mut Region,
    col: Offset<ColumnStruct>,
    repr: CellRepr,
    new_count: usize,
) -> Result<()> {
    let cpb = repr.cells_per_block();
    let blocks_needed = new_count.div_ceil(cpb);

    let mut st: ColumnStruct = region.read(col);
    while (st.blocks_used as usize) < blocks_needed {
        if st.blocks_used == st.block_capacity {
            let new_cap = (st.block_capacity * 2).max(INITIAL_BLOCK_LIST_CAPACITY);
            let new_list = region.allocate::<Offset<BlockStruct>>(new_cap as usize)?;
            for i in 0..st.blocks_used as usize {
                let b: Offset<BlockStruct> = region.read(st.blocks.at(i));
                region.write(new_list.at(i), b);
            }
            st.blocks = new_list;
            st.block_capacity = new_cap;
        }
        let addr = region.allocate_bytes(BLOCK_SIZE as u64)?;
        let header = BlockStruct {
            start: (st.blocks_used as usize * cpb) as i32,
            length: 0,
            capacity: cpb as i32,
            _pad: 0,
        };
        region.write_at(addr, header);
        let payload = addr + BLOCK_HEADER_SIZE as u64;
        for i in 0..cpb {
            write_sentinel(region, repr, payload + (i * repr.width()) as u64);
        }
        region.write(st.blocks.at(st.blocks_used as usize), Offset::<BlockStruct>::new(addr));
        st.blocks_used += 1;
    }

    let old_count = st.row_count as usize;
    st.row_count = new_count as u32;
    region.write(col, st);

    // Rows reclaimed from a previous shrink must not leak old values.
    for row in old_count..new_count {
        clear_cell(region, col, repr, row);
    }

    for b in 0..st.blocks_used as usize {
        let boff: Offset<BlockStruct> = region.read(st.blocks.at(b));
        let mut header: BlockStruct = region.read(boff);
        let start = header.start as usize;
        header.length = new_count.saturating_sub(start).min(cpb) as i32;
        region.write(boff, header);
    }
    Ok(())
}
