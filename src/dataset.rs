//! Dataset views over the region's root structure.
//!
//! [`DataSetW`] owns the writable region and is the single writer;
//! [`DataSet`] attaches read-only. Readers attached before a growth
//! see the file as it was; a reader wanting fresh data re-attaches.

use std::mem::size_of;
use std::path::Path;

use tracing::{debug, info};

use crate::cells::{self, CellRepr};
use crate::column::{ColRef, Column, ColumnType, ColumnW, DataType, MeasureType};
use crate::error::{Result, StoreError};
use crate::layout::{ColumnStruct, DataSetStruct, COLUMN_CAPACITY, MISSING_INT};
use crate::region::{Offset, Region, ROOT_OFFSET};

/// Default size of a freshly created dataset file.
pub const DEFAULT_DATASET_SIZE: u64 = 4 * 1024 * 1024;

fn root_off() -> Offset<DataSetStruct> {
    Offset::new(ROOT_OFFSET)
}

pub(crate) fn read_root(region: &Region) -> DataSetStruct {
    region.read(root_off())
}

fn write_root(region: &mut Region, root: DataSetStruct) {
    region.write(root_off(), root);
}

/// A row is filtered out when any active FILTER column holds a value
/// other than 1 for it. Filter columns sit contiguously at the front
/// of the column array, so the scan stops at the first non-filter
/// column; inactive filters are skipped.
pub(crate) fn row_is_filtered(region: &Region, row: usize) -> Result<bool> {
    let root = read_root(region);
    let len = root.row_count as usize;
    if row >= len {
        return Err(StoreError::IndexOutOfBounds { index: row, len });
    }
    for i in 0..root.column_count as usize {
        let off: Offset<ColumnStruct> = region.read(root.columns.at(i));
        let col = ColRef(off);
        if col.column_type(region) != ColumnType::Filter {
            break;
        }
        if col.st(region).active == 0 {
            continue;
        }
        if cells::get_i32(region, off, row) != 1 {
            return Ok(true);
        }
    }
    Ok(false)
}

fn column_offset_at(region: &Region, index: usize) -> Result<Offset<ColumnStruct>> {
    let root = read_root(region);
    let len = root.column_count as usize;
    if index >= len {
        return Err(StoreError::IndexOutOfBounds { index, len });
    }
    Ok(region.read(root.columns.at(index)))
}

fn column_index_by_name(region: &Region, name: &str) -> Result<usize> {
    let root = read_root(region);
    for i in 0..root.column_count as usize {
        let off: Offset<ColumnStruct> = region.read(root.columns.at(i));
        if ColRef(off).name(region) == name {
            return Ok(i);
        }
    }
    Err(StoreError::ColumnNotFound(name.to_string()))
}

fn column_index_by_id(region: &Region, id: i32) -> Result<usize> {
    let root = read_root(region);
    for i in 0..root.column_count as usize {
        let off: Offset<ColumnStruct> = region.read(root.columns.at(i));
        if ColRef(off).st(region).id == id {
            return Ok(i);
        }
    }
    Err(StoreError::ColumnNotFound(format!("id {}", id)))
}

/// A new column: default DATA / INTEGER / NOMINAL, active, trimming
/// levels, empty everything.
fn alloc_column(region: &mut Region, name: &str, import_name: &str, id: i32) -> Result<Offset<ColumnStruct>> {
    let off = region.allocate::<ColumnStruct>(1)?;
    let mut st = ColumnStruct::blank();
    st.id = id;
    st.column_type = ColumnType::Data as u8;
    st.data_type = DataType::Integer as u8;
    st.measure_type = MeasureType::Nominal as u8;
    st.active = 1;
    st.trim_levels = 1;
    st.name = region.alloc_str(name)?;
    st.import_name = region.alloc_str(import_name)?;
    region.write(off, st);
    cells::reset_storage(region, off)?;
    Ok(off)
}

/// Read-only dataset view.
pub struct DataSet {
    region: Region,
}

impl DataSet {
    /// Attach read-only to an existing dataset file.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<DataSet> {
        let region = Region::attach(path)?;
        if region.len() < ROOT_OFFSET + size_of::<DataSetStruct>() as u64 {
            return Err(StoreError::CorruptFormat);
        }
        Ok(DataSet { region })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn row_count(&self) -> usize {
        read_root(&self.region).row_count as usize
    }

    pub fn column_count(&self) -> usize {
        read_root(&self.region).column_count as usize
    }

    pub fn is_row_filtered(&self, row: usize) -> Result<bool> {
        row_is_filtered(&self.region, row)
    }

    /// Rows surviving the filters, as cached by the writer's last
    /// filter refresh.
    pub fn row_count_ex_filtered(&self) -> usize {
        read_root(&self.region).row_count_ex_filtered as usize
    }

    /// Absolute row number of the nth unfiltered row, as of the last
    /// filter refresh.
    pub fn index_ex_filtered(&self, position: usize) -> Result<Option<usize>> {
        let root = read_root(&self.region);
        let len = root.row_count as usize;
        if position >= len {
            return Err(StoreError::IndexOutOfBounds {
                index: position,
                len,
            });
        }
        let v = cells::get_i32(&self.region, root.indices, position);
        Ok(if v == MISSING_INT { None } else { Some(v as usize) })
    }

    pub fn weights(&self) -> Option<i32> {
        let w = read_root(&self.region).weights;
        if w < 0 {
            None
        } else {
            Some(w)
        }
    }

    pub fn column(&self, index: usize) -> Result<Column<'_>> {
        let off = column_offset_at(&self.region, index)?;
        Ok(Column {
            region: &self.region,
            col: ColRef(off),
        })
    }

    pub fn column_by_name(&self, name: &str) -> Result<Column<'_>> {
        let index = column_index_by_name(&self.region, name)?;
        self.column(index)
    }

    pub fn column_by_id(&self, id: i32) -> Result<Column<'_>> {
        let index = column_index_by_id(&self.region, id)?;
        self.column(index)
    }
}

/// Writer view; the sole mutator of the backing file.
pub struct DataSetW {
    region: Region,
    edited: bool,
    blank: bool,
}

impl DataSetW {
    /// Create a new dataset file with the standard column capacity.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<DataSetW> {
        Self::create_with_capacity(path, DEFAULT_DATASET_SIZE, COLUMN_CAPACITY)
    }

    pub fn create_with_capacity<P: AsRef<Path>>(
        path: P,
        size: u64,
        capacity: u32,
    ) -> Result<DataSetW> {
        let mut region = Region::create(path, size)?;
        let root_alloc = region.allocate::<DataSetStruct>(1)?;
        debug_assert_eq!(root_alloc.to_u64(), ROOT_OFFSET);
        let columns = region.allocate::<Offset<ColumnStruct>>(capacity as usize)?;
        let indices = alloc_column(&mut region, "", "", -1)?;
        let root = DataSetStruct {
            row_count: 0,
            column_count: 0,
            capacity,
            next_column_id: 0,
            row_count_ex_filtered: 0,
            weights: -1,
            scratch_id: -1,
            _pad: 0,
            scratch: Offset::NULL,
            indices,
            columns,
        };
        write_root(&mut region, root);
        info!(path = %region.path().display(), capacity, "dataset created");
        Ok(DataSetW {
            region,
            edited: false,
            blank: true,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub(crate) fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }

    pub fn flush(&self) -> Result<()> {
        self.region.flush()
    }

    /// Process-local flag: has anything been mutated since creation
    /// or the last explicit reset. Not persisted.
    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn set_edited(&mut self, edited: bool) {
        self.edited = edited;
    }

    /// Process-local flag: the dataset has never held user data.
    pub fn is_blank(&self) -> bool {
        self.blank
    }

    pub fn set_blank(&mut self, blank: bool) {
        self.blank = blank;
    }

    pub fn row_count(&self) -> usize {
        read_root(&self.region).row_count as usize
    }

    pub fn column_count(&self) -> usize {
        read_root(&self.region).column_count as usize
    }

    pub fn column_capacity(&self) -> u32 {
        read_root(&self.region).capacity
    }

    pub fn is_row_filtered(&self, row: usize) -> Result<bool> {
        row_is_filtered(&self.region, row)
    }

    pub fn row_count_ex_filtered(&self) -> usize {
        read_root(&self.region).row_count_ex_filtered as usize
    }

    pub fn index_ex_filtered(&self, position: usize) -> Result<Option<usize>> {
        let root = read_root(&self.region);
        let len = root.row_count as usize;
        if position >= len {
            return Err(StoreError::IndexOutOfBounds {
                index: position,
                len,
            });
        }
        let v = cells::get_i32(&self.region, root.indices, position);
        Ok(if v == MISSING_INT { None } else { Some(v as usize) })
    }

    pub fn weights(&self) -> Option<i32> {
        let w = read_root(&self.region).weights;
        if w < 0 {
            None
        } else {
            Some(w)
        }
    }

    pub fn set_weights(&mut self, id: Option<i32>) {
        let mut root = read_root(&self.region);
        root.weights = id.unwrap_or(-1);
        write_root(&mut self.region, root);
        self.edited = true;
    }

    pub fn column(&self, index: usize) -> Result<Column<'_>> {
        let off = column_offset_at(&self.region, index)?;
        Ok(Column {
            region: &self.region,
            col: ColRef(off),
        })
    }

    pub fn column_by_name(&self, name: &str) -> Result<Column<'_>> {
        let index = column_index_by_name(&self.region, name)?;
        self.column(index)
    }

    pub fn column_by_id(&self, id: i32) -> Result<Column<'_>> {
        let index = column_index_by_id(&self.region, id)?;
        self.column(index)
    }

    pub fn column_mut(&mut self, index: usize) -> Result<ColumnW<'_>> {
        let off = column_offset_at(&self.region, index)?;
        self.edited = true;
        Ok(ColumnW {
            ds: self,
            col: ColRef(off),
            index,
        })
    }

    pub fn column_mut_by_name(&mut self, name: &str) -> Result<ColumnW<'_>> {
        let index = column_index_by_name(&self.region, name)?;
        self.column_mut(index)
    }

    pub fn column_mut_by_id(&mut self, id: i32) -> Result<ColumnW<'_>> {
        let index = column_index_by_id(&self.region, id)?;
        self.column_mut(index)
    }

    pub(crate) fn column_offset(&self, index: usize) -> Offset<ColumnStruct> {
        let root = read_root(&self.region);
        debug_assert!(index < root.column_count as usize);
        self.region.read(root.columns.at(index))
    }

    // ---- column mutation ----

    /// Append a column, sized to the dataset's current row count.
    /// Fails with `TooManyColumns` at the fixed capacity.
    pub fn append_column(&mut self, name: &str, import_name: Option<&str>) -> Result<ColumnW<'_>> {
        let mut root = read_root(&self.region);
        if root.column_count >= root.capacity {
            return Err(StoreError::TooManyColumns(root.capacity));
        }
        let id = root.next_column_id;
        root.next_column_id += 1;

        let off = alloc_column(&mut self.region, name, import_name.unwrap_or(name), id)?;
        cells::set_row_count(&mut self.region, off, CellRepr::Int32, root.row_count as usize)?;

        self.region
            .write(root.columns.at(root.column_count as usize), off);
        root.column_count += 1;
        write_root(&mut self.region, root);
        self.edited = true;
        self.blank = false;
        debug!(name, id, "column appended");

        let index = root.column_count as usize - 1;
        Ok(ColumnW {
            ds: self,
            col: ColRef(off),
            index,
        })
    }

    /// Append, then shuffle the offset array to place the new column
    /// at `index`.
    pub fn insert_column(
        &mut self,
        index: usize,
        name: &str,
        import_name: Option<&str>,
    ) -> Result<ColumnW<'_>> {
        {
            let _ = self.append_column(name, import_name)?;
        }
        let root = read_root(&self.region);
        let last = root.column_count as usize - 1;
        if index > last {
            return Err(StoreError::IndexOutOfBounds {
                index,
                len: last + 1,
            });
        }
        let new_off: Offset<ColumnStruct> = self.region.read(root.columns.at(last));
        for i in (index..last).rev() {
            let off: Offset<ColumnStruct> = self.region.read(root.columns.at(i));
            self.region.write(root.columns.at(i + 1), off);
        }
        self.region.write(root.columns.at(index), new_off);
        Ok(ColumnW {
            ds: self,
            col: ColRef(new_off),
            index,
        })
    }

    /// Remove columns `start..=end` by compacting the offset array.
    /// The removed columns' storage stays allocated in the region (the
    /// bump allocator never frees); only the references go away.
    pub fn delete_columns(&mut self, start: usize, end: usize) -> Result<()> {
        let mut root = read_root(&self.region);
        let len = root.column_count as usize;
        if start > end || end >= len {
            return Err(StoreError::IndexOutOfBounds { index: end, len });
        }
        let count = end - start + 1;

        let mut removed_filter = false;
        for i in start..=end {
            let off: Offset<ColumnStruct> = self.region.read(root.columns.at(i));
            let st: ColumnStruct = self.region.read(off);
            if root.weights == st.id {
                root.weights = -1;
            }
            if root.scratch_id == st.id {
                root.scratch_id = -1;
            }
            if ColumnType::from_u8(st.column_type) == ColumnType::Filter {
                removed_filter = true;
            }
        }

        for i in start..len - count {
            let off: Offset<ColumnStruct> = self.region.read(root.columns.at(i + count));
            self.region.write(root.columns.at(i), off);
        }
        root.column_count -= count as u32;
        write_root(&mut self.region, root);
        self.edited = true;
        debug!(start, end, "columns deleted");

        if removed_filter {
            self.refresh_filter_state()?;
        }
        Ok(())
    }

    // ---- row mutation ----

    pub fn append_rows(&mut self, count: usize) -> Result<()> {
        let rows = self.row_count();
        self.set_row_count(rows + count)
    }

    /// Grow every column's storage (and the dataset row count) in
    /// lock-step. Fresh rows read as missing.
    pub fn set_row_count(&mut self, count: usize) -> Result<()> {
        // The staged scratch column is not resized with the live
        // columns; swapping it back in later would break the lock-step
        // row-count invariant.
        self.discard_scratch_column();
        let mut root = read_root(&self.region);
        for i in 0..root.column_count as usize {
            let off: Offset<ColumnStruct> = self.region.read(root.columns.at(i));
            let repr = ColRef(off).repr(&self.region);
            cells::set_row_count(&mut self.region, off, repr, count)?;
        }
        root.row_count = count as u32;
        write_root(&mut self.region, root);
        self.edited = true;
        self.blank = false;
        self.refresh_filter_state()
    }

    pub fn insert_rows(&mut self, start: usize, end: usize) -> Result<()> {
        let rows = self.row_count();
        if start > end || start > rows {
            return Err(StoreError::IndexOutOfBounds {
                index: start,
                len: rows,
            });
        }
        self.discard_scratch_column();
        let columns = self.column_count();
        for i in 0..columns {
            let mut cw = self.column_mut(i)?;
            cw.insert_rows(start, end)?;
        }
        let mut root = read_root(&self.region);
        root.row_count += (end - start + 1) as u32;
        write_root(&mut self.region, root);
        self.blank = false;
        self.refresh_filter_state()
    }

    /// Delete rows `start..=end`. Columns are processed right to left
    /// so the filter columns at the front are compacted last.
    pub fn delete_rows(&mut self, start: usize, end: usize) -> Result<()> {
        let rows = self.row_count();
        if start > end || end >= rows {
            return Err(StoreError::IndexOutOfBounds { index: end, len: rows });
        }
        self.discard_scratch_column();
        let columns = self.column_count();
        for i in (0..columns).rev() {
            let mut cw = self.column_mut(i)?;
            cw.delete_rows(start, end)?;
        }
        let mut root = read_root(&self.region);
        root.row_count -= (end - start + 1) as u32;
        write_root(&mut self.region, root);
        self.refresh_filter_state()
    }

    // ---- filter state ----

    /// Recompute which rows survive the active filters, rewrite the
    /// internal indices column, cache the surviving count and refresh
    /// every non-filter column's level counts. Idempotent.
    pub fn refresh_filter_state(&mut self) -> Result<()> {
        let root = read_root(&self.region);
        let rows = root.row_count as usize;

        cells::set_row_count(&mut self.region, root.indices, CellRepr::Int32, rows)?;
        let mut kept = 0usize;
        for row in 0..rows {
            if !row_is_filtered(&self.region, row)? {
                cells::set_i32(&mut self.region, root.indices, kept, row as i32);
                kept += 1;
            }
        }
        for position in kept..rows {
            cells::set_i32(&mut self.region, root.indices, position, MISSING_INT);
        }

        let mut root = read_root(&self.region);
        root.row_count_ex_filtered = kept as u32;
        write_root(&mut self.region, root);

        for i in 0..root.column_count as usize {
            let off: Offset<ColumnStruct> = self.region.read(root.columns.at(i));
            if ColRef(off).column_type(&self.region) == ColumnType::Filter {
                continue;
            }
            let mut cw = ColumnW {
                ds: self,
                col: ColRef(off),
                index: i,
            };
            cw.update_level_counts()?;
        }
        debug!(rows, kept, "filter state refreshed");
        Ok(())
    }

    // ---- scratch-column protocol ----

    /// True when the scratch slot holds this column's previous
    /// representation with exactly the given type flags.
    pub(crate) fn scratch_matches(&self, id: i32, data_type: u8, measure_type: u8) -> bool {
        let root = read_root(&self.region);
        if root.scratch_id != id || root.scratch.is_null() {
            return false;
        }
        let st: ColumnStruct = self.region.read(root.scratch);
        st.data_type == data_type && st.measure_type == measure_type
    }

    /// Swap the column at `index` with the scratch slot's content.
    /// Exactly one of the two physical representations is live
    /// afterwards; the other becomes the scratch.
    pub(crate) fn exchange_with_scratch(&mut self, index: usize) {
        let mut root = read_root(&self.region);
        let live: Offset<ColumnStruct> = self.region.read(root.columns.at(index));
        debug_assert!(!root.scratch.is_null());
        self.region.write(root.columns.at(index), root.scratch);
        root.scratch = live;
        write_root(&mut self.region, root);
    }

    /// Move the live column at `index` into the scratch slot and put a
    /// fresh, empty column with the same identity in its place.
    /// Returns the offset of the displaced (old) column. A previous
    /// unrelated scratch struct is leaked, consistent with the
    /// allocator never freeing.
    pub(crate) fn stage_to_scratch(&mut self, index: usize) -> Result<Offset<ColumnStruct>> {
        let root = read_root(&self.region);
        let live_off: Offset<ColumnStruct> = self.region.read(root.columns.at(index));
        let live: ColumnStruct = self.region.read(live_off);

        let fresh = self.region.allocate::<ColumnStruct>(1)?;
        let mut st = live;
        st.levels = Offset::NULL;
        st.levels_used = 0;
        st.levels_capacity = 0;
        st.blocks = Offset::NULL;
        st.blocks_used = 0;
        st.block_capacity = 0;
        st.row_count = 0;
        self.region.write(fresh, st);
        cells::reset_storage(&mut self.region, fresh)?;
        self.region.write(root.columns.at(index), fresh);

        let mut root = read_root(&self.region);
        root.scratch = live_off;
        root.scratch_id = live.id;
        write_root(&mut self.region, root);
        Ok(live_off)
    }

    /// Invalidate the scratch slot's identity so a later type change
    /// cannot reuse stale content. The storage itself is not freed.
    pub fn discard_scratch_column(&mut self) {
        let mut root = read_root(&self.region);
        root.scratch_id = -1;
        write_root(&mut self.region, root);
    }

    /// Id of the column currently staged in the scratch slot.
    pub fn scratch_column_id(&self) -> Option<i32> {
        let root = read_root(&self.region);
        if root.scratch_id < 0 {
            None
        } else {
            Some(root.scratch_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dataset(name: &str) -> (tempfile::TempDir, DataSetW) {
        let dir = tempfile::tempdir().unwrap();
        let ds = DataSetW::create(dir.path().join(name)).unwrap();
        (dir, ds)
    }

    #[test]
    fn test_create_empty_dataset() {
        let (_dir, ds) = temp_dataset("empty.tab");
        assert_eq!(ds.row_count(), 0);
        assert_eq!(ds.column_count(), 0);
        assert!(ds.is_blank());
        assert!(!ds.is_edited());
        assert_eq!(ds.weights(), None);
        assert_eq!(ds.scratch_column_id(), None);
    }

    #[test]
    fn test_append_column_defaults() {
        let (_dir, mut ds) = temp_dataset("defaults.tab");
        {
            let col = ds.append_column("alpha", None).unwrap();
            assert_eq!(col.id(), 0);
            assert_eq!(col.name(), "alpha");
            assert_eq!(col.data_type(), DataType::Integer);
            assert_eq!(col.measure_type(), MeasureType::Nominal);
            assert_eq!(col.column_type(), ColumnType::Data);
            assert!(col.trim_levels());
        }
        let col = ds.column_by_name("alpha").unwrap();
        assert_eq!(col.import_name(), "alpha");
        assert!(col.active());
        assert!(!ds.is_blank());
    }

    #[test]
    fn test_column_ids_are_never_reused() {
        let (_dir, mut ds) = temp_dataset("ids.tab");
        ds.append_column("a", None).unwrap();
        ds.append_column("b", None).unwrap();
        ds.delete_columns(0, 1).unwrap();
        let col = ds.append_column("c", None).unwrap();
        assert_eq!(col.id(), 2);
    }

    #[test]
    fn test_too_many_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds =
            DataSetW::create_with_capacity(dir.path().join("tiny.tab"), 1024 * 1024, 2).unwrap();
        ds.append_column("a", None).unwrap();
        ds.append_column("b", None).unwrap();
        match ds.append_column("c", None) {
            Err(StoreError::TooManyColumns(2)) => {}
            other => panic!("expected TooManyColumns, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_insert_column_shuffles_offsets() {
        let (_dir, mut ds) = temp_dataset("shuffle.tab");
        ds.append_column("a", None).unwrap();
        ds.append_column("b", None).unwrap();
        ds.insert_column(1, "between", None).unwrap();
        assert_eq!(ds.column(0).unwrap().name(), "a");
        assert_eq!(ds.column(1).unwrap().name(), "between");
        assert_eq!(ds.column(2).unwrap().name(), "b");
    }

    #[test]
    fn test_delete_columns_compacts() {
        let (_dir, mut ds) = temp_dataset("del.tab");
        for name in ["a", "b", "c", "d"] {
            ds.append_column(name, None).unwrap();
        }
        ds.delete_columns(1, 2).unwrap();
        assert_eq!(ds.column_count(), 2);
        assert_eq!(ds.column(0).unwrap().name(), "a");
        assert_eq!(ds.column(1).unwrap().name(), "d");
    }

    #[test]
    fn test_rows_stay_in_lockstep() {
        let (_dir, mut ds) = temp_dataset("lockstep.tab");
        ds.append_column("a", None).unwrap();
        ds.append_rows(5).unwrap();
        ds.append_column("b", None).unwrap();
        assert_eq!(ds.row_count(), 5);
        assert_eq!(ds.column(0).unwrap().row_count(), 5);
        assert_eq!(ds.column(1).unwrap().row_count(), 5);
        // Fresh rows and fresh columns both read missing.
        assert_eq!(ds.column(1).unwrap().ivalue(4).unwrap(), MISSING_INT);
    }

    #[test]
    fn test_insert_rows_shifts_values() {
        let (_dir, mut ds) = temp_dataset("insrows.tab");
        ds.append_column("a", None).unwrap();
        ds.append_rows(3).unwrap();
        for (row, v) in [(0, 10), (1, 20), (2, 30)] {
            ds.column_mut(0).unwrap().set_i_value(row, v).unwrap();
        }
        ds.insert_rows(1, 2).unwrap();
        assert_eq!(ds.row_count(), 5);
        let col = ds.column(0).unwrap();
        assert_eq!(col.ivalue(0).unwrap(), 10);
        assert_eq!(col.ivalue(1).unwrap(), MISSING_INT);
        assert_eq!(col.ivalue(2).unwrap(), MISSING_INT);
        assert_eq!(col.ivalue(3).unwrap(), 20);
        assert_eq!(col.ivalue(4).unwrap(), 30);
    }

    #[test]
    fn test_delete_rows_compacts_and_blanks_tail() {
        let (_dir, mut ds) = temp_dataset("delrows.tab");
        ds.append_column("a", None).unwrap();
        ds.append_rows(4).unwrap();
        for (row, v) in [(0, 1), (1, 2), (2, 3), (3, 4)] {
            ds.column_mut(0).unwrap().set_i_value(row, v).unwrap();
        }
        ds.delete_rows(1, 2).unwrap();
        assert_eq!(ds.row_count(), 2);
        let col = ds.column(0).unwrap();
        assert_eq!(col.ivalue(0).unwrap(), 1);
        assert_eq!(col.ivalue(1).unwrap(), 4);
        assert!(col.ivalue(2).is_err());
    }

    #[test]
    fn test_row_bounds_checked() {
        let (_dir, mut ds) = temp_dataset("bounds.tab");
        ds.append_column("a", None).unwrap();
        ds.append_rows(2).unwrap();
        assert!(matches!(
            ds.is_row_filtered(2),
            Err(StoreError::IndexOutOfBounds { index: 2, len: 2 })
        ));
        assert!(matches!(
            ds.column(5),
            Err(StoreError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            ds.column_by_name("nope"),
            Err(StoreError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_row_growth_discards_scratch() {
        let (_dir, mut ds) = temp_dataset("scratch_rows.tab");
        ds.append_column("n", None).unwrap();
        ds.append_rows(3).unwrap();
        {
            let mut n = ds.column_mut(0).unwrap();
            for (row, v) in [(0, 1), (1, 2), (2, 3)] {
                n.set_i_value(row, v).unwrap();
            }
            n.change_dm_type(Some(DataType::Text), None).unwrap();
        }
        assert_eq!(ds.scratch_column_id(), Some(0));

        // The staged column still has 3 rows; it must not come back.
        ds.append_rows(2).unwrap();
        assert_eq!(ds.scratch_column_id(), None);

        ds.column_mut(0)
            .unwrap()
            .change_dm_type(Some(DataType::Integer), Some(MeasureType::Nominal))
            .unwrap();
        let n = ds.column(0).unwrap();
        assert_eq!(n.row_count(), ds.row_count());
        assert_eq!(n.row_count(), 5);
        assert_eq!(n.ivalue(0).unwrap(), 1);
        assert_eq!(n.ivalue(2).unwrap(), 3);
        assert_eq!(n.ivalue(4).unwrap(), MISSING_INT);
    }

    #[test]
    fn test_row_delete_discards_scratch() {
        let (_dir, mut ds) = temp_dataset("scratch_del.tab");
        ds.append_column("n", None).unwrap();
        ds.append_rows(3).unwrap();
        ds.column_mut(0)
            .unwrap()
            .change_dm_type(Some(DataType::Text), None)
            .unwrap();
        ds.delete_rows(2, 2).unwrap();
        assert_eq!(ds.scratch_column_id(), None);

        ds.column_mut(0)
            .unwrap()
            .change_dm_type(Some(DataType::Integer), Some(MeasureType::Nominal))
            .unwrap();
        assert_eq!(ds.column(0).unwrap().row_count(), 2);
    }

    #[test]
    fn test_weights_cleared_when_column_deleted() {
        let (_dir, mut ds) = temp_dataset("weights.tab");
        ds.append_column("w", None).unwrap();
        let id = ds.column(0).unwrap().id();
        ds.set_weights(Some(id));
        assert_eq!(ds.weights(), Some(id));
        ds.delete_columns(0, 0).unwrap();
        assert_eq!(ds.weights(), None);
    }
}
