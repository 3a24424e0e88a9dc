//! Column views.
//!
//! [`Column`] is the read-only view over one column's metadata, cell
//! blocks and level table. [`ColumnW`] is the writer view, obtained
//! from a [`crate::dataset::DataSetW`]; its typed setters keep level
//! counts in step with the cells, and `change_dm_type` drives the
//! data/measure type state machine with the dataset's scratch slot.

use std::collections::HashMap;

use tracing::debug;

use crate::cells::{self, CellRepr};
use crate::dataset::{row_is_filtered, DataSetW};
use crate::error::{Result, StoreError};
use crate::layout::{ColumnStruct, LevelStruct, MissingValueStruct, INITIAL_LEVEL_CAPACITY, MISSING_INT};
use crate::levels::{LevelData, MissingValue};
use crate::region::{Offset, Region, Str};

/// Role of a column within the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Data = 1,
    Computed = 2,
    Recoded = 3,
    Filter = 4,
}

impl ColumnType {
    pub(crate) fn from_u8(value: u8) -> ColumnType {
        match value {
            2 => ColumnType::Computed,
            3 => ColumnType::Recoded,
            4 => ColumnType::Filter,
            _ => ColumnType::Data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer = 1,
    Decimal = 2,
    Text = 3,
}

impl DataType {
    pub(crate) fn from_u8(value: u8) -> DataType {
        match value {
            2 => DataType::Decimal,
            3 => DataType::Text,
            _ => DataType::Integer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureType {
    Nominal = 2,
    Ordinal = 3,
    Continuous = 4,
    Id = 5,
}

impl MeasureType {
    pub(crate) fn from_u8(value: u8) -> MeasureType {
        match value {
            3 => MeasureType::Ordinal,
            4 => MeasureType::Continuous,
            5 => MeasureType::Id,
            _ => MeasureType::Nominal,
        }
    }
}

/// Physical cell representation for a data/measure type pair.
pub(crate) fn cell_repr(data: DataType, measure: MeasureType) -> CellRepr {
    match data {
        DataType::Decimal => CellRepr::Float64,
        DataType::Text if measure == MeasureType::Id => CellRepr::StrHandle,
        _ => CellRepr::Int32,
    }
}

/// Whether this type pair carries a level table.
pub(crate) fn has_level_table(data: DataType, measure: MeasureType) -> bool {
    data != DataType::Decimal
        && measure != MeasureType::Continuous
        && measure != MeasureType::Id
}

pub(crate) fn format_decimal(value: f64, dps: u8) -> String {
    format!("{:.*}", dps as usize, value)
}

/// Shared read logic over a column structure. Both views delegate
/// here; everything takes the region explicitly so the writer can call
/// in with a borrowed region.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColRef(pub(crate) Offset<ColumnStruct>);

impl ColRef {
    pub(crate) fn st(self, r: &Region) -> ColumnStruct {
        r.read(self.0)
    }

    pub(crate) fn data_type(self, r: &Region) -> DataType {
        DataType::from_u8(self.st(r).data_type)
    }

    pub(crate) fn measure_type(self, r: &Region) -> MeasureType {
        MeasureType::from_u8(self.st(r).measure_type)
    }

    pub(crate) fn column_type(self, r: &Region) -> ColumnType {
        ColumnType::from_u8(self.st(r).column_type)
    }

    pub(crate) fn repr(self, r: &Region) -> CellRepr {
        cell_repr(self.data_type(r), self.measure_type(r))
    }

    pub(crate) fn has_level_table(self, r: &Region) -> bool {
        has_level_table(self.data_type(r), self.measure_type(r))
    }

    pub(crate) fn check_row(self, r: &Region, row: usize) -> Result<()> {
        let len = self.st(r).row_count as usize;
        if row >= len {
            return Err(StoreError::IndexOutOfBounds { index: row, len });
        }
        Ok(())
    }

    pub(crate) fn name(self, r: &Region) -> String {
        r.read_str(self.st(r).name).unwrap_or_default()
    }

    pub(crate) fn level_count(self, r: &Region) -> usize {
        self.st(r).levels_used as usize
    }

    pub(crate) fn level_at(self, r: &Region, index: usize) -> LevelStruct {
        let st = self.st(r);
        debug_assert!(index < st.levels_used as usize);
        r.read(st.levels.at(index))
    }

    pub(crate) fn level_index(self, r: &Region, value: i32) -> Option<usize> {
        let st = self.st(r);
        (0..st.levels_used as usize)
            .find(|&i| r.read::<LevelStruct>(st.levels.at(i)).value == value)
    }

    pub(crate) fn decode_level(self, r: &Region, l: LevelStruct) -> LevelData {
        LevelData {
            value: l.value,
            label: r.read_str(l.label).unwrap_or_default(),
            import_value: r.read_str(l.import_value).unwrap_or_default(),
            count: l.count,
            count_ex_filtered: l.count_ex_filtered,
            treat_as_missing: l.treat_as_missing != 0,
        }
    }

    pub(crate) fn levels(self, r: &Region) -> Vec<LevelData> {
        let st = self.st(r);
        (0..st.levels_used as usize)
            .map(|i| self.decode_level(r, r.read(st.levels.at(i))))
            .collect()
    }

    /// Label for a level value; the missing sentinel yields "".
    pub(crate) fn get_label(self, r: &Region, value: i32) -> Result<String> {
        if value == MISSING_INT {
            return Ok(String::new());
        }
        match self.level_index(r, value) {
            Some(i) => Ok(r.read_str(self.level_at(r, i).label).unwrap_or_default()),
            None => Err(StoreError::LevelNotFound(value.to_string())),
        }
    }

    pub(crate) fn get_import_value(self, r: &Region, value: i32) -> Result<String> {
        if value == MISSING_INT {
            return Ok(String::new());
        }
        match self.level_index(r, value) {
            Some(i) => Ok(r
                .read_str(self.level_at(r, i).import_value)
                .unwrap_or_default()),
            None => Err(StoreError::LevelNotFound(value.to_string())),
        }
    }

    /// Level value for a string, matching the label or the import
    /// value.
    pub(crate) fn value_for_label(self, r: &Region, label: &str) -> Result<i32> {
        let st = self.st(r);
        for i in 0..st.levels_used as usize {
            let l: LevelStruct = r.read(st.levels.at(i));
            if r.read_str(l.label).as_deref() == Some(label)
                || r.read_str(l.import_value).as_deref() == Some(label)
            {
                return Ok(l.value);
            }
        }
        Err(StoreError::LevelNotFound(label.to_string()))
    }

    pub(crate) fn has_level_label(self, r: &Region, label: &str) -> bool {
        self.value_for_label(r, label).is_ok()
    }

    pub(crate) fn missing_values(self, r: &Region) -> Vec<MissingValue> {
        let st = self.st(r);
        (0..st.missing_used as usize)
            .map(|i| MissingValue::decode(r, r.read(st.missing_values.at(i))))
            .collect()
    }

    pub(crate) fn ivalue(self, r: &Region, row: usize) -> Result<i32> {
        self.check_row(r, row)?;
        debug_assert_eq!(self.repr(r), CellRepr::Int32);
        Ok(cells::get_i32(r, self.0, row))
    }

    pub(crate) fn dvalue(self, r: &Region, row: usize) -> Result<f64> {
        self.check_row(r, row)?;
        debug_assert_eq!(self.repr(r), CellRepr::Float64);
        Ok(cells::get_f64(r, self.0, row))
    }

    /// String representation of a cell, `None` when missing. TEXT
    /// columns yield the stored string or the level label; numeric
    /// columns yield a rendering (decimals use the column's `dps`).
    pub(crate) fn svalue(self, r: &Region, row: usize) -> Result<Option<String>> {
        self.check_row(r, row)?;
        let st = self.st(r);
        match self.repr(r) {
            CellRepr::StrHandle => {
                let handle = cells::get_handle(r, self.0, row);
                if handle == 0 {
                    return Ok(None);
                }
                Ok(r.read_str(Str::new(handle)))
            }
            CellRepr::Int32 => {
                let v = cells::get_i32(r, self.0, row);
                if v == MISSING_INT {
                    return Ok(None);
                }
                if self.data_type(r) == DataType::Text {
                    return self.get_label(r, v).map(Some);
                }
                match self.level_index(r, v) {
                    Some(i) => Ok(r.read_str(self.level_at(r, i).label)),
                    None => Ok(Some(v.to_string())),
                }
            }
            CellRepr::Float64 => {
                let d = cells::get_f64(r, self.0, row);
                if d.is_nan() {
                    return Ok(None);
                }
                Ok(Some(format_decimal(d, st.dps)))
            }
        }
    }

    /// Evaluate the missing-value rules against the row's decoded
    /// representations. Cells already holding the missing sentinel
    /// report `false`; the caller treats sentinels as missing anyway.
    pub(crate) fn should_treat_as_missing(self, r: &Region, row: usize) -> Result<bool> {
        self.check_row(r, row)?;
        let st = self.st(r);
        if st.missing_used == 0 {
            return Ok(false);
        }
        let rules = self.missing_values(r);

        let (iv, dv, sv, import): (Option<i32>, Option<f64>, Option<String>, Option<String>) =
            match self.repr(r) {
                CellRepr::Int32 => {
                    let v = cells::get_i32(r, self.0, row);
                    if v == MISSING_INT {
                        return Ok(false);
                    }
                    if self.data_type(r) == DataType::Text {
                        let label = self.get_label(r, v)?;
                        let import = self.get_import_value(r, v)?;
                        (
                            label.parse::<i32>().ok(),
                            label.parse::<f64>().ok(),
                            Some(label),
                            Some(import),
                        )
                    } else {
                        let (label, import) = match self.level_index(r, v) {
                            Some(i) => {
                                let l = self.level_at(r, i);
                                (r.read_str(l.label), r.read_str(l.import_value))
                            }
                            None => (None, None),
                        };
                        (Some(v), Some(v as f64), label, import)
                    }
                }
                CellRepr::Float64 => {
                    let d = cells::get_f64(r, self.0, row);
                    if d.is_nan() {
                        return Ok(false);
                    }
                    let iv = if d.fract() == 0.0 && d >= i32::MIN as f64 && d <= i32::MAX as f64 {
                        Some(d as i32)
                    } else {
                        None
                    };
                    (iv, Some(d), Some(format_decimal(d, st.dps)), None)
                }
                CellRepr::StrHandle => {
                    let handle = cells::get_handle(r, self.0, row);
                    if handle == 0 {
                        return Ok(false);
                    }
                    let s = r.read_str(Str::new(handle)).unwrap_or_default();
                    (s.parse::<i32>().ok(), s.parse::<f64>().ok(), Some(s), None)
                }
            };

        Ok(rules
            .iter()
            .any(|rule| rule.matches(iv, dv, sv.as_deref(), import.as_deref())))
    }
}

/// Read-only view over one column.
pub struct Column<'a> {
    pub(crate) region: &'a Region,
    pub(crate) col: ColRef,
}

impl<'a> Column<'a> {
    pub fn id(&self) -> i32 {
        self.col.st(self.region).id
    }

    pub fn name(&self) -> String {
        self.col.name(self.region)
    }

    pub fn import_name(&self) -> String {
        self.region
            .read_str(self.col.st(self.region).import_name)
            .unwrap_or_default()
    }

    pub fn description(&self) -> Option<String> {
        self.region.read_str(self.col.st(self.region).description)
    }

    pub fn column_type(&self) -> ColumnType {
        self.col.column_type(self.region)
    }

    pub fn data_type(&self) -> DataType {
        self.col.data_type(self.region)
    }

    pub fn measure_type(&self) -> MeasureType {
        self.col.measure_type(self.region)
    }

    pub fn auto_measure(&self) -> bool {
        self.col.st(self.region).auto_measure != 0
    }

    pub fn active(&self) -> bool {
        self.col.st(self.region).active != 0
    }

    pub fn trim_levels(&self) -> bool {
        self.col.st(self.region).trim_levels != 0
    }

    pub fn dps(&self) -> u8 {
        self.col.st(self.region).dps
    }

    pub fn row_count(&self) -> usize {
        self.col.st(self.region).row_count as usize
    }

    /// Mutation counter; collaborators compare it against a remembered
    /// value to detect that the column has been touched.
    pub fn changes(&self) -> u32 {
        self.col.st(self.region).changes
    }

    pub fn formula(&self) -> Option<String> {
        self.region.read_str(self.col.st(self.region).formula)
    }

    pub fn formula_message(&self) -> Option<String> {
        self.region
            .read_str(self.col.st(self.region).formula_message)
    }

    pub fn level_count(&self) -> usize {
        self.col.level_count(self.region)
    }

    pub fn levels(&self) -> Vec<LevelData> {
        self.col.levels(self.region)
    }

    /// Levels with at least one occurrence among unfiltered rows.
    /// Valid after the dataset's filter state has been refreshed.
    pub fn levels_ex_filtered(&self) -> Vec<LevelData> {
        self.levels()
            .into_iter()
            .filter(|l| l.count_ex_filtered > 0)
            .collect()
    }

    pub fn has_unused_levels(&self) -> bool {
        self.levels().iter().any(|l| l.count_ex_filtered == 0)
    }

    pub fn get_label(&self, value: i32) -> Result<String> {
        self.col.get_label(self.region, value)
    }

    pub fn get_import_value(&self, value: i32) -> Result<String> {
        self.col.get_import_value(self.region, value)
    }

    pub fn value_for_label(&self, label: &str) -> Result<i32> {
        self.col.value_for_label(self.region, label)
    }

    pub fn has_level(&self, label: &str) -> bool {
        self.col.has_level_label(self.region, label)
    }

    pub fn has_level_value(&self, value: i32) -> bool {
        self.col.level_index(self.region, value).is_some()
    }

    pub fn missing_values(&self) -> Vec<MissingValue> {
        self.col.missing_values(self.region)
    }

    pub fn ivalue(&self, row: usize) -> Result<i32> {
        self.col.ivalue(self.region, row)
    }

    pub fn dvalue(&self, row: usize) -> Result<f64> {
        self.col.dvalue(self.region, row)
    }

    pub fn svalue(&self, row: usize) -> Result<Option<String>> {
        self.col.svalue(self.region, row)
    }

    pub fn should_treat_as_missing(&self, row: usize) -> Result<bool> {
        self.col.should_treat_as_missing(self.region, row)
    }
}

/// Writer view over one column, borrowed from its dataset writer.
pub struct ColumnW<'a> {
    pub(crate) ds: &'a mut DataSetW,
    pub(crate) col: ColRef,
    pub(crate) index: usize,
}

impl<'a> ColumnW<'a> {
    fn r(&self) -> &Region {
        self.ds.region()
    }

    fn bump(&mut self) {
        let mut st = self.col.st(self.ds.region());
        st.changes = st.changes.wrapping_add(1);
        self.ds.region_mut().write(self.col.0, st);
    }

    pub fn id(&self) -> i32 {
        self.col.st(self.r()).id
    }

    pub fn name(&self) -> String {
        self.col.name(self.r())
    }

    pub fn column_type(&self) -> ColumnType {
        self.col.column_type(self.r())
    }

    pub fn data_type(&self) -> DataType {
        self.col.data_type(self.r())
    }

    pub fn measure_type(&self) -> MeasureType {
        self.col.measure_type(self.r())
    }

    pub fn row_count(&self) -> usize {
        self.col.st(self.r()).row_count as usize
    }

    pub fn changes(&self) -> u32 {
        self.col.st(self.r()).changes
    }

    pub fn trim_levels(&self) -> bool {
        self.col.st(self.r()).trim_levels != 0
    }

    pub fn dps(&self) -> u8 {
        self.col.st(self.r()).dps
    }

    pub fn level_count(&self) -> usize {
        self.col.level_count(self.r())
    }

    pub fn levels(&self) -> Vec<LevelData> {
        self.col.levels(self.r())
    }

    pub fn get_label(&self, value: i32) -> Result<String> {
        self.col.get_label(self.r(), value)
    }

    pub fn value_for_label(&self, label: &str) -> Result<i32> {
        self.col.value_for_label(self.r(), label)
    }

    pub fn has_level(&self, label: &str) -> bool {
        self.col.has_level_label(self.r(), label)
    }

    pub fn has_level_value(&self, value: i32) -> bool {
        self.col.level_index(self.r(), value).is_some()
    }

    pub fn missing_values(&self) -> Vec<MissingValue> {
        self.col.missing_values(self.r())
    }

    pub fn ivalue(&self, row: usize) -> Result<i32> {
        self.col.ivalue(self.r(), row)
    }

    pub fn dvalue(&self, row: usize) -> Result<f64> {
        self.col.dvalue(self.r(), row)
    }

    pub fn svalue(&self, row: usize) -> Result<Option<String>> {
        self.col.svalue(self.r(), row)
    }

    pub fn should_treat_as_missing(&self, row: usize) -> Result<bool> {
        self.col.should_treat_as_missing(self.r(), row)
    }

    // ---- metadata mutators ----

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let off = self.ds.region_mut().alloc_str(name)?;
        let mut st = self.col.st(self.ds.region());
        st.name = off;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
        Ok(())
    }

    pub fn set_import_name(&mut self, name: &str) -> Result<()> {
        let off = self.ds.region_mut().alloc_str(name)?;
        let mut st = self.col.st(self.ds.region());
        st.import_name = off;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
        Ok(())
    }

    pub fn set_description(&mut self, description: Option<&str>) -> Result<()> {
        let off = match description {
            Some(text) => self.ds.region_mut().alloc_str(text)?,
            None => Str::NULL,
        };
        let mut st = self.col.st(self.ds.region());
        st.description = off;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
        Ok(())
    }

    pub fn set_column_type(&mut self, column_type: ColumnType) {
        let mut st = self.col.st(self.ds.region());
        st.column_type = column_type as u8;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
    }

    pub fn set_auto_measure(&mut self, yes: bool) {
        let mut st = self.col.st(self.ds.region());
        st.auto_measure = yes as u8;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
    }

    pub fn set_active(&mut self, active: bool) {
        let mut st = self.col.st(self.ds.region());
        st.active = active as u8;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
    }

    pub fn set_trim_levels(&mut self, trim: bool) {
        let mut st = self.col.st(self.ds.region());
        st.trim_levels = trim as u8;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
    }

    pub fn set_dps(&mut self, dps: u8) {
        let mut st = self.col.st(self.ds.region());
        st.dps = dps;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
    }

    /// Representation changes route through the type state machine.
    pub fn set_data_type(&mut self, data_type: DataType) -> Result<()> {
        self.change_dm_type(Some(data_type), None)
    }

    pub fn set_measure_type(&mut self, measure_type: MeasureType) -> Result<()> {
        self.change_dm_type(None, Some(measure_type))
    }

    pub fn set_formula(&mut self, value: &str) -> Result<()> {
        let st = self.col.st(self.ds.region());
        let needed = 4 + value.len() as u32;
        if st.formula.is_null() || needed > st.formula_capacity {
            // Pad generously so small edits keep reusing the buffer.
            let capacity = needed.next_power_of_two().max(32);
            let addr = self.ds.region_mut().allocate_bytes(capacity as u64)?;
            let off = Str::new(addr);
            self.ds.region_mut().write_str_in_place(off, value);
            let mut st = self.col.st(self.ds.region());
            st.formula = off;
            st.formula_capacity = capacity;
            st.changes += 1;
            self.ds.region_mut().write(self.col.0, st);
        } else {
            self.ds.region_mut().write_str_in_place(st.formula, value);
            self.bump();
        }
        Ok(())
    }

    pub fn set_formula_message(&mut self, value: &str) -> Result<()> {
        let st = self.col.st(self.ds.region());
        let needed = 4 + value.len() as u32;
        if st.formula_message.is_null() || needed > st.formula_message_capacity {
            let capacity = needed.next_power_of_two().max(32);
            let addr = self.ds.region_mut().allocate_bytes(capacity as u64)?;
            let off = Str::new(addr);
            self.ds.region_mut().write_str_in_place(off, value);
            let mut st = self.col.st(self.ds.region());
            st.formula_message = off;
            st.formula_message_capacity = capacity;
            st.changes += 1;
            self.ds.region_mut().write(self.col.0, st);
        } else {
            self.ds
                .region_mut()
                .write_str_in_place(st.formula_message, value);
            self.bump();
        }
        Ok(())
    }

    pub fn set_missing_values(&mut self, rules: &[MissingValue]) -> Result<()> {
        let mut st = self.col.st(self.ds.region());
        if rules.len() as u32 > st.missing_capacity {
            let capacity = (rules.len() as u32).max(4);
            st.missing_values = self
                .ds
                .region_mut()
                .allocate::<MissingValueStruct>(capacity as usize)?;
            st.missing_capacity = capacity;
        }
        for (i, rule) in rules.iter().enumerate() {
            let encoded = match rule {
                MissingValue::Int { value, .. } => MissingValueStruct {
                    kind: rule.kind_byte(),
                    op: rule.op() as u8,
                    _pad: [0; 2],
                    ivalue: *value,
                    dvalue: 0.0,
                    svalue: Str::NULL,
                },
                MissingValue::Double { value, .. } => MissingValueStruct {
                    kind: rule.kind_byte(),
                    op: rule.op() as u8,
                    _pad: [0; 2],
                    ivalue: 0,
                    dvalue: *value,
                    svalue: Str::NULL,
                },
                MissingValue::Str { value, .. } => MissingValueStruct {
                    kind: rule.kind_byte(),
                    op: rule.op() as u8,
                    _pad: [0; 2],
                    ivalue: 0,
                    dvalue: 0.0,
                    svalue: self.ds.region_mut().alloc_str(value)?,
                },
            };
            self.ds.region_mut().write(st.missing_values.at(i), encoded);
        }
        st.missing_used = rules.len() as u32;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
        Ok(())
    }

    // ---- level table ----

    pub fn append_level(
        &mut self,
        value: i32,
        label: &str,
        import_value: Option<&str>,
    ) -> Result<()> {
        let mut st = self.col.st(self.ds.region());
        if st.levels_used + 1 >= st.levels_capacity {
            let new_cap = if st.levels_capacity == 0 {
                INITIAL_LEVEL_CAPACITY
            } else {
                st.levels_capacity * 2
            };
            let new_levels = self.ds.region_mut().allocate::<LevelStruct>(new_cap as usize)?;
            for i in 0..st.levels_used as usize {
                let l: LevelStruct = self.ds.region().read(st.levels.at(i));
                self.ds.region_mut().write(new_levels.at(i), l);
            }
            st.levels = new_levels;
            st.levels_capacity = new_cap;
        }

        let label_off = self.ds.region_mut().alloc_str(label)?;
        let import_off = match import_value {
            Some(iv) => self.ds.region_mut().alloc_str(iv)?,
            None => label_off,
        };
        let entry = LevelStruct {
            value,
            count: 0,
            count_ex_filtered: 0,
            treat_as_missing: 0,
            _pad: [0; 3],
            label: label_off,
            import_value: import_off,
        };
        self.ds
            .region_mut()
            .write(st.levels.at(st.levels_used as usize), entry);
        st.levels_used += 1;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
        Ok(())
    }

    /// Append, then walk the new entry into position if the existing
    /// sequence was strictly ascending or strictly descending. A
    /// sequence that is neither stays unordered and the new entry is
    /// left at the end; a sequence that is both (zero or one entries)
    /// counts as ascending.
    pub fn insert_level(
        &mut self,
        value: i32,
        label: &str,
        import_value: Option<&str>,
    ) -> Result<()> {
        self.append_level(value, label, import_value)?;

        let mut st = self.col.st(self.ds.region());
        let last = st.levels_used as usize - 1;
        let base: LevelStruct = self.ds.region().read(st.levels.at(last));

        let mut ascending = true;
        let mut descending = true;
        for i in 0..last.saturating_sub(1) {
            let a: LevelStruct = self.ds.region().read(st.levels.at(i));
            let b: LevelStruct = self.ds.region().read(st.levels.at(i + 1));
            if ascending && a.value > b.value {
                ascending = false;
            }
            if descending && a.value < b.value {
                descending = false;
            }
        }
        if ascending && descending {
            descending = false;
        }

        if ascending || descending {
            let mut inserted = false;
            let mut i = last as isize - 1;
            while i >= 0 {
                let level: LevelStruct = self.ds.region().read(st.levels.at(i as usize));
                debug_assert_ne!(level.value, value);
                if (ascending && level.value > value) || (descending && level.value < value) {
                    self.ds.region_mut().write(st.levels.at(i as usize + 1), level);
                } else {
                    self.ds
                        .region_mut()
                        .write(st.levels.at(i as usize + 1), base);
                    inserted = true;
                    break;
                }
                i -= 1;
            }
            if !inserted {
                self.ds.region_mut().write(st.levels.at(0), base);
            }
        }

        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
        Ok(())
    }

    /// Remove a level. The level must exist; a miss means the count
    /// bookkeeping has already diverged, which is fatal. For TEXT
    /// columns all greater codes are renumbered down by one and every
    /// affected cell is rewritten, keeping codes dense.
    pub fn remove_level(&mut self, value: i32) {
        let index = self
            .col
            .level_index(self.ds.region(), value)
            .expect("remove_level: level not found");

        let mut st = self.col.st(self.ds.region());
        for i in index..st.levels_used as usize - 1 {
            let next: LevelStruct = self.ds.region().read(st.levels.at(i + 1));
            self.ds.region_mut().write(st.levels.at(i), next);
        }
        st.levels_used -= 1;

        let renumber = self.col.data_type(self.ds.region()) == DataType::Text
            && self.col.measure_type(self.ds.region()) != MeasureType::Id;
        if renumber {
            for i in index..st.levels_used as usize {
                let mut l: LevelStruct = self.ds.region().read(st.levels.at(i));
                l.value -= 1;
                self.ds.region_mut().write(st.levels.at(i), l);
            }
            for row in 0..st.row_count as usize {
                let v = cells::get_i32(self.ds.region(), self.col.0, row);
                if v != MISSING_INT && v > value {
                    cells::set_i32(self.ds.region_mut(), self.col.0, row, v - 1);
                }
            }
        }

        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
    }

    pub fn clear_levels(&mut self) {
        let mut st = self.col.st(self.ds.region());
        st.levels_used = 0;
        st.changes += 1;
        self.ds.region_mut().write(self.col.0, st);
    }

    /// Recompute `count` and `count_ex_filtered` for every level with
    /// one full-column scan. Must run after bulk rewrites and after
    /// any filter state change.
    pub fn update_level_counts(&mut self) -> Result<()> {
        if !self.col.has_level_table(self.ds.region()) {
            return Ok(());
        }
        let st = self.col.st(self.ds.region());
        let rows = st.row_count as usize;

        let mut filtered = Vec::with_capacity(rows);
        for row in 0..rows {
            filtered.push(row_is_filtered(self.ds.region(), row)?);
        }

        for i in 0..st.levels_used as usize {
            let mut l: LevelStruct = self.ds.region().read(st.levels.at(i));
            l.count = 0;
            l.count_ex_filtered = 0;
            self.ds.region_mut().write(st.levels.at(i), l);
        }

        for (row, row_filtered) in filtered.iter().enumerate() {
            let v = cells::get_i32(self.ds.region(), self.col.0, row);
            if let Some(i) = self.col.level_index(self.ds.region(), v) {
                let mut l: LevelStruct = self.ds.region().read(st.levels.at(i));
                l.count += 1;
                if !row_filtered {
                    l.count_ex_filtered += 1;
                }
                self.ds.region_mut().write(st.levels.at(i), l);
            }
        }
        Ok(())
    }

    /// Remove every level whose count is zero.
    pub fn trim_unused_levels(&mut self) {
        loop {
            let unused = self
                .levels()
                .into_iter()
                .find(|l| l.count == 0)
                .map(|l| l.value);
            match unused {
                Some(value) => self.remove_level(value),
                None => break,
            }
        }
    }

    /// Recode the column against a caller-supplied target level list.
    ///
    /// INTEGER: clears and reinserts the target levels, then blanks
    /// cells whose value has no target level. TEXT: maps old codes to
    /// new dense codes by exact label match and rewrites every cell
    /// through the mapping (no match becomes missing).
    pub fn set_levels(&mut self, target: &[LevelData]) -> Result<()> {
        match self.data_type() {
            DataType::Decimal => Ok(()),
            DataType::Integer => {
                self.clear_levels();
                for l in target {
                    self.insert_level(l.value, &l.label, Some(&l.import_value))?;
                    self.set_level_treat_as_missing(l.value, l.treat_as_missing);
                }
                let keep: Vec<i32> = target.iter().map(|l| l.value).collect();
                let rows = self.row_count();
                for row in 0..rows {
                    let v = cells::get_i32(self.ds.region(), self.col.0, row);
                    if v != MISSING_INT && !keep.contains(&v) {
                        cells::set_i32(self.ds.region_mut(), self.col.0, row, MISSING_INT);
                    }
                }
                self.update_level_counts()
            }
            DataType::Text => {
                let old = self.levels();
                let mut map: HashMap<i32, i32> = HashMap::new();
                for (new_index, tgt) in target.iter().enumerate() {
                    if let Some(o) = old.iter().find(|o| o.label == tgt.label) {
                        map.insert(o.value, new_index as i32);
                    }
                }
                self.clear_levels();
                for (i, tgt) in target.iter().enumerate() {
                    self.append_level(i as i32, &tgt.label, Some(&tgt.import_value))?;
                    self.set_level_treat_as_missing(i as i32, tgt.treat_as_missing);
                }
                let rows = self.row_count();
                for row in 0..rows {
                    let v = cells::get_i32(self.ds.region(), self.col.0, row);
                    let mapped = if v == MISSING_INT {
                        MISSING_INT
                    } else {
                        map.get(&v).copied().unwrap_or(MISSING_INT)
                    };
                    cells::set_i32(self.ds.region_mut(), self.col.0, row, mapped);
                }
                self.update_level_counts()
            }
        }
    }

    fn set_level_treat_as_missing(&mut self, value: i32, treat: bool) {
        if let Some(i) = self.col.level_index(self.ds.region(), value) {
            let st = self.col.st(self.ds.region());
            let mut l: LevelStruct = self.ds.region().read(st.levels.at(i));
            l.treat_as_missing = treat as u8;
            self.ds.region_mut().write(st.levels.at(i), l);
        }
    }

    // ---- typed setters ----

    /// Set an integer cell, keeping level counts in step. Fresh values
    /// of INTEGER columns get a level auto-inserted; a value whose
    /// count drops to zero is removed when `trim_levels` is on.
    pub fn set_i_value(&mut self, row: usize, value: i32) -> Result<()> {
        self.col.check_row(self.ds.region(), row)?;
        debug_assert_eq!(self.col.repr(self.ds.region()), CellRepr::Int32);
        if !self.col.has_level_table(self.ds.region()) {
            let old = cells::get_i32(self.ds.region(), self.col.0, row);
            if old != value {
                cells::set_i32(self.ds.region_mut(), self.col.0, row, value);
                self.bump();
            }
            return Ok(());
        }
        if value != MISSING_INT
            && self.data_type() == DataType::Integer
            && self.col.level_index(self.ds.region(), value).is_none()
        {
            self.insert_level(value, &value.to_string(), None)?;
        }
        self.set_code(row, value)
    }

    /// Set a decimal cell; NaN is the missing value.
    pub fn set_d_value(&mut self, row: usize, value: f64) -> Result<()> {
        self.col.check_row(self.ds.region(), row)?;
        debug_assert_eq!(self.col.repr(self.ds.region()), CellRepr::Float64);
        cells::set_f64(self.ds.region_mut(), self.col.0, row, value);
        self.bump();
        Ok(())
    }

    /// Set a string cell. `None` and the empty string are missing.
    /// For TEXT columns with a level table the string becomes a dense
    /// level code, inserting a new level on first use; ID columns
    /// store the string itself.
    pub fn set_s_value(&mut self, row: usize, value: Option<&str>) -> Result<()> {
        self.col.check_row(self.ds.region(), row)?;
        let value = value.filter(|s| !s.is_empty());
        match self.col.repr(self.ds.region()) {
            CellRepr::StrHandle => {
                let handle = match value {
                    Some(s) => self.ds.region_mut().alloc_str(s)?.to_u64(),
                    None => 0,
                };
                cells::set_handle(self.ds.region_mut(), self.col.0, row, handle);
                self.bump();
                Ok(())
            }
            CellRepr::Int32 => {
                debug_assert_eq!(self.data_type(), DataType::Text);
                let code = match value {
                    None => MISSING_INT,
                    Some(s) => match self.col.value_for_label(self.ds.region(), s) {
                        Ok(code) => code,
                        Err(_) => {
                            // Codes are dense, so the next code is the
                            // current level count.
                            let next = self.level_count();
                            if next > i32::MAX as usize {
                                return Err(StoreError::TooManyLevels);
                            }
                            let code = next as i32;
                            self.append_level(code, s, None)?;
                            code
                        }
                    },
                };
                self.set_code(row, code)
            }
            CellRepr::Float64 => {
                let parsed = value.and_then(|s| s.parse::<f64>().ok());
                self.set_d_value(row, parsed.unwrap_or(f64::NAN))
            }
        }
    }

    /// Write a level-coded cell and maintain counts incrementally:
    /// increment the new value's counts, write the cell, then
    /// decrement the old value's counts, removing it if the count hits
    /// zero and trimming is on. The removal runs last so any TEXT code
    /// renumbering also covers the cell just written.
    fn set_code(&mut self, row: usize, value: i32) -> Result<()> {
        let old = cells::get_i32(self.ds.region(), self.col.0, row);
        if old == value {
            return Ok(());
        }
        let row_filtered = row_is_filtered(self.ds.region(), row)?;

        if value != MISSING_INT {
            if let Some(i) = self.col.level_index(self.ds.region(), value) {
                let st = self.col.st(self.ds.region());
                let mut l: LevelStruct = self.ds.region().read(st.levels.at(i));
                l.count += 1;
                if !row_filtered {
                    l.count_ex_filtered += 1;
                }
                self.ds.region_mut().write(st.levels.at(i), l);
            }
        }

        cells::set_i32(self.ds.region_mut(), self.col.0, row, value);

        if old != MISSING_INT {
            if let Some(i) = self.col.level_index(self.ds.region(), old) {
                let st = self.col.st(self.ds.region());
                let mut l: LevelStruct = self.ds.region().read(st.levels.at(i));
                l.count = l.count.saturating_sub(1);
                if !row_filtered {
                    l.count_ex_filtered = l.count_ex_filtered.saturating_sub(1);
                }
                self.ds.region_mut().write(st.levels.at(i), l);
                if l.count == 0 && self.trim_levels() {
                    self.remove_level(old);
                }
            }
        }

        self.bump();
        Ok(())
    }

    // ---- bulk row mutation (driven by the dataset writer) ----

    pub(crate) fn insert_rows(&mut self, start: usize, end: usize) -> Result<()> {
        let count = end - start + 1;
        let start_count = self.row_count();
        let final_count = start_count + count;
        let repr = self.col.repr(self.ds.region());

        cells::set_row_count(self.ds.region_mut(), self.col.0, repr, final_count)?;
        for j in (end + 1..final_count).rev() {
            cells::copy_cell(self.ds.region_mut(), self.col.0, repr, j - count, j);
        }
        for j in start..=end {
            cells::clear_cell(self.ds.region_mut(), self.col.0, repr, j);
        }
        self.bump();
        Ok(())
    }

    pub(crate) fn delete_rows(&mut self, start: usize, end: usize) -> Result<()> {
        let count = end - start + 1;
        let start_count = self.row_count();
        let final_count = start_count - count;
        let repr = self.col.repr(self.ds.region());

        for j in start..final_count {
            cells::copy_cell(self.ds.region_mut(), self.col.0, repr, j + count, j);
        }
        for j in final_count..start_count {
            cells::clear_cell(self.ds.region_mut(), self.col.0, repr, j);
        }
        cells::set_row_count(self.ds.region_mut(), self.col.0, repr, final_count)?;
        self.bump();
        Ok(())
    }

    // ---- type state machine ----

    /// Change the column's data and/or measure type.
    ///
    /// Unspecified halves of the target are inferred: DECIMAL implies
    /// CONTINUOUS; a continuous column moving to a non-decimal type
    /// becomes NOMINAL; requesting CONTINUOUS on a TEXT column implies
    /// DECIMAL. A target equal to the current type is a no-op.
    ///
    /// When the physical representation changes, the live storage is
    /// staged into the dataset's scratch slot, fresh storage is
    /// allocated under the same id and position, and values, levels
    /// and missing rules are converted across. Changing straight back
    /// reuses the scratch storage wholesale, restoring the original
    /// cell values exactly.
    pub fn change_dm_type(
        &mut self,
        data_type: Option<DataType>,
        measure_type: Option<MeasureType>,
    ) -> Result<()> {
        let old_data = self.data_type();
        let old_measure = self.measure_type();

        let target_data = match data_type {
            Some(d) => d,
            None => match measure_type {
                Some(MeasureType::Continuous) if old_data == DataType::Text => DataType::Decimal,
                _ => old_data,
            },
        };
        let target_measure = if target_data == DataType::Decimal {
            MeasureType::Continuous
        } else {
            match measure_type {
                Some(m) => m,
                None => {
                    if old_measure == MeasureType::Continuous {
                        MeasureType::Nominal
                    } else {
                        old_measure
                    }
                }
            }
        };

        if target_data == old_data && target_measure == old_measure {
            return Ok(());
        }

        debug!(
            column = %self.name(),
            ?old_data, ?old_measure, ?target_data, ?target_measure,
            "column type change"
        );

        // Measure-only moves within one representation keep storage.
        if target_data == old_data
            && cell_repr(old_data, old_measure) == cell_repr(target_data, target_measure)
        {
            let had_levels = has_level_table(old_data, old_measure);
            let wants_levels = has_level_table(target_data, target_measure);
            let mut st = self.col.st(self.ds.region());
            st.measure_type = target_measure as u8;
            st.changes += 1;
            self.ds.region_mut().write(self.col.0, st);
            if had_levels && !wants_levels {
                self.clear_levels();
            } else if !had_levels && wants_levels {
                self.synthesize_integer_levels()?;
                self.update_level_counts()?;
            }
            return Ok(());
        }

        // Changing straight back: the scratch slot already holds this
        // column in the target representation.
        if self
            .ds
            .scratch_matches(self.id(), target_data as u8, target_measure as u8)
        {
            self.ds.exchange_with_scratch(self.index);
            self.col = ColRef(self.ds.column_offset(self.index));
            self.bump();
            return Ok(());
        }

        let rows = self.row_count();
        let src = ColRef(self.ds.stage_to_scratch(self.index)?);
        self.col = ColRef(self.ds.column_offset(self.index));

        let mut st = self.col.st(self.ds.region());
        st.data_type = target_data as u8;
        st.measure_type = target_measure as u8;
        self.ds.region_mut().write(self.col.0, st);

        cells::reset_storage(self.ds.region_mut(), self.col.0)?;
        let repr = cell_repr(target_data, target_measure);
        cells::set_row_count(self.ds.region_mut(), self.col.0, repr, rows)?;

        self.transfer_from(src, old_data, old_measure, target_data, target_measure)?;
        self.update_level_counts()?;
        if self.trim_levels() {
            self.trim_unused_levels();
        }
        self.bump();
        Ok(())
    }

    /// Build levels for an INTEGER column from its distinct stored
    /// values, ascending.
    fn synthesize_integer_levels(&mut self) -> Result<()> {
        let rows = self.row_count();
        let mut distinct = Vec::new();
        for row in 0..rows {
            let v = cells::get_i32(self.ds.region(), self.col.0, row);
            if v != MISSING_INT && !distinct.contains(&v) {
                distinct.push(v);
            }
        }
        distinct.sort_unstable();
        for v in distinct {
            self.append_level(v, &v.to_string(), None)?;
        }
        Ok(())
    }

    /// String rendering of a source cell during a type change.
    fn source_string(
        &self,
        src: ColRef,
        src_data: DataType,
        row: usize,
        dps: u8,
    ) -> Option<String> {
        let r = self.ds.region();
        match src_data {
            DataType::Text => match src.repr(r) {
                CellRepr::StrHandle => {
                    let handle = cells::get_handle(r, src.0, row);
                    if handle == 0 {
                        None
                    } else {
                        r.read_str(Str::new(handle))
                    }
                }
                _ => {
                    let v = cells::get_i32(r, src.0, row);
                    if v == MISSING_INT {
                        None
                    } else {
                        src.get_label(r, v).ok()
                    }
                }
            },
            DataType::Integer => {
                let v = cells::get_i32(r, src.0, row);
                if v == MISSING_INT {
                    None
                } else {
                    match src.level_index(r, v) {
                        Some(i) => r.read_str(src.level_at(r, i).label),
                        None => Some(v.to_string()),
                    }
                }
            }
            DataType::Decimal => {
                let d = cells::get_f64(r, src.0, row);
                if d.is_nan() {
                    None
                } else {
                    Some(format_decimal(d, dps))
                }
            }
        }
    }

    /// Convert values and levels from the staged source column into
    /// the (freshly sized) live column. Missing stays missing in every
    /// combination.
    fn transfer_from(
        &mut self,
        src: ColRef,
        src_data: DataType,
        src_measure: MeasureType,
        dst_data: DataType,
        dst_measure: MeasureType,
    ) -> Result<()> {
        let rows = self.row_count();
        let dps = self.dps();
        let src_levels = src.levels(self.ds.region());
        let src_had_levels = has_level_table(src_data, src_measure);

        match dst_data {
            DataType::Decimal => {
                for row in 0..rows {
                    let d = match src_data {
                        DataType::Decimal => cells::get_f64(self.ds.region(), src.0, row),
                        DataType::Integer => {
                            let v = cells::get_i32(self.ds.region(), src.0, row);
                            if v == MISSING_INT {
                                f64::NAN
                            } else {
                                v as f64
                            }
                        }
                        DataType::Text => self
                            .source_string(src, src_data, row, dps)
                            .and_then(|s| s.parse::<f64>().ok())
                            .unwrap_or(f64::NAN),
                    };
                    cells::set_f64(self.ds.region_mut(), self.col.0, row, d);
                }
            }

            DataType::Integer => {
                let wants_levels = has_level_table(dst_data, dst_measure);
                // A TEXT level maps across when its import value (or
                // label) parses as an integer.
                let mut text_map: HashMap<i32, i32> = HashMap::new();
                if wants_levels {
                    match src_data {
                        DataType::Integer if src_had_levels => {
                            for l in &src_levels {
                                self.append_level(l.value, &l.label, Some(&l.import_value))?;
                            }
                        }
                        DataType::Text if src_had_levels => {
                            for l in &src_levels {
                                let parsed = l
                                    .import_value
                                    .parse::<i32>()
                                    .or_else(|_| l.label.parse::<i32>());
                                if let Ok(v) = parsed {
                                    self.insert_level(v, &l.label, Some(&l.import_value))?;
                                    text_map.insert(l.value, v);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                for row in 0..rows {
                    let v = match src_data {
                        DataType::Integer => cells::get_i32(self.ds.region(), src.0, row),
                        DataType::Decimal => {
                            let d = cells::get_f64(self.ds.region(), src.0, row);
                            if d.is_nan()
                                || d.fract() != 0.0
                                || d < i32::MIN as f64 + 1.0
                                || d > i32::MAX as f64
                            {
                                MISSING_INT
                            } else {
                                d as i32
                            }
                        }
                        DataType::Text => {
                            let code = match src.repr(self.ds.region()) {
                                CellRepr::Int32 => cells::get_i32(self.ds.region(), src.0, row),
                                _ => MISSING_INT,
                            };
                            if src_had_levels && code != MISSING_INT {
                                text_map.get(&code).copied().unwrap_or(MISSING_INT)
                            } else {
                                self.source_string(src, src_data, row, dps)
                                    .and_then(|s| s.parse::<i32>().ok())
                                    .unwrap_or(MISSING_INT)
                            }
                        }
                    };
                    if wants_levels
                        && v != MISSING_INT
                        && self.col.level_index(self.ds.region(), v).is_none()
                    {
                        self.insert_level(v, &v.to_string(), None)?;
                    }
                    cells::set_i32(self.ds.region_mut(), self.col.0, row, v);
                }
            }

            DataType::Text => {
                if dst_measure == MeasureType::Id {
                    for row in 0..rows {
                        let handle = match self.source_string(src, src_data, row, dps) {
                            Some(s) => self.ds.region_mut().alloc_str(&s)?.to_u64(),
                            None => 0,
                        };
                        cells::set_handle(self.ds.region_mut(), self.col.0, row, handle);
                    }
                } else {
                    // Dense codes. Carry source levels across in
                    // order; synthesize from values when the source
                    // had none.
                    let mut map: HashMap<i32, i32> = HashMap::new();
                    if src_had_levels {
                        for (i, l) in src_levels.iter().enumerate() {
                            self.append_level(i as i32, &l.label, Some(&l.import_value))?;
                            map.insert(l.value, i as i32);
                        }
                        for row in 0..rows {
                            let code = cells::get_i32(self.ds.region(), src.0, row);
                            let mapped = if code == MISSING_INT {
                                MISSING_INT
                            } else {
                                map.get(&code).copied().unwrap_or(MISSING_INT)
                            };
                            cells::set_i32(self.ds.region_mut(), self.col.0, row, mapped);
                        }
                    } else {
                        let mut labels: Vec<String> = Vec::new();
                        for row in 0..rows {
                            if let Some(s) = self.source_string(src, src_data, row, dps) {
                                if !labels.contains(&s) {
                                    labels.push(s);
                                }
                            }
                        }
                        if src_data != DataType::Text {
                            // Numeric sources get their synthesized
                            // levels in value order.
                            labels.sort_by(|a, b| {
                                let pa = a.parse::<f64>().unwrap_or(f64::MAX);
                                let pb = b.parse::<f64>().unwrap_or(f64::MAX);
                                pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
                            });
                        }
                        for (i, label) in labels.iter().enumerate() {
                            self.append_level(i as i32, label, None)?;
                        }
                        for row in 0..rows {
                            let code = match self.source_string(src, src_data, row, dps) {
                                Some(s) => labels
                                    .iter()
                                    .position(|l| l == &s)
                                    .map(|i| i as i32)
                                    .unwrap_or(MISSING_INT),
                                None => MISSING_INT,
                            };
                            cells::set_i32(self.ds.region_mut(), self.col.0, row, code);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
