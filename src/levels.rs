//! Level (category) snapshots and missing-value rules.

use crate::layout::{
    MissingValueStruct, MISSING_KIND_DOUBLE, MISSING_KIND_INT, MISSING_KIND_STRING,
};
use crate::region::Region;

/// Snapshot of one level entry, decoded out of the region.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelData {
    /// Cell value this level stands for. For TEXT columns this is the
    /// dense level code; for INTEGER columns the actual value.
    pub value: i32,
    pub label: String,
    /// Value as originally imported, kept verbatim.
    pub import_value: String,
    /// Occurrences across all rows.
    pub count: u32,
    /// Occurrences across rows surviving the filters.
    pub count_ex_filtered: u32,
    pub treat_as_missing: bool,
}

impl LevelData {
    pub fn new(value: i32, label: &str, import_value: &str) -> LevelData {
        LevelData {
            value,
            label: label.to_string(),
            import_value: import_value.to_string(),
            count: 0,
            count_ex_filtered: 0,
            treat_as_missing: false,
        }
    }
}

/// Comparison operator of a missing-value rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingValueOp {
    Eq = 0,
    Ne = 1,
    Le = 2,
    Ge = 3,
    Lt = 4,
    Gt = 5,
}

impl MissingValueOp {
    pub(crate) fn from_u8(value: u8) -> MissingValueOp {
        match value {
            1 => MissingValueOp::Ne,
            2 => MissingValueOp::Le,
            3 => MissingValueOp::Ge,
            4 => MissingValueOp::Lt,
            5 => MissingValueOp::Gt,
            _ => MissingValueOp::Eq,
        }
    }

    fn holds<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            MissingValueOp::Eq => lhs == rhs,
            MissingValueOp::Ne => lhs != rhs,
            MissingValueOp::Le => lhs <= rhs,
            MissingValueOp::Ge => lhs >= rhs,
            MissingValueOp::Lt => lhs < rhs,
            MissingValueOp::Gt => lhs > rhs,
        }
    }
}

/// One user-defined missing-value rule: a typed operand and an
/// operator. A cell is treated as missing when any rule matches one of
/// its decoded representations.
#[derive(Debug, Clone, PartialEq)]
pub enum MissingValue {
    Int { op: MissingValueOp, value: i32 },
    Double { op: MissingValueOp, value: f64 },
    Str { op: MissingValueOp, value: String },
}

impl MissingValue {
    /// Match against a row's decoded representations. String rules
    /// match the label or the import value; numeric rules match the
    /// numeric representations.
    pub(crate) fn matches(
        &self,
        ivalue: Option<i32>,
        dvalue: Option<f64>,
        svalue: Option<&str>,
        import_value: Option<&str>,
    ) -> bool {
        match self {
            MissingValue::Int { op, value } => match (ivalue, dvalue) {
                (Some(i), _) => op.holds(i, *value),
                (None, Some(d)) => op.holds(d, *value as f64),
                (None, None) => false,
            },
            MissingValue::Double { op, value } => match (dvalue, ivalue) {
                (Some(d), _) => op.holds(d, *value),
                (None, Some(i)) => op.holds(i as f64, *value),
                (None, None) => false,
            },
            MissingValue::Str { op, value } => {
                svalue.map(|s| op.holds(s, value.as_str())).unwrap_or(false)
                    || import_value
                        .map(|s| op.holds(s, value.as_str()))
                        .unwrap_or(false)
            }
        }
    }

    pub(crate) fn decode(region: &Region, st: MissingValueStruct) -> MissingValue {
        let op = MissingValueOp::from_u8(st.op);
        match st.kind {
            MISSING_KIND_DOUBLE => MissingValue::Double {
                op,
                value: st.dvalue,
            },
            MISSING_KIND_STRING => MissingValue::Str {
                op,
                value: region.read_str(st.svalue).unwrap_or_default(),
            },
            _ => MissingValue::Int {
                op,
                value: st.ivalue,
            },
        }
    }

    pub(crate) fn kind_byte(&self) -> u8 {
        match self {
            MissingValue::Int { .. } => MISSING_KIND_INT,
            MissingValue::Double { .. } => MISSING_KIND_DOUBLE,
            MissingValue::Str { .. } => MISSING_KIND_STRING,
        }
    }

    pub(crate) fn op(&self) -> MissingValueOp {
        match self {
            MissingValue::Int { op, .. }
            | MissingValue::Double { op, .. }
            | MissingValue::Str { op, .. } => *op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_rule_operators() {
        let rule = MissingValue::Int {
            op: MissingValueOp::Le,
            value: 0,
        };
        assert!(rule.matches(Some(-5), None, None, None));
        assert!(rule.matches(Some(0), None, None, None));
        assert!(!rule.matches(Some(3), None, None, None));
        // Falls back to the double representation.
        assert!(rule.matches(None, Some(-0.5), None, None));
        assert!(!rule.matches(None, None, None, None));
    }

    #[test]
    fn test_double_rule_against_int_cells() {
        let rule = MissingValue::Double {
            op: MissingValueOp::Gt,
            value: 99.5,
        };
        assert!(rule.matches(Some(100), None, None, None));
        assert!(!rule.matches(Some(99), None, None, None));
    }

    #[test]
    fn test_string_rule_matches_label_or_import() {
        let rule = MissingValue::Str {
            op: MissingValueOp::Eq,
            value: "N/A".to_string(),
        };
        assert!(rule.matches(None, None, Some("N/A"), None));
        assert!(rule.matches(None, None, Some("other"), Some("N/A")));
        assert!(!rule.matches(None, None, Some("other"), Some("else")));
        assert!(!rule.matches(None, None, None, None));
    }

    #[test]
    fn test_op_from_u8_defaults_to_eq() {
        assert_eq!(MissingValueOp::from_u8(0), MissingValueOp::Eq);
        assert_eq!(MissingValueOp::from_u8(5), MissingValueOp::Gt);
        assert_eq!(MissingValueOp::from_u8(200), MissingValueOp::Eq);
    }
}
