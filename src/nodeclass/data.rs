//! Non-edge data fields of node types.
//!
//! Data values take part in value numbering: two nodes of a value-numberable
//! type are interchangeable only when their data compares equal. Floating
//! point values compare by bit pattern so that equality agrees with the hash.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::error::{GraphError, Result};

const VALUE_NUMBER_MULTIPLIER: u64 = 13;
const TRUE_HASH: u64 = 7;

/// Declared kind of a data field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// `bool`
    Bool,
    /// `i8`
    Byte,
    /// `i16`
    Short,
    /// UTF-16 code unit.
    Char,
    /// `i32`
    Int,
    /// `i64`
    Long,
    /// `f32`
    Float,
    /// `f64`
    Double,
    /// Shared string, nullable.
    Str,
    /// `i32` array, nullable.
    IntArray,
    /// `i64` array, nullable.
    LongArray,
    /// Byte array, nullable.
    ByteArray,
    /// `f64` array, nullable.
    DoubleArray,
    /// Arbitrary nested value, nullable.
    Object,
}

impl DataKind {
    /// Returns true if the kind holds a reference that may be null.
    pub fn is_nullable(self) -> bool {
        !matches!(
            self,
            DataKind::Bool
                | DataKind::Byte
                | DataKind::Short
                | DataKind::Char
                | DataKind::Int
                | DataKind::Long
                | DataKind::Float
                | DataKind::Double
        )
    }

    /// Value a freshly created node holds for this kind.
    pub fn default_value(self) -> DataValue {
        match self {
            DataKind::Bool => DataValue::Bool(false),
            DataKind::Byte => DataValue::Byte(0),
            DataKind::Short => DataValue::Short(0),
            DataKind::Char => DataValue::Char(0),
            DataKind::Int => DataValue::Int(0),
            DataKind::Long => DataValue::Long(0),
            DataKind::Float => DataValue::Float(0.0),
            DataKind::Double => DataValue::Double(0.0),
            _ => DataValue::Null,
        }
    }

    fn name(self) -> &'static str {
        match self {
            DataKind::Bool => "bool",
            DataKind::Byte => "byte",
            DataKind::Short => "short",
            DataKind::Char => "char",
            DataKind::Int => "int",
            DataKind::Long => "long",
            DataKind::Float => "float",
            DataKind::Double => "double",
            DataKind::Str => "string",
            DataKind::IntArray => "int[]",
            DataKind::LongArray => "long[]",
            DataKind::ByteArray => "byte[]",
            DataKind::DoubleArray => "double[]",
            DataKind::Object => "object",
        }
    }

    fn accepts(self, value: &DataValue) -> bool {
        match (self, value) {
            (kind, DataValue::Null) => kind.is_nullable(),
            (DataKind::Bool, DataValue::Bool(_))
            | (DataKind::Byte, DataValue::Byte(_))
            | (DataKind::Short, DataValue::Short(_))
            | (DataKind::Char, DataValue::Char(_))
            | (DataKind::Int, DataValue::Int(_))
            | (DataKind::Long, DataValue::Long(_))
            | (DataKind::Float, DataValue::Float(_))
            | (DataKind::Double, DataValue::Double(_))
            | (DataKind::Str, DataValue::Str(_))
            | (DataKind::IntArray, DataValue::Ints(_))
            | (DataKind::LongArray, DataValue::Longs(_))
            | (DataKind::ByteArray, DataValue::Bytes(_))
            | (DataKind::DoubleArray, DataValue::Doubles(_))
            | (DataKind::Object, _) => true,
            _ => false,
        }
    }
}

/// Value stored in a data field.
#[derive(Clone, Debug)]
pub enum DataValue {
    /// Absent reference.
    Null,
    /// Boolean.
    Bool(bool),
    /// Byte.
    Byte(i8),
    /// Short.
    Short(i16),
    /// Char.
    Char(u16),
    /// Int.
    Int(i32),
    /// Long.
    Long(i64),
    /// Float.
    Float(f32),
    /// Double.
    Double(f64),
    /// String.
    Str(Arc<str>),
    /// Int array.
    Ints(Arc<[i32]>),
    /// Long array.
    Longs(Arc<[i64]>),
    /// Byte array.
    Bytes(Arc<[u8]>),
    /// Double array.
    Doubles(Arc<[f64]>),
    /// Nested tuple of values.
    Tuple(Arc<[DataValue]>),
}

impl DataValue {
    /// Contribution of this value to a value number.
    pub fn value_hash(&self) -> u64 {
        match self {
            DataValue::Null => 0,
            DataValue::Bool(b) => {
                if *b {
                    TRUE_HASH
                } else {
                    0
                }
            }
            DataValue::Byte(v) => *v as i64 as u64,
            DataValue::Short(v) => *v as i64 as u64,
            DataValue::Char(v) => *v as u64,
            DataValue::Int(v) => *v as i64 as u64,
            DataValue::Long(v) => fold(*v as u64),
            DataValue::Float(v) => v.to_bits() as u64,
            DataValue::Double(v) => fold(v.to_bits()),
            _ => {
                let mut hasher = FxHasher::default();
                self.hash(&mut hasher);
                hasher.finish()
            }
        }
    }

    /// Returns the int payload, if any.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            DataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the long payload, if any.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DataValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[inline]
fn fold(bits: u64) -> u64 {
    bits ^ (bits >> 32)
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        use DataValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Ints(a), Ints(b)) => a == b,
            (Longs(a), Longs(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Doubles(a), Doubles(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Tuple(a), Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            DataValue::Null => {}
            DataValue::Bool(v) => v.hash(state),
            DataValue::Byte(v) => v.hash(state),
            DataValue::Short(v) => v.hash(state),
            DataValue::Char(v) => v.hash(state),
            DataValue::Int(v) => v.hash(state),
            DataValue::Long(v) => v.hash(state),
            DataValue::Float(v) => v.to_bits().hash(state),
            DataValue::Double(v) => v.to_bits().hash(state),
            DataValue::Str(v) => v.hash(state),
            DataValue::Ints(v) => v.hash(state),
            DataValue::Longs(v) => v.hash(state),
            DataValue::Bytes(v) => v.hash(state),
            DataValue::Doubles(v) => {
                v.len().hash(state);
                for d in v.iter() {
                    d.to_bits().hash(state);
                }
            }
            DataValue::Tuple(v) => v.hash(state),
        }
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<i32> for DataValue {
    fn from(value: i32) -> Self {
        DataValue::Int(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Long(value)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Double(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Str(Arc::from(value))
    }
}

/// Named data field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataField {
    /// Field name.
    pub name: String,
    /// Declared kind.
    pub kind: DataKind,
}

/// Ordered catalog of the data fields of a type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataLayout {
    fields: Vec<DataField>,
}

impl DataLayout {
    pub(crate) fn build(type_name: &str, fields: Vec<DataField>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|other| other.name == field.name) {
                return Err(GraphError::layout(
                    type_name,
                    format!("duplicate data field {}", field.name),
                ));
            }
        }
        Ok(Self { fields })
    }

    /// Number of data fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the type carries no data.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[DataField] {
        &self.fields
    }

    /// Index of the field with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Default values for every field.
    pub fn defaults(&self) -> Vec<DataValue> {
        self.fields.iter().map(|f| f.kind.default_value()).collect()
    }

    /// Checks that `value` may be stored in field `index`.
    pub fn check(&self, type_name: &str, index: usize, value: &DataValue) -> Result<()> {
        match self.fields.get(index) {
            Some(field) if field.kind.accepts(value) => Ok(()),
            Some(field) => Err(GraphError::DataMismatch {
                type_name: type_name.to_string(),
                field: index,
                expected: field.kind.name(),
            }),
            None => Err(GraphError::DataMismatch {
                type_name: type_name.to_string(),
                field: index,
                expected: "an existing field",
            }),
        }
    }

    /// Checks a complete set of values against the layout.
    pub fn check_all(&self, type_name: &str, values: &[DataValue]) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(GraphError::DataMismatch {
                type_name: type_name.to_string(),
                field: values.len().min(self.fields.len()),
                expected: "one value per data field",
            });
        }
        for (i, value) in values.iter().enumerate() {
            self.check(type_name, i, value)?;
        }
        Ok(())
    }

    /// Folds the values into a value number starting from `seed`.
    pub fn value_number(seed: u64, values: &[DataValue]) -> u64 {
        values.iter().fold(seed, |number, value| {
            number
                .wrapping_add(value.value_hash())
                .wrapping_mul(VALUE_NUMBER_MULTIPLIER)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_number_distinguishes_order() {
        let a = DataLayout::value_number(1, &[DataValue::Int(1), DataValue::Int(2)]);
        let b = DataLayout::value_number(1, &[DataValue::Int(2), DataValue::Int(1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn floats_compare_by_bits() {
        assert_eq!(DataValue::Double(f64::NAN), DataValue::Double(f64::NAN));
        assert_ne!(DataValue::Double(0.0), DataValue::Double(-0.0));
        assert_ne!(
            DataValue::Double(0.0).value_hash(),
            DataValue::Double(-0.0).value_hash()
        );
    }

    #[test]
    fn arrays_compare_deeply() {
        let a = DataValue::Ints(Arc::from(vec![1, 2, 3]));
        let b = DataValue::Ints(Arc::from(vec![1, 2, 3]));
        assert_eq!(a, b);
        assert_eq!(a.value_hash(), b.value_hash());
    }

    #[test]
    fn primitive_fields_reject_null() {
        let layout = DataLayout::build(
            "Const",
            vec![DataField {
                name: "value".into(),
                kind: DataKind::Int,
            }],
        )
        .unwrap();
        assert!(layout.check("Const", 0, &DataValue::Null).is_err());
        assert!(layout.check("Const", 0, &DataValue::Long(1)).is_err());
        assert!(layout.check("Const", 0, &DataValue::Int(1)).is_ok());
        assert!(layout.check("Const", 1, &DataValue::Int(1)).is_err());
    }
}
