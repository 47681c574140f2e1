use std::convert::TryFrom;
use std::mem;
use serde::{Deserialize, Serialize};

use crate::error::{PmixError, Result};
use crate::types::Rank;

/// A tagged value as stored in the data store and carried on the wire.
///
/// A `Value` owns its payload, nested arrays included. Crossing an ownership boundary happens
/// in exactly one of two ways: [`Value::transfer`] moves the payload out, `clone` makes an
/// independent copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// no value
    Undef,
    Bool(bool),
    Int(i64),
    Int32(i32),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Size(usize),
    Rank(Rank),
    String(String),
    /// opaque byte blob
    Bytes(Vec<u8>),
    /// a nested array of key/value records
    DataArray(Vec<Info>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Undef
    }
}

impl Value {
    /// moves the payload out of `self`, leaving `Value::Undef` behind
    pub fn transfer(&mut self) -> Value {
        mem::take(self)
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v as i128),
            Value::Int32(v) => Some(*v as i128),
            Value::Uint16(v) => Some(*v as i128),
            Value::Uint32(v) => Some(*v as i128),
            Value::Uint64(v) => Some(*v as i128),
            Value::Size(v) => Some(*v as i128),
            Value::Rank(Rank::Rank(r)) => Some(*r as i128),
            _ => None,
        }
    }

    /// extracts a number of type `T` from any of the integer variants
    ///
    /// # Errors
    /// `BadParam` if the value is not numeric or does not fit into `T`
    pub fn get_number<T: TryFrom<i128>>(&self) -> Result<T> {
        let n = self
            .as_i128()
            .ok_or_else(|| PmixError::BadParam(format!("value is not numeric: {:?}", self)))?;
        T::try_from(n).map_err(|_| PmixError::BadParam(format!("value {} is out of range", n)))
    }

    /// borrows the string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// borrows the nested records, if this is a data array
    pub fn as_array(&self) -> Option<&[Info]> {
        match self {
            Value::DataArray(a) => Some(a),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// A key paired with an owned value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kval {
    pub key: String,
    pub value: Value,
}

/// Qualifiers and data-array elements share the key/value shape.
pub type Info = Kval;

impl Kval {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Kval {
            key: key.into(),
            value: value.into(),
        }
    }

    /// true if this record carries the given key
    pub fn check_key(&self, key: &str) -> bool {
        self.key == key
    }

    /// Directive truthiness: an explicit boolean, or a directive given with no value at all.
    pub fn is_true(&self) -> bool {
        match self.value {
            Value::Bool(b) => b,
            Value::Undef => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_leaves_undef_behind() {
        let mut v = Value::DataArray(vec![Kval::new("a", 1u32)]);
        let moved = v.transfer();
        assert_eq!(v, Value::Undef);
        assert_eq!(moved.as_array().map(|a| a.len()), Some(1));
    }

    #[test]
    fn numbers_convert_between_widths() {
        assert_eq!(Value::Uint16(7).get_number::<u32>().unwrap(), 7);
        assert_eq!(Value::Size(42).get_number::<u32>().unwrap(), 42);
        assert!(Value::Int(-1).get_number::<u32>().is_err());
        assert!(Value::from("7").get_number::<u32>().is_err());
    }

    #[test]
    fn directive_truthiness() {
        assert!(Kval::new("x", true).is_true());
        assert!(!Kval::new("x", false).is_true());
        assert!(Kval { key: "x".into(), value: Value::Undef }.is_true());
        assert!(!Kval::new("x", 1u32).is_true());
    }
}
