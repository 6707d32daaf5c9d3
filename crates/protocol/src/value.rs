//! Typed values carried in container bodies.

use serde::{Deserialize, Serialize};

/// A single typed value.
///
/// Serialization uses serde's externally-tagged enum form, so a `U16` stays
/// a `U16` after a round-trip instead of collapsing into a generic number.
/// `Container` nests further named values and may recurse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Container(Vec<NamedValue>),
}

/// A name/value pair. Bodies keep insertion order and allow duplicate names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl Value {
    /// Short kind name, used in logs and mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Container(_) => "container",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Value::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Entries of a nested container.
    pub fn entries(&self) -> Option<&[NamedValue]> {
        match self {
            Value::Container(entries) => Some(entries),
            _ => None,
        }
    }

    /// Coerces any unsigned or non-negative signed numeric kind to `u64`.
    pub fn to_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => Some(v),
            Value::I8(v) => u64::try_from(v).ok(),
            Value::I16(v) => u64::try_from(v).ok(),
            Value::I32(v) => u64::try_from(v).ok(),
            Value::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Coerces any numeric kind that fits to `i64`.
    pub fn to_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Coerces any numeric kind to `f64`.
    pub fn to_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v.into()),
            Value::F64(v) => Some(v),
            _ => self
                .to_i64()
                .map(|v| v as f64)
                .or_else(|| self.to_u64().map(|v| v as f64)),
        }
    }

    /// First nested entry with the given name (containers only).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries()?
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.value)
    }

    /// All nested entries with the given name, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&Value> {
        match self.entries() {
            Some(entries) => entries
                .iter()
                .filter(|entry| entry.name == name)
                .map(|entry| &entry.value)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_survives_json_roundtrip() {
        let values = vec![
            Value::Bool(true),
            Value::I8(-3),
            Value::U16(77),
            Value::U64(u64::MAX),
            Value::F64(0.25),
            Value::String("path".into()),
            Value::Bytes(vec![0, 1, 255]),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value, "roundtrip changed {json}");
        }
    }

    #[test]
    fn accessors_reject_wrong_kind() {
        let v = Value::String("42".into());
        assert!(v.as_u16().is_none());
        assert!(v.as_bool().is_none());
        assert!(v.to_u64().is_none());
        assert_eq!(v.as_str(), Some("42"));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::U8(7).to_u64(), Some(7));
        assert_eq!(Value::I32(-1).to_u64(), None);
        assert_eq!(Value::U64(9).to_i64(), Some(9));
        assert_eq!(Value::I16(-5).to_i64(), Some(-5));
        assert_eq!(Value::U32(2).to_f64(), Some(2.0));
        assert_eq!(Value::F32(1.5).to_f64(), Some(1.5));
    }

    #[test]
    fn nested_container_lookup() {
        let file = Value::Container(vec![
            NamedValue::new("source", Value::String("/src/a".into())),
            NamedValue::new("target", Value::String("/dst/a".into())),
            NamedValue::new("target", Value::String("/dst/b".into())),
        ]);
        assert_eq!(file.get("source").and_then(Value::as_str), Some("/src/a"));
        let targets = file.get_all("target");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].as_str(), Some("/dst/a"));
        assert!(file.get("missing").is_none());
    }
}
