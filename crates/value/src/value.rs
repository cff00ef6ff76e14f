use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};

/// An opaque structured record stored in a document revision. The engine
/// never interprets the contents of a `Value`; it only ever reads the
/// fields an index definition projects out of it (see
/// `common::index::IndexKeyFields`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Project a top-level field out of an object value. Used by index key
    /// derivation; missing fields sort as `Value::Null`.
    pub fn get_field(&self, field: &str) -> Value {
        match self {
            Value::Object(fields) => fields.get(field).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// A total order over `Value` used to build index keys. Each variant
    /// gets a leading type tag so that index keys derived from
    /// heterogeneous fields still sort deterministically.
    pub fn sort_key(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_sort_key(&mut out);
        out
    }

    fn write_sort_key(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(0),
            Value::Bool(b) => {
                out.push(1);
                out.push(*b as u8);
            },
            Value::Int64(n) => {
                out.push(2);
                // Flip the sign bit so two's-complement negative values sort
                // before positive ones under plain byte comparison.
                out.extend_from_slice(&(*n as u64 ^ 0x8000_0000_0000_0000).to_be_bytes());
            },
            Value::Float64(f) => {
                out.push(3);
                let bits = f.to_bits();
                // IEEE-754 total ordering as unsigned bytes: negative
                // numbers (sign bit set) sort in reverse, so flip every bit;
                // non-negative numbers just need the sign bit set.
                let transformed = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
                out.extend_from_slice(&transformed.to_be_bytes());
            },
            Value::String(s) => {
                out.push(4);
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            },
            Value::Bytes(b) => {
                out.push(5);
                out.extend_from_slice(b);
                out.push(0);
            },
            Value::Array(items) => {
                out.push(6);
                for item in items {
                    item.write_sort_key(out);
                }
            },
            Value::Object(fields) => {
                out.push(7);
                for (key, value) in fields {
                    out.extend_from_slice(key.as_bytes());
                    out.push(0);
                    value.write_sort_key(out);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_int64_sorts_before_positive() {
        assert!(Value::Int64(-1).sort_key() < Value::Int64(1).sort_key());
        assert!(Value::Int64(i64::MIN).sort_key() < Value::Int64(i64::MAX).sort_key());
        assert!(Value::Int64(-5).sort_key() < Value::Int64(-1).sort_key());
    }

    #[test]
    fn negative_float64_sorts_before_positive() {
        assert!(Value::Float64(-1.5).sort_key() < Value::Float64(1.5).sort_key());
        assert!(Value::Float64(f64::NEG_INFINITY).sort_key() < Value::Float64(f64::INFINITY).sort_key());
        assert!(Value::Float64(-2.0).sort_key() < Value::Float64(-1.0).sort_key());
    }
}
