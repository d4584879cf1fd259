//! The row value union and its wire encodings.
use bytes::{BufMut, Bytes, BytesMut};

use super::{Oid, oid};

/// A single cell value produced by the backend.
///
/// Encoders are keyed off the tag, not the column oid, so a backend that
/// reports a column as text but produces numerics still round-trips.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// Canonical numeric string, passed through unmodified.
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    /// ISO-8601 date, already formatted by the backend.
    Date(String),
    /// ISO-8601 timestamp, already formatted by the backend.
    Timestamp(String),
    /// ISO-8601 timestamp with a UTC offset, already formatted by the
    /// backend; distinct from [`Value::Timestamp`] so column descriptors
    /// report `timestamptz` on the wire.
    TimestampTz(String),
    Vector(Vec<f32>),
}

impl Value {
    /// The oid this value would naturally describe as.
    pub fn natural_oid(&self) -> Oid {
        match self {
            Value::Null => oid::UNKNOWN,
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) => oid::TEXT,
            Value::Bytes(_) => oid::BYTEA,
            Value::Date(_) => oid::DATE,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Vector(_) => oid::TEXT,
        }
    }

    /// Encode in the text format every PostgreSQL client accepts.
    ///
    /// `None` is the SQL NULL cell.
    pub fn encode_text(&self) -> Option<Bytes> {
        let mut itoa = itoa::Buffer::new();
        Some(match self {
            Value::Null => return None,
            Value::Bool(true) => Bytes::from_static(b"t"),
            Value::Bool(false) => Bytes::from_static(b"f"),
            Value::Int2(v) => Bytes::copy_from_slice(itoa.format(*v).as_bytes()),
            Value::Int4(v) => Bytes::copy_from_slice(itoa.format(*v).as_bytes()),
            Value::Int8(v) => Bytes::copy_from_slice(itoa.format(*v).as_bytes()),
            // Display for floats is the shortest round-trip form
            Value::Float4(v) => Bytes::from(v.to_string().into_bytes()),
            Value::Float8(v) => Bytes::from(v.to_string().into_bytes()),
            Value::Numeric(v) => Bytes::copy_from_slice(v.as_bytes()),
            Value::Text(v) => Bytes::copy_from_slice(v.as_bytes()),
            Value::Bytes(v) => {
                let mut out = BytesMut::with_capacity(2 + v.len() * 2);
                out.put_slice(b"\\x");
                for b in v {
                    const HEX: &[u8; 16] = b"0123456789abcdef";
                    out.put_u8(HEX[(b >> 4) as usize]);
                    out.put_u8(HEX[(b & 0xf) as usize]);
                }
                out.freeze()
            }
            Value::Date(v) | Value::Timestamp(v) | Value::TimestampTz(v) => {
                Bytes::copy_from_slice(v.as_bytes())
            }
            Value::Vector(v) => {
                let mut out = String::with_capacity(2 + v.len() * 8);
                out.push('[');
                for (i, f) in v.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&f.to_string());
                }
                out.push(']');
                Bytes::from(out.into_bytes())
            }
        })
    }

    /// Encode in the binary format, falling back to text for types whose
    /// binary form this server does not produce.
    pub fn encode_binary(&self) -> Option<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Value::Null => return None,
            Value::Bool(v) => buf.put_u8(*v as u8),
            Value::Int2(v) => buf.put_i16(*v),
            Value::Int4(v) => buf.put_i32(*v),
            Value::Int8(v) => buf.put_i64(*v),
            Value::Float4(v) => buf.put_f32(*v),
            Value::Float8(v) => buf.put_f64(*v),
            Value::Bytes(v) => buf.put_slice(v),
            other => return other.encode_text(),
        }
        Some(buf.freeze())
    }

    /// Encode per the RowDescription format code: 0 text, 1 binary.
    pub fn encode(&self, format: i16) -> Option<Bytes> {
        match format {
            1 => self.encode_binary(),
            _ => self.encode_text(),
        }
    }

    /// The text form a value takes when inlined into SQL sent to the
    /// backend, single-quoted where the type requires it.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".into(),
            Value::Bool(true) => "1".into(),
            Value::Bool(false) => "0".into(),
            Value::Int2(v) => v.to_string(),
            Value::Int4(v) => v.to_string(),
            Value::Int8(v) => v.to_string(),
            Value::Float4(v) => v.to_string(),
            Value::Float8(v) => v.to_string(),
            Value::Numeric(v) => v.clone(),
            Value::Text(v) | Value::Date(v) | Value::Timestamp(v) | Value::TimestampTz(v) => {
                format!("'{}'", v.replace('\'', "''"))
            }
            Value::Bytes(v) => {
                let mut out = String::with_capacity(3 + v.len() * 2);
                out.push_str("x'");
                for b in v {
                    out.push_str(&format!("{b:02x}"));
                }
                out.push('\'');
                out
            }
            Value::Vector(v) => {
                let mut out = String::from("'[");
                for (i, f) in v.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&f.to_string());
                }
                out.push_str("]'");
                out
            }
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int4(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bool_text_encoding() {
        assert_eq!(Value::Bool(true).encode_text().unwrap(), &b"t"[..]);
        assert_eq!(Value::Bool(false).encode_text().unwrap(), &b"f"[..]);
    }

    #[test]
    fn null_is_none() {
        assert!(Value::Null.encode_text().is_none());
        assert!(Value::Null.encode_binary().is_none());
    }

    #[test]
    fn int_text_encoding() {
        assert_eq!(Value::Int4(-7).encode_text().unwrap(), &b"-7"[..]);
        assert_eq!(Value::Int8(1 << 40).encode_text().unwrap(), &b"1099511627776"[..]);
    }

    #[test]
    fn float_shortest_round_trip() {
        assert_eq!(Value::Float8(0.1).encode_text().unwrap(), &b"0.1"[..]);
        assert_eq!(Value::Float4(2.5).encode_text().unwrap(), &b"2.5"[..]);
    }

    #[test]
    fn binary_int4() {
        assert_eq!(
            Value::Int4(0x01020304).encode_binary().unwrap(),
            &[1u8, 2, 3, 4][..],
        );
    }

    #[test]
    fn bytea_hex_escape() {
        assert_eq!(
            Value::Bytes(vec![0xde, 0xad]).encode_text().unwrap(),
            &b"\\xdead"[..],
        );
    }

    #[test]
    fn timestamp_variants_keep_distinct_oids() {
        let plain = Value::Timestamp("2024-01-15 10:30:00".into());
        let zoned = Value::TimestampTz("2024-01-15 10:30:00+00".into());
        assert_eq!(plain.natural_oid(), crate::types::oid::TIMESTAMP);
        assert_eq!(zoned.natural_oid(), crate::types::oid::TIMESTAMPTZ);
        assert_eq!(
            zoned.encode_text().unwrap(),
            &b"2024-01-15 10:30:00+00"[..],
        );
    }

    #[test]
    fn vector_text_keeps_brackets() {
        let v = Value::Vector(vec![0.1, 0.2]);
        assert_eq!(v.encode_text().unwrap(), &b"[0.1,0.2]"[..]);
    }

    #[test]
    fn sql_literal_quoting() {
        assert_eq!(Value::Text("o'clock".into()).to_sql_literal(), "'o''clock'");
        assert_eq!(Value::Int4(5).to_sql_literal(), "5");
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
    }
}
