//! Register data types and values
//!
//! Register payloads are untyped on the wire; the caller names the type it expects and the
//! payload is interpreted accordingly. All multi-byte values are big-endian.

use serde::{Deserialize, Serialize};

use crate::{IcpError, Result};

/// Supported register data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// 32-bit IEEE 754
    Float,
    /// 64-bit IEEE 754
    Double,
    /// Text, stripped to printable characters on decode
    String,
    /// Payload bytes as received
    Raw,
}

impl DataType {
    /// Returns the size in bytes of fixed-width types, `None` for `String` and `Raw`.
    pub const fn size(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Double => Some(8),
            DataType::String | DataType::Raw => None,
        }
    }

    /// Interpret a response payload as this type.
    ///
    /// Devices may echo the 4-byte register header ahead of the data, so fixed-width values
    /// are read from the final bytes of the payload.
    pub fn decode(&self, payload: &[u8]) -> Result<Value> {
        Ok(match self {
            DataType::Int8 => Value::Int8(i8::from_be_bytes(tail(*self, payload)?)),
            DataType::Int16 => Value::Int16(i16::from_be_bytes(tail(*self, payload)?)),
            DataType::Int32 => Value::Int32(i32::from_be_bytes(tail(*self, payload)?)),
            DataType::Int64 => Value::Int64(i64::from_be_bytes(tail(*self, payload)?)),
            DataType::UInt8 => Value::UInt8(u8::from_be_bytes(tail(*self, payload)?)),
            DataType::UInt16 => Value::UInt16(u16::from_be_bytes(tail(*self, payload)?)),
            DataType::UInt32 => Value::UInt32(u32::from_be_bytes(tail(*self, payload)?)),
            DataType::UInt64 => Value::UInt64(u64::from_be_bytes(tail(*self, payload)?)),
            DataType::Float => Value::Float(f32::from_be_bytes(tail(*self, payload)?)),
            DataType::Double => Value::Double(f64::from_be_bytes(tail(*self, payload)?)),
            DataType::String => Value::String(printable(payload)),
            DataType::Raw => Value::Raw(payload.to_vec()),
        })
    }
}

/// Last `N` bytes of `payload`.
fn tail<const N: usize>(data_type: DataType, payload: &[u8]) -> Result<[u8; N]> {
    payload
        .len()
        .checked_sub(N)
        .and_then(|start| payload[start..].try_into().ok())
        .ok_or_else(|| {
            IcpError::type_conversion(format!(
                "{:?} needs {} bytes, payload has {}",
                data_type,
                N,
                payload.len()
            ))
        })
}

/// Runtime value of a register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Raw(Vec<u8>),
}

impl Value {
    /// The data type this value encodes as.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt8(_) => DataType::UInt8,
            Value::UInt16(_) => DataType::UInt16,
            Value::UInt32(_) => DataType::UInt32,
            Value::UInt64(_) => DataType::UInt64,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Raw(_) => DataType::Raw,
        }
    }

    /// Big-endian wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int8(v) => v.to_be_bytes().to_vec(),
            Value::Int16(v) => v.to_be_bytes().to_vec(),
            Value::Int32(v) => v.to_be_bytes().to_vec(),
            Value::Int64(v) => v.to_be_bytes().to_vec(),
            Value::UInt8(v) => v.to_be_bytes().to_vec(),
            Value::UInt16(v) => v.to_be_bytes().to_vec(),
            Value::UInt32(v) => v.to_be_bytes().to_vec(),
            Value::UInt64(v) => v.to_be_bytes().to_vec(),
            Value::Float(v) => v.to_be_bytes().to_vec(),
            Value::Double(v) => v.to_be_bytes().to_vec(),
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Raw(bytes) => bytes.clone(),
        }
    }

    /// Numeric view of the value, `None` for text and raw bytes.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Int8(v) => Some(v as f64),
            Value::Int16(v) => Some(v as f64),
            Value::Int32(v) => Some(v as f64),
            Value::Int64(v) => Some(v as f64),
            Value::UInt8(v) => Some(v as f64),
            Value::UInt16(v) => Some(v as f64),
            Value::UInt32(v) => Some(v as f64),
            Value::UInt64(v) => Some(v as f64),
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            Value::String(_) | Value::Raw(_) => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float, f64 => Double, String => String, Vec<u8> => Raw,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// Keep printable ASCII plus CR, LF and TAB.
fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| (32..127).contains(&b) || matches!(b, b'\r' | b'\n' | b'\t'))
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_big_endian_float() {
        let payload = 3.14f32.to_be_bytes();
        assert_eq!(DataType::Float.decode(&payload).unwrap(), Value::Float(3.14));
    }

    #[test]
    fn fixed_width_reads_trailing_bytes() {
        // echoed register header 0x2122 / reserved / subindex 1, then the value
        let mut payload = vec![0x21, 0x22, 0x00, 0x01];
        payload.extend_from_slice(&(-1234i32).to_be_bytes());
        assert_eq!(DataType::Int32.decode(&payload).unwrap(), Value::Int32(-1234));
    }

    #[test]
    fn short_payload_is_a_conversion_error() {
        let err = DataType::Double.decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, IcpError::TypeConversion { .. }));
    }

    #[test]
    fn strings_are_stripped_to_printable() {
        let value = DataType::String.decode(b"Volts\0\x07\r\n").unwrap();
        assert_eq!(value, Value::String("Volts\r\n".to_string()));
        assert_eq!(DataType::Raw.decode(&[0, 1, 2]).unwrap(), Value::Raw(vec![0, 1, 2]));
    }

    proptest! {
        #[test]
        fn prop_values_decode_as_their_own_type(v in any::<i64>(), f in any::<f64>().prop_filter("nan", |f| !f.is_nan())) {
            for value in [Value::Int64(v), Value::Double(f), Value::Int16(v as i16), Value::UInt32(v as u32)] {
                let bytes = value.to_bytes();
                prop_assert_eq!(value.data_type().size(), Some(bytes.len()));
                prop_assert_eq!(value.data_type().decode(&bytes).unwrap(), value);
            }
        }
    }
}
