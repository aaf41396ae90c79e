//! CDR payload decoding driven by a [`MessageDefinition`].
//!
//! ROS 2 messages recorded in MCAP use the OMG CDR encoding: a four-byte
//! encapsulation header selects the byte order, then each field follows in
//! definition order, aligned to its own size relative to the end of the
//! header. Octet arrays (`uint8[]`, `byte[]`, `char[]`) are returned as
//! slices borrowed from the input so image buffers are never copied.

use std::collections::BTreeMap;

use crate::error::ConvertError;
use crate::message_definition::{Arity, FieldType, MessageDefinition, MessageType, Primitive};

const ENCAPSULATION_HEADER_SIZE: usize = 4;
const MAX_NESTING_DEPTH: usize = 32;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(&'a [u8]),
    Array(Vec<Value<'a>>),
    Struct(BTreeMap<String, Value<'a>>),
}

impl<'a> Value<'a> {
    /// Field of a struct value.
    pub fn field(&self, name: &str) -> Option<&Value<'a>> {
        match self {
            Value::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Follow a dotted path such as `header.stamp.sec`.
    pub fn path(&self, path: &str) -> Option<&Value<'a>> {
        path.split('.').try_fold(self, |value, name| value.field(name))
    }

    /// Integer view of a numeric (or numeric string) value.
    ///
    /// Floats are truncated toward zero; non-finite floats yield `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            Value::Bytes(bytes) => Some(*bytes),
            _ => None,
        }
    }
}

/// Decode a CDR-encoded message of the definition's root type.
///
/// # Errors
///
/// Returns [`ConvertError::Cdr`] on truncated input, unsupported
/// encapsulation kinds, invalid UTF-8 strings, or unresolved nested types.
pub fn decode<'a>(
    definition: &MessageDefinition,
    data: &'a [u8],
) -> Result<Value<'a>, ConvertError> {
    let mut reader = CdrReader::new(data)?;
    reader.read_struct(definition, definition.root(), 0)
}

struct CdrReader<'a> {
    data: &'a [u8],
    position: usize,
    little_endian: bool,
}

impl<'a> CdrReader<'a> {
    fn new(data: &'a [u8]) -> Result<Self, ConvertError> {
        if data.len() < ENCAPSULATION_HEADER_SIZE {
            return Err(ConvertError::Cdr("payload shorter than encapsulation header".into()));
        }
        let little_endian = match (data[0], data[1]) {
            (0x00, 0x00) => false,
            (0x00, 0x01) => true,
            (high, low) => {
                return Err(ConvertError::Cdr(format!(
                    "unsupported encapsulation kind 0x{high:02x}{low:02x}"
                )));
            }
        };
        Ok(Self {
            data,
            position: ENCAPSULATION_HEADER_SIZE,
            little_endian,
        })
    }

    fn align(&mut self, size: usize) {
        let offset = self.position - ENCAPSULATION_HEADER_SIZE;
        let padding = (size - offset % size) % size;
        self.position += padding;
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ConvertError> {
        let end = self
            .position
            .checked_add(count)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                ConvertError::Cdr(format!(
                    "unexpected end of payload reading {count} bytes at offset {}",
                    self.position
                ))
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], ConvertError> {
        self.align(N);
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(self.take(N)?);
        if self.little_endian == cfg!(target_endian = "big") {
            bytes.reverse();
        }
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, ConvertError> {
        Ok(u32::from_ne_bytes(self.fixed::<4>()?))
    }

    fn read_primitive(&mut self, primitive: Primitive) -> Result<Value<'a>, ConvertError> {
        Ok(match primitive {
            Primitive::Bool => Value::Bool(self.take(1)?[0] != 0),
            Primitive::Byte | Primitive::Char | Primitive::UInt8 => {
                Value::UInt(u64::from(self.take(1)?[0]))
            }
            Primitive::Int8 => Value::Int(i64::from(self.take(1)?[0] as i8)),
            Primitive::Int16 => Value::Int(i64::from(i16::from_ne_bytes(self.fixed()?))),
            Primitive::UInt16 => Value::UInt(u64::from(u16::from_ne_bytes(self.fixed()?))),
            Primitive::Int32 => Value::Int(i64::from(i32::from_ne_bytes(self.fixed()?))),
            Primitive::UInt32 => Value::UInt(u64::from(u32::from_ne_bytes(self.fixed()?))),
            Primitive::Int64 => Value::Int(i64::from_ne_bytes(self.fixed()?)),
            Primitive::UInt64 => Value::UInt(u64::from_ne_bytes(self.fixed()?)),
            Primitive::Float32 => Value::Float(f64::from(f32::from_ne_bytes(self.fixed()?))),
            Primitive::Float64 => Value::Float(f64::from_ne_bytes(self.fixed()?)),
        })
    }

    fn read_string(&mut self) -> Result<Value<'a>, ConvertError> {
        let length = self.read_u32()? as usize;
        if length == 0 {
            return Ok(Value::String(String::new()));
        }
        let bytes = self.take(length)?;
        // The length includes the NUL terminator.
        let text = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        let text = std::str::from_utf8(text)
            .map_err(|e| ConvertError::Cdr(format!("invalid UTF-8 string: {e}")))?;
        Ok(Value::String(text.to_string()))
    }

    fn read_element(
        &mut self,
        definition: &MessageDefinition,
        field_type: &FieldType,
        depth: usize,
    ) -> Result<Value<'a>, ConvertError> {
        match field_type {
            FieldType::Primitive(primitive) => self.read_primitive(*primitive),
            FieldType::String => self.read_string(),
            FieldType::Complex(name) => {
                let nested = definition.resolve(name).ok_or_else(|| {
                    ConvertError::Cdr(format!("unresolved nested type {name}"))
                })?;
                self.read_struct(definition, nested, depth + 1)
            }
        }
    }

    fn read_struct(
        &mut self,
        definition: &MessageDefinition,
        message_type: &MessageType,
        depth: usize,
    ) -> Result<Value<'a>, ConvertError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(ConvertError::Cdr(format!(
                "message nesting deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }

        let mut fields = BTreeMap::new();
        for field in &message_type.fields {
            let value = match field.arity {
                Arity::Single => self.read_element(definition, &field.field_type, depth)?,
                Arity::Fixed(count) => {
                    self.read_array(definition, &field.field_type, count, depth)?
                }
                Arity::Sequence => {
                    let count = self.read_u32()? as usize;
                    self.read_array(definition, &field.field_type, count, depth)?
                }
            };
            fields.insert(field.name.clone(), value);
        }
        Ok(Value::Struct(fields))
    }

    fn read_array(
        &mut self,
        definition: &MessageDefinition,
        field_type: &FieldType,
        count: usize,
        depth: usize,
    ) -> Result<Value<'a>, ConvertError> {
        if let FieldType::Primitive(primitive) = field_type {
            if primitive.is_octet() {
                return Ok(Value::Bytes(self.take(count)?));
            }
            // Cheap sanity check before allocating for a corrupt length.
            let needed = count.saturating_mul(primitive.size());
            if needed > self.data.len().saturating_sub(self.position) {
                return Err(ConvertError::Cdr(format!(
                    "array of {count} elements exceeds payload size"
                )));
            }
        }

        let mut values = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            values.push(self.read_element(definition, field_type, depth)?);
        }
        Ok(Value::Array(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(text: &str) -> MessageDefinition {
        MessageDefinition::parse("test_msgs/Sample", text).unwrap()
    }

    #[test]
    fn decodes_aligned_little_endian_fields() {
        let mut data = vec![0x00, 0x01, 0x00, 0x00];
        data.push(7); // uint8 a
        data.extend_from_slice(&[0, 0, 0]); // pad to 4
        data.extend_from_slice(&42u32.to_le_bytes()); // uint32 b
        data.extend_from_slice(&3u32.to_le_bytes()); // string length incl NUL
        data.extend_from_slice(b"hi\0");
        data.push(0); // pad to 4
        data.extend_from_slice(&2u32.to_le_bytes()); // uint8[] length
        data.extend_from_slice(&[9, 8]);

        let value = decode(
            &definition("uint8 a\nuint32 b\nstring name\nuint8[] data\n"),
            &data,
        )
        .unwrap();
        assert_eq!(value.field("a").and_then(Value::as_i64), Some(7));
        assert_eq!(value.field("b").and_then(Value::as_i64), Some(42));
        assert_eq!(value.field("name").and_then(Value::as_str), Some("hi"));
        assert_eq!(value.field("data").and_then(Value::as_bytes), Some(&[9u8, 8][..]));
    }

    #[test]
    fn decodes_big_endian() {
        let mut data = vec![0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(&(-5i32).to_be_bytes());
        let value = decode(&definition("int32 x\n"), &data).unwrap();
        assert_eq!(value.field("x").and_then(Value::as_i64), Some(-5));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let data = vec![0x00, 0x01, 0x00, 0x00, 1, 2];
        assert!(decode(&definition("uint32 x\n"), &data).is_err());
    }

    #[test]
    fn rejects_unknown_encapsulation() {
        let data = vec![0x00, 0x03, 0x00, 0x00, 0, 0, 0, 0];
        assert!(decode(&definition("uint32 x\n"), &data).is_err());
    }

    #[test]
    fn nested_path_lookup() {
        let mut data = vec![0x00, 0x01, 0x00, 0x00];
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        let value = decode(&definition("time stamp\n"), &data).unwrap();
        assert_eq!(value.path("stamp.sec").and_then(Value::as_i64), Some(1));
        assert_eq!(value.path("stamp.nanosec").and_then(Value::as_i64), Some(2));
        assert!(value.path("stamp.missing").is_none());
    }
}
