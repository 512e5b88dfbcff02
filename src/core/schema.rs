//! # Packet Schemas
//!
//! Declarative descriptions of packet bodies.
//!
//! A [`Schema`] is one of:
//! - **Scalar**: one cursor primitive ([`Scalar`])
//! - **List**: member schemas decoded in order into a positional [`Value::List`]
//! - **Record**: `(name, schema)` pairs decoded in order into a [`Record`]
//! - **Variant**: a [`TaggedVariant`] whose discriminant selects the record layout
//!
//! Field order is wire order; there are no optional fields. Decoding and
//! encoding walk the same declaration, so a value decoded from a buffer
//! encodes back to the same bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::core::cursor::{hex_dump, Cursor, Writer};
use crate::error::{ProtocolError, Result};

/// RakNet offline message identifier carried by unconnected packets
pub const OFFLINE_MESSAGE_ID: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];

/// Ordered collection of named values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(&'static str, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an existing one with the same name in place
    pub fn insert(&mut self, name: &'static str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: &'static str, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn require(&self, name: &'static str) -> Result<&Value> {
        self.get(name).ok_or(ProtocolError::MissingField(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(n, _)| *n)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i128),
    Float(f32),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Record(Record),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    fn mismatch(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_int(&self) -> Result<i128> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_float(&self) -> Result<f32> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(other.mismatch("float")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(v) => Ok(v),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(v) => Ok(v),
            other => Err(other.mismatch("bytes")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(v) => Ok(v),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_record(&self) -> Result<&Record> {
        match self {
            Value::Record(v) => Ok(v),
            other => Err(other.mismatch("record")),
        }
    }

    /// Positional member of a list value
    pub fn at(&self, index: usize) -> Result<&Value> {
        let list = self.as_list()?;
        list.get(index).ok_or_else(|| {
            ProtocolError::ValueOutOfRange(format!("index {index} of {}", list.len()))
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Record(record) => {
                write!(f, "{{")?;
                for (i, (name, value)) in record.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Single wire primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    U8,
    Bool,
    U16Be,
    U16Le,
    I16Be,
    I16Le,
    U24Le,
    I32Be,
    U32Be,
    U32Le,
    I64Be,
    F32Be,
    /// Unsigned varint up to 128 bits
    VarUint,
    /// Varint length + UTF-8
    VarString,
    /// u16 big-endian length + UTF-8
    ShortString,
    /// Varint length + raw bytes
    VarBytes,
    /// Everything left in the buffer
    Remaining,
    /// The 16-byte offline message identifier
    Magic,
    /// Four bitwise-inverted octets, rendered dotted-quad
    Ipv4,
    /// Sixteen raw octets, rendered as `:`-joined hex pairs
    Ipv6,
}

fn narrow<T: TryFrom<i128>>(value: i128, scalar: Scalar) -> Result<T> {
    T::try_from(value)
        .map_err(|_| ProtocolError::ValueOutOfRange(format!("{value} does not fit {scalar:?}")))
}

impl Scalar {
    pub fn decode(self, c: &mut Cursor<'_>) -> Result<Value> {
        Ok(match self {
            Scalar::U8 => Value::Int(c.read_u8()?.into()),
            Scalar::Bool => Value::Bool(c.read_bool()?),
            Scalar::U16Be => Value::Int(c.read_u16_be()?.into()),
            Scalar::U16Le => Value::Int(c.read_u16_le()?.into()),
            Scalar::I16Be => Value::Int(c.read_i16_be()?.into()),
            Scalar::I16Le => Value::Int(c.read_i16_le()?.into()),
            Scalar::U24Le => Value::Int(c.read_u24_le()?.into()),
            Scalar::I32Be => Value::Int(c.read_i32_be()?.into()),
            Scalar::U32Be => Value::Int(c.read_u32_be()?.into()),
            Scalar::U32Le => Value::Int(c.read_u32_le()?.into()),
            Scalar::I64Be => Value::Int(c.read_i64_be()?.into()),
            Scalar::F32Be => Value::Float(c.read_f32_be()?),
            Scalar::VarUint => {
                let v = c.read_var_u128()?;
                Value::Int(i128::try_from(v).map_err(|_| ProtocolError::VarIntOverflow)?)
            }
            Scalar::VarString => Value::Str(c.read_var_str()?.to_owned()),
            Scalar::ShortString => Value::Str(c.read_short_str()?.to_owned()),
            Scalar::VarBytes => Value::Bytes(c.read_var_bytes()?.to_vec()),
            Scalar::Remaining => Value::Bytes(c.read_remaining().to_vec()),
            Scalar::Magic => {
                let bytes = c.read_bytes(OFFLINE_MESSAGE_ID.len())?;
                if bytes != OFFLINE_MESSAGE_ID {
                    return Err(ProtocolError::MagicMismatch(hex_dump(bytes, " ")));
                }
                Value::Unit
            }
            Scalar::Ipv4 => {
                let octets = c.read_bytes(4)?;
                let addr = Ipv4Addr::new(!octets[0], !octets[1], !octets[2], !octets[3]);
                Value::Str(addr.to_string())
            }
            Scalar::Ipv6 => Value::Str(hex_dump(c.read_bytes(16)?, ":")),
        })
    }

    pub fn encode(self, w: &mut Writer, value: &Value) -> Result<()> {
        match self {
            Scalar::U8 => w.write_u8(narrow(value.as_int()?, self)?),
            Scalar::Bool => w.write_bool(value.as_bool()?),
            Scalar::U16Be => w.write_u16_be(narrow(value.as_int()?, self)?),
            Scalar::U16Le => w.write_u16_le(narrow(value.as_int()?, self)?),
            Scalar::I16Be => w.write_i16_be(narrow(value.as_int()?, self)?),
            Scalar::I16Le => w.write_i16_le(narrow(value.as_int()?, self)?),
            Scalar::U24Le => {
                let v: u32 = narrow(value.as_int()?, self)?;
                if v > 0x00ff_ffff {
                    return Err(ProtocolError::ValueOutOfRange(format!(
                        "{v} does not fit {self:?}"
                    )));
                }
                w.write_u24_le(v)
            }
            Scalar::I32Be => w.write_i32_be(narrow(value.as_int()?, self)?),
            Scalar::U32Be => w.write_u32_be(narrow(value.as_int()?, self)?),
            Scalar::U32Le => w.write_u32_le(narrow(value.as_int()?, self)?),
            Scalar::I64Be => w.write_i64_be(narrow(value.as_int()?, self)?),
            Scalar::F32Be => w.write_f32_be(value.as_float()?),
            Scalar::VarUint => w.write_var_uint(value.as_int()?),
            Scalar::VarString => w.write_var_str(value.as_str()?)?,
            Scalar::ShortString => w.write_short_str(value.as_str()?)?,
            Scalar::VarBytes => w.write_var_bytes(value.as_bytes()?)?,
            Scalar::Remaining => w.write_bytes(value.as_bytes()?),
            Scalar::Magic => w.write_bytes(&OFFLINE_MESSAGE_ID),
            Scalar::Ipv4 => {
                let addr: Ipv4Addr = value.as_str()?.parse().map_err(|_| {
                    ProtocolError::ValueOutOfRange(format!("invalid IPv4 {:?}", value))
                })?;
                for octet in addr.octets() {
                    w.write_u8(!octet);
                }
            }
            Scalar::Ipv6 => {
                let text = value.as_str()?;
                let octets = text
                    .split(':')
                    .map(|part| u8::from_str_radix(part, 16))
                    .collect::<std::result::Result<Vec<u8>, _>>()
                    .map_err(|_| ProtocolError::ValueOutOfRange(format!("invalid IPv6 {text:?}")))?;
                if octets.len() != 16 {
                    return Err(ProtocolError::ValueOutOfRange(format!(
                        "IPv6 needs 16 octets, got {}",
                        octets.len()
                    )));
                }
                w.write_bytes(&octets);
            }
        }
        Ok(())
    }
}

/// Ordered `(name, schema)` layout of one record
pub type Fields = Vec<(&'static str, Schema)>;

fn decode_fields(fields: &[(&'static str, Schema)], c: &mut Cursor<'_>) -> Result<Record> {
    let mut record = Record::new();
    for (name, schema) in fields {
        record.insert(name, schema.decode(c)?);
    }
    Ok(record)
}

fn encode_fields(fields: &[(&'static str, Schema)], w: &mut Writer, record: &Record) -> Result<()> {
    for (name, schema) in fields {
        schema.encode(w, record.require(name)?)?;
    }
    Ok(())
}

/// Record layouts selected by a discriminant field.
///
/// Decoding reads the discriminant with `key`, decodes the matching case and
/// injects the discriminant into the record under `key_name`. Encoding reads
/// the discriminant back out of the record and writes the case fields.
#[derive(Debug)]
pub struct TaggedVariant {
    key_name: &'static str,
    key: Scalar,
    cases: BTreeMap<i128, Fields>,
}

impl TaggedVariant {
    /// Build from a static case table. Duplicate discriminants and an empty
    /// table are rejected here rather than at first decode.
    pub fn new(key_name: &'static str, key: Scalar, cases: Vec<(i128, Fields)>) -> Result<Self> {
        if cases.is_empty() {
            return Err(ProtocolError::Custom(format!(
                "tagged variant '{key_name}' has no cases"
            )));
        }
        let mut table = BTreeMap::new();
        for (discriminant, fields) in cases {
            if table.insert(discriminant, fields).is_some() {
                return Err(ProtocolError::DuplicateCase(discriminant));
            }
        }
        Ok(Self {
            key_name,
            key,
            cases: table,
        })
    }

    pub fn key_name(&self) -> &'static str {
        self.key_name
    }

    pub fn has_case(&self, discriminant: i128) -> bool {
        self.cases.contains_key(&discriminant)
    }

    pub fn decode(&self, c: &mut Cursor<'_>) -> Result<Value> {
        let discriminant = self.key.decode(c)?.as_int()?;
        let fields = self
            .cases
            .get(&discriminant)
            .ok_or(ProtocolError::UndefinedKey(discriminant))?;
        let mut record = decode_fields(fields, c)?;
        record.insert(self.key_name, Value::Int(discriminant));
        Ok(Value::Record(record))
    }

    pub fn encode(&self, w: &mut Writer, value: &Value) -> Result<()> {
        let record = value.as_record()?;
        let discriminant = record.require(self.key_name)?.as_int()?;
        let fields = self
            .cases
            .get(&discriminant)
            .ok_or(ProtocolError::UndefinedKey(discriminant))?;
        self.key.encode(w, &Value::Int(discriminant))?;
        encode_fields(fields, w, record)
    }
}

/// Composable field descriptor
#[derive(Debug, Clone)]
pub enum Schema {
    Scalar(Scalar),
    List(Vec<Schema>),
    Record(Fields),
    Variant(Arc<TaggedVariant>),
}

impl Schema {
    /// Schema of a packet with no body fields
    pub fn empty() -> Self {
        Schema::List(Vec::new())
    }

    pub fn list(members: impl IntoIterator<Item = Schema>) -> Self {
        Schema::List(members.into_iter().collect())
    }

    pub fn record(fields: impl IntoIterator<Item = (&'static str, Schema)>) -> Self {
        Schema::Record(fields.into_iter().collect())
    }

    pub fn decode(&self, c: &mut Cursor<'_>) -> Result<Value> {
        match self {
            Schema::Scalar(s) => s.decode(c),
            Schema::List(members) => members
                .iter()
                .map(|m| m.decode(c))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Schema::Record(fields) => decode_fields(fields, c).map(Value::Record),
            Schema::Variant(v) => v.decode(c),
        }
    }

    pub fn encode(&self, w: &mut Writer, value: &Value) -> Result<()> {
        match self {
            Schema::Scalar(s) => s.encode(w, value),
            Schema::List(members) => {
                let values = value.as_list()?;
                if values.len() != members.len() {
                    return Err(ProtocolError::ValueOutOfRange(format!(
                        "list of {} values for {} members",
                        values.len(),
                        members.len()
                    )));
                }
                for (member, v) in members.iter().zip(values) {
                    member.encode(w, v)?;
                }
                Ok(())
            }
            Schema::Record(fields) => encode_fields(fields, w, value.as_record()?),
            Schema::Variant(v) => v.encode(w, value),
        }
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self, value: &Value) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        self.encode(&mut w, value)?;
        Ok(w.into_inner())
    }
}

impl From<Scalar> for Schema {
    fn from(scalar: Scalar) -> Self {
        Schema::Scalar(scalar)
    }
}

impl From<TaggedVariant> for Schema {
    fn from(variant: TaggedVariant) -> Self {
        Schema::Variant(Arc::new(variant))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn shape() -> TaggedVariant {
        TaggedVariant::new(
            "kind",
            Scalar::U8,
            vec![
                (1, vec![("radius", Scalar::U16Be.into())]),
                (
                    2,
                    vec![("w", Scalar::U8.into()), ("h", Scalar::U8.into())],
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_variant_injects_discriminant() {
        let v = shape();
        let mut c = Cursor::new(&[2, 7, 9]);
        let value = v.decode(&mut c).unwrap();
        let record = value.as_record().unwrap();
        assert_eq!(record.get("kind"), Some(&Value::Int(2)));
        assert_eq!(record.get("w"), Some(&Value::Int(7)));
        assert_eq!(record.get("h"), Some(&Value::Int(9)));
        assert!(c.is_eof());
    }

    #[test]
    fn test_variant_encodes_only_selected_case() {
        let v = shape();
        let value = Value::Record(
            Record::new()
                .with("kind", Value::Int(1))
                .with("radius", Value::Int(0x0102))
                .with("w", Value::Int(5)),
        );
        let mut w = Writer::new();
        v.encode(&mut w, &value).unwrap();
        assert_eq!(w.as_slice(), &[1, 0x01, 0x02]);
    }

    #[test]
    fn test_variant_undefined_key() {
        let v = shape();
        let mut c = Cursor::new(&[9, 1, 2, 3]);
        assert!(matches!(
            v.decode(&mut c),
            Err(ProtocolError::UndefinedKey(9))
        ));
        // only the discriminant was consumed
        assert_eq!(c.position(), 1);

        let value = Value::Record(Record::new().with("kind", Value::Int(3)));
        let mut w = Writer::new();
        assert!(matches!(
            v.encode(&mut w, &value),
            Err(ProtocolError::UndefinedKey(3))
        ));
    }

    #[test]
    fn test_variant_table_validated() {
        let dup = TaggedVariant::new(
            "k",
            Scalar::U8,
            vec![(1, Vec::new()), (1, Vec::new())],
        );
        assert!(matches!(dup, Err(ProtocolError::DuplicateCase(1))));
        assert!(TaggedVariant::new("k", Scalar::U8, Vec::new()).is_err());
    }

    #[test]
    fn test_record_field_order_is_wire_order() {
        let schema = Schema::record([
            ("b", Schema::from(Scalar::U8)),
            ("a", Schema::from(Scalar::U16Le)),
        ]);
        let value = schema.decode(&mut Cursor::new(&[1, 2, 3])).unwrap();
        let names: Vec<_> = value.as_record().unwrap().names().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(schema.to_bytes(&value).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_field_on_encode() {
        let schema = Schema::record([("a", Schema::from(Scalar::U8))]);
        let err = schema
            .to_bytes(&Value::Record(Record::new()))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("a")));
    }

    #[test]
    fn test_magic_mismatch() {
        let mut bytes = OFFLINE_MESSAGE_ID;
        bytes[15] = 0;
        let err = Scalar::Magic.decode(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::MagicMismatch(_)));
    }

    #[test]
    fn test_ipv4_octets_are_inverted() {
        let value = Scalar::Ipv4
            .decode(&mut Cursor::new(&[0x80, 0xff, 0xff, 0xfe]))
            .unwrap();
        assert_eq!(value, Value::Str("127.0.0.1".into()));
        let mut w = Writer::new();
        Scalar::Ipv4.encode(&mut w, &value).unwrap();
        assert_eq!(w.as_slice(), &[0x80, 0xff, 0xff, 0xfe]);
    }

    #[test]
    fn test_width_checked_on_encode() {
        let mut w = Writer::new();
        assert!(Scalar::U8.encode(&mut w, &Value::Int(256)).is_err());
        assert!(Scalar::U24Le
            .encode(&mut w, &Value::Int(0x0100_0000))
            .is_err());
        assert!(w.is_empty());
    }
}
