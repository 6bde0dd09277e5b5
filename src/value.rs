//! Representation and wire codec for IFD entry values

use std::io::{Read, Seek};

use crate::stream::{ByteOrder, EndianReader};
use crate::tags::{IfdPointer, Type};
use crate::{TiffError, TiffFormatError, TiffResult};

use self::Value::{
    Ascii, AsciiList, Byte, Double, Float, Ifd, Ifd8, List, Long, Long8, Rational, SRational,
    Short, SignedByte, SignedLong, SignedLong8, SignedShort, Undefined, Unknown,
};

/// A decoded entry value.
///
/// Scalar entries decode to the scalar variants, entries with a count above
/// one to [`List`] (except ASCII and UNDEFINED which keep their natural
/// grouping). Entries with an unrecognized type code are preserved as
/// [`Unknown`] and round-trip their raw field bytes without reinterpretation.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    Byte(u8),
    Ascii(String),
    AsciiList(Vec<String>),
    Short(u16),
    Long(u32),
    Rational(u32, u32),
    SignedByte(i8),
    Undefined(Vec<u8>),
    SignedShort(i16),
    SignedLong(i32),
    SRational(i32, i32),
    Float(f32),
    Double(f64),
    Long8(u64),
    SignedLong8(i64),
    Ifd(u32),
    Ifd8(u64),
    List(Vec<Value>),
    Unknown {
        type_code: u16,
        count: u64,
        raw: Vec<u8>,
    },
}

impl Value {
    /// Builds a scalar for a single element and a [`List`] otherwise.
    pub fn shorts(values: &[u16]) -> Value {
        match values {
            [single] => Short(*single),
            _ => List(values.iter().map(|&v| Short(v)).collect()),
        }
    }

    /// Builds a scalar for a single element and a [`List`] otherwise.
    pub fn longs(values: &[u32]) -> Value {
        match values {
            [single] => Long(*single),
            _ => List(values.iter().map(|&v| Long(v)).collect()),
        }
    }

    /// Builds a scalar for a single element and a [`List`] otherwise.
    pub fn long8s(values: &[u64]) -> Value {
        match values {
            [single] => Long8(*single),
            _ => List(values.iter().map(|&v| Long8(v)).collect()),
        }
    }

    pub fn into_u8(self) -> TiffResult<u8> {
        match self {
            Byte(val) => Ok(val),
            val => Err(TiffError::FormatError(TiffFormatError::ByteExpected(val))),
        }
    }

    pub fn into_u16(self) -> TiffResult<u16> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val),
            Long(val) => Ok(u16::try_from(val)?),
            Long8(val) => Ok(u16::try_from(val)?),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val),
            )),
        }
    }

    pub fn into_u32(self) -> TiffResult<u32> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Long(val) => Ok(val),
            Long8(val) => Ok(u32::try_from(val)?),
            Ifd(val) => Ok(val),
            Ifd8(val) => Ok(u32::try_from(val)?),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val),
            )),
        }
    }

    pub fn into_u64(self) -> TiffResult<u64> {
        match self {
            Byte(val) => Ok(val.into()),
            Short(val) => Ok(val.into()),
            Long(val) => Ok(val.into()),
            Long8(val) => Ok(val),
            Ifd(val) => Ok(val.into()),
            Ifd8(val) => Ok(val),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val),
            )),
        }
    }

    pub fn into_i32(self) -> TiffResult<i32> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val.into()),
            SignedLong(val) => Ok(val),
            SignedLong8(val) => Ok(i32::try_from(val)?),
            val => Err(TiffError::FormatError(
                TiffFormatError::SignedIntegerExpected(val),
            )),
        }
    }

    pub fn into_i64(self) -> TiffResult<i64> {
        match self {
            SignedByte(val) => Ok(val.into()),
            SignedShort(val) => Ok(val.into()),
            SignedLong(val) => Ok(val.into()),
            SignedLong8(val) => Ok(val),
            val => Err(TiffError::FormatError(
                TiffFormatError::SignedIntegerExpected(val),
            )),
        }
    }

    pub fn into_f32(self) -> TiffResult<f32> {
        match self {
            Float(val) => Ok(val),
            Double(val) => Ok(val as f32),
            Rational(num, den) => Ok(num as f32 / den as f32),
            SRational(num, den) => Ok(num as f32 / den as f32),
            val => Err(TiffError::FormatError(
                TiffFormatError::SignedIntegerExpected(val),
            )),
        }
    }

    pub fn into_f64(self) -> TiffResult<f64> {
        match self {
            Float(val) => Ok(val as f64),
            Double(val) => Ok(val),
            Rational(num, den) => Ok(num as f64 / den as f64),
            SRational(num, den) => Ok(num as f64 / den as f64),
            val => Err(TiffError::FormatError(
                TiffFormatError::SignedIntegerExpected(val),
            )),
        }
    }

    pub fn into_string(self) -> TiffResult<String> {
        match self {
            Ascii(val) => Ok(val),
            AsciiList(mut vals) if !vals.is_empty() => Ok(vals.remove(0)),
            val => Err(TiffError::FormatError(TiffFormatError::AsciiExpected(val))),
        }
    }

    pub fn into_u8_vec(self) -> TiffResult<Vec<u8>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u8).collect(),
            Byte(val) => Ok(vec![val]),
            Undefined(val) => Ok(val),
            val => Err(TiffError::FormatError(TiffFormatError::ByteExpected(val))),
        }
    }

    pub fn into_u16_vec(self) -> TiffResult<Vec<u16>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u16).collect(),
            val => Ok(vec![val.into_u16()?]),
        }
    }

    pub fn into_u32_vec(self) -> TiffResult<Vec<u32>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u32).collect(),
            Rational(num, den) => Ok(vec![num, den]),
            val => Ok(vec![val.into_u32()?]),
        }
    }

    pub fn into_u64_vec(self) -> TiffResult<Vec<u64>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_u64).collect(),
            val => Ok(vec![val.into_u64()?]),
        }
    }

    pub fn into_f32_vec(self) -> TiffResult<Vec<f32>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_f32).collect(),
            val => Ok(vec![val.into_f32()?]),
        }
    }

    pub fn into_f64_vec(self) -> TiffResult<Vec<f64>> {
        match self {
            List(vec) => vec.into_iter().map(Value::into_f64).collect(),
            val => Ok(vec![val.into_f64()?]),
        }
    }

    /// Offsets of further directories, from an `IFD`, `IFD8` or integer entry.
    pub fn into_ifd_pointers(self) -> TiffResult<Vec<IfdPointer>> {
        Ok(self
            .into_u64_vec()?
            .into_iter()
            .map(IfdPointer)
            .collect())
    }
}

/// A not yet resolved directory entry: the fixed-size part of the wire
/// format. `payload` holds the value-or-offset field verbatim.
#[derive(Debug, Clone)]
pub(crate) struct RawEntry {
    pub tag: u16,
    pub type_code: u16,
    pub count: u64,
    pub payload: [u8; 8],
    pub payload_len: usize,
}

/// Reads the fixed part of one entry: 12 bytes for classic TIFF, 20 for
/// BigTIFF.
pub(crate) fn read_entry<R: Read + Seek>(
    reader: &mut EndianReader<R>,
    bigtiff: bool,
) -> TiffResult<RawEntry> {
    let tag = reader.read_u16()?;
    let type_code = reader.read_u16()?;
    let mut payload = [0u8; 8];
    let (count, payload_len) = if bigtiff {
        let count = reader.read_u64()?;
        reader.read_exact(&mut payload)?;
        (count, 8)
    } else {
        let count = u64::from(reader.read_u32()?);
        reader.read_exact(&mut payload[..4])?;
        (count, 4)
    };
    Ok(RawEntry {
        tag,
        type_code,
        count,
        payload,
        payload_len,
    })
}

fn payload_offset(entry: &RawEntry, byte_order: ByteOrder) -> u64 {
    if entry.payload_len == 8 {
        match byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(entry.payload),
            ByteOrder::BigEndian => u64::from_be_bytes(entry.payload),
        }
    } else {
        let bytes: [u8; 4] = entry.payload[..4].try_into().unwrap();
        match byte_order {
            ByteOrder::LittleEndian => u64::from(u32::from_le_bytes(bytes)),
            ByteOrder::BigEndian => u64::from(u32::from_be_bytes(bytes)),
        }
    }
}

/// Resolves a raw entry to its [`Value`], seeking to the out-of-line data if
/// the payload is an offset. Large arrays are fetched with a single range
/// read and decoded in memory.
pub(crate) fn decode_entry<R: Read + Seek>(
    reader: &mut EndianReader<R>,
    entry: &RawEntry,
) -> TiffResult<Value> {
    let Some(type_) = Type::from_u16(entry.type_code) else {
        return Ok(Unknown {
            type_code: entry.type_code,
            count: entry.count,
            raw: entry.payload[..entry.payload_len].to_vec(),
        });
    };

    let total = entry
        .count
        .checked_mul(type_.byte_len())
        .ok_or(TiffError::IntSizeError)?;
    let total = usize::try_from(total)?;

    let byte_order = reader.byte_order();
    let data = if total <= entry.payload_len {
        entry.payload[..total].to_vec()
    } else {
        let offset = payload_offset(entry, byte_order);
        let position = reader.offset()?;
        reader.goto_offset(offset)?;
        let mut data = vec![0u8; total];
        reader.read_exact(&mut data)?;
        reader.goto_offset(position)?;
        data
    };

    decode_elements(&data, type_, entry.count, byte_order)
}

fn decode_elements(
    data: &[u8],
    type_: Type,
    count: u64,
    byte_order: ByteOrder,
) -> TiffResult<Value> {
    let count = usize::try_from(count)?;

    match type_ {
        Type::ASCII => {
            // Entries may pack several null-terminated strings; the trailing
            // null is required except for an empty value.
            let mut strings = Vec::new();
            for part in data.split(|&b| b == 0) {
                strings.push(std::str::from_utf8(part)?.to_string());
            }
            if data.last() == Some(&0) {
                strings.pop();
            }
            match strings.len() {
                0 => Ok(Ascii(String::new())),
                1 => Ok(Ascii(strings.remove(0))),
                _ => Ok(AsciiList(strings)),
            }
        }
        Type::UNDEFINED => Ok(Undefined(data.to_vec())),
        _ => {
            let mut cursor = EndianReader::new(std::io::Cursor::new(data), byte_order);
            let mut elements = Vec::with_capacity(count);
            for _ in 0..count {
                elements.push(match type_ {
                    Type::BYTE => Byte(cursor.read_u8()?),
                    Type::SBYTE => SignedByte(cursor.read_i8()?),
                    Type::SHORT => Short(cursor.read_u16()?),
                    Type::SSHORT => SignedShort(cursor.read_i16()?),
                    Type::LONG => Long(cursor.read_u32()?),
                    Type::SLONG => SignedLong(cursor.read_i32()?),
                    Type::FLOAT => Float(cursor.read_f32()?),
                    Type::DOUBLE => Double(cursor.read_f64()?),
                    Type::RATIONAL => Rational(cursor.read_u32()?, cursor.read_u32()?),
                    Type::SRATIONAL => SRational(cursor.read_i32()?, cursor.read_i32()?),
                    Type::LONG8 => Long8(cursor.read_u64()?),
                    Type::SLONG8 => SignedLong8(cursor.read_i64()?),
                    Type::IFD => Ifd(cursor.read_u32()?),
                    Type::IFD8 => Ifd8(cursor.read_u64()?),
                    Type::ASCII | Type::UNDEFINED => unreachable!(),
                });
            }
            match elements.len() {
                1 => Ok(elements.remove(0)),
                _ => Ok(List(elements)),
            }
        }
    }
}

/// The wire form of a value: its type code, element count and data bytes in
/// file byte order. Produced when emitting an IFD.
#[derive(Debug, Clone)]
pub(crate) struct WireValue {
    pub type_code: u16,
    pub count: u64,
    pub data: Vec<u8>,
    /// Unknown entries keep their payload field verbatim; the emitter must
    /// not spill them to an out-of-line block.
    pub verbatim_payload: bool,
}

fn push_scalar(out: &mut Vec<u8>, value: &Value, byte_order: ByteOrder) -> TiffResult<Type> {
    macro_rules! push {
        ($v:expr) => {{
            match byte_order {
                ByteOrder::LittleEndian => out.extend_from_slice(&$v.to_le_bytes()),
                ByteOrder::BigEndian => out.extend_from_slice(&$v.to_be_bytes()),
            }
        }};
    }

    Ok(match *value {
        Byte(v) => {
            out.push(v);
            Type::BYTE
        }
        SignedByte(v) => {
            out.push(v as u8);
            Type::SBYTE
        }
        Short(v) => {
            push!(v);
            Type::SHORT
        }
        SignedShort(v) => {
            push!(v);
            Type::SSHORT
        }
        Long(v) => {
            push!(v);
            Type::LONG
        }
        SignedLong(v) => {
            push!(v);
            Type::SLONG
        }
        Float(v) => {
            push!(v.to_bits());
            Type::FLOAT
        }
        Double(v) => {
            push!(v.to_bits());
            Type::DOUBLE
        }
        Rational(n, d) => {
            push!(n);
            push!(d);
            Type::RATIONAL
        }
        SRational(n, d) => {
            push!(n);
            push!(d);
            Type::SRATIONAL
        }
        Long8(v) => {
            push!(v);
            Type::LONG8
        }
        SignedLong8(v) => {
            push!(v);
            Type::SLONG8
        }
        Ifd(v) => {
            push!(v);
            Type::IFD
        }
        Ifd8(v) => {
            push!(v);
            Type::IFD8
        }
        _ => return Err(TiffError::FormatError(TiffFormatError::InvalidTag)),
    })
}

fn encode_ascii(strings: &[&str]) -> TiffResult<Vec<u8>> {
    let mut data = Vec::new();
    for s in strings {
        if !s.is_ascii() || s.bytes().any(|b| b == 0) {
            return Err(TiffError::FormatError(TiffFormatError::InvalidTag));
        }
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }
    Ok(data)
}

impl Value {
    /// Encodes the value into its wire form.
    pub(crate) fn encode(&self, byte_order: ByteOrder) -> TiffResult<WireValue> {
        match self {
            Ascii(s) => {
                let data = encode_ascii(&[s.as_str()])?;
                Ok(WireValue {
                    type_code: Type::ASCII.to_u16(),
                    count: data.len() as u64,
                    data,
                    verbatim_payload: false,
                })
            }
            AsciiList(strings) => {
                let parts: Vec<&str> = strings.iter().map(String::as_str).collect();
                let data = encode_ascii(&parts)?;
                Ok(WireValue {
                    type_code: Type::ASCII.to_u16(),
                    count: data.len() as u64,
                    data,
                    verbatim_payload: false,
                })
            }
            Undefined(bytes) => Ok(WireValue {
                type_code: Type::UNDEFINED.to_u16(),
                count: bytes.len() as u64,
                data: bytes.clone(),
                verbatim_payload: false,
            }),
            Unknown {
                type_code,
                count,
                raw,
            } => Ok(WireValue {
                type_code: *type_code,
                count: *count,
                data: raw.clone(),
                verbatim_payload: true,
            }),
            List(elements) => {
                let first = elements
                    .first()
                    .ok_or(TiffError::FormatError(TiffFormatError::InvalidTag))?;
                let mut data = Vec::new();
                let type_ = push_scalar(&mut data, first, byte_order)?;
                for element in &elements[1..] {
                    let element_type = push_scalar(&mut data, element, byte_order)?;
                    if element_type != type_ {
                        return Err(TiffError::FormatError(TiffFormatError::InvalidTag));
                    }
                }
                Ok(WireValue {
                    type_code: type_.to_u16(),
                    count: elements.len() as u64,
                    data,
                    verbatim_payload: false,
                })
            }
            scalar => {
                let mut data = Vec::new();
                let type_ = push_scalar(&mut data, scalar, byte_order)?;
                Ok(WireValue {
                    type_code: type_.to_u16(),
                    count: 1,
                    data,
                    verbatim_payload: false,
                })
            }
        }
    }
}
