//! Decoding raw element bytes into typed values, and encoding values back.
//!
//! Numeric classes decode into flat typed vectors ([`ArrayData`]); composite
//! and exotic classes decode element by element into [`Value`] trees.
//! Variable-length data is fetched through a [`HeapResolver`], so callers
//! decide how global heap collections are located and cached.

use std::collections::HashMap;

use crate::cursor::{undefined_address, Endian};
use crate::datatype::{
    CharacterSet, Datatype, EnumMember, ReferenceType, StringPadding, VlenKind,
};
use crate::error::{FormatError, Result};
use crate::global_heap::{GlobalHeapCollection, GlobalHeapId};

/// Access to global heap objects referenced by variable-length elements.
pub trait HeapResolver {
    fn global_object(&mut self, id: &GlobalHeapId) -> Result<Vec<u8>>;
}

/// Resolver reading collections straight from the file bytes, parsing each
/// collection once.
#[derive(Debug)]
pub struct FileHeap<'a> {
    file_data: &'a [u8],
    length_size: u8,
    collections: HashMap<u64, GlobalHeapCollection>,
}

impl<'a> FileHeap<'a> {
    pub fn new(file_data: &'a [u8], length_size: u8) -> Self {
        FileHeap {
            file_data,
            length_size,
            collections: HashMap::new(),
        }
    }
}

impl HeapResolver for FileHeap<'_> {
    fn global_object(&mut self, id: &GlobalHeapId) -> Result<Vec<u8>> {
        if !self.collections.contains_key(&id.collection) {
            let col = GlobalHeapCollection::parse(self.file_data, id.collection, self.length_size)?;
            self.collections.insert(id.collection, col);
        }
        let col = &self.collections[&id.collection];
        let index = u16::try_from(id.index).map_err(|_| FormatError::HeapObjectNotFound {
            collection: id.collection,
            index: u16::MAX,
        })?;
        Ok(col.get(index)?.data.clone())
    }
}

/// A flat, row-major array of decoded elements.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    /// Enumerations with exactly the members FALSE=0 and TRUE=1.
    Bool(Vec<bool>),
    String(Vec<String>),
    /// Anything without a flat native representation.
    Values(Vec<Value>),
}

/// One decoded element of a non-numeric or composite type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    String(String),
    Enum { name: Option<String>, value: i64 },
    Bytes(Vec<u8>),
    /// Object reference; `None` for the null reference.
    Reference(Option<u64>),
    Compound(Vec<(String, Value)>),
    Array(Vec<Value>),
    Sequence(Vec<Value>),
}

macro_rules! each_variant {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            ArrayData::Int8($v) => $body,
            ArrayData::Int16($v) => $body,
            ArrayData::Int32($v) => $body,
            ArrayData::Int64($v) => $body,
            ArrayData::UInt8($v) => $body,
            ArrayData::UInt16($v) => $body,
            ArrayData::UInt32($v) => $body,
            ArrayData::UInt64($v) => $body,
            ArrayData::Float32($v) => $body,
            ArrayData::Float64($v) => $body,
            ArrayData::Bool($v) => $body,
            ArrayData::String($v) => $body,
            ArrayData::Values($v) => $body,
        }
    };
}

macro_rules! impl_from_vec {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<Vec<$t>> for ArrayData {
            fn from(v: Vec<$t>) -> Self {
                ArrayData::$variant(v)
            }
        })*
    };
}

impl_from_vec!(
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float32, f64 => Float64, bool => Bool, String => String, Value => Values,
);

impl From<Vec<&str>> for ArrayData {
    fn from(v: Vec<&str>) -> Self {
        ArrayData::String(v.into_iter().map(str::to_owned).collect())
    }
}

impl ArrayData {
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArrayData::Int8(_) => "i8",
            ArrayData::Int16(_) => "i16",
            ArrayData::Int32(_) => "i32",
            ArrayData::Int64(_) => "i64",
            ArrayData::UInt8(_) => "u8",
            ArrayData::UInt16(_) => "u16",
            ArrayData::UInt32(_) => "u32",
            ArrayData::UInt64(_) => "u64",
            ArrayData::Float32(_) => "f32",
            ArrayData::Float64(_) => "f64",
            ArrayData::Bool(_) => "bool",
            ArrayData::String(_) => "string",
            ArrayData::Values(_) => "values",
        }
    }

    /// Numeric data widened to `f64`; `None` for non-numeric arrays.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        Some(match self {
            ArrayData::Int8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::UInt64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Float32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Float64(v) => v.clone(),
            ArrayData::Bool(_) | ArrayData::String(_) | ArrayData::Values(_) => return None,
        })
    }

    /// Append `other`, which must hold the same element type.
    pub fn extend(&mut self, other: ArrayData) -> Result<()> {
        match (self, other) {
            (ArrayData::Int8(a), ArrayData::Int8(b)) => a.extend(b),
            (ArrayData::Int16(a), ArrayData::Int16(b)) => a.extend(b),
            (ArrayData::Int32(a), ArrayData::Int32(b)) => a.extend(b),
            (ArrayData::Int64(a), ArrayData::Int64(b)) => a.extend(b),
            (ArrayData::UInt8(a), ArrayData::UInt8(b)) => a.extend(b),
            (ArrayData::UInt16(a), ArrayData::UInt16(b)) => a.extend(b),
            (ArrayData::UInt32(a), ArrayData::UInt32(b)) => a.extend(b),
            (ArrayData::UInt64(a), ArrayData::UInt64(b)) => a.extend(b),
            (ArrayData::Float32(a), ArrayData::Float32(b)) => a.extend(b),
            (ArrayData::Float64(a), ArrayData::Float64(b)) => a.extend(b),
            (ArrayData::Bool(a), ArrayData::Bool(b)) => a.extend(b),
            (ArrayData::String(a), ArrayData::String(b)) => a.extend(b),
            (ArrayData::Values(a), ArrayData::Values(b)) => a.extend(b),
            (a, b) => {
                return Err(FormatError::InvalidInput(format!(
                    "cannot append {} data to {} data",
                    b.type_name(),
                    a.type_name()
                )))
            }
        }
        Ok(())
    }

    /// The datatype these values are stored with. Strings get a fixed
    /// length equal to the longest one (at least 1 byte).
    pub fn natural_datatype(&self) -> Result<Datatype> {
        Ok(match self {
            ArrayData::Int8(_) => Datatype::integer(1, true),
            ArrayData::Int16(_) => Datatype::integer(2, true),
            ArrayData::Int32(_) => Datatype::integer(4, true),
            ArrayData::Int64(_) => Datatype::integer(8, true),
            ArrayData::UInt8(_) => Datatype::integer(1, false),
            ArrayData::UInt16(_) => Datatype::integer(2, false),
            ArrayData::UInt32(_) => Datatype::integer(4, false),
            ArrayData::UInt64(_) => Datatype::integer(8, false),
            ArrayData::Float32(_) => Datatype::float(4),
            ArrayData::Float64(_) => Datatype::float(8),
            ArrayData::Bool(_) => bool_datatype(),
            ArrayData::String(v) => {
                let longest = v.iter().map(String::len).max().unwrap_or(0).max(1);
                Datatype::fixed_string(longest as u32)
            }
            ArrayData::Values(_) => {
                return Err(FormatError::InvalidInput(
                    "generic values cannot be encoded".into(),
                ))
            }
        })
    }

    /// Little-endian element bytes for `datatype`, which must be the natural
    /// datatype or, for strings, a fixed string type of any length that fits.
    pub fn to_bytes(&self, datatype: &Datatype) -> Result<Vec<u8>> {
        fn le<T: Copy, const N: usize>(v: &[T], f: fn(T) -> [u8; N]) -> Vec<u8> {
            v.iter().flat_map(|&x| f(x)).collect()
        }
        if let (ArrayData::String(v), Datatype::String { size, .. }) = (self, datatype) {
            let size = *size as usize;
            let mut out = Vec::with_capacity(v.len() * size);
            for s in v {
                if s.len() > size {
                    return Err(FormatError::InvalidInput(format!(
                        "string of {} bytes does not fit a {size}-byte string type",
                        s.len()
                    )));
                }
                out.extend_from_slice(s.as_bytes());
                out.resize(out.len() + size - s.len(), 0);
            }
            return Ok(out);
        }
        if self.natural_datatype()? != *datatype {
            return Err(FormatError::InvalidInput(format!(
                "{} data cannot be stored as {}",
                self.type_name(),
                datatype.class_name()
            )));
        }
        Ok(match self {
            ArrayData::Int8(v) => le(v, i8::to_le_bytes),
            ArrayData::Int16(v) => le(v, i16::to_le_bytes),
            ArrayData::Int32(v) => le(v, i32::to_le_bytes),
            ArrayData::Int64(v) => le(v, i64::to_le_bytes),
            ArrayData::UInt8(v) => v.clone(),
            ArrayData::UInt16(v) => le(v, u16::to_le_bytes),
            ArrayData::UInt32(v) => le(v, u32::to_le_bytes),
            ArrayData::UInt64(v) => le(v, u64::to_le_bytes),
            ArrayData::Float32(v) => le(v, f32::to_le_bytes),
            ArrayData::Float64(v) => le(v, f64::to_le_bytes),
            ArrayData::Bool(v) => v.iter().map(|&b| b as u8).collect(),
            ArrayData::String(_) | ArrayData::Values(_) => unreachable_encoding()?,
        })
    }
}

fn unreachable_encoding() -> Result<Vec<u8>> {
    Err(FormatError::InvalidInput("no fixed encoding for this data".into()))
}

/// The enumeration h5py and others use for booleans.
pub fn bool_datatype() -> Datatype {
    Datatype::Enumeration {
        version: 1,
        size: 1,
        base_type: Box::new(Datatype::integer(1, true)),
        members: vec![
            EnumMember {
                name: "FALSE".into(),
                value: vec![0],
            },
            EnumMember {
                name: "TRUE".into(),
                value: vec![1],
            },
        ],
    }
}

fn is_bool_enum(members: &[EnumMember]) -> bool {
    members.len() == 2
        && members.iter().all(|m| {
            (m.name == "FALSE" && m.value == [0]) || (m.name == "TRUE" && m.value == [1])
        })
}

fn elements<'r>(raw: &'r [u8], size: usize) -> Result<std::slice::ChunksExact<'r, u8>> {
    if size == 0 || raw.len() % size != 0 {
        return Err(FormatError::corrupted(
            "dataset values",
            format!("{} bytes is not a whole number of {size}-byte elements", raw.len()),
        ));
    }
    Ok(raw.chunks_exact(size))
}

/// Decode a buffer of whole elements of `datatype`.
pub fn decode_array(raw: &[u8], datatype: &Datatype, heap: &mut dyn HeapResolver) -> Result<ArrayData> {
    let size = datatype.size() as usize;
    match datatype {
        Datatype::FixedPoint { .. } if size <= 8 => {
            let ints = elements(raw, size)?.map(|e| int_bits(e, datatype));
            let signed = matches!(datatype, Datatype::FixedPoint { signed: true, .. });
            Ok(match (size, signed) {
                (1, true) => ArrayData::Int8(ints.map(|v| v as i8).collect()),
                (2, true) => ArrayData::Int16(ints.map(|v| v as i16).collect()),
                (3..=4, true) => ArrayData::Int32(ints.map(|v| v as i32).collect()),
                (_, true) => ArrayData::Int64(ints.map(|v| v as i64).collect()),
                (1, false) => ArrayData::UInt8(ints.map(|v| v as u8).collect()),
                (2, false) => ArrayData::UInt16(ints.map(|v| v as u16).collect()),
                (3..=4, false) => ArrayData::UInt32(ints.map(|v| v as u32).collect()),
                (_, false) => ArrayData::UInt64(ints.collect()),
            })
        }
        Datatype::FloatingPoint { byte_order, .. } => {
            check_ieee(datatype)?;
            let order = *byte_order;
            let it = elements(raw, size)?;
            Ok(match size {
                2 => ArrayData::Float32(it.map(|e| f16_to_f32(order.read_u16(e))).collect()),
                4 => ArrayData::Float32(it.map(|e| f32::from_bits(order.read_u32(e))).collect()),
                _ => ArrayData::Float64(it.map(|e| f64::from_bits(order.read_u64(e))).collect()),
            })
        }
        Datatype::String { .. } => {
            let mut out = Vec::with_capacity(raw.len() / size.max(1));
            for e in elements(raw, size)? {
                match decode_value(e, datatype, heap)? {
                    Value::String(s) => out.push(s),
                    _ => unreachable_string()?,
                }
            }
            Ok(ArrayData::String(out))
        }
        Datatype::VariableLength {
            kind: VlenKind::String { .. },
            ..
        } => {
            let mut out = Vec::new();
            for e in elements(raw, size)? {
                match decode_value(e, datatype, heap)? {
                    Value::String(s) => out.push(s),
                    _ => unreachable_string()?,
                }
            }
            Ok(ArrayData::String(out))
        }
        Datatype::Enumeration { members, .. } if is_bool_enum(members) => {
            Ok(ArrayData::Bool(elements(raw, size)?.map(|e| e[0] != 0).collect()))
        }
        _ => {
            let mut out = Vec::new();
            for e in elements(raw, size)? {
                out.push(decode_value(e, datatype, heap)?);
            }
            Ok(ArrayData::Values(out))
        }
    }
}

fn unreachable_string() -> Result<()> {
    Err(FormatError::corrupted("dataset values", "string element decoded as non-string"))
}

/// Decode a single element.
pub fn decode_value(raw: &[u8], datatype: &Datatype, heap: &mut dyn HeapResolver) -> Result<Value> {
    let size = datatype.size() as usize;
    if raw.len() < size {
        return Err(FormatError::corrupted(
            "dataset values",
            format!("{}-byte element holds {} bytes", size, raw.len()),
        ));
    }
    let raw = &raw[..size];
    match datatype {
        Datatype::FixedPoint { signed, .. } if size <= 8 => {
            let v = int_bits(raw, datatype);
            Ok(if *signed {
                Value::Int(v as i64)
            } else {
                Value::UInt(v)
            })
        }
        Datatype::FixedPoint { .. } => Err(FormatError::UnsupportedDatatype(format!(
            "{size}-byte integers"
        ))),
        Datatype::FloatingPoint { .. } => match decode_array(raw, datatype, heap)? {
            ArrayData::Float32(v) => Ok(Value::Float(v[0] as f64)),
            ArrayData::Float64(v) => Ok(Value::Float(v[0])),
            _ => Err(FormatError::UnsupportedDatatype("float layout".into())),
        },
        Datatype::Time { byte_order, .. } if size <= 8 => {
            Ok(Value::UInt(byte_order.read_uint(raw)))
        }
        Datatype::BitField { .. } if size <= 8 => Ok(Value::UInt(int_bits(raw, datatype))),
        Datatype::Time { .. } | Datatype::BitField { .. } | Datatype::Opaque { .. } => {
            Ok(Value::Bytes(raw.to_vec()))
        }
        Datatype::String {
            padding, charset, ..
        } => Ok(Value::String(decode_string(raw, *padding, *charset))),
        Datatype::Reference {
            ref_type: ReferenceType::Object,
            ..
        } => {
            let addr = Endian::Little.read_uint(&raw[..size.min(8)]);
            let null = addr == 0 || addr == undefined_address(size.min(8) as u8);
            Ok(Value::Reference((!null).then_some(addr)))
        }
        Datatype::Reference { .. } => Ok(Value::Bytes(raw.to_vec())),
        Datatype::Enumeration {
            base_type, members, ..
        } => {
            let value = match decode_value(raw, base_type, heap)? {
                Value::Int(v) => v,
                Value::UInt(v) => v as i64,
                _ => {
                    return Err(FormatError::UnsupportedDatatype(
                        "enumeration over a non-integer base".into(),
                    ))
                }
            };
            let name = members.iter().find(|m| m.value == raw).map(|m| m.name.clone());
            Ok(Value::Enum { name, value })
        }
        Datatype::Compound { members, .. } => {
            let mut fields = Vec::with_capacity(members.len());
            for m in members {
                let start = m.byte_offset as usize;
                let end = start.checked_add(m.datatype.size() as usize);
                let field = end.and_then(|end| raw.get(start..end)).ok_or_else(|| {
                    FormatError::corrupted("compound value", format!("member {:?} overruns", m.name))
                })?;
                fields.push((m.name.clone(), decode_value(field, &m.datatype, heap)?));
            }
            Ok(Value::Compound(fields))
        }
        Datatype::Array { base_type, .. } => {
            let mut items = Vec::new();
            for e in elements(raw, base_type.size() as usize)? {
                items.push(decode_value(e, base_type, heap)?);
            }
            Ok(Value::Array(items))
        }
        Datatype::VariableLength {
            kind, base_type, ..
        } => {
            let offset_size = size.checked_sub(8).filter(|&s| matches!(s, 2 | 4 | 8)).ok_or_else(
                || FormatError::corrupted("datatype", format!("{size}-byte variable-length element")),
            )? as u8;
            let id = GlobalHeapId::parse(raw, offset_size)?;
            let bytes = if id.is_null() || id.length == 0 {
                Vec::new()
            } else {
                heap.global_object(&id)?
            };
            match kind {
                VlenKind::String { padding, charset } => {
                    let len = (id.length as usize).min(bytes.len());
                    Ok(Value::String(decode_string(&bytes[..len], *padding, *charset)))
                }
                VlenKind::Sequence => {
                    let base_size = base_type.size() as usize;
                    let needed = base_size.checked_mul(id.length as usize);
                    let body = needed.and_then(|n| bytes.get(..n)).ok_or_else(|| {
                        FormatError::corrupted(
                            "global heap",
                            format!("sequence of {} elements holds {} bytes", id.length, bytes.len()),
                        )
                    })?;
                    let mut items = Vec::with_capacity(body.len() / base_size.max(1));
                    for e in body.chunks_exact(base_size.max(1)) {
                        items.push(decode_value(e, base_type, heap)?);
                    }
                    Ok(Value::Sequence(items))
                }
            }
        }
    }
}

fn decode_string(raw: &[u8], padding: StringPadding, charset: CharacterSet) -> String {
    let bytes = match padding {
        StringPadding::NullTerminate => {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            &raw[..end]
        }
        StringPadding::NullPad => {
            let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            &raw[..end]
        }
        StringPadding::SpacePad => {
            let end = raw.iter().rposition(|&b| b != b' ' && b != 0).map_or(0, |p| p + 1);
            &raw[..end]
        }
    };
    match charset {
        CharacterSet::Ascii | CharacterSet::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Integer bits of a fixed-point or bitfield element, shifted and masked to
/// its precision and sign-extended to 64 bits when signed.
fn int_bits(raw: &[u8], datatype: &Datatype) -> u64 {
    let (order, signed, offset, precision) = match *datatype {
        Datatype::FixedPoint {
            byte_order,
            signed,
            bit_offset,
            bit_precision,
            ..
        } => (byte_order, signed, bit_offset, bit_precision),
        Datatype::BitField {
            byte_order,
            bit_offset,
            bit_precision,
            ..
        } => (byte_order, false, bit_offset, bit_precision),
        _ => (Endian::Little, false, 0, 64),
    };
    let mut v = order.read_uint(raw);
    let width = raw.len() as u32 * 8;
    let precision = (precision as u32).min(width);
    if offset > 0 || precision < width {
        v >>= offset as u32 % 64;
        if precision < 64 {
            v &= (1u64 << precision) - 1;
        }
    }
    if signed && precision > 0 && precision < 64 && v & (1 << (precision - 1)) != 0 {
        v |= !0u64 << precision;
    }
    v
}

fn check_ieee(datatype: &Datatype) -> Result<()> {
    if let Datatype::FloatingPoint {
        size,
        sign_location,
        exponent_location,
        exponent_size,
        mantissa_location,
        mantissa_size,
        exponent_bias,
        ..
    } = *datatype
    {
        let expected = match size {
            2 => (15, 10, 5, 10, 15),
            4 => (31, 23, 8, 23, 127),
            8 => (63, 52, 11, 52, 1023),
            _ => (0, 0, 0, 0, 0),
        };
        let found = (
            sign_location,
            exponent_location,
            exponent_size,
            mantissa_size,
            exponent_bias,
        );
        if found != expected || mantissa_location != 0 {
            return Err(FormatError::UnsupportedDatatype(format!(
                "non-IEEE {size}-byte floating point layout"
            )));
        }
    }
    Ok(())
}

fn f16_to_f32(h: u16) -> f32 {
    let sign = ((h >> 15) as u32) << 31;
    let exp = ((h >> 10) & 0x1F) as u32;
    let mant = (h & 0x3FF) as u32;
    let bits = match (exp, mant) {
        (0, 0) => sign,
        (0, m) => {
            // subnormal: renormalize
            let shift = m.leading_zeros() - 21;
            let m = (m << shift) & 0x3FF;
            sign | ((127 - 15 + 1 - shift) << 23) | (m << 13)
        }
        (0x1F, m) => sign | 0x7F80_0000 | (m << 13),
        (e, m) => sign | ((e + 127 - 15) << 23) | (m << 13),
    };
    f32::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ByteWriter;
    use crate::datatype::CompoundMember;
    use crate::global_heap::GlobalHeapWriter;

    struct NoHeap;

    impl HeapResolver for NoHeap {
        fn global_object(&mut self, _: &GlobalHeapId) -> Result<Vec<u8>> {
            Err(FormatError::UnsupportedFeature("no heap".into()))
        }
    }

    #[test]
    fn integers_and_floats() {
        let raw: Vec<u8> = [1.0f64, 2.0, 3.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(
            decode_array(&raw, &Datatype::float(8), &mut NoHeap).unwrap(),
            ArrayData::Float64(vec![1.0, 2.0, 3.0])
        );
        let raw: Vec<u8> = [-5i16, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(
            decode_array(&raw, &Datatype::integer(2, true), &mut NoHeap).unwrap(),
            ArrayData::Int16(vec![-5, 7])
        );
    }

    #[test]
    fn big_endian_integers() {
        let dt = Datatype::FixedPoint {
            size: 4,
            byte_order: Endian::Big,
            signed: false,
            bit_offset: 0,
            bit_precision: 32,
        };
        assert_eq!(
            decode_array(&[0, 0, 1, 2], &dt, &mut NoHeap).unwrap(),
            ArrayData::UInt32(vec![258])
        );
    }

    #[test]
    fn reduced_precision_sign_extends() {
        let dt = Datatype::FixedPoint {
            size: 2,
            byte_order: Endian::Little,
            signed: true,
            bit_offset: 4,
            bit_precision: 8,
        };
        // bits 4..12 hold 0xFF = -1
        assert_eq!(
            decode_array(&[0xF0, 0x0F], &dt, &mut NoHeap).unwrap(),
            ArrayData::Int16(vec![-1])
        );
    }

    #[test]
    fn half_floats() {
        let raw = [0x00, 0x3C, 0x00, 0xC0, 0x01, 0x00];
        let mut dt = Datatype::float(4);
        if let Datatype::FloatingPoint {
            size,
            sign_location,
            bit_precision,
            exponent_location,
            exponent_size,
            mantissa_size,
            exponent_bias,
            ..
        } = &mut dt
        {
            *size = 2;
            *sign_location = 15;
            *bit_precision = 16;
            *exponent_location = 10;
            *exponent_size = 5;
            *mantissa_size = 10;
            *exponent_bias = 15;
        }
        let ArrayData::Float32(v) = decode_array(&raw, &dt, &mut NoHeap).unwrap() else {
            panic!("expected f32 data");
        };
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1], -2.0);
        assert_eq!(v[2], 2.0f32.powi(-24));
    }

    #[test]
    fn non_ieee_float_rejected() {
        let mut dt = Datatype::float(8);
        if let Datatype::FloatingPoint { exponent_bias, .. } = &mut dt {
            *exponent_bias = 1000;
        }
        assert!(matches!(
            decode_array(&[0; 8], &dt, &mut NoHeap),
            Err(FormatError::UnsupportedDatatype(_))
        ));
    }

    #[test]
    fn fixed_strings_by_padding() {
        let mk = |padding| Datatype::String {
            size: 5,
            padding,
            charset: CharacterSet::Ascii,
        };
        let raw = b"ab\0cdxyz\0\0";
        assert_eq!(
            decode_array(raw, &mk(StringPadding::NullTerminate), &mut NoHeap).unwrap(),
            ArrayData::from(vec!["ab", "xyz"])
        );
        assert_eq!(
            decode_array(b"ab\0\0\0", &mk(StringPadding::NullPad), &mut NoHeap).unwrap(),
            ArrayData::from(vec!["ab"])
        );
        assert_eq!(
            decode_array(b"ab   ", &mk(StringPadding::SpacePad), &mut NoHeap).unwrap(),
            ArrayData::from(vec!["ab"])
        );
    }

    #[test]
    fn vlen_strings_and_sequences_through_heap() {
        let mut gw = GlobalHeapWriter::new();
        let hello = gw.add(b"hello").unwrap();
        let seq = gw.add(&[1, 0, 2, 0, 3, 0]).unwrap();
        let mut file = vec![0u8; 32];
        file.extend(gw.serialize(8));

        let mut w = ByteWriter::new();
        GlobalHeapId { length: 5, collection: 32, index: hello }.write(&mut w, 8);
        GlobalHeapId { length: 0, collection: 0, index: 0 }.write(&mut w, 8);
        let mut heap = FileHeap::new(&file, 8);
        assert_eq!(
            decode_array(w.as_slice(), &Datatype::vlen_string(8), &mut heap).unwrap(),
            ArrayData::from(vec!["hello", ""])
        );

        let seq_type = Datatype::VariableLength {
            size: 16,
            kind: VlenKind::Sequence,
            base_type: Box::new(Datatype::integer(2, false)),
        };
        let mut w = ByteWriter::new();
        GlobalHeapId { length: 3, collection: 32, index: seq }.write(&mut w, 8);
        assert_eq!(
            decode_array(w.as_slice(), &seq_type, &mut heap).unwrap(),
            ArrayData::Values(vec![Value::Sequence(vec![
                Value::UInt(1),
                Value::UInt(2),
                Value::UInt(3)
            ])])
        );
    }

    #[test]
    fn compound_enum_and_bool() {
        let dt = Datatype::Compound {
            version: 3,
            size: 12,
            members: vec![
                CompoundMember {
                    name: "id".into(),
                    byte_offset: 0,
                    datatype: Datatype::integer(4, true),
                },
                CompoundMember {
                    name: "x".into(),
                    byte_offset: 4,
                    datatype: Datatype::float(8),
                },
            ],
        };
        let mut raw = 9i32.to_le_bytes().to_vec();
        raw.extend(0.5f64.to_le_bytes());
        assert_eq!(
            decode_array(&raw, &dt, &mut NoHeap).unwrap(),
            ArrayData::Values(vec![Value::Compound(vec![
                ("id".into(), Value::Int(9)),
                ("x".into(), Value::Float(0.5)),
            ])])
        );

        assert_eq!(
            decode_array(&[1, 0, 1], &bool_datatype(), &mut NoHeap).unwrap(),
            ArrayData::Bool(vec![true, false, true])
        );

        let colors = Datatype::Enumeration {
            version: 3,
            size: 1,
            base_type: Box::new(Datatype::integer(1, false)),
            members: vec![EnumMember {
                name: "RED".into(),
                value: vec![4],
            }],
        };
        assert_eq!(
            decode_value(&[4], &colors, &mut NoHeap).unwrap(),
            Value::Enum {
                name: Some("RED".into()),
                value: 4
            }
        );
    }

    #[test]
    fn ragged_buffer_is_corrupted() {
        assert!(matches!(
            decode_array(&[0; 7], &Datatype::float(8), &mut NoHeap),
            Err(FormatError::Corrupted { .. })
        ));
    }

    #[test]
    fn encoding_natural_types() {
        let data = ArrayData::from(vec![1.5f32, -2.0]);
        let dt = data.natural_datatype().unwrap();
        let bytes = data.to_bytes(&dt).unwrap();
        assert_eq!(decode_array(&bytes, &dt, &mut NoHeap).unwrap(), data);

        let strings = ArrayData::from(vec!["a", "abc"]);
        let dt = strings.natural_datatype().unwrap();
        assert_eq!(dt.size(), 3);
        assert_eq!(strings.to_bytes(&dt).unwrap(), b"a\0\0abc");
        assert!(strings.to_bytes(&Datatype::fixed_string(2)).is_err());
        assert!(data.to_bytes(&Datatype::float(8)).is_err());
    }

    #[test]
    fn extend_checks_types() {
        let mut a = ArrayData::from(vec![1i64]);
        a.extend(ArrayData::from(vec![2i64])).unwrap();
        assert_eq!(a, ArrayData::Int64(vec![1, 2]));
        assert!(a.extend(ArrayData::from(vec![1.0f64])).is_err());
    }
}
