//! HDF5 Datatype message (type 0x0003): recursive decoder and encoder.
//!
//! Byte 0 packs the class (low nibble) and version (high nibble), bytes 1..4
//! are class bit fields, bytes 4..8 the element size.  Class-specific
//! properties follow; composite classes embed further datatype descriptors,
//! which are decoded by recursing into [`Datatype::decode`].

use crate::cursor::{ByteWriter, Cursor, Endian};
use crate::error::{FormatError, Result};

/// Nesting bound for composite types. Real files stay far below this.
const MAX_NESTING: usize = 32;

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

impl StringPadding {
    fn from_bits(v: u8) -> Result<Self> {
        match v {
            0 => Ok(StringPadding::NullTerminate),
            1 => Ok(StringPadding::NullPad),
            2 => Ok(StringPadding::SpacePad),
            _ => Err(FormatError::corrupted(
                "datatype",
                format!("string padding {v}"),
            )),
        }
    }

    fn bits(self) -> u8 {
        match self {
            StringPadding::NullTerminate => 0,
            StringPadding::NullPad => 1,
            StringPadding::SpacePad => 2,
        }
    }
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

impl CharacterSet {
    fn from_bits(v: u8) -> Result<Self> {
        match v {
            0 => Ok(CharacterSet::Ascii),
            1 => Ok(CharacterSet::Utf8),
            _ => Err(FormatError::corrupted("datatype", format!("charset {v}"))),
        }
    }

    fn bits(self) -> u8 {
        match self {
            CharacterSet::Ascii => 0,
            CharacterSet::Utf8 => 1,
        }
    }
}

/// Reference type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    Object,
    DatasetRegion,
}

/// What a variable-length type holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlenKind {
    Sequence,
    String {
        padding: StringPadding,
        charset: CharacterSet,
    },
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundMember {
    pub name: String,
    /// Byte offset within the compound element.
    pub byte_offset: u32,
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    /// Raw value bytes (length = base type size).
    pub value: Vec<u8>,
}

/// Parsed HDF5 datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    /// Class 0: integers.
    FixedPoint {
        size: u32,
        byte_order: Endian,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1: floating point.
    FloatingPoint {
        size: u32,
        byte_order: Endian,
        /// Mantissa normalization (bits 4-5 of the first bit field byte).
        mantissa_norm: u8,
        sign_location: u8,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    /// Class 2: time.
    Time {
        size: u32,
        byte_order: Endian,
        bit_precision: u16,
    },
    /// Class 3: fixed-length string.
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    /// Class 4: bit field.
    BitField {
        size: u32,
        byte_order: Endian,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 5: opaque bytes with an ASCII tag.
    Opaque { size: u32, tag: String },
    /// Class 6: compound.
    Compound {
        version: u8,
        size: u32,
        members: Vec<CompoundMember>,
    },
    /// Class 7: reference.
    Reference { size: u32, ref_type: ReferenceType },
    /// Class 8: enumeration.
    Enumeration {
        version: u8,
        size: u32,
        base_type: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    /// Class 9: variable-length sequence or string.
    VariableLength {
        size: u32,
        kind: VlenKind,
        base_type: Box<Datatype>,
    },
    /// Class 10: fixed-size array.
    Array {
        version: u8,
        size: u32,
        dimensions: Vec<u32>,
        base_type: Box<Datatype>,
    },
}

impl Datatype {
    /// Parse a datatype message, consuming the whole descriptor.
    pub fn parse(data: &[u8]) -> Result<Datatype> {
        Ok(Self::decode(data)?.0)
    }

    /// Decode one descriptor and return it with the number of bytes used.
    ///
    /// Running past the end of `data` means the descriptor claims more bytes
    /// than its message holds, which is reported as a corrupted datatype.
    pub fn decode(data: &[u8]) -> Result<(Datatype, usize)> {
        let mut c = Cursor::new(data);
        let dt = Self::read(&mut c, 0).map_err(|e| match e {
            FormatError::UnexpectedEof { at, .. } => FormatError::corrupted(
                "datatype",
                format!("descriptor overruns its {} byte budget at {at}", data.len()),
            ),
            other => other,
        })?;
        Ok((dt, c.position()))
    }

    fn read(c: &mut Cursor<'_>, depth: usize) -> Result<Datatype> {
        if depth > MAX_NESTING {
            return Err(FormatError::corrupted("datatype", "nesting too deep"));
        }
        let class_and_version = c.read_u8()?;
        let class = class_and_version & 0x0F;
        let version = class_and_version >> 4;
        let [bf0, bf1, _bf2] = c.read_array::<3>()?;
        let size = c.read_u32()?;
        if !(1..=5).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                structure: "datatype",
                version,
            });
        }

        let dt = match class {
            0 => {
                let byte_order = integer_order(bf0);
                let signed = bf0 & 0x08 != 0;
                let bit_offset = c.read_u16()?;
                let bit_precision = c.read_u16()?;
                Datatype::FixedPoint {
                    size,
                    byte_order,
                    signed,
                    bit_offset,
                    bit_precision,
                }
            }
            1 => {
                let byte_order = match (bf0 & 0x40 != 0, bf0 & 0x01 != 0) {
                    (false, false) => Endian::Little,
                    (false, true) => Endian::Big,
                    _ => {
                        return Err(FormatError::UnsupportedDatatype(
                            "VAX-order floating point".into(),
                        ))
                    }
                };
                Datatype::FloatingPoint {
                    size,
                    byte_order,
                    mantissa_norm: (bf0 >> 4) & 0x03,
                    sign_location: bf1,
                    bit_offset: c.read_u16()?,
                    bit_precision: c.read_u16()?,
                    exponent_location: c.read_u8()?,
                    exponent_size: c.read_u8()?,
                    mantissa_location: c.read_u8()?,
                    mantissa_size: c.read_u8()?,
                    exponent_bias: c.read_u32()?,
                }
            }
            2 => Datatype::Time {
                size,
                byte_order: integer_order(bf0),
                bit_precision: c.read_u16()?,
            },
            3 => Datatype::String {
                size,
                padding: StringPadding::from_bits(bf0 & 0x0F)?,
                charset: CharacterSet::from_bits(bf0 >> 4)?,
            },
            4 => Datatype::BitField {
                size,
                byte_order: integer_order(bf0),
                bit_offset: c.read_u16()?,
                bit_precision: c.read_u16()?,
            },
            5 => {
                let tag_len = bf0 as usize;
                let raw = c.read_bytes(tag_len)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let tag = String::from_utf8_lossy(&raw[..end]).into_owned();
                Datatype::Opaque { size, tag }
            }
            6 => Self::read_compound(c, version, size, u16::from_le_bytes([bf0, bf1]), depth)?,
            7 => {
                if version >= 4 {
                    return Err(FormatError::UnsupportedDatatype(
                        "revised (version 4) references".into(),
                    ));
                }
                let ref_type = match bf0 & 0x0F {
                    0 => ReferenceType::Object,
                    1 => ReferenceType::DatasetRegion,
                    v => {
                        return Err(FormatError::UnsupportedDatatype(format!(
                            "reference type {v}"
                        )))
                    }
                };
                Datatype::Reference { size, ref_type }
            }
            8 => {
                let count = u16::from_le_bytes([bf0, bf1]) as usize;
                let base_type = Self::read(c, depth + 1)?;
                let base_size = base_type.size() as usize;
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    names.push(read_name(c, version < 3)?);
                }
                let mut members = Vec::with_capacity(count);
                for name in names {
                    members.push(EnumMember {
                        name,
                        value: c.read_bytes(base_size)?.to_vec(),
                    });
                }
                Datatype::Enumeration {
                    version,
                    size,
                    base_type: Box::new(base_type),
                    members,
                }
            }
            9 => {
                let kind = match bf0 & 0x0F {
                    0 => VlenKind::Sequence,
                    1 => VlenKind::String {
                        padding: StringPadding::from_bits(bf0 >> 4)?,
                        charset: CharacterSet::from_bits(bf1 & 0x0F)?,
                    },
                    v => {
                        return Err(FormatError::corrupted(
                            "datatype",
                            format!("variable-length type {v}"),
                        ))
                    }
                };
                let base_type = Self::read(c, depth + 1)?;
                Datatype::VariableLength {
                    size,
                    kind,
                    base_type: Box::new(base_type),
                }
            }
            10 => {
                let ndims = c.read_u8()? as usize;
                if version < 3 {
                    c.skip(3)?;
                }
                let mut dimensions = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dimensions.push(c.read_u32()?);
                }
                if version < 3 {
                    c.skip(4 * ndims)?; // permutation indices
                }
                let base_type = Self::read(c, depth + 1)?;
                Datatype::Array {
                    version,
                    size,
                    dimensions,
                    base_type: Box::new(base_type),
                }
            }
            11 => {
                return Err(FormatError::UnsupportedDatatype(
                    "complex number class".into(),
                ))
            }
            other => {
                return Err(FormatError::UnsupportedDatatype(format!(
                    "datatype class {other}"
                )))
            }
        };
        dt.check_layout()?;
        Ok(dt)
    }

    fn read_compound(
        c: &mut Cursor<'_>,
        version: u8,
        size: u32,
        count: u16,
        depth: usize,
    ) -> Result<Datatype> {
        let offset_width = match size {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            0x1_0000..=0xFF_FFFF => 3,
            _ => 4,
        };
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = read_name(c, version < 3)?;
            let byte_offset = if version < 3 {
                c.read_u32()?
            } else {
                c.read_uint(offset_width)? as u32
            };
            let datatype = if version == 1 {
                let ndims = c.read_u8()? as usize;
                c.skip(3 + 4 + 4)?; // reserved, permutation, reserved
                let mut dims = Vec::with_capacity(ndims);
                for i in 0..4 {
                    let d = c.read_u32()?;
                    if i < ndims {
                        dims.push(d);
                    }
                }
                let base = Self::read(c, depth + 1)?;
                if dims.is_empty() {
                    base
                } else {
                    let size = dims
                        .iter()
                        .try_fold(base.size(), |n, &d| n.checked_mul(d))
                        .ok_or_else(|| {
                            FormatError::corrupted("datatype", "array member size overflows")
                        })?;
                    Datatype::Array {
                        version: 2,
                        size,
                        dimensions: dims,
                        base_type: Box::new(base),
                    }
                }
            } else {
                Self::read(c, depth + 1)?
            };
            members.push(CompoundMember {
                name,
                byte_offset,
                datatype,
            });
        }
        Ok(Datatype::Compound {
            version,
            size,
            members,
        })
    }

    /// The declared element size must agree with the nested members.
    fn check_layout(&self) -> Result<()> {
        match self {
            Datatype::Compound { size, members, .. } => {
                for m in members {
                    let end = m.byte_offset as u64 + m.datatype.size() as u64;
                    if end > *size as u64 {
                        return Err(FormatError::corrupted(
                            "datatype",
                            format!(
                                "compound member '{}' ends at byte {end}, past element size {size}",
                                m.name
                            ),
                        ));
                    }
                }
            }
            Datatype::Array {
                size,
                dimensions,
                base_type,
                ..
            } => {
                let expected = dimensions
                    .iter()
                    .try_fold(base_type.size() as u64, |acc, &d| acc.checked_mul(d as u64));
                if expected != Some(*size as u64) {
                    return Err(FormatError::corrupted(
                        "datatype",
                        format!("array size {size} does not match {dimensions:?} elements"),
                    ));
                }
            }
            Datatype::Enumeration {
                size, base_type, ..
            } if base_type.size() != *size => {
                return Err(FormatError::corrupted(
                    "datatype",
                    "enumeration size differs from its base type",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Encode this datatype as message bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.encode(&mut w);
        w.into_inner()
    }

    /// Append the encoded descriptor to `w`.
    pub fn encode(&self, w: &mut ByteWriter) {
        let header = |w: &mut ByteWriter, class: u8, version: u8, bf: [u8; 3], size: u32| {
            w.write_u8(class | (version << 4));
            w.write_bytes(&bf);
            w.write_u32(size);
        };
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let bf0 = order_bit(*byte_order) | if *signed { 0x08 } else { 0 };
                header(w, 0, 1, [bf0, 0, 0], *size);
                w.write_u16(*bit_offset);
                w.write_u16(*bit_precision);
            }
            Datatype::FloatingPoint {
                size,
                byte_order,
                mantissa_norm,
                sign_location,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => {
                let bf0 = order_bit(*byte_order) | ((mantissa_norm & 0x03) << 4);
                header(w, 1, 1, [bf0, *sign_location, 0], *size);
                w.write_u16(*bit_offset);
                w.write_u16(*bit_precision);
                w.write_u8(*exponent_location);
                w.write_u8(*exponent_size);
                w.write_u8(*mantissa_location);
                w.write_u8(*mantissa_size);
                w.write_u32(*exponent_bias);
            }
            Datatype::Time {
                size,
                byte_order,
                bit_precision,
            } => {
                header(w, 2, 1, [order_bit(*byte_order), 0, 0], *size);
                w.write_u16(*bit_precision);
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => {
                let bf0 = padding.bits() | (charset.bits() << 4);
                header(w, 3, 1, [bf0, 0, 0], *size);
            }
            Datatype::BitField {
                size,
                byte_order,
                bit_offset,
                bit_precision,
            } => {
                header(w, 4, 1, [order_bit(*byte_order), 0, 0], *size);
                w.write_u16(*bit_offset);
                w.write_u16(*bit_precision);
            }
            Datatype::Opaque { size, tag } => {
                let padded = (tag.len() + 1).next_multiple_of(8);
                header(w, 5, 1, [padded as u8, 0, 0], *size);
                w.write_bytes(tag.as_bytes());
                w.write_zeros(padded - tag.len());
            }
            Datatype::Compound {
                version,
                size,
                members,
            } => {
                let n = (members.len() as u16).to_le_bytes();
                header(w, 6, *version, [n[0], n[1], 0], *size);
                let offset_width = match size {
                    0..=0xFF => 1,
                    0x100..=0xFFFF => 2,
                    0x1_0000..=0xFF_FFFF => 3,
                    _ => 4,
                };
                for m in members {
                    write_name(w, &m.name, *version < 3);
                    if *version < 3 {
                        w.write_u32(m.byte_offset);
                    } else {
                        w.write_uint(m.byte_offset as u64, offset_width);
                    }
                    if *version == 1 {
                        let (dims, base) = match &m.datatype {
                            Datatype::Array {
                                dimensions,
                                base_type,
                                ..
                            } if dimensions.len() <= 4 => (dimensions.as_slice(), &**base_type),
                            other => (&[][..], other),
                        };
                        w.write_u8(dims.len() as u8);
                        w.write_zeros(3 + 4 + 4);
                        for i in 0..4 {
                            w.write_u32(dims.get(i).copied().unwrap_or(0));
                        }
                        base.encode(w);
                    } else {
                        m.datatype.encode(w);
                    }
                }
            }
            Datatype::Reference { size, ref_type } => {
                let bf0 = match ref_type {
                    ReferenceType::Object => 0,
                    ReferenceType::DatasetRegion => 1,
                };
                header(w, 7, 1, [bf0, 0, 0], *size);
            }
            Datatype::Enumeration {
                version,
                size,
                base_type,
                members,
            } => {
                let n = (members.len() as u16).to_le_bytes();
                header(w, 8, *version, [n[0], n[1], 0], *size);
                base_type.encode(w);
                for m in members {
                    write_name(w, &m.name, *version < 3);
                }
                for m in members {
                    w.write_bytes(&m.value);
                }
            }
            Datatype::VariableLength {
                size,
                kind,
                base_type,
            } => {
                let bf = match kind {
                    VlenKind::Sequence => [0, 0, 0],
                    VlenKind::String { padding, charset } => {
                        [0x01 | (padding.bits() << 4), charset.bits(), 0]
                    }
                };
                header(w, 9, 1, bf, *size);
                base_type.encode(w);
            }
            Datatype::Array {
                version,
                size,
                dimensions,
                base_type,
            } => {
                header(w, 10, *version, [0, 0, 0], *size);
                w.write_u8(dimensions.len() as u8);
                if *version < 3 {
                    w.write_zeros(3);
                }
                for d in dimensions {
                    w.write_u32(*d);
                }
                if *version < 3 {
                    for i in 0..dimensions.len() {
                        w.write_u32(i as u32);
                    }
                }
                base_type.encode(w);
            }
        }
    }

    /// Size in bytes of one element of this type as stored in the file.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. }
            | Datatype::Array { size, .. } => *size,
        }
    }

    /// Short class name for messages and summaries.
    pub fn class_name(&self) -> &'static str {
        match self {
            Datatype::FixedPoint { .. } => "integer",
            Datatype::FloatingPoint { .. } => "float",
            Datatype::Time { .. } => "time",
            Datatype::String { .. } => "string",
            Datatype::BitField { .. } => "bitfield",
            Datatype::Opaque { .. } => "opaque",
            Datatype::Compound { .. } => "compound",
            Datatype::Reference { .. } => "reference",
            Datatype::Enumeration { .. } => "enum",
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => "vlen string",
            Datatype::VariableLength { .. } => "vlen sequence",
            Datatype::Array { .. } => "array",
        }
    }

    /// True if decoding an element requires the global heap.
    pub fn has_vlen(&self) -> bool {
        match self {
            Datatype::VariableLength { .. } => true,
            Datatype::Compound { members, .. } => members.iter().any(|m| m.datatype.has_vlen()),
            Datatype::Array { base_type, .. } | Datatype::Enumeration { base_type, .. } => {
                base_type.has_vlen()
            }
            _ => false,
        }
    }

    /// Little-endian IEEE float of 4 or 8 bytes.
    pub fn float(size: u32) -> Datatype {
        let (exp_size, mant_size, bias) = if size == 4 { (8, 23, 127) } else { (11, 52, 1023) };
        Datatype::FloatingPoint {
            size,
            byte_order: Endian::Little,
            mantissa_norm: 2,
            sign_location: (size * 8 - 1) as u8,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
            exponent_location: mant_size,
            exponent_size: exp_size,
            mantissa_location: 0,
            mantissa_size: mant_size,
            exponent_bias: bias,
        }
    }

    /// Little-endian integer of `size` bytes.
    pub fn integer(size: u32, signed: bool) -> Datatype {
        Datatype::FixedPoint {
            size,
            byte_order: Endian::Little,
            signed,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    /// Fixed-length, null-padded UTF-8 string.
    pub fn fixed_string(size: u32) -> Datatype {
        Datatype::String {
            size,
            padding: StringPadding::NullPad,
            charset: CharacterSet::Utf8,
        }
    }

    /// Variable-length UTF-8 string; element size depends on the offset width.
    pub fn vlen_string(offset_size: u8) -> Datatype {
        Datatype::VariableLength {
            size: 4 + offset_size as u32 + 4,
            kind: VlenKind::String {
                padding: StringPadding::NullTerminate,
                charset: CharacterSet::Utf8,
            },
            base_type: Box::new(Datatype::integer(1, false)),
        }
    }
}

fn integer_order(bf0: u8) -> Endian {
    if bf0 & 0x01 == 0 {
        Endian::Little
    } else {
        Endian::Big
    }
}

fn order_bit(e: Endian) -> u8 {
    match e {
        Endian::Little => 0,
        Endian::Big => 1,
    }
}

/// Member names are NUL-terminated; older versions pad them to 8 bytes.
fn read_name(c: &mut Cursor<'_>, padded: bool) -> Result<String> {
    let start = c.position();
    let raw = c.read_cstring()?;
    let name = String::from_utf8_lossy(raw).into_owned();
    if padded {
        c.align_from(start, 8)?;
    }
    Ok(name)
}

fn write_name(w: &mut ByteWriter, name: &str, padded: bool) {
    let start = w.position();
    w.write_bytes(name.as_bytes());
    w.write_u8(0);
    if padded {
        w.pad_from(start, 8);
    }
}
