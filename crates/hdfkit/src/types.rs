//! Simplified type representations for the high-level API.

use std::fmt;

use hdfkit_format::data_read::ArrayData;
use hdfkit_format::datatype::{Datatype, VlenKind};
use hdfkit_format::link_message::{LinkMessage, LinkTarget};
use serde::{Serialize, Serializer};

/// Simplified datatype for display and matching.
///
/// Maps from the detailed [`Datatype`] to a user-friendly representation.
#[derive(Debug, Clone, PartialEq)]
pub enum DType {
    F16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    String,
    VariableLengthString,
    Compound(Vec<(String, DType)>),
    Enum(Vec<String>),
    Array(Box<DType>, Vec<u32>),
    Sequence(Box<DType>),
    Reference,
    Opaque(usize),
    Other(String),
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F16 => write!(f, "f16"),
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I8 => write!(f, "i8"),
            DType::I16 => write!(f, "i16"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
            DType::U8 => write!(f, "u8"),
            DType::U16 => write!(f, "u16"),
            DType::U32 => write!(f, "u32"),
            DType::U64 => write!(f, "u64"),
            DType::Bool => write!(f, "bool"),
            DType::String => write!(f, "string"),
            DType::VariableLengthString => write!(f, "vlen_string"),
            DType::Compound(fields) => {
                write!(f, "compound{{")?;
                for (i, (name, dt)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {dt}")?;
                }
                write!(f, "}}")
            }
            DType::Enum(names) => write!(f, "enum[{}]", names.join(", ")),
            DType::Array(base, dims) => write!(f, "array<{base}, {dims:?}>"),
            DType::Sequence(base) => write!(f, "vlen<{base}>"),
            DType::Reference => write!(f, "reference"),
            DType::Opaque(size) => write!(f, "opaque({size})"),
            DType::Other(desc) => write!(f, "{desc}"),
        }
    }
}

impl Serialize for DType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<&Datatype> for DType {
    fn from(dt: &Datatype) -> Self {
        match dt {
            Datatype::FloatingPoint { size: 2, .. } => DType::F16,
            Datatype::FloatingPoint { size: 4, .. } => DType::F32,
            Datatype::FloatingPoint { size: 8, .. } => DType::F64,
            Datatype::FloatingPoint { size, .. } => DType::Other(format!("float{}", size * 8)),
            Datatype::FixedPoint { size, signed, .. } => match (size, signed) {
                (1, true) => DType::I8,
                (2, true) => DType::I16,
                (3..=4, true) => DType::I32,
                (5..=8, true) => DType::I64,
                (1, false) => DType::U8,
                (2, false) => DType::U16,
                (3..=4, false) => DType::U32,
                (5..=8, false) => DType::U64,
                _ => DType::Other(format!("{}{}", if *signed { "i" } else { "u" }, size * 8)),
            },
            Datatype::String { .. } => DType::String,
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => DType::VariableLengthString,
            Datatype::VariableLength { base_type, .. } => {
                DType::Sequence(Box::new(DType::from(base_type.as_ref())))
            }
            Datatype::Compound { members, .. } => DType::Compound(
                members
                    .iter()
                    .map(|m| (m.name.clone(), DType::from(&m.datatype)))
                    .collect(),
            ),
            Datatype::Enumeration { members, .. } => {
                let names: Vec<String> = members.iter().map(|m| m.name.clone()).collect();
                if names.len() == 2 && names.iter().any(|n| n == "FALSE") && names.iter().any(|n| n == "TRUE") {
                    DType::Bool
                } else {
                    DType::Enum(names)
                }
            }
            Datatype::Array {
                base_type,
                dimensions,
                ..
            } => DType::Array(Box::new(DType::from(base_type.as_ref())), dimensions.clone()),
            Datatype::Reference { .. } => DType::Reference,
            Datatype::Opaque { size, .. } => DType::Opaque(*size as usize),
            other => DType::Other(other.class_name().to_owned()),
        }
    }
}

/// A decoded attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub dtype: DType,
    /// Empty for scalars.
    pub shape: Vec<u64>,
    pub value: ArrayData,
}

/// Kind of a link, without its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Hard,
    Soft,
    External,
}

/// A link as stored in its parent group, not followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkInfo {
    Hard { name: String, address: u64 },
    Soft { name: String, target: String },
    External { name: String, file: String, target: String },
}

impl LinkInfo {
    pub fn name(&self) -> &str {
        match self {
            LinkInfo::Hard { name, .. }
            | LinkInfo::Soft { name, .. }
            | LinkInfo::External { name, .. } => name,
        }
    }

    pub fn kind(&self) -> LinkKind {
        match self {
            LinkInfo::Hard { .. } => LinkKind::Hard,
            LinkInfo::Soft { .. } => LinkKind::Soft,
            LinkInfo::External { .. } => LinkKind::External,
        }
    }
}

impl From<&LinkMessage> for LinkInfo {
    fn from(link: &LinkMessage) -> Self {
        let name = link.name.clone();
        match &link.target {
            LinkTarget::Hard {
                object_header_address,
            } => LinkInfo::Hard {
                name,
                address: *object_header_address,
            },
            LinkTarget::Soft { target_path } => LinkInfo::Soft {
                name,
                target: target_path.clone(),
            },
            LinkTarget::External {
                filename,
                object_path,
            } => LinkInfo::External {
                name,
                file: filename.clone(),
                target: object_path.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdfkit_format::data_read::bool_datatype;

    #[test]
    fn classifies_common_types() {
        assert_eq!(DType::from(&Datatype::float(8)), DType::F64);
        assert_eq!(DType::from(&Datatype::integer(2, false)), DType::U16);
        assert_eq!(DType::from(&Datatype::vlen_string(8)), DType::VariableLengthString);
        assert_eq!(DType::from(&bool_datatype()), DType::Bool);
        assert_eq!(DType::from(&Datatype::fixed_string(4)).to_string(), "string");
    }

    #[test]
    fn link_info_serializes_with_type_tag() {
        let info = LinkInfo::from(&LinkMessage::soft("self", "/g"));
        assert_eq!(info.kind(), LinkKind::Soft);
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"type":"soft","name":"self","target":"/g"}"#);
    }
}
