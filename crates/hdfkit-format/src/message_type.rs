//! HDF5 object header message type identifiers.

/// Header message flag: the message payload is constant.
pub const FLAG_CONSTANT: u8 = 0x01;
/// Header message flag: the payload is a reference to a shared message.
pub const FLAG_SHARED: u8 = 0x02;
/// Header message flag: fail if the message type is not understood.
pub const FLAG_MUST_UNDERSTAND: u8 = 0x08;

/// Recognized HDF5 header message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Nil,
    Dataspace,
    LinkInfo,
    Datatype,
    FillValueOld,
    FillValue,
    Link,
    ExternalDataFiles,
    DataLayout,
    Bogus,
    GroupInfo,
    FilterPipeline,
    Attribute,
    ObjectComment,
    ModificationTimeOld,
    SharedMessageTable,
    Continuation,
    SymbolTable,
    ModificationTime,
    BTreeKValues,
    DriverInfo,
    AttributeInfo,
    ReferenceCount,
    /// Unknown message type with its raw type ID.
    Unknown(u16),
}

const KNOWN: [(u16, MessageType); 23] = [
    (0x0000, MessageType::Nil),
    (0x0001, MessageType::Dataspace),
    (0x0002, MessageType::LinkInfo),
    (0x0003, MessageType::Datatype),
    (0x0004, MessageType::FillValueOld),
    (0x0005, MessageType::FillValue),
    (0x0006, MessageType::Link),
    (0x0007, MessageType::ExternalDataFiles),
    (0x0008, MessageType::DataLayout),
    (0x0009, MessageType::Bogus),
    (0x000A, MessageType::GroupInfo),
    (0x000B, MessageType::FilterPipeline),
    (0x000C, MessageType::Attribute),
    (0x000D, MessageType::ObjectComment),
    (0x000E, MessageType::ModificationTimeOld),
    (0x000F, MessageType::SharedMessageTable),
    (0x0010, MessageType::Continuation),
    (0x0011, MessageType::SymbolTable),
    (0x0012, MessageType::ModificationTime),
    (0x0013, MessageType::BTreeKValues),
    (0x0014, MessageType::DriverInfo),
    (0x0015, MessageType::AttributeInfo),
    (0x0016, MessageType::ReferenceCount),
];

impl MessageType {
    /// Convert a raw type ID to a `MessageType`.
    pub fn from_u16(val: u16) -> MessageType {
        KNOWN
            .iter()
            .find(|(id, _)| *id == val)
            .map(|(_, t)| *t)
            .unwrap_or(MessageType::Unknown(val))
    }

    /// Convert back to the raw type ID.
    pub fn to_u16(self) -> u16 {
        if let MessageType::Unknown(id) = self {
            return id;
        }
        KNOWN
            .iter()
            .find(|(_, t)| *t == self)
            .map(|(id, _)| *id)
            .unwrap_or(0)
    }
}
