//! Link Info (0x0002) and Group Info (0x000A) messages of new-style groups.

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};

const LINFO_TRACK_ORDER: u8 = 0x01;
const LINFO_INDEX_ORDER: u8 = 0x02;

/// Where a new-style group keeps its links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkInfoMessage {
    /// Highest creation order handed out, when tracked.
    pub max_creation_order: Option<u64>,
    /// Fractal heap of link records; `None` when links are stored compactly.
    pub fractal_heap_address: Option<u64>,
    pub name_index_address: Option<u64>,
    pub creation_order_index_address: Option<u64>,
}

impl LinkInfoMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<Self> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link info message",
                version,
            });
        }
        let flags = c.read_u8()?;
        let max_creation_order = if flags & LINFO_TRACK_ORDER != 0 {
            Some(c.read_u64()?)
        } else {
            None
        };
        let fractal_heap_address = c.read_address(offset_size)?;
        let name_index_address = c.read_address(offset_size)?;
        let creation_order_index_address = if flags & LINFO_INDEX_ORDER != 0 {
            c.read_address(offset_size)?
        } else {
            None
        };
        Ok(LinkInfoMessage {
            max_creation_order,
            fractal_heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }

    /// Dense storage is in use when a fractal heap is present.
    pub fn is_dense(&self) -> bool {
        self.fractal_heap_address.is_some()
    }

    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let mut flags = 0;
        if self.max_creation_order.is_some() {
            flags |= LINFO_TRACK_ORDER;
        }
        if self.creation_order_index_address.is_some() {
            flags |= LINFO_INDEX_ORDER;
        }
        let mut w = ByteWriter::new();
        w.write_u8(0);
        w.write_u8(flags);
        if let Some(order) = self.max_creation_order {
            w.write_u64(order);
        }
        for addr in [self.fractal_heap_address, self.name_index_address] {
            match addr {
                Some(a) => w.write_offset(a, offset_size),
                None => w.write_undefined(offset_size),
            }
        }
        if let Some(a) = self.creation_order_index_address {
            w.write_offset(a, offset_size);
        }
        w.into_inner()
    }
}

const GINFO_PHASE_CHANGE: u8 = 0x01;
const GINFO_ESTIMATES: u8 = 0x02;

/// Storage hints of a new-style group. Readers only need it to recognize the
/// group; the values are carried through for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupInfoMessage {
    /// (max compact, min dense) link counts.
    pub link_phase_change: Option<(u16, u16)>,
    /// (estimated entries, estimated name length).
    pub estimates: Option<(u16, u16)>,
}

impl GroupInfoMessage {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "group info message",
                version,
            });
        }
        let flags = c.read_u8()?;
        let link_phase_change = if flags & GINFO_PHASE_CHANGE != 0 {
            Some((c.read_u16()?, c.read_u16()?))
        } else {
            None
        };
        let estimates = if flags & GINFO_ESTIMATES != 0 {
            Some((c.read_u16()?, c.read_u16()?))
        } else {
            None
        };
        Ok(GroupInfoMessage {
            link_phase_change,
            estimates,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(0);
        let mut flags = 0;
        if self.link_phase_change.is_some() {
            flags |= GINFO_PHASE_CHANGE;
        }
        if self.estimates.is_some() {
            flags |= GINFO_ESTIMATES;
        }
        w.write_u8(flags);
        for (a, b) in [self.link_phase_change, self.estimates].into_iter().flatten() {
            w.write_u16(a);
            w.write_u16(b);
        }
        w.into_inner()
    }
}
