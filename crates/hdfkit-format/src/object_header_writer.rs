//! Object header encoder: v1 headers for the file writer, v2 for tooling.

use crate::checksum::jenkins_lookup3;
use crate::cursor::ByteWriter;
use crate::message_type::MessageType;

/// Collects messages and serializes them as a single-block object header.
#[derive(Debug, Clone, Default)]
pub struct ObjectHeaderWriter {
    messages: Vec<(MessageType, Vec<u8>, u8)>,
}

impl ObjectHeaderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message with default flags (0).
    pub fn add_message(&mut self, msg_type: MessageType, data: Vec<u8>) {
        self.messages.push((msg_type, data, 0));
    }

    pub fn add_message_with_flags(&mut self, msg_type: MessageType, data: Vec<u8>, flags: u8) {
        self.messages.push((msg_type, data, flags));
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Size of the v1 encoding, so callers can lay out addresses up front.
    pub fn v1_size(&self) -> usize {
        16 + self
            .messages
            .iter()
            .map(|(_, d, _)| 8 + d.len().next_multiple_of(8))
            .sum::<usize>()
    }

    /// Serialize as a version-1 header: 16-byte prefix, then 8-byte aligned messages.
    pub fn serialize_v1(&self) -> Vec<u8> {
        let body = self.v1_size() - 16;
        let mut w = ByteWriter::with_capacity(16 + body);
        w.write_u8(1);
        w.write_u8(0);
        w.write_u16(self.messages.len() as u16);
        w.write_u32(1); // reference count
        w.write_u32(body as u32);
        w.write_zeros(4);
        for (msg_type, data, flags) in &self.messages {
            let padded = data.len().next_multiple_of(8);
            w.write_u16(msg_type.to_u16());
            w.write_u16(padded as u16);
            w.write_u8(*flags);
            w.write_zeros(3);
            w.write_bytes(data);
            w.write_zeros(padded - data.len());
        }
        w.into_inner()
    }

    /// Serialize as a version-2 header (OHDR, single chunk, checksum).
    pub fn serialize_v2(&self) -> Vec<u8> {
        let body: usize = self.messages.iter().map(|(_, d, _)| 4 + d.len()).sum();
        let (flags, width) = match body {
            0..=0xFF => (0x00u8, 1usize),
            0x100..=0xFFFF => (0x01, 2),
            _ => (0x02, 4),
        };
        let mut w = ByteWriter::with_capacity(6 + width + body + 4);
        w.write_bytes(b"OHDR");
        w.write_u8(2);
        w.write_u8(flags);
        w.write_uint(body as u64, width);
        for (msg_type, data, msg_flags) in &self.messages {
            w.write_u8(msg_type.to_u16() as u8);
            w.write_u16(data.len() as u16);
            w.write_u8(*msg_flags);
            w.write_bytes(data);
        }
        let sum = jenkins_lookup3(w.as_slice());
        w.write_u32(sum);
        w.into_inner()
    }
}
