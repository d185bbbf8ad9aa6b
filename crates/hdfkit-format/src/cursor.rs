//! Bounded byte cursor and growable writer used by every parser and encoder.
//!
//! All HDF5 metadata is little-endian; element data may be either order, so
//! the typed reads take an explicit [`Endian`] where it matters.  Every read
//! checks bounds first and fails with [`FormatError::UnexpectedEof`] instead
//! of returning a short slice.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};

/// Byte order of a multi-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(buf),
            Endian::Big => BigEndian::read_u16(buf),
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(buf),
            Endian::Big => BigEndian::read_u64(buf),
        }
    }

    /// Read an unsigned integer of 1..=8 bytes.
    pub fn read_uint(self, buf: &[u8]) -> u64 {
        match buf.len() {
            0 => 0,
            1 => buf[0] as u64,
            n => match self {
                Endian::Little => LittleEndian::read_uint(buf, n),
                Endian::Big => BigEndian::read_uint(buf, n),
            },
        }
    }
}

/// The all-ones "undefined address" for a given offset width.
pub fn undefined_address(size: u8) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size as u32 * 8)) - 1
    }
}

/// Returns true when `addr` is the undefined address for `size`.
pub fn is_undefined(addr: u64, size: u8) -> bool {
    addr == undefined_address(size)
}

/// Simple bounded cursor over an immutable byte slice with absolute seeking.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a cursor positioned at `pos`.
    pub fn at(data: &'a [u8], pos: u64) -> Result<Self> {
        let mut c = Self::new(data);
        c.seek(pos)?;
        Ok(c)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Move to an absolute position. Seeking exactly to the end is allowed.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let p = usize::try_from(pos).map_err(|_| self.eof_at(usize::MAX, 0))?;
        if p > self.data.len() {
            return Err(self.eof_at(p, 0));
        }
        self.pos = p;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Fails unless `n` more bytes are available.
    pub fn ensure(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            Err(self.eof_at(self.pos, n))
        } else {
            Ok(())
        }
    }

    fn eof_at(&self, at: usize, needed: usize) -> FormatError {
        FormatError::UnexpectedEof {
            at,
            needed,
            available: self.data.len().saturating_sub(at),
        }
    }

    /// Read exactly `n` bytes and advance.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    /// Look at the next `n` bytes without advancing.
    pub fn peek_bytes(&self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_u32_with(&mut self, endian: Endian) -> Result<u32> {
        Ok(endian.read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64_with(&mut self, endian: Endian) -> Result<u64> {
        Ok(endian.read_u64(self.read_bytes(8)?))
    }

    /// Read a little-endian unsigned integer of `width` bytes (0..=8).
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        if width > 8 {
            return Err(FormatError::corrupted(
                "integer field",
                format!("width {width} exceeds 8 bytes"),
            ));
        }
        Ok(Endian::Little.read_uint(self.read_bytes(width)?))
    }

    /// Read a file address of `size` bytes (2, 4 or 8).
    pub fn read_offset(&mut self, size: u8) -> Result<u64> {
        match size {
            2 | 4 | 8 => self.read_uint(size as usize),
            _ => Err(FormatError::InvalidOffsetSize(size)),
        }
    }

    /// Read a length field of `size` bytes (2, 4 or 8).
    pub fn read_length(&mut self, size: u8) -> Result<u64> {
        match size {
            2 | 4 | 8 => self.read_uint(size as usize),
            _ => Err(FormatError::InvalidLengthSize(size)),
        }
    }

    /// Read an address, mapping the undefined address to `None`.
    pub fn read_address(&mut self, size: u8) -> Result<Option<u64>> {
        let addr = self.read_offset(size)?;
        Ok(if is_undefined(addr, size) { None } else { Some(addr) })
    }

    /// Consume a 4-byte structure tag or fail with `InvalidSignature`.
    pub fn expect_signature(&mut self, sig: &[u8; 4], structure: &'static str) -> Result<()> {
        let at = self.pos as u64;
        let found = self.read_bytes(4)?;
        if found != sig {
            return Err(FormatError::InvalidSignature { structure, at });
        }
        Ok(())
    }

    /// Read a NUL-terminated byte string, consuming the terminator.
    pub fn read_cstring(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let Some(len) = rest.iter().position(|&b| b == 0) else {
            return Err(self.eof_at(self.pos, rest.len() + 1));
        };
        let s = &rest[..len];
        self.pos += len + 1;
        Ok(s)
    }

    /// Skip forward so the position is a multiple of `align` relative to `base`.
    pub fn align_from(&mut self, base: usize, align: usize) -> Result<()> {
        let rel = self.pos.saturating_sub(base);
        let pad = (align - rel % align) % align;
        self.skip(pad)
    }
}

/// Growable little-endian byte writer with back-patching.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
        }
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write the low `width` bytes of `v`, little-endian.
    pub fn write_uint(&mut self, v: u64, width: usize) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_u64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp[..width.min(8)]);
    }

    pub fn write_offset(&mut self, v: u64, size: u8) {
        self.write_uint(v, size as usize);
    }

    pub fn write_undefined(&mut self, size: u8) {
        self.write_uint(undefined_address(size), size as usize);
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn write_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    /// Zero-pad so the length is a multiple of `align` relative to `base`.
    pub fn pad_from(&mut self, base: usize, align: usize) {
        let rel = self.buf.len().saturating_sub(base);
        let pad = (align - rel % align) % align;
        self.write_zeros(pad);
    }

    /// Overwrite `width` bytes at `pos` with `v`.
    pub fn patch_uint(&mut self, pos: usize, v: u64, width: usize) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_u64(&mut tmp, v);
        self.buf[pos..pos + width].copy_from_slice(&tmp[..width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_u8().unwrap(), 1);
        assert_eq!(c.read_u16().unwrap(), 0x0302);
        assert_eq!(c.read_u32().unwrap(), 0x07060504);
        assert_eq!(c.position(), 7);
        assert_eq!(c.remaining(), 2);
    }

    #[test]
    fn short_read_fails_without_advancing() {
        let data = [0u8; 3];
        let mut c = Cursor::new(&data);
        c.skip(2).unwrap();
        let err = c.read_u32().unwrap_err();
        assert_eq!(
            err,
            FormatError::UnexpectedEof {
                at: 2,
                needed: 4,
                available: 1
            }
        );
        assert_eq!(c.position(), 2);
    }

    #[test]
    fn seek_is_absolute_and_bounded() {
        let data = [0xAA, 0xBB, 0xCC];
        let mut c = Cursor::new(&data);
        c.seek(2).unwrap();
        assert_eq!(c.read_u8().unwrap(), 0xCC);
        c.seek(0).unwrap();
        assert_eq!(c.read_u8().unwrap(), 0xAA);
        assert!(c.seek(3).is_ok());
        assert!(c.seek(4).is_err());
    }

    #[test]
    fn offsets_and_undefined_addresses() {
        let data = [0xFF; 8];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_address(8).unwrap(), None);
        let data = [0x10, 0x00, 0xFF, 0xFF];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_address(2).unwrap(), Some(0x10));
        assert_eq!(c.read_address(2).unwrap(), None);
        assert_eq!(
            Cursor::new(&data).read_offset(3).unwrap_err(),
            FormatError::InvalidOffsetSize(3)
        );
    }

    #[test]
    fn explicit_endianness() {
        let buf = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(Endian::Little.read_u32(&buf), 0x78563412);
        assert_eq!(Endian::Big.read_u32(&buf), 0x12345678);
        assert_eq!(Endian::Big.read_uint(&buf[..3]), 0x123456);
    }

    #[test]
    fn cstring_and_alignment() {
        let data = b"abc\0\0\0\0\0xyz";
        let mut c = Cursor::new(data);
        assert_eq!(c.read_cstring().unwrap(), b"abc");
        c.align_from(0, 8).unwrap();
        assert_eq!(c.position(), 8);
        assert_eq!(c.read_bytes(3).unwrap(), b"xyz");
    }

    #[test]
    fn signature_mismatch_reports_offset() {
        let mut c = Cursor::new(b"HEAPTREE");
        c.expect_signature(b"HEAP", "local heap").unwrap();
        let err = c.expect_signature(b"SNOD", "symbol node").unwrap_err();
        assert_eq!(
            err,
            FormatError::InvalidSignature {
                structure: "symbol node",
                at: 4
            }
        );
    }

    #[test]
    fn writer_pads_and_patches() {
        let mut w = ByteWriter::new();
        w.write_u8(1);
        w.write_u16(0x0203);
        w.pad_from(0, 8);
        assert_eq!(w.position(), 8);
        let at = w.position();
        w.write_undefined(4);
        w.patch_uint(at, 0x11223344, 4);
        assert_eq!(&w.as_slice()[8..12], &[0x44, 0x33, 0x22, 0x11]);
        w.write_uint(0xAABBCC, 3);
        assert_eq!(&w.into_inner()[12..], &[0xCC, 0xBB, 0xAA]);
    }
}
