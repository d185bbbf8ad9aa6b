//! HDF5 file signature (magic bytes) detection.

use crate::error::{FormatError, Result};

/// The 8-byte HDF5 magic signature.
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Offsets where a superblock may start: 0, then 512 doubling up to the end
/// of the data. Anything else is user-block content and is never scanned.
fn candidate_offsets(len: usize) -> impl Iterator<Item = usize> {
    core::iter::once(0)
        .chain(core::iter::successors(Some(512usize), |o| o.checked_mul(2)))
        .take_while(move |o| o.saturating_add(HDF5_SIGNATURE.len()) <= len)
}

/// Search for the HDF5 signature and return the base offset of the file.
///
/// Every address stored in the file is relative to this offset.
pub fn find_signature(data: &[u8]) -> Result<u64> {
    candidate_offsets(data.len())
        .find(|&o| data[o..o + 8] == HDF5_SIGNATURE)
        .map(|o| o as u64)
        .ok_or(FormatError::SignatureNotFound)
}
