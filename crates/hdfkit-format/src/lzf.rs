//! LZF block codec (the format used by h5py's filter 32000).
//!
//! A block is a sequence of control bytes.  `ctrl < 32` introduces a run of
//! `ctrl + 1` literal bytes.  Otherwise the top three bits hold a match
//! length minus two (7 means an extra length byte follows) and the low five
//! bits plus the next byte hold a back-reference distance minus one.

use crate::error::{FormatError, Result};

const HASH_LOG: u32 = 14;
const MAX_LITERAL: usize = 32;
const MAX_OFFSET: usize = 1 << 13;
const MAX_MATCH: usize = 7 + 255 + 2;

fn failed(reason: impl Into<String>) -> FormatError {
    FormatError::FilterFailed {
        filter: "lzf",
        reason: reason.into(),
    }
}

/// Decode one LZF block.
pub fn decompress(input: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint);
    let mut ip = 0;
    while ip < input.len() {
        let ctrl = input[ip] as usize;
        ip += 1;
        if ctrl < 32 {
            let run = ctrl + 1;
            let lit = input
                .get(ip..ip + run)
                .ok_or_else(|| failed("literal run past end of input"))?;
            out.extend_from_slice(lit);
            ip += run;
            continue;
        }

        let mut len = ctrl >> 5;
        if len == 7 {
            len += *input
                .get(ip)
                .ok_or_else(|| failed("truncated match length"))? as usize;
            ip += 1;
        }
        let low = *input
            .get(ip)
            .ok_or_else(|| failed("truncated match offset"))? as usize;
        ip += 1;
        let distance = ((ctrl & 0x1f) << 8) + low + 1;
        let start = out
            .len()
            .checked_sub(distance)
            .ok_or_else(|| failed("back-reference before start of output"))?;
        // overlapping copies repeat bytes, so copy one at a time
        for k in 0..len + 2 {
            let b = out[start + k];
            out.push(b);
        }
    }
    Ok(out)
}

fn hash(a: u8, b: u8, c: u8) -> usize {
    let v = ((a as u32) << 16) | ((b as u32) << 8) | c as u32;
    (v.wrapping_mul(2_654_435_761) >> (32 - HASH_LOG)) as usize
}

/// Encode one LZF block, or `None` when the result would not be smaller.
pub fn compress(input: &[u8]) -> Option<Vec<u8>> {
    let n = input.len();
    let mut out = Vec::with_capacity(n);
    let mut literals: Vec<u8> = Vec::with_capacity(MAX_LITERAL);
    let mut table = vec![usize::MAX; 1 << HASH_LOG];

    let flush = |out: &mut Vec<u8>, literals: &mut Vec<u8>| {
        for run in literals.chunks(MAX_LITERAL) {
            out.push((run.len() - 1) as u8);
            out.extend_from_slice(run);
        }
        literals.clear();
    };

    let mut ip = 0;
    while ip + 3 <= n {
        let h = hash(input[ip], input[ip + 1], input[ip + 2]);
        let candidate = table[h];
        table[h] = ip;

        let usable = candidate != usize::MAX
            && ip - candidate <= MAX_OFFSET
            && input[candidate..candidate + 3] == input[ip..ip + 3];
        if !usable {
            literals.push(input[ip]);
            ip += 1;
            continue;
        }

        let max = (n - ip).min(MAX_MATCH);
        let mut len = 3;
        while len < max && input[candidate + len] == input[ip + len] {
            len += 1;
        }
        flush(&mut out, &mut literals);

        let distance = ip - candidate - 1;
        let encoded = len - 2;
        if encoded < 7 {
            out.push(((encoded as u8) << 5) | (distance >> 8) as u8);
        } else {
            out.push((7 << 5) | (distance >> 8) as u8);
            out.push((encoded - 7) as u8);
        }
        out.push((distance & 0xff) as u8);
        ip += len;

        if out.len() >= n {
            return None;
        }
    }
    literals.extend_from_slice(&input[ip..]);
    flush(&mut out, &mut literals);

    (out.len() < n).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_hand_built_block() {
        // "abc" literal, then a 6-byte match at distance 3 ("abcabc")
        let block = [2, b'a', b'b', b'c', (4 << 5), 2];
        assert_eq!(decompress(&block, 9).unwrap(), b"abcabcabc");
    }

    #[test]
    fn long_match_uses_extra_length_byte() {
        let data = vec![b'z'; 300];
        let packed = compress(&data).unwrap();
        assert!(packed.len() < 16);
        assert_eq!(decompress(&packed, 300).unwrap(), data);
    }

    #[test]
    fn mixed_content_survives() {
        let mut data = Vec::new();
        for i in 0..2000u32 {
            data.extend_from_slice(&(i % 97).to_le_bytes());
            data.extend_from_slice(b"hdf");
        }
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn incompressible_input_is_refused() {
        let data: Vec<u8> = (0..64u8).collect();
        assert_eq!(compress(&data), None);
        assert_eq!(compress(&[]), None);
    }

    #[test]
    fn corrupt_blocks_fail() {
        assert!(decompress(&[5, b'a'], 6).is_err());
        assert!(decompress(&[0, b'a', (1 << 5), 9], 4).is_err());
        assert!(decompress(&[0xE0], 4).is_err());
    }
}
