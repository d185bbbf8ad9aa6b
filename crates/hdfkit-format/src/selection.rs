//! Strided rectangular selections (`start..end` by `step` on every axis) and
//! the element gathering that turns a source block into selected output.
//!
//! # Example
//!
//! ```
//! use hdfkit_format::selection::Hyperslab;
//!
//! // rows 1..3, columns 0..4 step 2 of a 4x4 dataset
//! let sel = Hyperslab::new(vec![1, 0], vec![3, 4], vec![1, 2]);
//! sel.validate(&[4, 4]).unwrap();
//! assert_eq!(sel.output_shape(), vec![2, 2]);
//! ```

use crate::error::{FormatError, Result};

/// A regular strided selection with an exclusive `end` per axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    pub start: Vec<u64>,
    pub end: Vec<u64>,
    pub step: Vec<u64>,
}

impl Hyperslab {
    pub fn new(start: Vec<u64>, end: Vec<u64>, step: Vec<u64>) -> Self {
        Hyperslab { start, end, step }
    }

    /// Unit-step selection of `start..end`.
    pub fn range(start: Vec<u64>, end: Vec<u64>) -> Self {
        let step = vec![1; start.len()];
        Hyperslab { start, end, step }
    }

    /// Everything in a dataset of `shape`.
    pub fn all(shape: &[u64]) -> Self {
        Hyperslab::range(vec![0; shape.len()], shape.to_vec())
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    /// Check the selection against a dataset shape.
    pub fn validate(&self, shape: &[u64]) -> Result<()> {
        if self.start.len() != shape.len() || self.end.len() != shape.len() || self.step.len() != shape.len() {
            return Err(FormatError::InvalidInput(format!(
                "selection of rank {}/{}/{} on a rank-{} dataset",
                self.start.len(),
                self.end.len(),
                self.step.len(),
                shape.len()
            )));
        }
        for (d, &extent) in shape.iter().enumerate() {
            let (s, e, st) = (self.start[d], self.end[d], self.step[d]);
            if st == 0 {
                return Err(FormatError::InvalidInput(format!("zero step on axis {d}")));
            }
            if s > e || e > extent {
                return Err(FormatError::InvalidInput(format!(
                    "axis {d}: range {s}..{e} outside 0..{extent}"
                )));
            }
        }
        Ok(())
    }

    /// Number of selected indices on axis `d`.
    pub fn count(&self, d: usize) -> u64 {
        let span = self.end[d].saturating_sub(self.start[d]);
        span.div_ceil(self.step[d].max(1))
    }

    pub fn output_shape(&self) -> Vec<u64> {
        (0..self.rank()).map(|d| self.count(d)).collect()
    }

    /// Number of selected elements, saturating at `u64::MAX`.
    pub fn num_elements(&self) -> u64 {
        (0..self.rank()).fold(1u64, |n, d| n.saturating_mul(self.count(d)))
    }

    /// Size in bytes of the selected elements, as a buffer length.
    pub fn byte_len(&self, elem_size: usize) -> Result<usize> {
        byte_len(&self.output_shape(), elem_size)
    }

    /// Whether any selected element falls inside the block at `origin` with
    /// extent `dims`.
    pub fn intersects(&self, origin: &[u64], dims: &[u64]) -> bool {
        (0..self.rank()).all(|d| {
            let lo = origin[d];
            let hi = origin[d] + dims[d];
            first_selected(self.start[d], self.end[d], self.step[d], lo, hi).is_some()
        })
    }

    /// Pairs of (output index, block-local index) on axis `d` for the
    /// selected coordinates inside `lo..hi`.
    fn axis_hits(&self, d: usize, lo: u64, hi: u64) -> Vec<(u64, u64)> {
        let (start, end, step) = (self.start[d], self.end[d], self.step[d]);
        let mut hits = Vec::new();
        let mut coord = match first_selected(start, end, step, lo, hi) {
            Some(c) => c,
            None => return hits,
        };
        while coord < hi.min(end) {
            hits.push(((coord - start) / step, coord - lo));
            coord += step;
        }
        hits
    }
}

fn first_selected(start: u64, end: u64, step: u64, lo: u64, hi: u64) -> Option<u64> {
    let first = if lo <= start {
        start
    } else {
        start + (lo - start).div_ceil(step) * step
    };
    (first < hi && first < end).then_some(first)
}

/// Number of elements in an array of `shape`, or `None` if it does not fit
/// in a `u64`.
pub fn element_count(shape: &[u64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |n, &d| n.checked_mul(d))
}

/// Bytes taken by an array of `shape` with `elem_size`-byte elements.
///
/// Counts that overflow, or that no buffer could hold, mean the dataspace or
/// layout is lying about the data.
pub fn byte_len(shape: &[u64], elem_size: usize) -> Result<usize> {
    element_count(shape)
        .and_then(|n| usize::try_from(n).ok())
        .and_then(|n| n.checked_mul(elem_size))
        .filter(|&n| n <= isize::MAX as usize)
        .ok_or_else(|| {
            FormatError::corrupted(
                "dataspace",
                format!("{shape:?} elements of {elem_size} bytes overflow the address space"),
            )
        })
}

/// A zeroed buffer of `len` bytes, failing instead of aborting when the
/// allocation cannot be made.
pub fn zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| {
        FormatError::corrupted("dataspace", format!("cannot allocate {len} bytes of element data"))
    })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Row-major strides, in elements, of an array of `shape`.
pub fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1].saturating_mul(shape[d + 1]);
    }
    strides
}

/// Copy the selected elements of a dense row-major block into `out`.
///
/// `block` holds `block_dims` elements of `elem_size` bytes whose first
/// element sits at dataset coordinate `origin`; `out` is the row-major output
/// buffer of `sel.output_shape()`. Elements of the block outside the
/// selection are ignored, so a block may overhang the dataset edge.
pub fn scatter_block(
    sel: &Hyperslab,
    origin: &[u64],
    block_dims: &[u64],
    block: &[u8],
    elem_size: usize,
    out: &mut [u8],
) -> Result<()> {
    let rank = sel.rank();
    if rank == 0 {
        let n = elem_size.min(block.len()).min(out.len());
        out[..n].copy_from_slice(&block[..n]);
        return Ok(());
    }
    let needed = byte_len(block_dims, elem_size)?;
    if block.len() < needed {
        return Err(FormatError::corrupted(
            "data block",
            format!("expected {needed} bytes, found {}", block.len()),
        ));
    }
    let hits: Vec<Vec<(u64, u64)>> = (0..rank)
        .map(|d| sel.axis_hits(d, origin[d], origin[d] + block_dims[d]))
        .collect();
    if hits.iter().any(Vec::is_empty) {
        return Ok(());
    }
    let out_strides = strides(&sel.output_shape());
    let block_strides = strides(block_dims);

    // unit step on the last axis lets each row go over as one run
    let last = rank - 1;
    let run = if sel.step[last] == 1 { hits[last].len() } else { 1 };
    let outer = &hits[..last];
    let inner: Vec<(u64, u64)> = if run > 1 { vec![hits[last][0]] } else { hits[last].clone() };
    let run_bytes = run * elem_size;

    let mut idx = vec![0usize; outer.len()];
    loop {
        let (mut out_base, mut blk_base) = (0u64, 0u64);
        for (d, &i) in idx.iter().enumerate() {
            out_base += outer[d][i].0 * out_strides[d];
            blk_base += outer[d][i].1 * block_strides[d];
        }
        for &(o, b) in &inner {
            let dst = (out_base + o) as usize * elem_size;
            let src = (blk_base + b) as usize * elem_size;
            out[dst..dst + run_bytes].copy_from_slice(&block[src..src + run_bytes]);
        }
        // odometer over the outer axes
        let mut d = outer.len();
        loop {
            if d == 0 {
                return Ok(());
            }
            d -= 1;
            idx[d] += 1;
            if idx[d] < outer[d].len() {
                break;
            }
            idx[d] = 0;
        }
    }
}

/// Gather a selection out of a whole dense dataset.
pub fn gather(sel: &Hyperslab, shape: &[u64], data: &[u8], elem_size: usize) -> Result<Vec<u8>> {
    let mut out = zeroed(sel.byte_len(elem_size)?)?;
    if !out.is_empty() {
        scatter_block(sel, &vec![0; shape.len()], shape, data, elem_size, &mut out)?;
    }
    Ok(out)
}
