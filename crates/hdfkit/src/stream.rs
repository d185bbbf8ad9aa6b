//! Lazy block-wise reading of a dataset along its first axis.

use hdfkit_format::data_read::ArrayData;
use hdfkit_format::selection::Hyperslab;

use crate::error::Result;
use crate::reader::Dataset;

/// Iterator over consecutive row blocks of a dataset, returned by
/// [`Dataset::read_chunked`].
///
/// Each block holds up to `rows` entries of the first axis and every entry of
/// the remaining axes, so the blocks concatenate to the full read. Nothing is
/// read until the iterator is advanced. After an error the iterator ends.
#[derive(Debug)]
pub struct ChunkedRead<'d, 'f> {
    dataset: &'d Dataset<'f>,
    rows: u64,
    next_row: u64,
    done: bool,
}

impl<'d, 'f> ChunkedRead<'d, 'f> {
    pub(crate) fn new(dataset: &'d Dataset<'f>, rows: u64) -> Self {
        ChunkedRead {
            dataset,
            rows,
            next_row: 0,
            done: false,
        }
    }

    /// Number of blocks not yet produced.
    pub fn remaining(&self) -> u64 {
        if self.done {
            return 0;
        }
        match self.dataset.shape().first() {
            Some(&n) => n.saturating_sub(self.next_row).div_ceil(self.rows),
            None => 1,
        }
    }

    fn block(&self, first: u64, last: u64) -> Hyperslab {
        let shape = self.dataset.shape();
        let mut start = vec![0; shape.len()];
        let mut end = shape.to_vec();
        start[0] = first;
        end[0] = last;
        Hyperslab::range(start, end)
    }
}

impl Iterator for ChunkedRead<'_, '_> {
    type Item = Result<ArrayData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(&n) = self.dataset.shape().first() else {
            // scalar and null dataspaces come back as a single block
            self.done = true;
            return Some(self.dataset.read_data());
        };
        if self.next_row >= n {
            self.done = true;
            return None;
        }
        let first = self.next_row;
        let last = (first + self.rows).min(n);
        self.next_row = last;
        let block = self.dataset.read_selection(&self.block(first, last));
        if block.is_err() {
            self.done = true;
        }
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for ChunkedRead<'_, '_> {}

impl std::iter::FusedIterator for ChunkedRead<'_, '_> {}
