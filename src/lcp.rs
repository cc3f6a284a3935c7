//! The longest-common-prefix array, stored as one clamped byte per position
//! with a sorted side table for the rare values that do not fit.

use bytemuck::{Pod, Zeroable};

use std::path::Path;

use crate::storage::{MappedBuffer, MetaReader, MetaWriter};
use crate::{Error, IndexInt, IoOptions, Result};

/// A side-table record for an LCP value of 255 or more.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct LcpEntry {
    pub(crate) index: u64,
    pub(crate) value: u64,
}

/// LCP values clamped at 255 in a byte array; the true value of any position
/// whose byte reads 255 lives in an `(index, value)` side table, sorted by
/// index once construction finishes and binary-searched on lookup.
pub(crate) struct CompressedLcp {
    values: MappedBuffer<u8>,
    overflow: MappedBuffer<LcpEntry>,
}

impl CompressedLcp {
    fn with_len(n: usize) -> Result<Self> {
        let mut values = crate::error::reserve_exact::<u8>("lcp array", n)?;
        values.resize(n, 0);
        Ok(CompressedLcp {
            values: MappedBuffer::from_vec(values),
            overflow: MappedBuffer::new(),
        })
    }

    fn set(&mut self, index: usize, value: usize) {
        if value >= u8::MAX as usize {
            self.values.as_mut_slice()[index] = u8::MAX;
            self.overflow.push(LcpEntry {
                index: index as u64,
                value: value as u64,
            });
        } else {
            self.values.as_mut_slice()[index] = value as u8;
        }
    }

    /// Sorts the side table; must run once after all values are set.
    fn finish(&mut self) {
        self.overflow
            .as_mut_slice()
            .sort_unstable_by_key(|entry| entry.index);
    }

    pub(crate) fn get(&self, index: usize) -> usize {
        let clamped = self.values.as_slice()[index];
        if clamped < u8::MAX {
            clamped as usize
        } else {
            let overflow = self.overflow.as_slice();
            let at = overflow
                .binary_search_by_key(&(index as u64), |entry| entry.index)
                .expect("clamped lcp positions have an overflow entry");
            overflow[at].value as usize
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn n_overflow(&self) -> usize {
        self.overflow.len()
    }

    pub(crate) fn save(
        &self,
        meta: &mut MetaWriter,
        values_path: &Path,
        overflow_path: &Path,
    ) -> Result<()> {
        meta.put_u64(self.values.len() as u64)?;
        self.values.save(values_path)?;
        meta.put_u64(self.overflow.len() as u64)?;
        self.overflow.save(overflow_path)
    }

    pub(crate) fn load(
        meta: &mut MetaReader,
        values_path: &Path,
        overflow_path: &Path,
        io: &IoOptions,
    ) -> Result<Self> {
        let n_values = meta.get_u64()? as usize;
        let values = MappedBuffer::load(values_path, io)?;
        if values.len() != n_values {
            return Err(Error::Range(format!(
                "lcp array length {} does not match metadata count {n_values}",
                values.len()
            )));
        }
        let n_overflow = meta.get_u64()? as usize;
        let overflow = MappedBuffer::load(overflow_path, io)?;
        if overflow.len() != n_overflow {
            return Err(Error::Range(format!(
                "lcp side table length {} does not match metadata count {n_overflow}",
                overflow.len()
            )));
        }
        Ok(CompressedLcp { values, overflow })
    }
}

/// Kasai's linear-time LCP construction from the text and both suffix arrays.
pub(crate) fn build_lcp<I: IndexInt>(
    bases: &[u8],
    sa: &[I],
    isa: &[I],
) -> Result<CompressedLcp> {
    let n = bases.len();
    let mut lcp = CompressedLcp::with_len(n)?;

    let mut h = 0usize;
    for i in 0..n {
        let rank = isa[i].index();
        if rank == 0 {
            lcp.set(rank, 0);
        } else {
            let j = sa[rank - 1].index();
            while i + h < n && j + h < n && bases[i + h] == bases[j + h] {
                h += 1;
            }
            lcp.set(rank, h);
        }
        h = h.saturating_sub(1);
    }

    lcp.finish();
    Ok(lcp)
}
