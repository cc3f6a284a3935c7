//! An ordered view of the reference sequences with name and coordinate
//! lookups, shared by the output sorter and downstream consumers of the
//! mappability map.

use std::collections::HashMap;

use crate::{Error, Reference, Result};

/// Conventional name for "no chromosome" in alignment records. Maps to the
/// total reference length so unmapped records sort after everything else.
pub const NO_CHROMOSOME: &str = "*";

pub struct ChromosomeMap {
    lookup: HashMap<String, usize>,
    names: Vec<String>,
    offsets: Vec<u64>,
    lengths: Vec<u64>,
    ends: Vec<u64>,
    total: u64,
}

impl ChromosomeMap {
    /// Builds the map over the forward subsequences of a reference.
    ///
    /// `simple_only` drops names containing an underscore or `M`, filtering
    /// unplaced contigs and the mitochondrion.
    pub fn from_reference(reference: &Reference, simple_only: bool) -> Self {
        let stride = if reference.rcref() { 2 } else { 1 };
        let entries = (0..reference.num_sequences())
            .step_by(stride)
            .map(|k| (reference.name(k).to_owned(), reference.length(k)));
        Self::from_entries(entries, simple_only)
    }

    pub fn from_sequences(names: &[String], lengths: &[u64], simple_only: bool) -> Self {
        let entries = names.iter().cloned().zip(lengths.iter().copied());
        Self::from_entries(entries, simple_only)
    }

    fn from_entries(entries: impl Iterator<Item = (String, u64)>, simple_only: bool) -> Self {
        let mut map = ChromosomeMap {
            lookup: HashMap::new(),
            names: Vec::new(),
            offsets: Vec::new(),
            lengths: Vec::new(),
            ends: Vec::new(),
            total: 0,
        };

        for (name, length) in entries {
            if simple_only && name.contains(['_', 'M']) {
                continue;
            }
            map.lookup.insert(name.clone(), map.names.len());
            map.names.push(name);
            map.offsets.push(map.total);
            map.lengths.push(length);
            map.total += length;
            map.ends.push(map.total);
        }

        map
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, i: usize) -> &str {
        &self.names[i]
    }

    pub fn offset(&self, i: usize) -> u64 {
        self.offsets[i]
    }

    pub fn length(&self, i: usize) -> u64 {
        self.lengths[i]
    }

    pub fn end(&self, i: usize) -> u64 {
        self.ends[i]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn index(&self, name: &str) -> Result<usize> {
        self.lookup
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownChromosome(name.to_owned()))
    }

    /// The absolute coordinate where a chromosome starts. The `*` placeholder
    /// resolves past the last chromosome.
    pub fn abs_start(&self, name: &str) -> Result<u64> {
        if name == NO_CHROMOSOME {
            return Ok(self.total);
        }
        Ok(self.offsets[self.index(name)?])
    }

    /// `(name, pos)` to a position in the concatenated coordinate space.
    pub fn abspos(&self, name: &str, pos: u64) -> Result<u64> {
        Ok(self.abs_start(name)? + pos)
    }

    /// Absolute position back to `(name, in-chromosome position)`.
    ///
    /// A linear scan: chromosome counts are small.
    pub fn chrpos(&self, abs_pos: u64) -> Result<(&str, u64)> {
        for i in 0..self.names.len() {
            if abs_pos < self.ends[i] {
                return Ok((&self.names[i], abs_pos - self.offsets[i]));
            }
        }
        Err(Error::Range(format!("no chromosome holds position {abs_pos}")))
    }
}
