//! A compressed stream of small non-negative integers, stored as one byte per
//! value with a 16-bit overflow table for everything that does not fit.

use std::path::Path;

use crate::storage::MappedBuffer;
use crate::{Error, IoOptions, Result};

/// Sequentially written, sequentially read integer stream.
///
/// Values below 255 occupy one byte in `small`. Larger values are stored in
/// `big` and marked with a 255 byte in `small`, so the number of 255 markers
/// before any read position equals the overflow cursor at that position. The
/// monotone `lookup` table records overflow cursors for chosen checkpoints,
/// allowing a reader to [`relocate`](CompressedInts::relocate) without
/// scanning from the start.
pub struct CompressedInts {
    lookup: MappedBuffer<u32>,
    small: MappedBuffer<u8>,
    big: MappedBuffer<u16>,
    small_position: usize,
    big_position: usize,
}

impl CompressedInts {
    pub fn new() -> Self {
        CompressedInts {
            lookup: MappedBuffer::new(),
            small: MappedBuffer::new(),
            big: MappedBuffer::new(),
            small_position: 0,
            big_position: 0,
        }
    }

    /// Appends a value, splitting it into the small or overflow representation.
    /// Values above `u16::MAX` are clamped with a warning.
    pub fn add_int(&mut self, value: u32) {
        let value = if value > u16::MAX as u32 {
            log::warn!("clamping oversized compressed value {value}");
            u16::MAX as u32
        } else {
            value
        };

        if value >= u8::MAX as u32 {
            self.small.push(u8::MAX);
            self.big.push(value as u16);
        } else {
            self.small.push(value as u8);
        }
    }

    /// Records the current overflow cursor as the next lookup checkpoint.
    pub fn add_lookup_entry(&mut self) {
        self.lookup.push(self.big.len() as u32);
    }

    /// Reads the next value in sequence.
    pub fn next_int(&mut self) -> Result<u16> {
        if self.small_position == self.small.len() {
            return Err(Error::Range(
                "tried to read past the end of a compressed integer stream".into(),
            ));
        }
        let small = self.small.as_slice()[self.small_position];
        self.small_position += 1;
        if small == u8::MAX {
            let big = self.big.as_slice()[self.big_position];
            self.big_position += 1;
            Ok(big)
        } else {
            Ok(small as u16)
        }
    }

    /// Repositions the read cursors to a value position and the matching
    /// lookup checkpoint.
    pub fn relocate(&mut self, small_position: usize, lookup_entry: usize) -> Result<()> {
        let lookup = self.lookup.as_slice();
        let big_position = *lookup.get(lookup_entry).ok_or_else(|| {
            Error::Range(format!("no lookup entry {lookup_entry} in compressed stream"))
        })?;
        self.small_position = small_position;
        self.big_position = big_position as usize;
        Ok(())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.small.len()
    }

    pub fn is_empty(&self) -> bool {
        self.small.len() == 0
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|source| Error::io("create directory", dir, source))?;
        self.small.save(&dir.join("counts.bin"))?;
        self.big.save(&dir.join("over.bin"))?;
        self.lookup.save(&dir.join("lookup.bin"))
    }

    pub fn load(
        dir: &Path,
        small_start: usize,
        lookup_start: usize,
        io: &IoOptions,
    ) -> Result<Self> {
        let mut stream = CompressedInts {
            lookup: MappedBuffer::load(&dir.join("lookup.bin"), io)?,
            small: MappedBuffer::load(&dir.join("counts.bin"), io)?,
            big: MappedBuffer::load(&dir.join("over.bin"), io)?,
            small_position: 0,
            big_position: 0,
        };
        stream.relocate(small_start, lookup_start)?;
        Ok(stream)
    }
}

impl Default for CompressedInts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_and_overflow_values_round_trip() {
        let values = [0u32, 1, 254, 255, 256, 65535, 17, 1000];

        let mut stream = CompressedInts::new();
        stream.add_lookup_entry();
        for &value in &values {
            stream.add_int(value);
        }

        for &value in &values {
            assert_eq!(stream.next_int().unwrap() as u32, value);
        }
        assert!(stream.next_int().is_err());
    }

    #[test]
    fn oversized_values_are_clamped() {
        let mut stream = CompressedInts::new();
        stream.add_lookup_entry();
        stream.add_int(1 << 20);
        assert_eq!(stream.next_int().unwrap(), u16::MAX);
    }

    #[test]
    fn relocate_by_lookup_checkpoint() {
        let mut stream = CompressedInts::new();
        stream.add_lookup_entry(); // checkpoint 0 at value 0
        stream.add_int(300);
        stream.add_int(5);
        stream.add_lookup_entry(); // checkpoint 1 at value 2
        stream.add_int(400);

        stream.relocate(2, 1).unwrap();
        assert_eq!(stream.next_int().unwrap(), 400);

        stream.relocate(0, 0).unwrap();
        assert_eq!(stream.next_int().unwrap(), 300);
        assert_eq!(stream.next_int().unwrap(), 5);
    }

    #[test]
    fn save_and_load_preserve_the_stream() {
        let dir = tempfile::tempdir().unwrap();

        let mut stream = CompressedInts::new();
        stream.add_lookup_entry();
        for value in [7u32, 300, 0, 65535] {
            stream.add_int(value);
        }
        stream.save(dir.path()).unwrap();

        let mut loaded =
            CompressedInts::load(dir.path(), 0, 0, &crate::IoOptions::default()).unwrap();
        for value in [7u16, 300, 0, 65535] {
            assert_eq!(loaded.next_int().unwrap(), value);
        }
    }
}
