//! Binary I/O primitives: typed metadata streams, whole-file read-only
//! mappings and the two-lifecycle buffer that backs every bulk index array.

use bytemuck::Pod;
use memmap2::{Advice, Mmap, MmapOptions};

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::reserve_exact;
use crate::{Error, IoOptions, Result};

// Advisory ranges are rounded down to this boundary before being handed to the
// kernel. Advice on a slightly larger range is harmless.
const PAGE_SIZE: usize = 4096;

pub(crate) fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)
        .map_err(|source| Error::io("stat", path, source))?
        .len())
}

pub(crate) fn readable(path: &Path) -> bool {
    File::open(path).is_ok()
}

/// A whole file mapped read-only into the address space.
pub(crate) struct MappedFile {
    map: Mmap,
    path: PathBuf,
}

impl MappedFile {
    pub(crate) fn open(path: &Path, io: &IoOptions) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::io("open", path, source))?;

        let mut options = MmapOptions::new();
        if io.populate {
            options.populate();
        }

        // SAFETY: the cache files are treated as immutable once written; mutating
        // them concurrently is outside the supported use of the tool.
        let map = unsafe { options.map(&file) }
            .map_err(|source| Error::io("memory map", path, source))?;

        Ok(MappedFile {
            map,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn sequential(&self) -> Result<()> {
        self.advise(Advice::Sequential)
    }

    #[allow(dead_code)]
    pub(crate) fn random(&self) -> Result<()> {
        self.advise(Advice::Random)
    }

    #[allow(dead_code)]
    pub(crate) fn needed(&self) -> Result<()> {
        self.advise(Advice::WillNeed)
    }

    fn advise(&self, advice: Advice) -> Result<()> {
        self.map
            .advise(advice)
            .map_err(|source| Error::io("advise", &self.path, source))
    }

    /// Advice for a sub-range, rounded down to a page boundary.
    #[allow(dead_code)]
    pub(crate) fn advise_range(&self, advice: Advice, offset: usize, len: usize) -> Result<()> {
        let aligned = (offset / PAGE_SIZE) * PAGE_SIZE;
        self.map
            .advise_range(advice, aligned, len + (offset - aligned))
            .map_err(|source| Error::io("advise", &self.path, source))
    }
}

/// A typed array that exists in one of two disjoint lifecycles: a growable
/// heap buffer while an index is being built, or a read-only view of a cache
/// file after loading. Mutation is only permitted in the build lifecycle.
pub(crate) enum MappedBuffer<T: Pod> {
    Owned(Vec<T>),
    Mapped(MappedFile),
}

impl<T: Pod> MappedBuffer<T> {
    pub(crate) fn new() -> Self {
        MappedBuffer::Owned(Vec::new())
    }

    pub(crate) fn from_vec(values: Vec<T>) -> Self {
        MappedBuffer::Owned(values)
    }

    /// Reads a cache file back, either as a mapping or onto the heap depending
    /// on the I/O options. The element count is the file size divided by the
    /// element size; a trailing partial element is an error.
    pub(crate) fn load(path: &Path, io: &IoOptions) -> Result<Self> {
        if file_size(path)? == 0 {
            // Mapping a zero-length file is an error on most systems.
            return Ok(MappedBuffer::Owned(Vec::new()));
        }

        if io.memory_map {
            let file = MappedFile::open(path, io)?;
            if file.bytes().len() % size_of::<T>() != 0 {
                return Err(Error::Range(format!(
                    "size of {} is not a multiple of the element size",
                    path.display()
                )));
            }
            file.sequential()?;
            Ok(MappedBuffer::Mapped(file))
        } else {
            let n_bytes = file_size(path)? as usize;
            if n_bytes % size_of::<T>() != 0 {
                return Err(Error::Range(format!(
                    "size of {} is not a multiple of the element size",
                    path.display()
                )));
            }
            let mut values = reserve_exact::<T>("loaded array", n_bytes / size_of::<T>())?;
            values.resize(n_bytes / size_of::<T>(), T::zeroed());
            let mut file = File::open(path).map_err(|source| Error::io("open", path, source))?;
            file.read_exact(bytemuck::cast_slice_mut(&mut values))
                .map_err(|source| Error::io("read", path, source))?;
            Ok(MappedBuffer::Owned(values))
        }
    }

    /// Writes exactly the current elements. Used for both lifecycles, so a
    /// rebuilt index can be compared byte for byte against a loaded one.
    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|source| Error::io("create", path, source))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytemuck::cast_slice(self.as_slice()))
            .map_err(|source| Error::io("write", path, source))?;
        writer
            .flush()
            .map_err(|source| Error::io("write", path, source))
    }

    pub(crate) fn push(&mut self, value: T) {
        match self {
            MappedBuffer::Owned(values) => values.push(value),
            MappedBuffer::Mapped(file) => {
                unreachable!("push into read-only buffer {}", file.path().display())
            }
        }
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        match self {
            MappedBuffer::Owned(values) => values,
            MappedBuffer::Mapped(file) => bytemuck::cast_slice(file.bytes()),
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            MappedBuffer::Owned(values) => values,
            MappedBuffer::Mapped(file) => {
                unreachable!("mutable access to read-only buffer {}", file.path().display())
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// Sequential little-endian writer for the small metadata headers of the
/// cache bundles. Every operation error carries the file path.
pub(crate) struct MetaWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl MetaWriter {
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| Error::io("create", path, source))?;
        Ok(MetaWriter {
            writer: BufWriter::new(file),
            path: path.to_owned(),
        })
    }

    pub(crate) fn put_u64(&mut self, value: u64) -> Result<()> {
        self.writer
            .write_all(&value.to_le_bytes())
            .map_err(|source| Error::io("write", &self.path, source))
    }

    pub(crate) fn put_string(&mut self, value: &str) -> Result<()> {
        self.put_u64(value.len() as u64)?;
        self.writer
            .write_all(value.as_bytes())
            .map_err(|source| Error::io("write", &self.path, source))
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|source| Error::io("write", &self.path, source))
    }
}

/// Counterpart of [`MetaWriter`]; partial reads are always errors.
pub(crate) struct MetaReader {
    reader: BufReader<File>,
    path: PathBuf,
}

impl MetaReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::io("open", path, source))?;
        Ok(MetaReader {
            reader: BufReader::new(file),
            path: path.to_owned(),
        })
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|source| Error::io("read", &self.path, source))?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub(crate) fn get_string(&mut self) -> Result<String> {
        let len = self.get_u64()? as usize;
        let mut bytes = vec![0u8; len];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|source| Error::io("read", &self.path, source))?;
        String::from_utf8(bytes)
            .map_err(|_| Error::parse(format!("non-utf8 string in {}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoOptions;

    #[test]
    fn buffer_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.bin");

        let mut buffer = MappedBuffer::<i64>::new();
        for value in [3i64, -1, 1 << 40, 0] {
            buffer.push(value);
        }
        buffer.save(&path).unwrap();

        let mapped = MappedBuffer::<i64>::load(&path, &IoOptions::default()).unwrap();
        assert_eq!(mapped.as_slice(), buffer.as_slice());
        assert!(matches!(mapped, MappedBuffer::Mapped(_)));

        let heap = MappedBuffer::<i64>::load(
            &path,
            &IoOptions {
                memory_map: false,
                populate: false,
            },
        )
        .unwrap();
        assert_eq!(heap.as_slice(), buffer.as_slice());
        assert!(matches!(heap, MappedBuffer::Owned(_)));
    }

    #[test]
    fn empty_file_loads_as_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let buffer = MappedBuffer::<u16>::load(&path, &IoOptions::default()).unwrap();
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        assert!(MappedBuffer::<u16>::load(&path, &IoOptions::default()).is_err());
    }

    #[test]
    fn metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta");

        let mut writer = MetaWriter::create(&path).unwrap();
        writer.put_u64(42).unwrap();
        writer.put_string("chr1").unwrap();
        writer.put_u64(u64::MAX).unwrap();
        writer.finish().unwrap();

        let mut reader = MetaReader::open(&path).unwrap();
        assert_eq!(reader.get_u64().unwrap(), 42);
        assert_eq!(reader.get_string().unwrap(), "chr1");
        assert_eq!(reader.get_u64().unwrap(), u64::MAX);
        assert!(reader.get_u64().is_err());
    }
}
