use std::path::{Path, PathBuf};

/// The error type for everything that can go wrong while building an index or
/// answering queries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The persisted cache was built from a FASTA file of a different size.
    #[error(
        "cached size for {} does not match the current fasta size\n\
         maybe the reference has changed?\n\
         if so, delete the cache directory to proceed",
        .path.display()
    )]
    CacheMismatch { path: PathBuf },

    #[error("could not {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown chromosome {0}")]
    UnknownChromosome(String),

    /// An internal invariant does not hold. Always fatal.
    #[error("range error: {0}")]
    Range(String),

    #[error("out of memory allocating {what} ({n_bytes} bytes)")]
    Alloc { what: &'static str, n_bytes: usize },

    #[error("{0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            op,
            path: path.as_ref().to_owned(),
            source,
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fallible reservation for the large build-time buffers, so running out of
/// memory while indexing a big genome reports the buffer instead of aborting.
pub(crate) fn reserve_exact<T>(what: &'static str, n: usize) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(n).map_err(|_| Error::Alloc {
        what,
        n_bytes: n * size_of::<T>(),
    })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_path_and_operation() {
        let error = Error::io(
            "open",
            "some/file.bin",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );

        let message = error.to_string();
        assert!(message.contains("open"));
        assert!(message.contains("some/file.bin"));
    }

    #[test]
    fn reserve_allocates_the_requested_capacity() {
        let buffer: Vec<u64> = reserve_exact("test buffer", 16).unwrap();
        assert!(buffer.capacity() >= 16);
    }
}
