use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Which flavour of maximal match to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Maximal matches unique in both the reference and the query.
    Mum,
    /// Maximal matches unique in the reference, but possibly repeated in the query.
    Mam,
    /// All maximal matches regardless of uniqueness.
    Mem,
}

/// How bulk index files are brought into memory.
#[derive(Debug, Clone, Copy)]
pub struct IoOptions {
    /// Map cache files read-only instead of reading them onto the heap.
    pub memory_map: bool,
    /// Pre-populate page tables when mapping, trading startup time for no
    /// first-touch faults. Disabled by `-cached`.
    pub populate: bool,
}

impl Default for IoOptions {
    fn default() -> Self {
        IoOptions {
            memory_map: true,
            populate: true,
        }
    }
}

/// The resolved command-line options, as consumed by the core.
#[derive(Debug, Clone)]
pub struct Config {
    pub ref_fasta: PathBuf,
    /// Query inputs; for `-mappability` the single output target instead.
    pub inputs: Vec<PathBuf>,
    pub kind: MatchKind,
    /// Minimum length of a reported match.
    pub min_len: usize,
    /// Match only a, c, g, t; every other query base becomes an out-of-alphabet marker.
    pub nucleotides_only: bool,
    /// Number of aligner worker threads.
    pub n_threads: usize,
    pub sam_out: bool,
    pub sam_in: bool,
    pub fastq: bool,
    /// Emit a record for unmapped reads too (SAM output only).
    pub nomap: bool,
    /// Append the reverse complement of every reference sequence.
    pub rcref: bool,
    /// Compute mappability instead of answering queries.
    pub mappability: bool,
    /// Minimum merged block length retained in SAM output.
    pub min_block: usize,
    pub out_dir: PathBuf,
    pub io: IoOptions,
    pub verbose: bool,
}

impl Config {
    pub fn new(ref_fasta: impl AsRef<Path>, inputs: Vec<PathBuf>) -> Self {
        Config {
            ref_fasta: ref_fasta.as_ref().to_owned(),
            inputs,
            kind: MatchKind::Mam,
            min_len: 20,
            nucleotides_only: false,
            n_threads: 1,
            sam_out: false,
            sam_in: false,
            fastq: false,
            nomap: false,
            rcref: false,
            mappability: false,
            min_block: 20,
            out_dir: PathBuf::from("mapout"),
            io: IoOptions::default(),
            verbose: false,
        }
    }

    /// Rejects incompatible flag combinations before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.fastq && self.sam_in {
            return Err(Error::Config("-fastq cannot be used with -samin".into()));
        }
        if self.nomap && !self.sam_out {
            return Err(Error::Config("-nomap can only be used with -samout".into()));
        }
        if self.mappability && !self.rcref {
            return Err(Error::Config("-mappability requires -rcref".into()));
        }
        if self.n_threads == 0 {
            return Err(Error::Config("at least one query thread is required".into()));
        }
        if self.min_len == 0 {
            return Err(Error::Config("minimum match length must be positive".into()));
        }
        Ok(())
    }
}
