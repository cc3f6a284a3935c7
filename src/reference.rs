//! Loads a FASTA reference into a single concatenated, lower-cased byte buffer
//! and caches the result next to the input file.

use memchr::memchr;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::alphabet::{self, SENTINEL, SEPARATOR};
use crate::storage::{self, MappedBuffer, MetaReader, MetaWriter};
use crate::{Config, Error, IoOptions, Result};

/// The cache directory for a reference FASTA, named after the input file.
pub(crate) fn cache_dir(fasta: &Path) -> PathBuf {
    let mut name = fasta.as_os_str().to_owned();
    name.push(".bin");
    PathBuf::from(name)
}

/// The concatenated reference: all sequences lower-cased, separated by
/// [`SEPARATOR`] bytes and terminated by the [`SENTINEL`].
///
/// With reverse-complement mode enabled, every sequence is followed by its
/// reverse complement as an extra subsequence sharing name and length, so
/// subsequence `2k` is the k-th forward sequence and `2k + 1` its flip.
pub struct Reference {
    bases: MappedBuffer<u8>,
    names: Vec<String>,
    starts: Vec<u64>,
    lengths: Vec<u64>,
    max_name_len: usize,
    rcref: bool,
    fasta_size: u64,
}

impl Reference {
    /// Loads the cached reference if one matches the FASTA, otherwise parses
    /// the FASTA and writes the cache.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(&config.ref_fasta, config.rcref, &config.io)
    }

    pub(crate) fn open_at(fasta: &Path, rcref: bool, io: &IoOptions) -> Result<Self> {
        let dir = cache_dir(fasta);
        std::fs::create_dir_all(&dir)
            .map_err(|source| Error::io("create directory", &dir, source))?;

        let meta_path = dir.join(format!("rc{}.ref", rcref as u8));
        let seq_path = dir.join(format!("rc{}.ref.seq.bin", rcref as u8));
        let fasta_size = storage::file_size(fasta)?;

        if storage::readable(&meta_path) {
            log::info!("loading reference binary");
            Self::load(fasta, &meta_path, &seq_path, rcref, fasta_size, io)
        } else {
            log::info!("loading reference from fasta");
            let reference = Self::parse_fasta(fasta, rcref, fasta_size)?;
            log::info!("saving reference binary");
            reference.save(&meta_path, &seq_path)?;
            Ok(reference)
        }
    }

    fn parse_fasta(fasta: &Path, rcref: bool, fasta_size: u64) -> Result<Self> {
        let file = File::open(fasta).map_err(|source| Error::io("open", fasta, source))?;
        let reader = BufReader::new(file);

        let mut bases: Vec<u8> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut starts: Vec<u64> = vec![0];
        let mut lengths: Vec<u64> = Vec::new();

        let mut current: Option<String> = None;
        let mut current_len: usize = 0;

        let finalize = |bases: &mut Vec<u8>,
                            names: &mut Vec<String>,
                            starts: &mut Vec<u64>,
                            lengths: &mut Vec<u64>,
                            name: String,
                            len: usize,
                            more: bool| {
            // Headerless or empty records are dropped, matching the loader
            // this cache format originated from.
            if len == 0 {
                return;
            }
            let this_start = *starts.last().expect("starts is never empty") as usize;
            log::debug!("{name} {len} {this_start}");
            names.push(name.clone());
            lengths.push(len as u64);
            if rcref || more {
                bases.push(SEPARATOR);
                starts.push(bases.len() as u64);
            }
            if rcref {
                names.push(name);
                lengths.push(len as u64);
                let mut flipped = bases[this_start..this_start + len].to_vec();
                alphabet::reverse_complement(&mut flipped);
                bases.extend_from_slice(&flipped);
                if more {
                    bases.push(SEPARATOR);
                    starts.push(bases.len() as u64);
                }
            }
        };

        for line in reader.lines() {
            let line = line.map_err(|source| Error::io("read", fasta, source))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(description) = line.strip_prefix('>') {
                if let Some(name) = current.take() {
                    finalize(
                        &mut bases,
                        &mut names,
                        &mut starts,
                        &mut lengths,
                        name,
                        current_len,
                        true,
                    );
                }
                current = Some(header_name(description));
                current_len = 0;
            } else {
                if current.is_none() {
                    return Err(Error::parse(format!(
                        "sequence data before the first header in {}",
                        fasta.display()
                    )));
                }
                current_len += line.len();
                bases.extend(line.bytes().map(|b| b.to_ascii_lowercase()));
            }
        }

        if let Some(name) = current.take() {
            finalize(
                &mut bases,
                &mut names,
                &mut starts,
                &mut lengths,
                name,
                current_len,
                false,
            );
        }

        if names.is_empty() {
            return Err(Error::parse(format!(
                "no sequences found in {}",
                fasta.display()
            )));
        }

        bases.push(SENTINEL);
        log::debug!("reference length {}", bases.len());

        let max_name_len = names.iter().map(|name| name.len()).max().unwrap_or(0);

        Ok(Reference {
            bases: MappedBuffer::from_vec(bases),
            names,
            starts,
            lengths,
            max_name_len,
            rcref,
            fasta_size,
        })
    }

    fn save(&self, meta_path: &Path, seq_path: &Path) -> Result<()> {
        self.bases.save(seq_path)?;

        let mut meta = MetaWriter::create(meta_path)?;
        meta.put_u64(self.fasta_size)?;
        meta.put_u64(self.bases.len() as u64)?;
        meta.put_u64(self.names.len() as u64)?;
        for k in 0..self.names.len() {
            meta.put_u64(self.starts[k])?;
            meta.put_u64(self.lengths[k])?;
            meta.put_string(&self.names[k])?;
        }
        meta.put_u64(self.max_name_len as u64)?;
        meta.finish()
    }

    fn load(
        fasta: &Path,
        meta_path: &Path,
        seq_path: &Path,
        rcref: bool,
        fasta_size: u64,
        io: &IoOptions,
    ) -> Result<Self> {
        let mut meta = MetaReader::open(meta_path)?;

        let saved_fasta_size = meta.get_u64()?;
        if saved_fasta_size != fasta_size {
            return Err(Error::CacheMismatch {
                path: fasta.to_owned(),
            });
        }

        let n = meta.get_u64()? as usize;
        let bases = MappedBuffer::load(seq_path, io)?;
        if bases.len() != n {
            return Err(Error::Range(format!(
                "cached base count {} does not match metadata count {n}",
                bases.len()
            )));
        }

        let n_sequences = meta.get_u64()? as usize;
        let mut names = Vec::with_capacity(n_sequences);
        let mut starts = Vec::with_capacity(n_sequences);
        let mut lengths = Vec::with_capacity(n_sequences);
        for _ in 0..n_sequences {
            starts.push(meta.get_u64()?);
            lengths.push(meta.get_u64()?);
            names.push(meta.get_string()?);
        }
        let max_name_len = meta.get_u64()? as usize;

        Ok(Reference {
            bases,
            names,
            starts,
            lengths,
            max_name_len,
            rcref,
            fasta_size,
        })
    }

    /// Total length including separators and the sentinel.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.len() == 0
    }

    pub fn bases(&self) -> &[u8] {
        self.bases.as_slice()
    }

    pub fn num_sequences(&self) -> usize {
        self.names.len()
    }

    pub fn name(&self, k: usize) -> &str {
        &self.names[k]
    }

    pub fn start(&self, k: usize) -> u64 {
        self.starts[k]
    }

    pub fn length(&self, k: usize) -> u64 {
        self.lengths[k]
    }

    pub fn rcref(&self) -> bool {
        self.rcref
    }

    pub(crate) fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    pub(crate) fn fasta_size(&self) -> u64 {
        self.fasta_size
    }

    /// The subsequence containing an absolute position: the greatest `k` with
    /// `start(k) <= abs_pos`.
    pub fn sequence_at(&self, abs_pos: u64) -> usize {
        self.starts.partition_point(|&start| start <= abs_pos) - 1
    }

    /// The alignment-record header for this reference, listing every forward
    /// subsequence.
    pub fn sam_header(&self) -> String {
        let mut header = String::from("@HD\tVN:1.0\tSO:unsorted\n");
        let stride = if self.rcref { 2 } else { 1 };
        for k in (0..self.names.len()).step_by(stride) {
            header.push_str(&format!(
                "@SQ\tSN:{}\tLN:{}\n",
                self.names[k], self.lengths[k]
            ));
        }
        header.push_str("@PG\tID:longMEM\tPN:longMEM\tVN:0.5\n");
        header
    }
}

/// The name of a record is the first whitespace-delimited token of its
/// description line.
fn header_name(description: &str) -> String {
    let description = description.trim();
    match memchr(b' ', description.as_bytes()) {
        Some(space) => description[..space].to_owned(),
        None => description.to_owned(),
    }
}
