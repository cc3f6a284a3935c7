/*! This library finds long exact matches between a reference genome and streams of
 * query reads, using a persistent suffix array index.
 *
 * The reference is concatenated into a single lower-cased buffer (optionally doubled
 * with the reverse complement of every sequence) and indexed with suffix, inverse
 * suffix and longest-common-prefix arrays. Index construction results are cached in a
 * directory next to the input FASTA and memory-mapped on subsequent runs, so even a
 * multi-gigabyte index comes online in constant time.
 *
 * For every read, three flavours of maximal matches can be enumerated:
 *
 * - MEM: maximal exact matches, extendable on neither side
 * - MAM: MEMs that occur exactly once in the reference
 * - MUM: MAMs that are also unique in the query
 *
 * Queries are answered by a pool of worker threads fed through bounded ring buffers,
 * with results written as raw hits or as SAM records sorted by reference coordinate.
 *
 * ## Usage
 *
 * The [`run_auto`] entry point drives the whole tool from a [`Config`]. The index can
 * also be used directly:
 *
 * ```no_run
 * use longmem::{Config, SuffixIndex};
 *
 * let config = Config::new("reference.fa", Vec::new());
 * let index = SuffixIndex::<i32>::open(&config)?;
 *
 * let mut matches = Vec::new();
 * index.find_mems(b"acgtacgt", 4, &mut matches);
 *
 * for m in &matches {
 *     println!("ref {} query {} len {}", m.ref_pos, m.query_pos, m.len);
 * }
 * # Ok::<(), longmem::Error>(())
 * ```
 */

pub mod alphabet;
mod config;
mod error;

mod chromosomes;
mod compressed;
mod index;
mod lcp;
mod mappability;
mod reference;
mod storage;
mod suffix_sort;

mod align;
mod output;
mod pipeline;
mod query;
mod sam;

use bytemuck::Pod;
use num_traits::{NumCast, PrimInt, Signed};

use std::sync::Arc;

#[doc(inline)]
pub use config::{Config, IoOptions, MatchKind};
#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use chromosomes::ChromosomeMap;
#[doc(inline)]
pub use compressed::CompressedInts;
#[doc(inline)]
pub use index::{Match, SuffixIndex};
#[doc(inline)]
pub use mappability::write_mappability;
#[doc(inline)]
pub use reference::Reference;

#[doc(inline)]
pub use pipeline::{QueryReader, RingBuffer, WorkerPool};
#[doc(inline)]
pub use query::NewQuery;

/// Integer types that can store suffix array entries.
///
/// The maximum value of the type bounds the length of the indexable reference,
/// including separators, the sentinel and the optional reverse-complement copies.
/// Signedness is required because the suffix sorter marks sorted groups with
/// negated lengths. The cache files of an index embed `size_of::<I>()` in their
/// names, so indexes built with different widths coexist.
pub trait IndexInt: PrimInt + Signed + Pod + Send + Sync + sealed::Sealed + 'static {
    #[doc(hidden)]
    fn from_index(value: usize) -> Self {
        <Self as NumCast>::from(value).expect("index value fits the index type")
    }

    #[doc(hidden)]
    fn index(self) -> usize {
        self.to_usize().expect("index value is non-negative")
    }
}

impl sealed::Sealed for i32 {}
impl IndexInt for i32 {}

impl sealed::Sealed for i64 {}
impl IndexInt for i64 {}

mod sealed {
    pub trait Sealed {}
}

/// Answers the configured queries against the reference, building or loading the
/// index as needed, with the index type fixed to `I`.
///
/// Most callers should prefer [`run_auto`], which picks the index width.
pub fn run<I: IndexInt>(config: &Config) -> Result<()> {
    config.validate()?;

    let index = SuffixIndex::<I>::open(config)?;

    if config.mappability {
        // The first positional query argument names the output target.
        let target = config
            .inputs
            .first()
            .ok_or_else(|| Error::Config("-mappability requires an output target".into()))?;
        return write_mappability(&index, target);
    }

    let reference = index.reference();
    let chromosomes = Arc::new(ChromosomeMap::from_reference(reference, false));
    let header = Arc::new(reference.sam_header());

    let index = Arc::new(index);
    let pool = Arc::new(WorkerPool::new(config, index, chromosomes, header));

    let readers: Vec<QueryReader> = config
        .inputs
        .iter()
        .map(|input| QueryReader::spawn(input, config, Arc::clone(&pool)))
        .collect::<Result<_>>()?;

    let mut n_read = 0;
    for reader in readers {
        n_read += reader.join()?;
    }

    let n_processed = pool.finish()?;
    log::info!("read {n_read} and processed {n_processed} queries");

    Ok(())
}

/// Like [`run`], but selects the index integer width from the reference size.
///
/// A reference that fits comfortably below `i32::MAX` bytes (after accounting for
/// reverse-complement doubling) uses 32-bit suffix array entries, halving the
/// index footprint; anything larger uses 64-bit entries.
pub fn run_auto(config: &Config) -> Result<()> {
    let fasta_size = std::fs::metadata(&config.ref_fasta)
        .map_err(|source| Error::io("stat", &config.ref_fasta, source))?
        .len();

    let projected = fasta_size * if config.rcref { 2 } else { 1 };

    if projected + 100_000 < i32::MAX as u64 {
        run::<i32>(config)
    } else {
        run::<i64>(config)
    }
}
