//! The suffix array index: cache bundle handling and the traversal
//! algorithms that enumerate MEM, MAM and MUM matches.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::lcp::{self, CompressedLcp};
use crate::reference::{self, Reference};
use crate::storage::{self, MappedBuffer, MetaReader, MetaWriter};
use crate::suffix_sort;
use crate::{Config, Error, IndexInt, IoOptions, Result};

/// An occurrence of a query substring at an absolute reference position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Match {
    pub ref_pos: usize,
    pub query_pos: usize,
    pub len: usize,
}

/// A closed interval of suffix array ranks whose suffixes agree on the first
/// `depth` bytes.
#[derive(Debug, Clone, Copy)]
struct Interval {
    start: usize,
    end: usize,
    depth: usize,
}

impl Interval {
    fn root(n: usize) -> Self {
        Interval {
            start: 0,
            end: n - 1,
            depth: 0,
        }
    }

    fn size(&self) -> usize {
        self.end - self.start + 1
    }
}

struct CachePaths {
    meta: PathBuf,
    sa: PathBuf,
    isa: PathBuf,
    lcp_values: PathBuf,
    lcp_overflow: PathBuf,
}

impl CachePaths {
    fn new(fasta: &Path, rcref: bool, width: usize) -> Self {
        let dir = reference::cache_dir(fasta);
        let base = format!("rc{}.i{width}.index", rcref as u8);
        CachePaths {
            meta: dir.join(&base),
            sa: dir.join(format!("{base}.sa.bin")),
            isa: dir.join(format!("{base}.isa.bin")),
            lcp_values: dir.join(format!("{base}.lcp.vec.bin")),
            lcp_overflow: dir.join(format!("{base}.lcp.m.bin")),
        }
    }
}

/// The reference together with its suffix, inverse suffix and LCP arrays.
///
/// Construction happens once per reference and index width; afterwards the
/// bulk arrays are memory-mapped from the cache bundle next to the FASTA.
pub struct SuffixIndex<I: bytemuck::Pod> {
    reference: Reference,
    n: usize,
    log_n: usize,
    sa: MappedBuffer<I>,
    isa: MappedBuffer<I>,
    lcp: CompressedLcp,
}

impl<I: IndexInt> SuffixIndex<I> {
    /// Opens the index for the configured reference, building and caching it
    /// on first use.
    pub fn open(config: &Config) -> Result<Self> {
        let reference = Reference::open(config)?;
        Self::open_at(reference, &config.ref_fasta, &config.io)
    }

    fn open_at(reference: Reference, fasta: &Path, io: &IoOptions) -> Result<Self> {
        let paths = CachePaths::new(fasta, reference.rcref(), size_of::<I>());

        if storage::readable(&paths.meta) {
            log::info!("loading index binary");
            return Self::load(reference, &paths, io);
        }

        log::info!("creating index from reference");
        let start_time = Instant::now();

        let (sa, isa) = suffix_sort::build_suffix_array::<I>(reference.bases())?;
        let lcp = lcp::build_lcp(reference.bases(), &sa, &isa)?;

        let n = reference.len();
        let index = SuffixIndex {
            log_n: ceil_log2(n),
            n,
            reference,
            sa: MappedBuffer::from_vec(sa),
            isa: MappedBuffer::from_vec(isa),
            lcp,
        };

        log::info!("saving index");
        index.save(&paths)?;
        log::info!(
            "constructed index in {} seconds",
            start_time.elapsed().as_secs()
        );

        if io.memory_map {
            // Re-open through the cache so the bulk arrays are shared pages
            // instead of private heap copies.
            let SuffixIndex { reference, .. } = index;
            Self::load(reference, &paths, io)
        } else {
            Ok(index)
        }
    }

    fn save(&self, paths: &CachePaths) -> Result<()> {
        let mut meta = MetaWriter::create(&paths.meta)?;
        meta.put_u64(self.reference.fasta_size())?;
        meta.put_u64(self.log_n as u64)?;
        meta.put_u64(self.n as u64 - 1)?;
        meta.put_u64(self.n as u64)?;
        self.sa.save(&paths.sa)?;
        self.isa.save(&paths.isa)?;
        self.lcp
            .save(&mut meta, &paths.lcp_values, &paths.lcp_overflow)?;
        meta.finish()
    }

    fn load(reference: Reference, paths: &CachePaths, io: &IoOptions) -> Result<Self> {
        let mut meta = MetaReader::open(&paths.meta)?;

        let saved_fasta_size = meta.get_u64()?;
        if saved_fasta_size != reference.fasta_size() {
            return Err(Error::CacheMismatch {
                path: paths.meta.clone(),
            });
        }
        let _log_n = meta.get_u64()?;
        let _n_minus_one = meta.get_u64()?;
        let sa_len = meta.get_u64()? as usize;

        let n = reference.len();
        if sa_len != n {
            return Err(Error::Range(format!(
                "cached suffix array length {sa_len} does not match reference length {n}"
            )));
        }

        let sa = MappedBuffer::load(&paths.sa, io)?;
        let isa = MappedBuffer::load(&paths.isa, io)?;
        if sa.len() != n || isa.len() != n {
            return Err(Error::Range(
                "suffix array file sizes do not match the reference length".into(),
            ));
        }
        let lcp = CompressedLcp::load(&mut meta, &paths.lcp_values, &paths.lcp_overflow, io)?;
        if lcp.len() != n {
            return Err(Error::Range(
                "lcp file size does not match the reference length".into(),
            ));
        }

        Ok(SuffixIndex {
            log_n: ceil_log2(n),
            n,
            reference,
            sa,
            isa,
            lcp,
        })
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Length of the indexed text, including separators and the sentinel.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn suffix_array(&self) -> &[I] {
        self.sa.as_slice()
    }

    pub fn inverse_suffix_array(&self) -> &[I] {
        self.isa.as_slice()
    }

    pub fn lcp_value(&self, rank: usize) -> usize {
        self.lcp.get(rank)
    }

    pub(crate) fn sa_at(&self, rank: usize) -> usize {
        self.sa.as_slice()[rank].index()
    }

    pub(crate) fn isa_at(&self, pos: usize) -> usize {
        self.isa.as_slice()[pos].index()
    }

    /// All maximal exact matches of length at least `min_len`.
    pub fn find_mems(&self, pattern: &[u8], min_len: usize, matches: &mut Vec<Match>) {
        if min_len < 1 || pattern.is_empty() {
            return;
        }

        let mut prefix = 0;
        let mut mli = Interval::root(self.n); // minimum length interval
        let mut xmi = Interval::root(self.n); // maximal extension interval

        while prefix < pattern.len() {
            self.traverse(pattern, prefix, &mut mli, min_len);
            if mli.depth > xmi.depth {
                xmi = mli;
            }
            if mli.depth <= 1 {
                mli = Interval::root(self.n);
                xmi = Interval::root(self.n);
                prefix += 1;
                continue;
            }

            if mli.depth >= min_len {
                self.traverse(pattern, prefix, &mut xmi, pattern.len());
                self.collect_mems(pattern, prefix, min_len, mli, xmi, matches);
                prefix += 1;
                if !self.suffix_link(&mut mli) {
                    mli = Interval::root(self.n);
                    xmi = Interval::root(self.n);
                    continue;
                }
                self.suffix_link(&mut xmi);
            } else {
                prefix += 1;
                if !self.suffix_link(&mut mli) {
                    mli = Interval::root(self.n);
                    xmi = Interval::root(self.n);
                    continue;
                }
                xmi = mli;
            }
        }
    }

    /// Maximal matches that are unique in the reference. The query is
    /// streamed, so repeats in the query are still reported.
    pub fn find_mams(&self, pattern: &[u8], min_len: usize, matches: &mut Vec<Match>) {
        let mut cur = Interval::root(self.n);
        let mut prefix = 0;

        while prefix < pattern.len() {
            self.traverse(pattern, prefix, &mut cur, pattern.len());
            if cur.depth <= 1 {
                cur = Interval::root(self.n);
                prefix += 1;
                continue;
            }

            if cur.size() == 1 && cur.depth >= min_len {
                let ref_pos = self.sa_at(cur.start);
                if self.is_left_maximal(pattern, prefix, ref_pos) {
                    matches.push(Match {
                        ref_pos,
                        query_pos: prefix,
                        len: cur.depth,
                    });
                }
            }

            loop {
                cur.depth -= 1;
                cur.start = self.isa_at(self.sa_at(cur.start) + 1);
                cur.end = self.isa_at(self.sa_at(cur.end) + 1);
                prefix += 1;
                if cur.depth == 0 || !self.expand_link(&mut cur) {
                    cur = Interval::root(self.n);
                    break;
                }
                if !(cur.depth > 0 && cur.size() == 1) {
                    break;
                }
            }
        }
    }

    /// Maximal matches unique in both the reference and the query.
    pub fn find_mums(&self, pattern: &[u8], min_len: usize, matches: &mut Vec<Match>) {
        let mut candidates = Vec::new();
        self.find_mams(pattern, min_len, &mut candidates);

        // Adapted from Stephan Kurtz's cleanMUMcand code in MUMmer v3:
        // candidates whose rightmost reference coordinate does not advance the
        // rightmost coordinate seen so far are not unique.
        candidates.sort_unstable_by(|a, b| {
            a.ref_pos.cmp(&b.ref_pos).then(b.len.cmp(&a.len))
        });

        let mut rightmost = 0;
        let mut ignore_previous = false;
        for i in 0..candidates.len() {
            let mut ignore_current = false;
            let current_right = candidates[i].ref_pos + candidates[i].len - 1;
            if rightmost > current_right {
                ignore_current = true;
            } else if rightmost == current_right {
                ignore_current = true;
                if i > 0 && !ignore_previous && candidates[i - 1].ref_pos == candidates[i].ref_pos
                {
                    ignore_previous = true;
                }
            } else {
                rightmost = current_right;
            }
            if i > 0 && !ignore_previous {
                matches.push(candidates[i - 1]);
            }
            ignore_previous = ignore_current;
        }
        if !ignore_previous {
            if let Some(&last) = candidates.last() {
                matches.push(last);
            }
        }
    }

    /// Extends an interval one query position at a time until a mismatch or
    /// `max_depth` is reached.
    fn traverse(&self, pattern: &[u8], prefix: usize, cur: &mut Interval, max_depth: usize) {
        if cur.depth >= max_depth {
            return;
        }

        while prefix + cur.depth < pattern.len() {
            let mut start = cur.start;
            let mut end = cur.end;
            if !self.top_down_faster(pattern[prefix + cur.depth], cur.depth, &mut start, &mut end)
            {
                return;
            }

            cur.depth += 1;
            cur.start = start;
            cur.end = end;

            if cur.depth == max_depth {
                return;
            }
        }
    }

    /// Simulates a suffix link on an interval via ISA/LCP: drop the first
    /// character, remap both ends one position right, then widen back out to
    /// the full interval of the shortened prefix.
    fn suffix_link(&self, link: &mut Interval) -> bool {
        if link.depth <= 1 {
            link.depth = 0;
            return false;
        }
        link.depth -= 1;
        link.start = self.isa_at(self.sa_at(link.start) + 1);
        link.end = self.isa_at(self.sa_at(link.end) + 1);
        self.expand_link(link)
    }

    /// Interval expansion under LCP, bounded so the overall walk stays
    /// amortized linear. On budget exhaustion the link counts as failed and
    /// the caller restarts from the root interval.
    fn expand_link(&self, link: &mut Interval) -> bool {
        let threshold = 2 * link.depth * self.log_n;
        let mut expansions = 0;

        let mut start = link.start;
        let mut end = link.end;
        while self.lcp.get(start) >= link.depth {
            expansions += 1;
            if expansions >= threshold {
                return false;
            }
            start -= 1;
        }
        while end < self.n - 1 && self.lcp.get(end + 1) >= link.depth {
            expansions += 1;
            if expansions >= threshold {
                return false;
            }
            end += 1;
        }

        link.start = start;
        link.end = end;
        true
    }

    /// Every suffix in `xmi` is right-maximal at `xmi.depth`; test each for
    /// left-maximality, then walk the depth down to `mli.depth` with LCP
    /// backtracking, examining newly included suffixes along the way.
    fn collect_mems(
        &self,
        pattern: &[u8],
        prefix: usize,
        min_len: usize,
        mli: Interval,
        mut xmi: Interval,
        matches: &mut Vec<Match>,
    ) {
        for rank in xmi.start..=xmi.end {
            self.find_left_maximal(pattern, prefix, self.sa_at(rank), xmi.depth, min_len, matches);
        }

        if mli.start == xmi.start && mli.end == xmi.end {
            return;
        }

        while xmi.depth >= mli.depth {
            // unmatch the deepest characters of xmi using LCP information
            xmi.depth = if xmi.end + 1 < self.n {
                self.lcp.get(xmi.start).max(self.lcp.get(xmi.end + 1))
            } else {
                self.lcp.get(xmi.start)
            };

            if xmi.depth >= mli.depth {
                while self.lcp.get(xmi.start) >= xmi.depth {
                    xmi.start -= 1;
                    self.find_left_maximal(
                        pattern,
                        prefix,
                        self.sa_at(xmi.start),
                        xmi.depth,
                        min_len,
                        matches,
                    );
                }
                while xmi.end + 1 < self.n && self.lcp.get(xmi.end + 1) >= xmi.depth {
                    xmi.end += 1;
                    self.find_left_maximal(
                        pattern,
                        prefix,
                        self.sa_at(xmi.end),
                        xmi.depth,
                        min_len,
                        matches,
                    );
                }
            }
        }
    }

    /// Emits a right-maximal match if it is also left-maximal, with either
    /// string boundary counting as a witness.
    fn find_left_maximal(
        &self,
        pattern: &[u8],
        prefix: usize,
        ref_pos: usize,
        len: usize,
        min_len: usize,
        matches: &mut Vec<Match>,
    ) {
        if self.is_left_maximal(pattern, prefix, ref_pos) && len >= min_len {
            matches.push(Match {
                ref_pos,
                query_pos: prefix,
                len,
            });
        }
    }

    fn is_left_maximal(&self, pattern: &[u8], query_pos: usize, ref_pos: usize) -> bool {
        query_pos == 0
            || ref_pos == 0
            || pattern[query_pos - 1] != self.reference.bases()[ref_pos - 1]
    }

    /// Narrows an interval of suffixes agreeing on `depth` bytes to those
    /// whose next byte equals `c`, reusing the endpoint comparisons to skip
    /// one or both binary searches. Adapted from the wordSA implementation of
    /// Ferragina and Fischer, Suffix Arrays on Words, CPM 2007.
    fn top_down_faster(&self, c: u8, depth: usize, start: &mut usize, end: &mut usize) -> bool {
        let sa = self.sa.as_slice();
        let bases = self.reference.bases();
        let key = |rank: usize| bases[sa[rank].index() + depth] as i64;
        let c = c as i64;

        let mut l;
        let mut l2 = *start;
        let mut r2 = *end;
        let mut found = false;

        let cmp_with_first = c - key(*start);
        let cmp_with_last = c - key(*end);

        if cmp_with_first < 0 {
            // pattern does not occur
            l = *start + 1;
            l2 = *start;
        } else if cmp_with_last > 0 {
            l = *end + 1;
            l2 = *end;
        } else {
            // left border
            l = *start;
            let mut r = *end;
            if cmp_with_first == 0 {
                found = true;
                r2 = r;
            } else {
                while r > l + 1 {
                    let m = (l + r) / 2;
                    let cmp = c - key(m);
                    if cmp <= 0 {
                        if !found && cmp == 0 {
                            found = true;
                            l2 = m;
                            r2 = r; // search interval for the right border
                        }
                        r = m;
                    } else {
                        l = m;
                    }
                }
                l = r;
            }
            // right border, within [l2, r2]
            if !found {
                l2 = l - 1;
            }
            if cmp_with_last == 0 {
                l2 = *end;
            } else {
                while r2 > l2 + 1 {
                    let m = (l2 + r2) / 2;
                    if c - key(m) < 0 {
                        r2 = m;
                    } else {
                        l2 = m;
                    }
                }
            }
        }

        *start = l;
        *end = l2;
        l <= l2
    }
}

fn ceil_log2(n: usize) -> usize {
    (usize::BITS - (n - 1).leading_zeros()) as usize
}
