//! Turns raw matches into alignments: resolves absolute reference positions
//! into per-sequence coordinates, merges co-located matches into one CIGAR,
//! links mates and formats the output records.

use std::sync::Arc;

use crate::alphabet;
use crate::index::{Match, SuffixIndex};
use crate::output::OutputSorter;
use crate::query::NewQuery;
use crate::reference::Reference;
use crate::sam;
use crate::{Config, IndexInt, MatchKind, Result};

/// Where the primary alignment of the mate read landed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MateRef {
    seq_index: usize,
    pos: i64,
}

/// What a read exposes to its mate for linking.
pub(crate) struct MateView {
    n_alignments: usize,
    primary: Option<MateRef>,
}

#[derive(Debug, Default)]
struct Alignment {
    /// Absolute position of the unflipped query start in the doubled reference.
    rc_pos: i64,
    /// Position of the query start within its sequence; negative positions
    /// hang off the start of the sequence and are dropped.
    pos: i64,
    /// Query offset of the first merged segment, for output ordering.
    qpos: usize,
    seq_index: usize,
    prefix: usize,
    length: usize,
    suffix: usize,
    n_matches: usize,
    n_unique_bases: usize,
    n_matched_bases: usize,
    alignment_index: usize,
    prev: Option<usize>,
    next: Option<usize>,
    mate: Option<MateRef>,
    cigar: String,
    reversed: bool,
}

impl Alignment {
    fn resolve(m: &Match, query_len: usize, reference: &Reference) -> Alignment {
        let mut seq_index = reference.sequence_at(m.ref_pos as u64);
        let rc_pos = m.ref_pos as i64 - m.query_pos as i64;
        let mut pos = rc_pos - reference.start(seq_index) as i64;
        let extra = query_len - m.len - m.query_pos;

        let (prefix, suffix, reversed);
        if reference.rcref() && seq_index % 2 == 1 {
            // a hit on the reverse-complement copy maps back to the forward
            // sequence with flipped coordinates and swapped clips
            seq_index -= 1;
            pos = reference.length(seq_index) as i64 - pos - query_len as i64;
            prefix = extra;
            suffix = m.query_pos;
            reversed = true;
        } else {
            prefix = m.query_pos;
            suffix = extra;
            reversed = false;
        }

        Alignment {
            rc_pos,
            pos,
            qpos: m.query_pos,
            seq_index,
            prefix,
            length: m.len,
            suffix,
            cigar: String::from("*"),
            reversed,
            ..Alignment::default()
        }
    }

    fn unmapped() -> Alignment {
        Alignment {
            cigar: String::from("*"),
            ..Alignment::default()
        }
    }
}

/// One read being aligned. A worker owns two of these, one per mate.
pub(crate) struct Aligner<I: bytemuck::Pod> {
    index: Arc<SuffixIndex<I>>,
    kind: MatchKind,
    min_len: usize,
    min_block: usize,
    sam_out: bool,
    nomap: bool,

    name: String,
    bases: Vec<u8>,
    original: Vec<u8>,
    quals: Vec<u8>,
    optional: String,
    rc_original: Vec<u8>,
    read_flag: u16,

    matches: Vec<Match>,
    alignments: Vec<Alignment>,
    order: Vec<usize>,
    best: Option<usize>,
    n_alignments: usize,
    line: Vec<u8>,
}

impl<I: IndexInt> Aligner<I> {
    pub(crate) fn new(config: &Config, index: Arc<SuffixIndex<I>>) -> Self {
        Aligner {
            index,
            kind: config.kind,
            min_len: config.min_len,
            min_block: config.min_block,
            sam_out: config.sam_out,
            nomap: config.nomap,
            name: String::new(),
            bases: Vec::new(),
            original: Vec::new(),
            quals: Vec::new(),
            optional: String::new(),
            rc_original: Vec::new(),
            read_flag: 0,
            matches: Vec::new(),
            alignments: Vec::new(),
            order: Vec::new(),
            best: None,
            n_alignments: 0,
            line: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self, query: NewQuery) {
        self.name = query.name;
        self.bases = query.bases;
        self.original = query.original;
        self.quals = query.quals;
        self.optional = query.optional;
        self.rc_original.clear();
        self.read_flag = 0;
        self.matches.clear();
        self.alignments.clear();
        self.order.clear();
        self.best = None;
        self.n_alignments = 0;

        // mate info travels as a :0 / :1 suffix on the name
        if self.name.ends_with(":0") {
            self.name.truncate(self.name.len() - 2);
            self.read_flag = sam::IS_PAIRED | sam::IS_FIRST;
        } else if self.name.ends_with(":1") {
            self.name.truncate(self.name.len() - 2);
            self.read_flag = sam::IS_PAIRED | sam::IS_SECOND;
        }
    }

    pub(crate) fn run(&mut self) {
        if self.quals.is_empty() {
            self.quals = vec![b'!'; self.bases.len()];
        }

        match self.kind {
            MatchKind::Mam => self
                .index
                .find_mams(&self.bases, self.min_len, &mut self.matches),
            MatchKind::Mum => self
                .index
                .find_mums(&self.bases, self.min_len, &mut self.matches),
            MatchKind::Mem => self
                .index
                .find_mems(&self.bases, self.min_len, &mut self.matches),
        }

        self.prepare_alignments();
        self.set_nomap();
    }

    fn prepare_alignments(&mut self) {
        if self.matches.is_empty() {
            return;
        }

        let query_len = self.bases.len();
        let reference = self.index.reference();
        self.alignments = self
            .matches
            .iter()
            .map(|m| Alignment::resolve(m, query_len, reference))
            .collect();
        // flipped hits can hang off the start of their sequence
        self.alignments.retain(|a| a.pos >= 0);
        if self.alignments.is_empty() {
            return;
        }

        self.order = (0..self.alignments.len()).collect();
        if self.sam_out {
            self.merge_alignments();
            self.chain_alignments();
        }
    }

    /// Adjacent alignments that map the read to the same place represent
    /// discontiguous maximal matches of one mapping; combine them into one
    /// CIGAR and accumulate their statistics on the last segment.
    fn merge_alignments(&mut self) {
        let alignments = &self.alignments;
        self.order.sort_by(|&x, &y| {
            let a = &alignments[x];
            let b = &alignments[y];
            (a.reversed, a.seq_index, a.pos, a.prefix).cmp(&(
                b.reversed,
                b.seq_index,
                b.pos,
                b.prefix,
            ))
        });

        let query_len = self.bases.len();
        let text_len = self.index.len();

        let mut run_cigar = String::new();
        let mut run_last_end = 0;
        let mut run_n_matches = 0;
        let mut run_unique = 0;
        let mut run_min_qpos = usize::MAX;

        for w in 0..self.order.len() {
            let i = self.order[w];
            let same_site_as_next = self.order.get(w + 1).is_some_and(|&j| {
                let a = &self.alignments[i];
                let b = &self.alignments[j];
                a.pos == b.pos && a.seq_index == b.seq_index && a.reversed == b.reversed
            });

            let (prefix, length, suffix, rc_pos) = {
                let a = &self.alignments[i];
                (a.prefix, a.length, a.suffix, a.rc_pos)
            };

            run_n_matches += 1;
            run_unique += length;
            run_min_qpos = run_min_qpos.min(self.alignments[i].qpos);

            if prefix > 0 {
                let clip = if run_last_end > 0 { 'M' } else { 'S' };
                run_cigar.push_str(&format!("{}{clip}", prefix - run_last_end));
            }
            run_cigar.push_str(&format!("{length}="));

            if same_site_as_next {
                run_last_end = prefix + length;
                continue;
            }

            if suffix > 0 {
                run_cigar.push_str(&format!("{suffix}S"));
            }

            // reference-matching bases over the whole read span
            let bases = self.index.reference().bases();
            let mut matched = 0;
            for j in 0..query_len {
                let ref_pos = rc_pos + j as i64;
                if ref_pos >= 0
                    && (ref_pos as usize) < text_len
                    && bases[ref_pos as usize] == self.bases[j]
                {
                    matched += 1;
                }
            }

            let a = &mut self.alignments[i];
            a.cigar = std::mem::take(&mut run_cigar);
            a.n_matches = run_n_matches;
            a.n_unique_bases = run_unique;
            a.n_matched_bases = matched;
            a.qpos = run_min_qpos;

            run_last_end = 0;
            run_n_matches = 0;
            run_unique = 0;
            run_min_qpos = usize::MAX;
        }

        if self.min_block > 0 {
            for w in 0..self.order.len() {
                let i = self.order[w];
                let a = &mut self.alignments[i];
                if a.n_matches > 0 && a.n_unique_bases < self.min_block {
                    a.n_matches = 0;
                }
            }
        }
    }

    /// Orders alignments by query offset, designates the primary and links
    /// the printed ones into a chain.
    fn chain_alignments(&mut self) {
        let alignments = &self.alignments;
        self.order.sort_by(|&x, &y| {
            let a = &alignments[x];
            let b = &alignments[y];
            (a.qpos, a.reversed).cmp(&(b.qpos, b.reversed))
        });
        self.best = self.order.first().copied();

        let mut previous: Option<usize> = None;
        for w in 0..self.order.len() {
            let i = self.order[w];
            if self.alignments[i].n_matches > 0 {
                self.alignments[i].alignment_index = self.n_alignments;
                self.n_alignments += 1;
                if let Some(p) = previous {
                    self.alignments[i].prev = Some(p);
                    self.alignments[p].next = Some(i);
                }
                previous = Some(i);
            }
        }
    }

    fn set_nomap(&mut self) {
        if self.n_alignments == 0 && self.sam_out && self.nomap {
            self.n_alignments = 1;
            self.read_flag |= sam::IS_UNMAPPED;
            self.alignments.clear();
            self.alignments.push(Alignment::unmapped());
            self.order = vec![0];
        }
    }

    pub(crate) fn has_mate(&self, second: &Aligner<I>) -> bool {
        self.read_flag & sam::IS_FIRST != 0 && second.read_flag & sam::IS_SECOND != 0
    }

    pub(crate) fn mate_view(&self) -> MateView {
        MateView {
            n_alignments: self.n_alignments,
            primary: self.best.map(|i| MateRef {
                seq_index: self.alignments[i].seq_index,
                pos: self.alignments[i].pos,
            }),
        }
    }

    /// Points every alignment of this read at the mate's primary alignment,
    /// or at our own when the mate found none.
    pub(crate) fn link_mate(&mut self, mate: &MateView) {
        if self.n_alignments == 0 || mate.n_alignments == 0 {
            return;
        }
        let target = match mate.primary {
            Some(primary) => Some(primary),
            None => {
                self.read_flag |= sam::IS_MATE_UNMAPPED;
                self.best.map(|i| MateRef {
                    seq_index: self.alignments[i].seq_index,
                    pos: self.alignments[i].pos,
                })
            }
        };
        for alignment in &mut self.alignments {
            alignment.mate = target;
        }
    }

    pub(crate) fn print(&mut self, output: &mut OutputSorter) -> Result<()> {
        if self.order.is_empty() {
            return Ok(());
        }

        if self.sam_out
            && self.rc_original.is_empty()
            && self.order.iter().any(|&i| self.alignments[i].reversed)
        {
            self.rc_original = self.original.clone();
            alphabet::reverse_complement(&mut self.rc_original);
        }

        let mut line = std::mem::take(&mut self.line);
        for w in 0..self.order.len() {
            let i = self.order[w];
            line.clear();
            if self.sam_out {
                if self.alignments[i].n_matches == 0 && self.read_flag & sam::IS_UNMAPPED == 0 {
                    continue;
                }
                self.format_sam_line(&mut line, i);
            } else {
                self.format_raw_hit(&mut line, i);
            }
            output.push_line(&line)?;
        }
        self.line = line;

        Ok(())
    }

    fn format_sam_line(&self, line: &mut Vec<u8>, i: usize) {
        let a = &self.alignments[i];
        let reference = self.index.reference();

        if self.read_flag & sam::IS_UNMAPPED != 0 {
            match a.mate {
                Some(mate) => put(
                    line,
                    format_args!(
                        "{}\t{}\t{}\t{}\t0\t*",
                        self.name,
                        self.read_flag,
                        reference.name(mate.seq_index),
                        mate.pos + 1
                    ),
                ),
                None => put(
                    line,
                    format_args!("{}\t{}\t*\t0\t0\t*", self.name, self.read_flag),
                ),
            }
        } else {
            let flag = self.read_flag
                | if a.reversed { sam::IS_REVERSED } else { 0 }
                | if a.alignment_index > 0 {
                    sam::IS_NOT_PRIMARY
                } else {
                    0
                };
            put(
                line,
                format_args!(
                    "{}\t{flag}\t{}\t{}\t50\t{}",
                    self.name,
                    reference.name(a.seq_index),
                    a.pos + 1,
                    a.cigar
                ),
            );
        }

        match a.mate {
            Some(mate) => put(
                line,
                format_args!("\t{}\t{}\t0", reference.name(mate.seq_index), mate.pos + 1),
            ),
            None => line.extend_from_slice(b"\t*\t0\t0"),
        }

        line.push(b'\t');
        if a.reversed {
            line.extend_from_slice(&self.rc_original);
            line.push(b'\t');
            line.extend(self.quals.iter().rev());
        } else {
            line.extend_from_slice(&self.original);
            line.push(b'\t');
            line.extend_from_slice(&self.quals);
        }

        if a.n_matches > 0 {
            put(
                line,
                format_args!(
                    "\tXM:i:{}\tXU:i:{}\tXE:i:{}\tXS:A:{}\tNH:i:{}\tHI:i:{}",
                    a.n_matches,
                    a.n_unique_bases,
                    a.n_matched_bases,
                    if a.reversed { '-' } else { '+' },
                    self.n_alignments,
                    a.alignment_index
                ),
            );
        } else {
            line.extend_from_slice(b"\tXM:i:0\tNH:i:0");
        }

        if let Some(p) = a.prev {
            let prev = &self.alignments[p];
            put(
                line,
                format_args!(
                    "\tcc:Z:{}\tcp:i:{}\txo:A:{}\txc:Z:{}",
                    reference.name(prev.seq_index),
                    prev.pos + 1,
                    if prev.reversed == a.reversed { '=' } else { '!' },
                    prev.cigar
                ),
            );
        }
        if let Some(n) = a.next {
            let next = &self.alignments[n];
            put(
                line,
                format_args!(
                    "\tCC:Z:{}\tCP:i:{}\tXO:A:{}\tXC:Z:{}",
                    reference.name(next.seq_index),
                    next.pos + 1,
                    if next.reversed == a.reversed { '=' } else { '!' },
                    next.cigar
                ),
            );
        }
        if !self.optional.is_empty() {
            line.extend_from_slice(self.optional.as_bytes());
        }
    }

    fn format_raw_hit(&self, line: &mut Vec<u8>, i: usize) {
        let a = &self.alignments[i];
        let reference = self.index.reference();
        let name = reference.name(a.seq_index);

        put(line, format_args!("> {}\n  {name}", self.name));
        for _ in 0..reference.max_name_len() - name.len() + 1 {
            line.push(b' ');
        }
        put(
            line,
            format_args!(
                " {:>8}  {:>8}  {:>8} {}",
                a.pos + 1,
                a.prefix + 1,
                a.length,
                a.reversed as u8
            ),
        );
    }
}

fn put(line: &mut Vec<u8>, args: std::fmt::Arguments<'_>) {
    use std::io::Write as _;
    line.write_fmt(args).expect("writing to a byte buffer cannot fail");
}
