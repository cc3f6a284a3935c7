//! Computes, for every reference position, how many bases must be scanned
//! leftward or rightward before the covered substring becomes unique in the
//! doubled reference, and writes the result as a dense map.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::reserve_exact;
use crate::{Error, IndexInt, Result, SuffixIndex};

/// Writes the per-position mappability of the indexed reference.
///
/// The target selects the format: `-` writes tab-separated text to stdout, a
/// path containing `.bin` the dense binary map (two bytes per position: left,
/// right, clamped at 255), anything else tab-separated text to that file.
/// Requires an index built with the reverse-complement reference.
pub fn write_mappability<I: IndexInt>(index: &SuffixIndex<I>, target: &Path) -> Result<()> {
    if !index.reference().rcref() {
        return Err(Error::Config(
            "mappability requires a reverse-complement reference".into(),
        ));
    }

    let mut min_lengths = minimum_unique_lengths(index)?;

    let target_name = target.to_string_lossy();
    if target_name == "-" {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        write_records(index, &mut min_lengths, &mut out, false, target)
    } else if target_name.contains(".bin") {
        let file = File::create(target).map_err(|source| Error::io("create", target, source))?;
        let mut out = BufWriter::new(file);
        write_records(index, &mut min_lengths, &mut out, true, target)?;
        out.flush().map_err(|source| Error::io("write", target, source))
    } else {
        let file = File::create(target).map_err(|source| Error::io("create", target, source))?;
        let mut out = BufWriter::new(file);
        write_records(index, &mut min_lengths, &mut out, false, target)?;
        out.flush().map_err(|source| Error::io("write", target, source))
    }
}

/// For every suffix array rank, the number of leading bases of that suffix
/// needed before it is unique: one more than the larger of the LCP values to
/// its rank neighbours.
fn minimum_unique_lengths<I: IndexInt>(index: &SuffixIndex<I>) -> Result<Vec<usize>> {
    let n = index.len();
    let mut min_lengths = reserve_exact::<usize>("mappability lengths", n)?;

    if n > 10_000_000_000 {
        log::warn!(
            "allocating {} GB for mappability lengths - may take a while",
            n * size_of::<usize>() / 1_000_000_000
        );
    }

    log::info!("computing mappability");
    for rank in 0..n {
        min_lengths.push(index.lcp_value(rank) + 1);
        if rank > 0 {
            min_lengths[rank - 1] = min_lengths[rank - 1].max(min_lengths[rank]);
        }
    }

    Ok(min_lengths)
}

fn write_records<I: IndexInt>(
    index: &SuffixIndex<I>,
    min_lengths: &mut [usize],
    out: &mut impl Write,
    binary: bool,
    target: &Path,
) -> Result<()> {
    let reference = index.reference();
    let n = index.len();
    let write_err = |source| Error::io("write", target, source);

    if !binary {
        out.write_all(b"chrom\tpos\tlmin\trmin\n").map_err(write_err)?;
    }

    log::info!("outputting mappability");
    for chrom in (0..reference.num_sequences()).step_by(2) {
        let name = reference.name(chrom);
        let start = reference.start(chrom) as usize;
        let size = reference.length(chrom) as usize;
        log::debug!("mappability of {name}");

        for i in 0..size {
            let pos = i + start;
            let forward_rank = index.isa_at(pos);
            let flipped_rank = index.isa_at(start + 2 * size - i);
            if forward_rank >= n {
                return Err(Error::Range("range error sa".into()));
            }
            if flipped_rank >= n {
                return Err(Error::Range("range error rcsa".into()));
            }

            // a scan that would run past the subsequence boundary counts as
            // not mappable at all
            if min_lengths[forward_rank] + i >= size {
                min_lengths[forward_rank] = 0;
            }
            if min_lengths[flipped_rank] >= i {
                min_lengths[flipped_rank] = 0;
            }

            let left = min_lengths[flipped_rank].min(255) as u8;
            let right = min_lengths[forward_rank].min(255) as u8;

            if binary {
                out.write_all(&[left, right]).map_err(write_err)?;
            } else {
                writeln!(out, "{name}\t{}\t{left}\t{right}", i + 1).map_err(write_err)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::io::Write as _;

    fn open_index(fasta_content: &str) -> (tempfile::TempDir, SuffixIndex<i32>) {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("ref.fa");
        let mut file = std::fs::File::create(&fasta).unwrap();
        file.write_all(fasta_content.as_bytes()).unwrap();
        drop(file);

        let mut config = Config::new(&fasta, Vec::new());
        config.rcref = true;
        let index = SuffixIndex::open(&config).unwrap();
        (dir, index)
    }

    fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
        if needle.is_empty() || needle.len() > haystack.len() {
            return 0;
        }
        haystack
            .windows(needle.len())
            .filter(|window| *window == needle)
            .count()
    }

    /// Independent model: the minimal unique substring length by brute-force
    /// occurrence counting, with the same boundary zeroing and clamping.
    fn naive_map(index: &SuffixIndex<i32>) -> Vec<(u8, u8)> {
        let reference = index.reference();
        let bases = reference.bases();
        let mut map = Vec::new();

        for chrom in (0..reference.num_sequences()).step_by(2) {
            let start = reference.start(chrom) as usize;
            let size = reference.length(chrom) as usize;
            for i in 0..size {
                let minimal_unique = |pos: usize| {
                    (1..=bases.len() - pos)
                        .find(|&len| count_occurrences(bases, &bases[pos..pos + len]) == 1)
                        .expect("suffixes are unique")
                };

                let mut right = minimal_unique(start + i);
                if right + i >= size {
                    right = 0;
                }

                let mut left = minimal_unique(start + 2 * size - i);
                if left >= i {
                    left = 0;
                }

                map.push((left.min(255) as u8, right.min(255) as u8));
            }
        }

        map
    }

    #[test]
    fn matches_the_naive_model() {
        let (_dir, index) = open_index(">a\nacgttgacat\n>b\nggtacca\n");

        let mut min_lengths = minimum_unique_lengths(&index).unwrap();
        let mut bytes = Vec::new();
        write_records(
            &index,
            &mut min_lengths,
            &mut bytes,
            true,
            Path::new("test"),
        )
        .unwrap();

        let expected: Vec<u8> = naive_map(&index)
            .into_iter()
            .flat_map(|(left, right)| [left, right])
            .collect();

        assert_eq!(bytes, expected);
    }

    #[test]
    fn text_output_has_one_row_per_forward_position() {
        let (_dir, index) = open_index(">a\nacgttgacat\n");

        let mut min_lengths = minimum_unique_lengths(&index).unwrap();
        let mut bytes = Vec::new();
        write_records(
            &index,
            &mut min_lengths,
            &mut bytes,
            false,
            Path::new("test"),
        )
        .unwrap();

        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "chrom\tpos\tlmin\trmin");
        assert_eq!(lines.len(), 1 + 10);
        assert!(lines[1].starts_with("a\t1\t"));
    }

    #[test]
    fn forward_only_references_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("ref.fa");
        std::fs::write(&fasta, ">a\nacgt\n").unwrap();

        let config = Config::new(&fasta, Vec::new());
        let index = SuffixIndex::<i32>::open(&config).unwrap();
        assert!(write_mappability(&index, Path::new("-")).is_err());
    }
}
