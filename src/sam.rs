//! Alignment-record flag bits and the sort key parsed back out of formatted
//! output lines.

use memchr::memchr_iter;

use std::ops::Range;

use crate::{ChromosomeMap, Error, Result};

pub(crate) const IS_PAIRED: u16 = 1;
#[allow(dead_code)]
pub(crate) const IS_PROPER: u16 = 1 << 1;
pub(crate) const IS_UNMAPPED: u16 = 1 << 2;
pub(crate) const IS_MATE_UNMAPPED: u16 = 1 << 3;
pub(crate) const IS_REVERSED: u16 = 1 << 4;
#[allow(dead_code)]
pub(crate) const IS_MATE_REVERSED: u16 = 1 << 5;
pub(crate) const IS_FIRST: u16 = 1 << 6;
pub(crate) const IS_SECOND: u16 = 1 << 7;
pub(crate) const IS_NOT_PRIMARY: u16 = 1 << 8;

/// How output lines are ordered within one flush: absolute reference
/// coordinate first, then name, then the mate and strand bits. Two lines from
/// one worker never compare equal.
pub(crate) struct SortKey {
    pub(crate) abs_pos: u64,
    pub(crate) name: Range<usize>,
    pub(crate) mate_bits: u16,
}

/// Parses the key fields back out of an already-formatted record line.
pub(crate) fn sort_key(line: &[u8], chromosomes: &ChromosomeMap) -> Result<SortKey> {
    let mut tabs = memchr_iter(b'\t', line);
    let bad_line = || Error::Range(format!(
        "unkeyable output line {:?}",
        String::from_utf8_lossy(line)
    ));

    let name_end = tabs.next().ok_or_else(bad_line)?;
    let flag_end = tabs.next().ok_or_else(bad_line)?;
    let chrom_end = tabs.next().ok_or_else(bad_line)?;
    let pos_end = tabs.next().ok_or_else(bad_line)?;

    let flag: u16 = field_str(&line[name_end + 1..flag_end])?
        .parse()
        .map_err(|_| bad_line())?;
    let chrom = field_str(&line[flag_end + 1..chrom_end])?;
    let pos: u64 = field_str(&line[chrom_end + 1..pos_end])?
        .parse()
        .map_err(|_| bad_line())?;

    Ok(SortKey {
        abs_pos: chromosomes.abspos(chrom, pos)?,
        name: 0..name_end,
        mate_bits: flag & (IS_FIRST | IS_SECOND | IS_REVERSED),
    })
}

fn field_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|_| Error::Range("non-utf8 bytes in output line key".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chromosomes() -> ChromosomeMap {
        let names = vec!["chr1".to_string(), "chr2".to_string()];
        ChromosomeMap::from_sequences(&names, &[1000, 500], false)
    }

    #[test]
    fn key_fields_are_recovered() {
        let map = chromosomes();
        let line = b"read7\t81\tchr2\t42\t50\t10=\t*\t0\t0\tACGT\tIIII";
        let key = sort_key(line, &map).unwrap();

        assert_eq!(key.abs_pos, 1042);
        assert_eq!(&line[key.name.clone()], b"read7");
        assert_eq!(key.mate_bits, IS_REVERSED | IS_FIRST);
    }

    #[test]
    fn unmapped_lines_sort_to_the_end() {
        let map = chromosomes();
        let line = b"read\t4\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII";
        let key = sort_key(line, &map).unwrap();
        assert_eq!(key.abs_pos, 1500);
    }

    #[test]
    fn unknown_chromosomes_are_reported() {
        let map = chromosomes();
        let line = b"read\t0\tchrX\t10\t50\t4=\t*\t0\t0\tAAAA\tIIII";
        assert!(matches!(
            sort_key(line, &map),
            Err(Error::UnknownChromosome(_))
        ));
    }
}
