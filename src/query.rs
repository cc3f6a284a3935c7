//! Parses FASTA, FASTQ and alignment-record read streams into query records.
//!
//! The input kind is chosen by configuration flags, never sniffed. Mate
//! information is normalised into a `:0` / `:1` suffix on the query name,
//! which the aligner strips back off into flag bits.

use memchr::memchr;

use std::io::BufRead;
use std::path::PathBuf;

use crate::alphabet::{self, OUT_OF_ALPHABET};
use crate::sam;
use crate::{Error, Result};

/// One read, parsed and ready for alignment.
#[derive(Debug, Default, Clone)]
pub struct NewQuery {
    pub name: String,
    /// Lower-cased bases as matched against the reference.
    pub bases: Vec<u8>,
    /// The bases exactly as read, for output.
    pub original: Vec<u8>,
    /// Base qualities; empty for FASTA input.
    pub quals: Vec<u8>,
    /// Preserved optional tags from alignment-record input, tab-prefixed.
    pub optional: String,
}

impl NewQuery {
    /// An empty query doubles as the end-of-stream marker in the pipeline.
    pub fn complete(&self) -> bool {
        !self.bases.is_empty()
    }

    fn extend(&mut self, line: &str, nucleotides_only: bool) {
        for &byte in line.trim_end_matches(' ').as_bytes() {
            if byte == b' ' {
                continue;
            }
            let base = byte.to_ascii_lowercase();
            if nucleotides_only && !alphabet::is_nucleotide(base) {
                self.bases.push(OUT_OF_ALPHABET);
            } else {
                self.bases.push(base);
            }
            self.original.push(byte);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputFormat {
    Fasta,
    Fastq,
    Sam,
}

/// Pulls [`NewQuery`] records off a buffered read stream.
///
/// A parse error consumes at least one line, so the caller can log it, skip
/// the read and keep going.
pub(crate) struct RecordParser<R> {
    reader: R,
    format: InputFormat,
    nucleotides_only: bool,
    path: PathBuf,
    pending_header: Option<String>,
}

impl<R: BufRead> RecordParser<R> {
    pub(crate) fn new(
        reader: R,
        format: InputFormat,
        nucleotides_only: bool,
        path: PathBuf,
    ) -> Self {
        RecordParser {
            reader,
            format,
            nucleotides_only,
            path,
            pending_header: None,
        }
    }

    pub(crate) fn next_record(&mut self) -> Result<Option<NewQuery>> {
        match self.format {
            InputFormat::Fasta => self.next_fasta(),
            InputFormat::Fastq => self.next_fastq(),
            InputFormat::Sam => self.next_sam(),
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|source| Error::io("read", &self.path, source))?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Skips blank lines; returns the next line with content.
    fn next_content_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(line)),
            }
        }
    }

    fn next_fasta(&mut self) -> Result<Option<NewQuery>> {
        let header = match self.pending_header.take() {
            Some(header) => header,
            None => match self.next_content_line()? {
                None => return Ok(None),
                Some(line) => {
                    if !line.starts_with('>') {
                        return Err(Error::parse(format!(
                            "missing query start character '>' in input line {line:?}"
                        )));
                    }
                    line
                }
            },
        };

        let mut query = NewQuery {
            name: query_name(&header[1..]),
            ..NewQuery::default()
        };

        loop {
            match self.next_content_line()? {
                None => break,
                Some(line) if line.starts_with('>') => {
                    self.pending_header = Some(line);
                    break;
                }
                Some(line) => query.extend(&line, self.nucleotides_only),
            }
        }

        if !query.complete() {
            return Err(Error::parse(format!("empty sequence for {}", query.name)));
        }
        Ok(Some(query))
    }

    fn next_fastq(&mut self) -> Result<Option<NewQuery>> {
        let header = match self.next_content_line()? {
            None => return Ok(None),
            Some(line) => line,
        };
        if !header.starts_with('@') {
            return Err(Error::parse(format!(
                "missing query start character '@' in input line {header:?}"
            )));
        }

        let mut query = NewQuery {
            name: query_name(&header[1..]),
            ..NewQuery::default()
        };

        let sequence = self
            .next_line()?
            .ok_or_else(|| Error::parse(format!("truncated fastq record {}", query.name)))?;
        query.extend(&sequence, self.nucleotides_only);

        let _plus = self
            .next_line()?
            .ok_or_else(|| Error::parse(format!("truncated fastq record {}", query.name)))?;
        let qualities = self
            .next_line()?
            .ok_or_else(|| Error::parse(format!("truncated fastq record {}", query.name)))?;
        if qualities.is_empty() {
            return Err(Error::parse(format!("empty errors for {}", query.name)));
        }
        query.quals = qualities.into_bytes();

        if !query.complete() {
            return Err(Error::parse(format!("empty sequence for {}", query.name)));
        }
        Ok(Some(query))
    }

    fn next_sam(&mut self) -> Result<Option<NewQuery>> {
        let line = loop {
            match self.next_content_line()? {
                None => return Ok(None),
                Some(line) if line.starts_with('@') => continue, // header
                Some(line) => break line,
            }
        };

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return Err(Error::parse(format!(
                "alignment record with {} fields in {}",
                fields.len(),
                self.path.display()
            )));
        }

        let flag: u16 = fields[1]
            .parse()
            .map_err(|_| Error::parse(format!("bad flag field {:?}", fields[1])))?;

        let mut name = fields[0].to_owned();
        if flag & sam::IS_FIRST != 0 {
            name.push_str(":0");
        } else if flag & sam::IS_SECOND != 0 {
            name.push_str(":1");
        }

        let mut query = NewQuery {
            name,
            ..NewQuery::default()
        };
        query.extend(fields[9], self.nucleotides_only);
        query.quals = fields[10].as_bytes().to_vec();
        for tag in &fields[11..] {
            query.optional.push('\t');
            query.optional.push_str(tag);
        }

        if !query.complete() {
            return Err(Error::parse(format!("empty sequence for {}", query.name)));
        }
        Ok(Some(query))
    }
}

/// First whitespace-delimited token of a description, with Illumina-style
/// mate markers (` 1`/` 2` after the name, or a trailing `/1`/`/2`)
/// normalised to a `:0`/`:1` suffix.
fn query_name(description: &str) -> String {
    let description = description.trim();
    let (token, rest) = match memchr(b' ', description.as_bytes()) {
        Some(space) => (&description[..space], Some(&description[space + 1..])),
        None => (description, None),
    };

    if let Some(rest) = rest {
        if rest.starts_with('1') {
            return format!("{token}:0");
        }
        if rest.starts_with('2') {
            return format!("{token}:1");
        }
    }
    if let Some(stripped) = token.strip_suffix("/1") {
        return format!("{stripped}:0");
    }
    if let Some(stripped) = token.strip_suffix("/2") {
        return format!("{stripped}:1");
    }
    token.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parser(content: &str, format: InputFormat, nucleotides_only: bool) -> RecordParser<Cursor<Vec<u8>>> {
        RecordParser::new(
            Cursor::new(content.as_bytes().to_vec()),
            format,
            nucleotides_only,
            PathBuf::from("test-input"),
        )
    }

    #[test]
    fn fasta_records_span_multiple_lines() {
        let mut parser = parser(
            ">read1 description\nACGT\nacgt\n>read2\nTTTT\n",
            InputFormat::Fasta,
            false,
        );

        let first = parser.next_record().unwrap().unwrap();
        assert_eq!(first.name, "read1");
        assert_eq!(first.bases, b"acgtacgt");
        assert_eq!(first.original, b"ACGTacgt");
        assert!(first.quals.is_empty());

        let second = parser.next_record().unwrap().unwrap();
        assert_eq!(second.name, "read2");
        assert_eq!(second.bases, b"tttt");

        assert!(parser.next_record().unwrap().is_none());
    }

    #[test]
    fn mate_markers_become_name_suffixes() {
        assert_eq!(query_name("x 1"), "x:0");
        assert_eq!(query_name("x 2:N:0:8"), "x:1");
        assert_eq!(query_name("x/1"), "x:0");
        assert_eq!(query_name("x/2 junk"), "x:1");
        assert_eq!(query_name("plain extra words"), "plain");
    }

    #[test]
    fn nucleotides_only_masks_other_bases() {
        let mut parser = parser(">r\nacgNnRt\n", InputFormat::Fasta, true);
        let query = parser.next_record().unwrap().unwrap();
        assert_eq!(query.bases, b"acg~~~t");
        assert_eq!(query.original, b"acgNnRt");
    }

    #[test]
    fn fastq_takes_qualities_verbatim() {
        let mut parser = parser(
            "@read3 1\nACGT\n+\nII#I\n@read4\nGGGG\n+\n!!!!\n",
            InputFormat::Fastq,
            false,
        );

        let first = parser.next_record().unwrap().unwrap();
        assert_eq!(first.name, "read3:0");
        assert_eq!(first.bases, b"acgt");
        assert_eq!(first.quals, b"II#I");

        let second = parser.next_record().unwrap().unwrap();
        assert_eq!(second.name, "read4");
        assert_eq!(second.quals, b"!!!!");
    }

    #[test]
    fn sam_input_reads_flags_and_tags() {
        let content = "@HD\tVN:1.5\n\
                       r1\t65\tchr1\t100\t60\t4=\t=\t180\t0\tACGT\tIIII\tNM:i:0\tAS:i:4\n\
                       r1\t129\tchr1\t180\t60\t4=\t=\t100\t0\tTTTT\tJJJJ\n";
        let mut parser = parser(content, InputFormat::Sam, false);

        let first = parser.next_record().unwrap().unwrap();
        assert_eq!(first.name, "r1:0");
        assert_eq!(first.bases, b"acgt");
        assert_eq!(first.quals, b"IIII");
        assert_eq!(first.optional, "\tNM:i:0\tAS:i:4");

        let second = parser.next_record().unwrap().unwrap();
        assert_eq!(second.name, "r1:1");
        assert!(second.optional.is_empty());
    }

    #[test]
    fn parse_errors_leave_the_stream_usable() {
        let mut parser = parser(
            "garbage line\n>ok\nACGT\n",
            InputFormat::Fasta,
            false,
        );

        assert!(parser.next_record().is_err());
        let query = parser.next_record().unwrap().unwrap();
        assert_eq!(query.name, "ok");
    }
}
