//! Per-worker output buffering: lines accumulate in one contiguous byte area
//! and are flushed as sorted batches to uniquely named files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use crate::sam;
use crate::{ChromosomeMap, Config, Error, Result};

const DEFAULT_CAPACITY: usize = 500_000_000;
const MAX_LINE: usize = 10_000;

/// Buffers finished output lines for one worker.
///
/// In alignment-record mode every flush sorts its lines by absolute reference
/// coordinate before writing them behind the header; raw-hit output is
/// flushed in emission order. Flushing happens when the next line might not
/// fit, and once more when the worker ends.
pub(crate) struct OutputSorter {
    sam: bool,
    header: Arc<String>,
    chromosomes: Arc<ChromosomeMap>,
    dir: PathBuf,
    worker_id: usize,
    file_sequence: u32,
    capacity: usize,
    buffer: Vec<u8>,
    lines: Vec<Range<usize>>,
}

impl OutputSorter {
    pub(crate) fn new(
        config: &Config,
        header: Arc<String>,
        chromosomes: Arc<ChromosomeMap>,
        worker_id: usize,
    ) -> Self {
        Self::with_capacity(config, header, chromosomes, worker_id, DEFAULT_CAPACITY)
    }

    pub(crate) fn with_capacity(
        config: &Config,
        header: Arc<String>,
        chromosomes: Arc<ChromosomeMap>,
        worker_id: usize,
        capacity: usize,
    ) -> Self {
        OutputSorter {
            sam: config.sam_out,
            header,
            chromosomes,
            dir: config.out_dir.clone(),
            worker_id,
            file_sequence: 0,
            capacity,
            buffer: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Appends one finished line (without trailing newline).
    pub(crate) fn push_line(&mut self, line: &[u8]) -> Result<()> {
        let start = self.buffer.len();
        self.buffer.extend_from_slice(line);
        self.buffer.push(b'\n');
        self.lines.push(start..self.buffer.len());

        if self.buffer.len() + MAX_LINE > self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.lines.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|source| Error::io("create directory", &self.dir, source))?;

        self.file_sequence += 1;
        let extension = if self.sam { "sam" } else { "txt" };
        let path = self.dir.join(format!(
            "mapout{}.{}.{extension}",
            self.worker_id, self.file_sequence
        ));

        let file = File::create(&path).map_err(|source| Error::io("create", &path, source))?;
        let mut out = BufWriter::new(file);
        let write_err = |source| Error::io("write", &path, source);

        if self.sam {
            let ordered = self.sorted_lines()?;
            out.write_all(self.header.as_bytes()).map_err(write_err)?;
            for range in ordered {
                out.write_all(&self.buffer[range]).map_err(write_err)?;
            }
        } else {
            for range in &self.lines {
                out.write_all(&self.buffer[range.clone()]).map_err(write_err)?;
            }
        }
        out.flush().map_err(write_err)?;

        self.buffer.clear();
        self.lines.clear();
        Ok(())
    }

    /// Line ranges in output order: sorted by `(abs_pos, name, mate bits)`.
    /// Two fully equal keys within one worker are a programming error.
    fn sorted_lines(&self) -> Result<Vec<Range<usize>>> {
        let buffer = &self.buffer;

        let mut keyed = Vec::with_capacity(self.lines.len());
        for range in &self.lines {
            // strip the newline before parsing the key
            let line = &buffer[range.start..range.end - 1];
            let key = sam::sort_key(line, &self.chromosomes)?;
            keyed.push((
                key.abs_pos,
                &line[key.name],
                key.mate_bits,
                range.clone(),
            ));
        }

        keyed.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

        for pair in keyed.windows(2) {
            if (pair[0].0, pair[0].1, pair[0].2) == (pair[1].0, pair[1].1, pair[1].2) {
                return Err(Error::Range(format!(
                    "duplicate output sort key for {:?}",
                    String::from_utf8_lossy(pair[0].1)
                )));
            }
        }

        Ok(keyed.into_iter().map(|(_, _, _, range)| range).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorter(dir: &std::path::Path, sam: bool, capacity: usize) -> OutputSorter {
        let mut config = Config::new("ref.fa", Vec::new());
        config.sam_out = sam;
        config.out_dir = dir.to_owned();

        let names = vec!["chr1".to_string(), "chr2".to_string()];
        let chromosomes = Arc::new(ChromosomeMap::from_sequences(&names, &[1000, 500], false));
        let header = Arc::new("@HD\tVN:1.0\tSO:unsorted\n".to_string());

        OutputSorter::with_capacity(&config, header, chromosomes, 3, capacity)
    }

    fn read_output(dir: &std::path::Path) -> Vec<(String, String)> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
            .into_iter()
            .map(|path| {
                (
                    path.file_name().unwrap().to_string_lossy().into_owned(),
                    std::fs::read_to_string(path).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn sam_lines_are_sorted_by_reference_coordinate() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = sorter(dir.path(), true, DEFAULT_CAPACITY);

        sorter
            .push_line(b"b\t0\tchr2\t10\t50\t4=\t*\t0\t0\tACGT\tIIII")
            .unwrap();
        sorter
            .push_line(b"a\t0\tchr1\t500\t50\t4=\t*\t0\t0\tACGT\tIIII")
            .unwrap();
        sorter
            .push_line(b"c\t0\tchr1\t2\t50\t4=\t*\t0\t0\tACGT\tIIII")
            .unwrap();
        sorter.flush().unwrap();

        let outputs = read_output(dir.path());
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].0, "mapout3.1.sam");

        let lines: Vec<&str> = outputs[0].1.lines().collect();
        assert_eq!(lines[0], "@HD\tVN:1.0\tSO:unsorted");
        assert!(lines[1].starts_with("c\t"));
        assert!(lines[2].starts_with("a\t"));
        assert!(lines[3].starts_with("b\t"));
    }

    #[test]
    fn overflow_starts_a_new_numbered_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = sorter(dir.path(), true, MAX_LINE + 20);

        sorter
            .push_line(b"a\t0\tchr1\t1\t50\t4=\t*\t0\t0\tACGT\tIIII")
            .unwrap();
        sorter
            .push_line(b"b\t0\tchr1\t2\t50\t4=\t*\t0\t0\tACGT\tIIII")
            .unwrap();
        sorter.flush().unwrap();

        let outputs = read_output(dir.path());
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].0, "mapout3.1.sam");
        assert_eq!(outputs[1].0, "mapout3.2.sam");
    }

    #[test]
    fn equal_keys_are_a_programming_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = sorter(dir.path(), true, DEFAULT_CAPACITY);

        sorter
            .push_line(b"same\t0\tchr1\t7\t50\t4=\t*\t0\t0\tACGT\tIIII")
            .unwrap();
        sorter
            .push_line(b"same\t0\tchr1\t7\t50\t4=\t*\t0\t0\tTTTT\tIIII")
            .unwrap();
        assert!(matches!(sorter.flush(), Err(Error::Range(_))));
    }

    #[test]
    fn raw_mode_keeps_emission_order_and_txt_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = sorter(dir.path(), false, DEFAULT_CAPACITY);

        sorter.push_line(b"> second\n  chr2 99").unwrap();
        sorter.push_line(b"> first\n  chr1 1").unwrap();
        sorter.flush().unwrap();

        let outputs = read_output(dir.path());
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].0, "mapout3.1.txt");
        assert!(outputs[0].1.starts_with("> second\n"));
    }
}
