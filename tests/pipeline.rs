use longmem::{Config, MatchKind};
use std::path::{Path, PathBuf};

const REF: &str = "gattacagtacctgacctggtcaatgccagtcggatcaaattgcgtgaagctcctaggtc";

fn setup(dir: &Path, reads: &str) -> Config {
    let fasta = dir.join("ref.fa");
    std::fs::write(&fasta, format!(">s\n{REF}\n")).unwrap();

    let queries = dir.join("reads.fa");
    std::fs::write(&queries, reads).unwrap();

    let mut config = Config::new(&fasta, vec![queries]);
    config.sam_out = true;
    config.out_dir = dir.join("mapout");
    config
}

fn sam_records(out_dir: &Path) -> (Vec<String>, Vec<String>) {
    let mut files: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();

    let mut header = Vec::new();
    let mut records = Vec::new();
    for file in files {
        assert_eq!(file.extension().unwrap(), "sam");
        for line in std::fs::read_to_string(file).unwrap().lines() {
            if line.starts_with('@') {
                header.push(line.to_owned());
            } else {
                records.push(line.to_owned());
            }
        }
    }
    (header, records)
}

fn fields(record: &str) -> Vec<&str> {
    record.split('\t').collect()
}

/// Sum of the S, = and M operator counts of a CIGAR.
fn cigar_span(cigar: &str) -> usize {
    let mut span = 0;
    let mut count = 0;
    for c in cigar.chars() {
        if let Some(digit) = c.to_digit(10) {
            count = count * 10 + digit as usize;
        } else {
            assert!(matches!(c, 'S' | '=' | 'M'), "unexpected cigar op {c}");
            span += count;
            count = 0;
        }
    }
    span
}

#[test]
fn mate_pairs_reference_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let first = &REF[5..30];
    let second = &REF[30..55];
    let config = setup(
        dir.path(),
        &format!(">x 1\n{first}\n>x 2\n{second}\n"),
    );

    longmem::run::<i32>(&config).unwrap();

    let (header, records) = sam_records(&config.out_dir);
    assert!(header.contains(&format!("@SQ\tSN:s\tLN:{}", REF.len())));
    assert!(header.iter().any(|line| line.starts_with("@PG\tID:longMEM")));
    assert_eq!(records.len(), 2);

    // lines are sorted by reference coordinate within the file
    let r1 = fields(&records[0]);
    let r2 = fields(&records[1]);

    assert_eq!(r1[0], "x");
    assert_eq!(r1[1], "65"); // paired, first in pair
    assert_eq!(r1[2], "s");
    assert_eq!(r1[3], "6");
    assert_eq!(r1[5], "25=");
    assert_eq!(r1[6], "s");
    assert_eq!(r1[7], "31"); // the mate's position
    assert_eq!(r1[9], first);

    assert_eq!(r2[0], "x");
    assert_eq!(r2[1], "129"); // paired, second in pair
    assert_eq!(r2[3], "31");
    assert_eq!(r2[6], "s");
    assert_eq!(r2[7], "6");

    // neither read carries the unmapped-mate bit
    for record in [&r1, &r2] {
        let flag: u16 = record[1].parse().unwrap();
        assert_eq!(flag & 8, 0);
        assert_eq!(flag & 4, 0);
    }

    for record in [&r1, &r2] {
        assert_eq!(cigar_span(record[5]), 25);
        assert!(record.iter().any(|f| *f == "XM:i:1"));
        assert!(record.iter().any(|f| *f == "XU:i:25"));
        assert!(record.iter().any(|f| *f == "XE:i:25"));
        assert!(record.iter().any(|f| *f == "NH:i:1"));
    }
}

#[test]
fn substituted_read_merges_into_one_record() {
    let dir = tempfile::tempdir().unwrap();

    // one read spanning a single substitution: segments of 20 and 24 bases
    let mut read = REF.as_bytes()[5..50].to_vec();
    read[20] = if read[20] == b'a' { b'c' } else { b'a' };
    let read = String::from_utf8(read).unwrap();

    let config = setup(dir.path(), &format!(">sub\n{read}\n"));
    longmem::run::<i32>(&config).unwrap();

    let (_, records) = sam_records(&config.out_dir);
    assert_eq!(records.len(), 1);

    let r = fields(&records[0]);
    assert_eq!(r[0], "sub");
    assert_eq!(r[1], "0");
    assert_eq!(r[3], "6");
    assert_eq!(r[5], "20=1M24=");
    assert_eq!(cigar_span(r[5]), read.len());
    assert_eq!(r[9], read);
    assert!(r.iter().any(|f| *f == "XM:i:2"));
    assert!(r.iter().any(|f| *f == "XU:i:44"));
    assert!(r.iter().any(|f| *f == "XE:i:44"));
}

#[test]
fn unmapped_reads_appear_only_with_nomap() {
    let dir = tempfile::tempdir().unwrap();
    let alien = "t".repeat(30);

    let mut config = setup(dir.path(), &format!(">lost\n{alien}\n>found\n{}\n", &REF[20..45]));
    config.nomap = true;
    longmem::run::<i32>(&config).unwrap();

    let (_, records) = sam_records(&config.out_dir);
    assert_eq!(records.len(), 2);

    // the mapped read sorts before the unmapped one
    let found = fields(&records[0]);
    assert_eq!(found[0], "found");
    assert_eq!(found[3], "21");

    let lost = fields(&records[1]);
    assert_eq!(lost[0], "lost");
    let flag: u16 = lost[1].parse().unwrap();
    assert_ne!(flag & 4, 0);
    assert_eq!(lost[2], "*");
    assert_eq!(lost[5], "*");
    assert!(lost.iter().any(|f| *f == "XM:i:0"));
}

#[test]
fn reverse_strand_reads_are_reported_flipped() {
    let dir = tempfile::tempdir().unwrap();

    // reverse complement of REF[10..34], upper-cased to check output passthrough
    let segment = &REF.as_bytes()[10..34];
    let mut read: Vec<u8> = segment.to_vec();
    read.reverse();
    for base in read.iter_mut() {
        *base = match *base {
            b'a' => b'T',
            b'c' => b'G',
            b'g' => b'C',
            b't' => b'A',
            other => other,
        };
    }
    let read = String::from_utf8(read).unwrap();

    let mut config = setup(dir.path(), &format!(">flip\n{read}\n"));
    config.rcref = true;
    longmem::run::<i32>(&config).unwrap();

    let (_, records) = sam_records(&config.out_dir);
    assert_eq!(records.len(), 1);

    let r = fields(&records[0]);
    let flag: u16 = r[1].parse().unwrap();
    assert_ne!(flag & 16, 0, "read should be reverse-strand");
    assert_eq!(r[2], "s");
    assert_eq!(r[3], "11");
    assert_eq!(cigar_span(r[5]), read.len());
    // the output sequence is the reverse complement of the input read
    assert_eq!(r[9].as_bytes(), segment.to_ascii_uppercase());
    assert!(r.iter().any(|f| *f == "XS:A:-"));
}

#[test]
fn maxmatch_reports_repeats_in_raw_mode() {
    let dir = tempfile::tempdir().unwrap();

    let repeat = "acgtgacctgacgtgacctg"; // the 10-mer repeated twice
    let fasta = dir.path().join("ref.fa");
    std::fs::write(&fasta, format!(">r\n{repeat}\n")).unwrap();
    let queries = dir.path().join("reads.fa");
    std::fs::write(&queries, ">q\nacgtgacctg\n").unwrap();

    let mut config = Config::new(&fasta, vec![queries]);
    config.kind = MatchKind::Mem;
    config.min_len = 10;
    config.out_dir = dir.path().join("mapout");
    longmem::run::<i32>(&config).unwrap();

    let mut files: Vec<PathBuf> = std::fs::read_dir(&config.out_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension().unwrap(), "txt");

    let output = std::fs::read_to_string(&files[0]).unwrap();
    let hit_lines: Vec<&str> = output.lines().filter(|l| !l.starts_with('>')).collect();
    assert_eq!(output.matches("> q").count(), 2);
    assert_eq!(hit_lines.len(), 2);
    for line in hit_lines {
        assert!(line.trim_start().starts_with('r'));
    }
}

#[test]
fn multiple_workers_process_every_read() {
    let dir = tempfile::tempdir().unwrap();

    let mut reads = String::new();
    for i in 0..40usize {
        let start = i % 30;
        reads.push_str(&format!(">r{i}\n{}\n", &REF[start..start + 25]));
    }

    let mut config = setup(dir.path(), &reads);
    config.n_threads = 3;
    longmem::run::<i32>(&config).unwrap();

    let (_, records) = sam_records(&config.out_dir);
    assert_eq!(records.len(), 40);

    for record in &records {
        let r = fields(record);
        let flag: u16 = r[1].parse().unwrap();
        assert_eq!(flag & 4, 0, "read {} should map", r[0]);
        assert_eq!(cigar_span(r[5]), 25);
    }
}
