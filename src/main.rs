use clap::Parser;

use std::path::PathBuf;

use longmem::{Config, MatchKind};

/// Finds long maximal exact matches between a reference genome and read
/// streams, using a cached memory-mapped suffix array index.
#[derive(Parser)]
#[command(name = "longmem", version, about, long_about = None)]
struct Cli {
    /// Reference FASTA file; its index cache lives in `<reference>.bin/`.
    reference: PathBuf,

    /// Query files, or the output target for -mappability.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Compute maximal matches that are unique in both sequences.
    #[arg(long)]
    mum: bool,

    /// Compute maximal matches that are unique in the reference sequence but
    /// not necessarily in the query sequence (default).
    #[arg(long)]
    mumreference: bool,

    /// Same as --mumreference.
    #[arg(long)]
    mumcand: bool,

    /// Compute all maximal matches regardless of their uniqueness.
    #[arg(long)]
    maxmatch: bool,

    /// Minimum length of a match.
    #[arg(short = 'l', default_value_t = 20)]
    min_len: usize,

    /// Match only the characters a, c, g, or t.
    #[arg(short = 'n')]
    nucleotides_only: bool,

    /// Number of threads to use for queries.
    #[arg(long, default_value_t = 1)]
    qthreads: usize,

    /// Output in basic SAM format.
    #[arg(long)]
    samout: bool,

    /// Input in SAM format.
    #[arg(long)]
    samin: bool,

    /// Input in FASTQ format.
    #[arg(long)]
    fastq: bool,

    /// Output unmapped reads too (only with --samout).
    #[arg(long)]
    nomap: bool,

    /// Append the reverse complement of every reference sequence.
    #[arg(long)]
    rcref: bool,

    /// Output mappability measures only.
    #[arg(long)]
    mappability: bool,

    /// With --samout, a merged mapped block must be at least this long.
    #[arg(long, default_value_t = 20)]
    minblock: usize,

    /// Do not pre-populate mapped pages; shorter real time for subsequent
    /// runs only.
    #[arg(long)]
    cached: bool,

    /// Turn off memory mapping.
    #[arg(long)]
    normalmem: bool,

    /// Directory for the sorted output batches.
    #[arg(long, default_value = "mapout")]
    outdir: PathBuf,

    /// Output diagnostics and progress to stderr.
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(&self.reference, self.inputs);
        config.kind = if self.mum {
            MatchKind::Mum
        } else if self.maxmatch {
            MatchKind::Mem
        } else {
            // --mumreference and --mumcand are the default
            MatchKind::Mam
        };
        config.min_len = self.min_len;
        config.nucleotides_only = self.nucleotides_only;
        config.n_threads = self.qthreads;
        config.sam_out = self.samout;
        config.sam_in = self.samin;
        config.fastq = self.fastq;
        config.nomap = self.nomap;
        config.rcref = self.rcref;
        config.mappability = self.mappability;
        config.min_block = self.minblock;
        config.out_dir = self.outdir;
        config.io.populate = !self.cached;
        config.io.memory_map = !self.normalmem;
        config.verbose = self.verbose;
        config
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = cli.into_config();
    if let Err(error) = longmem::run_auto(&config) {
        log::error!("{error}");
        std::process::exit(1);
    }
}
