//! The query pipeline: reader threads parse read streams and hand queries to
//! a pool of aligner workers through bounded ring buffers; each worker owns a
//! pair of aligners and a sorted output buffer.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::align::Aligner;
use crate::index::SuffixIndex;
use crate::output::OutputSorter;
use crate::query::{InputFormat, NewQuery, RecordParser};
use crate::{ChromosomeMap, Config, Error, IndexInt, Result};

/// Queries buffered per worker before its reader has to look elsewhere.
const QUEUE_CAPACITY: usize = 1000;

/// A bounded FIFO handoff between one producer and one consumer, blocking on
/// two condition variables under a single mutex.
pub struct RingBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    space: Condvar,
    ready: Condvar,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        RingBuffer {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            space: Condvar::new(),
            ready: Condvar::new(),
        }
    }

    /// Blocks while the buffer is full.
    pub fn push(&self, value: T) {
        self.push_with_headroom(value, 1);
    }

    /// Blocks until `headroom` slots are free, then stores `value` in the
    /// first of them. A producer placing the first read of a mate pair uses a
    /// headroom of two, so both mates are guaranteed to fit the same buffer.
    pub fn push_with_headroom(&self, value: T, headroom: usize) {
        let mut queue = self.queue.lock().unwrap();
        while queue.len() + headroom > self.capacity {
            queue = self.space.wait(queue).unwrap();
        }
        queue.push_back(value);
        self.ready.notify_one();
    }

    /// Like [`push_with_headroom`](Self::push_with_headroom), but hands the
    /// value back instead of blocking.
    pub fn try_push_with_headroom(&self, value: T, headroom: usize) -> std::result::Result<(), T> {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() + headroom > self.capacity {
            return Err(value);
        }
        queue.push_back(value);
        self.ready.notify_one();
        Ok(())
    }

    /// Blocks while the buffer is empty.
    pub fn pop(&self) -> T {
        let mut queue = self.queue.lock().unwrap();
        while queue.is_empty() {
            queue = self.ready.wait(queue).unwrap();
        }
        let value = queue.pop_front().expect("queue is non-empty");
        self.space.notify_one();
        value
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One aligner worker: drains its queue, pairs consecutive reads as mates and
/// prints both once the second arrives.
struct Worker<I: bytemuck::Pod> {
    queue: Arc<RingBuffer<NewQuery>>,
    read1: Aligner<I>,
    read2: Aligner<I>,
    output: OutputSorter,
    n_queries: u64,
}

impl<I: IndexInt> Worker<I> {
    fn run(mut self) -> Result<u64> {
        loop {
            let query = self.queue.pop();
            // an empty query is the end-of-stream marker
            if !query.complete() {
                break;
            }
            let second = self.n_queries % 2 == 1;
            self.n_queries += 1;

            let read = if second { &mut self.read2 } else { &mut self.read1 };
            read.reset(query);
            read.run();

            if second {
                if self.read1.has_mate(&self.read2) {
                    let first_view = self.read1.mate_view();
                    let second_view = self.read2.mate_view();
                    self.read1.link_mate(&second_view);
                    self.read2.link_mate(&first_view);
                }
                self.read1.print(&mut self.output)?;
                self.read2.print(&mut self.output)?;
            }
        }

        // a dangling first read of an unfinished pair still gets printed
        if self.n_queries % 2 == 1 {
            self.read1.print(&mut self.output)?;
        }
        self.output.flush()?;

        Ok(self.n_queries)
    }
}

/// The fixed-size pool of worker threads, plus the free list that readers
/// rotate through when a worker's queue fills up.
pub struct WorkerPool {
    queues: Vec<Arc<RingBuffer<NewQuery>>>,
    available: RingBuffer<usize>,
    handles: Mutex<Vec<JoinHandle<u64>>>,
    start_time: Instant,
}

impl WorkerPool {
    pub fn new<I: IndexInt>(
        config: &Config,
        index: Arc<SuffixIndex<I>>,
        chromosomes: Arc<ChromosomeMap>,
        header: Arc<String>,
    ) -> Self {
        let n_threads = config.n_threads;
        log::info!(
            "running {n_threads} thread{} to answer queries",
            if n_threads > 1 { "s" } else { "" }
        );

        let mut queues = Vec::with_capacity(n_threads);
        let mut handles = Vec::with_capacity(n_threads);
        let available = RingBuffer::new(n_threads);

        for worker_id in 0..n_threads {
            let queue = Arc::new(RingBuffer::new(QUEUE_CAPACITY));
            let worker = Worker {
                queue: Arc::clone(&queue),
                read1: Aligner::new(config, Arc::clone(&index)),
                read2: Aligner::new(config, Arc::clone(&index)),
                output: OutputSorter::new(
                    config,
                    Arc::clone(&header),
                    Arc::clone(&chromosomes),
                    worker_id,
                ),
                n_queries: 0,
            };
            handles.push(std::thread::spawn(move || match worker.run() {
                Ok(n_queries) => n_queries,
                Err(error) => {
                    log::error!("worker {worker_id}: {error}");
                    std::process::exit(1);
                }
            }));
            queues.push(queue);
            available.push(worker_id);
        }

        WorkerPool {
            queues,
            available,
            handles: Mutex::new(handles),
            start_time: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Takes a worker out of the free list, blocking until one is available.
    pub(crate) fn checkout(&self) -> usize {
        self.available.pop()
    }

    /// Returns the current worker and takes the next free one, which may be
    /// the same worker again if it is the only one.
    pub(crate) fn rotate(&self, current: usize) -> usize {
        self.available.push(current);
        self.available.pop()
    }

    pub(crate) fn release(&self, worker: usize) {
        self.available.push(worker);
    }

    pub(crate) fn queue(&self, worker: usize) -> &RingBuffer<NewQuery> {
        &self.queues[worker]
    }

    /// Sends the end-of-stream marker to every worker and waits for all of
    /// them. Returns the total number of processed queries.
    pub fn finish(&self) -> Result<u64> {
        for queue in &self.queues {
            queue.push(NewQuery::default());
        }

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        let mut n_processed = 0;
        for handle in handles {
            n_processed += handle
                .join()
                .map_err(|_| Error::Range("worker thread panicked".into()))?;
        }

        log::info!(
            "ran {n_processed} queries in {} seconds",
            self.start_time.elapsed().as_secs()
        );
        Ok(n_processed)
    }
}

/// A reader thread parsing one input file into queries.
pub struct QueryReader {
    handle: JoinHandle<u64>,
    path: PathBuf,
}

impl QueryReader {
    pub fn spawn(input: &Path, config: &Config, pool: Arc<WorkerPool>) -> Result<Self> {
        let file = File::open(input).map_err(|source| Error::io("open", input, source))?;
        let format = if config.sam_in {
            InputFormat::Sam
        } else if config.fastq {
            InputFormat::Fastq
        } else {
            InputFormat::Fasta
        };
        let parser = RecordParser::new(
            BufReader::new(file),
            format,
            config.nucleotides_only,
            input.to_owned(),
        );

        let handle = std::thread::spawn(move || match reader_loop(parser, pool) {
            Ok(n_sequences) => n_sequences,
            Err(error) => {
                log::error!("query reader: {error}");
                std::process::exit(1);
            }
        });

        Ok(QueryReader {
            handle,
            path: input.to_owned(),
        })
    }

    /// Waits for the reader to drain its input; returns the number of reads.
    pub fn join(self) -> Result<u64> {
        let n_sequences = self
            .handle
            .join()
            .map_err(|_| Error::Range("reader thread panicked".into()))?;
        log::info!(
            "query reader for {} processed {n_sequences} sequences",
            self.path.display()
        );
        Ok(n_sequences)
    }
}

fn reader_loop<R: std::io::BufRead>(
    mut parser: RecordParser<R>,
    pool: Arc<WorkerPool>,
) -> Result<u64> {
    let mut worker = pool.checkout();
    let mut n_sequences: u64 = 0;
    let mut n_full: u64 = 0;

    loop {
        let query = match parser.next_record() {
            Ok(Some(query)) => query,
            Ok(None) => break,
            Err(error) => {
                log::warn!("skipping unparseable read: {error}");
                continue;
            }
        };

        if n_sequences % 2 == 0 {
            // The first read of a pair only goes where its mate also fits;
            // rotate through the free workers, and if every queue is full,
            // wait on the current one.
            let mut pending = query;
            let mut attempts = 0;
            loop {
                match pool.queue(worker).try_push_with_headroom(pending, 2) {
                    Ok(()) => break,
                    Err(back) => pending = back,
                }
                n_full += 1;
                attempts += 1;
                if attempts >= pool.len() {
                    pool.queue(worker).push_with_headroom(pending, 2);
                    break;
                }
                worker = pool.rotate(worker);
            }
        } else {
            pool.queue(worker).push(query);
        }
        n_sequences += 1;
    }

    pool.release(worker);

    if n_sequences == 0 {
        log::warn!("no reads processed");
    }
    if n_full > 0 {
        log::debug!("no query buffer slot was available {n_full} times");
    }
    Ok(n_sequences)
}
