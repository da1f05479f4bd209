//! Bounded-memory accumulation of postings with spilling to sorted chunks.
//!
//! A [`ChunkHandler`] is shared by all build workers. Each worker owns a
//! [`Producer`] that aggregates postings in a private hash map and, once its
//! estimated footprint reaches the RAM budget, writes them as one sorted
//! chunk. Chunk numbers come from a shared atomic counter so names never
//! collide. After all producers finish, [`ChunkHandler::merge_chunks`]
//! combines the chunks into a single sorted run.

use crate::chunk::Chunk;
use crate::error::Result;
use crate::postings::{PostingsData, PrimaryKey, SecondaryKey};
use crate::progress::progress_bar;
use crate::types::Count;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// Default per-producer RAM budget (128 MiB).
pub const DEFAULT_RAM_BUDGET: u64 = 128 * 1024 * 1024;

/// Shared chunk bookkeeping for one build.
pub struct ChunkHandler<P, S> {
    dir: PathBuf,
    ram_budget: u64,
    next_chunk: AtomicU32,
    chunks: Mutex<Vec<Chunk<P, S>>>,
}

impl<P: PrimaryKey, S: SecondaryKey> ChunkHandler<P, S> {
    /// Spill chunks into `dir` (created if missing).
    pub fn new(dir: impl Into<PathBuf>, ram_budget: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            ram_budget,
            next_chunk: AtomicU32::new(0),
            chunks: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A new per-worker producer.
    pub fn producer(&self) -> Producer<'_, P, S> {
        Producer {
            handler: self,
            pdata: HashMap::new(),
            bytes: 0,
        }
    }

    /// Number of chunks written so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    fn write_chunk(&self, mut records: Vec<PostingsData<P, S>>) -> Result<()> {
        records.sort_unstable();
        let number = self.next_chunk.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("chunk-{:06}", number));
        let chunk = Chunk::write(&path, &records)?;
        debug!(
            chunk = number,
            records = records.len(),
            bytes = chunk.size(),
            "spilled chunk"
        );
        self.chunks.lock().push(chunk);
        Ok(())
    }

    /// Merge every chunk into one sorted run, always combining the two
    /// smallest. Returns `None` when nothing was ever spilled.
    pub fn merge_chunks(&self) -> Result<Option<Chunk<P, S>>> {
        let chunks = std::mem::take(&mut *self.chunks.lock());
        let count = chunks.len();
        let mut heap: BinaryHeap<Reverse<Chunk<P, S>>> = chunks.into_iter().map(Reverse).collect();
        if count > 1 {
            info!(chunks = count, "merging chunks");
        }
        let pb = progress_bar(count.saturating_sub(1) as u64, "Merging chunks");
        while heap.len() > 1 {
            let (Some(Reverse(mut smallest)), Some(Reverse(next))) = (heap.pop(), heap.pop())
            else {
                break;
            };
            smallest.merge_with(next)?;
            heap.push(Reverse(smallest));
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(heap.pop().map(|Reverse(chunk)| chunk))
    }
}

/// Per-worker accumulator. Any remaining postings are spilled on
/// [`finish`](Producer::finish), or on drop as a fallback.
pub struct Producer<'a, P: PrimaryKey, S: SecondaryKey> {
    handler: &'a ChunkHandler<P, S>,
    pdata: HashMap<P, PostingsData<P, S>>,
    bytes: u64,
}

impl<'a, P: PrimaryKey, S: SecondaryKey> Producer<'a, P, S> {
    /// Record `count` occurrences of `(primary, secondary)`.
    pub fn add(&mut self, primary: P, secondary: S, count: Count) -> Result<()> {
        self.accumulate(primary, secondary, count);
        self.maybe_flush()
    }

    /// Record all `(primary, count)` pairs observed for `secondary`.
    pub fn add_counts<I>(&mut self, secondary: S, counts: I) -> Result<()>
    where
        I: IntoIterator<Item = (P, Count)>,
    {
        for (primary, count) in counts {
            self.accumulate(primary, secondary, count);
        }
        self.maybe_flush()
    }

    /// Estimated bytes held in memory.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn accumulate(&mut self, primary: P, secondary: S, count: Count) {
        if count == 0 {
            return;
        }
        match self.pdata.entry(primary) {
            Entry::Occupied(mut e) => {
                let before = e.get().heap_bytes();
                e.get_mut().insert(secondary, count);
                self.bytes += e.get().heap_bytes().saturating_sub(before) as u64;
            }
            Entry::Vacant(e) => {
                let mut pd = PostingsData::new(e.key().clone());
                pd.insert(secondary, count);
                // The map key is a second copy of the primary.
                self.bytes += (pd.heap_bytes() + e.key().heap_bytes()) as u64;
                e.insert(pd);
            }
        }
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.bytes >= self.handler.ram_budget {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pdata.is_empty() {
            return Ok(());
        }
        let records: Vec<_> = std::mem::take(&mut self.pdata).into_values().collect();
        self.bytes = 0;
        self.handler.write_chunk(records)
    }

    /// Spill whatever is left.
    pub fn finish(mut self) -> Result<()> {
        self.flush()
    }
}

impl<'a, P: PrimaryKey, S: SecondaryKey> Drop for Producer<'a, P, S> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to spill postings on drop");
        }
    }
}
