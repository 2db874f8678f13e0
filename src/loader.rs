//! Reference loading: reads reference records, hands every batch to one worker per shard,
//! and lets each worker store the keys it owns.
//!
//! Every worker sees every record and performs the full (possibly mutation-expanded)
//! k-mer walk; only keys with `key % WAYS == worker` are inserted, so shards are written
//! without locks. Per-record counters are therefore seen `WAYS` times and divided back.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info};

use crate::config::{DukSettings, MatchMode, ReferenceSet, WAYS};
use crate::encode::{KeyBuilder, RollingKmer, map_base};
use crate::error::DukError;
use crate::index::{ShardedIndex, TableShard};
use crate::io::ReferenceReader;
use crate::mutate::{expand, right_mask};
use crate::scaffold::ScaffoldCatalog;

/// Records per broadcast batch.
const BATCH_RECORDS: usize = 200;
/// Batches buffered per worker.
const CHANNEL_DEPTH: usize = 32;

/// One reference sequence with its scaffold id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefRecord {
    pub id: u32,
    pub bases: Vec<u8>,
}

/// Totals of one index load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub refs: u64,
    pub ref_bases: u64,
    /// Full-length k-mers walked (before mutation expansion).
    pub ref_kmers: u64,
    /// Keys newly stored across all shards.
    pub kmers_added: u64,
}

impl LoadStats {
    fn add(&mut self, o: &LoadStats) {
        self.refs += o.refs;
        self.ref_bases += o.ref_bases;
        self.ref_kmers += o.ref_kmers;
        self.kmers_added += o.kmers_added;
    }
}

/// Stride between stored k-mers of a record of `len` bases.
pub fn ref_skip(len: usize, k: usize, min_skip: usize, max_skip: usize) -> usize {
    let skip = if len > 20_000_000 {
        k
    } else if len > 5_000_000 {
        11
    } else if len > 500_000 {
        2
    } else {
        0
    };
    skip.clamp(min_skip, max_skip.max(min_skip))
}

/// Build the index of `mode` from its reference set, registering scaffolds in `catalog`.
pub fn load_index(
    mode: MatchMode,
    s: &DukSettings,
    catalog: &mut ScaffoldCatalog,
) -> Result<(ShardedIndex, LoadStats), DukError> {
    let refs = s.references.get(mode);
    let started = Instant::now();

    let (shards, worker_stats, fed) = thread::scope(|scope| {
        let mut senders = Vec::with_capacity(WAYS);
        let mut handles = Vec::with_capacity(WAYS);
        for tnum in 0..WAYS {
            let (tx, rx) = bounded::<Arc<Vec<RefRecord>>>(CHANNEL_DEPTH);
            senders.push(tx);
            handles.push(scope.spawn(move || {
                let shard = TableShard::new(s.table, s.initial_size, s.growable);
                LoadWorker::new(tnum, s, shard).run(rx)
            }));
        }

        let fed = feed_references(refs, catalog, &senders);
        // closing the channels ends the workers
        drop(senders);

        let mut shards = Vec::with_capacity(WAYS);
        let mut stats = LoadStats::default();
        let mut panicked = false;
        for h in handles {
            match h.join() {
                Ok((shard, ws)) => {
                    stats.add(&ws);
                    shards.push(shard);
                }
                Err(_) => panicked = true,
            }
        }
        if panicked {
            return (shards, stats, Err(DukError::Output(format!("{} loader worker panicked", mode.label()))));
        }
        (shards, stats, fed)
    });
    let (refs_read, bases_read) = fed?;

    let ways = WAYS as u64;
    let stats = LoadStats {
        refs: refs_read,
        ref_bases: bases_read,
        ref_kmers: worker_stats.ref_kmers / ways,
        kmers_added: worker_stats.kmers_added,
    };
    debug_assert_eq!(worker_stats.refs / ways, refs_read);

    let index = ShardedIndex::from_shards(shards);
    info!(
        "{}: {} refs, {} bases, {} kmers added in {:.2?}",
        mode.label(),
        stats.refs,
        stats.ref_bases,
        stats.kmers_added,
        started.elapsed()
    );
    Ok((index, stats))
}

/// Read files in order, then literals; assign ids and broadcast batches.
fn feed_references(
    refs: &ReferenceSet,
    catalog: &mut ScaffoldCatalog,
    senders: &[Sender<Arc<Vec<RefRecord>>>],
) -> Result<(u64, u64), DukError> {
    let mut batch = Vec::with_capacity(BATCH_RECORDS);
    let (mut records, mut bases) = (0u64, 0u64);

    let mut push = |batch: &mut Vec<RefRecord>, rec: RefRecord| -> Result<(), DukError> {
        records += 1;
        bases += rec.bases.len() as u64;
        batch.push(rec);
        if batch.len() >= BATCH_RECORDS {
            broadcast(senders, std::mem::take(batch))?;
        }
        Ok(())
    };

    for path in &refs.files {
        catalog.begin_source(path.display().to_string());
        let mut reader = ReferenceReader::open(Path::new(path))?;
        while let Some((name, seq)) = reader.next_record()? {
            let id = catalog.add(name, seq.len() as u64);
            push(&mut batch, RefRecord { id, bases: seq })?;
        }
        debug!("read references from {}", path.display());
    }
    if !refs.literals.is_empty() {
        catalog.begin_source("literal");
        for lit in &refs.literals {
            let next = catalog.len();
            let id = catalog.add(next.to_string(), lit.len() as u64);
            push(&mut batch, RefRecord { id, bases: lit.as_bytes().to_vec() })?;
        }
    }
    if !batch.is_empty() {
        broadcast(senders, batch)?;
    }
    Ok((records, bases))
}

fn broadcast(senders: &[Sender<Arc<Vec<RefRecord>>>], batch: Vec<RefRecord>) -> Result<(), DukError> {
    let batch = Arc::new(batch);
    for tx in senders {
        tx.send(Arc::clone(&batch))
            .map_err(|_| DukError::Output("reference loader worker stopped early".into()))?;
    }
    Ok(())
}

/// Owns one shard while loading.
struct LoadWorker<'a> {
    tnum: u64,
    s: &'a DukSettings,
    keys: KeyBuilder,
    shard: TableShard,
    stats: LoadStats,
}

impl<'a> LoadWorker<'a> {
    fn new(tnum: usize, s: &'a DukSettings, shard: TableShard) -> Self {
        Self {
            tnum: tnum as u64,
            s,
            keys: KeyBuilder::new(s.k, s.rcomp, s.mask_middle),
            shard,
            stats: LoadStats::default(),
        }
    }

    fn run(mut self, rx: Receiver<Arc<Vec<RefRecord>>>) -> (TableShard, LoadStats) {
        for batch in rx {
            for rec in batch.iter() {
                self.add_record(rec);
            }
        }
        let shard = &mut self.shard;
        if shard.can_rebalance() && shard.len() > 2 * shard.array_len() {
            shard.rebalance();
        }
        (self.shard, self.stats)
    }

    /// Store `fwd` and its variants; returns keys newly stored by this worker.
    /// Key sampling only thins exact k-mers; variants are always stored.
    fn store(&mut self, fwd: u64, rev: u64, len: usize, id: u32, extra: Option<u64>, short: bool) -> u64 {
        let (budget, edits) = if short {
            (self.s.hdist2, self.s.edist2 > 0)
        } else {
            (self.s.hdist, self.s.edist > 0)
        };
        let (keys, sampling, tnum, ways) = (self.keys, self.s.sampling, self.tnum, WAYS as u64);
        let sampled = budget == 0;
        let shard = &mut self.shard;
        expand(fwd, rev, len, budget, extra, edits, &mut |f, r| {
            let key = keys.key(f, r, len);
            if key % ways != tnum || (sampled && sampling.skips_key(key)) {
                return 0;
            }
            shard.set_if_absent(key, id) as u64
        })
    }

    fn add_record(&mut self, rec: &RefRecord) {
        let k = self.s.k;
        let bases = &rec.bases;
        self.stats.refs += 1;
        self.stats.ref_bases += bases.len() as u64;
        if bases.len() < k {
            return;
        }
        let skip = ref_skip(bases.len(), k, self.s.min_skip, self.s.max_skip);
        let short = self.s.use_short_kmers;
        let mut roll = RollingKmer::new(k, true);
        let mut added = 0u64;

        for i in 0..bases.len() {
            if !roll.push(bases[i]) {
                continue;
            }
            let (fwd, rev) = (roll.forward(), roll.reverse());
            self.stats.ref_kmers += 1;

            if short && i + 1 == k {
                let (mut kmer, mut rkmer) = (fwd, rev);
                for len in (self.s.mink..k).rev() {
                    let dropped = kmer & 3;
                    kmer >>= 2;
                    rkmer &= right_mask(len);
                    added += self.store(kmer, rkmer, len, rec.id, Some(dropped), true);
                }
            }

            let valid = roll.valid_len();
            if skip <= 1 || valid % skip == 0 {
                let extra = bases.get(i + 1).and_then(|&b| map_base(b)).map(u64::from);
                added += self.store(fwd, rev, k, rec.id, extra, false);
            }

            if short && i + 1 == bases.len() {
                let (mut kmer, mut rkmer) = (fwd, rev);
                for len in (self.s.mink..k).rev() {
                    kmer &= right_mask(len);
                    rkmer >>= 2;
                    added += self.store(kmer, rkmer, len, rec.id, None, true);
                }
            }
        }
        self.stats.kmers_added += added;
    }
}
