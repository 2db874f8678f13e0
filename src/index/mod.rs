//! Sharded k-mer index: `WAYS` independent shards, each a key → scaffold-id map with
//! first-writer-wins insertion. The shard of a key is `key % ways`.
//!
//! The backend is chosen once per run ([`TableKind`]) and every shard uses the same one.
//! Lookups are read-only and safe to share across threads once loading has finished.

mod array;
mod forest;
mod table;

use std::io::{self, Write};

use rayon::prelude::*;

use crate::config::{INITIAL_SIZE_DEFAULT, TableKind};
use crate::encode::{decode_kmer, length_mask};

pub use array::HashArray;
pub use forest::HashForest;
pub use table::ChainTable;

/// Empty-slot sentinel; real keys always carry a length bit.
pub(crate) const EMPTY: u64 = 0;

const K_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// Multiplicative hash; callers keep the high bits.
#[inline]
pub(crate) fn mix(key: u64) -> u64 {
    (key ^ (key >> 29)).wrapping_mul(K_MIX)
}

/// One shard, backed by one of the three table kinds.
pub enum TableShard {
    Array(HashArray),
    Forest(HashForest),
    Table(ChainTable),
}

impl TableShard {
    pub fn new(kind: TableKind, initial_size: usize, growable: bool) -> Self {
        match kind {
            TableKind::Array => TableShard::Array(HashArray::with_capacity(initial_size, growable)),
            TableKind::Forest => TableShard::Forest(HashForest::with_capacity(initial_size)),
            TableKind::Table => TableShard::Table(ChainTable::with_capacity(initial_size)),
        }
    }

    pub fn kind(&self) -> TableKind {
        match self {
            TableShard::Array(_) => TableKind::Array,
            TableShard::Forest(_) => TableKind::Forest,
            TableShard::Table(_) => TableKind::Table,
        }
    }

    /// Insert `key → id` unless the key is already present. Returns whether it was added.
    #[inline]
    pub fn set_if_absent(&mut self, key: u64, id: u32) -> bool {
        debug_assert!(id > 0, "scaffold id 0 is reserved");
        match self {
            TableShard::Array(a) => a.set_if_absent(key, id),
            TableShard::Forest(f) => f.set_if_absent(key, id),
            TableShard::Table(t) => t.set_if_absent(key, id),
        }
    }

    #[inline]
    pub fn get(&self, key: u64) -> Option<u32> {
        match self {
            TableShard::Array(a) => a.get(key),
            TableShard::Forest(f) => f.get(key),
            TableShard::Table(t) => t.get(key),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TableShard::Array(a) => a.len(),
            TableShard::Forest(f) => f.len(),
            TableShard::Table(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Only the array backend has a primary area worth rebuilding.
    pub fn can_rebalance(&self) -> bool {
        matches!(self, TableShard::Array(_))
    }

    /// Slots (array) or buckets (forest, table) in the primary structure.
    pub fn array_len(&self) -> usize {
        match self {
            TableShard::Array(a) => a.array_len(),
            TableShard::Forest(f) => f.bucket_count(),
            TableShard::Table(t) => t.bucket_count(),
        }
    }

    pub fn rebalance(&mut self) {
        if let TableShard::Array(a) = self {
            a.rebalance();
        }
    }

    /// All `(key, id)` entries in backend order.
    pub fn dump(&self) -> Vec<(u64, u32)> {
        match self {
            TableShard::Array(a) => a.entries().collect(),
            TableShard::Forest(f) => f.entries().collect(),
            TableShard::Table(t) => t.entries().collect(),
        }
    }
}

/// The full index of one matching mode.
pub struct ShardedIndex {
    shards: Vec<TableShard>,
}

impl ShardedIndex {
    pub fn new(kind: TableKind, ways: usize, initial_size: usize, growable: bool) -> Self {
        assert!(ways > 0, "at least one shard");
        Self {
            shards: (0..ways)
                .map(|_| TableShard::new(kind, initial_size, growable))
                .collect(),
        }
    }

    /// Reassemble from shards handed back by loader workers, in shard order.
    pub fn from_shards(shards: Vec<TableShard>) -> Self {
        assert!(!shards.is_empty(), "at least one shard");
        Self { shards }
    }

    #[inline]
    pub fn ways(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn shard_of(&self, key: u64) -> usize {
        (key % self.shards.len() as u64) as usize
    }

    pub fn shard(&self, i: usize) -> &TableShard {
        &self.shards[i]
    }

    #[inline]
    pub fn get(&self, key: u64) -> Option<u32> {
        self.shards[self.shard_of(key)].get(key)
    }

    /// Route an insert to the owning shard.
    pub fn insert_if_absent(&mut self, key: u64, id: u32) -> bool {
        let s = self.shard_of(key);
        self.shards[s].set_if_absent(key, id)
    }

    pub fn len(&self) -> usize {
        self.shards.par_iter().map(TableShard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry, sorted by key.
    pub fn dump(&self) -> Vec<(u64, u32)> {
        let mut all: Vec<(u64, u32)> = self.shards.par_iter().flat_map_iter(|s| s.dump()).collect();
        all.par_sort_unstable_by_key(|&(k, _)| k);
        all
    }

    /// Write entries as `>id` / k-mer text pairs.
    pub fn write_dump<W: Write>(&self, mut w: W) -> io::Result<()> {
        for (key, id) in self.dump() {
            let (code, len) = split_key(key);
            writeln!(w, ">{id}\n{}", decode_kmer(code, len))?;
        }
        w.flush()
    }
}

/// Separate a key into its packed bases and length.
pub fn split_key(key: u64) -> (u64, usize) {
    debug_assert_ne!(key, EMPTY);
    let len = (63 - key.leading_zeros() as usize) / 2;
    (key & !length_mask(len), len)
}

/// Per-shard initial size for a memory budget of `memory` bytes shared by `tables` indices.
///
/// With `prealloc = Some(f)` the fraction `f` of table memory is claimed up front.
pub fn initial_shard_size(memory: u64, ways: usize, tables: usize, prealloc: Option<f64>) -> usize {
    let memory = memory as f64;
    let usable = ((memory - 96_000_000.0 - 8_000_000.0) * 0.75).max(memory * 0.45);
    let table_memory = usable * 0.95;
    let per_shard = 12.0 * ways as f64 * tables.max(1) as f64;
    let mem_over_ways = table_memory / per_shard;
    if prealloc.is_some() || mem_over_ways < INITIAL_SIZE_DEFAULT as f64 {
        let mem2 = prealloc.unwrap_or(1.0) * table_memory;
        ((mem2 / per_shard) as usize).clamp(1, 2_142_000_000)
    } else {
        INITIAL_SIZE_DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{KeyBuilder, encode_kmer};

    fn all_kinds() -> [TableKind; 3] {
        [TableKind::Array, TableKind::Forest, TableKind::Table]
    }

    #[test]
    fn first_writer_wins_in_every_backend() {
        for kind in all_kinds() {
            let mut idx = ShardedIndex::new(kind, 7, 64, true);
            let key = KeyBuilder::new(5, true, false).key(encode_kmer(b"ACGTA").unwrap(), 0, 5);
            assert!(idx.insert_if_absent(key, 3));
            assert!(!idx.insert_if_absent(key, 9));
            assert_eq!(idx.get(key), Some(3));
            assert_eq!(idx.len(), 1);
            assert_eq!(idx.shard(idx.shard_of(key)).len(), 1);
        }
    }

    #[test]
    fn backends_answer_identically() {
        let keys: Vec<u64> = (1..5000u64).map(|i| (i * 2_654_435_761) & 0xFFFF_FFFF | 1 << 40).collect();
        let mut indices: Vec<ShardedIndex> =
            all_kinds().iter().map(|&k| ShardedIndex::new(k, 7, 32, true)).collect();
        for (n, &key) in keys.iter().enumerate() {
            for idx in indices.iter_mut() {
                idx.insert_if_absent(key, (n % 50 + 1) as u32);
            }
        }
        let dumps: Vec<_> = indices.iter().map(ShardedIndex::dump).collect();
        assert_eq!(dumps[0], dumps[1]);
        assert_eq!(dumps[1], dumps[2]);
    }

    #[test]
    fn split_key_recovers_kmer() {
        let code = encode_kmer(b"TTGCA").unwrap();
        let key = code | length_mask(5);
        assert_eq!(split_key(key), (code, 5));
    }

    #[test]
    fn dump_writes_text_pairs() {
        let mut idx = ShardedIndex::new(TableKind::Forest, 7, 8, true);
        let code = encode_kmer(b"ACG").unwrap();
        idx.insert_if_absent(code | length_mask(3), 2);
        let mut out = Vec::new();
        idx.write_dump(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">2\nACG\n");
    }

    #[test]
    fn small_budgets_shrink_initial_size() {
        assert_eq!(initial_shard_size(64 << 30, 7, 1, None), INITIAL_SIZE_DEFAULT);
        let small = initial_shard_size(32 << 20, 7, 4, None);
        assert!(small < INITIAL_SIZE_DEFAULT);
        assert!(initial_shard_size(64 << 30, 7, 1, Some(0.5)) > INITIAL_SIZE_DEFAULT);
    }
}
