//! Scaffold catalog and per-scaffold hit counters.
//!
//! Id 0 is reserved (`""`, length 0) and means "no match"; real scaffolds start at 1.

use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only id → (name, length) catalog, with the reference source of each scaffold.
#[derive(Clone, Debug)]
pub struct ScaffoldCatalog {
    names: Vec<String>,
    lengths: Vec<u64>,
    sources: Vec<usize>,
    source_names: Vec<String>,
}

impl Default for ScaffoldCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaffoldCatalog {
    pub fn new() -> Self {
        Self {
            names: vec![String::new()],
            lengths: vec![0],
            sources: vec![usize::MAX],
            source_names: Vec::new(),
        }
    }

    /// Register a reference source (file path or "literal"); later scaffolds belong to it.
    pub fn begin_source(&mut self, name: impl Into<String>) -> usize {
        self.source_names.push(name.into());
        self.source_names.len() - 1
    }

    /// Append a scaffold and return its id.
    pub fn add(&mut self, name: impl Into<String>, length: u64) -> u32 {
        let id = self.names.len() as u32;
        self.names.push(name.into());
        self.lengths.push(length);
        self.sources
            .push(self.source_names.len().checked_sub(1).unwrap_or(usize::MAX));
        id
    }

    /// Number of ids including the reserved one.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no real scaffold has been added.
    pub fn is_empty(&self) -> bool {
        self.names.len() <= 1
    }

    pub fn name(&self, id: u32) -> &str {
        &self.names[id as usize]
    }

    pub fn length(&self, id: u32) -> u64 {
        self.lengths[id as usize]
    }

    /// Source index of a scaffold, `None` for the reserved id.
    pub fn source_of(&self, id: u32) -> Option<usize> {
        match self.sources[id as usize] {
            usize::MAX => None,
            s => Some(s),
        }
    }

    pub fn source_names(&self) -> &[String] {
        &self.source_names
    }

    /// Real scaffold ids.
    pub fn ids(&self) -> impl Iterator<Item = u32> {
        1..self.names.len() as u32
    }
}

/// Shared per-scaffold counters, written with relaxed atomics.
pub struct SharedScaffoldCounts {
    reads: Vec<AtomicU64>,
    bases: Vec<AtomicU64>,
}

impl SharedScaffoldCounts {
    pub fn new(len: usize) -> Self {
        Self {
            reads: (0..len).map(|_| AtomicU64::new(0)).collect(),
            bases: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    pub fn record(&self, id: u32, bases: u64) {
        self.reads[id as usize].fetch_add(1, Ordering::Relaxed);
        self.bases[id as usize].fetch_add(bases, Ordering::Relaxed);
    }

    pub fn reads(&self, id: u32) -> u64 {
        self.reads[id as usize].load(Ordering::Relaxed)
    }

    pub fn bases(&self, id: u32) -> u64 {
        self.bases[id as usize].load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

/// Which owner type a processing thread uses for scaffold hits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterStrategy {
    /// Private arrays merged into the shared ones when the thread finishes.
    ThreadLocal,
    /// Atomic adds straight into the shared arrays.
    SharedAtomic,
}

impl CounterStrategy {
    /// Private arrays are used when their combined size stays well under the memory
    /// budget and the catalog is small.
    pub fn choose(threads: usize, scaffolds: usize, memory_budget: u64) -> Self {
        let local_bytes = threads as u128 * 3 * 8 * scaffolds as u128;
        if local_bytes < memory_budget as u128 * 5 && scaffolds < 10_000 {
            CounterStrategy::ThreadLocal
        } else {
            CounterStrategy::SharedAtomic
        }
    }
}

/// A thread's handle for recording scaffold hits.
pub enum ScaffoldHits<'a> {
    Local {
        reads: Vec<u64>,
        bases: Vec<u64>,
        shared: &'a SharedScaffoldCounts,
    },
    Shared(&'a SharedScaffoldCounts),
}

impl<'a> ScaffoldHits<'a> {
    pub fn new(strategy: CounterStrategy, shared: &'a SharedScaffoldCounts) -> Self {
        match strategy {
            CounterStrategy::ThreadLocal => ScaffoldHits::Local {
                reads: vec![0; shared.len()],
                bases: vec![0; shared.len()],
                shared,
            },
            CounterStrategy::SharedAtomic => ScaffoldHits::Shared(shared),
        }
    }

    /// One read of `bases` length attributed to scaffold `id`.
    #[inline]
    pub fn record(&mut self, id: u32, bases: usize) {
        match self {
            ScaffoldHits::Local { reads, bases: b, .. } => {
                reads[id as usize] += 1;
                b[id as usize] += bases as u64;
            }
            ScaffoldHits::Shared(s) => s.record(id, bases as u64),
        }
    }

    /// Fold private counts into the shared arrays.
    pub fn flush(&mut self) {
        if let ScaffoldHits::Local { reads, bases, shared } = self {
            for (id, (r, b)) in reads.iter_mut().zip(bases.iter_mut()).enumerate() {
                if *r > 0 || *b > 0 {
                    shared.reads[id].fetch_add(*r, Ordering::Relaxed);
                    shared.bases[id].fetch_add(*b, Ordering::Relaxed);
                    *r = 0;
                    *b = 0;
                }
            }
        }
    }
}

impl Drop for ScaffoldHits<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one() {
        let mut cat = ScaffoldCatalog::new();
        cat.begin_source("adapters.fa");
        assert_eq!(cat.add("a1", 10), 1);
        assert_eq!(cat.add("a2", 12), 2);
        assert_eq!(cat.length(2), 12);
        assert_eq!(cat.name(0), "");
        assert_eq!(cat.source_of(1), Some(0));
        assert_eq!(cat.source_of(0), None);
        assert_eq!(cat.ids().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn local_and_shared_counters_agree() {
        let shared = SharedScaffoldCounts::new(3);
        {
            let mut local = ScaffoldHits::new(CounterStrategy::ThreadLocal, &shared);
            local.record(1, 100);
            local.record(1, 50);
            let mut direct = ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared);
            direct.record(2, 30);
            // nothing visible from the local handle until it is flushed
            assert_eq!(shared.reads(1), 0);
        }
        assert_eq!((shared.reads(1), shared.bases(1)), (2, 150));
        assert_eq!((shared.reads(2), shared.bases(2)), (1, 30));
    }

    #[test]
    fn strategy_prefers_local_for_small_catalogs() {
        assert_eq!(CounterStrategy::choose(8, 100, 1 << 30), CounterStrategy::ThreadLocal);
        assert_eq!(CounterStrategy::choose(8, 20_000, 1 << 30), CounterStrategy::SharedAtomic);
    }
}
