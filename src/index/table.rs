//! Chained shard backend: short vectors scanned linearly, bucket count doubling as it fills.

use super::mix;

pub struct ChainTable {
    chains: Vec<Vec<(u64, u32)>>,
    shift: u32,
    len: usize,
}

impl ChainTable {
    pub fn with_capacity(initial: usize) -> Self {
        let buckets = initial.max(2).next_power_of_two();
        Self {
            chains: vec![Vec::new(); buckets],
            shift: 64 - buckets.trailing_zeros(),
            len: 0,
        }
    }

    #[inline]
    fn bucket(&self, key: u64) -> usize {
        (mix(key) >> self.shift) as usize
    }

    pub fn get(&self, key: u64) -> Option<u32> {
        self.chains[self.bucket(key)]
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    pub fn set_if_absent(&mut self, key: u64, id: u32) -> bool {
        let b = self.bucket(key);
        if self.chains[b].iter().any(|(k, _)| *k == key) {
            return false;
        }
        self.chains[b].push((key, id));
        self.len += 1;
        if self.len > 2 * self.chains.len() {
            self.grow();
        }
        true
    }

    fn grow(&mut self) {
        let buckets = self.chains.len() * 2;
        let old = std::mem::replace(&mut self.chains, vec![Vec::new(); buckets]);
        self.shift = 64 - buckets.trailing_zeros();
        for (k, v) in old.into_iter().flatten() {
            let b = self.bucket(k);
            self.chains[b].push((k, v));
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn bucket_count(&self) -> usize {
        self.chains.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.chains.iter().flat_map(|c| c.iter().copied())
    }
}
