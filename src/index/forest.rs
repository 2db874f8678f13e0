//! Shard backend holding one ordered tree per hash bucket.

use std::collections::BTreeMap;

use super::mix;

pub struct HashForest {
    trees: Vec<BTreeMap<u64, u32>>,
    shift: u32,
    len: usize,
}

impl HashForest {
    pub fn with_capacity(initial: usize) -> Self {
        let buckets = (initial / 8).max(1).next_power_of_two();
        Self {
            trees: (0..buckets).map(|_| BTreeMap::new()).collect(),
            shift: 64 - buckets.trailing_zeros(),
            len: 0,
        }
    }

    #[inline]
    fn bucket(&self, key: u64) -> usize {
        // A single bucket would shift by 64.
        if self.trees.len() == 1 { 0 } else { (mix(key) >> self.shift) as usize }
    }

    pub fn get(&self, key: u64) -> Option<u32> {
        self.trees[self.bucket(key)].get(&key).copied()
    }

    pub fn set_if_absent(&mut self, key: u64, id: u32) -> bool {
        let b = self.bucket(key);
        match self.trees[b].entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(id);
                self.len += 1;
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn bucket_count(&self) -> usize {
        self.trees.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.trees.iter().flat_map(|t| t.iter().map(|(k, v)| (*k, *v)))
    }
}
