//! Open-addressing shard backend.
//!
//! Keys search a bounded window of a power-of-two table; when the window is full the key
//! lands in an overflow ("victim") tree. No entry is ever removed, so an empty slot inside
//! the window proves absence and a full window defers to the victims.

use std::collections::BTreeMap;

use super::{EMPTY, mix};

const MAX_STEPS: usize = 16;

pub struct HashArray {
    keys: Vec<u64>,
    values: Vec<u32>,
    shift: u32,
    in_array: usize,
    victims: BTreeMap<u64, u32>,
    growable: bool,
}

impl HashArray {
    pub fn with_capacity(initial: usize, growable: bool) -> Self {
        let cap = initial.max(16).next_power_of_two();
        Self {
            keys: vec![EMPTY; cap],
            values: vec![0; cap],
            shift: 64 - cap.trailing_zeros(),
            in_array: 0,
            victims: BTreeMap::new(),
            growable,
        }
    }

    #[inline]
    fn home(&self, key: u64) -> usize {
        (mix(key) >> self.shift) as usize
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.keys.len()
    }

    pub fn get(&self, key: u64) -> Option<u32> {
        let mask = self.capacity() - 1;
        let mut slot = self.home(key);
        for _ in 0..MAX_STEPS {
            let k = self.keys[slot];
            if k == key {
                return Some(self.values[slot]);
            }
            if k == EMPTY {
                return None;
            }
            slot = (slot + 1) & mask;
        }
        self.victims.get(&key).copied()
    }

    pub fn set_if_absent(&mut self, key: u64, id: u32) -> bool {
        debug_assert_ne!(key, EMPTY);
        if self.growable && (self.in_array + 1) * 4 > self.capacity() * 3 {
            self.resize(self.capacity() * 2);
        }
        self.place(key, id)
    }

    fn place(&mut self, key: u64, id: u32) -> bool {
        let mask = self.capacity() - 1;
        let mut slot = self.home(key);
        for _ in 0..MAX_STEPS {
            let k = self.keys[slot];
            if k == key {
                return false;
            }
            if k == EMPTY {
                self.keys[slot] = key;
                self.values[slot] = id;
                self.in_array += 1;
                return true;
            }
            slot = (slot + 1) & mask;
        }
        match self.victims.entry(key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(id);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.in_array + self.victims.len()
    }

    pub fn array_len(&self) -> usize {
        self.capacity()
    }

    /// Rebuild with room for every entry at a load factor of one half.
    pub fn rebalance(&mut self) {
        let target = (self.len() * 2).max(16).next_power_of_two();
        self.resize(target);
    }

    fn resize(&mut self, cap: usize) {
        let cap = cap.max(16).next_power_of_two();
        let old_keys = std::mem::replace(&mut self.keys, vec![EMPTY; cap]);
        let old_values = std::mem::replace(&mut self.values, vec![0; cap]);
        let victims = std::mem::take(&mut self.victims);
        self.shift = 64 - cap.trailing_zeros();
        self.in_array = 0;
        for (k, v) in old_keys.into_iter().zip(old_values) {
            if k != EMPTY {
                self.place(k, v);
            }
        }
        for (k, v) in victims {
            self.place(k, v);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.keys
            .iter()
            .zip(&self.values)
            .filter(|(k, _)| **k != EMPTY)
            .map(|(k, v)| (*k, *v))
            .chain(self.victims.iter().map(|(k, v)| (*k, *v)))
    }

    pub fn victim_count(&self) -> usize {
        self.victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_table_overflows_into_victims_and_rebalances() {
        let mut a = HashArray::with_capacity(16, false);
        for key in 1..=200u64 {
            assert!(a.set_if_absent(key << 2 | 1 << 40, key as u32));
        }
        assert_eq!(a.len(), 200);
        assert!(a.victim_count() > 0);
        assert!(a.len() > 2 * a.array_len());

        a.rebalance();
        assert_eq!(a.len(), 200);
        assert!(a.array_len() >= 400);
        for key in 1..=200u64 {
            assert_eq!(a.get(key << 2 | 1 << 40), Some(key as u32));
        }
    }

    #[test]
    fn growable_table_keeps_first_writer() {
        let mut a = HashArray::with_capacity(16, true);
        for key in 1..=1000u64 {
            a.set_if_absent(key | 1 << 50, 1);
        }
        for key in 1..=1000u64 {
            assert!(!a.set_if_absent(key | 1 << 50, 2));
            assert_eq!(a.get(key | 1 << 50), Some(1));
        }
        assert_eq!(a.victim_count(), 0);
    }
}
