//! Per-read k-mer queries against a mode's index: hit counting, big-k run counting,
//! best-scaffold assignment, trimming and masking.
//!
//! A [`KmerMatcher`] belongs to one processing thread. It owns that thread's scratch space
//! (best-match counters, the optional hit histogram) and its scaffold hit counters.

use crate::config::{DukSettings, HITCOUNT_LEN, MaskStyle};
use crate::encode::{KeyBuilder, MAP_LUT, RollingKmer, kmer_mask};
use crate::index::ShardedIndex;
use crate::mutate::find_variant;
use crate::read::Read;
use crate::scaffold::{ScaffoldCatalog, ScaffoldHits};

/// Which end a k-mer trim removes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrimSide {
    /// Remove the leftmost hit and everything to its right.
    Right,
    /// Remove the rightmost hit and everything to its left.
    Left,
}

#[inline]
fn base_code(b: u8) -> u64 {
    let v = MAP_LUT[b as usize];
    if v > 3 { 0 } else { v as u64 }
}

pub struct KmerMatcher<'a> {
    s: &'a DukSettings,
    catalog: &'a ScaffoldCatalog,
    keys: KeyBuilder,
    hits: ScaffoldHits<'a>,
    histogram: Option<Vec<u64>>,
    count_array: Vec<u32>,
    id_list: Vec<u32>,
}

impl<'a> KmerMatcher<'a> {
    pub fn new(s: &'a DukSettings, catalog: &'a ScaffoldCatalog, hits: ScaffoldHits<'a>) -> Self {
        Self {
            s,
            catalog,
            keys: KeyBuilder::new(s.k, s.rcomp, s.mask_middle),
            hits,
            histogram: s.match_histogram.then(|| vec![0; HITCOUNT_LEN + 1]),
            count_array: if s.find_best_match { vec![0; catalog.len()] } else { Vec::new() },
            id_list: Vec::new(),
        }
    }

    /// Match-count histogram gathered so far, if enabled.
    pub fn take_histogram(&mut self) -> Option<Vec<u64>> {
        self.histogram.as_mut().map(std::mem::take)
    }

    #[inline]
    fn note_hits(&mut self, found: usize) {
        if let Some(h) = self.histogram.as_mut() {
            h[found.min(HITCOUNT_LEN)] += 1;
        }
    }

    #[inline]
    fn skips(&self, r: &Read) -> bool {
        (self.s.skip_r1 && r.pairnum == 0) || (self.s.skip_r2 && r.pairnum == 1)
    }

    /// Scan window `[start, stop)` honouring restrict-left/right.
    #[inline]
    fn scan_window(&self, len: usize) -> (usize, usize) {
        let start = if self.s.restrict_right == 0 {
            0
        } else {
            len.saturating_sub(self.s.restrict_right)
        };
        let stop = if self.s.restrict_left == 0 {
            len
        } else {
            len.min(self.s.restrict_left)
        };
        (start, stop)
    }

    /// Valid-run length at which a full k-mer is looked up.
    #[inline]
    fn min_valid(&self) -> usize {
        if self.s.mask_middle { self.s.k / 2 } else { self.s.k }
    }

    /// Id stored for a k-mer or any substitution variant within `budget`.
    pub fn lookup(
        &self,
        index: &ShardedIndex,
        fwd: u64,
        rev: u64,
        len: usize,
        qpos: usize,
        budget: usize,
    ) -> Option<u32> {
        let sampling = self.s.sampling;
        if sampling.skips_position(qpos) {
            return None;
        }
        let keys = self.keys;
        find_variant(fwd, rev, len, budget, &mut |f, r| {
            let key = keys.key(f, r, len);
            if sampling.no_accel() || !sampling.skips_key(key) {
                index.get(key)
            } else {
                None
            }
        })
    }

    /// Number of k-mers of `read` present in `index`.
    ///
    /// The scaffold of the hit that pushes the count past `max_bad_kmers` is credited;
    /// without a histogram the scan stops right there.
    pub fn count_set_kmers(&mut self, read: &Read, index: &ShardedIndex) -> usize {
        let k = self.s.k;
        if read.len() < k || self.skips(read) {
            return 0;
        }
        let (start, stop) = self.scan_window(read.len());
        let min_valid = self.min_valid();
        let mut roll = RollingKmer::new(k, self.s.forbid_ns);
        let mut found = 0usize;
        for i in start..stop {
            roll.push(read.bases[i]);
            if roll.valid_len() >= min_valid && i + 1 >= k {
                let hit = self.lookup(index, roll.forward(), roll.reverse(), k, i, self.s.qhdist);
                if let Some(id) = hit {
                    if found == self.s.max_bad_kmers {
                        self.hits.record(id, read.len());
                        if self.histogram.is_none() {
                            return found + 1;
                        }
                    }
                    found += 1;
                }
            }
        }
        self.note_hits(found);
        found
    }

    /// Estimated number of `kbig`-mers present, from runs of consecutive `k`-mer hits:
    /// a run of `n` hits contains `n - (kbig - k)` big k-mers.
    pub fn count_set_kmers_big(&mut self, read: &Read, index: &ShardedIndex) -> usize {
        let (k, kbig) = (self.s.k, self.s.kbig);
        debug_assert!(kbig > k);
        if read.len() < kbig || self.skips(read) {
            return 0;
        }
        let sub = (kbig - k - 1) as isize;
        let (start, stop) = self.scan_window(read.len());
        let min_valid = self.min_valid();
        let mut roll = RollingKmer::new(k, self.s.forbid_ns);
        let mut found = 0usize;
        let mut run: Option<(usize, usize, u32)> = None;

        for i in start..stop {
            roll.push(read.bases[i]);
            if roll.valid_len() >= min_valid && i + 1 >= k {
                match self.lookup(index, roll.forward(), roll.reverse(), k, i, self.s.qhdist) {
                    Some(id) => {
                        if run.is_some_and(|(_, _, rid)| rid != id)
                            && self.close_run(&mut run, &mut found, sub, read.len())
                        {
                            return found;
                        }
                        run = Some(match run {
                            Some((first, _, _)) => (first, i, id),
                            None => (i, i, id),
                        });
                    }
                    None => {
                        if self.close_run(&mut run, &mut found, sub, read.len()) {
                            return found;
                        }
                    }
                }
            }
        }
        self.close_run(&mut run, &mut found, sub, read.len());
        self.note_hits(found);
        found
    }

    /// Fold a finished hit run into `found`. Returns true when the scan may stop early.
    fn close_run(
        &mut self,
        run: &mut Option<(usize, usize, u32)>,
        found: &mut usize,
        sub: isize,
        read_len: usize,
    ) -> bool {
        let Some((first, last, id)) = run.take() else {
            return false;
        };
        let dif = last as isize - first as isize - sub;
        if dif <= 0 {
            return false;
        }
        let old = *found;
        *found += dif as usize;
        if *found > self.s.max_bad_kmers && old <= self.s.max_bad_kmers {
            self.hits.record(id, read_len);
            return self.histogram.is_none();
        }
        false
    }

    /// Scaffold with the most k-mer hits, when more than `max_bad_kmers` hits were found.
    /// Ties go to the scaffold seen first. With renaming, every hit scaffold and its count
    /// is appended to the read id.
    pub fn find_best_match(&mut self, read: &mut Read, index: &ShardedIndex) -> Option<u32> {
        self.id_list.clear();
        let k = self.s.k;
        if read.len() < k || self.skips(read) {
            return None;
        }
        let (start, stop) = self.scan_window(read.len());
        let min_valid = self.min_valid();
        let mut roll = RollingKmer::new(k, self.s.forbid_ns);
        let mut found = 0usize;
        for i in start..stop {
            roll.push(read.bases[i]);
            if roll.valid_len() >= min_valid && i + 1 >= k {
                let hit = self.lookup(index, roll.forward(), roll.reverse(), k, i, self.s.qhdist);
                if let Some(id) = hit {
                    let c = &mut self.count_array[id as usize];
                    *c += 1;
                    if *c == 1 {
                        self.id_list.push(id);
                    }
                    found += 1;
                }
            }
        }

        let counts: Vec<u32> = self
            .id_list
            .iter()
            .map(|&id| std::mem::take(&mut self.count_array[id as usize]))
            .collect();

        let best = if found > self.s.max_bad_kmers {
            let max = counts.iter().copied().max().unwrap_or(0);
            let best = self
                .id_list
                .iter()
                .zip(&counts)
                .find(|(_, c)| **c == max)
                .map(|(id, _)| *id);
            if self.s.rename {
                let mut name = read.id.clone();
                for (id, c) in self.id_list.iter().zip(&counts) {
                    name.push('\t');
                    name.push_str(self.catalog.name(*id));
                    name.push('=');
                    name.push_str(&c.to_string());
                }
                read.id = name;
            }
            if let Some(id) = best {
                self.hits.record(id, read.len());
            }
            best
        } else {
            None
        };
        self.note_hits(found);
        best
    }

    /// Remove matched k-mers and everything beyond them on `side`; returns bases removed.
    pub fn ktrim(&mut self, read: &mut Read, index: &ShardedIndex, side: TrimSide) -> usize {
        let s = self.s;
        let k = s.k;
        if read.len() < s.min_scannable_len() || self.skips(read) {
            return 0;
        }
        let len = read.len();
        let (start, stop) = self.scan_window(len);
        let min_valid = self.min_valid();

        const UNSET_MIN: i64 = i64::MAX / 4;
        let (mut min_loc, mut min_loc_x) = (UNSET_MIN, UNSET_MIN);
        let (mut max_loc, mut max_loc_x) = (-1i64, -1i64);
        let mut found = 0usize;
        let mut first_id: Option<u32> = None;

        let mut roll = RollingKmer::new(k, s.forbid_ns);
        for i in start..stop {
            roll.push(read.bases[i]);
            if roll.valid_len() >= min_valid && i + 1 >= k {
                if let Some(id) = self.lookup(index, roll.forward(), roll.reverse(), k, i, s.qhdist) {
                    first_id.get_or_insert(id);
                    min_loc = min_loc.min(i as i64 + 1 - k as i64);
                    max_loc = i as i64;
                    found += 1;
                }
            }
        }
        if found > 0 {
            min_loc_x = min_loc + k as i64;
            max_loc_x = max_loc - k as i64;
        }

        if s.use_short_kmers && found == 0 {
            let mask = kmer_mask(k);
            if side == TrimSide::Left {
                let (mut fwd, mut rev) = (0u64, 0u64);
                for (n, i) in (start..stop.min(k)).enumerate() {
                    let b = read.bases[i];
                    fwd = ((fwd << 2) | base_code(b)) & mask;
                    rev |= (base_code(b) ^ 3) << (2 * n);
                    let klen = n + 1;
                    if klen >= s.mink {
                        if let Some(id) = self.lookup(index, fwd, rev, klen, i, s.qhdist2) {
                            first_id.get_or_insert(id);
                            min_loc = 0;
                            min_loc_x = min_loc_x.min(i as i64 + 1);
                            max_loc = max_loc.max(i as i64);
                            max_loc_x = max_loc_x.max(0);
                            found += 1;
                        }
                    }
                }
            } else {
                let (mut fwd, mut rev) = (0u64, 0u64);
                let lim = (stop + 1).saturating_sub(k);
                for (n, i) in (lim.max(start)..stop).rev().enumerate() {
                    let b = read.bases[i];
                    fwd |= base_code(b) << (2 * n);
                    rev = ((rev << 2) | (base_code(b) ^ 3)) & mask;
                    let klen = n + 1;
                    if klen >= s.mink {
                        if let Some(id) = self.lookup(index, fwd, rev, klen, i, s.qhdist2) {
                            first_id.get_or_insert(id);
                            min_loc = i as i64;
                            min_loc_x = min_loc_x.min(len as i64);
                            max_loc = len as i64 - 1;
                            max_loc_x = max_loc_x.max(i as i64 - 1);
                            found += 1;
                        }
                    }
                }
            }
        }

        let Some(id0) = first_id else {
            return 0;
        };
        self.hits.record(id0, len);

        if s.trim_pad != 0 {
            let pad = s.trim_pad as i64;
            let clamp = |x: i64| x.clamp(0, len as i64);
            max_loc = clamp(max_loc + pad);
            min_loc = clamp(min_loc - pad);
            max_loc_x = clamp(max_loc_x + pad);
            min_loc_x = clamp(min_loc_x - pad);
        }

        match side {
            TrimSide::Left => {
                let from = if s.ktrim_exclusive { max_loc_x + 1 } else { max_loc + 1 };
                read.trim_to_position(from.max(0) as usize, len as isize - 1, 1)
            }
            TrimSide::Right => {
                let to = if s.ktrim_exclusive { min_loc_x - 1 } else { min_loc - 1 };
                read.trim_to_position(0, to as isize, 1)
            }
        }
    }

    /// Mask bases covered by matched k-mers (widened by the trim pad); returns bases masked.
    pub fn kmask(&mut self, read: &mut Read, index: &ShardedIndex) -> usize {
        let s = self.s;
        let k = s.k;
        let len = read.len();
        if len < s.min_scannable_len() || len < k || self.skips(read) {
            return 0;
        }
        let (start, stop) = self.scan_window(len);
        let min_valid = self.min_valid();
        let pad = s.trim_pad as i64;
        let minus = k as i64 - 1 + pad;
        let plus = pad + 1;
        let mut covered = vec![false; len];
        let mut set = |a: i64, b: i64| {
            let a = a.max(0) as usize;
            let b = (b.max(0) as usize).min(len);
            if a < b {
                covered[a..b].fill(true);
            }
        };
        let mut first_id: Option<u32> = None;

        let mut roll = RollingKmer::new(k, s.forbid_ns);
        for i in start..stop {
            roll.push(read.bases[i]);
            if roll.valid_len() >= min_valid && i + 1 >= k {
                if let Some(id) = self.lookup(index, roll.forward(), roll.reverse(), k, i, s.qhdist) {
                    first_id.get_or_insert(id);
                    let i = i as i64;
                    set(i - minus, i + plus);
                }
            }
        }

        if s.use_short_kmers {
            let mask = kmer_mask(k);
            let (mut fwd, mut rev) = (0u64, 0u64);
            for (n, i) in (start..stop.min(k)).enumerate() {
                let b = read.bases[i];
                fwd = ((fwd << 2) | base_code(b)) & mask;
                rev |= (base_code(b) ^ 3) << (2 * n);
                let klen = n + 1;
                if klen >= s.mink {
                    if let Some(id) = self.lookup(index, fwd, rev, klen, i, s.qhdist2) {
                        first_id.get_or_insert(id);
                        set(0, i as i64 + plus);
                    }
                }
            }
            let (mut fwd, mut rev) = (0u64, 0u64);
            let lim = (stop + 1).saturating_sub(k);
            for (n, i) in (lim.max(start)..stop).rev().enumerate() {
                let b = read.bases[i];
                fwd |= base_code(b) << (2 * n);
                rev = ((rev << 2) | (base_code(b) ^ 3)) & mask;
                let klen = n + 1;
                if klen >= s.mink {
                    if let Some(id) = self.lookup(index, fwd, rev, klen, i, s.qhdist2) {
                        first_id.get_or_insert(id);
                        set(i as i64 - pad, len as i64);
                    }
                }
            }
        }

        let Some(id0) = first_id else {
            return 0;
        };
        self.hits.record(id0, len);

        let mut masked = 0;
        for (i, _) in covered.iter().enumerate().filter(|(_, c)| **c) {
            masked += 1;
            match s.mask_style {
                MaskStyle::Lowercase => read.bases[i] = read.bases[i].to_ascii_lowercase(),
                MaskStyle::Symbol(sym) => {
                    read.bases[i] = sym;
                    if sym == b'N' {
                        if let Some(q) = read.quality.as_mut() {
                            q[i] = 0;
                        }
                    }
                }
            }
        }
        masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DukConfig, MatchMode, ReferenceSet};
    use crate::encode::encode_kmer;
    use crate::encode::revcomp;
    use crate::scaffold::{CounterStrategy, SharedScaffoldCounts};

    fn settings(cfg: DukConfig) -> DukSettings {
        cfg.initial_size(64).threads(1).resolve().unwrap()
    }

    fn index_of(s: &DukSettings, kmers: &[&[u8]]) -> ShardedIndex {
        let kb = KeyBuilder::new(s.k, s.rcomp, s.mask_middle);
        let mut idx = ShardedIndex::new(s.table, 7, 64, true);
        for (n, kmer) in kmers.iter().enumerate() {
            let f = encode_kmer(kmer).unwrap();
            idx.insert_if_absent(kb.key(f, revcomp(f, kmer.len()), kmer.len()), n as u32 + 1);
        }
        idx
    }

    fn trim_cfg(k: usize) -> DukConfig {
        DukConfig::default()
            .k(k)
            .mask_middle(false)
            .mode_references(MatchMode::TrimRight, ReferenceSet::default().with_literal("ACGT"))
    }

    fn catalog(n: usize) -> ScaffoldCatalog {
        let mut c = ScaffoldCatalog::new();
        for i in 0..n {
            c.add(format!("s{}", i + 1), 10);
        }
        c
    }

    #[test]
    fn right_trim_keeps_bases_left_of_first_hit() {
        let s = settings(trim_cfg(4).rcomp(false));
        let idx = index_of(&s, &[b"TACG"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"ACGTACGTNNNNACGT".to_vec(), None);
        assert_eq!(m.ktrim(&mut r, &idx, TrimSide::Right), 13);
        assert_eq!(r.bases, b"ACG");
        assert_eq!(shared.reads(1), 1);
    }

    #[test]
    fn exclusive_trim_keeps_the_matched_kmer() {
        let s = settings(trim_cfg(4).rcomp(false).ktrim_exclusive(true));
        let idx = index_of(&s, &[b"TACG"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"ACGTACGTNNNNACGT".to_vec(), None);
        assert_eq!(m.ktrim(&mut r, &idx, TrimSide::Right), 9);
        assert_eq!(r.bases, b"ACGTACG");
    }

    #[test]
    fn left_trim_removes_through_last_hit() {
        let s = settings(trim_cfg(4).rcomp(false));
        let idx = index_of(&s, &[b"AAAA"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"AAAATTTT".to_vec(), None);
        assert_eq!(m.ktrim(&mut r, &idx, TrimSide::Left), 4);
        assert_eq!(r.bases, b"TTTT");
    }

    #[test]
    fn reverse_complement_hits_count_as_matches() {
        let s = settings(trim_cfg(4));
        let idx = index_of(&s, &[b"AAAA"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let r = Read::new("r", b"CCTTTTCC".to_vec(), None);
        assert_eq!(m.count_set_kmers(&r, &idx), 1);
    }

    #[test]
    fn short_kmers_trim_adapter_tail() {
        let s = settings(
            DukConfig::default()
                .k(8)
                .mink(4)
                .rcomp(false)
                .mode_references(MatchMode::TrimRight, ReferenceSet::default().with_literal("GGGG")),
        );
        // prefix of an adapter, as the loader stores it
        let idx = index_of(&s, &[b"AGATC"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"CCTTGGCATTAGATC".to_vec(), None);
        assert_eq!(m.ktrim(&mut r, &idx, TrimSide::Right), 5);
        assert_eq!(r.bases, b"CCTTGGCATT");
    }

    #[test]
    fn mask_covers_hit_and_pad() {
        let s = settings(
            DukConfig::default()
                .k(4)
                .mask_middle(false)
                .rcomp(false)
                .trim_pad(1)
                .mode_references(MatchMode::Mask, ReferenceSet::default().with_literal("GGGG")),
        );
        let idx = index_of(&s, &[b"GGGG"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"ACACGGGGACAC".to_vec(), Some(vec![30; 12]));
        assert_eq!(m.kmask(&mut r, &idx), 6);
        assert_eq!(r.bases, b"ACANNNNNNCAC");
        assert_eq!(r.quality.as_ref().unwrap()[3], 0);
        assert_eq!(r.quality.as_ref().unwrap()[2], 30);
    }

    #[test]
    fn lowercase_masking() {
        let s = settings(
            DukConfig::default()
                .k(4)
                .mask_middle(false)
                .rcomp(false)
                .mask_style(MaskStyle::Lowercase)
                .mode_references(MatchMode::Mask, ReferenceSet::default().with_literal("GGGG")),
        );
        let idx = index_of(&s, &[b"GGGG"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"ACACGGGGACAC".to_vec(), None);
        assert_eq!(m.kmask(&mut r, &idx), 4);
        assert_eq!(r.bases, b"ACACggggACAC");
    }

    #[test]
    fn best_match_prefers_scaffold_with_most_hits() {
        let s = settings(
            DukConfig::default()
                .k(4)
                .mask_middle(false)
                .rcomp(false)
                .find_best_match(true)
                .rename(true)
                .generic_references(ReferenceSet::default().with_literal("ACGT")),
        );
        let idx = index_of(&s, &[b"AAAC", b"GGGT", b"GGTC"]);
        let cat = catalog(3);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"AAACTTGGGTCC".to_vec(), None);
        // AAAC -> 1, GGGT -> 2, GGTC -> 3: all single hits, first wins
        assert_eq!(m.find_best_match(&mut r, &idx), Some(1));
        assert_eq!(r.id, "r\ts1=1\ts2=1\ts3=1");
        assert_eq!(shared.reads(1), 1);
    }

    #[test]
    fn big_k_counts_runs() {
        let s = settings(
            DukConfig::default()
                .k(33)
                .generic_references(ReferenceSet::default().with_literal("ACGT")),
        );
        assert_eq!((s.k, s.kbig), (31, 33));
        let read: Vec<u8> = b"ACGTTGCATGCAAGTCCGATTGACCTAGGATCCAGTAGGCTAACG".to_vec();
        let kb = KeyBuilder::new(s.k, s.rcomp, s.mask_middle);
        let mut idx = ShardedIndex::new(s.table, 7, 64, true);
        // every 31-mer of the first 36 bases: a run of 6 hits holds 4 33-mers
        for start in 0..=5 {
            let w = &read[start..start + 31];
            let f = encode_kmer(w).unwrap();
            idx.insert_if_absent(kb.key(f, revcomp(f, 31), 31), 1);
        }
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));
        let r = Read::new("r", read, None);
        assert_eq!(m.count_set_kmers_big(&r, &idx), 4);
    }

    fn big_k_index(s: &DukSettings, read: &[u8], ids: [u32; 6]) -> ShardedIndex {
        let kb = KeyBuilder::new(s.k, s.rcomp, s.mask_middle);
        let mut idx = ShardedIndex::new(s.table, 7, 64, true);
        for (start, id) in ids.into_iter().enumerate() {
            let f = encode_kmer(&read[start..start + 31]).unwrap();
            idx.insert_if_absent(kb.key(f, revcomp(f, 31), 31), id);
        }
        idx
    }

    #[test]
    fn big_k_runs_break_when_the_scaffold_changes() {
        let s = settings(
            DukConfig::default()
                .k(33)
                .generic_references(ReferenceSet::default().with_literal("ACGT")),
        );
        let read: Vec<u8> = b"ACGTTGCATGCAAGTCCGATTGACCTAGGATCCAGTAGGCTAACG".to_vec();
        let cat = catalog(2);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));
        let r = Read::new("r", read.clone(), None);

        let alternating = big_k_index(&s, &read, [1, 2, 1, 2, 1, 2]);
        assert_eq!(m.count_set_kmers_big(&r, &alternating), 0);

        // two runs of three; the first already holds a 33-mer and ends the scan
        let halves = big_k_index(&s, &read, [1, 1, 1, 2, 2, 2]);
        assert_eq!(m.count_set_kmers_big(&r, &halves), 1);
    }

    #[test]
    fn query_hamming_distance_finds_substituted_kmers() {
        let exact = settings(trim_cfg(6).rcomp(false));
        let idx = index_of(&exact, &[b"GATTAC"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let r = Read::new("r", b"CCGATTCCCC".to_vec(), None);
        let mut m = KmerMatcher::new(&exact, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));
        assert_eq!(m.count_set_kmers(&r, &idx), 0);

        let loose = settings(trim_cfg(6).rcomp(false).qhdist(1));
        let mut m = KmerMatcher::new(&loose, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));
        assert_eq!(m.count_set_kmers(&r, &idx), 1);
        let mut r = r;
        assert_eq!(m.ktrim(&mut r, &idx, TrimSide::Right), 8);
        assert_eq!(r.bases, b"CC");
    }

    #[test]
    fn qskip_only_looks_up_even_positions() {
        let s = settings(trim_cfg(4).rcomp(false).qskip(2));
        let idx = index_of(&s, &[b"GGGG"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));
        // the hit ends at index 4 here and at index 3 below
        assert_eq!(m.count_set_kmers(&Read::new("a", b"AGGGGA".to_vec(), None), &idx), 1);
        assert_eq!(m.count_set_kmers(&Read::new("b", b"GGGGA".to_vec(), None), &idx), 0);
    }

    #[test]
    fn speed_skips_keys_in_the_sampled_range() {
        let key = KeyBuilder::new(4, false, false).key(encode_kmer(b"GGGG").unwrap(), 0, 4);
        assert_eq!((key / 7) & 15, 12);
        let r = Read::new("r", b"AGGGGA".to_vec(), None);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        for (speed, hits) in [(13, 0), (12, 1)] {
            let s = settings(trim_cfg(4).rcomp(false).speed(speed));
            let idx = index_of(&s, &[b"GGGG"]);
            let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));
            assert_eq!(m.count_set_kmers(&r, &idx), hits, "speed {speed}");
        }
    }

    #[test]
    fn right_tip_scan_stops_short_of_a_full_kmer() {
        let s = settings(
            DukConfig::default()
                .k(8)
                .mink(4)
                .rcomp(false)
                .qhdist2(1)
                .mode_references(MatchMode::TrimRight, ReferenceSet::default().with_literal("GGGG")),
        );
        // one mismatch away from the read's last 8 bases, which only the main scan may test
        let idx = index_of(&s, &[b"AGATCGGA"]);
        let cat = catalog(1);
        let shared = SharedScaffoldCounts::new(cat.len());
        let mut m = KmerMatcher::new(&s, &cat, ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared));

        let mut r = Read::new("r", b"CCTTGGCAAGATCGGT".to_vec(), None);
        assert_eq!(m.ktrim(&mut r, &idx, TrimSide::Right), 0);
        assert_eq!(r.bases.len(), 16);
    }
}
