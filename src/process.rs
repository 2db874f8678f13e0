//! The per-pair stage machine: header filters, force trimming, k-mer filter, mask and
//! trims, overlap trimming, quality trimming and filters, entropy.
//!
//! Each stage may flag reads; after a flagging stage the pair policy decides whether the
//! pair is removed, and the stage's counters take the pair's reads and bases. Later stages
//! only run while the pair is still kept.

use log::trace;

use crate::config::{DukSettings, MatchMode};
use crate::entropy::EntropyTracker;
use crate::error::DukError;
use crate::index::ShardedIndex;
use crate::matcher::{KmerMatcher, TrimSide};
use crate::overlap::{InsertEstimator, expected_mismatches, mismatch_probability};
use crate::read::{Read, ReadPair};
use crate::scaffold::{ScaffoldCatalog, ScaffoldHits};
use crate::stats::ProcessStats;
use crate::trim::{force_trim, quality_trim};

/// One index per matching mode; `None` for modes without references.
#[derive(Default)]
pub struct ModeIndices {
    pub filter: Option<ShardedIndex>,
    pub mask: Option<ShardedIndex>,
    pub trim_right: Option<ShardedIndex>,
    pub trim_left: Option<ShardedIndex>,
}

impl ModeIndices {
    pub fn get(&self, mode: MatchMode) -> Option<&ShardedIndex> {
        match mode {
            MatchMode::Filter => self.filter.as_ref(),
            MatchMode::Mask => self.mask.as_ref(),
            MatchMode::TrimRight => self.trim_right.as_ref(),
            MatchMode::TrimLeft => self.trim_left.as_ref(),
        }
    }

    pub fn set(&mut self, mode: MatchMode, index: ShardedIndex) {
        let slot = match mode {
            MatchMode::Filter => &mut self.filter,
            MatchMode::Mask => &mut self.mask,
            MatchMode::TrimRight => &mut self.trim_right,
            MatchMode::TrimLeft => &mut self.trim_left,
        };
        *slot = Some(index);
    }

    pub fn is_empty(&self) -> bool {
        MatchMode::ALL.iter().all(|&m| self.get(m).is_none())
    }
}

/// Where the pairs of one input batch go.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub passed: Vec<ReadPair>,
    pub bad: Vec<ReadPair>,
    pub singles: Vec<ReadPair>,
}

enum Fate {
    Keep,
    Remove { to_bad: bool },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum KmerEdit {
    Mask,
    Trim(TrimSide),
}

/// Per-thread processor owning the thread's matcher, entropy state and counters.
pub struct PairProcessor<'a> {
    s: &'a DukSettings,
    indices: &'a ModeIndices,
    matcher: KmerMatcher<'a>,
    entropy: Option<EntropyTracker>,
    estimator: Option<&'a dyn InsertEstimator>,
    stats: ProcessStats,
}

impl<'a> PairProcessor<'a> {
    pub fn new(
        s: &'a DukSettings,
        indices: &'a ModeIndices,
        catalog: &'a ScaffoldCatalog,
        hits: ScaffoldHits<'a>,
        estimator: Option<&'a dyn InsertEstimator>,
    ) -> Self {
        Self {
            s,
            indices,
            matcher: KmerMatcher::new(s, catalog, hits),
            entropy: s.entropy.as_ref().map(EntropyTracker::new),
            estimator,
            stats: ProcessStats::default(),
        }
    }

    /// Counters and match histogram gathered by this thread; flushes scaffold hits.
    pub fn finish(mut self) -> (ProcessStats, Option<Vec<u64>>) {
        let hist = self.matcher.take_histogram();
        (self.stats, hist)
    }

    pub fn process_batch(&mut self, pairs: Vec<ReadPair>) -> Result<BatchOutcome, DukError> {
        let mut out = BatchOutcome::default();
        for mut pair in pairs {
            match self.process_pair(&mut pair)? {
                Fate::Keep => {
                    self.stats.reads_out += pair.read_count();
                    self.stats.bases_out += pair.base_count();
                    out.passed.push(pair);
                }
                Fate::Remove { to_bad } => {
                    if let Some(single) = lone_survivor(&pair) {
                        out.singles.push(single);
                    }
                    if to_bad {
                        out.bad.push(pair);
                    }
                }
            }
        }
        Ok(out)
    }

    #[inline]
    fn removes(&self, pair: &ReadPair) -> bool {
        self.s.pair_policy.removes(pair.first.discarded(), pair.mate_discarded())
    }

    /// Flag reads shorter than their minimum (or longer than the maximum) length.
    fn flag_by_length(&self, pair: &mut ReadPair, initial: [usize; 2], check_max: bool) {
        let s = self.s;
        for (n, r) in pair.reads_mut().enumerate() {
            if r.len() < s.min_len_for(initial[n]) || (check_max && r.len() > s.max_read_len) {
                r.set_discarded(true);
            }
        }
    }

    fn process_pair(&mut self, pair: &mut ReadPair) -> Result<Fate, DukError> {
        let (s, indices) = (self.s, self.indices);
        let (reads, bases) = (pair.read_count(), pair.base_count());
        self.stats.reads_in += reads;
        self.stats.bases_in += bases;
        let initial = [pair.first.len(), pair.mate.as_ref().map_or(0, Read::len)];

        if self.bad_header(pair)? {
            pair.discard_all();
            self.stats.bad_header_reads += reads;
            self.stats.bad_header_bases += bases;
            return Ok(Fate::Remove { to_bad: true });
        }

        if s.force_trim.is_active() {
            for r in pair.reads_mut() {
                let x = force_trim(r, &s.force_trim);
                if x > 0 {
                    self.stats.ftrimmed_reads += 1;
                    self.stats.ftrimmed_bases += x as u64;
                }
            }
            self.flag_by_length(pair, initial, false);
            if self.removes(pair) {
                self.stats.qfiltered_reads += pair.read_count();
                self.stats.qfiltered_bases += pair.base_count();
                return Ok(Fate::Remove { to_bad: true });
            }
        }

        if let Some(idx) = indices.filter.as_ref() {
            self.kmer_filter(pair, idx);
            if self.removes(pair) {
                self.stats.kfiltered_reads += pair.read_count();
                self.stats.kfiltered_bases += pair.base_count();
                trace!("{} removed by k-mer filter", pair.first.id);
                return Ok(Fate::Remove { to_bad: true });
            }
        }

        let trimmed_to_bad = s.add_trimmed_to_bad;
        if let Some(idx) = indices.mask.as_ref() {
            if self.kmer_edit(pair, idx, KmerEdit::Mask, initial) {
                return Ok(Fate::Remove { to_bad: trimmed_to_bad });
            }
        }
        if let Some(idx) = indices.trim_right.as_ref() {
            let before = pair.base_count();
            if self.kmer_edit(pair, idx, KmerEdit::Trim(TrimSide::Right), initial) {
                return Ok(Fate::Remove { to_bad: trimmed_to_bad });
            }
            if s.trim_pairs_evenly && pair.base_count() < before {
                self.even_out(pair);
            }
        }
        if self.overlap_trim(pair, initial) {
            return Ok(Fate::Remove { to_bad: trimmed_to_bad });
        }
        if let Some(idx) = indices.trim_left.as_ref() {
            if self.kmer_edit(pair, idx, KmerEdit::Trim(TrimSide::Left), initial) {
                return Ok(Fate::Remove { to_bad: trimmed_to_bad });
            }
        }

        if s.quality_trim.is_active() {
            for r in pair.reads_mut() {
                let x = quality_trim(r, &s.quality_trim);
                if x > 0 {
                    self.stats.qtrimmed_reads += 1;
                    self.stats.qtrimmed_bases += x as u64;
                }
            }
        }
        self.flag_by_length(pair, initial, true);
        if self.removes(pair) {
            self.stats.qtrimmed_bases += pair.base_count();
            return Ok(Fate::Remove { to_bad: trimmed_to_bad });
        }

        if self.quality_filter(pair) {
            self.stats.qfiltered_reads += pair.read_count();
            self.stats.qfiltered_bases += pair.base_count();
            return Ok(Fate::Remove { to_bad: true });
        }

        if let Some(tracker) = self.entropy.as_mut() {
            let cutoff = s.entropy.map_or(0.0, |e| e.cutoff);
            for r in pair.reads_mut() {
                if !tracker.passes(&r.bases, cutoff) {
                    r.set_discarded(true);
                }
            }
            if self.removes(pair) {
                self.stats.efiltered_reads += pair.read_count();
                self.stats.efiltered_bases += pair.base_count();
                return Ok(Fate::Remove { to_bad: true });
            }
        }

        Ok(Fate::Keep)
    }

    /// Chastity and barcode checks. A bad barcode aborts the run when configured to.
    fn bad_header(&self, pair: &ReadPair) -> Result<bool, DukError> {
        let s = self.s;
        if s.chastity_filter && pair.reads().any(Read::fails_chastity) {
            return Ok(true);
        }
        let bc = &s.barcodes;
        if !(bc.remove_bad || bc.fail_bad) {
            return Ok(false);
        }
        let valid = match pair.first.barcode() {
            None => !bc.fail_if_missing,
            Some(code) => match &bc.allowed {
                Some(set) => set.contains(code),
                None => code
                    .bytes()
                    .all(|b| crate::encode::map_base(b).is_some() || b == b'+'),
            },
        };
        if valid {
            return Ok(false);
        }
        if bc.fail_bad {
            return Err(DukError::InvalidBarcode(pair.first.id.clone()));
        }
        Ok(true)
    }

    fn kmer_filter(&mut self, pair: &mut ReadPair, idx: &ShardedIndex) {
        let s = self.s;
        for r in pair.reads_mut() {
            if r.discarded() {
                continue;
            }
            let hit = if s.find_best_match {
                self.matcher.find_best_match(r, idx).is_some()
            } else if s.kbig > s.k {
                self.matcher.count_set_kmers_big(r, idx) > s.max_bad_kmers
            } else {
                self.matcher.count_set_kmers(r, idx) > s.max_bad_kmers
            };
            if hit {
                r.set_discarded(true);
            }
        }
    }

    /// Mask or trim both reads; returns whether the pair is removed afterwards.
    fn kmer_edit(&mut self, pair: &mut ReadPair, idx: &ShardedIndex, edit: KmerEdit, initial: [usize; 2]) -> bool {
        let (mut xsum, mut rktsum) = (0u64, 0u64);
        for r in pair.reads_mut() {
            let x = match edit {
                KmerEdit::Mask => self.matcher.kmask(r, idx),
                KmerEdit::Trim(side) => self.matcher.ktrim(r, idx, side),
            };
            if x > 0 {
                xsum += x as u64;
                rktsum += 1;
            }
        }
        self.flag_by_length(pair, initial, false);
        let removed = self.removes(pair);
        if removed && edit != KmerEdit::Mask {
            xsum += pair.base_count();
            rktsum = pair.read_count();
        }
        self.stats.ktrimmed_reads += rktsum;
        self.stats.ktrimmed_bases += xsum;
        removed
    }

    /// Trim the longer mate of a right-trimmed pair to the shorter one's length.
    fn even_out(&mut self, pair: &mut ReadPair) {
        let Some(mate) = pair.mate.as_mut() else {
            return;
        };
        let first = &mut pair.first;
        let (a, b) = (first.len(), mate.len());
        if a == b {
            return;
        }
        let (longer, keep) = if a > b { (first, b) } else { (mate, a) };
        let x = longer.trim_to_position(0, keep as isize - 1, 1);
        if x > 0 {
            self.stats.ktrimmed_reads += 1;
            self.stats.ktrimmed_bases += x as u64;
        }
    }

    /// Truncate both mates to the estimated insert; returns whether the pair is removed.
    fn overlap_trim(&mut self, pair: &mut ReadPair, initial: [usize; 2]) -> bool {
        let (Some(ov), Some(estimator)) = (self.s.overlap, self.estimator) else {
            return false;
        };
        let Some(mate) = pair.mate.as_mut() else {
            return false;
        };
        let first = &mut pair.first;
        if first.expected_errors().max(mate.expected_errors()) >= ov.mee_filter {
            return false;
        }

        mate.reverse_complement();
        let est = estimator.estimate(first, mate);
        let mut insert = est.insert.filter(|&i| i >= ov.min_insert);
        if let Some(i) = insert {
            if ov.use_quality && first.quality.is_some() && mate.quality.is_some() {
                let expected = expected_mismatches(first, mate, i);
                let ambiguous =
                    est.ambiguous || (expected + ov.efilter_offset) * ov.efilter_ratio < est.mismatches as f32;
                if ambiguous || mismatch_probability(expected, est.mismatches) < ov.pfilter_ratio {
                    insert = None;
                }
            } else if est.ambiguous {
                insert = None;
            }
        }
        mate.reverse_complement();

        let Some(insert) = insert else {
            return false;
        };
        for r in pair.reads_mut() {
            if r.len() > insert {
                let x = r.trim_to_position(0, insert as isize - 1, 1);
                self.stats.otrimmed_reads += 1;
                self.stats.otrimmed_bases += x as u64;
            }
        }
        self.flag_by_length(pair, initial, false);
        self.removes(pair)
    }

    /// Average quality, N count and base-frequency filters; returns whether removed.
    fn quality_filter(&mut self, pair: &mut ReadPair) -> bool {
        let s = self.s;
        if s.min_avg_quality == 0 && s.max_ns.is_none() && s.min_base_frequency <= 0.0 {
            return false;
        }
        for r in pair.reads_mut() {
            let low_quality = s.min_avg_quality > 0
                && r.avg_quality(s.min_avg_quality_bases)
                    .is_some_and(|q| q < s.min_avg_quality);
            let too_many_ns = s.max_ns.is_some_and(|m| r.count_undefined() > m);
            let skewed = s.min_base_frequency > 0.0
                && (r.min_base_count() as f32) < s.min_base_frequency * r.len() as f32;
            if low_quality || too_many_ns || skewed {
                r.set_discarded(true);
            }
        }
        self.removes(pair)
    }
}

/// Copy of the only read of a removed pair that was not itself flagged.
fn lone_survivor(pair: &ReadPair) -> Option<ReadPair> {
    let mate = pair.mate.as_ref()?;
    let survivor = match (pair.first.discarded(), mate.discarded()) {
        (false, true) => &pair.first,
        (true, false) => mate,
        _ => return None,
    };
    let mut single = survivor.clone();
    single.pairnum = 0;
    Some(ReadPair::single(single))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BarcodeFilter, DukConfig, EntropySettings, PairPolicy, ReferenceSet};
    use crate::encode::{KeyBuilder, encode_kmer, revcomp};
    use crate::scaffold::{CounterStrategy, SharedScaffoldCounts};

    const ADAPTER: &[u8] = b"AGATCGGAAGAGC";

    fn index_with(s: &DukSettings, kmers: &[&[u8]]) -> ShardedIndex {
        let kb = KeyBuilder::new(s.k, s.rcomp, s.mask_middle);
        let mut idx = ShardedIndex::new(s.table, 7, 64, true);
        for kmer in kmers {
            let f = encode_kmer(kmer).unwrap();
            idx.insert_if_absent(kb.key(f, revcomp(f, kmer.len()), kmer.len()), 1);
        }
        idx
    }

    fn run(s: &DukSettings, indices: &ModeIndices, pairs: Vec<ReadPair>) -> (BatchOutcome, ProcessStats) {
        let mut cat = ScaffoldCatalog::new();
        cat.add("adapter", ADAPTER.len() as u64);
        let shared = SharedScaffoldCounts::new(cat.len());
        let hits = ScaffoldHits::new(CounterStrategy::ThreadLocal, &shared);
        let mut p = PairProcessor::new(s, indices, &cat, hits, None);
        let out = p.process_batch(pairs).unwrap();
        let (stats, _) = p.finish();
        (out, stats)
    }

    fn base_cfg() -> DukConfig {
        DukConfig::default()
            .k(5)
            .mask_middle(false)
            .min_read_len(3)
            .threads(1)
            .initial_size(64)
    }

    fn pair(a: &[u8], b: &[u8]) -> ReadPair {
        ReadPair::paired(Read::new("p/1", a.to_vec(), None), Read::new("p/2", b.to_vec(), None))
    }

    #[test]
    fn either_bad_removes_pair_and_emits_singleton() {
        let s = base_cfg()
            .generic_references(ReferenceSet::default().with_literal("x"))
            .resolve()
            .unwrap();
        let indices = ModeIndices {
            filter: Some(index_with(&s, &[b"GATCG"])),
            ..ModeIndices::default()
        };
        let (out, stats) = run(&s, &indices, vec![pair(b"TTAGATCGGTT", b"CCCCCCCCCC")]);
        assert!(out.passed.is_empty());
        assert_eq!(out.bad.len(), 1);
        assert_eq!(out.singles.len(), 1);
        assert_eq!(out.singles[0].first.bases, b"CCCCCCCCCC");
        assert_eq!(stats.kfiltered_reads, 2);
        assert_eq!(stats.reads_out, 0);
    }

    #[test]
    fn both_bad_keeps_pair_with_one_hit() {
        let s = base_cfg()
            .pair_policy(PairPolicy::BothBad)
            .generic_references(ReferenceSet::default().with_literal("x"))
            .resolve()
            .unwrap();
        let indices = ModeIndices {
            filter: Some(index_with(&s, &[b"GATCG"])),
            ..ModeIndices::default()
        };
        let (out, stats) = run(&s, &indices, vec![pair(b"TTAGATCGGTT", b"CCCCCCCCCC")]);
        assert_eq!(out.passed.len(), 1);
        assert!(out.passed[0].first.discarded());
        assert!(out.singles.is_empty());
        assert_eq!(stats.reads_out, 2);
    }

    #[test]
    fn right_trim_then_length_check() {
        let s = base_cfg()
            .rcomp(false)
            .min_read_len(6)
            .mode_references(MatchMode::TrimRight, ReferenceSet::default().with_literal("x"))
            .resolve()
            .unwrap();
        let indices = ModeIndices {
            trim_right: Some(index_with(&s, &[b"AGATC"])),
            ..ModeIndices::default()
        };
        let kept = ReadPair::single(Read::new("a", b"CCTTGGCAAGATCGG".to_vec(), None));
        let short = ReadPair::single(Read::new("b", b"CCAGATCGG".to_vec(), None));
        let (out, stats) = run(&s, &indices, vec![kept, short]);
        assert_eq!(out.passed.len(), 1);
        assert_eq!(out.passed[0].first.bases, b"CCTTGGCA");
        assert_eq!(out.bad.len(), 1);
        // 7 trimmed from the kept read, then 7 trimmed plus the 2 left from the removed one
        assert_eq!(stats.ktrimmed_bases, 16);
        assert_eq!(stats.ktrimmed_reads, 2);
    }

    #[test]
    fn low_entropy_reads_are_dropped() {
        let s = base_cfg()
            .entropy(EntropySettings {
                k: 2,
                window: 8,
                cutoff: 0.5,
                verify: true,
            })
            .resolve()
            .unwrap();
        let indices = ModeIndices::default();
        let (out, stats) = run(
            &s,
            &indices,
            vec![
                ReadPair::single(Read::new("poly", vec![b'A'; 30], None)),
                ReadPair::single(Read::new("mixed", b"ACGTTGCAAGCTAGCTTACGGATC".to_vec(), None)),
            ],
        );
        assert_eq!(out.passed.len(), 1);
        assert_eq!(out.passed[0].first.id, "mixed");
        assert_eq!(stats.efiltered_reads, 1);
    }

    #[test]
    fn invalid_barcode_fails_when_requested() {
        let s = base_cfg()
            .barcodes(BarcodeFilter {
                fail_bad: true,
                ..BarcodeFilter::default()
            })
            .resolve()
            .unwrap();
        let indices = ModeIndices::default();
        let cat = ScaffoldCatalog::new();
        let shared = SharedScaffoldCounts::new(cat.len());
        let hits = ScaffoldHits::new(CounterStrategy::SharedAtomic, &shared);
        let mut p = PairProcessor::new(&s, &indices, &cat, hits, None);
        let bad = ReadPair::single(Read::new("r 1:N:0:ACNNAC", b"ACGTACGT".to_vec(), None));
        assert!(matches!(p.process_batch(vec![bad]), Err(DukError::InvalidBarcode(_))));
    }

    #[test]
    fn max_ns_filter() {
        let s = base_cfg().max_ns(1).resolve().unwrap();
        let indices = ModeIndices::default();
        let (out, stats) = run(
            &s,
            &indices,
            vec![ReadPair::single(Read::new("n", b"ACGNNACGTA".to_vec(), None))],
        );
        assert!(out.passed.is_empty());
        assert_eq!(stats.qfiltered_reads, 1);
    }
}
