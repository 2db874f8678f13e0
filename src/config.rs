//! Run configuration: a chained builder (`DukConfig`) resolved once into the immutable
//! `DukSettings` that every loader and processing thread borrows.

use std::collections::HashSet;
use std::path::PathBuf;

use log::warn;

use crate::encode::{MAX_K, middle_mask};
use crate::error::ConfigError;

/// Number of index shards (and loader workers per mode).
pub const WAYS: usize = 7;
/// Per-shard slot count used when memory is plentiful.
pub const INITIAL_SIZE_DEFAULT: usize = 128_000;
/// Upper bound of the match-count histogram.
pub const HITCOUNT_LEN: usize = 1000;
/// Largest entropy window.
pub const MAX_ENTROPY_WINDOW: usize = u16::MAX as usize;

/// Backend used by every index shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TableKind {
    /// Open addressing with an overflow tree.
    #[default]
    Array,
    /// One balanced tree per bucket.
    Forest,
    /// Chained buckets.
    Table,
}

/// When a pair is removed after one of its reads is flagged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PairPolicy {
    #[default]
    EitherBad,
    BothBad,
}

impl PairPolicy {
    /// Joint removal decision for a primary read and its optional mate.
    #[inline]
    pub fn removes(self, first_discarded: bool, mate_discarded: Option<bool>) -> bool {
        match self {
            PairPolicy::EitherBad => first_discarded || mate_discarded.unwrap_or(false),
            PairPolicy::BothBad => first_discarded && mate_discarded.unwrap_or(true),
        }
    }
}

/// How masked bases are rewritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskStyle {
    /// Replace with a symbol; quality drops to 0 when the symbol is `N`.
    Symbol(u8),
    Lowercase,
}

impl Default for MaskStyle {
    fn default() -> Self {
        MaskStyle::Symbol(b'N')
    }
}

/// The four k-mer matching modes, each with its own index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchMode {
    Filter,
    Mask,
    TrimRight,
    TrimLeft,
}

impl MatchMode {
    pub const ALL: [MatchMode; 4] = [
        MatchMode::Filter,
        MatchMode::Mask,
        MatchMode::TrimRight,
        MatchMode::TrimLeft,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MatchMode::Filter => "kfilter",
            MatchMode::Mask => "kmask",
            MatchMode::TrimRight => "ktrim-right",
            MatchMode::TrimLeft => "ktrim-left",
        }
    }
}

/// Sequence files and literal strings feeding one index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    pub files: Vec<PathBuf>,
    pub literals: Vec<String>,
}

impl ReferenceSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.literals.is_empty()
    }

    pub fn with_file(mut self, p: impl Into<PathBuf>) -> Self {
        self.files.push(p.into());
        self
    }

    pub fn with_literal(mut self, s: impl Into<String>) -> Self {
        self.literals.push(s.into());
        self
    }
}

/// Reference sets per mode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModeReferences {
    pub filter: ReferenceSet,
    pub mask: ReferenceSet,
    pub trim_right: ReferenceSet,
    pub trim_left: ReferenceSet,
}

impl ModeReferences {
    pub fn get(&self, mode: MatchMode) -> &ReferenceSet {
        match mode {
            MatchMode::Filter => &self.filter,
            MatchMode::Mask => &self.mask,
            MatchMode::TrimRight => &self.trim_right,
            MatchMode::TrimLeft => &self.trim_left,
        }
    }

    fn get_mut(&mut self, mode: MatchMode) -> &mut ReferenceSet {
        match mode {
            MatchMode::Filter => &mut self.filter,
            MatchMode::Mask => &mut self.mask,
            MatchMode::TrimRight => &mut self.trim_right,
            MatchMode::TrimLeft => &mut self.trim_left,
        }
    }

    /// Modes that have at least one reference source.
    pub fn active_modes(&self) -> Vec<MatchMode> {
        MatchMode::ALL
            .into_iter()
            .filter(|&m| !self.get(m).is_empty())
            .collect()
    }
}

/// Fixed-position trimming applied before k-mer matching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForceTrim {
    /// Trim bases before this position.
    pub left: usize,
    /// Trim bases after this position.
    pub right: Option<usize>,
    /// Trim this many bases from the end.
    pub right2: usize,
    /// Trim so the length is a multiple of this, minus one.
    pub modulo: usize,
}

impl ForceTrim {
    pub fn is_active(&self) -> bool {
        self.left > 0 || self.right.is_some() || self.right2 > 0 || self.modulo > 0
    }
}

/// Quality trimming at read ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QualityTrim {
    pub left: bool,
    pub right: bool,
    pub trimq: u8,
}

impl Default for QualityTrim {
    fn default() -> Self {
        Self {
            left: false,
            right: false,
            trimq: 6,
        }
    }
}

impl QualityTrim {
    pub fn is_active(&self) -> bool {
        self.left || self.right
    }
}

/// Gates and limits for overlap-based insert trimming.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlapSettings {
    pub min_overlap0: usize,
    pub min_overlap: usize,
    pub min_insert0: usize,
    pub min_insert: usize,
    pub max_ratio: f32,
    pub ratio_margin: f32,
    pub ratio_offset: f32,
    pub efilter_ratio: f32,
    pub efilter_offset: f32,
    pub pfilter_ratio: f32,
    /// Pairs whose expected errors reach this value are not overlap-trimmed.
    pub mee_filter: f32,
    pub use_quality: bool,
}

impl OverlapSettings {
    pub fn strict() -> Self {
        Self {
            min_overlap0: 7,
            min_overlap: 14,
            min_insert0: 16,
            min_insert: 50,
            max_ratio: 0.05,
            ratio_margin: 9.0,
            ratio_offset: 0.5,
            efilter_ratio: 3.5,
            efilter_offset: 0.05,
            pfilter_ratio: 0.001,
            mee_filter: 15.0,
            use_quality: true,
        }
    }

    pub fn loose() -> Self {
        Self {
            max_ratio: 0.10,
            ratio_margin: 5.0,
            ratio_offset: 0.4,
            efilter_ratio: 6.0,
            efilter_offset: 0.05,
            pfilter_ratio: 0.00005,
            mee_filter: f32::MAX,
            ..Self::strict()
        }
    }

    /// Apply user overlap/insert minimums, keeping the first-pass values no larger.
    pub fn with_minimums(mut self, min_overlap: Option<usize>, min_insert: Option<usize>) -> Self {
        if let Some(o) = min_overlap {
            self.min_overlap = o.max(1);
            self.min_overlap0 = self.min_overlap0.min(self.min_overlap);
        }
        if let Some(i) = min_insert {
            self.min_insert = i.max(1);
            self.min_insert0 = self.min_insert0.min(self.min_insert);
        }
        self
    }
}

/// Low-complexity filter parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntropySettings {
    pub k: usize,
    pub window: usize,
    /// Reads scoring below this are discarded.
    pub cutoff: f32,
    pub verify: bool,
}

impl Default for EntropySettings {
    fn default() -> Self {
        Self {
            k: 5,
            window: 50,
            cutoff: -1.0,
            verify: false,
        }
    }
}

/// Sparse sampling of keys and query positions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sampling {
    /// Keys with `((key / WAYS) & 15) < speed` are never stored nor looked up.
    pub speed: u64,
    /// Only query positions divisible by this are looked up.
    pub qskip: usize,
}

impl Sampling {
    #[inline]
    pub fn no_accel(&self) -> bool {
        self.speed < 1 && self.qskip < 2
    }

    #[inline]
    pub fn skips_key(&self, key: u64) -> bool {
        self.speed > 0 && ((key / WAYS as u64) & 15) < self.speed
    }

    #[inline]
    pub fn skips_position(&self, pos: usize) -> bool {
        self.qskip > 1 && pos % self.qskip != 0
    }
}

/// Barcode checks on read identifiers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BarcodeFilter {
    /// Allowed barcodes; `None` accepts any barcode free of ambiguous bases.
    pub allowed: Option<HashSet<String>>,
    pub remove_bad: bool,
    /// Abort the run on the first bad barcode.
    pub fail_bad: bool,
    pub fail_if_missing: bool,
}

/// User-facing configuration with chained setters. Call [`DukConfig::resolve`] to validate
/// it and derive the effective settings.
#[derive(Clone, Debug)]
pub struct DukConfig {
    k: usize,
    mink: Option<usize>,
    use_short_kmers: bool,
    hdist: usize,
    qhdist: usize,
    edist: usize,
    hdist2: Option<usize>,
    qhdist2: Option<usize>,
    edist2: Option<usize>,
    mask_middle: bool,
    rcomp: bool,
    forbid_ns: bool,
    table: TableKind,
    prealloc: Option<f64>,
    initial_size: Option<usize>,
    memory_budget: u64,
    threads: usize,
    ordered: bool,
    pair_policy: PairPolicy,
    min_read_len: usize,
    max_read_len: usize,
    min_len_fraction: f32,
    max_bad_kmers: usize,
    find_best_match: bool,
    rename: bool,
    use_ref_names: bool,
    trim_pad: usize,
    ktrim_exclusive: bool,
    mask_style: MaskStyle,
    sampling: Sampling,
    min_skip: usize,
    max_skip: usize,
    restrict_left: usize,
    restrict_right: usize,
    skip_r1: bool,
    skip_r2: bool,
    entropy: EntropySettings,
    force_trim: ForceTrim,
    quality_trim: QualityTrim,
    min_avg_quality: u8,
    min_avg_quality_bases: usize,
    max_ns: Option<usize>,
    min_base_frequency: f32,
    chastity_filter: bool,
    barcodes: BarcodeFilter,
    trim_by_overlap: bool,
    strict_overlap: bool,
    use_quality_for_overlap: bool,
    min_overlap: Option<usize>,
    min_insert: Option<usize>,
    trim_pairs_evenly: bool,
    add_trimmed_to_bad: bool,
    skip_reads: u64,
    max_reads: Option<u64>,
    match_histogram: bool,
    references: ModeReferences,
    generic_refs: ReferenceSet,
    generic_mode: Option<MatchMode>,
}

impl Default for DukConfig {
    fn default() -> Self {
        Self {
            k: 27,
            mink: None,
            use_short_kmers: false,
            hdist: 0,
            qhdist: 0,
            edist: 0,
            hdist2: None,
            qhdist2: None,
            edist2: None,
            mask_middle: true,
            rcomp: true,
            forbid_ns: false,
            table: TableKind::Array,
            prealloc: None,
            initial_size: None,
            memory_budget: 4 << 30,
            threads: num_cpus::get().max(1),
            ordered: false,
            pair_policy: PairPolicy::EitherBad,
            min_read_len: 10,
            max_read_len: usize::MAX,
            min_len_fraction: 0.0,
            max_bad_kmers: 0,
            find_best_match: false,
            rename: false,
            use_ref_names: false,
            trim_pad: 0,
            ktrim_exclusive: false,
            mask_style: MaskStyle::default(),
            sampling: Sampling {
                speed: 0,
                qskip: 1,
            },
            min_skip: 1,
            max_skip: 99,
            restrict_left: 0,
            restrict_right: 0,
            skip_r1: false,
            skip_r2: false,
            entropy: EntropySettings::default(),
            force_trim: ForceTrim::default(),
            quality_trim: QualityTrim::default(),
            min_avg_quality: 0,
            min_avg_quality_bases: 0,
            max_ns: None,
            min_base_frequency: 0.0,
            chastity_filter: false,
            barcodes: BarcodeFilter::default(),
            trim_by_overlap: false,
            strict_overlap: true,
            use_quality_for_overlap: false,
            min_overlap: None,
            min_insert: None,
            trim_pairs_evenly: false,
            add_trimmed_to_bad: true,
            skip_reads: 0,
            max_reads: None,
            match_histogram: false,
            references: ModeReferences::default(),
            generic_refs: ReferenceSet::default(),
            generic_mode: None,
        }
    }
}

impl DukConfig {
    /// K-mer length; values above 31 enable big-k emulation by run counting.
    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }
    /// Shortest k-mer used at read tips; enables short k-mers when below k.
    pub fn mink(mut self, m: usize) -> Self {
        self.mink = Some(m);
        self
    }
    pub fn use_short_kmers(mut self, yes: bool) -> Self {
        self.use_short_kmers = yes;
        self
    }
    /// Hamming distance of stored reference variants.
    pub fn hdist(mut self, d: usize) -> Self {
        self.hdist = d;
        self
    }
    /// Hamming distance tried at query time.
    pub fn qhdist(mut self, d: usize) -> Self {
        self.qhdist = d;
        self
    }
    /// Edit distance of stored reference variants.
    pub fn edist(mut self, d: usize) -> Self {
        self.edist = d;
        self
    }
    pub fn hdist2(mut self, d: usize) -> Self {
        self.hdist2 = Some(d);
        self
    }
    pub fn qhdist2(mut self, d: usize) -> Self {
        self.qhdist2 = Some(d);
        self
    }
    pub fn edist2(mut self, d: usize) -> Self {
        self.edist2 = Some(d);
        self
    }
    pub fn mask_middle(mut self, yes: bool) -> Self {
        self.mask_middle = yes;
        self
    }
    /// Match reverse complements (default: true).
    pub fn rcomp(mut self, yes: bool) -> Self {
        self.rcomp = yes;
        self
    }
    pub fn forbid_ns(mut self, yes: bool) -> Self {
        self.forbid_ns = yes;
        self
    }
    pub fn table(mut self, t: TableKind) -> Self {
        self.table = t;
        self
    }
    /// Preallocate this fraction of the table memory budget.
    pub fn prealloc(mut self, fraction: f64) -> Self {
        self.prealloc = Some(fraction.clamp(0.0, 1.0));
        self
    }
    pub fn initial_size(mut self, n: usize) -> Self {
        self.initial_size = Some(n.max(1));
        self
    }
    pub fn memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n.max(1);
        self
    }
    /// Emit output batches in input order.
    pub fn ordered(mut self, yes: bool) -> Self {
        self.ordered = yes;
        self
    }
    pub fn pair_policy(mut self, p: PairPolicy) -> Self {
        self.pair_policy = p;
        self
    }
    pub fn min_read_len(mut self, n: usize) -> Self {
        self.min_read_len = n;
        self
    }
    pub fn max_read_len(mut self, n: usize) -> Self {
        self.max_read_len = n;
        self
    }
    pub fn min_len_fraction(mut self, f: f32) -> Self {
        self.min_len_fraction = f;
        self
    }
    pub fn max_bad_kmers(mut self, n: usize) -> Self {
        self.max_bad_kmers = n;
        self
    }
    pub fn find_best_match(mut self, yes: bool) -> Self {
        self.find_best_match = yes;
        self
    }
    pub fn rename(mut self, yes: bool) -> Self {
        self.rename = yes;
        self
    }
    /// Report statistics under reference file names instead of record names.
    pub fn use_ref_names(mut self, yes: bool) -> Self {
        self.use_ref_names = yes;
        self
    }
    pub fn trim_pad(mut self, n: usize) -> Self {
        self.trim_pad = n;
        self
    }
    pub fn ktrim_exclusive(mut self, yes: bool) -> Self {
        self.ktrim_exclusive = yes;
        self
    }
    pub fn mask_style(mut self, s: MaskStyle) -> Self {
        self.mask_style = s;
        self
    }
    pub fn speed(mut self, s: u64) -> Self {
        self.sampling.speed = s;
        self
    }
    pub fn qskip(mut self, q: usize) -> Self {
        self.sampling.qskip = q.max(1);
        self
    }
    pub fn ref_skip(mut self, min_skip: usize, max_skip: usize) -> Self {
        self.min_skip = min_skip;
        self.max_skip = max_skip;
        self
    }
    pub fn restrict_left(mut self, n: usize) -> Self {
        self.restrict_left = n;
        self
    }
    pub fn restrict_right(mut self, n: usize) -> Self {
        self.restrict_right = n;
        self
    }
    pub fn skip_r1(mut self, yes: bool) -> Self {
        self.skip_r1 = yes;
        self
    }
    pub fn skip_r2(mut self, yes: bool) -> Self {
        self.skip_r2 = yes;
        self
    }
    pub fn entropy(mut self, e: EntropySettings) -> Self {
        self.entropy = e;
        self
    }
    pub fn force_trim(mut self, f: ForceTrim) -> Self {
        self.force_trim = f;
        self
    }
    pub fn quality_trim(mut self, q: QualityTrim) -> Self {
        self.quality_trim = q;
        self
    }
    pub fn min_avg_quality(mut self, q: u8, over_first_bases: usize) -> Self {
        self.min_avg_quality = q;
        self.min_avg_quality_bases = over_first_bases;
        self
    }
    pub fn max_ns(mut self, n: usize) -> Self {
        self.max_ns = Some(n);
        self
    }
    pub fn min_base_frequency(mut self, f: f32) -> Self {
        self.min_base_frequency = f;
        self
    }
    pub fn chastity_filter(mut self, yes: bool) -> Self {
        self.chastity_filter = yes;
        self
    }
    pub fn barcodes(mut self, b: BarcodeFilter) -> Self {
        self.barcodes = b;
        self
    }
    pub fn trim_by_overlap(mut self, yes: bool) -> Self {
        self.trim_by_overlap = yes;
        self
    }
    pub fn strict_overlap(mut self, yes: bool) -> Self {
        self.strict_overlap = yes;
        self
    }
    pub fn use_quality_for_overlap(mut self, yes: bool) -> Self {
        self.use_quality_for_overlap = yes;
        self
    }
    pub fn overlap_minimums(mut self, min_overlap: Option<usize>, min_insert: Option<usize>) -> Self {
        self.min_overlap = min_overlap;
        self.min_insert = min_insert;
        self
    }
    pub fn trim_pairs_evenly(mut self, yes: bool) -> Self {
        self.trim_pairs_evenly = yes;
        self
    }
    pub fn add_trimmed_to_bad(mut self, yes: bool) -> Self {
        self.add_trimmed_to_bad = yes;
        self
    }
    pub fn skip_reads(mut self, n: u64) -> Self {
        self.skip_reads = n;
        self
    }
    pub fn max_reads(mut self, n: u64) -> Self {
        self.max_reads = Some(n);
        self
    }
    /// Collect the per-read match-count histogram (disables early exit when counting).
    pub fn match_histogram(mut self, yes: bool) -> Self {
        self.match_histogram = yes;
        self
    }
    /// References for one specific mode.
    pub fn mode_references(mut self, mode: MatchMode, set: ReferenceSet) -> Self {
        let slot = self.references.get_mut(mode);
        slot.files.extend(set.files);
        slot.literals.extend(set.literals);
        self
    }
    /// References assigned to the mode chosen by [`DukConfig::generic_mode`], or to
    /// filtering when no mode was chosen.
    pub fn generic_references(mut self, set: ReferenceSet) -> Self {
        self.generic_refs.files.extend(set.files);
        self.generic_refs.literals.extend(set.literals);
        self
    }
    /// Mode requested for the generic references (`ktrim=r|l|n` style).
    pub fn generic_mode(mut self, mode: MatchMode) -> Self {
        self.generic_mode = Some(mode);
        self
    }

    /// Validate and derive the effective settings.
    pub fn resolve(self) -> Result<DukSettings, ConfigError> {
        let mut k = self.k;
        if k == 0 || k > 2 * MAX_K {
            return Err(ConfigError::InvalidK { k, max: 2 * MAX_K });
        }
        let mut kbig = k;
        if k > MAX_K {
            k = MAX_K;
        }

        check_distance("hdist", self.hdist, 3)?;
        check_distance("qhdist", self.qhdist, 3)?;
        check_distance("edist", self.edist, 2)?;
        let hdist2 = self.hdist2.unwrap_or(self.hdist);
        let qhdist2 = self.qhdist2.unwrap_or(self.qhdist);
        let edist2 = self.edist2.unwrap_or(self.edist);
        check_distance("hdist2", hdist2, 3)?;
        check_distance("qhdist2", qhdist2, 3)?;
        check_distance("edist2", edist2, 2)?;
        if self.sampling.speed > 15 {
            return Err(ConfigError::InvalidSpeed(self.sampling.speed));
        }
        if !(0.0..=1.0).contains(&self.min_len_fraction) {
            return Err(ConfigError::InvalidLengthFraction(self.min_len_fraction.to_string()));
        }
        if self.entropy.window == 0
            || self.entropy.window > MAX_ENTROPY_WINDOW
            || self.entropy.k == 0
            || self.entropy.k > 15
            || self.entropy.cutoff > 1.0
        {
            return Err(ConfigError::InvalidEntropy);
        }
        if let MaskStyle::Symbol(s) = self.mask_style {
            if !s.is_ascii_graphic() {
                return Err(ConfigError::InvalidMaskSymbol(s as char));
            }
        }

        let references = resolve_references(self.references, self.generic_refs, self.generic_mode);
        let trimming = !references.mask.is_empty()
            || !references.trim_right.is_empty()
            || !references.trim_left.is_empty();

        if trimming && kbig > k {
            warn!("k-mer trimming supports k <= {k}; k reduced from {kbig} to {k}");
            kbig = k;
        }
        if !self.sampling.no_accel() && kbig > k {
            warn!("speed>0 or qskip>1 supports k <= {k}; k reduced from {kbig} to {k}");
            kbig = k;
        }
        if (self.sampling.speed > 0 && self.sampling.qskip > 1)
            || (self.sampling.qskip > 1 && self.max_skip > 1)
            || (self.sampling.speed > 0 && self.max_skip > 1)
        {
            warn!("combining qskip, speed and reference skipping is not recommended");
        }

        let mut min_skip = self.min_skip.min(self.max_skip).max(1);
        let mut max_skip = self.max_skip.max(min_skip);
        let mut mask_middle = self.mask_middle;
        if kbig > k {
            min_skip = 0;
            max_skip = 0;
            if mask_middle {
                warn!("mask-middle disabled because k exceeds {k}");
                mask_middle = false;
            }
        }

        let mink = match self.mink {
            Some(m) if m > 0 => m.min(k),
            _ => 6.min(k),
        };
        let use_short_kmers =
            self.use_short_kmers || matches!(self.mink, Some(m) if m > 0 && m < k);
        if use_short_kmers && mask_middle {
            warn!("mask-middle disabled because short kmers are enabled");
            mask_middle = false;
        }
        if use_short_kmers && !trimming {
            return Err(ConfigError::ShortKmersWithoutTrim);
        }
        if self.find_best_match && !references.filter.is_empty() && kbig > k {
            return Err(ConfigError::BestMatchBigK);
        }

        let hdist = self.hdist.max(self.edist);
        let hdist2 = hdist2.max(edist2);
        let forbid_ns = self.forbid_ns || hdist < 1;

        let overlap = self.trim_by_overlap.then(|| {
            let base = if self.strict_overlap {
                OverlapSettings::strict()
            } else {
                OverlapSettings::loose()
            };
            OverlapSettings {
                use_quality: self.use_quality_for_overlap,
                ..base.with_minimums(self.min_overlap, self.min_insert)
            }
        });

        let entropy = (self.entropy.cutoff > 0.0).then_some(self.entropy);

        let num_tables = references.active_modes().len().max(1);
        let initial_size = self.initial_size.unwrap_or_else(|| {
            crate::index::initial_shard_size(self.memory_budget, WAYS, num_tables, self.prealloc)
        });

        Ok(DukSettings {
            k,
            kbig,
            mink,
            use_short_kmers,
            hdist,
            qhdist: self.qhdist,
            edist: self.edist,
            hdist2,
            qhdist2,
            edist2,
            mask_middle,
            middle_mask: middle_mask(k, mask_middle),
            rcomp: self.rcomp,
            forbid_ns,
            table: self.table,
            initial_size,
            growable: self.prealloc.is_none(),
            memory_budget: self.memory_budget,
            threads: self.threads,
            ordered: self.ordered,
            pair_policy: self.pair_policy,
            min_read_len: self.min_read_len,
            max_read_len: self.max_read_len,
            min_len_fraction: self.min_len_fraction,
            max_bad_kmers: self.max_bad_kmers,
            find_best_match: self.find_best_match,
            rename: self.rename,
            use_ref_names: self.use_ref_names,
            trim_pad: self.trim_pad,
            ktrim_exclusive: self.ktrim_exclusive,
            mask_style: self.mask_style,
            sampling: self.sampling,
            min_skip,
            max_skip,
            restrict_left: self.restrict_left,
            restrict_right: self.restrict_right,
            skip_r1: self.skip_r1,
            skip_r2: self.skip_r2,
            entropy,
            force_trim: self.force_trim,
            quality_trim: self.quality_trim,
            min_avg_quality: self.min_avg_quality,
            min_avg_quality_bases: self.min_avg_quality_bases,
            max_ns: self.max_ns,
            min_base_frequency: self.min_base_frequency,
            chastity_filter: self.chastity_filter,
            barcodes: self.barcodes,
            overlap,
            trim_pairs_evenly: self.trim_pairs_evenly,
            add_trimmed_to_bad: self.add_trimmed_to_bad,
            skip_reads: self.skip_reads,
            max_reads: self.max_reads,
            match_histogram: self.match_histogram,
            references,
        })
    }
}

fn check_distance(name: &'static str, value: usize, max: usize) -> Result<(), ConfigError> {
    if value > max {
        Err(ConfigError::InvalidDistance { name, value, max })
    } else {
        Ok(())
    }
}

fn resolve_references(
    mut refs: ModeReferences,
    generic: ReferenceSet,
    generic_mode: Option<MatchMode>,
) -> ModeReferences {
    if generic.is_empty() {
        return refs;
    }
    let slot = refs.get_mut(generic_mode.unwrap_or(MatchMode::Filter));
    slot.files.extend(generic.files);
    slot.literals.extend(generic.literals);
    refs
}

/// Resolved, immutable settings shared by every thread.
#[derive(Clone, Debug)]
pub struct DukSettings {
    pub k: usize,
    /// Emulated k-mer length; equals `k` when emulation is off.
    pub kbig: usize,
    pub mink: usize,
    pub use_short_kmers: bool,
    pub hdist: usize,
    pub qhdist: usize,
    pub edist: usize,
    pub hdist2: usize,
    pub qhdist2: usize,
    pub edist2: usize,
    pub mask_middle: bool,
    pub middle_mask: u64,
    pub rcomp: bool,
    pub forbid_ns: bool,
    pub table: TableKind,
    pub initial_size: usize,
    pub growable: bool,
    pub memory_budget: u64,
    pub threads: usize,
    pub ordered: bool,
    pub pair_policy: PairPolicy,
    pub min_read_len: usize,
    pub max_read_len: usize,
    pub min_len_fraction: f32,
    pub max_bad_kmers: usize,
    pub find_best_match: bool,
    pub rename: bool,
    pub use_ref_names: bool,
    pub trim_pad: usize,
    pub ktrim_exclusive: bool,
    pub mask_style: MaskStyle,
    pub sampling: Sampling,
    pub min_skip: usize,
    pub max_skip: usize,
    pub restrict_left: usize,
    pub restrict_right: usize,
    pub skip_r1: bool,
    pub skip_r2: bool,
    pub entropy: Option<EntropySettings>,
    pub force_trim: ForceTrim,
    pub quality_trim: QualityTrim,
    pub min_avg_quality: u8,
    pub min_avg_quality_bases: usize,
    pub max_ns: Option<usize>,
    pub min_base_frequency: f32,
    pub chastity_filter: bool,
    pub barcodes: BarcodeFilter,
    pub overlap: Option<OverlapSettings>,
    pub trim_pairs_evenly: bool,
    pub add_trimmed_to_bad: bool,
    pub skip_reads: u64,
    pub max_reads: Option<u64>,
    pub match_histogram: bool,
    pub references: ModeReferences,
}

impl DukSettings {
    /// Shortest read any k-mer stage inspects.
    pub fn min_scannable_len(&self) -> usize {
        if self.use_short_kmers {
            self.k.min(self.mink).max(1)
        } else {
            self.k.max(1)
        }
    }

    /// Minimum length for a read that started with `initial_len` bases.
    pub fn min_len_for(&self, initial_len: usize) -> usize {
        ((initial_len as f32 * self.min_len_fraction) as usize).max(self.min_read_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_filter_literal() -> DukConfig {
        DukConfig::default().generic_references(ReferenceSet::default().with_literal("ACGTACGTAC"))
    }

    #[test]
    fn defaults_resolve() {
        let s = with_filter_literal().threads(2).resolve().unwrap();
        assert_eq!(s.k, 27);
        assert_eq!(s.kbig, 27);
        assert!(s.mask_middle);
        assert!(s.forbid_ns);
        assert_eq!(s.references.filter.literals.len(), 1);
        assert!(s.entropy.is_none());
    }

    #[test]
    fn large_k_becomes_big_k_emulation() {
        let s = with_filter_literal().k(40).resolve().unwrap();
        assert_eq!((s.k, s.kbig), (31, 40));
        assert!(!s.mask_middle);
        assert_eq!((s.min_skip, s.max_skip), (0, 0));
    }

    #[test]
    fn sampling_forces_native_k() {
        let s = with_filter_literal().k(40).speed(4).resolve().unwrap();
        assert_eq!(s.kbig, s.k);
    }

    #[test]
    fn trimming_forces_native_k() {
        let s = DukConfig::default()
            .k(35)
            .mode_references(MatchMode::TrimRight, ReferenceSet::default().with_literal("ACGT"))
            .resolve()
            .unwrap();
        assert_eq!(s.kbig, 31);
    }

    #[test]
    fn short_kmers_need_trim_mode() {
        let err = with_filter_literal().mink(8).resolve().unwrap_err();
        assert_eq!(err, ConfigError::ShortKmersWithoutTrim);
    }

    #[test]
    fn short_kmers_disable_middle_mask() {
        let s = DukConfig::default()
            .k(23)
            .mink(11)
            .generic_mode(MatchMode::TrimRight)
            .generic_references(ReferenceSet::default().with_literal("ACGT"))
            .resolve()
            .unwrap();
        assert!(s.use_short_kmers);
        assert!(!s.mask_middle);
        assert_eq!(s.middle_mask, u64::MAX);
        assert!(s.references.filter.is_empty());
    }

    #[test]
    fn distances_are_range_checked() {
        let err = with_filter_literal().hdist(4).resolve().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDistance { name: "hdist", .. }));
        let err = with_filter_literal().edist(3).resolve().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDistance { name: "edist", .. }));
    }

    #[test]
    fn edit_distance_raises_hamming_budget() {
        let s = with_filter_literal().edist(2).resolve().unwrap();
        assert_eq!(s.hdist, 2);
        assert_eq!(s.hdist2, 2);
        assert!(!s.forbid_ns);
    }

    #[test]
    fn pair_policy_decisions() {
        assert!(PairPolicy::EitherBad.removes(false, Some(true)));
        assert!(!PairPolicy::BothBad.removes(false, Some(true)));
        assert!(PairPolicy::BothBad.removes(true, None));
        assert!(PairPolicy::BothBad.removes(true, Some(true)));
        assert!(!PairPolicy::EitherBad.removes(false, None));
    }

    #[test]
    fn entropy_cutoff_enables_filter() {
        let s = with_filter_literal()
            .entropy(EntropySettings {
                cutoff: 0.5,
                ..EntropySettings::default()
            })
            .resolve()
            .unwrap();
        assert_eq!(s.entropy.map(|e| e.window), Some(50));
    }

    #[test]
    fn entropy_window_is_bounded() {
        let window = |w| {
            with_filter_literal()
                .entropy(EntropySettings {
                    cutoff: 0.5,
                    window: w,
                    ..EntropySettings::default()
                })
                .resolve()
        };
        assert!(window(MAX_ENTROPY_WINDOW).is_ok());
        assert!(matches!(window(MAX_ENTROPY_WINDOW + 1), Err(ConfigError::InvalidEntropy)));
        assert!(matches!(window(0), Err(ConfigError::InvalidEntropy)));
    }
}
