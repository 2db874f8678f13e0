//! Insert-size estimation from mate overlap, used to trim adapter read-through.

use crate::config::OverlapSettings;
use crate::read::{Read, phred_to_prob};

/// Result of an overlap search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverlapEstimate {
    /// Best insert size, when one was found.
    pub insert: Option<usize>,
    /// Another insert size scored nearly as well.
    pub ambiguous: bool,
    /// Mismatches in the best overlap.
    pub mismatches: usize,
}

/// Estimates the insert size of a pair. `mate_rc` is already reverse-complemented, so both
/// reads run in the same direction.
pub trait InsertEstimator: Send + Sync {
    fn estimate(&self, first: &Read, mate_rc: &Read) -> OverlapEstimate;
}

/// Chooses the insert whose overlap has the lowest mismatch ratio.
#[derive(Clone, Copy, Debug)]
pub struct MismatchRatioEstimator {
    settings: OverlapSettings,
}

impl MismatchRatioEstimator {
    pub fn new(settings: OverlapSettings) -> Self {
        Self { settings }
    }
}

/// Overlap span `[a, b)` of the first read for a given insert size.
#[inline]
fn overlap_span(insert: usize, len1: usize, len2: usize) -> (usize, usize) {
    (insert.saturating_sub(len2), insert.min(len1))
}

fn mismatches(first: &Read, mate_rc: &Read, insert: usize) -> (usize, usize) {
    let (len1, len2) = (first.len(), mate_rc.len());
    let (a, b) = overlap_span(insert, len1, len2);
    let offset = len2 as isize - insert as isize;
    let mut bad = 0;
    let mut compared = 0;
    for i in a..b {
        let j = (i as isize + offset) as usize;
        let (x, y) = (first.bases[i], mate_rc.bases[j]);
        if x == b'N' || y == b'N' {
            continue;
        }
        compared += 1;
        if !x.eq_ignore_ascii_case(&y) {
            bad += 1;
        }
    }
    (bad, compared)
}

impl InsertEstimator for MismatchRatioEstimator {
    fn estimate(&self, first: &Read, mate_rc: &Read) -> OverlapEstimate {
        let s = &self.settings;
        let (len1, len2) = (first.len(), mate_rc.len());
        if len1 == 0 || len2 == 0 || len1 + len2 < s.min_overlap0 {
            return OverlapEstimate::default();
        }
        let lo = s.min_insert0.max(1);
        let hi = len1 + len2 - s.min_overlap0;

        let mut best: Option<(f32, usize, usize, usize)> = None;
        let mut second = f32::MAX;
        for insert in lo..=hi {
            let (bad, overlap) = mismatches(first, mate_rc, insert);
            if overlap < s.min_overlap0 {
                continue;
            }
            let ratio = (bad as f32 + s.ratio_offset) / overlap as f32;
            match best {
                Some((r, ..)) if ratio >= r => second = second.min(ratio),
                _ => {
                    if let Some((r, ..)) = best {
                        second = second.min(r);
                    }
                    best = Some((ratio, insert, bad, overlap));
                }
            }
        }

        match best {
            Some((ratio, insert, bad, overlap))
                if ratio <= s.max_ratio && overlap >= s.min_overlap =>
            {
                OverlapEstimate {
                    insert: Some(insert),
                    ambiguous: second < ratio * s.ratio_margin,
                    mismatches: bad,
                }
            }
            _ => OverlapEstimate::default(),
        }
    }
}

/// Expected number of mismatches in the overlap implied by `insert`.
pub fn expected_mismatches(first: &Read, mate_rc: &Read, insert: usize) -> f32 {
    let (Some(q1), Some(q2)) = (&first.quality, &mate_rc.quality) else {
        return 0.0;
    };
    let (a, b) = overlap_span(insert, q1.len(), q2.len());
    let offset = q2.len() as isize - insert as isize;
    (a..b)
        .map(|i| {
            let j = (i as isize + offset) as usize;
            let (p1, p2) = (phred_to_prob(q1[i]), phred_to_prob(q2[j]));
            (p1 + p2 - p1 * p2 * 4.0 / 3.0) as f32
        })
        .sum()
}

/// Poisson probability of seeing at least `observed` mismatches given `expected`.
pub fn mismatch_probability(expected: f32, observed: usize) -> f32 {
    let lambda = expected.max(1e-6) as f64;
    let mut term = (-lambda).exp();
    let mut below = 0.0f64;
    for k in 0..observed {
        below += term;
        term *= lambda / (k + 1) as f64;
    }
    (1.0 - below).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlapSettings;

    fn settings() -> OverlapSettings {
        OverlapSettings {
            min_insert0: 10,
            min_insert: 10,
            ..OverlapSettings::strict()
        }
    }

    #[test]
    fn finds_short_insert_with_adapter_read_through() {
        // Insert of 30 bases; both reads run 10 bases into adapter.
        let insert = b"ACGTTGCATGCAAGTCCGATTGACCTAGGA";
        let mut r1 = insert.to_vec();
        r1.extend_from_slice(b"AGATCGGAAG");
        let mut r2rc = b"TTCCGATCTA".to_vec();
        r2rc.extend_from_slice(insert);
        let first = Read::new("a", r1, None);
        let mate = Read::new("b", r2rc, None);
        let est = MismatchRatioEstimator::new(settings()).estimate(&first, &mate);
        assert_eq!(est.insert, Some(30));
        assert!(!est.ambiguous);
        assert_eq!(est.mismatches, 0);
    }

    #[test]
    fn unrelated_reads_yield_nothing() {
        let first = Read::new("a", b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_vec(), None);
        let mate = Read::new("b", b"CGCGCGCGCGCGCGCGCGCGCGCGCGCGCG".to_vec(), None);
        let est = MismatchRatioEstimator::new(settings()).estimate(&first, &mate);
        assert_eq!(est.insert, None);
    }

    #[test]
    fn probability_falls_with_more_mismatches() {
        let p1 = mismatch_probability(0.5, 1);
        let p3 = mismatch_probability(0.5, 3);
        assert!(p1 > p3);
        assert_eq!(mismatch_probability(0.5, 0), 1.0);
    }
}
