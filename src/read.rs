//! Read model and read-level primitives (trimming to a span, quality summaries, filters
//! on identifiers).
//!
//! Qualities are stored as numeric phred scores; the ASCII offset is applied at I/O.

use crate::encode::reverse_complement_in_place;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Read {
    pub id: String,
    pub numeric_id: u64,
    pub bases: Vec<u8>,
    pub quality: Option<Vec<u8>>,
    /// 0 for the primary read, 1 for the mate.
    pub pairnum: u8,
    discarded: bool,
}

impl Read {
    pub fn new(id: impl Into<String>, bases: impl Into<Vec<u8>>, quality: Option<Vec<u8>>) -> Self {
        let bases = bases.into();
        debug_assert!(quality.as_ref().is_none_or(|q| q.len() == bases.len()));
        Self {
            id: id.into(),
            bases,
            quality,
            ..Self::default()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    #[inline]
    pub fn discarded(&self) -> bool {
        self.discarded
    }

    #[inline]
    pub fn set_discarded(&mut self, yes: bool) {
        self.discarded = yes;
    }

    /// Keep bases `start..=stop` and return how many were removed.
    ///
    /// When fewer than `min_len` bases would remain, the read becomes `min_len` `N`s of
    /// quality 0 so downstream consumers never see an empty record.
    pub fn trim_to_position(&mut self, start: usize, stop: isize, min_len: usize) -> usize {
        let len = self.len();
        if len == 0 {
            return 0;
        }
        let stop = stop.min(len as isize - 1);
        let kept = if stop < start as isize { 0 } else { stop as usize - start + 1 };
        if kept == len {
            return 0;
        }
        if kept < min_len {
            let n = min_len.min(len);
            self.bases.clear();
            self.bases.resize(n, b'N');
            if let Some(q) = self.quality.as_mut() {
                q.clear();
                q.resize(n, 0);
            }
            return len - n;
        }
        let stop = stop as usize;
        self.bases.truncate(stop + 1);
        self.bases.drain(..start);
        if let Some(q) = self.quality.as_mut() {
            q.truncate(stop + 1);
            q.drain(..start);
        }
        len - kept
    }

    pub fn reverse_complement(&mut self) {
        reverse_complement_in_place(&mut self.bases);
        if let Some(q) = self.quality.as_mut() {
            q.reverse();
        }
    }

    /// Mean phred over the first `max_bases` bases (all when 0), computed from error
    /// probabilities.
    pub fn avg_quality(&self, max_bases: usize) -> Option<u8> {
        let q = self.quality.as_ref()?;
        let n = if max_bases == 0 { q.len() } else { q.len().min(max_bases) };
        if n == 0 {
            return Some(0);
        }
        let sum: f64 = q[..n].iter().map(|&p| phred_to_prob(p)).sum();
        let mean = sum / n as f64;
        Some(prob_to_phred(mean))
    }

    /// Sum of per-base error probabilities; 0 without qualities.
    pub fn expected_errors(&self) -> f32 {
        match &self.quality {
            Some(q) => q.iter().map(|&p| phred_to_prob(p) as f32).sum(),
            None => 0.0,
        }
    }

    /// Bases that are not A, C, G or T.
    pub fn count_undefined(&self) -> usize {
        self.bases
            .iter()
            .filter(|b| crate::encode::map_base(**b).is_none())
            .count()
    }

    /// Count of the rarest of A, C, G and T.
    pub fn min_base_count(&self) -> usize {
        let mut counts = [0usize; 4];
        for &b in &self.bases {
            if let Some(v) = crate::encode::map_base(b) {
                counts[v as usize] += 1;
            }
        }
        counts.into_iter().min().unwrap_or(0)
    }

    /// Illumina chastity flag `N:Y:` in the second identifier field.
    pub fn fails_chastity(&self) -> bool {
        let Some(space) = self.id.find(' ') else {
            return false;
        };
        let comment = &self.id[space + 1..];
        let mut parts = comment.split(':');
        let _pair = parts.next();
        matches!(parts.next(), Some("Y"))
    }

    /// Barcode after the last `:` of the identifier comment.
    pub fn barcode(&self) -> Option<&str> {
        let space = self.id.find(' ')?;
        let comment = &self.id[space + 1..];
        let idx = comment.rfind(':')?;
        let code = &comment[idx + 1..];
        (!code.is_empty()).then_some(code)
    }
}

#[inline]
pub fn phred_to_prob(q: u8) -> f64 {
    10f64.powf(-(q as f64) / 10.0)
}

#[inline]
pub fn prob_to_phred(p: f64) -> u8 {
    if p <= 0.0 {
        return 60;
    }
    (-10.0 * p.log10()).round().clamp(0.0, 60.0) as u8
}

/// A primary read and its optional mate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadPair {
    pub first: Read,
    pub mate: Option<Read>,
}

impl ReadPair {
    pub fn single(first: Read) -> Self {
        Self { first, mate: None }
    }

    pub fn paired(first: Read, mut mate: Read) -> Self {
        mate.pairnum = 1;
        Self {
            first,
            mate: Some(mate),
        }
    }

    pub fn read_count(&self) -> u64 {
        1 + self.mate.is_some() as u64
    }

    pub fn base_count(&self) -> u64 {
        (self.first.len() + self.mate.as_ref().map_or(0, Read::len)) as u64
    }

    pub fn mate_discarded(&self) -> Option<bool> {
        self.mate.as_ref().map(Read::discarded)
    }

    /// Flag both reads.
    pub fn discard_all(&mut self) {
        self.first.set_discarded(true);
        if let Some(m) = self.mate.as_mut() {
            m.set_discarded(true);
        }
    }

    /// Mutable access to each present read.
    pub fn reads_mut(&mut self) -> impl Iterator<Item = &mut Read> {
        std::iter::once(&mut self.first).chain(self.mate.as_mut())
    }

    pub fn reads(&self) -> impl Iterator<Item = &Read> {
        std::iter::once(&self.first).chain(self.mate.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_keeps_inclusive_span() {
        let mut r = Read::new("r", b"ACGTACGT".to_vec(), Some(vec![30; 8]));
        assert_eq!(r.trim_to_position(2, 5, 1), 4);
        assert_eq!(r.bases, b"GTAC");
        assert_eq!(r.quality.as_deref(), Some(&[30u8; 4][..]));
    }

    #[test]
    fn trim_everything_leaves_placeholder() {
        let mut r = Read::new("r", b"ACGT".to_vec(), Some(vec![30; 4]));
        assert_eq!(r.trim_to_position(0, -1, 1), 3);
        assert_eq!(r.bases, b"N");
        assert_eq!(r.quality.as_deref(), Some(&[0u8][..]));
    }

    #[test]
    fn untouched_span_reports_zero() {
        let mut r = Read::new("r", b"ACGT".to_vec(), None);
        assert_eq!(r.trim_to_position(0, 10, 1), 0);
        assert_eq!(r.bases, b"ACGT");
    }

    #[test]
    fn reverse_complement_flips_quality() {
        let mut r = Read::new("r", b"AACG".to_vec(), Some(vec![1, 2, 3, 4]));
        r.reverse_complement();
        assert_eq!(r.bases, b"CGTT");
        assert_eq!(r.quality, Some(vec![4, 3, 2, 1]));
    }

    #[test]
    fn identifier_filters() {
        let r = Read::new("M1:1:FC:1:1:1:1 1:Y:0:ACGTAC", b"A".to_vec(), None);
        assert!(r.fails_chastity());
        assert_eq!(r.barcode(), Some("ACGTAC"));
        let ok = Read::new("M1:1:FC:1:1:1:1 1:N:0:ACGTAC", b"A".to_vec(), None);
        assert!(!ok.fails_chastity());
    }

    #[test]
    fn base_composition() {
        let r = Read::new("r", b"AACCGGTNN".to_vec(), None);
        assert_eq!(r.count_undefined(), 2);
        assert_eq!(r.min_base_count(), 1);
        assert_eq!(prob_to_phred(phred_to_prob(20)), 20);
    }
}
