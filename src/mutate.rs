//! Mutation expansion over packed k-mers.
//!
//! Load time stores every variant within a distance budget ([`expand`]); query time searches
//! substitution variants until the first hit ([`find_variant`]). Both are plain recursions whose
//! only side effects happen in the caller's closure.

use crate::encode::revcomp;

/// Clears base `i` (counted from the right).
#[inline]
pub const fn clear_mask(i: usize) -> u64 {
    !(3u64 << (2 * i))
}

/// Base value `j` placed at position `i`.
#[inline]
pub const fn set_mask(j: u64, i: usize) -> u64 {
    j << (2 * i)
}

/// Bases at positions `i` and above.
#[inline]
pub const fn left_mask(i: usize) -> u64 {
    if i >= 32 { 0 } else { u64::MAX << (2 * i) }
}

/// Bases below position `i`.
#[inline]
pub const fn right_mask(i: usize) -> u64 {
    !left_mask(i)
}

/// Visit `fwd` and every variant reachable within `budget` edits, summing what `visit`
/// returns (typically 1 when a new key was stored).
///
/// Substitutions are always explored. With `edits`, deletions (the freed slot is refilled
/// with `extra_base`, the base following the k-mer in the reference, when there is one)
/// and insertions (each of the four bases; the displaced last base becomes the extra base
/// below) are explored as well. Variants equal to their parent are skipped.
pub fn expand<F>(
    fwd: u64,
    rev: u64,
    len: usize,
    budget: usize,
    extra_base: Option<u64>,
    edits: bool,
    visit: &mut F,
) -> u64
where
    F: FnMut(u64, u64) -> u64,
{
    let mut added = visit(fwd, rev);
    if budget == 0 {
        return added;
    }
    let next = budget - 1;

    for j in 0..4u64 {
        for i in 0..len {
            let temp = (fwd & clear_mask(i)) | set_mask(j, i);
            if temp != fwd {
                added += expand(temp, revcomp(temp, len), len, next, extra_base, edits, visit);
            }
        }
    }

    if edits {
        if let Some(eb) = extra_base {
            debug_assert!(eb <= 3);
            for i in 1..len {
                let temp = (fwd & left_mask(i)) | ((fwd << 2) & right_mask(i)) | eb;
                if temp != fwd {
                    added += expand(temp, revcomp(temp, len), len, next, None, edits, visit);
                }
            }
        }

        let dropped = fwd & 3;
        for i in 1..len {
            let temp0 = (fwd & left_mask(i)) | ((fwd & right_mask(i)) >> 2);
            for j in 0..4u64 {
                let temp = temp0 | set_mask(j, i - 1);
                if temp != fwd {
                    added += expand(temp, revcomp(temp, len), len, next, Some(dropped), edits, visit);
                }
            }
        }
    }
    added
}

/// Look up `fwd`, then its substitution variants within `budget`, returning the first id
/// found.
pub fn find_variant<F>(fwd: u64, rev: u64, len: usize, budget: usize, lookup: &mut F) -> Option<u32>
where
    F: FnMut(u64, u64) -> Option<u32>,
{
    if let Some(id) = lookup(fwd, rev) {
        return Some(id);
    }
    if budget == 0 {
        return None;
    }
    for j in 0..4u64 {
        for i in 0..len {
            let temp = (fwd & clear_mask(i)) | set_mask(j, i);
            if temp != fwd {
                if let Some(id) = find_variant(temp, revcomp(temp, len), len, budget - 1, lookup) {
                    return Some(id);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{decode_kmer, encode_kmer};
    use std::collections::HashSet;

    fn collect(kmer: &[u8], budget: usize, extra: Option<u8>, edits: bool) -> HashSet<String> {
        let len = kmer.len();
        let fwd = encode_kmer(kmer).unwrap();
        let extra = extra.map(|b| encode_kmer(&[b]).unwrap());
        let mut seen = HashSet::new();
        expand(fwd, revcomp(fwd, len), len, budget, extra, edits, &mut |f, _| {
            seen.insert(decode_kmer(f, len));
            1
        });
        seen
    }

    #[test]
    fn single_substitutions_are_all_visited() {
        let seen = collect(b"ACGT", 1, None, false);
        // original + 4 positions * 3 alternatives
        assert_eq!(seen.len(), 13);
        assert!(seen.contains("ACGT"));
        assert!(seen.contains("TCGT"));
        assert!(seen.contains("ACGA"));
    }

    #[test]
    fn deletion_pulls_in_the_next_reference_base() {
        // Reference ...ACGTT|G...: deleting C gives AGTTG.
        let seen = collect(b"ACGTT", 1, Some(b'G'), true);
        assert!(seen.contains("AGTTG"));
    }

    #[test]
    fn insertion_drops_the_last_base() {
        // Inserting T after the first base of ACGTA gives ATCGT.
        let seen = collect(b"ACGTA", 1, None, true);
        assert!(seen.contains("ATCGT"));
        assert!(!collect(b"ACGTA", 1, None, false).contains("ATCGT"));
    }

    #[test]
    fn visitor_counts_are_summed() {
        let fwd = encode_kmer(b"AAA").unwrap();
        let total = expand(fwd, revcomp(fwd, 3), 3, 1, None, false, &mut |_, _| 1);
        assert_eq!(total, 1 + 9);
    }

    #[test]
    fn variant_search_finds_one_mismatch_and_stops() {
        let target = encode_kmer(b"ACCT").unwrap();
        let query = encode_kmer(b"ACGT").unwrap();
        let mut calls = 0;
        let found = find_variant(query, revcomp(query, 4), 4, 1, &mut |f, _| {
            calls += 1;
            (f == target).then_some(7)
        });
        assert_eq!(found, Some(7));
        assert!(calls <= 13);
        assert_eq!(find_variant(query, 0, 4, 0, &mut |f, _| (f == target).then_some(7)), None);
    }
}
