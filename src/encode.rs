//! K-mer encoding: 2-bit mapping, rolling forward/reverse-complement codes, key masks.
//!
//! Conventions
//! - Packed k-mers are **LSB-aligned**: the last base sits in the lowest two bits.
//! - A lookup key carries a length bit at `2*len` so keys of different lengths never
//!   collide, and is therefore never zero.
//! - With middle masking the two bits of base `k/2` (from the right) are cleared.

/// 2-bit code → uppercase base.
pub const NUMBER_TO_BASE: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// ASCII → 2-bit code (A=0, C=1, G=2, T/U=3, either case); 0xFF for anything else.
pub static MAP_LUT: [u8; 256] = {
    let mut t = [0xFF; 256];
    let mut code = 0;
    while code < 4 {
        let upper = NUMBER_TO_BASE[code];
        t[upper as usize] = code as u8;
        t[upper.to_ascii_lowercase() as usize] = code as u8;
        code += 1;
    }
    t[b'U' as usize] = 3;
    t[b'u' as usize] = 3;
    t
};

/// Longest k-mer a single `u64` key can hold next to its length bit.
pub const MAX_K: usize = 31;

#[inline]
pub fn map_base(b: u8) -> Option<u8> {
    Some(MAP_LUT[b as usize]).filter(|&v| v <= 3)
}

/// Pack up to 32 bases, last base lowest. `None` when empty, too long or ambiguous.
#[inline]
pub fn encode_kmer(window: &[u8]) -> Option<u64> {
    if window.is_empty() || window.len() > 32 {
        return None;
    }
    window
        .iter()
        .try_fold(0u64, |code, &b| map_base(b).map(|v| (code << 2) | u64::from(v)))
}

/// Decode an LSB-aligned code of length `k` back into uppercase bases.
pub fn decode_kmer(code: u64, k: usize) -> String {
    (0..k)
        .rev()
        .map(|i| NUMBER_TO_BASE[((code >> (2 * i)) & 0b11) as usize] as char)
        .collect()
}

/// Reverse complement of a packed `k`-mer: complement every base, reverse the order of
/// the 2-bit groups across the word, then drop the unused high groups.
#[inline]
pub fn revcomp(code: u64, k: usize) -> u64 {
    debug_assert!(k <= 32);
    if k == 0 {
        return 0;
    }
    let mut x = !code;
    x = ((x >> 2) & 0x3333_3333_3333_3333) | ((x & 0x3333_3333_3333_3333) << 2);
    x = ((x >> 4) & 0x0F0F_0F0F_0F0F_0F0F) | ((x & 0x0F0F_0F0F_0F0F_0F0F) << 4);
    x.swap_bytes() >> (64 - 2 * k)
}

/// Complement one ASCII base, keeping case. Non-ACGT symbols map to themselves.
#[inline]
pub fn complement_base(b: u8) -> u8 {
    match b {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'a' => b't',
        b't' | b'u' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        other => other,
    }
}

/// Reverse-complement an ASCII base slice in place.
pub fn reverse_complement_in_place(bases: &mut [u8]) {
    bases.reverse();
    for b in bases.iter_mut() {
        *b = complement_base(*b);
    }
}

/// Bits covering `len` packed bases.
#[inline]
pub const fn kmer_mask(len: usize) -> u64 {
    if len >= 32 { u64::MAX } else { !(u64::MAX << (2 * len)) }
}

/// Length marker OR-ed into every key of length `len`.
#[inline]
pub const fn length_mask(len: usize) -> u64 {
    1u64 << (2 * len)
}

/// Mask clearing the middle base of a `k`-mer, or all-ones when disabled.
#[inline]
pub const fn middle_mask(k: usize, enabled: bool) -> u64 {
    if enabled { !(3u64 << (2 * (k / 2))) } else { u64::MAX }
}

/// Turns packed forward/reverse codes into lookup keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyBuilder {
    rcomp: bool,
    middle_mask: u64,
}

impl KeyBuilder {
    pub fn new(k: usize, rcomp: bool, mask_middle: bool) -> Self {
        Self {
            rcomp,
            middle_mask: middle_mask(k, mask_middle),
        }
    }

    /// Canonical key of a k-mer of length `len`.
    #[inline]
    pub fn key(&self, fwd: u64, rev: u64, len: usize) -> u64 {
        let v = if self.rcomp { fwd.max(rev) } else { fwd };
        (v & self.middle_mask) | length_mask(len)
    }

    pub fn rcomp(&self) -> bool {
        self.rcomp
    }
}

/// O(1) rolling forward and reverse-complement encoding of a base stream.
///
/// `push` returns `true` once at least `k` consecutive valid bases were seen.
/// Ambiguous bases either reset the run (when forbidden) or encode as `A`.
#[derive(Clone, Debug)]
pub struct RollingKmer {
    k: usize,
    shift: usize,
    mask: u64,
    fwd: u64,
    rev: u64,
    valid: usize,
    forbid_ambiguous: bool,
}

impl RollingKmer {
    pub fn new(k: usize, forbid_ambiguous: bool) -> Self {
        debug_assert!(k >= 1 && k <= 32);
        Self {
            k,
            shift: 2 * (k - 1),
            mask: kmer_mask(k),
            fwd: 0,
            rev: 0,
            valid: 0,
            forbid_ambiguous,
        }
    }

    #[inline]
    pub fn push(&mut self, b: u8) -> bool {
        let (x, ambiguous) = match map_base(b) {
            Some(v) => (v as u64, false),
            None => (0, true),
        };
        self.fwd = ((self.fwd << 2) | x) & self.mask;
        self.rev = (self.rev >> 2) | ((x ^ 0b11) << self.shift);
        if ambiguous && self.forbid_ambiguous {
            self.valid = 0;
        } else {
            self.valid += 1;
        }
        self.valid >= self.k
    }

    #[inline]
    pub fn forward(&self) -> u64 {
        self.fwd
    }

    #[inline]
    pub fn reverse(&self) -> u64 {
        self.rev
    }

    /// Length of the current run of valid bases.
    #[inline]
    pub fn valid_len(&self) -> usize {
        self.valid
    }

    pub fn reset(&mut self) {
        self.fwd = 0;
        self.rev = 0;
        self.valid = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_matches_direct_encoding() {
        let seq = b"ACGTTGCAAC";
        let k = 4;
        let mut roll = RollingKmer::new(k, true);
        for (i, &b) in seq.iter().enumerate() {
            if roll.push(b) {
                let window = &seq[i + 1 - k..=i];
                let fwd = encode_kmer(window).unwrap();
                assert_eq!(roll.forward(), fwd);
                assert_eq!(roll.reverse(), revcomp(fwd, k));
            }
        }
    }

    #[test]
    fn forbidden_ambiguity_resets_run() {
        let mut roll = RollingKmer::new(3, true);
        for &b in b"ACN" {
            roll.push(b);
        }
        assert_eq!(roll.valid_len(), 0);
        assert!(!roll.push(b'A'));

        let mut lax = RollingKmer::new(3, false);
        for &b in b"ACN" {
            lax.push(b);
        }
        assert_eq!(lax.valid_len(), 3);
        assert_eq!(lax.forward(), encode_kmer(b"ACA").unwrap());
    }

    #[test]
    fn keys_of_different_lengths_differ() {
        let kb = KeyBuilder::new(4, true, false);
        let a = kb.key(0, 0, 3);
        let b = kb.key(0, 0, 4);
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }

    #[test]
    fn middle_mask_clears_center_base() {
        let kb = KeyBuilder::new(5, false, true);
        let x = encode_kmer(b"ACATG").unwrap();
        let y = encode_kmer(b"ACGTG").unwrap();
        assert_eq!(kb.key(x, 0, 5), kb.key(y, 0, 5));
    }

    #[test]
    fn decode_round_trips_text() {
        let code = encode_kmer(b"GATTACA").unwrap();
        assert_eq!(decode_kmer(code, 7), "GATTACA");
    }

    #[test]
    fn revcomp_matches_text_reverse_complement() {
        let mut long = b"ACGTTGCAAGTCCGATTGACCTAGGATCCAGT".to_vec();
        assert_eq!(long.len(), 32);
        for text in [&b"A"[..], b"AACG", b"GATTACA", long.as_slice()] {
            let mut rc = text.to_vec();
            reverse_complement_in_place(&mut rc);
            let code = encode_kmer(text).unwrap();
            assert_eq!(revcomp(code, text.len()), encode_kmer(&rc).unwrap());
        }
        long.truncate(31);
        let code = encode_kmer(&long).unwrap();
        assert_eq!(revcomp(revcomp(code, 31), 31), code);
        assert_eq!(revcomp(0, 0), 0);
    }

    #[test]
    fn lowercase_and_uracil_map_like_uppercase() {
        assert_eq!(encode_kmer(b"acgu"), encode_kmer(b"ACGT"));
        assert_eq!(map_base(b'N'), None);
    }
}
