//! Sliding-window Shannon entropy over short k-mers, used to drop low-complexity reads.
//!
//! A window holds `window` consecutive rolling k-mer codes. Adding or removing one code
//! updates the code counts and the count-of-counts histogram in O(1); a window's entropy
//! is then a sum over the (small) histogram. A read scores the mean over every window
//! position that lies fully inside the read. After a read the state is back to all-zero.

use std::collections::HashMap;

use crate::config::EntropySettings;
use crate::encode::MAP_LUT;

/// Rolling k-mer code at every base, including the partial codes of the first `k-1` bases.
/// Ambiguous bases count as `A`.
pub fn rolling_codes(bases: &[u8], k: usize) -> Vec<u32> {
    let mask: u32 = if k >= 16 { u32::MAX } else { !(u32::MAX << (2 * k)) };
    let mut code = 0u32;
    bases
        .iter()
        .map(|&b| {
            let v = MAP_LUT[b as usize];
            let v = if v > 3 { 0 } else { v as u32 };
            code = ((code << 2) | v) & mask;
            code
        })
        .collect()
}

/// Normalised entropy of a multiset of codes, computed directly.
pub fn entropy_from_scratch(codes: &[u32]) -> f64 {
    let n = codes.len();
    if n <= 1 {
        return 0.0;
    }
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &c in codes {
        *counts.entry(c).or_default() += 1;
    }
    let nf = n as f64;
    let sum: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / nf;
            p * p.ln()
        })
        .sum();
    sum * (-1.0 / nf.ln())
}

/// Incremental entropy state, one per processing thread.
pub struct EntropyTracker {
    k: usize,
    window: usize,
    mask: u32,
    plogp: Vec<f64>,
    mult: f64,
    counts: Vec<u16>,
    count_counts: Vec<i32>,
    distinct: usize,
    verify: bool,
}

impl EntropyTracker {
    pub fn new(settings: &EntropySettings) -> Self {
        let (k, window) = (settings.k, settings.window);
        let w = window as f64;
        let plogp = (0..window + 2)
            .map(|i| {
                if i == 0 {
                    0.0
                } else {
                    let p = i as f64 / w;
                    p * p.ln()
                }
            })
            .collect();
        let mut count_counts = vec![0i32; window + 2];
        count_counts[0] = window as i32;
        Self {
            k,
            window,
            mask: if k >= 16 { u32::MAX } else { !(u32::MAX << (2 * k)) },
            plogp,
            mult: if window > 1 { -1.0 / w.ln() } else { 0.0 },
            counts: vec![0; 1usize << (2 * k)],
            count_counts,
            distinct: 0,
            verify: settings.verify,
        }
    }

    #[inline]
    fn add(&mut self, code: u32) {
        let c = &mut self.counts[code as usize];
        if *c == 0 {
            self.distinct += 1;
        }
        self.count_counts[*c as usize] -= 1;
        *c += 1;
        self.count_counts[*c as usize] += 1;
    }

    #[inline]
    fn remove(&mut self, code: u32) {
        let c = &mut self.counts[code as usize];
        debug_assert!(*c > 0);
        self.count_counts[*c as usize] -= 1;
        *c -= 1;
        self.count_counts[*c as usize] += 1;
        if *c == 0 {
            self.distinct -= 1;
        }
    }

    #[inline]
    fn current(&self) -> f64 {
        let sum: f64 = self.count_counts[1..]
            .iter()
            .zip(&self.plogp[1..])
            .map(|(&cc, &e)| cc as f64 * e)
            .sum();
        sum * self.mult
    }

    /// Distinct codes currently inside the window.
    pub fn distinct(&self) -> usize {
        self.distinct
    }

    /// Call `f(end, entropy)` for every full window; `end` is the index of its last base.
    pub fn for_each_window<F: FnMut(usize, f64)>(&mut self, bases: &[u8], mut f: F) {
        let len = bases.len();
        let (w, mask) = (self.window, self.mask);
        let (mut code, mut code2) = (0u32, 0u32);
        let history = self.verify.then(|| rolling_codes(bases, self.k));

        // `i` feeds the window, `i2 = i - window` drains it.
        for i in 0..len + w {
            if i < len {
                let v = MAP_LUT[bases[i] as usize];
                code = ((code << 2) | if v > 3 { 0 } else { v as u32 }) & mask;
                self.add(code);
            }
            if i >= w {
                let v = MAP_LUT[bases[i - w] as usize];
                code2 = ((code2 << 2) | if v > 3 { 0 } else { v as u32 }) & mask;
                self.remove(code2);
            }
            if i + 1 >= w && i < len {
                let e = self.current();
                if let Some(h) = history.as_ref() {
                    let direct = entropy_from_scratch(&h[i + 1 - w..=i]);
                    debug_assert!((direct - e).abs() < 1e-9, "entropy drift at {i}");
                }
                f(i, e);
            }
        }
        debug_assert_eq!(self.distinct, 0);
        debug_assert_eq!(self.count_counts[0], self.window as i32);
    }

    /// Mean window entropy of a read. Reads shorter than the window hold no window and
    /// score zero.
    pub fn average_entropy(&mut self, bases: &[u8]) -> f64 {
        if bases.len() < self.window {
            return 0.0;
        }
        let (mut sum, mut n) = (0.0f64, 0usize);
        self.for_each_window(bases, |_, e| {
            sum += e;
            n += 1;
        });
        sum / n.max(1) as f64
    }

    /// Whether a read reaches `cutoff`.
    pub fn passes(&mut self, bases: &[u8], cutoff: f32) -> bool {
        self.average_entropy(bases) >= cutoff as f64
    }
}
