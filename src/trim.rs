//! Position- and quality-based trimming.

use crate::config::{ForceTrim, QualityTrim};
use crate::read::Read;

/// Apply fixed-position trimming; returns bases removed.
pub fn force_trim(read: &mut Read, ft: &ForceTrim) -> usize {
    let len = read.len();
    if len == 0 || !ft.is_active() {
        return 0;
    }
    let len_i = len as isize;
    let a = ft.left;
    let b0 = if ft.modulo > 0 {
        len_i - 1 - (len % ft.modulo) as isize
    } else {
        len_i
    };
    let b1 = ft.right.map_or(len_i, |r| r as isize);
    let b2 = if ft.right2 > 0 {
        len_i - 1 - ft.right2 as isize
    } else {
        len_i
    };
    read.trim_to_position(a, b0.min(b1).min(b2), 1)
}

/// Trim low-quality ends; returns bases removed.
///
/// Each end is scanned with a running score of `trimq - q` (Mott's method): the end is
/// cut after the position where the cumulative sum of bad evidence peaks.
pub fn quality_trim(read: &mut Read, qt: &QualityTrim) -> usize {
    if !qt.is_active() || read.is_empty() {
        return 0;
    }
    let Some(q) = read.quality.as_ref() else {
        return 0;
    };
    let len = q.len();
    let threshold = qt.trimq as i32;

    let mut left = 0usize;
    if qt.left {
        let (mut sum, mut best, mut cut) = (0i32, 0i32, 0usize);
        for (i, &p) in q.iter().enumerate() {
            sum += threshold - p as i32;
            if sum < 0 {
                break;
            }
            if sum > best {
                best = sum;
                cut = i + 1;
            }
        }
        left = cut;
    }

    let mut right = len;
    if qt.right {
        let (mut sum, mut best, mut cut) = (0i32, 0i32, len);
        for i in (left..len).rev() {
            sum += threshold - q[i] as i32;
            if sum < 0 {
                break;
            }
            if sum > best {
                best = sum;
                cut = i;
            }
        }
        right = cut;
    }

    if left == 0 && right == len {
        return 0;
    }
    read.trim_to_position(left, right as isize - 1, 1)
}
