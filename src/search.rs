//! Ordered search over a consolidated base node's sorted key array.
//!
//! Provides two implementations of the same lower-bound search — the
//! smallest index `i` such that `array[i] >= target`, or `array.len()` if
//! no such index exists — that must agree on every input (P8). The scalar
//! routine is a classical binary search; the vectorized routine narrows
//! the search window W keys at a time using a SIMD compare-and-count
//! before handing the residual window to the same scalar finish.

/// SIMD vector width this module narrows by, in number of `i64` keys.
pub const VECTOR_WIDTH: usize = 4;

/// Lower-bound binary search: the smallest index `i` with `array[i] >=
/// target`, or `array.len()` if none.
#[must_use]
pub fn lower_bound_scalar(array: &[i64], target: i64) -> usize {
    let mut lo = 0usize;
    let mut hi = array.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if array[mid] < target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Same contract as [`lower_bound_scalar`], narrowing the window
/// `VECTOR_WIDTH` keys at a time with a SIMD compare-and-count where the
/// target platform and runtime CPU support it, falling back to an
/// equivalent scalar count otherwise. Always agrees with
/// [`lower_bound_scalar`] (P8) — the narrowing step only ever shrinks
/// `[lo, hi)` to a provably equivalent sub-window before falling through
/// to the same scalar finish.
#[must_use]
pub fn lower_bound_vectorized(array: &[i64], target: i64) -> usize {
    let mut lo = 0usize;
    let mut hi = array.len();

    while hi - lo >= VECTOR_WIDTH {
        // Centre a W-wide window near the midpoint, aligned down to a
        // W-multiple offset from `lo` and clamped so the load stays
        // in range.
        let mid = lo + (hi - lo) / 2;
        let window_start = {
            let raw = mid.saturating_sub(VECTOR_WIDTH / 2).max(lo);
            let aligned = lo + ((raw - lo) / VECTOR_WIDTH) * VECTOR_WIDTH;
            aligned.min(hi - VECTOR_WIDTH)
        };

        let window: [i64; VECTOR_WIDTH] = array[window_start..window_start + VECTOR_WIDTH]
            .try_into()
            .expect("slice has exactly VECTOR_WIDTH elements");
        let less_count = count_less_than(&window, target);

        if less_count == VECTOR_WIDTH {
            lo = window_start + VECTOR_WIDTH;
        } else if less_count == 0 {
            hi = window_start;
        } else {
            // Target lies within this W-slice; narrow to it and finish
            // scalar.
            lo = window_start;
            hi = window_start + VECTOR_WIDTH;
            break;
        }
    }

    lo + lower_bound_scalar(&array[lo..hi], target)
}

/// Count how many of `window`'s keys are strictly less than `target`.
///
/// Dispatches to an AVX2 implementation when the target is x86_64 and the
/// running CPU supports it; otherwise computes the identical count with a
/// plain scalar loop.
#[must_use]
fn count_less_than(window: &[i64; VECTOR_WIDTH], target: i64) -> usize {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            // SAFETY: guarded by the runtime feature check above.
            return unsafe { count_less_than_avx2(window, target) };
        }
    }
    count_less_than_scalar(window, target)
}

fn count_less_than_scalar(window: &[i64; VECTOR_WIDTH], target: i64) -> usize {
    window.iter().filter(|&&k| k < target).count()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn count_less_than_avx2(window: &[i64; VECTOR_WIDTH], target: i64) -> usize {
    use std::arch::x86_64::{
        _mm256_castsi256_pd, _mm256_cmpgt_epi64, _mm256_loadu_si256, _mm256_movemask_pd,
        _mm256_set1_epi64x,
    };

    let vals = _mm256_loadu_si256(window.as_ptr().cast());
    let targets = _mm256_set1_epi64x(target);
    // `window[i] < target` iff `target > window[i]`.
    let gt_mask = _mm256_cmpgt_epi64(targets, vals);
    let bits = _mm256_movemask_pd(_mm256_castsi256_pd(gt_mask));
    bits.count_ones() as usize
}

/// Whether `target` is present in `array`, using the vectorized search.
#[must_use]
pub fn find_key(array: &[i64], target: i64) -> bool {
    let idx = lower_bound_vectorized(array, target);
    idx < array.len() && array[idx] == target
}
