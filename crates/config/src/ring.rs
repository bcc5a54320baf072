//! Weighted selection rings.
//!
//! A weight list `[w_0, .., w_n]` expands at build time into a ring of
//! indices that the data plane consults with `ring[hash % len]`. The
//! ring is canonical: weights are first reduced by their gcd, so over
//! one full rotation of length `sum(w_i / g)` entry `i` appears
//! exactly `w_i / g` times. Entries with zero weight never appear.
//!
//! One cap governs every call site: when the reduced ring would exceed
//! `max_len`, weights are scaled down proportionally (keeping every
//! positive entry at >= 1) and a warning is emitted.

use riptide_log::warn;

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Expand `weights` into a selection ring of at most `max_len` slots.
///
/// Returns `None` when no weight is positive (the caller turns that
/// into its own validation error). The interleaving is smooth weighted
/// round-robin, so selections spread evenly instead of clustering.
#[must_use]
pub fn expand_ring(weights: &[u32], max_len: usize) -> Option<Vec<u32>> {
    let g = weights
        .iter()
        .copied()
        .filter(|&w| w > 0)
        .fold(0, gcd);
    if g == 0 {
        return None;
    }

    let mut reduced: Vec<u64> = weights.iter().map(|&w| u64::from(w / g)).collect();
    let mut total: u64 = reduced.iter().sum();

    if total > max_len as u64 {
        let original = total;
        for w in &mut reduced {
            if *w > 0 {
                *w = (*w * max_len as u64 / original).max(1);
            }
        }
        total = reduced.iter().sum();
        warn!(
            original_len = original,
            scaled_len = total,
            max_len,
            "weight ring exceeds cap, scaling weights proportionally"
        );
    }

    // Smooth weighted round-robin: each slot goes to the entry with
    // the highest accumulated credit, which then pays the full total
    // back. Deterministic and evenly interleaved.
    let mut ring = Vec::with_capacity(total as usize);
    let mut credit: Vec<i64> = vec![0; reduced.len()];
    for _ in 0..total {
        let mut best = usize::MAX;
        let mut best_credit = i64::MIN;
        for (i, w) in reduced.iter().enumerate() {
            if *w == 0 {
                continue;
            }
            credit[i] += *w as i64;
            if credit[i] > best_credit {
                best_credit = credit[i];
                best = i;
            }
        }
        credit[best] -= total as i64;
        ring.push(best as u32);
    }
    Some(ring)
}
