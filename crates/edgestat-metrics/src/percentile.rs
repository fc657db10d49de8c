//! Percentile estimation from bucketed histograms.
//!
//! Upstream buckets are keyed by their upper bound and their width grows
//! with the bound: 1 up to 10, 10 up to 250, 50 up to 1000, 100 beyond.
//! The estimate interpolates linearly inside the bucket holding the target
//! rank.

use std::collections::BTreeMap;

/// Width of the bucket whose upper bound is `bound`.
pub fn bucket_width(bound: u64) -> u64 {
    match bound {
        0..=10 => 1,
        11..=250 => 10,
        251..=1000 => 50,
        _ => 100,
    }
}

/// Approximate the `percentile`-th value of a distribution.
///
/// Returns `None` when the buckets do not hold `total` observations' worth
/// of rank, including the empty histogram.
pub fn estimate(buckets: &BTreeMap<u64, u64>, total: u64, percentile: u32) -> Option<u64> {
    let mut rank = total.saturating_mul(u64::from(percentile)) / 100;

    for (&bound, &count) in buckets {
        if rank < count {
            let width = bucket_width(bound);
            let lower = bound.saturating_sub(width);
            let fraction = rank as f64 / count as f64;
            return Some((lower as f64 + fraction * width as f64).round() as u64);
        }
        rank -= count;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets(pairs: &[(u64, u64)]) -> BTreeMap<u64, u64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn widths_follow_bound() {
        assert_eq!(bucket_width(1), 1);
        assert_eq!(bucket_width(10), 1);
        assert_eq!(bucket_width(20), 10);
        assert_eq!(bucket_width(250), 10);
        assert_eq!(bucket_width(300), 50);
        assert_eq!(bucket_width(1000), 50);
        assert_eq!(bucket_width(1100), 100);
    }

    #[test]
    fn median_in_wide_bucket_interpolates() {
        let b = buckets(&[(10, 0), (250, 0), (1000, 100)]);
        let p50 = estimate(&b, 100, 50).unwrap();
        assert!(p50 > 950 && p50 < 1000, "p50 was {p50}");
        assert_eq!(p50, 975);
    }

    #[test]
    fn empty_histogram_has_no_value() {
        assert_eq!(estimate(&BTreeMap::new(), 0, 50), None);
    }

    #[test]
    fn inconsistent_total_has_no_value() {
        let b = buckets(&[(10, 2)]);
        assert_eq!(estimate(&b, 10, 90), None);
    }

    #[test]
    fn walks_to_the_right_bucket() {
        let b = buckets(&[(5, 10), (6, 10), (20, 10)]);
        // rank 3 lands 3/10 into (4, 5].
        assert_eq!(estimate(&b, 30, 10), Some(4));
        assert_eq!(estimate(&b, 30, 50), Some(6));
        // rank 27 lands 7/10 into (10, 20].
        assert_eq!(estimate(&b, 30, 90), Some(17));
    }

    #[test]
    fn full_percentile_runs_off_the_end() {
        let b = buckets(&[(10, 4)]);
        assert_eq!(estimate(&b, 4, 100), None);
    }
}
