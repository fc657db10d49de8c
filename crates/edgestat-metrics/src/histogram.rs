//! Render-time roll-ups of a histogram metric.
//!
//! The merge engine only keeps raw per-datacenter buckets. For export,
//! each histogram metric is aggregated three ways: per service, per
//! (service, region) and per (service, datacenter).

use std::collections::BTreeMap;

use edgestat_core::Histogram;

use crate::percentile;

/// Buckets with their observation count and approximate sum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistogramAccumulator {
    pub buckets: BTreeMap<u64, u64>,
    pub count: u64,
    /// Σ bound × count.
    pub sum: u64,
}

impl HistogramAccumulator {
    pub fn add(&mut self, histogram: &Histogram) {
        for (&bound, &count) in histogram.buckets() {
            *self.buckets.entry(bound).or_insert(0) += count;
            self.count += count;
            self.sum += bound * count;
        }
    }

    /// `(bound, cumulative count)` pairs in ascending bound order.
    pub fn cumulative(&self) -> Vec<(u64, u64)> {
        let mut running = 0;
        self.buckets
            .iter()
            .map(|(&bound, &count)| {
                running += count;
                (bound, running)
            })
            .collect()
    }

    pub fn percentile(&self, p: u32) -> Option<u64> {
        percentile::estimate(&self.buckets, self.count, p)
    }
}

/// Key of a per-region roll-up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegionKey {
    pub service: String,
    pub region: String,
}

/// Key of a per-datacenter roll-up; the region is carried for labelling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PopKey {
    pub service: String,
    pub pop: String,
    pub region: String,
}

/// The three aggregations of one histogram metric.
#[derive(Debug, Clone, Default)]
pub struct HistogramRollup {
    pub per_service: BTreeMap<String, HistogramAccumulator>,
    pub per_region: BTreeMap<RegionKey, HistogramAccumulator>,
    pub per_pop: BTreeMap<PopKey, HistogramAccumulator>,
}

impl HistogramRollup {
    pub fn add(&mut self, service: &str, pop: &str, region: &str, histogram: &Histogram) {
        self.per_service
            .entry(service.to_string())
            .or_default()
            .add(histogram);
        self.per_region
            .entry(RegionKey {
                service: service.to_string(),
                region: region.to_string(),
            })
            .or_default()
            .add(histogram);
        self.per_pop
            .entry(PopKey {
                service: service.to_string(),
                pop: pop.to_string(),
                region: region.to_string(),
            })
            .or_default()
            .add(histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_tracks_count_and_sum() {
        let mut acc = HistogramAccumulator::default();
        acc.add(&Histogram::from_iter([(10, 2), (20, 1)]));
        acc.add(&Histogram::from_iter([(10, 1)]));
        assert_eq!(acc.count, 4);
        assert_eq!(acc.sum, 10 * 3 + 20);
        assert_eq!(acc.cumulative(), vec![(10, 3), (20, 4)]);
    }

    #[test]
    fn rollup_aggregates_three_ways() {
        let mut rollup = HistogramRollup::default();
        rollup.add("svc1", "SJC", "AMER", &Histogram::from_iter([(10, 2)]));
        rollup.add("svc1", "IAD", "AMER", &Histogram::from_iter([(10, 3)]));
        rollup.add("svc1", "AMS", "EU", &Histogram::from_iter([(20, 1)]));

        assert_eq!(rollup.per_service["svc1"].count, 6);
        assert_eq!(rollup.per_region.len(), 2);
        let amer = RegionKey {
            service: "svc1".to_string(),
            region: "AMER".to_string(),
        };
        assert_eq!(rollup.per_region[&amer].count, 5);
        assert_eq!(rollup.per_pop.len(), 3);
    }
}
