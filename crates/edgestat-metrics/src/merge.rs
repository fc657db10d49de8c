//! Merge engine: folds delta samples into a service's accumulated record.
//!
//! Scalar counters always add onto the previous value. Histogram buckets
//! only continue the previous distribution when the previous write came
//! from a background refresh; otherwise the first delta touching a
//! histogram in this merge starts it again from zero. Histograms the delta
//! does not touch are carried over unchanged.

use std::collections::HashSet;

use thiserror::Error;
use tracing::trace;

use edgestat_core::{
    BEGINNING_WATERMARK, DeltaSample, Histogram, IgnoreList, MergedServiceRecord, MetricValue,
};

use crate::kind::MetricKind;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("delta for service {service} recorded at {recorded} has no datacenter block")]
    MissingDatacenter { service: String, recorded: u64 },

    #[error("metric {metric} in datacenter {datacenter} of service {service} is not a {expected}")]
    ShapeMismatch {
        service: String,
        datacenter: String,
        metric: String,
        expected: &'static str,
    },
}

/// Watermark to request new data from: the previous record's `recorded`,
/// or the beginning sentinel when there is none.
pub fn watermark(previous: Option<&MergedServiceRecord>) -> u64 {
    previous.map_or(BEGINNING_WATERMARK, |r| r.recorded)
}

/// Applies the configured ignore list while merging.
#[derive(Debug, Clone, Default)]
pub struct Merger {
    ignore: IgnoreList,
}

impl Merger {
    pub fn new(ignore: IgnoreList) -> Self {
        Self { ignore }
    }

    /// Merge `samples` onto `previous`, producing the new record for `service_id`.
    pub fn merge(
        &self,
        service_id: &str,
        previous: Option<&MergedServiceRecord>,
        samples: &[DeltaSample],
        previous_was_background: bool,
    ) -> Result<MergedServiceRecord, MergeError> {
        let mut merged = previous
            .cloned()
            .unwrap_or_else(|| MergedServiceRecord::empty(service_id));
        // Histograms already initialized during this merge.
        let mut started: HashSet<(&str, &str)> = HashSet::new();

        for sample in samples {
            let datacenters =
                sample
                    .datacenter
                    .as_ref()
                    .ok_or_else(|| MergeError::MissingDatacenter {
                        service: service_id.to_string(),
                        recorded: sample.recorded,
                    })?;

            for (dc, metrics) in datacenters {
                for (name, value) in metrics {
                    if self.ignore.matches(name) {
                        continue;
                    }
                    if let MetricValue::Other(_) = value {
                        trace!(service = %service_id, datacenter = %dc, metric = %name, "skipping non-numeric metric");
                        continue;
                    }
                    let is_histogram = MetricKind::classify(name).is_histogram();
                    if !is_histogram && matches!(value, MetricValue::Histogram(_)) {
                        trace!(service = %service_id, datacenter = %dc, metric = %name, "skipping bucket map under a non-histogram name");
                        continue;
                    }

                    let mismatch = |expected| MergeError::ShapeMismatch {
                        service: service_id.to_string(),
                        datacenter: dc.clone(),
                        metric: name.clone(),
                        expected,
                    };
                    let slot = merged.datacenter.entry(dc.clone()).or_default();

                    if is_histogram {
                        let delta = value.as_histogram().ok_or_else(|| mismatch("histogram"))?;
                        let first_touch = started.insert((dc.as_str(), name.as_str()));
                        let acc = slot
                            .entry(name.clone())
                            .or_insert_with(|| MetricValue::Histogram(Histogram::new()));
                        if first_touch && !previous_was_background {
                            *acc = MetricValue::Histogram(Histogram::new());
                        }
                        let MetricValue::Histogram(acc) = acc else {
                            return Err(mismatch("histogram"));
                        };
                        for (&bound, &count) in delta.buckets() {
                            acc.add(bound, count);
                        }
                    } else {
                        let delta = value.as_scalar().ok_or_else(|| mismatch("scalar"))?;
                        let acc = slot
                            .entry(name.clone())
                            .or_insert(MetricValue::Scalar(0.0));
                        let MetricValue::Scalar(acc) = acc else {
                            return Err(mismatch("scalar"));
                        };
                        *acc += delta;
                    }
                }
            }

            merged.recorded = merged.recorded.max(sample.recorded);
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample(recorded: u64, dc: &str, metrics: Vec<(&str, MetricValue)>) -> DeltaSample {
        let metrics: BTreeMap<String, MetricValue> = metrics
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut datacenter = BTreeMap::new();
        datacenter.insert(dc.to_string(), metrics);
        DeltaSample {
            recorded,
            datacenter: Some(datacenter),
        }
    }

    fn hist(pairs: &[(u64, u64)]) -> MetricValue {
        MetricValue::Histogram(pairs.iter().copied().collect())
    }

    fn prior() -> MergedServiceRecord {
        Merger::default()
            .merge(
                "svc1",
                None,
                &[sample(
                    50,
                    "SJC",
                    vec![
                        ("requests", MetricValue::Scalar(10.0)),
                        ("miss_histogram", hist(&[(10, 5), (20, 3)])),
                    ],
                )],
                false,
            )
            .unwrap()
    }

    fn metric<'a>(record: &'a MergedServiceRecord, dc: &str, name: &str) -> &'a MetricValue {
        &record.datacenter[dc][name]
    }

    #[test]
    fn background_histograms_accumulate() {
        let delta = [sample(60, "SJC", vec![("miss_histogram", hist(&[(10, 2)]))])];
        let merged = Merger::default()
            .merge("svc1", Some(&prior()), &delta, true)
            .unwrap();
        assert_eq!(metric(&merged, "SJC", "miss_histogram"), &hist(&[(10, 7), (20, 3)]));
    }

    #[test]
    fn foreground_histograms_restart_from_delta() {
        let delta = [sample(60, "SJC", vec![("miss_histogram", hist(&[(10, 2)]))])];
        let merged = Merger::default()
            .merge("svc1", Some(&prior()), &delta, false)
            .unwrap();
        assert_eq!(metric(&merged, "SJC", "miss_histogram"), &hist(&[(10, 2)]));
    }

    #[test]
    fn foreground_restart_accumulates_within_one_merge() {
        let delta = [
            sample(60, "SJC", vec![("miss_histogram", hist(&[(10, 2)]))]),
            sample(61, "SJC", vec![("miss_histogram", hist(&[(10, 3), (250, 1)]))]),
        ];
        let merged = Merger::default()
            .merge("svc1", Some(&prior()), &delta, false)
            .unwrap();
        assert_eq!(metric(&merged, "SJC", "miss_histogram"), &hist(&[(10, 5), (250, 1)]));
    }

    #[test]
    fn scalars_accumulate_in_both_modes() {
        let delta = [sample(60, "SJC", vec![("requests", MetricValue::Scalar(5.0))])];
        for background in [true, false] {
            let merged = Merger::default()
                .merge("svc1", Some(&prior()), &delta, background)
                .unwrap();
            assert_eq!(metric(&merged, "SJC", "requests"), &MetricValue::Scalar(15.0));
        }
    }

    #[test]
    fn untouched_histograms_are_kept() {
        let delta = [sample(60, "SJC", vec![("requests", MetricValue::Scalar(1.0))])];
        let merged = Merger::default()
            .merge("svc1", Some(&prior()), &delta, false)
            .unwrap();
        assert_eq!(metric(&merged, "SJC", "miss_histogram"), &hist(&[(10, 5), (20, 3)]));
    }

    #[test]
    fn empty_delta_leaves_record_unchanged() {
        let before = prior();
        for background in [true, false] {
            let merged = Merger::default()
                .merge("svc1", Some(&before), &[], background)
                .unwrap();
            assert_eq!(merged, before);
        }
    }

    #[test]
    fn recorded_is_the_maximum() {
        let delta = [
            sample(70, "SJC", vec![]),
            sample(65, "SJC", vec![]),
        ];
        let merged = Merger::default()
            .merge("svc1", Some(&prior()), &delta, false)
            .unwrap();
        assert_eq!(merged.recorded, 70);

        let stale = [sample(10, "SJC", vec![])];
        let merged = Merger::default()
            .merge("svc1", Some(&prior()), &stale, false)
            .unwrap();
        assert_eq!(merged.recorded, 50);
    }

    #[test]
    fn ignored_metrics_are_skipped() {
        let merger = Merger::new(IgnoreList::parse("bandwidth;_time"));
        let delta = [sample(
            60,
            "AMS",
            vec![
                ("body_bandwidth", MetricValue::Scalar(100.0)),
                ("miss_time", MetricValue::Scalar(0.5)),
                ("hits", MetricValue::Scalar(3.0)),
            ],
        )];
        let merged = merger.merge("svc1", None, &delta, false).unwrap();
        let ams = &merged.datacenter["AMS"];
        assert_eq!(ams.len(), 1);
        assert_eq!(ams["hits"], MetricValue::Scalar(3.0));
    }

    #[test]
    fn missing_datacenter_fails() {
        let delta = [DeltaSample {
            recorded: 60,
            datacenter: None,
        }];
        let err = Merger::default()
            .merge("svc1", None, &delta, false)
            .unwrap_err();
        assert!(matches!(err, MergeError::MissingDatacenter { recorded: 60, .. }));
    }

    #[test]
    fn histogram_name_with_scalar_value_fails() {
        let delta = [sample(60, "SJC", vec![("miss_histogram", MetricValue::Scalar(1.0))])];
        let err = Merger::default()
            .merge("svc1", None, &delta, false)
            .unwrap_err();
        assert!(matches!(err, MergeError::ShapeMismatch { expected: "histogram", .. }));
    }

    #[test]
    fn bucket_map_under_counter_name_is_skipped() {
        let delta = [sample(
            60,
            "SJC",
            vec![
                ("requests", MetricValue::Scalar(3.0)),
                ("edge_resp_header_bytes", hist(&[(1, 2)])),
            ],
        )];
        let merged = Merger::default().merge("svc1", None, &delta, false).unwrap();
        let sjc = &merged.datacenter["SJC"];
        assert_eq!(sjc.get("requests"), Some(&MetricValue::Scalar(3.0)));
        assert!(!sjc.contains_key("edge_resp_header_bytes"));
    }

    #[test]
    fn non_numeric_values_are_ignored() {
        let delta = [sample(
            60,
            "SJC",
            vec![("labels", MetricValue::Other(serde_json::json!({"a": "b"})))],
        )];
        let merged = Merger::default().merge("svc1", None, &delta, false).unwrap();
        assert!(merged.datacenter.is_empty());
        assert_eq!(merged.recorded, 60);
    }

    #[test]
    fn watermark_defaults_to_beginning() {
        assert_eq!(watermark(None), BEGINNING_WATERMARK);
        assert_eq!(watermark(Some(&prior())), 50);
    }
}
