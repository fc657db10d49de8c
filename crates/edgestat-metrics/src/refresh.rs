//! One refresh cycle against the upstream and the snapshot file.
//!
//! A cycle either fully succeeds or leaves the previous snapshot in place:
//! the new snapshot is only written after every service merged and the
//! exposition rendered.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::try_join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use edgestat_core::{IgnoreList, RefreshKind, Service};
use edgestat_state::{Snapshot, SnapshotStore, StateError};
use edgestat_upstream::{Upstream, UpstreamError};

use crate::merge::{MergeError, Merger, watermark};
use crate::prometheus::{RenderError, RenderOptions, render_prometheus};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("upstream catalog call failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("real-time window for service {service} failed: {source}")]
    Window {
        service: String,
        source: UpstreamError,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// What a [`Refresher`] tracks and how it renders.
#[derive(Debug, Clone, Default)]
pub struct RefresherConfig {
    /// Service ids to track; empty tracks the whole catalog.
    pub service_filter: Vec<String>,
    pub ignore: IgnoreList,
    pub render: RenderOptions,
}

/// Runs one refresh cycle against an upstream and a snapshot file.
pub struct Refresher {
    upstream: Arc<dyn Upstream>,
    merger: Merger,
    service_filter: Vec<String>,
    render: RenderOptions,
}

impl Refresher {
    pub fn new(upstream: Arc<dyn Upstream>, config: RefresherConfig) -> Self {
        Self {
            upstream,
            merger: Merger::new(config.ignore),
            service_filter: config.service_filter,
            render: config.render,
        }
    }

    /// Run a cycle using the snapshot at `output`, returning the exposition text.
    pub async fn refresh(&self, kind: RefreshKind, output: &Path) -> Result<String, RefreshError> {
        let store = SnapshotStore::new(output);

        let (pops, snapshot, catalog) = tokio::try_join!(
            async { self.upstream.list_pops().await.map_err(RefreshError::from) },
            async { store.load().await.map_err(RefreshError::from) },
            async { self.upstream.list_services().await.map_err(RefreshError::from) },
        )?;
        let services = self.tracked(catalog);
        debug!(
            kind = kind.as_str(),
            services = services.len(),
            pops = pops.len(),
            previous_background = snapshot.is_background,
            "refresh inputs loaded"
        );

        let windows = try_join_all(services.iter().map(|service| {
            let since = watermark(snapshot.record(&service.id));
            async move {
                self.upstream
                    .fetch_window(&service.id, since)
                    .await
                    .map_err(|source| RefreshError::Window {
                        service: service.id.clone(),
                        source,
                    })
            }
        }))
        .await?;

        let merged = services
            .iter()
            .zip(&windows)
            .map(|(service, samples)| {
                self.merger.merge(
                    &service.id,
                    snapshot.record(&service.id),
                    samples,
                    snapshot.is_background,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let text = render_prometheus(&merged, &pops, &services, &self.render)?;

        let samples: usize = windows.iter().map(Vec::len).sum();
        store
            .save(&Snapshot {
                previous_data: merged,
                timestamp: Utc::now().timestamp(),
                is_background: kind.is_background(),
            })
            .await?;

        info!(
            kind = kind.as_str(),
            services = services.len(),
            samples,
            bytes = text.len(),
            "refresh complete"
        );
        Ok(text)
    }

    /// Apply the service filter to the catalog.
    fn tracked(&self, catalog: Vec<Service>) -> Vec<Service> {
        if self.service_filter.is_empty() {
            return catalog;
        }
        for id in &self.service_filter {
            if !catalog.iter().any(|s| &s.id == id) {
                warn!(service = %id, "configured service not found in catalog");
            }
        }
        catalog
            .into_iter()
            .filter(|s| self.service_filter.contains(&s.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::Mutex;

    use edgestat_core::{DeltaSample, MetricValue, PopTable};
    use edgestat_upstream::{UpstreamFuture, UpstreamResult};

    /// Upstream that replays queued windows per service.
    #[derive(Default)]
    struct ScriptedUpstream {
        services: Vec<Service>,
        pops: PopTable,
        windows: Mutex<HashMap<String, VecDeque<Vec<DeltaSample>>>>,
        requested: Mutex<Vec<(String, u64)>>,
        fail_catalog: bool,
    }

    impl ScriptedUpstream {
        fn new() -> Self {
            let mut pops = PopTable::new();
            pops.insert("SJC", "AMER");
            Self {
                services: vec![Service {
                    id: "svc1".to_string(),
                    name: "A".to_string(),
                    version: 1,
                }],
                pops,
                ..Default::default()
            }
        }

        fn push_window(&self, service: &str, window: Vec<DeltaSample>) {
            self.windows
                .lock()
                .unwrap()
                .entry(service.to_string())
                .or_default()
                .push_back(window);
        }

        fn requested(&self) -> Vec<(String, u64)> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl Upstream for ScriptedUpstream {
        fn list_services(&self) -> UpstreamFuture<'_, Vec<Service>> {
            let result: UpstreamResult<Vec<Service>> = if self.fail_catalog {
                Err(UpstreamError::Status {
                    url: "/service".to_string(),
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(self.services.clone())
            };
            Box::pin(async move { result })
        }

        fn list_pops(&self) -> UpstreamFuture<'_, PopTable> {
            Box::pin(async move { Ok(self.pops.clone()) })
        }

        fn fetch_window<'a>(
            &'a self,
            service_id: &'a str,
            since: u64,
        ) -> UpstreamFuture<'a, Vec<DeltaSample>> {
            self.requested
                .lock()
                .unwrap()
                .push((service_id.to_string(), since));
            let window = self
                .windows
                .lock()
                .unwrap()
                .get_mut(service_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_default();
            Box::pin(async move { Ok(window) })
        }
    }

    fn delta(recorded: u64, dc: &str, metrics: Vec<(&str, MetricValue)>) -> DeltaSample {
        let metrics: BTreeMap<String, MetricValue> = metrics
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        DeltaSample {
            recorded,
            datacenter: Some(BTreeMap::from([(dc.to_string(), metrics)])),
        }
    }

    fn hist(pairs: &[(u64, u64)]) -> MetricValue {
        MetricValue::Histogram(pairs.iter().copied().collect())
    }

    fn refresher(upstream: Arc<ScriptedUpstream>) -> Refresher {
        Refresher::new(upstream, RefresherConfig::default())
    }

    #[tokio::test]
    async fn first_cycle_renders_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("state.data");
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_window(
            "svc1",
            vec![delta(
                100,
                "SJC",
                vec![
                    ("requests", MetricValue::Scalar(5.0)),
                    ("miss_histogram", hist(&[(10, 2)])),
                ],
            )],
        );

        let text = refresher(upstream.clone())
            .refresh(RefreshKind::Foreground, &output)
            .await
            .unwrap();

        assert!(text.contains("requests{pop=\"SJC\",reg=\"AMER\",ser=\"svc1\"} 5\n"));
        assert!(text.contains("miss_histogram_per_service_bucket{ser=\"svc1\",le=\"10\"} 2\n"));
        assert!(text.contains("miss_histogram_per_service_bucket{ser=\"svc1\",le=\"+Inf\"} 2\n"));
        assert_eq!(upstream.requested(), vec![("svc1".to_string(), 0)]);

        let saved = SnapshotStore::new(&output).load().await.unwrap();
        assert_eq!(saved.previous_data.len(), 1);
        assert_eq!(saved.previous_data[0].recorded, 100);
        assert!(!saved.is_background);
    }

    #[tokio::test]
    async fn next_cycle_resumes_from_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("state.data");
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_window("svc1", vec![delta(100, "SJC", vec![("requests", MetricValue::Scalar(5.0))])]);
        upstream.push_window("svc1", vec![delta(101, "SJC", vec![("requests", MetricValue::Scalar(2.0))])]);

        let r = refresher(upstream.clone());
        r.refresh(RefreshKind::Foreground, &output).await.unwrap();
        let text = r.refresh(RefreshKind::Foreground, &output).await.unwrap();

        assert!(text.contains("requests{pop=\"SJC\",reg=\"AMER\",ser=\"svc1\"} 7\n"));
        assert!(text.contains("last_recorded{ser=\"svc1\"} 101\n"));
        assert_eq!(
            upstream.requested(),
            vec![("svc1".to_string(), 0), ("svc1".to_string(), 100)]
        );
    }

    #[tokio::test]
    async fn background_write_lets_histograms_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("state.data");
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_window("svc1", vec![delta(100, "SJC", vec![("miss_histogram", hist(&[(10, 2)]))])]);
        upstream.push_window("svc1", vec![delta(101, "SJC", vec![("miss_histogram", hist(&[(10, 3)]))])]);
        upstream.push_window("svc1", vec![delta(102, "SJC", vec![("miss_histogram", hist(&[(10, 1)]))])]);

        let r = refresher(upstream);
        r.refresh(RefreshKind::Background, &output).await.unwrap();
        // Previous write was background: 2 + 3.
        let text = r.refresh(RefreshKind::Foreground, &output).await.unwrap();
        assert!(text.contains("miss_histogram_per_service_count{ser=\"svc1\"} 5\n"));
        // Previous write was foreground: restart from the delta.
        let text = r.refresh(RefreshKind::Foreground, &output).await.unwrap();
        assert!(text.contains("miss_histogram_per_service_count{ser=\"svc1\"} 1\n"));
    }

    #[tokio::test]
    async fn render_failure_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("state.data");
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_window("svc1", vec![delta(100, "SJC", vec![("requests", MetricValue::Scalar(5.0))])]);
        upstream.push_window("svc1", vec![delta(200, "XYZ", vec![("requests", MetricValue::Scalar(1.0))])]);

        let r = refresher(upstream);
        r.refresh(RefreshKind::Foreground, &output).await.unwrap();
        let before = std::fs::read(&output).unwrap();

        let err = r.refresh(RefreshKind::Foreground, &output).await.unwrap_err();
        assert!(matches!(err, RefreshError::Render(_)));
        assert_eq!(std::fs::read(&output).unwrap(), before);
    }

    #[tokio::test]
    async fn merge_failure_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("state.data");
        let upstream = Arc::new(ScriptedUpstream::new());
        upstream.push_window("svc1", vec![delta(100, "SJC", vec![("requests", MetricValue::Scalar(5.0))])]);
        upstream.push_window(
            "svc1",
            vec![DeltaSample {
                recorded: 200,
                datacenter: None,
            }],
        );

        let r = refresher(upstream);
        r.refresh(RefreshKind::Foreground, &output).await.unwrap();
        let before = std::fs::read(&output).unwrap();

        let err = r.refresh(RefreshKind::Foreground, &output).await.unwrap_err();
        assert!(matches!(
            err,
            RefreshError::Merge(MergeError::MissingDatacenter { recorded: 200, .. })
        ));
        assert_eq!(std::fs::read(&output).unwrap(), before);
    }

    #[tokio::test]
    async fn catalog_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("state.data");
        let upstream = Arc::new(ScriptedUpstream {
            fail_catalog: true,
            ..ScriptedUpstream::new()
        });

        let err = refresher(upstream)
            .refresh(RefreshKind::Foreground, &output)
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshError::Upstream(UpstreamError::Status { status: 503, .. })));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn service_filter_limits_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("state.data");
        let mut scripted = ScriptedUpstream::new();
        scripted.services.push(Service {
            id: "svc2".to_string(),
            name: "B".to_string(),
            version: 3,
        });
        let upstream = Arc::new(scripted);

        let config = RefresherConfig {
            service_filter: vec!["svc2".to_string(), "gone".to_string()],
            ..Default::default()
        };
        let text = Refresher::new(upstream.clone(), config)
            .refresh(RefreshKind::Foreground, &output)
            .await
            .unwrap();

        assert_eq!(upstream.requested(), vec![("svc2".to_string(), 0)]);
        assert!(text.contains("ser=\"svc2\""));
        assert!(!text.contains("ser=\"svc1\""));
    }
}
