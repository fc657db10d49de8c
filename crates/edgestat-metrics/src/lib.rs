//! edgestat-metrics — the accumulation and export engine.
//!
//! # Architecture
//!
//! ```text
//! Refresher::refresh()
//!   ├── Upstream::list_pops ┐
//!   ├── SnapshotStore::load ├─ concurrently
//!   ├── Upstream::list_services ┘
//!   ├── Upstream::fetch_window (one per service, concurrently)
//!   ├── Merger::merge → MergedServiceRecord per service
//!   ├── render_prometheus() → exposition text
//!   └── SnapshotStore::save
//! ```
//!
//! Metric names are classified once by [`MetricKind::classify`]; the
//! renderer dispatches on the kind to pick a family.

pub mod histogram;
pub mod kind;
pub mod merge;
pub mod percentile;
pub mod prometheus;
pub mod refresh;

pub use kind::MetricKind;
pub use merge::{MergeError, Merger};
pub use percentile::estimate;
pub use prometheus::{RenderError, RenderOptions, render_prometheus};
pub use refresh::{RefreshError, Refresher, RefresherConfig};
