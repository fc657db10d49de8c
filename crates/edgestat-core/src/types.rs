//! Shared types used across edgestat crates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Watermark sent upstream when a service has no prior record.
pub const BEGINNING_WATERMARK: u64 = 0;

/// A monitored origin service from the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Advisory only; never part of a merge key.
    #[serde(default)]
    pub version: u64,
}

/// A point of presence as listed by the upstream catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pop {
    pub code: String,
    #[serde(alias = "billing_region")]
    pub region: String,
}

/// Datacenter code → region lookup, rebuilt once per refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopTable {
    regions: BTreeMap<String, String>,
}

impl PopTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: impl Into<String>, region: impl Into<String>) {
        self.regions.insert(code.into(), region.into());
    }

    /// Region label for a datacenter code, if the code is known.
    pub fn region(&self, code: &str) -> Option<&str> {
        self.regions.get(code).map(String::as_str)
    }

    /// Iterate `(code, region)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.regions.iter().map(|(c, r)| (c.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl FromIterator<Pop> for PopTable {
    fn from_iter<I: IntoIterator<Item = Pop>>(iter: I) -> Self {
        let mut table = PopTable::new();
        for pop in iter {
            table.insert(pop.code, pop.region);
        }
        table
    }
}

/// Bucketed distribution: bucket upper bound → count.
///
/// Upstream encodes bounds as decimal strings; they are kept as integers
/// so iteration is in ascending numeric order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u64>", into = "BTreeMap<String, u64>")]
pub struct Histogram {
    buckets: BTreeMap<u64, u64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` to the bucket with upper bound `bound`.
    pub fn add(&mut self, bound: u64, count: u64) {
        *self.buckets.entry(bound).or_insert(0) += count;
    }

    pub fn buckets(&self) -> &BTreeMap<u64, u64> {
        &self.buckets
    }

    pub fn get(&self, bound: u64) -> Option<u64> {
        self.buckets.get(&bound).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl FromIterator<(u64, u64)> for Histogram {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        let mut h = Histogram::new();
        for (bound, count) in iter {
            h.add(bound, count);
        }
        h
    }
}

impl TryFrom<BTreeMap<String, u64>> for Histogram {
    type Error = String;

    fn try_from(raw: BTreeMap<String, u64>) -> Result<Self, Self::Error> {
        let mut h = Histogram::new();
        for (key, count) in raw {
            let bound = key
                .parse::<u64>()
                .map_err(|_| format!("invalid histogram bucket bound: {key}"))?;
            h.add(bound, count);
        }
        Ok(h)
    }
}

impl From<Histogram> for BTreeMap<String, u64> {
    fn from(h: Histogram) -> Self {
        h.buckets
            .into_iter()
            .map(|(bound, count)| (bound.to_string(), count))
            .collect()
    }
}

/// One metric value inside a datacenter block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Histogram(Histogram),
    /// Any upstream shape the engine does not interpret.
    Other(serde_json::Value),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&Histogram> {
        match self {
            MetricValue::Histogram(h) => Some(h),
            _ => None,
        }
    }
}

/// Datacenter code → metric name → value.
pub type DatacenterMetrics = BTreeMap<String, BTreeMap<String, MetricValue>>;

/// One upstream response unit: counts accumulated since the requested watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSample {
    pub recorded: u64,
    /// Optional on the wire so a missing block surfaces as a merge error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<DatacenterMetrics>,
}

/// Accumulated per-service state; what gets persisted and rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedServiceRecord {
    pub service: String,
    pub recorded: u64,
    #[serde(default)]
    pub datacenter: DatacenterMetrics,
}

impl MergedServiceRecord {
    pub fn empty(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            recorded: BEGINNING_WATERMARK,
            datacenter: DatacenterMetrics::new(),
        }
    }
}

/// Origin of a refresh trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshKind {
    /// Requested by an HTTP caller.
    Foreground,
    /// Fired by the idle timer.
    Background,
}

impl RefreshKind {
    pub fn is_background(self) -> bool {
        self == RefreshKind::Background
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RefreshKind::Foreground => "foreground",
            RefreshKind::Background => "background",
        }
    }
}
