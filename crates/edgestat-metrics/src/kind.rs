//! Metric name classification.

/// Version label used for the bare `tls` counter.
pub const TLS_TOTAL: &str = "total";

/// Rendering family a metric name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind<'a> {
    /// Plain counter rendered under its own name.
    Counter,
    /// `status_<code>`, grouped under one family keyed by code.
    StatusCode(&'a str),
    /// `object_size_<size>`, grouped by size class.
    ObjectSize(&'a str),
    /// `tls_<version>` or bare `tls`, grouped by version.
    TlsVersion(&'a str),
    /// Bucketed distribution; any name containing `histogram`.
    LatencyHistogram,
}

impl<'a> MetricKind<'a> {
    pub fn classify(name: &'a str) -> Self {
        if name.contains("histogram") {
            MetricKind::LatencyHistogram
        } else if let Some(code) = name.strip_prefix("status_") {
            MetricKind::StatusCode(code)
        } else if let Some(size) = name.strip_prefix("object_size_") {
            MetricKind::ObjectSize(size)
        } else if name == "tls" {
            MetricKind::TlsVersion(TLS_TOTAL)
        } else if let Some(version) = name.strip_prefix("tls_") {
            MetricKind::TlsVersion(version)
        } else {
            MetricKind::Counter
        }
    }

    pub fn is_histogram(self) -> bool {
        matches!(self, MetricKind::LatencyHistogram)
    }
}
