//! Prometheus text exposition format.
//!
//! Renders merged service records into the Prometheus text exposition
//! format. Families are written in a fixed order:
//!
//! 1. `service_info`, `pop_info` identity gauges
//! 2. one counter family per generic metric name
//! 3. histogram families per latency histogram (service, region, pop)
//! 4. percentile summaries of the same histograms
//! 5. `status`, `object_size`, `tls` grouped counters
//! 6. `last_recorded` watermark gauge
//!
//! Per-datacenter samples carry `pop` and `reg` labels, per-service samples
//! carry `ser`.

use std::collections::BTreeMap;
use std::fmt::{Display, Write};

use thiserror::Error;
use tracing::warn;

use edgestat_core::{MergedServiceRecord, MetricValue, PopTable, Service};

use crate::histogram::{HistogramAccumulator, HistogramRollup};
use crate::kind::MetricKind;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("datacenter {code} of service {service} is missing from the PoP table")]
    UnknownDatacenter { code: String, service: String },
}

/// Family names written by the renderer itself. `tls` is absent because
/// a bare `tls` counter already lands in the `tls` family.
const FIXED_FAMILIES: &[&str] = &[
    "service_info",
    "pop_info",
    "status",
    "object_size",
    "last_recorded",
];

/// Exposition settings.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Prepended to every metric name.
    pub prefix: String,
    /// Drop scalar samples whose value is exactly zero.
    pub ignore_zero_counters: bool,
    /// Percentiles for the summary families; empty disables them.
    pub percentiles: Vec<u32>,
    pub export_histograms: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            ignore_zero_counters: false,
            percentiles: Vec::new(),
            export_histograms: true,
        }
    }
}

/// One scalar value at datacenter granularity.
struct Point<'a> {
    /// Family-specific label value (status code, size class, TLS version).
    key: &'a str,
    service: &'a str,
    pop: &'a str,
    region: &'a str,
    value: f64,
}

#[derive(Default)]
struct Families<'a> {
    counters: BTreeMap<&'a str, Vec<Point<'a>>>,
    status: Vec<Point<'a>>,
    object_size: Vec<Point<'a>>,
    tls: Vec<Point<'a>>,
    histograms: BTreeMap<&'a str, HistogramRollup>,
}

impl<'a> Families<'a> {
    fn collect(
        records: &'a [MergedServiceRecord],
        pops: &'a PopTable,
        options: &RenderOptions,
    ) -> Result<Self, RenderError> {
        let mut families = Families::default();

        for record in records {
            let service = record.service.as_str();
            for (pop, metrics) in &record.datacenter {
                let pop = pop.as_str();
                let region = pops
                    .region(pop)
                    .ok_or_else(|| RenderError::UnknownDatacenter {
                        code: pop.to_string(),
                        service: record.service.clone(),
                    })?;

                for (name, value) in metrics {
                    let kind = MetricKind::classify(name);
                    match value {
                        MetricValue::Histogram(h) if kind.is_histogram() => {
                            families
                                .histograms
                                .entry(name.as_str())
                                .or_default()
                                .add(service, pop, region, h);
                        }
                        MetricValue::Scalar(v) if !kind.is_histogram() => {
                            if options.ignore_zero_counters && *v == 0.0 {
                                continue;
                            }
                            let point = |key| Point {
                                key,
                                service,
                                pop,
                                region,
                                value: *v,
                            };
                            match kind {
                                MetricKind::Counter if FIXED_FAMILIES.contains(&name.as_str()) => {
                                    warn!(service, pop, metric = %name, "counter clashes with a built-in family, skipping");
                                }
                                MetricKind::Counter => families
                                    .counters
                                    .entry(name.as_str())
                                    .or_default()
                                    .push(point(name.as_str())),
                                MetricKind::StatusCode(code) => families.status.push(point(code)),
                                MetricKind::ObjectSize(size) => {
                                    families.object_size.push(point(size))
                                }
                                MetricKind::TlsVersion(version) => families.tls.push(point(version)),
                                MetricKind::LatencyHistogram => {}
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(families)
    }
}

/// Text buffer that knows the metric prefix.
struct Exposition<'o> {
    out: String,
    prefix: &'o str,
}

impl<'o> Exposition<'o> {
    fn new(prefix: &'o str) -> Self {
        Self {
            out: String::new(),
            prefix,
        }
    }

    fn family(&mut self, name: &str, kind: &str, help: &str) {
        let _ = writeln!(self.out, "# HELP {}{name} {help}", self.prefix);
        let _ = writeln!(self.out, "# TYPE {}{name} {kind}", self.prefix);
    }

    fn sample(&mut self, name: &str, labels: &[(&str, &str)], value: impl Display) {
        let _ = write!(self.out, "{}{name}", self.prefix);
        if !labels.is_empty() {
            self.out.push('{');
            for (i, (key, val)) in labels.iter().enumerate() {
                if i > 0 {
                    self.out.push(',');
                }
                let _ = write!(self.out, "{key}=\"{}\"", escape_label(val));
            }
            self.out.push('}');
        }
        let _ = writeln!(self.out, " {value}");
    }

    fn points(&mut self, name: &str, key_label: Option<&str>, points: &[Point<'_>]) {
        for p in points {
            match key_label {
                Some(label) => self.sample(
                    name,
                    &[(label, p.key), ("pop", p.pop), ("reg", p.region), ("ser", p.service)],
                    p.value,
                ),
                None => self.sample(
                    name,
                    &[("pop", p.pop), ("reg", p.region), ("ser", p.service)],
                    p.value,
                ),
            }
        }
    }

    fn histogram(&mut self, name: &str, labels: &[(&str, &str)], acc: &HistogramAccumulator) {
        let bucket = format!("{name}_bucket");
        for (bound, cumulative) in acc.cumulative() {
            let le = bound.to_string();
            self.sample(&bucket, &with_label(labels, "le", &le), cumulative);
        }
        self.sample(&bucket, &with_label(labels, "le", "+Inf"), acc.count);
        self.sample(&format!("{name}_sum"), labels, acc.sum);
        self.sample(&format!("{name}_count"), labels, acc.count);
    }

    fn summary(
        &mut self,
        name: &str,
        labels: &[(&str, &str)],
        acc: &HistogramAccumulator,
        percentiles: &[u32],
    ) {
        for &p in percentiles {
            if let Some(value) = acc.percentile(p) {
                let quantile = quantile_label(p);
                self.sample(name, &with_label(labels, "quantile", &quantile), value);
            }
        }
        self.sample(&format!("{name}_sum"), labels, acc.sum);
        self.sample(&format!("{name}_count"), labels, acc.count);
    }
}

/// Render merged records into Prometheus text format.
///
/// Fails if any datacenter in `records` is absent from `pops`.
pub fn render_prometheus(
    records: &[MergedServiceRecord],
    pops: &PopTable,
    services: &[Service],
    options: &RenderOptions,
) -> Result<String, RenderError> {
    let families = Families::collect(records, pops, options)?;
    let mut out = Exposition::new(&options.prefix);

    out.family("service_info", "gauge", "Tracked service identity.");
    for s in services {
        let version = s.version.to_string();
        out.sample(
            "service_info",
            &[("name", s.name.as_str()), ("ser", s.id.as_str()), ("version", version.as_str())],
            1,
        );
    }

    out.family("pop_info", "gauge", "Point of presence and its region.");
    for (code, region) in pops.iter() {
        out.sample("pop_info", &[("pop", code), ("reg", region)], 1);
    }

    for (name, points) in &families.counters {
        out.family(name, "counter", &format!("Accumulated {name} since local midnight."));
        out.points(name, None, points);
    }

    if options.export_histograms {
        for (name, rollup) in &families.histograms {
            let family = format!("{name}_per_service");
            out.family(&family, "histogram", &format!("{name} distribution per service."));
            for (service, acc) in &rollup.per_service {
                out.histogram(&family, &[("ser", service.as_str())], acc);
            }

            let family = format!("{name}_per_region");
            out.family(&family, "histogram", &format!("{name} distribution per service and region."));
            for (key, acc) in &rollup.per_region {
                out.histogram(&family, &[("reg", key.region.as_str()), ("ser", key.service.as_str())], acc);
            }

            let family = format!("{name}_per_pop");
            out.family(&family, "histogram", &format!("{name} distribution per service and point of presence."));
            for (key, acc) in &rollup.per_pop {
                out.histogram(
                    &family,
                    &[
                        ("pop", key.pop.as_str()),
                        ("reg", key.region.as_str()),
                        ("ser", key.service.as_str()),
                    ],
                    acc,
                );
            }
        }
    }

    if !options.percentiles.is_empty() {
        let ps = &options.percentiles;
        for (name, rollup) in &families.histograms {
            let family = format!("{name}_percentile_per_service");
            out.family(&family, "summary", &format!("Estimated {name} percentiles per service."));
            for (service, acc) in &rollup.per_service {
                out.summary(&family, &[("ser", service.as_str())], acc, ps);
            }

            let family = format!("{name}_percentile_per_region");
            out.family(&family, "summary", &format!("Estimated {name} percentiles per service and region."));
            for (key, acc) in &rollup.per_region {
                out.summary(&family, &[("reg", key.region.as_str()), ("ser", key.service.as_str())], acc, ps);
            }

            let family = format!("{name}_percentile_per_pop");
            out.family(&family, "summary", &format!("Estimated {name} percentiles per service and point of presence."));
            for (key, acc) in &rollup.per_pop {
                out.summary(
                    &family,
                    &[
                        ("pop", key.pop.as_str()),
                        ("reg", key.region.as_str()),
                        ("ser", key.service.as_str()),
                    ],
                    acc,
                    ps,
                );
            }
        }
    }

    out.family("status", "counter", "Responses by status code.");
    out.points("status", Some("code"), &families.status);

    out.family("object_size", "counter", "Responses by object size class.");
    out.points("object_size", Some("size"), &families.object_size);

    out.family("tls", "counter", "Requests by TLS version.");
    out.points("tls", Some("version"), &families.tls);

    out.family("last_recorded", "gauge", "Upstream timestamp of the newest merged sample.");
    for record in records {
        out.sample("last_recorded", &[("ser", record.service.as_str())], record.recorded);
    }

    Ok(out.out)
}

fn with_label<'a>(labels: &[(&'a str, &'a str)], key: &'a str, value: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut all = labels.to_vec();
    all.push((key, value));
    all
}

fn quantile_label(percentile: u32) -> String {
    (f64::from(percentile) / 100.0).to_string()
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}
