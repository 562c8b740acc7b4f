//! `MetricsSink` contract (§6) and a `prometheus`-backed implementation.
//! Every pipeline stage reports through this trait; `PrometheusMetricsSink`
//! is the only implementation the control-plane app wires up, exposed via
//! `GET /metrics`'s text exposition format.

use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Mutex;

pub trait MetricsSink: Send + Sync {
    fn counter_inc(&self, name: &str, labels: &[(&str, &str)], value: f64);
    fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64);
    fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Lazily registers one `*Vec` per metric name (label sets vary per call
/// site, so the label names are taken from the first registration and must
/// stay consistent for a given metric name — mirroring `prometheus`'s own
/// constraint).
pub struct PrometheusMetricsSink {
    registry: Registry,
    counters: Mutex<HashMap<String, CounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

impl Default for PrometheusMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetricsSink {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    /// Renders every registered metric family in Prometheus text exposition
    /// format, for `GET /metrics`.
    pub fn export(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    fn label_names(labels: &[(&str, &str)]) -> Vec<&str> {
        labels.iter().map(|(k, _)| *k).collect()
    }

    fn label_values<'a>(labels: &'a [(&str, &str)]) -> Vec<&'a str> {
        labels.iter().map(|(_, v)| *v).collect()
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn counter_inc(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let mut counters = self.counters.lock().expect("counters registry poisoned");
        let vec = counters.entry(name.to_string()).or_insert_with(|| {
            let vec = CounterVec::new(Opts::new(name, name), &Self::label_names(labels))
                .expect("invalid counter metric definition");
            let _ = self.registry.register(Box::new(vec.clone()));
            vec
        });
        if let Ok(counter) = vec.get_metric_with_label_values(&Self::label_values(labels)) {
            counter.inc_by(value);
        }
    }

    fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let mut histograms = self.histograms.lock().expect("histograms registry poisoned");
        let vec = histograms.entry(name.to_string()).or_insert_with(|| {
            let vec = HistogramVec::new(prometheus::HistogramOpts::new(name, name), &Self::label_names(labels))
                .expect("invalid histogram metric definition");
            let _ = self.registry.register(Box::new(vec.clone()));
            vec
        });
        if let Ok(histogram) = vec.get_metric_with_label_values(&Self::label_values(labels)) {
            histogram.observe(value);
        }
    }

    fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let mut gauges = self.gauges.lock().expect("gauges registry poisoned");
        let vec = gauges.entry(name.to_string()).or_insert_with(|| {
            let vec = GaugeVec::new(Opts::new(name, name), &Self::label_names(labels))
                .expect("invalid gauge metric definition");
            let _ = self.registry.register(Box::new(vec.clone()));
            vec
        });
        if let Ok(gauge) = vec.get_metric_with_label_values(&Self::label_values(labels)) {
            gauge.set(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_and_exports() {
        let sink = PrometheusMetricsSink::new();
        sink.counter_inc("jobs_processed_total", &[("entity_type", "property")], 1.0);
        sink.counter_inc("jobs_processed_total", &[("entity_type", "property")], 2.0);
        let output = sink.export();
        assert!(output.contains("jobs_processed_total"));
        assert!(output.contains("entity_type=\"property\""));
    }

    #[test]
    fn gauge_set_replaces_value() {
        let sink = PrometheusMetricsSink::new();
        sink.gauge_set("breaker_consecutive_failures", &[("name", "target")], 3.0);
        sink.gauge_set("breaker_consecutive_failures", &[("name", "target")], 0.0);
        let output = sink.export();
        assert!(output.contains("breaker_consecutive_failures{name=\"target\"} 0"));
    }
}
