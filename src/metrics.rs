//! In-process latency histograms (p50/p95/p99) for the request path and the
//! deferred telemetry path. Every sample is stored in microseconds; use
//! [`MetricsRegistry::record_ms`] for values measured in milliseconds.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn new(name: &'static str, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }

    /// Finish under a different metric name (e.g. success vs failure).
    pub fn finish_as(self, name: &'static str) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    total: u64,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            total: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
        self.total += 1;
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Stores histograms for all named metrics.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Capacity is the number of recent samples kept per metric (minimum 1).
    pub fn with_capacity(ring_capacity: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            ring_capacity: ring_capacity.max(1),
        }
    }

    /// Record a sample (in microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    /// Record a millisecond value, stored as microseconds like every other sample.
    pub fn record_ms(&self, name: &'static str, value_ms: f64) {
        self.record(name, value_ms * 1000.0);
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    /// Percentile (0-100) in microseconds; 0 for unknown metrics.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        let hists = self.histograms.lock();
        hists.get(name).map(|ring| ring.percentile(p)).unwrap_or(0.0)
    }

    /// Total samples ever recorded for a metric.
    pub fn count(&self, name: &str) -> u64 {
        let hists = self.histograms.lock();
        hists.get(name).map(|ring| ring.total).unwrap_or(0)
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_us: ring.percentile(50.0),
                        p95_us: ring.percentile(95.0),
                        p99_us: ring.percentile(99.0),
                        count: ring.total,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: u64,
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    pub const CACHE_LOOKUP: &str = "cache_lookup";
    pub const CACHE_STORE: &str = "cache_store";
    pub const UPSTREAM_OK: &str = "upstream_ok";
    pub const UPSTREAM_FAILED: &str = "upstream_failed";
    pub const TRANSLATE_HIT: &str = "translate_hit";
    pub const TRANSLATE_MISS: &str = "translate_miss";
    pub const QUEUE_WAIT_DEFERRED: &str = "queue_wait_deferred";
    pub const TELEMETRY_RECORD: &str = "telemetry_record";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let registry = MetricsRegistry::new();
        for v in 1..=100 {
            registry.record("t", v as f64);
        }
        assert_eq!(registry.percentile("t", 50.0), 51.0);
        assert_eq!(registry.percentile("t", 99.0), 99.0);
        assert_eq!(registry.count("t"), 100);
        assert_eq!(registry.percentile("unknown", 50.0), 0.0);
    }

    #[test]
    fn ring_keeps_only_recent_samples_but_counts_all() {
        let registry = MetricsRegistry::with_capacity(4);
        for v in [1000.0, 1000.0, 1.0, 2.0, 3.0, 4.0] {
            registry.record("t", v);
        }
        assert_eq!(registry.percentile("t", 100.0), 4.0);
        let summary = registry.summary();
        assert_eq!(summary["t"].count, 6);
    }

    #[test]
    fn millisecond_samples_are_stored_as_microseconds() {
        let registry = MetricsRegistry::new();
        registry.record_ms(metric_names::TRANSLATE_MISS, 12.5);
        registry.record("t", 12_500.0);
        assert_eq!(registry.percentile(metric_names::TRANSLATE_MISS, 50.0), 12_500.0);
        let summary = registry.summary();
        assert_eq!(
            summary[metric_names::TRANSLATE_MISS].p50_us,
            summary["t"].p50_us
        );
    }

    #[test]
    fn span_records_on_finish() {
        let registry = Arc::new(MetricsRegistry::new());
        let span = registry.span("span");
        span.finish();
        registry.span("span").finish_as("other");
        assert_eq!(registry.count("span"), 1);
        assert_eq!(registry.count("other"), 1);
    }
}
