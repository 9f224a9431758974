/// Prometheus metrics for the register
///
/// Counters are side signals only: nothing in the pipeline reads them back.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Instant;

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct IngestionLabels {
    /// "true" or "false"
    pub valid: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ValidationLabels {
    /// "valid", "invalid" or "no_record"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CrawlLabels {
    pub status_code: String,
    pub valid: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FetchFailureLabels {
    /// See `FetchError::kind`
    pub kind: String,
}

/// Central metrics collector with Prometheus registry
pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Ingestion requests by validity
    pub ingestions: Family<IngestionLabels, Counter>,

    /// Validator runs by outcome
    pub validations: Family<ValidationLabels, Counter>,

    /// Re-checked registrations by status code and validity
    pub crawls: Family<CrawlLabels, Counter>,

    /// Records written to the record store
    pub records_stored: Counter,

    /// Fetch failures by error kind
    pub fetch_failures: Family<FetchFailureLabels, Counter>,

    /// Wall time of one crawler pass
    pub crawl_pass_duration_seconds: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with all metrics registered
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // The text encoder appends `_total` to counter names.
        let ingestions = Family::<IngestionLabels, Counter>::default();
        registry.register(
            "register_ingestions",
            "Ingestion requests by validity",
            ingestions.clone(),
        );

        let validations = Family::<ValidationLabels, Counter>::default();
        registry.register(
            "register_validations",
            "Validations by outcome",
            validations.clone(),
        );

        let crawls = Family::<CrawlLabels, Counter>::default();
        registry.register(
            "register_crawls",
            "Crawled registrations by status code and validity",
            crawls.clone(),
        );

        let records_stored = Counter::default();
        registry.register(
            "register_records_stored",
            "Records written to the record store",
            records_stored.clone(),
        );

        let fetch_failures = Family::<FetchFailureLabels, Counter>::default();
        registry.register(
            "register_fetch_failures",
            "Fetch failures by kind",
            fetch_failures.clone(),
        );

        // Buckets: 0.5s up to roughly 1.5h
        let crawl_pass_duration_seconds = Histogram::new(exponential_buckets(0.5, 2.5, 10));
        registry.register(
            "register_crawl_pass_duration_seconds",
            "Duration of one crawler pass in seconds",
            crawl_pass_duration_seconds.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            ingestions,
            validations,
            crawls,
            records_stored,
            fetch_failures,
            crawl_pass_duration_seconds,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::warn!(%error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_ingestion(&self, valid: bool) {
        self.ingestions
            .get_or_create(&IngestionLabels {
                valid: valid.to_string(),
            })
            .inc();
    }

    pub fn record_validation(&self, outcome: &str) {
        self.validations
            .get_or_create(&ValidationLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_crawl(&self, status_code: u16, valid: bool) {
        self.crawls
            .get_or_create(&CrawlLabels {
                status_code: status_code.to_string(),
                valid: valid.to_string(),
            })
            .inc();
    }

    pub fn record_stored_record(&self) {
        self.records_stored.inc();
    }

    pub fn record_fetch_failure(&self, kind: &str) {
        self.fetch_failures
            .get_or_create(&FetchFailureLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub fn record_crawl_pass(&self, duration: std::time::Duration) {
        self.crawl_pass_duration_seconds
            .observe(duration.as_secs_f64());
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Times one crawler pass and records it when dropped.
pub struct CrawlPassTimer {
    start: Instant,
}

impl CrawlPassTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for CrawlPassTimer {
    fn drop(&mut self) {
        METRICS.record_crawl_pass(self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        collector.record_stored_record();
        let output = collector.encode();

        assert!(output.contains("register_ingestions"));
        assert!(output.contains("register_validations"));
        assert!(output.contains("register_crawls"));
        assert!(output.contains("register_records_stored_total 1"));
        assert!(output.contains("register_fetch_failures"));
        assert!(output.contains("register_crawl_pass_duration_seconds"));
    }

    #[test]
    fn test_labelled_counters() {
        let collector = MetricsCollector::new();
        collector.record_ingestion(true);
        collector.record_validation("no_record");
        collector.record_crawl(404, false);
        collector.record_fetch_failure("http_error");

        let output = collector.encode();
        assert!(output.contains(r#"register_ingestions_total{valid="true"} 1"#));
        assert!(output.contains(r#"outcome="no_record""#));
        assert!(output.contains(r#"status_code="404""#));
        assert!(output.contains(r#"kind="http_error""#));
    }

    #[test]
    fn test_crawl_pass_timer_records_on_drop() {
        {
            let _timer = CrawlPassTimer::start();
        }
        assert!(METRICS.encode().contains("register_crawl_pass_duration_seconds_count"));
    }
}
