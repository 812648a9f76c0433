//! Prometheus metrics collection.
//!
//! Provides application metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::media::SweepReport;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// Outcome label shared by upload and link counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// HTTP request counter by method/path/status.
    pub http_requests: Family<HttpLabels, Counter>,

    /// HTTP request duration histogram.
    pub http_duration_seconds: Family<HttpLabels, Histogram>,

    /// Upload attempts by outcome.
    pub media_uploads: Family<OutcomeLabels, Counter>,

    /// Bytes of confirmed uploads.
    pub media_upload_bytes: Counter,

    /// Link attempts by outcome.
    pub media_links: Family<OutcomeLabels, Counter>,

    /// Expired records reclaimed by the reaper.
    pub reaper_reclaimed: Counter,

    /// Expired records the reaper could not reclaim.
    pub reaper_failures: Counter,

    /// Reaper sweeps run.
    pub reaper_sweeps: Counter,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register(
            "http_requests_total",
            "Total HTTP requests",
            http_requests.clone(),
        );

        let http_duration_seconds = Family::<HttpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_duration_seconds.clone(),
        );

        let media_uploads = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "media_uploads_total",
            "Media upload attempts by outcome",
            media_uploads.clone(),
        );

        let media_upload_bytes = Counter::default();
        registry.register(
            "media_upload_bytes_total",
            "Total bytes of confirmed uploads",
            media_upload_bytes.clone(),
        );

        let media_links = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "media_links_total",
            "Media link attempts by outcome",
            media_links.clone(),
        );

        let reaper_reclaimed = Counter::default();
        registry.register(
            "media_reaper_reclaimed_total",
            "Expired media reclaimed",
            reaper_reclaimed.clone(),
        );

        let reaper_failures = Counter::default();
        registry.register(
            "media_reaper_failures_total",
            "Expired media the reaper failed to reclaim",
            reaper_failures.clone(),
        );

        let reaper_sweeps = Counter::default();
        registry.register(
            "media_reaper_sweeps_total",
            "Reaper sweeps run",
            reaper_sweeps.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration_seconds,
            media_uploads,
            media_upload_bytes,
            media_links,
            reaper_reclaimed,
            reaper_failures,
            reaper_sweeps,
        }
    }

    /// Record an HTTP request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: normalize_path(path),
            status,
        };

        self.http_requests.get_or_create(&labels).inc();
        self.http_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record an upload attempt. `bytes` is counted only for successes.
    pub fn record_upload(&self, outcome: &str, bytes: u64) {
        self.media_uploads
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
        if outcome == "ok" {
            self.media_upload_bytes.inc_by(bytes);
        }
    }

    /// Record a link attempt.
    pub fn record_link(&self, outcome: &str) {
        self.media_links
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record the result of one reaper sweep.
    pub fn record_sweep(&self, report: &SweepReport) {
        self.reaper_sweeps.inc();
        self.reaper_reclaimed.inc_by(report.reclaimed as u64);
        self.reaper_failures
            .inc_by((report.failed_file + report.failed_db) as u64);
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Panics
    ///
    /// Panics if Prometheus metric encoding to a `String` buffer fails.
    /// The `fmt::Write` impl for `String` is infallible, and all metric
    /// labels use derived `EncodeLabelSet` impls that do not produce
    /// `fmt::Error`.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Prometheus encoding to String buffer is infallible
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

/// Normalize a path for metrics labels.
///
/// Replaces dynamic segments (UUIDs, IDs, stored filenames) with
/// placeholders to limit cardinality.
fn normalize_path(path: &str) -> String {
    if path.strip_prefix("/uploads/").is_some_and(|rest| !rest.is_empty()) {
        return "/uploads/{file}".to_string();
    }

    path.split('/')
        .map(|s| {
            if uuid::Uuid::parse_str(s).is_ok()
                || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            {
                "{id}".to_string()
            } else {
                s.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
