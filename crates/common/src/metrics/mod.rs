//! Metrics and observability utilities
//!
//! Prometheus counters and histograms for the migration and publication
//! pipelines, with standardized naming.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Bibliosync metrics
pub const METRICS_PREFIX: &str = "bibliosync";

/// Buckets for remote metadata fetch latency (in seconds)
pub const FETCH_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Buckets for whole-stage duration (a collection can take hours)
pub const STAGE_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0, 14400.0];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_migrations_total", METRICS_PREFIX),
        Unit::Count,
        "Processing records migrated, by kind and outcome"
    );

    describe_counter!(
        format!("{}_publications_total", METRICS_PREFIX),
        Unit::Count,
        "Publish attempts, by kind, website and outcome"
    );

    describe_counter!(
        format!("{}_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Failure ledger entries, by operation"
    );

    describe_counter!(
        format!("{}_remote_fetches_total", METRICS_PREFIX),
        Unit::Count,
        "Remote metadata source calls"
    );

    describe_counter!(
        format!("{}_ambiguous_remote_responses_total", METRICS_PREFIX),
        Unit::Count,
        "Remote responses with more than one row for a natural key"
    );

    describe_counter!(
        format!("{}_article_tasks_dispatched_total", METRICS_PREFIX),
        Unit::Count,
        "Article publish tasks handed to a dispatcher"
    );

    describe_histogram!(
        format!("{}_remote_fetch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Remote metadata source latency in seconds"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Orchestration stage duration in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Times one orchestration stage (e.g. `migrate_journals`)
pub struct StageTimer {
    start: Instant,
    stage: &'static str,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn finish(self) {
        histogram!(
            format!("{}_stage_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

pub fn record_migration(kind: &str, success: bool) {
    let status = if success { "done" } else { "error" };
    counter!(
        format!("{}_migrations_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "status" => status
    )
    .increment(1);
}

pub fn record_publication(kind: &str, website: &str, status: &str) {
    counter!(
        format!("{}_publications_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "website" => website.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_failure(operation: &str) {
    counter!(
        format!("{}_failures_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Helper to record remote metadata fetch metrics
pub fn record_remote_fetch(endpoint: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_remote_fetches_total", METRICS_PREFIX),
        "endpoint" => endpoint.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_remote_fetch_duration_seconds", METRICS_PREFIX),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_ambiguous_response(endpoint: &str) {
    counter!(
        format!("{}_ambiguous_remote_responses_total", METRICS_PREFIX),
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

pub fn record_article_dispatch(website: &str) {
    counter!(
        format!("{}_article_tasks_dispatched_total", METRICS_PREFIX),
        "website" => website.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [FETCH_BUCKETS, STAGE_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_stage_timer() {
        let timer = StageTimer::start("migrate_journals");
        std::thread::sleep(std::time::Duration::from_millis(5));
        timer.finish();
        // No recorder installed; only checks it does not panic
    }
}
