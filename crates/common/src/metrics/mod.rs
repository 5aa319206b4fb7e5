//! Metrics and observability utilities
//!
//! Provides Prometheus metric descriptions and recording helpers
//! for every RAG pipeline stage.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all SkinCare RAG metrics
pub const METRICS_PREFIX: &str = "skincare";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00, 30.00,
];

/// Buckets for provider calls (embedding and chat are slower than local work)
pub const PROVIDER_BUCKETS: &[f64] = &[
    0.050, 0.100, 0.250, 0.500, 1.000, 2.000, 5.000, 10.00, 30.00, 60.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Embedding calls, labelled by model and outcome"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding latency including retries"
    );

    describe_counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Retrievals, labelled grounded or fallback"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embed plus search latency"
    );

    describe_histogram!(
        format!("{}_retrieval_retained_chunks", METRICS_PREFIX),
        Unit::Count,
        "Chunks surviving the similarity threshold"
    );

    describe_counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        Unit::Count,
        "Routine generations, labelled by source and outcome"
    );

    describe_counter!(
        format!("{}_generation_reprompts_total", METRICS_PREFIX),
        Unit::Count,
        "Corrective re-prompts after malformed model output"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end routine generation latency"
    );

    describe_counter!(
        format!("{}_chunks_written_total", METRICS_PREFIX),
        Unit::Count,
        "Chunks committed to the vector store"
    );

    describe_counter!(
        format!("{}_chunk_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Chunks that failed to embed or persist"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, retained: usize, sufficient: bool) {
    let path = if sufficient { "grounded" } else { "fallback" };

    counter!(format!("{}_retrievals_total", METRICS_PREFIX), "path" => path).increment(1);

    histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    histogram!(format!("{}_retrieval_retained_chunks", METRICS_PREFIX)).record(retained as f64);
}

/// Helper to record generation metrics
pub fn record_generation(duration_secs: f64, source: &str, reprompts: u32, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "status" => status
    )
    .increment(1);

    if reprompts > 0 {
        counter!(format!("{}_generation_reprompts_total", METRICS_PREFIX)).increment(reprompts as u64);
    }

    histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .record(duration_secs);
}

/// Helper to record embed-run outcomes
pub fn record_chunks(written: usize, failed: usize) {
    counter!(format!("{}_chunks_written_total", METRICS_PREFIX)).increment(written as u64);

    if failed > 0 {
        counter!(format!("{}_chunk_failures_total", METRICS_PREFIX)).increment(failed as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, PROVIDER_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        let metrics = RequestMetrics::start("POST", "/v1/rag/search");
        metrics.finish(200);
        record_embedding(0.12, "text-embedding-3-small", true);
        record_retrieval(0.2, 0, false);
        record_generation(1.5, "rag", 1, true);
        record_chunks(3, 1);
    }
}
