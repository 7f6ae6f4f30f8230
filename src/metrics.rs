//! Metrics and tracing helpers.
//!
//! With the `metrics` feature, allocation outcomes, retries, query latency and
//! repair results are recorded through OpenTelemetry and exported in the
//! Prometheus text format by [`SeqguardMetrics::render`].

#[cfg(feature = "metrics")]
pub use self::otel::{SeqguardMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<SeqguardMetrics> = Lazy::new(SeqguardMetrics::init);

    pub struct SeqguardMetrics {
        registry: Registry,
        _provider: SdkMeterProvider,
        pub allocations_total: Counter<u64>,
        pub allocation_duration: Histogram<f64>,
        pub allocation_retries: Counter<u64>,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub connection_wait: Histogram<f64>,
        pub repair_rows: Counter<u64>,
    }

    impl SeqguardMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("seqguard");

            let allocations_total = meter
                .u64_counter("seqguard_allocations_total")
                .with_description("Code allocations by outcome")
                .build();
            let allocation_duration = meter
                .f64_histogram("seqguard_allocation_duration_seconds")
                .with_description("Duration of allocation calls")
                .build();
            let allocation_retries = meter
                .u64_counter("seqguard_allocation_retries_total")
                .with_description("Allocation attempts retried after a store failure or duplicate")
                .build();
            let queries_total = meter
                .u64_counter("seqguard_queries_total")
                .with_description("Total queries executed")
                .build();
            let query_errors_total = meter
                .u64_counter("seqguard_query_errors_total")
                .with_description("Queries that returned an error")
                .build();
            let query_duration = meter
                .f64_histogram("seqguard_query_duration_seconds")
                .with_description("Duration of queries")
                .build();
            let connection_wait = meter
                .f64_histogram("seqguard_connection_wait_seconds")
                .with_description("Time spent establishing connections")
                .build();
            let repair_rows = meter
                .u64_counter("seqguard_repair_rows_total")
                .with_description("Rows visited by code repair, by result")
                .build();

            Self {
                registry,
                _provider: provider,
                allocations_total,
                allocation_duration,
                allocation_retries,
                queries_total,
                query_errors_total,
                query_duration,
                connection_wait,
                repair_rows,
            }
        }

        pub fn record_allocation(&self, doc_type: &str, outcome: &'static str, elapsed: Duration) {
            let attrs = [
                KeyValue::new("doc_type", doc_type.to_string()),
                KeyValue::new("outcome", outcome),
            ];
            self.allocations_total.add(1, &attrs);
            self.allocation_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_retry(&self, reason: &'static str) {
            self.allocation_retries.add(1, &[KeyValue::new("reason", reason)]);
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, elapsed: Duration) {
            self.connection_wait.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_repair(&self, table: &str, fixed: u64, failed: u64) {
            self.repair_rows
                .add(fixed, &[KeyValue::new("table", table.to_string()), KeyValue::new("result", "fixed")]);
            self.repair_rows
                .add(failed, &[KeyValue::new("table", table.to_string()), KeyValue::new("result", "failed")]);
        }

        /// Current metrics in the Prometheus text exposition format
        pub fn render(&self) -> String {
            TextEncoder::new()
                .encode_to_string(&self.registry.gather())
                .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    pub fn allocate_span(doc_type: &str, count: u32) -> Span {
        tracing::info_span!("seqguard.allocate", doc_type, count)
    }

    pub fn reserve_span(doc_type: &str, scope: &str) -> Span {
        tracing::debug_span!("seqguard.reserve", doc_type, scope)
    }

    pub fn repair_span(table: &str) -> Span {
        tracing::info_span!("seqguard.repair", table)
    }

    pub fn execute_query_span(query: &str) -> Span {
        tracing::trace_span!("seqguard.query", query)
    }

    pub fn acquire_connection_span() -> Span {
        tracing::debug_span!("seqguard.connect")
    }

    pub fn begin_transaction_span() -> Span {
        tracing::debug_span!("seqguard.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        tracing::debug_span!("seqguard.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        tracing::debug_span!("seqguard.transaction.rollback")
    }
}
