mod decision_log;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

pub use decision_log::{DecisionLog, DEFAULT_DECISION_FILE};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    requests_total: AtomicU64,
    in_scope_total: AtomicU64,
    fallback_total: AtomicU64,
    unhandled_oos_total: AtomicU64,
    missing_template_total: AtomicU64,
    total_latency_micros: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub in_scope_total: u64,
    pub fallback_total: u64,
    pub unhandled_oos_total: u64,
    pub missing_template_total: u64,
    pub avg_latency_micros: f64,
}

impl PipelineMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_in_scope(&self) {
        self.in_scope_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback(&self) {
        self.fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unhandled_oos(&self) {
        self.unhandled_oos_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_missing_template(&self) {
        self.missing_template_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            in_scope_total: self.in_scope_total.load(Ordering::Relaxed),
            fallback_total: self.fallback_total.load(Ordering::Relaxed),
            unhandled_oos_total: self.unhandled_oos_total.load(Ordering::Relaxed),
            missing_template_total: self.missing_template_total.load(Ordering::Relaxed),
            avg_latency_micros: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,promptgate_pipeline=info,promptgate_api=info,promptgate_config=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_averages_latency_per_request() {
        let metrics = PipelineMetrics::default();
        metrics.inc_request();
        metrics.inc_request();
        metrics.inc_fallback();
        metrics.observe_latency(Duration::from_micros(300));
        metrics.observe_latency(Duration::from_micros(100));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.fallback_total, 1);
        assert_eq!(snapshot.avg_latency_micros, 200.0);
    }

    #[test]
    fn empty_snapshot_has_zero_latency() {
        assert_eq!(PipelineMetrics::default().snapshot().avg_latency_micros, 0.0);
    }
}
