use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    // Ledger metrics
    pub static ref RESERVATIONS_TOTAL: IntCounter = IntCounter::new(
        "escrow_reservations_total",
        "Total successful payment-request reservations"
    ).expect("metric can be created");

    pub static ref RESERVATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_reservation_failures_total", "Rejected reservations"),
        &["reason"]
    ).expect("metric can be created");

    pub static ref APPROVALS_TOTAL: IntCounter = IntCounter::new(
        "escrow_approvals_total",
        "Total payment-request approvals"
    ).expect("metric can be created");

    pub static ref REJECTIONS_TOTAL: IntCounter = IntCounter::new(
        "escrow_rejections_total",
        "Total payment-request rejections"
    ).expect("metric can be created");

    pub static ref SETTLEMENTS_WRITTEN: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_settlements_total", "Settlement records written"),
        &["kind"]
    ).expect("metric can be created");

    // Funding metrics
    pub static ref FUNDING_CONFIRMED: IntCounter = IntCounter::new(
        "escrow_funding_confirmed_total",
        "Funding confirmations applied"
    ).expect("metric can be created");

    pub static ref FUNDING_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_funding_failed_total", "Funding confirmations that failed"),
        &["reason"]
    ).expect("metric can be created");

    // Webhook metrics
    pub static ref WEBHOOKS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_webhooks_processed_total", "Webhook deliveries processed"),
        &["provider", "outcome"]
    ).expect("metric can be created");

    pub static ref WEBHOOK_DUPLICATES: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_webhook_duplicates_total", "Deduplicated webhook deliveries"),
        &["provider"]
    ).expect("metric can be created");

    // Settlement worker metrics
    pub static ref JOBS_RETRIED: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_jobs_retried_total", "Settlement jobs re-enqueued after transient failure"),
        &["queue"]
    ).expect("metric can be created");

    pub static ref JOBS_FAILED_TERMINAL: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_jobs_failed_total", "Settlement jobs failed after exhausting retries"),
        &["queue"]
    ).expect("metric can be created");

    pub static ref JOBS_COMPLETED: IntCounterVec = IntCounterVec::new(
        Opts::new("escrow_jobs_completed_total", "Settlement jobs completed"),
        &["queue"]
    ).expect("metric can be created");
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> Result<(), Box<dyn std::error::Error>> {
    registry.register(Box::new(RESERVATIONS_TOTAL.clone()))?;
    registry.register(Box::new(RESERVATION_FAILURES.clone()))?;
    registry.register(Box::new(APPROVALS_TOTAL.clone()))?;
    registry.register(Box::new(REJECTIONS_TOTAL.clone()))?;
    registry.register(Box::new(SETTLEMENTS_WRITTEN.clone()))?;
    registry.register(Box::new(FUNDING_CONFIRMED.clone()))?;
    registry.register(Box::new(FUNDING_FAILED.clone()))?;
    registry.register(Box::new(WEBHOOKS_PROCESSED.clone()))?;
    registry.register(Box::new(WEBHOOK_DUPLICATES.clone()))?;
    registry.register(Box::new(JOBS_RETRIED.clone()))?;
    registry.register(Box::new(JOBS_FAILED_TERMINAL.clone()))?;
    registry.register(Box::new(JOBS_COMPLETED.clone()))?;

    Ok(())
}

/// Generate metrics output in Prometheus text format
pub fn metrics_handler() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let registry = Registry::new();
        let result = register_metrics(&registry);
        assert!(result.is_ok());
    }
}
