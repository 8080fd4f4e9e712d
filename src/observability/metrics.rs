use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub dispatch_tiers_total: IntCounterVec,
    pub driver_notifications_total: IntCounterVec,
    pub matching_pool_size: IntGaugeVec,
    pub scheduler_tick_seconds: HistogramVec,
    pub overdue_payments_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new(
                "order_transitions_total",
                "Order transition attempts by target status and outcome",
            ),
            &["to", "outcome"],
        )
        .expect("valid order_transitions_total metric");

        let dispatch_tiers_total = IntCounterVec::new(
            Opts::new("dispatch_tiers_total", "Scheduled-order dispatch tiers fired"),
            &["tier"],
        )
        .expect("valid dispatch_tiers_total metric");

        let driver_notifications_total = IntCounterVec::new(
            Opts::new(
                "driver_notifications_total",
                "Driver notifications by outcome",
            ),
            &["outcome"],
        )
        .expect("valid driver_notifications_total metric");

        let matching_pool_size = IntGaugeVec::new(
            Opts::new("matching_pool_size", "Candidates in the matching pool"),
            &["type"],
        )
        .expect("valid matching_pool_size metric");

        let scheduler_tick_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "scheduler_tick_seconds",
                "Duration of background scheduler ticks in seconds",
            ),
            &["task", "outcome"],
        )
        .expect("valid scheduler_tick_seconds metric");

        let overdue_payments_total = IntCounter::new(
            "overdue_payments_total",
            "Orders found waiting on payment past the payment timeout",
        )
        .expect("valid overdue_payments_total metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(dispatch_tiers_total.clone()))
            .expect("register dispatch_tiers_total");
        registry
            .register(Box::new(driver_notifications_total.clone()))
            .expect("register driver_notifications_total");
        registry
            .register(Box::new(matching_pool_size.clone()))
            .expect("register matching_pool_size");
        registry
            .register(Box::new(scheduler_tick_seconds.clone()))
            .expect("register scheduler_tick_seconds");
        registry
            .register(Box::new(overdue_payments_total.clone()))
            .expect("register overdue_payments_total");

        Self {
            registry,
            order_transitions_total,
            dispatch_tiers_total,
            driver_notifications_total,
            matching_pool_size,
            scheduler_tick_seconds,
            overdue_payments_total,
        }
    }

    pub fn record_transition(&self, to: &str, outcome: &str) {
        self.order_transitions_total
            .with_label_values(&[to, outcome])
            .inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
