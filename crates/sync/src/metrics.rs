//! Subscription hub metrics, registered into the process-wide default
//! `prometheus` registry the `server` crate exposes on `/metrics`.
use std::sync::OnceLock;

use prometheus::{
    register_histogram,
    register_int_counter,
    register_int_gauge,
    Histogram,
    IntCounter,
    IntGauge,
};

fn active_subscriptions() -> &'static IntGauge {
    static METRIC: OnceLock<IntGauge> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_gauge!(
            "sync_active_subscriptions",
            "Number of subscriptions currently registered in the hub"
        )
        .expect("metric registration should not fail")
    })
}

fn pushes_total() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter!("sync_pushes_total", "Total update frames pushed to clients")
            .expect("metric registration should not fail")
    })
}

fn pushes_dropped_total() -> &'static IntCounter {
    static METRIC: OnceLock<IntCounter> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter!(
            "sync_pushes_dropped_total",
            "Update frames dropped because a client's send buffer was full"
        )
        .expect("metric registration should not fail")
    })
}

fn revalidation_seconds() -> &'static Histogram {
    static METRIC: OnceLock<Histogram> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_histogram!(
            "sync_revalidation_seconds",
            "Time to re-execute one subscription's query after a commit"
        )
        .expect("metric registration should not fail")
    })
}

pub fn set_active_subscriptions(count: usize) {
    active_subscriptions().set(count as i64);
}

pub fn record_push() {
    pushes_total().inc();
}

pub fn record_dropped_push() {
    pushes_dropped_total().inc();
}

pub fn time_revalidation() -> prometheus::HistogramTimer {
    revalidation_seconds().start_timer()
}
