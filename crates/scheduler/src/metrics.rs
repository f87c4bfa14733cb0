// crates/scheduler/src/metrics.rs

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub struct SchedulerMetrics {
    pub registry: Registry,
    pub turns_total: IntCounter,
    pub launches_total: IntCounter,
    pub orders_assigned_total: IntCounter,
    pub scenarios_completed_total: IntCounter,
    pub session_errors_total: IntCounterVec,
    pub pending_orders: IntGauge,
    pub available_drones: IntGauge,
    pub decision_seconds: Histogram,
}

impl SchedulerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("scheduler".into()), None)?;

        macro_rules! reg {
            ($m:expr) => {{
                let m = $m;
                registry.register(Box::new(m.clone()))?;
                m
            }};
        }

        Ok(Self {
            turns_total: reg!(IntCounter::new("turns_total", "Turns answered")?),
            launches_total: reg!(IntCounter::new("launches_total", "Drone launches issued")?),
            orders_assigned_total: reg!(IntCounter::new(
                "orders_assigned_total",
                "Orders assigned to a launch"
            )?),
            scenarios_completed_total: reg!(IntCounter::new(
                "scenarios_completed_total",
                "Scenario runs that reached their end"
            )?),
            session_errors_total: reg!(IntCounterVec::new(
                Opts::new("session_errors_total", "Sessions ended by an error"),
                &["kind"]
            )?),
            pending_orders: reg!(IntGauge::new(
                "pending_orders",
                "Pending orders in the last turn"
            )?),
            available_drones: reg!(IntGauge::new(
                "available_drones",
                "Available drones in the last turn"
            )?),
            decision_seconds: reg!(Histogram::with_opts(
                HistogramOpts::new("decision_seconds", "Time spent deciding one turn").buckets(
                    vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
                )
            )?),
            registry,
        })
    }

    pub fn router(&self) -> Router {
        let reg = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let reg = reg.clone();
                async move {
                    let mut buf = Vec::new();
                    match TextEncoder::new().encode(&reg.gather(), &mut buf) {
                        Ok(()) => String::from_utf8_lossy(&buf).into_owned().into_response(),
                        Err(e) => {
                            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
                        }
                    }
                }
            }),
        )
    }

    pub fn record_turn(&self, pending_orders: usize, available_drones: usize) {
        self.turns_total.inc();
        self.pending_orders.set(pending_orders as i64);
        self.available_drones.set(available_drones as i64);
    }

    pub fn record_launches(&self, launches: usize, orders_assigned: usize) {
        self.launches_total.inc_by(launches as u64);
        self.orders_assigned_total.inc_by(orders_assigned as u64);
    }

    pub fn record_error(&self, kind: &str) {
        self.session_errors_total.with_label_values(&[kind]).inc();
    }
}
