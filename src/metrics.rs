use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::Duration;

pub use crate::telemetry::{HttpDurationSnapshot, HttpMetricsSnapshot, RuntimeCountersSnapshot};

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.counters.http_metrics_snapshot()
    }

    pub fn inc_fires_total(&self) {
        self.counters.inc_fires_total();
    }

    pub fn inc_fires_noop(&self) {
        self.counters.inc_fires_noop();
    }

    pub fn inc_fires_rejected(&self) {
        self.counters.inc_fires_rejected();
    }

    pub fn record_send(&self, event_id: i64, succeeded: bool) {
        if succeeded {
            self.counters.record_send_success();
        } else {
            self.counters.record_send_failure(event_id);
        }
    }

    pub fn record_chat_update(&self, succeeded: bool) {
        self.counters.record_chat_update(succeeded);
    }

    pub fn inc_panics_recovered(&self) {
        self.counters.inc_panics_recovered();
    }

    pub fn record_http_request(&self, route: &str, status: u16, duration: Duration) {
        self.counters.record_http_request(route, status, duration);
    }

    /// Text exposition served on `GET /metrics`.
    pub fn render_text(&self) -> String {
        render_text(&self.snapshot(), &self.http_metrics_snapshot())
    }
}

pub fn render_text(counters: &RuntimeCountersSnapshot, http: &HttpMetricsSnapshot) -> String {
    let mut out = String::new();

    let plain = [
        ("notifier_fires_total", counters.fires_total),
        ("notifier_fires_noop_total", counters.fires_noop),
        ("notifier_fires_rejected_total", counters.fires_rejected),
        ("notifier_sends_ok_total", counters.sends_ok),
        ("notifier_sends_failed_total", counters.sends_failed),
        ("notifier_chat_updates_handled_total", counters.chat_updates_handled),
        ("notifier_chat_updates_failed_total", counters.chat_updates_failed),
        ("notifier_panics_recovered_total", counters.panics_recovered),
    ];
    for (name, value) in plain {
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }

    if !counters.send_failures_by_event.is_empty() {
        let _ = writeln!(out, "# TYPE notifier_event_send_failures_total counter");
        for (event_id, total) in &counters.send_failures_by_event {
            let _ = writeln!(
                out,
                "notifier_event_send_failures_total{{event_id=\"{event_id}\"}} {total}"
            );
        }
    }

    if !http.requests.is_empty() {
        let _ = writeln!(out, "# TYPE notifier_http_requests_total counter");
        for entry in &http.requests {
            let _ = writeln!(
                out,
                "notifier_http_requests_total{{route=\"{}\",status=\"{}\"}} {}",
                entry.route, entry.status_code, entry.total
            );
        }
    }

    if !http.durations.is_empty() {
        let _ = writeln!(out, "# TYPE notifier_http_request_duration_seconds histogram");
        for entry in &http.durations {
            for (boundary, count) in &entry.buckets {
                let _ = writeln!(
                    out,
                    "notifier_http_request_duration_seconds_bucket{{route=\"{}\",le=\"{boundary}\"}} {count}",
                    entry.route
                );
            }
            let _ = writeln!(
                out,
                "notifier_http_request_duration_seconds_bucket{{route=\"{}\",le=\"+Inf\"}} {}",
                entry.route, entry.count
            );
            let _ = writeln!(
                out,
                "notifier_http_request_duration_seconds_sum{{route=\"{}\"}} {}",
                entry.route, entry.sum
            );
            let _ = writeln!(
                out,
                "notifier_http_request_duration_seconds_count{{route=\"{}\"}} {}",
                entry.route, entry.count
            );
        }
    }

    out
}
