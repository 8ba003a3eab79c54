use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "notifier";
const HTTP_DURATION_BUCKETS: [f64; 10] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Installs the global subscriber. `RUST_LOG` wins over `verbose` when both are set.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let default_directive = if verbose {
        "notifier=debug,info"
    } else {
        "notifier=info,info"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    // INFO and more verbose to stdout, WARN and ERROR to stderr.
    let writer = stdout
        .with_min_level(tracing::Level::INFO)
        .or_else(stderr);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    const fn new() -> Self {
        Self {
            service_name: SERVICE_NAME,
        }
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let pid = std::process::id().to_string();
        let metadata = event.metadata();
        let component = metadata.target();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let span_path = current_span_path(ctx);

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", self.service_name);
        push_field(&mut line, "component", component);
        push_field(&mut line, "pid", &pid);

        if let Some(span_path) = span_path {
            push_field(&mut line, "span", &span_path);
        }

        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        if let Some(file) = metadata.file() {
            push_field(&mut line, "file", file);
        }
        if let Some(line_no) = metadata.line() {
            push_field(&mut line, "line", &line_no.to_string());
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

fn current_span_path<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    let span = ctx.lookup_current()?;
    let names: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("."))
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

#[derive(Default)]
pub struct RuntimeCounters {
    fires_total: AtomicU64,
    fires_noop: AtomicU64,
    fires_rejected: AtomicU64,
    sends_ok: AtomicU64,
    sends_failed: AtomicU64,
    chat_updates_handled: AtomicU64,
    chat_updates_failed: AtomicU64,
    panics_recovered: AtomicU64,
    send_failures: SendFailureRegistry,
    http_requests: HttpRequestMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub fires_total: u64,
    pub fires_noop: u64,
    pub fires_rejected: u64,
    pub sends_ok: u64,
    pub sends_failed: u64,
    pub chat_updates_handled: u64,
    pub chat_updates_failed: u64,
    pub panics_recovered: u64,
    pub send_failures_by_event: Vec<(i64, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequestCountSnapshot {
    pub route: String,
    pub status_code: u16,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpDurationSnapshot {
    pub route: String,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpMetricsSnapshot {
    pub requests: Vec<HttpRequestCountSnapshot>,
    pub durations: Vec<HttpDurationSnapshot>,
}

#[derive(Default)]
struct HttpRequestMetrics {
    counts: Mutex<BTreeMap<(String, u16), u64>>,
    durations: Mutex<BTreeMap<String, HttpDurationBuckets>>,
}

impl HttpRequestMetrics {
    fn record(&self, route: &str, status: u16, duration: Duration) {
        {
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            *counts.entry((route.to_string(), status)).or_insert(0) += 1;
        }

        let mut durations = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        durations
            .entry(route.to_string())
            .or_default()
            .observe(duration.as_secs_f64());
    }

    fn snapshot(&self) -> HttpMetricsSnapshot {
        let requests = self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|((route, status), total)| HttpRequestCountSnapshot {
                route: route.clone(),
                status_code: *status,
                total: *total,
            })
            .collect();

        let durations = self
            .durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(route, buckets)| HttpDurationSnapshot {
                route: route.clone(),
                buckets: buckets.histogram(),
                sum: buckets.sum,
                count: buckets.total,
            })
            .collect();

        HttpMetricsSnapshot {
            requests,
            durations,
        }
    }
}

/// Per-bucket counts; `histogram` turns them cumulative.
#[derive(Default)]
struct HttpDurationBuckets {
    counts: [u64; HTTP_DURATION_BUCKETS.len()],
    sum: f64,
    total: u64,
}

impl HttpDurationBuckets {
    fn observe(&mut self, duration_secs: f64) {
        if let Some(idx) = HTTP_DURATION_BUCKETS
            .iter()
            .position(|boundary| duration_secs <= *boundary)
        {
            self.counts[idx] += 1;
        }
        self.sum += duration_secs;
        self.total += 1;
    }

    fn histogram(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0;
        HTTP_DURATION_BUCKETS
            .iter()
            .zip(self.counts.iter())
            .map(|(boundary, count)| {
                cumulative += count;
                (*boundary, cumulative)
            })
            .collect()
    }
}

#[derive(Default)]
struct SendFailureRegistry {
    inner: Mutex<HashMap<i64, u64>>,
}

impl SendFailureRegistry {
    fn record(&self, event_id: i64) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = guard.entry(event_id).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    fn snapshot(&self) -> Vec<(i64, u64)> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(i64, u64)> = guard.iter().map(|(id, total)| (*id, *total)).collect();
        entries.sort_unstable();
        entries
    }
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_fires_total(&self) {
        self.fires_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fires_noop(&self) {
        self.fires_noop.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fires_rejected(&self) {
        self.fires_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_success(&self) {
        self.sends_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self, event_id: i64) {
        self.sends_failed.fetch_add(1, Ordering::Relaxed);
        self.send_failures.record(event_id);
    }

    pub fn record_chat_update(&self, succeeded: bool) {
        if succeeded {
            self.chat_updates_handled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.chat_updates_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_panics_recovered(&self) {
        self.panics_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self, route: &str, status: u16, duration: Duration) {
        self.http_requests.record(route, status, duration);
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_requests.snapshot()
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            fires_total: self.fires_total.load(Ordering::Relaxed),
            fires_noop: self.fires_noop.load(Ordering::Relaxed),
            fires_rejected: self.fires_rejected.load(Ordering::Relaxed),
            sends_ok: self.sends_ok.load(Ordering::Relaxed),
            sends_failed: self.sends_failed.load(Ordering::Relaxed),
            chat_updates_handled: self.chat_updates_handled.load(Ordering::Relaxed),
            chat_updates_failed: self.chat_updates_failed.load(Ordering::Relaxed),
            panics_recovered: self.panics_recovered.load(Ordering::Relaxed),
            send_failures_by_event: self.send_failures.snapshot(),
        }
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}
