use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct GatewayMetrics {
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    connections_total: AtomicU64,
    connections_registered: AtomicU64,
    presence_broadcasts_total: AtomicU64,
    delivery_failures_total: Mutex<HashMap<String, u64>>,
    seen_events_total: Mutex<HashMap<String, u64>>,
}

const SEEN_OUTCOMES: [&str; 6] =
    ["rejected", "not_found", "store_failed", "notified", "sender_offline", "delivery_failed"];
static GLOBAL_METRICS: OnceLock<Arc<GatewayMetrics>> = OnceLock::new();

impl Default for GatewayMetrics {
    fn default() -> Self {
        let mut seen_events_total = HashMap::new();
        for outcome in SEEN_OUTCOMES {
            seen_events_total.insert(outcome.to_string(), 0);
        }

        Self {
            request_rate_total: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            connections_total: AtomicU64::new(0),
            connections_registered: AtomicU64::new(0),
            presence_broadcasts_total: AtomicU64::new(0),
            delivery_failures_total: Mutex::new(HashMap::new()),
            seen_events_total: Mutex::new(seen_events_total),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<GatewayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

pub fn global_metrics() -> Option<&'static Arc<GatewayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn increment_connections_total() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_connections_total();
    }
}

pub fn set_connections_registered(count: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.set_connections_registered(count);
    }
}

pub fn increment_presence_broadcasts() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_presence_broadcasts();
    }
}

pub fn record_delivery_failure(event: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_delivery_failure(event);
    }
}

pub fn record_seen_outcome(outcome: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_seen_outcome(outcome);
    }
}

impl GatewayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn increment_connections_total(&self) {
        self.connections_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_connections_registered(&self, count: usize) {
        self.connections_registered.store(count as u64, Ordering::SeqCst);
    }

    pub fn increment_presence_broadcasts(&self) {
        self.presence_broadcasts_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_delivery_failure(&self, event: &str) {
        increment_label_counter(&self.delivery_failures_total, event, 1);
    }

    pub fn record_seen_outcome(&self, outcome: &str) {
        let normalized = if SEEN_OUTCOMES.contains(&outcome) { outcome } else { "unknown" };
        increment_label_counter(&self.seen_events_total, normalized, 1);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP gateway_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE gateway_request_rate_total counter\n");
        append_counter_lines(&mut output, "gateway_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP gateway_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE gateway_request_errors_total counter\n");
        append_counter_lines(
            &mut output,
            "gateway_request_errors_total",
            &self.request_errors_total,
        );

        output.push_str("# HELP gateway_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE gateway_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "gateway_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP gateway_connections_total Total duplex connections accepted.\n");
        output.push_str("# TYPE gateway_connections_total counter\n");
        output.push_str(&format!(
            "gateway_connections_total {}\n",
            self.connections_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP gateway_connections_registered Connections currently tracked as online.\n",
        );
        output.push_str("# TYPE gateway_connections_registered gauge\n");
        output.push_str(&format!(
            "gateway_connections_registered {}\n",
            self.connections_registered.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP gateway_presence_broadcasts_total Total presence snapshots fanned out.\n",
        );
        output.push_str("# TYPE gateway_presence_broadcasts_total counter\n");
        output.push_str(&format!(
            "gateway_presence_broadcasts_total {}\n",
            self.presence_broadcasts_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP gateway_delivery_failures_total Outbound events dropped by event name.\n",
        );
        output.push_str("# TYPE gateway_delivery_failures_total counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_delivery_failures_total",
            "event",
            &self.delivery_failures_total,
        );

        output.push_str("# HELP gateway_seen_events_total Seen events processed by outcome.\n");
        output.push_str("# TYPE gateway_seen_events_total counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_seen_events_total",
            "outcome",
            &self.seen_events_total,
        );

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }

    let normalized: Vec<String> = segments
        .into_iter()
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{uuid}".to_string()
            } else if segment.chars().all(|character| character.is_ascii_digit()) {
                "{number}".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();

    format!("/{}", normalized.join("/"))
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
