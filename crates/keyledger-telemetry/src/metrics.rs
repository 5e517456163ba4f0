//! Prometheus metrics registry.

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

/// Duration histogram buckets (in seconds), 1ms to 10s.
const DURATION_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// HTTP request labels. `route` is the matched route template, never the raw path.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub route: String,
    pub status: u16,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    pub method: String,
    pub route: String,
}

/// Public API call labels. `outcome` is `ok` or the error code.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KeyCheckLabels {
    pub platform: String,
    pub endpoint: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PlatformLabels {
    pub platform: String,
}

/// Metrics registry holding all keyledger metrics.
pub struct MetricsRegistry {
    /// The prometheus-client registry for encoding.
    pub registry: Registry,

    pub http_requests_total: Family<HttpLabels, Counter>,
    pub http_request_duration_seconds: Family<RouteLabels, Histogram>,

    pub key_checks_total: Family<KeyCheckLabels, Counter>,
    pub tokens_consumed_total: Family<PlatformLabels, Counter>,
    pub credits_issued_total: Counter,

    pub active_sessions: Gauge,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Counter names get their `_total` suffix from the encoder.
        let http_requests_total = Family::<HttpLabels, Counter>::default();
        registry.register(
            "keyledger_http_requests",
            "Total number of HTTP requests handled",
            http_requests_total.clone(),
        );

        let http_request_duration_seconds =
            Family::<RouteLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(DURATION_BUCKETS.iter().cloned())
            });
        registry.register(
            "keyledger_http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_request_duration_seconds.clone(),
        );

        let key_checks_total = Family::<KeyCheckLabels, Counter>::default();
        registry.register(
            "keyledger_key_checks",
            "Public credit/use calls by outcome",
            key_checks_total.clone(),
        );

        let tokens_consumed_total = Family::<PlatformLabels, Counter>::default();
        registry.register(
            "keyledger_tokens_consumed",
            "Tokens debited through the use endpoint",
            tokens_consumed_total.clone(),
        );

        let credits_issued_total = Counter::default();
        registry.register(
            "keyledger_credits_issued",
            "Credits created by the admin (top-ups and initial agent credit)",
            credits_issued_total.clone(),
        );

        let active_sessions = Gauge::default();
        registry.register(
            "keyledger_active_sessions",
            "Number of live dashboard sessions",
            active_sessions.clone(),
        );

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            key_checks_total,
            tokens_consumed_total,
            credits_issued_total,
            active_sessions,
        }
    }

    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .get_or_create(&HttpLabels {
                method: method.to_string(),
                route: route.to_string(),
                status,
            })
            .inc();
        self.http_request_duration_seconds
            .get_or_create(&RouteLabels {
                method: method.to_string(),
                route: route.to_string(),
            })
            .observe(duration_secs);
    }

    pub fn record_key_check(&self, platform: &str, endpoint: &str, outcome: &str) {
        self.key_checks_total
            .get_or_create(&KeyCheckLabels {
                platform: platform.to_string(),
                endpoint: endpoint.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_tokens_consumed(&self, platform: &str, tokens: u64) {
        self.tokens_consumed_total
            .get_or_create(&PlatformLabels {
                platform: platform.to_string(),
            })
            .inc_by(tokens);
    }

    pub fn record_credits_issued(&self, credits: u64) {
        self.credits_issued_total.inc_by(credits);
    }

    pub fn set_active_sessions(&self, count: i64) {
        self.active_sessions.set(count);
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
