use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

/// All metrics recorded by the API servers.
#[derive(Clone, Debug)]
pub struct Metrics {
    pub(crate) http: HttpMetrics,
    pub(crate) access: AccessMetrics,
    pub(crate) store: StoreMetrics,
}

#[derive(Clone, Debug)]
pub struct HttpMetrics {
    requests: Family<StatusLabels, Counter>,
    durations: Family<RouteLabels, Histogram>,
}

#[derive(Clone, Debug)]
pub struct AccessMetrics {
    outcomes: Family<OutcomeLabels, Counter>,
}

#[derive(Clone, Debug)]
pub struct StoreMetrics {
    durations: Family<OperationLabels, Histogram>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RouteLabels {
    server: &'static str,
    route: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct StatusLabels {
    server: &'static str,
    route: &'static str,
    status: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OperationLabels {
    operation: &'static str,
}

fn latency_buckets() -> Histogram {
    Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        Self {
            http: HttpMetrics::register(reg.sub_registry_with_prefix("http")),
            access: AccessMetrics::register(reg),
            store: StoreMetrics::register(reg.sub_registry_with_prefix("store")),
        }
    }
}

// === impl HttpMetrics ===

impl HttpMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<StatusLabels, Counter>::default();
        reg.register(
            "requests",
            "Total number of HTTP requests handled by the server",
            requests.clone(),
        );

        let durations = Family::<RouteLabels, Histogram>::new_with_constructor(latency_buckets);
        reg.register_with_unit(
            "request_duration",
            "Histogram of HTTP request latency (seconds)",
            Unit::Seconds,
            durations.clone(),
        );

        Self {
            requests,
            durations,
        }
    }

    pub(crate) fn observe(
        &self,
        server: &'static str,
        route: &'static str,
        status: hyper::StatusCode,
        start: time::Instant,
    ) {
        self.requests
            .get_or_create(&StatusLabels {
                server,
                route,
                status: status.as_u16().to_string(),
            })
            .inc();
        self.durations
            .get_or_create(&RouteLabels { server, route })
            .observe(start.elapsed().as_secs_f64());
    }
}

// === impl AccessMetrics ===

impl AccessMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let outcomes = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "check_access",
            "Total number of access checks by outcome",
            outcomes.clone(),
        );
        Self { outcomes }
    }

    pub(crate) fn authorized(&self) {
        self.inc("authorized");
    }

    pub(crate) fn denied(&self) {
        self.inc("denied");
    }

    pub(crate) fn failed(&self) {
        self.inc("failed");
    }

    fn inc(&self, outcome: &'static str) {
        self.outcomes.get_or_create(&OutcomeLabels { outcome }).inc();
    }
}

// === impl StoreMetrics ===

impl StoreMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let durations = Family::<OperationLabels, Histogram>::new_with_constructor(latency_buckets);
        reg.register_with_unit(
            "operation_duration",
            "Histogram of policy store operation latency (seconds)",
            Unit::Seconds,
            durations.clone(),
        );
        Self { durations }
    }

    /// Runs a store operation, recording how long it took.
    pub(crate) fn time<T>(&self, operation: &'static str, f: impl FnOnce() -> T) -> T {
        let start = time::Instant::now();
        let out = f();
        self.durations
            .get_or_create(&OperationLabels { operation })
            .observe(start.elapsed().as_secs_f64());
        out
    }
}

#[cfg(test)]
impl Metrics {
    pub(crate) fn for_test() -> Self {
        Self::register(&mut Registry::default())
    }
}

#[cfg(test)]
impl AccessMetrics {
    pub(crate) fn count(&self, outcome: &'static str) -> u64 {
        self.outcomes.get_or_create(&OutcomeLabels { outcome }).get()
    }
}
