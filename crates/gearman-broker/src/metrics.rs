use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Job counters
    pub jobs_submitted_total: IntCounterVec,
    pub jobs_assigned_total: IntCounter,
    pub jobs_finished_total: IntCounterVec,

    // Job gauges
    pub jobs_pending: IntGauge,

    // Connection metrics
    pub workers_connected: IntGauge,
    pub clients_connected: IntGauge,
    pub connection_errors_total: IntCounterVec,

    // Sleep/wake
    pub worker_wakeups_total: IntCounter,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let jobs_submitted_total = IntCounterVec::new(
            Opts::new("gm_jobs_submitted_total", "Jobs submitted by function and mode"),
            &["function", "mode"],
        )?;
        registry.register(Box::new(jobs_submitted_total.clone()))?;

        let jobs_assigned_total =
            IntCounter::new("gm_jobs_assigned_total", "Jobs handed to a worker")?;
        registry.register(Box::new(jobs_assigned_total.clone()))?;

        let jobs_finished_total = IntCounterVec::new(
            Opts::new("gm_jobs_finished_total", "Jobs finished by a worker, by outcome"),
            &["status"],
        )?;
        registry.register(Box::new(jobs_finished_total.clone()))?;

        let jobs_pending = IntGauge::new("gm_jobs_pending", "Jobs waiting for a worker")?;
        registry.register(Box::new(jobs_pending.clone()))?;

        let workers_connected =
            IntGauge::new("gm_workers_connected", "Number of connected workers")?;
        registry.register(Box::new(workers_connected.clone()))?;

        let clients_connected =
            IntGauge::new("gm_clients_connected", "Number of connected clients")?;
        registry.register(Box::new(clients_connected.clone()))?;

        let connection_errors_total = IntCounterVec::new(
            Opts::new("gm_connection_errors_total", "Connections closed by an error, by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(connection_errors_total.clone()))?;

        let worker_wakeups_total =
            IntCounter::new("gm_worker_wakeups_total", "Sleeping workers sent a NOOP")?;
        registry.register(Box::new(worker_wakeups_total.clone()))?;

        Ok(BrokerMetrics {
            registry,
            jobs_submitted_total,
            jobs_assigned_total,
            jobs_finished_total,
            jobs_pending,
            workers_connected,
            clients_connected,
            connection_errors_total,
            worker_wakeups_total,
        })
    }

    /// Increment job submission counter
    pub fn inc_jobs_submitted(&self, function: &str, background: bool) {
        let mode = if background { "background" } else { "foreground" };
        self.jobs_submitted_total
            .with_label_values(&[function, mode])
            .inc();
    }

    pub fn inc_jobs_finished(&self, status: &str) {
        self.jobs_finished_total.with_label_values(&[status]).inc();
    }

    pub fn inc_connection_errors(&self, kind: &str) {
        self.connection_errors_total.with_label_values(&[kind]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
