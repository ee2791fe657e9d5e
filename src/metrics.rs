use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    prompt_cycles_total: IntCounterVec,
    prompt_cycle_duration_seconds: HistogramVec,
    chunks_relayed_total: IntCounterVec,
    active_sessions: IntGauge,
}

pub struct SessionGuard<'a> {
    metrics: &'a RelayMetrics,
}

impl RelayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let prompt_cycles_total = IntCounterVec::new(
            opts!(
                "relay_prompt_cycles_total",
                "Prompt cycles completed by provider and outcome"
            ),
            &["provider", "outcome"],
        )
        .expect("valid prompt_cycles_total metric");

        let prompt_cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "relay_prompt_cycle_duration_seconds",
                "Time from prompt receipt to provider completion in seconds",
            ),
            &["provider"],
        )
        .expect("valid prompt_cycle_duration_seconds metric");

        let chunks_relayed_total = IntCounterVec::new(
            opts!(
                "relay_chunks_relayed_total",
                "Chunks successfully written to clients"
            ),
            &["provider"],
        )
        .expect("valid chunks_relayed_total metric");

        let active_sessions = IntGauge::new(
            "relay_active_sessions",
            "Currently open client sessions",
        )
        .expect("valid active_sessions metric");

        registry
            .register(Box::new(prompt_cycles_total.clone()))
            .expect("register prompt_cycles_total");
        registry
            .register(Box::new(prompt_cycle_duration_seconds.clone()))
            .expect("register prompt_cycle_duration_seconds");
        registry
            .register(Box::new(chunks_relayed_total.clone()))
            .expect("register chunks_relayed_total");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("register active_sessions");

        Self {
            registry,
            prompt_cycles_total,
            prompt_cycle_duration_seconds,
            chunks_relayed_total,
            active_sessions,
        }
    }

    pub fn session_guard(&self) -> SessionGuard<'_> {
        self.active_sessions.inc();
        SessionGuard { metrics: self }
    }

    pub fn observe_cycle(&self, provider: &str, outcome: &str, duration: Duration) {
        self.prompt_cycles_total
            .with_label_values(&[provider, outcome])
            .inc();
        self.prompt_cycle_duration_seconds
            .with_label_values(&[provider])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_chunks(&self, provider: &str, count: usize) {
        self.chunks_relayed_total
            .with_label_values(&[provider])
            .inc_by(count as u64);
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.get()
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.metrics.active_sessions.dec();
    }
}
