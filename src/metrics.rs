//! Prometheus metrics for the credential and session store.
//!
//! All metric types use atomics internally (no locks on the hot path), so the
//! store can update them while holding its map locks.
//! The `Metrics` struct is `Clone`-cheap (Arc-based registry + Arc-based collectors).

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// All Prometheus metrics for a store instance.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Credentials --
    pub users: IntGauge,
    pub credential_checks_total: IntCounterVec,

    // -- Sessions --
    pub sessions: IntGauge,
    pub sessions_created_total: IntCounter,
    pub sessions_destroyed_total: IntCounter,
    pub sessions_expired_total: IntCounter,

    // -- Persistence --
    pub flushes_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let users = IntGauge::new("sessionguard_users", "Registered users").unwrap();
        registry.register(Box::new(users.clone())).unwrap();

        let credential_checks_total = IntCounterVec::new(
            Opts::new(
                "sessionguard_credential_checks_total",
                "Credential verifications by result",
            ),
            &["result"],
        )
        .unwrap();
        registry
            .register(Box::new(credential_checks_total.clone()))
            .unwrap();

        let sessions = IntGauge::new("sessionguard_sessions", "Sessions held in memory").unwrap();
        registry.register(Box::new(sessions.clone())).unwrap();

        let sessions_created_total =
            IntCounter::new("sessionguard_sessions_created_total", "Sessions created").unwrap();
        registry
            .register(Box::new(sessions_created_total.clone()))
            .unwrap();

        let sessions_destroyed_total = IntCounter::new(
            "sessionguard_sessions_destroyed_total",
            "Sessions destroyed explicitly or by user removal",
        )
        .unwrap();
        registry
            .register(Box::new(sessions_destroyed_total.clone()))
            .unwrap();

        let sessions_expired_total = IntCounter::new(
            "sessionguard_sessions_expired_total",
            "Expired sessions removed by sweeps",
        )
        .unwrap();
        registry
            .register(Box::new(sessions_expired_total.clone()))
            .unwrap();

        let flushes_total = IntCounterVec::new(
            Opts::new(
                "sessionguard_flushes_total",
                "Snapshot flushes to the persister by result",
            ),
            &["result"],
        )
        .unwrap();
        registry.register(Box::new(flushes_total.clone())).unwrap();

        Self {
            registry,
            users,
            credential_checks_total,
            sessions,
            sessions_created_total,
            sessions_destroyed_total,
            sessions_expired_total,
            flushes_total,
        }
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_metrics() {
        let metrics = Metrics::new();
        metrics.sessions_created_total.inc();
        metrics
            .credential_checks_total
            .with_label_values(&["match"])
            .inc();
        metrics.users.set(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("sessionguard_sessions_created_total 1"));
        assert!(text.contains("sessionguard_credential_checks_total{result=\"match\"} 1"));
        assert!(text.contains("sessionguard_users 3"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.sessions_created_total.inc();
        assert_eq!(a.sessions_created_total.get(), 1);
        assert_eq!(b.sessions_created_total.get(), 0);
    }
}
