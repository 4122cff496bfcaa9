//! Prometheus counters for the approval workflow.
//!
//! Kept on a dedicated registry so several app instances (one per test)
//! can coexist in a single process.

use prometheus::{opts, CounterVec, Encoder, Registry, TextEncoder};

#[derive(Clone)]
pub struct WorkflowMetrics {
    registry: Registry,
    submissions_total: CounterVec,
    decisions_total: CounterVec,
}

impl WorkflowMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submissions_total = CounterVec::new(
            opts!("qadesk_submissions_total", "Change submissions by kind and outcome"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(submissions_total.clone()))?;

        let decisions_total = CounterVec::new(
            opts!("qadesk_decisions_total", "Admin decisions by verdict and outcome"),
            &["decision", "outcome"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        Ok(Self {
            registry,
            submissions_total,
            decisions_total,
        })
    }

    /// `outcome` is "ok" or a `WorkflowError::code()`.
    pub fn submission(&self, kind: &str, outcome: &str) {
        self.submissions_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    pub fn decision(&self, decision: &str, outcome: &str) {
        self.decisions_total
            .with_label_values(&[decision, outcome])
            .inc();
    }

    /// Encode the registry as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_text_output() {
        let m = WorkflowMetrics::new().unwrap();
        m.submission("log_edit", "ok");
        m.submission("log_edit", "duplicate_pending");
        m.decision("approve", "ok");

        let out = m.encode();
        assert!(out.contains(r#"qadesk_submissions_total{kind="log_edit",outcome="ok"} 1"#));
        assert!(out.contains(r#"qadesk_decisions_total{decision="approve",outcome="ok"} 1"#));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = WorkflowMetrics::new().unwrap();
        let b = WorkflowMetrics::new().unwrap();
        a.decision("reject", "ok");
        assert!(!b.encode().contains("decision=\"reject\""));
    }
}
