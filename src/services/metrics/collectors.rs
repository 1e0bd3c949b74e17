use std::sync::Arc;

use super::MetricsRegistry;

/// Collector for authentication outcomes
pub struct AuthMetricsCollector {
    metrics: Arc<MetricsRegistry>,
}

impl AuthMetricsCollector {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }

    /// `outcome` is one of success, provisioned, mfa_required,
    /// invalid_credentials, locked.
    pub fn record_login_attempt(&self, outcome: &str) {
        self.metrics
            .login_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_lockout(&self) {
        self.metrics.account_lockouts_total.inc();
    }

    pub fn record_mfa_verification(&self, method: &str, result: &str) {
        self.metrics
            .mfa_verifications_total
            .with_label_values(&[method, result])
            .inc();
    }

    pub fn record_tokens_issued(&self, aal: u8) {
        self.metrics
            .tokens_issued_total
            .with_label_values(&[&aal.to_string()])
            .inc();
    }

    pub fn record_sessions_revoked(&self, reason: &str, count: u64) {
        if count == 0 {
            return;
        }
        self.metrics
            .sessions_revoked_total
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }
}
