use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Central metrics registry for the auth service
pub struct MetricsRegistry {
    registry: Registry,

    // HTTP Metrics
    pub http_requests_total: CounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // Login Metrics
    pub login_attempts_total: CounterVec,
    pub account_lockouts_total: Counter,

    // MFA Metrics
    pub mfa_verifications_total: CounterVec,

    // Token / Session Metrics
    pub tokens_issued_total: CounterVec,
    pub sessions_revoked_total: CounterVec,

    // Email Metrics
    pub email_jobs_total: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests").namespace("auth"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration")
                .namespace("auth")
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let login_attempts_total = CounterVec::new(
            Opts::new("login_attempts_total", "Login attempts by outcome").namespace("auth"),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts_total.clone()))?;

        let account_lockouts_total = Counter::with_opts(Opts::new(
            "account_lockouts_total",
            "Accounts locked after repeated failures",
        ).namespace("auth"))?;
        registry.register(Box::new(account_lockouts_total.clone()))?;

        let mfa_verifications_total = CounterVec::new(
            Opts::new("mfa_verifications_total", "MFA verifications by method and result")
                .namespace("auth"),
            &["method", "result"],
        )?;
        registry.register(Box::new(mfa_verifications_total.clone()))?;

        let tokens_issued_total = CounterVec::new(
            Opts::new("tokens_issued_total", "Token pairs issued by assurance level")
                .namespace("auth"),
            &["aal"],
        )?;
        registry.register(Box::new(tokens_issued_total.clone()))?;

        let sessions_revoked_total = CounterVec::new(
            Opts::new("sessions_revoked_total", "Sessions revoked by reason").namespace("auth"),
            &["reason"],
        )?;
        registry.register(Box::new(sessions_revoked_total.clone()))?;

        let email_jobs_total = CounterVec::new(
            Opts::new("email_jobs_total", "Email jobs by kind and result").namespace("auth"),
            &["kind", "result"],
        )?;
        registry.register(Box::new(email_jobs_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            login_attempts_total,
            account_lockouts_total,
            mfa_verifications_total,
            tokens_issued_total,
            sessions_revoked_total,
            email_jobs_total,
        }))
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Get the underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
