use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::services::metrics::MetricsRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailJob {
    Verification { to: String, token: String },
    PasswordReset { to: String, token: String },
    PasswordChanged { to: String },
    Welcome { to: String },
}

impl EmailJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Verification { .. } => "verification",
            Self::PasswordReset { .. } => "password_reset",
            Self::PasswordChanged { .. } => "password_changed",
            Self::Welcome { .. } => "welcome",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Self::Verification { to, .. }
            | Self::PasswordReset { to, .. }
            | Self::PasswordChanged { to }
            | Self::Welcome { to } => to,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, job: &EmailJob) -> Result<(), EmailError>;
}

/// Stands in for SMTP outside production. One-time tokens only appear at
/// debug level.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, job: &EmailJob) -> Result<(), EmailError> {
        tracing::info!(kind = job.kind(), to = job.recipient(), "email sent");
        match job {
            EmailJob::Verification { token, .. } | EmailJob::PasswordReset { token, .. } => {
                tracing::debug!(kind = job.kind(), token, "one-time token");
            }
            _ => {}
        }
        Ok(())
    }
}

/// Bounded queue drained by a small worker pool. `enqueue` never blocks a
/// request: a full queue drops the job with a warning and a metric.
pub struct EmailDispatcher {
    tx: mpsc::Sender<EmailJob>,
    metrics: Arc<MetricsRegistry>,
}

impl EmailDispatcher {
    pub fn start(
        mailer: Arc<dyn Mailer>,
        metrics: Arc<MetricsRegistry>,
        capacity: usize,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        for worker_id in 0..workers {
            let rx = rx.clone();
            let mailer = mailer.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    match mailer.send(&job).await {
                        Ok(()) => {
                            metrics
                                .email_jobs_total
                                .with_label_values(&[job.kind(), "sent"])
                                .inc();
                        }
                        Err(e) => {
                            tracing::warn!(
                                worker_id,
                                kind = job.kind(),
                                error = %e,
                                "email delivery failed"
                            );
                            metrics
                                .email_jobs_total
                                .with_label_values(&[job.kind(), "failed"])
                                .inc();
                        }
                    }
                }
            });
        }

        Self { tx, metrics }
    }

    pub fn enqueue(&self, job: EmailJob) {
        let kind = job.kind();
        match self.tx.try_send(job) {
            Ok(()) => {
                self.metrics
                    .email_jobs_total
                    .with_label_values(&[kind, "queued"])
                    .inc();
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(kind, to = job.recipient(), "email queue full, dropping job");
                self.metrics
                    .email_jobs_total
                    .with_label_values(&[kind, "dropped"])
                    .inc();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(kind, "email workers gone, dropping job");
                self.metrics
                    .email_jobs_total
                    .with_label_values(&[kind, "dropped"])
                    .inc();
            }
        }
    }
}
