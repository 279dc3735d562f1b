use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use snowbot_core::SubscriptionSpec;

use crate::reconcile::{ReconcileError, ReconcileReport, SubscriptionReconciler};
use crate::token::{AuthError, TokenManager};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("startup sequence failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<StartupError>,
    },
}

/// Token acquisition followed by subscription reconciliation.
///
/// The whole sequence is retried with exponential backoff; each attempt
/// starts from a fresh credential.
pub struct StartupSequence {
    tokens: TokenManager,
    reconciler: SubscriptionReconciler,
    desired: Vec<SubscriptionSpec>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl StartupSequence {
    pub fn new(
        tokens: TokenManager,
        reconciler: SubscriptionReconciler,
        desired: Vec<SubscriptionSpec>,
        max_attempts: u32,
    ) -> Self {
        Self {
            tokens,
            reconciler,
            desired,
            max_attempts: max_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub async fn run(&mut self) -> Result<ReconcileReport, StartupError> {
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.attempt().await {
                Ok(report) => {
                    info!(
                        stage = "startup",
                        attempt,
                        deleted = report.deleted,
                        created = report.created,
                        "event subscriptions are in place"
                    );
                    return Ok(report);
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        stage = "startup",
                        attempt,
                        max_attempts = self.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "startup attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    error!(stage = "startup", attempts = attempt, error = %err, "giving up on startup sequence");
                    return Err(StartupError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<ReconcileReport, StartupError> {
        let credential = self.tokens.acquire_credential().await?;
        let report = self.reconciler.reconcile(&credential, &self.desired).await?;
        Ok(report)
    }
}
