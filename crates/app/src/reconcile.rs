use futures_util::future::join_all;
use metrics::counter;
use thiserror::Error;
use tracing::{error, info, warn};

use snowbot_core::SubscriptionSpec;
use snowbot_twitch::{HelixClient, HelixError, RemoteSubscription};

use crate::token::ServiceCredential;

const MAX_LIST_PAGES: usize = 50;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list existing subscriptions: {0}")]
    List(#[source] HelixError),
    #[error("failed to delete {failed} of {total} subscriptions (first: {id}): {source}")]
    Delete {
        id: String,
        failed: usize,
        total: usize,
        #[source]
        source: HelixError,
    },
    #[error("failed to create {failed} of {total} subscriptions (first: {event_type}): {source}")]
    Create {
        event_type: &'static str,
        failed: usize,
        total: usize,
        #[source]
        source: HelixError,
    },
}

/// Counts of what a successful pass changed remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub deleted: usize,
    pub created: usize,
}

/// Replaces every EventSub subscription of this client id with the desired set.
///
/// Deletes run concurrently and are all awaited before any create is sent.
/// The first failing batch aborts the pass; nothing already changed is rolled back.
#[derive(Clone)]
pub struct SubscriptionReconciler {
    helix: HelixClient,
}

impl SubscriptionReconciler {
    pub fn new(helix: HelixClient) -> Self {
        Self { helix }
    }

    pub async fn reconcile(
        &self,
        credential: &ServiceCredential,
        desired: &[SubscriptionSpec],
    ) -> Result<ReconcileReport, ReconcileError> {
        let result = self.run(credential, desired).await;
        let label = if result.is_ok() { "ok" } else { "error" };
        counter!("reconcile_runs_total", "result" => label).increment(1);
        result
    }

    async fn run(
        &self,
        credential: &ServiceCredential,
        desired: &[SubscriptionSpec],
    ) -> Result<ReconcileReport, ReconcileError> {
        let existing = self.list_all(credential).await?;
        info!(
            stage = "reconcile",
            existing = existing.len(),
            desired = desired.len(),
            "replacing eventsub subscriptions"
        );

        let deleted = self.delete_all(credential, &existing).await?;
        let created = self.create_all(credential, desired).await?;

        info!(stage = "reconcile", deleted, created, "eventsub subscriptions replaced");
        Ok(ReconcileReport { deleted, created })
    }

    async fn list_all(
        &self,
        credential: &ServiceCredential,
    ) -> Result<Vec<RemoteSubscription>, ReconcileError> {
        let mut existing = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page = self
                .helix
                .list_eventsub_subscriptions(credential.access_token(), cursor.as_deref())
                .await
                .map_err(|err| {
                    error!(stage = "reconcile", error = %err, "failed to list subscriptions");
                    ReconcileError::List(err)
                })?;
            existing.extend(page.data);

            match page.cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => return Ok(existing),
            }
        }

        warn!(
            stage = "reconcile",
            pages = MAX_LIST_PAGES,
            "stopped following subscription pages"
        );
        Ok(existing)
    }

    async fn delete_all(
        &self,
        credential: &ServiceCredential,
        existing: &[RemoteSubscription],
    ) -> Result<usize, ReconcileError> {
        if existing.is_empty() {
            return Ok(0);
        }

        let results = join_all(existing.iter().map(|sub| async move {
            let result = self
                .helix
                .delete_eventsub_subscription(credential.access_token(), &sub.id)
                .await;
            (sub, result)
        }))
        .await;

        let total = results.len();
        let mut failures = Vec::new();
        for (sub, result) in results {
            match result {
                Ok(()) => info!(
                    stage = "reconcile",
                    id = %sub.id,
                    kind = %sub.kind,
                    status = %sub.status,
                    managed = sub.event_type().is_some(),
                    "deleted subscription"
                ),
                Err(err) => {
                    error!(stage = "reconcile", id = %sub.id, kind = %sub.kind, error = %err, "failed to delete subscription");
                    failures.push((sub.id.clone(), err));
                }
            }
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            Some((id, source)) => Err(ReconcileError::Delete {
                id,
                failed,
                total,
                source,
            }),
            None => Ok(total),
        }
    }

    async fn create_all(
        &self,
        credential: &ServiceCredential,
        desired: &[SubscriptionSpec],
    ) -> Result<usize, ReconcileError> {
        let results = join_all(desired.iter().map(|spec| async move {
            let result = self
                .helix
                .create_eventsub_subscription(credential.access_token(), spec)
                .await;
            (spec, result)
        }))
        .await;

        let total = results.len();
        let mut failures = Vec::new();
        for (spec, result) in results {
            let event_type = spec.event_type.as_str();
            match result {
                Ok(()) => {
                    info!(stage = "reconcile", event_type, callback = %spec.callback_url, "created subscription")
                }
                Err(err) => {
                    error!(stage = "reconcile", event_type, error = %err, "failed to create subscription");
                    failures.push((event_type, err));
                }
            }
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            Some((event_type, source)) => Err(ReconcileError::Create {
                event_type,
                failed,
                total,
                source,
            }),
            None => Ok(total),
        }
    }
}
