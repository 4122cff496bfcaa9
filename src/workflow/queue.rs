use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::errors::WorkflowError;
use crate::middleware::identity::Actor;
use crate::models::approval::{ChangeRequest, PendingRequest, UserId};
use crate::models::live::{LiveSnapshot, MutationDiff, RequestDiff};
use crate::models::mutation::{MutationKind, StagedMutation};
use crate::store::ChangeStore;

/// Read-only admin view over pending and recently decided requests.
pub struct ApprovalQueue {
    store: Arc<dyn ChangeStore>,
}

impl ApprovalQueue {
    pub fn new(store: Arc<dyn ChangeStore>) -> Self {
        Self { store }
    }

    /// Pending requests with submitter details, newest first.
    pub async fn list_pending(
        &self,
        actor: &Actor,
        user_id: Option<UserId>,
    ) -> Result<Vec<PendingRequest>, WorkflowError> {
        actor.require_admin()?;
        Ok(self.store.list_pending_requests(user_id).await?)
    }

    /// Every mutation of a request next to the live data it would overwrite.
    pub async fn get_diff(
        &self,
        actor: &Actor,
        request_id: Uuid,
    ) -> Result<RequestDiff, WorkflowError> {
        actor.require_admin()?;
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or(WorkflowError::NotFound)?;

        let mut entries = Vec::new();
        for mutation in self.store.mutations_of(request_id).await? {
            let current = self.snapshot(&mutation).await?;
            entries.push(MutationDiff { mutation, current });
        }
        Ok(RequestDiff { request, entries })
    }

    /// Requests decided within the last `days`, most recent first.
    pub async fn list_recent(
        &self,
        actor: &Actor,
        days: i64,
        limit: i64,
    ) -> Result<Vec<ChangeRequest>, WorkflowError> {
        actor.require_admin()?;
        let since = Utc::now() - Duration::days(days.max(0));
        Ok(self.store.list_decided_since(since, limit).await?)
    }

    async fn snapshot(&self, mutation: &StagedMutation) -> anyhow::Result<LiveSnapshot> {
        Ok(match &mutation.change {
            MutationKind::StatusChange { .. } => LiveSnapshot::Day {
                status: self
                    .store
                    .get_daily_status(mutation.user_id, mutation.target_date)
                    .await?,
                personal_note: self
                    .store
                    .get_calendar_note(mutation.user_id, mutation.target_date)
                    .await?,
            },
            MutationKind::LogEdit { log_id, .. } | MutationKind::LogDelete { log_id } => {
                LiveSnapshot::Log {
                    log: self.store.get_time_log(*log_id).await?,
                }
            }
            MutationKind::LogCreate { .. } => LiveSnapshot::Nothing,
        })
    }
}
