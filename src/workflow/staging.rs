use std::sync::Arc;

use chrono::NaiveDate;

use super::notifier::{notify_best_effort, Notifier};
use crate::errors::WorkflowError;
use crate::metrics::WorkflowMetrics;
use crate::middleware::identity::Actor;
use crate::models::approval::{RequestStatus, RequestType, UserId};
use crate::models::mutation::{MutationKind, StagedMutation};
use crate::models::notification::KIND_EDIT_REQUEST;
use crate::store::ChangeStore;

pub const ADMIN_QUEUE_LINK: &str = "/admin/edit-requests";

/// Accepts proposed changes from users and parks them until an admin decides.
pub struct Staging {
    store: Arc<dyn ChangeStore>,
    notifier: Arc<dyn Notifier>,
    metrics: WorkflowMetrics,
}

impl Staging {
    pub fn new(
        store: Arc<dyn ChangeStore>,
        notifier: Arc<dyn Notifier>,
        metrics: WorkflowMetrics,
    ) -> Self {
        Self {
            store,
            notifier,
            metrics,
        }
    }

    /// Validate and stage a change to the actor's own `date`, then tell
    /// every active admin about it.
    pub async fn submit(
        &self,
        actor: &Actor,
        date: NaiveDate,
        mut change: MutationKind,
        reason: Option<&str>,
    ) -> Result<StagedMutation, WorkflowError> {
        let kind = change.name();
        let result: Result<StagedMutation, WorkflowError> = async {
            change.validate()?;
            let reason = reason
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| change.default_reason(date));
            self.store.stage(actor.user_id, date, change, &reason).await
        }
        .await;

        match &result {
            Ok(staged) => {
                self.metrics.submission(kind, "ok");
                tracing::info!(
                    user_id = actor.user_id,
                    request_id = %staged.request_id,
                    mutation_id = %staged.id,
                    kind,
                    date = %date,
                    "change staged for approval"
                );
                self.notify_admins(actor, staged).await;
            }
            Err(e) => {
                self.metrics.submission(kind, e.code());
                tracing::debug!(user_id = actor.user_id, kind, error = %e, "submission refused");
            }
        }
        result
    }

    /// The actor's unresolved changes for one day.
    pub async fn list_pending_for(
        &self,
        actor: &Actor,
        date: NaiveDate,
    ) -> Result<Vec<StagedMutation>, WorkflowError> {
        Ok(self.store.pending_mutations_for(actor.user_id, date).await?)
    }

    /// State of the actor's latest request of a type for one day, if any.
    pub async fn request_state(
        &self,
        actor: &Actor,
        date: NaiveDate,
        request_type: RequestType,
    ) -> Result<Option<RequestStatus>, WorkflowError> {
        Ok(self
            .store
            .latest_request_status(actor.user_id, date, request_type)
            .await?)
    }

    async fn notify_admins(&self, actor: &Actor, staged: &StagedMutation) {
        let admins: Vec<UserId> = match self.store.active_admin_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "could not load admins to notify");
                return;
            }
        };
        let message = submission_message(&actor.display_name, staged);
        for admin_id in admins {
            notify_best_effort(
                self.notifier.as_ref(),
                admin_id,
                KIND_EDIT_REQUEST,
                &message,
                Some(ADMIN_QUEUE_LINK),
            )
            .await;
        }
    }
}

pub fn submission_message(name: &str, staged: &StagedMutation) -> String {
    let date = staged.target_date;
    match &staged.change {
        MutationKind::LogEdit { log_id, .. } => format!(
            "{} requested edit approval for time log on {} (Log ID: {})",
            name, date, log_id
        ),
        MutationKind::LogDelete { log_id } => format!(
            "{} requested deletion approval for time log on {} (Log ID: {})",
            name, date, log_id
        ),
        MutationKind::StatusChange { status, .. } => format!(
            "{} requested a status change to '{}' for {}",
            name,
            status.as_str(),
            date
        ),
        MutationKind::LogCreate { entry } => format!(
            "{} requested to add {}h of time logs on {}",
            name, entry.hours, date
        ),
    }
}
