use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use super::notifier::{notify_best_effort, Notifier};
use crate::errors::WorkflowError;
use crate::metrics::WorkflowMetrics;
use crate::middleware::identity::Actor;
use crate::models::approval::{ChangeRequest, Decided, Decision, RequestStatus, RequestType};
use crate::models::notification::KIND_EDIT_REQUEST_RESPONSE;
use crate::notification::webhook::{WebhookEvent, WebhookNotifier};
use crate::store::ChangeStore;

/// Outcome of one id in a bulk decision.
#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub request_id: Uuid,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    fn from_result(request_id: Uuid, result: &Result<Decided, WorkflowError>) -> Self {
        match result {
            Ok(decided) => Self {
                request_id,
                ok: true,
                status: Some(decided.request.status),
                code: None,
                error: None,
            },
            Err(e) => Self {
                request_id,
                ok: false,
                status: None,
                code: Some(e.code()),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Turns an admin decision into live-record changes and tells the submitter.
pub struct DecisionApplier {
    store: Arc<dyn ChangeStore>,
    notifier: Arc<dyn Notifier>,
    webhooks: Option<WebhookNotifier>,
    metrics: WorkflowMetrics,
}

impl DecisionApplier {
    pub fn new(
        store: Arc<dyn ChangeStore>,
        notifier: Arc<dyn Notifier>,
        webhooks: Option<WebhookNotifier>,
        metrics: WorkflowMetrics,
    ) -> Self {
        Self {
            store,
            notifier,
            webhooks,
            metrics,
        }
    }

    /// Approve or reject one pending request.
    ///
    /// The live records and the request change together or not at all. The
    /// submitter is notified only after the decision is committed.
    pub async fn decide(
        &self,
        actor: &Actor,
        request_id: Uuid,
        decision: Decision,
        note: Option<&str>,
    ) -> Result<Decided, WorkflowError> {
        let verdict = decision_label(decision);
        if let Err(e) = actor.require_admin() {
            self.metrics.decision(verdict, e.code());
            return Err(e);
        }
        let note = note.map(str::trim).filter(|n| !n.is_empty());

        let decided = match self
            .store
            .apply_decision(request_id, actor.user_id, decision, note)
            .await
        {
            Ok(d) => d,
            Err(e) => {
                self.metrics.decision(verdict, e.code());
                tracing::info!(
                    request_id = %request_id,
                    decision = verdict,
                    admin_id = actor.user_id,
                    error = %e,
                    "decision refused"
                );
                return Err(e);
            }
        };

        self.metrics.decision(verdict, "ok");
        tracing::info!(
            request_id = %request_id,
            user_id = decided.request.user_id,
            decision = verdict,
            admin_id = actor.user_id,
            mutations = decided.mutations,
            skipped = decided.skipped.len(),
            "request decided"
        );

        let request = &decided.request;
        notify_best_effort(
            self.notifier.as_ref(),
            request.user_id,
            KIND_EDIT_REQUEST_RESPONSE,
            &decision_message(request, &actor.display_name),
            Some(&calendar_link(request)),
        )
        .await;

        if let Some(webhooks) = &self.webhooks {
            webhooks.dispatch(WebhookEvent::decision(&decided, &actor.display_name));
        }

        Ok(decided)
    }

    /// Decide several requests, each in its own unit of work. A failure is
    /// reported for its id and never rolls back ids already decided.
    pub async fn decide_many(
        &self,
        actor: &Actor,
        request_ids: &[Uuid],
        decision: Decision,
        note: Option<&str>,
    ) -> Vec<BatchItem> {
        let mut items = Vec::with_capacity(request_ids.len());
        for &id in request_ids {
            let result = self.decide(actor, id, decision, note).await;
            items.push(BatchItem::from_result(id, &result));
        }
        items
    }

    /// Wait up to `limit` for decision webhooks still being delivered.
    /// Short-lived callers run this before the runtime goes away.
    pub async fn flush_webhooks(&self, limit: Duration) -> bool {
        match &self.webhooks {
            Some(webhooks) => webhooks.drain(limit).await,
            None => true,
        }
    }
}

fn decision_label(decision: Decision) -> &'static str {
    match decision {
        Decision::Approve => "approve",
        Decision::Reject => "reject",
    }
}

pub fn decision_message(request: &ChangeRequest, admin_name: &str) -> String {
    let what = match request.request_type {
        RequestType::Edit => "edit",
        RequestType::Delete => "deletion",
    };
    let mut message = format!(
        "Your {} request for {} has been {} by {}",
        what,
        request.target_date,
        request.status.as_str(),
        admin_name
    );
    if let Some(note) = &request.decision_note {
        message.push_str(": ");
        message.push_str(note);
    }
    message
}

pub fn calendar_link(request: &ChangeRequest) -> String {
    format!("/calendar?date={}", request.target_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn request(status: RequestStatus, note: Option<&str>) -> ChangeRequest {
        ChangeRequest {
            id: Uuid::new_v4(),
            user_id: 9,
            target_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            request_type: RequestType::Edit,
            reason: String::new(),
            status,
            decided_by: Some(1),
            decision_note: note.map(str::to_string),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_decision_message() {
        assert_eq!(
            decision_message(&request(RequestStatus::Approved, None), "Ana Admin"),
            "Your edit request for 2024-03-01 has been approved by Ana Admin"
        );
        assert_eq!(
            decision_message(&request(RequestStatus::Rejected, Some("hours look off")), "Ana"),
            "Your edit request for 2024-03-01 has been rejected by Ana: hours look off"
        );
    }

    #[test]
    fn test_calendar_link_points_at_day() {
        assert_eq!(
            calendar_link(&request(RequestStatus::Approved, None)),
            "/calendar?date=2024-03-01"
        );
    }

    #[test]
    fn test_batch_item_reports_error_code() {
        let id = Uuid::new_v4();
        let item = BatchItem::from_result(id, &Err(WorkflowError::AlreadyDecided));
        assert!(!item.ok);
        assert_eq!(item.code, Some("already_decided"));
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("status").is_none());
    }
}
