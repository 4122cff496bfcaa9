//! In-process `ChangeStore` used by tests, demos and `serve --memory`.
//!
//! One async mutex guards the whole state, so every trait call is a single
//! atomic unit of work.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ChangeStore;
use crate::errors::WorkflowError;
use crate::models::approval::{
    ChangeRequest, Decided, Decision, PendingRequest, RequestStatus, RequestType, UserId,
};
use crate::models::live::{CalendarNote, DailyStatus, NewTimeLog, TimeLog, UserRecord};
use crate::models::mutation::{AvailabilityStatus, MutationKind, StagedMutation};
use crate::models::notification::Notification;

#[derive(Default)]
struct State {
    users: BTreeMap<UserId, UserRecord>,
    requests: HashMap<Uuid, ChangeRequest>,
    mutations: Vec<StagedMutation>,
    daily_status: HashMap<(UserId, NaiveDate), DailyStatus>,
    calendar_notes: HashMap<(UserId, NaiveDate), CalendarNote>,
    time_logs: BTreeMap<i64, TimeLog>,
    next_log_id: i64,
    notifications: Vec<Notification>,
}

impl State {
    fn insert_log(&mut self, log: NewTimeLog, now: DateTime<Utc>) -> TimeLog {
        self.next_log_id += 1;
        let row = log.into_row(self.next_log_id, now);
        self.time_logs.insert(row.id, row.clone());
        row
    }

    fn upsert_status(
        &mut self,
        user_id: UserId,
        date: NaiveDate,
        status: AvailabilityStatus,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.daily_status.insert(
            (user_id, date),
            DailyStatus {
                user_id,
                status_date: date,
                status,
                notes,
                updated_at: now,
            },
        );
    }

    /// Returns `false` when the targeted live row no longer exists.
    fn apply(&mut self, m: &StagedMutation, now: DateTime<Utc>) -> bool {
        match &m.change {
            MutationKind::StatusChange {
                status,
                notes,
                personal_note,
            } => {
                self.upsert_status(m.user_id, m.target_date, *status, notes.clone(), now);
                if let Some(content) = personal_note.as_ref().filter(|c| !c.is_empty()) {
                    self.calendar_notes.insert(
                        (m.user_id, m.target_date),
                        CalendarNote {
                            user_id: m.user_id,
                            note_date: m.target_date,
                            content: content.clone(),
                        },
                    );
                }
                true
            }
            MutationKind::LogEdit { log_id, patch } => match self.time_logs.get_mut(log_id) {
                Some(row) => {
                    row.apply_patch(patch);
                    row.updated_at = now;
                    true
                }
                None => false,
            },
            MutationKind::LogDelete { log_id } => self.time_logs.remove(log_id).is_some(),
            MutationKind::LogCreate { entry } => {
                for row in entry.rows(m.user_id, m.target_date) {
                    self.insert_log(row, now);
                }
                true
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeStore for MemoryStore {
    // -- Staging --

    async fn stage(
        &self,
        user_id: UserId,
        date: NaiveDate,
        change: MutationKind,
        reason: &str,
    ) -> Result<StagedMutation, WorkflowError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(log_id) = change.log_id() {
            let owned = state
                .time_logs
                .get(&log_id)
                .is_some_and(|l| l.user_id == user_id && l.log_date == date);
            if !owned {
                return Err(WorkflowError::NotFound);
            }
        }

        if state
            .mutations
            .iter()
            .any(|m| m.status == RequestStatus::Pending && m.same_key(user_id, date, &change))
        {
            return Err(WorkflowError::DuplicatePending);
        }

        let request_type = change.request_type();
        let open = state.requests.values_mut().find(|r| {
            r.user_id == user_id
                && r.target_date == date
                && r.request_type == request_type
                && r.status == RequestStatus::Pending
        });
        let request_id = match open {
            Some(request) => {
                request.reason = reason.to_string();
                request.updated_at = now;
                request.id
            }
            None => {
                let request = ChangeRequest {
                    id: Uuid::new_v4(),
                    user_id,
                    target_date: date,
                    request_type,
                    reason: reason.to_string(),
                    status: RequestStatus::Pending,
                    decided_by: None,
                    decision_note: None,
                    created_at: now,
                    updated_at: now,
                };
                let id = request.id;
                state.requests.insert(id, request);
                id
            }
        };

        let staged = StagedMutation {
            id: Uuid::new_v4(),
            request_id,
            user_id,
            target_date: date,
            log_id: change.log_id(),
            change,
            reason: reason.to_string(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.mutations.push(staged.clone());
        Ok(staged)
    }

    async fn pending_mutations_for(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<StagedMutation>> {
        let state = self.state.lock().await;
        Ok(state
            .mutations
            .iter()
            .filter(|m| {
                m.user_id == user_id && m.target_date == date && m.status == RequestStatus::Pending
            })
            .cloned()
            .collect())
    }

    async fn latest_request_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
        request_type: RequestType,
    ) -> anyhow::Result<Option<RequestStatus>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .filter(|r| {
                r.user_id == user_id && r.target_date == date && r.request_type == request_type
            })
            .max_by_key(|r| r.created_at)
            .map(|r| r.status))
    }

    // -- Queue --

    async fn list_pending_requests(
        &self,
        user_id: Option<UserId>,
    ) -> anyhow::Result<Vec<PendingRequest>> {
        let state = self.state.lock().await;
        let mut rows: Vec<PendingRequest> = state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .map(|r| {
                let user = state.users.get(&r.user_id);
                PendingRequest {
                    request: r.clone(),
                    full_name: user.map(|u| u.full_name.clone()).unwrap_or_default(),
                    username: user.map(|u| u.username.clone()).unwrap_or_default(),
                    pending_changes: state
                        .mutations
                        .iter()
                        .filter(|m| m.request_id == r.id && m.status == RequestStatus::Pending)
                        .count() as i64,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.request.created_at.cmp(&a.request.created_at));
        Ok(rows)
    }

    async fn get_request(&self, id: Uuid) -> anyhow::Result<Option<ChangeRequest>> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn mutations_of(&self, request_id: Uuid) -> anyhow::Result<Vec<StagedMutation>> {
        let state = self.state.lock().await;
        Ok(state
            .mutations
            .iter()
            .filter(|m| m.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn list_decided_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ChangeRequest>> {
        let state = self.state.lock().await;
        let mut rows: Vec<ChangeRequest> = state
            .requests
            .values()
            .filter(|r| r.status.is_terminal() && r.updated_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    // -- Decisions --

    async fn apply_decision(
        &self,
        request_id: Uuid,
        decided_by: UserId,
        decision: Decision,
        note: Option<&str>,
    ) -> Result<Decided, WorkflowError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        match state.requests.get(&request_id) {
            None => return Err(WorkflowError::NotFound),
            Some(r) if r.status.is_terminal() => return Err(WorkflowError::AlreadyDecided),
            Some(_) => {}
        }

        let pending: Vec<StagedMutation> = state
            .mutations
            .iter()
            .filter(|m| m.request_id == request_id && m.status == RequestStatus::Pending)
            .cloned()
            .collect();

        let mut skipped = Vec::new();
        if decision == Decision::Approve {
            for m in &pending {
                if !state.apply(m, now) {
                    tracing::warn!(
                        request_id = %request_id,
                        mutation_id = %m.id,
                        log_id = ?m.log_id,
                        "live time log vanished before approval, skipping"
                    );
                    skipped.push(m.id);
                }
            }
        }

        let outcome = decision.outcome();
        for m in state
            .mutations
            .iter_mut()
            .filter(|m| m.request_id == request_id && m.status == RequestStatus::Pending)
        {
            m.status = outcome;
            m.updated_at = now;
        }

        let request = state
            .requests
            .get_mut(&request_id)
            .ok_or(WorkflowError::NotFound)?;
        request.status = outcome;
        request.decided_by = Some(decided_by);
        request.decision_note = note.map(str::to_string);
        request.updated_at = now;

        Ok(Decided {
            request: request.clone(),
            mutations: pending.len(),
            skipped,
        })
    }

    // -- Users --

    async fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()> {
        self.state.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> anyhow::Result<Option<UserRecord>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn active_admin_ids(&self) -> anyhow::Result<Vec<UserId>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .filter(|u| u.is_active_admin())
            .map(|u| u.id)
            .collect())
    }

    // -- Live records --

    async fn upsert_daily_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
        status: AvailabilityStatus,
        notes: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.upsert_status(user_id, date, status, notes.map(str::to_string), Utc::now());
        Ok(())
    }

    async fn get_daily_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Option<DailyStatus>> {
        Ok(self.state.lock().await.daily_status.get(&(user_id, date)).cloned())
    }

    async fn get_calendar_note(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Option<CalendarNote>> {
        Ok(self.state.lock().await.calendar_notes.get(&(user_id, date)).cloned())
    }

    async fn insert_time_log(&self, log: &NewTimeLog) -> anyhow::Result<TimeLog> {
        let mut state = self.state.lock().await;
        Ok(state.insert_log(log.clone(), Utc::now()))
    }

    async fn get_time_log(&self, id: i64) -> anyhow::Result<Option<TimeLog>> {
        Ok(self.state.lock().await.time_logs.get(&id).cloned())
    }

    // -- Notifications --

    async fn create_notification(
        &self,
        user_id: UserId,
        kind: &str,
        message: &str,
        link: Option<&str>,
    ) -> anyhow::Result<Uuid> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            message: message.to_string(),
            link: link.map(str::to_string),
            is_read: false,
            created_at: Utc::now(),
        };
        let id = notification.id;
        self.state.lock().await.notifications.push(notification);
        Ok(id)
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_unread_notifications(&self, user_id: UserId) -> anyhow::Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as i64)
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: UserId) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_notifications_read(&self, user_id: UserId) -> anyhow::Result<u64> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for n in state
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            n.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
