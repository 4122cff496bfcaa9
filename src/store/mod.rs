pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::errors::WorkflowError;
use crate::models::approval::{
    ChangeRequest, Decided, Decision, PendingRequest, RequestStatus, RequestType, UserId,
};
use crate::models::live::{CalendarNote, DailyStatus, NewTimeLog, TimeLog, UserRecord};
use crate::models::mutation::{AvailabilityStatus, MutationKind, StagedMutation};
use crate::models::notification::Notification;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Abstraction over the storage holding change requests, staged mutations
/// and the live records they apply to.
/// Implementations: PgStore (Postgres), MemoryStore (in-process).
///
/// `stage` and `apply_decision` are each a single unit of work: they either
/// commit completely or leave no trace.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    // -- Staging --

    /// Park a validated change under the pending request for
    /// (user, date, type), creating that request if needed.
    ///
    /// Fails with `NotFound` when a row-keyed change names a time log the
    /// user does not own on that date, and with `DuplicatePending` when an
    /// unresolved change already exists for the same key.
    async fn stage(
        &self,
        user_id: UserId,
        date: NaiveDate,
        change: MutationKind,
        reason: &str,
    ) -> Result<StagedMutation, WorkflowError>;

    async fn pending_mutations_for(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<StagedMutation>>;

    /// Status of the most recent request for (user, date, type).
    async fn latest_request_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
        request_type: RequestType,
    ) -> anyhow::Result<Option<RequestStatus>>;

    // -- Queue --

    /// Pending requests, newest first.
    async fn list_pending_requests(
        &self,
        user_id: Option<UserId>,
    ) -> anyhow::Result<Vec<PendingRequest>>;

    async fn get_request(&self, id: Uuid) -> anyhow::Result<Option<ChangeRequest>>;

    /// Every mutation ever filed under a request, oldest first.
    async fn mutations_of(&self, request_id: Uuid) -> anyhow::Result<Vec<StagedMutation>>;

    /// Decided requests updated since `since`, most recent first.
    async fn list_decided_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ChangeRequest>>;

    // -- Decisions --

    /// Lock the request, re-check it is still pending, and either copy its
    /// pending mutations onto the live records (approve) or just close it
    /// (reject).
    async fn apply_decision(
        &self,
        request_id: Uuid,
        decided_by: UserId,
        decision: Decision,
        note: Option<&str>,
    ) -> Result<Decided, WorkflowError>;

    // -- Users --

    async fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()>;

    async fn get_user(&self, id: UserId) -> anyhow::Result<Option<UserRecord>>;

    async fn active_admin_ids(&self) -> anyhow::Result<Vec<UserId>>;

    // -- Live records --

    async fn upsert_daily_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
        status: AvailabilityStatus,
        notes: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn get_daily_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Option<DailyStatus>>;

    async fn get_calendar_note(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Option<CalendarNote>>;

    async fn insert_time_log(&self, log: &NewTimeLog) -> anyhow::Result<TimeLog>;

    async fn get_time_log(&self, id: i64) -> anyhow::Result<Option<TimeLog>>;

    // -- Notifications --

    async fn create_notification(
        &self,
        user_id: UserId,
        kind: &str,
        message: &str,
        link: Option<&str>,
    ) -> anyhow::Result<Uuid>;

    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>>;

    async fn count_unread_notifications(&self, user_id: UserId) -> anyhow::Result<i64>;

    async fn mark_notification_read(&self, id: Uuid, user_id: UserId) -> anyhow::Result<bool>;

    async fn mark_all_notifications_read(&self, user_id: UserId) -> anyhow::Result<u64>;

    /// Cheap liveness probe of the backing storage.
    async fn ping(&self) -> anyhow::Result<()>;
}
