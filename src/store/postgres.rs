use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::ChangeStore;
use crate::errors::WorkflowError;
use crate::models::approval::{
    ChangeRequest, Decided, Decision, PendingRequest, RequestStatus, RequestType, UserId,
};
use crate::models::live::{CalendarNote, DailyStatus, NewTimeLog, TimeLog, UserRecord};
use crate::models::mutation::{AvailabilityStatus, MutationKind, StagedMutation};
use crate::models::notification::Notification;
use crate::models::patch::{FieldValue, LogPatch};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Storage shape of a staged mutation; the change itself lives in a JSONB
/// column and is re-validated on the way out.
#[derive(sqlx::FromRow)]
struct MutationRow {
    id: Uuid,
    request_id: Uuid,
    user_id: UserId,
    target_date: NaiveDate,
    log_id: Option<i64>,
    change: Json<MutationKind>,
    reason: String,
    status: RequestStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MutationRow> for StagedMutation {
    fn from(row: MutationRow) -> Self {
        StagedMutation {
            id: row.id,
            request_id: row.request_id,
            user_id: row.user_id,
            target_date: row.target_date,
            log_id: row.log_id,
            change: row.change.0,
            reason: row.reason,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const MUTATION_COLUMNS: &str =
    "id, request_id, user_id, target_date, log_id, change, reason, status, created_at, updated_at";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn insert_log(conn: &mut PgConnection, log: &NewTimeLog) -> Result<TimeLog, sqlx::Error> {
    sqlx::query_as::<_, TimeLog>(
        r#"INSERT INTO time_logs
               (user_id, project_id, page_id, environment_id, issue_id, phase_id,
                generic_category_id, task_type, testing_type, log_date, hours_spent,
                description, is_utilized)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
           RETURNING *"#,
    )
    .bind(log.user_id)
    .bind(log.project_id)
    .bind(log.page_id)
    .bind(log.environment_id)
    .bind(log.issue_id)
    .bind(log.phase_id)
    .bind(log.generic_category_id)
    .bind(&log.task_type)
    .bind(&log.testing_type)
    .bind(log.log_date)
    .bind(log.hours_spent)
    .bind(&log.description)
    .bind(log.is_utilized)
    .fetch_one(&mut *conn)
    .await
}

/// Column-wise UPDATE restricted to the columns named by the patch.
/// Column names come from the `LogColumn` allow-list, values are bound.
async fn update_log(
    conn: &mut PgConnection,
    log_id: i64,
    patch: &LogPatch,
) -> Result<(), sqlx::Error> {
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE time_logs SET ");
    let mut set = qb.separated(", ");
    for (column, value) in patch.iter() {
        set.push(format!("{} = ", column.name()));
        match value {
            FieldValue::Id(v) => set.push_bind_unseparated(*v),
            FieldValue::Hours(h) => set.push_bind_unseparated(*h),
            FieldValue::Text(t) => set.push_bind_unseparated(t.clone()),
            FieldValue::Flag(b) => set.push_bind_unseparated(*b),
        };
    }
    set.push("updated_at = NOW()");
    qb.push(" WHERE id = ").push_bind(log_id);
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

/// Copy one staged mutation onto the live tables.
/// Returns `false` when the targeted live row no longer exists.
async fn apply_mutation(conn: &mut PgConnection, m: &StagedMutation) -> Result<bool, sqlx::Error> {
    match &m.change {
        MutationKind::StatusChange {
            status,
            notes,
            personal_note,
        } => {
            sqlx::query(
                r#"INSERT INTO daily_status (user_id, status_date, status, notes, updated_at)
                   VALUES ($1, $2, $3, $4, NOW())
                   ON CONFLICT (user_id, status_date)
                   DO UPDATE SET status = EXCLUDED.status, notes = EXCLUDED.notes,
                                 updated_at = NOW()"#,
            )
            .bind(m.user_id)
            .bind(m.target_date)
            .bind(*status)
            .bind(notes)
            .execute(&mut *conn)
            .await?;

            if let Some(content) = personal_note.as_deref().filter(|c| !c.is_empty()) {
                sqlx::query(
                    r#"INSERT INTO calendar_notes (user_id, note_date, content)
                       VALUES ($1, $2, $3)
                       ON CONFLICT (user_id, note_date) DO UPDATE SET content = EXCLUDED.content"#,
                )
                .bind(m.user_id)
                .bind(m.target_date)
                .bind(content)
                .execute(&mut *conn)
                .await?;
            }
            Ok(true)
        }
        MutationKind::LogEdit { log_id, patch } => {
            let locked = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM time_logs WHERE id = $1 FOR UPDATE",
            )
            .bind(log_id)
            .fetch_optional(&mut *conn)
            .await?;
            if locked.is_none() {
                return Ok(false);
            }
            update_log(conn, *log_id, patch).await?;
            Ok(true)
        }
        MutationKind::LogDelete { log_id } => {
            let result = sqlx::query("DELETE FROM time_logs WHERE id = $1")
                .bind(log_id)
                .execute(&mut *conn)
                .await?;
            Ok(result.rows_affected() > 0)
        }
        MutationKind::LogCreate { entry } => {
            for row in entry.rows(m.user_id, m.target_date) {
                insert_log(conn, &row).await?;
            }
            Ok(true)
        }
    }
}

#[async_trait]
impl ChangeStore for PgStore {
    // -- Staging --

    async fn stage(
        &self,
        user_id: UserId,
        date: NaiveDate,
        change: MutationKind,
        reason: &str,
    ) -> Result<StagedMutation, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        if let Some(log_id) = change.log_id() {
            let owned = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM time_logs WHERE id = $1 AND user_id = $2 AND log_date = $3",
            )
            .bind(log_id)
            .bind(user_id)
            .bind(date)
            .fetch_optional(&mut *tx)
            .await?;
            if owned.is_none() {
                return Err(WorkflowError::NotFound);
            }
        }

        // Find-or-create the open request; a decided one never matches the
        // partial index, so it stays frozen.
        let request = sqlx::query_as::<_, ChangeRequest>(
            r#"INSERT INTO change_requests (user_id, target_date, request_type, reason)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (user_id, target_date, request_type) WHERE status = 'pending'
               DO UPDATE SET reason = EXCLUDED.reason, updated_at = NOW()
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(date)
        .bind(change.request_type())
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, MutationRow>(&format!(
            r#"INSERT INTO staged_mutations
                   (request_id, user_id, target_date, log_id, kind, change, reason)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {}"#,
            MUTATION_COLUMNS
        ))
        .bind(request.id)
        .bind(user_id)
        .bind(date)
        .bind(change.log_id())
        .bind(change.name())
        .bind(Json(&change))
        .bind(reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                WorkflowError::DuplicatePending
            } else {
                tracing::error!("stage insert failed: {:?}", e);
                e.into()
            }
        })?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn pending_mutations_for(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<StagedMutation>> {
        let rows = sqlx::query_as::<_, MutationRow>(&format!(
            r#"SELECT {} FROM staged_mutations
               WHERE user_id = $1 AND target_date = $2 AND status = 'pending'
               ORDER BY created_at ASC"#,
            MUTATION_COLUMNS
        ))
        .bind(user_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_request_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
        request_type: RequestType,
    ) -> anyhow::Result<Option<RequestStatus>> {
        let status = sqlx::query_scalar::<_, RequestStatus>(
            r#"SELECT status FROM change_requests
               WHERE user_id = $1 AND target_date = $2 AND request_type = $3
               ORDER BY created_at DESC
               LIMIT 1"#,
        )
        .bind(user_id)
        .bind(date)
        .bind(request_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    // -- Queue --

    async fn list_pending_requests(
        &self,
        user_id: Option<UserId>,
    ) -> anyhow::Result<Vec<PendingRequest>> {
        let rows = sqlx::query_as::<_, PendingRequest>(
            r#"SELECT r.*,
                      COALESCE(u.full_name, '') AS full_name,
                      COALESCE(u.username, '') AS username,
                      (SELECT COUNT(*) FROM staged_mutations m
                        WHERE m.request_id = r.id AND m.status = 'pending') AS pending_changes
               FROM change_requests r
               LEFT JOIN users u ON u.id = r.user_id
               WHERE r.status = 'pending' AND ($1::BIGINT IS NULL OR r.user_id = $1)
               ORDER BY r.created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_request(&self, id: Uuid) -> anyhow::Result<Option<ChangeRequest>> {
        let row = sqlx::query_as::<_, ChangeRequest>("SELECT * FROM change_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn mutations_of(&self, request_id: Uuid) -> anyhow::Result<Vec<StagedMutation>> {
        let rows = sqlx::query_as::<_, MutationRow>(&format!(
            "SELECT {} FROM staged_mutations WHERE request_id = $1 ORDER BY created_at ASC",
            MUTATION_COLUMNS
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_decided_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<ChangeRequest>> {
        let rows = sqlx::query_as::<_, ChangeRequest>(
            r#"SELECT * FROM change_requests
               WHERE status <> 'pending' AND updated_at >= $1
               ORDER BY updated_at DESC
               LIMIT $2"#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
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
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, ChangeRequest>(
            "SELECT * FROM change_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(WorkflowError::NotFound)?;

        if request.status.is_terminal() {
            return Err(WorkflowError::AlreadyDecided);
        }

        let mutations: Vec<StagedMutation> = sqlx::query_as::<_, MutationRow>(&format!(
            r#"SELECT {} FROM staged_mutations
               WHERE request_id = $1 AND status = 'pending'
               ORDER BY created_at ASC
               FOR UPDATE"#,
            MUTATION_COLUMNS
        ))
        .bind(request_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

        let mut skipped = Vec::new();
        if decision == Decision::Approve {
            for m in &mutations {
                if !apply_mutation(&mut *tx, m).await? {
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
        sqlx::query(
            r#"UPDATE staged_mutations SET status = $1, updated_at = NOW()
               WHERE request_id = $2 AND status = 'pending'"#,
        )
        .bind(outcome)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        let request = sqlx::query_as::<_, ChangeRequest>(
            r#"UPDATE change_requests
               SET status = $1, decided_by = $2, decision_note = $3, updated_at = NOW()
               WHERE id = $4
               RETURNING *"#,
        )
        .bind(outcome)
        .bind(decided_by)
        .bind(note)
        .bind(request_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Decided {
            request,
            mutations: mutations.len(),
            skipped,
        })
    }

    // -- Users --

    async fn upsert_user(&self, user: &UserRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO users (id, username, full_name, role, is_active)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO UPDATE
               SET username = EXCLUDED.username, full_name = EXCLUDED.full_name,
                   role = EXCLUDED.role, is_active = EXCLUDED.is_active"#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.role)
        .bind(user.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> anyhow::Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRecord>(
            "SELECT id, username, full_name, role, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn active_admin_ids(&self) -> anyhow::Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE is_active AND role IN ('admin', 'super_admin') ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // -- Live records --

    async fn upsert_daily_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
        status: AvailabilityStatus,
        notes: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO daily_status (user_id, status_date, status, notes, updated_at)
               VALUES ($1, $2, $3, $4, NOW())
               ON CONFLICT (user_id, status_date)
               DO UPDATE SET status = EXCLUDED.status, notes = EXCLUDED.notes, updated_at = NOW()"#,
        )
        .bind(user_id)
        .bind(date)
        .bind(status)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_daily_status(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Option<DailyStatus>> {
        let row = sqlx::query_as::<_, DailyStatus>(
            "SELECT * FROM daily_status WHERE user_id = $1 AND status_date = $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_calendar_note(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> anyhow::Result<Option<CalendarNote>> {
        let row = sqlx::query_as::<_, CalendarNote>(
            "SELECT * FROM calendar_notes WHERE user_id = $1 AND note_date = $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_time_log(&self, log: &NewTimeLog) -> anyhow::Result<TimeLog> {
        let mut conn = self.pool.acquire().await?;
        Ok(insert_log(&mut *conn, log).await?)
    }

    async fn get_time_log(&self, id: i64) -> anyhow::Result<Option<TimeLog>> {
        let row = sqlx::query_as::<_, TimeLog>("SELECT * FROM time_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // -- Notifications --

    async fn create_notification(
        &self,
        user_id: UserId,
        kind: &str,
        message: &str,
        link: Option<&str>,
    ) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"INSERT INTO notifications (user_id, kind, message, link)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(message)
        .bind(link)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list_notifications(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"SELECT id, user_id, kind, message, link, is_read, created_at
               FROM notifications
               WHERE user_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_unread_notifications(&self, user_id: UserId) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: UserId) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_notifications_read(&self, user_id: UserId) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE user_id = $1 AND is_read = false",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
