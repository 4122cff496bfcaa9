//! Records owned by the rest of the application that an approved change
//! writes to: day status, personal calendar notes, time logs.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::approval::{ChangeRequest, UserId};
use super::mutation::{AvailabilityStatus, StagedMutation};
use super::patch::{FieldValue, LogColumn, LogPatch};

/// The slice of a user account the workflow needs: who to show in the
/// queue and who to notify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
}

impl UserRecord {
    pub fn is_active_admin(&self) -> bool {
        self.is_active && matches!(self.role.as_str(), "admin" | "super_admin")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyStatus {
    pub user_id: UserId,
    pub status_date: NaiveDate,
    pub status: AvailabilityStatus,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CalendarNote {
    pub user_id: UserId,
    pub note_date: NaiveDate,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeLog {
    pub id: i64,
    pub user_id: UserId,
    pub project_id: i64,
    pub page_id: Option<i64>,
    pub environment_id: Option<i64>,
    pub issue_id: Option<i64>,
    pub phase_id: Option<i64>,
    pub generic_category_id: Option<i64>,
    pub task_type: String,
    pub testing_type: Option<String>,
    pub log_date: NaiveDate,
    pub hours_spent: Decimal,
    pub description: String,
    pub is_utilized: bool,
    pub updated_at: DateTime<Utc>,
}

impl TimeLog {
    /// Overwrite exactly the columns named by the patch.
    pub fn apply_patch(&mut self, patch: &LogPatch) {
        for (column, value) in patch.iter() {
            match (column, value) {
                (LogColumn::ProjectId, FieldValue::Id(Some(id))) => self.project_id = *id,
                (LogColumn::PageId, FieldValue::Id(id)) => self.page_id = *id,
                (LogColumn::EnvironmentId, FieldValue::Id(id)) => self.environment_id = *id,
                (LogColumn::IssueId, FieldValue::Id(id)) => self.issue_id = *id,
                (LogColumn::PhaseId, FieldValue::Id(id)) => self.phase_id = *id,
                (LogColumn::GenericCategoryId, FieldValue::Id(id)) => {
                    self.generic_category_id = *id
                }
                (LogColumn::TaskType, FieldValue::Text(Some(t))) => self.task_type = t.clone(),
                (LogColumn::TestingType, FieldValue::Text(t)) => self.testing_type = t.clone(),
                (LogColumn::HoursSpent, FieldValue::Hours(h)) => self.hours_spent = *h,
                (LogColumn::Description, FieldValue::Text(Some(d))) => {
                    self.description = d.clone()
                }
                (LogColumn::IsUtilized, FieldValue::Flag(b)) => self.is_utilized = *b,
                // LogPatch only pairs a column with its own value shape.
                _ => {}
            }
        }
    }
}

/// A time-log row about to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTimeLog {
    pub user_id: UserId,
    pub project_id: i64,
    pub page_id: Option<i64>,
    pub environment_id: Option<i64>,
    pub issue_id: Option<i64>,
    pub phase_id: Option<i64>,
    pub generic_category_id: Option<i64>,
    pub task_type: String,
    pub testing_type: Option<String>,
    pub log_date: NaiveDate,
    pub hours_spent: Decimal,
    pub description: String,
    pub is_utilized: bool,
}

impl NewTimeLog {
    pub fn into_row(self, id: i64, now: DateTime<Utc>) -> TimeLog {
        TimeLog {
            id,
            user_id: self.user_id,
            project_id: self.project_id,
            page_id: self.page_id,
            environment_id: self.environment_id,
            issue_id: self.issue_id,
            phase_id: self.phase_id,
            generic_category_id: self.generic_category_id,
            task_type: self.task_type,
            testing_type: self.testing_type,
            log_date: self.log_date,
            hours_spent: self.hours_spent,
            description: self.description,
            is_utilized: self.is_utilized,
            updated_at: now,
        }
    }
}

/// What the live side currently holds for a staged mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveSnapshot {
    Day {
        status: Option<DailyStatus>,
        personal_note: Option<CalendarNote>,
    },
    /// `None` when the targeted row has been deleted since submission.
    Log { log: Option<TimeLog> },
    /// Log creations have nothing to compare against.
    Nothing,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationDiff {
    pub mutation: StagedMutation,
    pub current: LiveSnapshot,
}

/// Side-by-side view of a request for the reviewing admin.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDiff {
    pub request: ChangeRequest,
    pub entries: Vec<MutationDiff>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log() -> TimeLog {
        TimeLog {
            id: 1,
            user_id: 9,
            project_id: 3,
            page_id: Some(5),
            environment_id: None,
            issue_id: None,
            phase_id: None,
            generic_category_id: None,
            task_type: "page_testing".into(),
            testing_type: Some("smoke".into()),
            log_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            hours_spent: Decimal::from(8),
            description: "initial pass".into(),
            is_utilized: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_patch_touches_only_named_columns() {
        let before = log();
        let mut after = before.clone();
        let patch =
            LogPatch::from_json(json!({"hours_spent": 6.5, "description": "retest"})).unwrap();
        after.apply_patch(&patch);

        assert_eq!(after.hours_spent, Decimal::new(65, 1));
        assert_eq!(after.description, "retest");
        after.hours_spent = before.hours_spent;
        after.description = before.description.clone();
        assert_eq!(after, before);
    }

    #[test]
    fn test_apply_patch_can_clear_nullable_columns() {
        let mut row = log();
        let patch = LogPatch::from_json(json!({"page_id": null, "testing_type": null})).unwrap();
        row.apply_patch(&patch);
        assert_eq!(row.page_id, None);
        assert_eq!(row.testing_type, None);
    }
}
