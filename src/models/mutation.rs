use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::{RequestStatus, RequestType, UserId};
use super::live::NewTimeLog;
use super::patch::{check_hours, normalize_task_type, InvalidField, LogPatch};

/// Availability keys a day can be marked with.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum AvailabilityStatus {
    NotUpdated,
    Available,
    Working,
    Busy,
    OnLeave,
    SickLeave,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::NotUpdated => "not_updated",
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Working => "working",
            AvailabilityStatus::Busy => "busy",
            AvailabilityStatus::OnLeave => "on_leave",
            AvailabilityStatus::SickLeave => "sick_leave",
        }
    }
}

/// A time log the user wants added to a past day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub project_id: i64,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub page_ids: Vec<i64>,
    #[serde(default)]
    pub environment_id: Option<i64>,
    #[serde(default)]
    pub issue_id: Option<i64>,
    #[serde(default)]
    pub testing_type: Option<String>,
    pub hours: Decimal,
    pub description: String,
    #[serde(default = "default_utilized")]
    pub is_utilized: bool,
}

fn default_task_type() -> String {
    "other".to_string()
}

fn default_utilized() -> bool {
    true
}

impl NewLogEntry {
    fn validate(&mut self) -> Result<(), InvalidField> {
        if self.project_id <= 0 {
            return Err(InvalidField("project_id must be a positive integer".into()));
        }
        if self.page_ids.iter().any(|p| *p <= 0) {
            return Err(InvalidField("page_ids must be positive integers".into()));
        }
        self.task_type = normalize_task_type(&self.task_type)?;
        self.hours = check_hours(self.hours)?;
        if !self.page_ids.is_empty()
            && self.hours < Decimal::new(1, 2) * Decimal::from(self.page_ids.len() as i64)
        {
            return Err(InvalidField(format!(
                "{} hours cannot be split across {} pages",
                self.hours,
                self.page_ids.len()
            )));
        }
        self.description = self.description.trim().to_string();
        if self.description.is_empty() {
            return Err(InvalidField("description cannot be empty".into()));
        }
        self.testing_type = self
            .testing_type
            .take()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(())
    }

    /// Live rows this entry expands to: one per page, hours split evenly,
    /// or a single page-less row. Shares are truncated to hundredths and the
    /// last page takes the remainder, so the rows always sum to `hours`.
    pub fn rows(&self, user_id: UserId, log_date: NaiveDate) -> Vec<NewTimeLog> {
        let row = |page_id: Option<i64>, hours: Decimal| NewTimeLog {
            user_id,
            project_id: self.project_id,
            page_id,
            environment_id: self.environment_id,
            issue_id: self.issue_id,
            phase_id: None,
            generic_category_id: None,
            task_type: self.task_type.clone(),
            testing_type: self.testing_type.clone(),
            log_date,
            hours_spent: hours,
            description: self.description.clone(),
            is_utilized: self.is_utilized,
        };

        if self.page_ids.is_empty() {
            return vec![row(None, self.hours)];
        }
        let pages = Decimal::from(self.page_ids.len() as i64);
        let share = (self.hours / pages).round_dp_with_strategy(2, RoundingStrategy::ToZero);
        let last = self.hours - share * (pages - Decimal::ONE);
        let (tail, head) = match self.page_ids.split_last() {
            Some(split) => split,
            None => return Vec::new(),
        };
        head.iter()
            .map(|p| row(Some(*p), share))
            .chain(std::iter::once(row(Some(*tail), last)))
            .collect()
    }
}

/// The concrete change a user proposes, one variant per staging shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationKind {
    /// Whole-day availability status, day notes and personal note.
    StatusChange {
        status: AvailabilityStatus,
        #[serde(default)]
        notes: Option<String>,
        #[serde(default)]
        personal_note: Option<String>,
    },
    LogEdit { log_id: i64, patch: LogPatch },
    LogDelete { log_id: i64 },
    LogCreate { entry: NewLogEntry },
}

impl MutationKind {
    pub fn name(&self) -> &'static str {
        match self {
            MutationKind::StatusChange { .. } => "status_change",
            MutationKind::LogEdit { .. } => "log_edit",
            MutationKind::LogDelete { .. } => "log_delete",
            MutationKind::LogCreate { .. } => "log_create",
        }
    }

    /// Live time-log row this change targets, if any.
    pub fn log_id(&self) -> Option<i64> {
        match self {
            MutationKind::LogEdit { log_id, .. } | MutationKind::LogDelete { log_id } => {
                Some(*log_id)
            }
            _ => None,
        }
    }

    /// Which request bucket the change is filed under.
    pub fn request_type(&self) -> RequestType {
        match self {
            MutationKind::LogDelete { .. } => RequestType::Delete,
            _ => RequestType::Edit,
        }
    }

    /// Check and normalize user input in place.
    pub fn validate(&mut self) -> Result<(), InvalidField> {
        match self {
            MutationKind::StatusChange { notes, personal_note, .. } => {
                *notes = notes.take().map(|n| n.trim().to_string());
                *personal_note = personal_note
                    .take()
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty());
                Ok(())
            }
            MutationKind::LogEdit { log_id, patch } => {
                if *log_id <= 0 {
                    return Err(InvalidField("log_id must be a positive integer".into()));
                }
                if patch.is_empty() {
                    return Err(InvalidField("patch must change at least one field".into()));
                }
                Ok(())
            }
            MutationKind::LogDelete { log_id } => {
                if *log_id <= 0 {
                    return Err(InvalidField("log_id must be a positive integer".into()));
                }
                Ok(())
            }
            MutationKind::LogCreate { entry } => entry.validate(),
        }
    }

    /// Default request reason when the user gives none.
    pub fn default_reason(&self, date: NaiveDate) -> String {
        match self {
            MutationKind::StatusChange { .. } => format!("Status change request for {}", date),
            MutationKind::LogEdit { log_id, .. } => {
                format!("Edit request for time log ID {}", log_id)
            }
            MutationKind::LogDelete { log_id } => {
                format!("Deletion request for time log ID {}", log_id)
            }
            MutationKind::LogCreate { .. } => format!("Time log edit request for date {}", date),
        }
    }
}

/// A proposed change parked until an admin decides on its request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedMutation {
    pub id: Uuid,
    pub request_id: Uuid,
    pub user_id: UserId,
    pub target_date: NaiveDate,
    pub log_id: Option<i64>,
    pub change: MutationKind,
    pub reason: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StagedMutation {
    /// Two pending mutations collide when they target the same live row,
    /// or when both rewrite the same day's status.
    pub fn same_key(&self, user_id: UserId, date: NaiveDate, change: &MutationKind) -> bool {
        if self.user_id != user_id {
            return false;
        }
        match (self.log_id, change.log_id()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                matches!(self.change, MutationKind::StatusChange { .. })
                    && matches!(change, MutationKind::StatusChange { .. })
                    && self.target_date == date
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(pages: Vec<i64>, hours: Decimal) -> NewLogEntry {
        NewLogEntry {
            project_id: 4,
            task_type: "page_qa".into(),
            page_ids: pages,
            environment_id: Some(2),
            issue_id: None,
            testing_type: Some("  ".into()),
            hours,
            description: " smoke run ".into(),
            is_utilized: true,
        }
    }

    #[test]
    fn test_log_create_splits_hours_across_pages() {
        let mut change = MutationKind::LogCreate {
            entry: entry(vec![10, 11, 12], Decimal::from(4)),
        };
        change.validate().unwrap();
        let MutationKind::LogCreate { entry } = change else { unreachable!() };
        assert_eq!(entry.task_type, "page_testing");
        assert_eq!(entry.testing_type, None);
        assert_eq!(entry.description, "smoke run");

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let rows = entry.rows(9, date);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].hours_spent, Decimal::new(133, 2));
        assert_eq!(rows[1].hours_spent, Decimal::new(133, 2));
        assert_eq!(rows[2].hours_spent, Decimal::new(134, 2));
        assert_eq!(rows[1].page_id, Some(11));
        assert_eq!(rows[2].page_id, Some(12));
    }

    #[test]
    fn test_log_create_split_preserves_total() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        for (hours, pages) in [
            (Decimal::from(10), vec![1, 2, 3]),
            (Decimal::new(1, 1), vec![1, 2, 3, 4, 5, 6]),
            (Decimal::new(3, 2), vec![1, 2, 3]),
            (Decimal::new(2375, 2), vec![1, 2, 3, 4, 5, 6, 7]),
        ] {
            let rows = entry(pages, hours).rows(9, date);
            let total: Decimal = rows.iter().map(|r| r.hours_spent).sum();
            assert_eq!(total, hours);
            assert!(rows.iter().all(|r| r.hours_spent > Decimal::ZERO));
            assert!(rows.iter().all(|r| r.hours_spent.normalize().scale() <= 2));
        }
    }

    #[test]
    fn test_log_create_rejects_share_below_a_hundredth() {
        let mut change = MutationKind::LogCreate {
            entry: entry(vec![1, 2, 3], Decimal::new(1, 2)),
        };
        let err = change.validate().unwrap_err();
        assert!(err.0.contains("3 pages"));

        let mut change = MutationKind::LogCreate {
            entry: entry(vec![1, 2, 3], Decimal::new(3, 2)),
        };
        assert!(change.validate().is_ok());
    }

    #[test]
    fn test_log_create_without_pages_is_single_row() {
        let e = entry(vec![], Decimal::new(25, 1));
        let rows = e.rows(9, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].page_id, None);
        assert_eq!(rows[0].hours_spent, Decimal::new(25, 1));
    }

    #[test]
    fn test_mutation_kind_wire_format() {
        let change: MutationKind = serde_json::from_value(json!({
            "kind": "log_edit",
            "log_id": 42,
            "patch": {"hours_spent": 6.5, "description": "retest"}
        }))
        .unwrap();
        assert_eq!(change.name(), "log_edit");
        assert_eq!(change.log_id(), Some(42));
        assert_eq!(change.request_type(), RequestType::Edit);

        let del: MutationKind =
            serde_json::from_value(json!({"kind": "log_delete", "log_id": 3})).unwrap();
        assert_eq!(del.request_type(), RequestType::Delete);

        let bad = serde_json::from_value::<MutationKind>(json!({
            "kind": "log_edit", "log_id": 1, "patch": {"user_id": 2}
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_status_change_rejects_unknown_status() {
        let ok = serde_json::from_value::<MutationKind>(
            json!({"kind": "status_change", "status": "on_leave"}),
        );
        assert!(ok.is_ok());
        let bad = serde_json::from_value::<MutationKind>(
            json!({"kind": "status_change", "status": "napping"}),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_status_change_drops_blank_personal_note() {
        let mut change = MutationKind::StatusChange {
            status: AvailabilityStatus::OnLeave,
            notes: Some(" medical ".into()),
            personal_note: Some("   ".into()),
        };
        change.validate().unwrap();
        assert_eq!(
            change,
            MutationKind::StatusChange {
                status: AvailabilityStatus::OnLeave,
                notes: Some("medical".into()),
                personal_note: None,
            }
        );
    }

    #[test]
    fn test_invalid_log_ids_rejected() {
        assert!(MutationKind::LogDelete { log_id: 0 }.validate().is_err());
        let mut create = MutationKind::LogCreate {
            entry: entry(vec![], Decimal::ZERO),
        };
        assert!(create.validate().is_err());
    }
}
