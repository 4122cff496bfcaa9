use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Users live in the surrounding application; we only ever carry their id.
pub type UserId = i64;

/// A user's request to change what is recorded for a past day.
///
/// At most one `Pending` request exists per (user, date, type). Decided
/// requests are kept forever as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChangeRequest {
    pub id: Uuid,
    pub user_id: UserId,
    pub target_date: NaiveDate,
    pub request_type: RequestType,
    pub reason: String,
    pub status: RequestStatus,
    pub decided_by: Option<UserId>,
    pub decision_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestType {
    Edit,
    Delete,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Edit => "edit",
            RequestType::Delete => "delete",
        }
    }
}

/// Lifecycle shared by requests and staged mutations.
/// `Approved` and `Rejected` are terminal.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

/// An admin's verdict on a pending request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Accepts both verb and past-participle spellings ("approve", "approved").
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "approve" | "approved" => Some(Decision::Approve),
            "reject" | "rejected" => Some(Decision::Reject),
            _ => None,
        }
    }

    /// The status a request ends up in after this decision.
    pub fn outcome(&self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Reject => RequestStatus::Rejected,
        }
    }
}

/// Row of the approval queue: a pending request plus who filed it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingRequest {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: ChangeRequest,
    pub full_name: String,
    pub username: String,
    pub pending_changes: i64,
}

/// Result of a committed decision, returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct Decided {
    pub request: ChangeRequest,
    /// Number of staged mutations that were approved or rejected.
    pub mutations: usize,
    /// Staged edits/deletes whose live row no longer existed at apply time.
    pub skipped: Vec<Uuid>,
}
