use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::UserId;

/// In-app message shown in a user's inbox.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Sent to admins when a user files a change.
pub const KIND_EDIT_REQUEST: &str = "edit_request";
/// Sent to the submitter once an admin decides.
pub const KIND_EDIT_REQUEST_RESPONSE: &str = "edit_request_response";
