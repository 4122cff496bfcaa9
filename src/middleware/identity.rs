use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::{AppError, WorkflowError};
use crate::models::approval::UserId;

/// Roles known to the surrounding application.
/// Only `SuperAdmin` and `Admin` may review and decide change requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    Admin,
    ProjectLead,
    Qa,
    AtTester,
    Client,
    Custom(String),
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "super_admin" => Role::SuperAdmin,
            "admin" => Role::Admin,
            "project_lead" => Role::ProjectLead,
            "qa" => Role::Qa,
            "at_tester" => Role::AtTester,
            "client" => Role::Client,
            other => Role::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::ProjectLead => "project_lead",
            Role::Qa => "qa",
            Role::AtTester => "at_tester",
            Role::Client => "client",
            Role::Custom(s) => s,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::Admin)
    }
}

/// The authenticated caller of a workflow operation.
///
/// Passed explicitly into every staging, queue and decision call; the
/// workflow never reads identity from anywhere else.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
    pub display_name: String,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            display_name: display_name.into(),
        }
    }

    /// Fails with `Forbidden` unless the actor may administer requests.
    pub fn require_admin(&self) -> Result<(), WorkflowError> {
        if self.role.is_admin() {
            return Ok(());
        }
        tracing::warn!(
            user_id = self.user_id,
            role = self.role.as_str(),
            "access denied: admin role required"
        );
        Err(WorkflowError::Forbidden(format!(
            "admin role required, but user has '{}'",
            self.role.as_str()
        )))
    }
}

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Reads the actor forwarded by the fronting session provider.
/// The service key itself is checked by the router middleware.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| AppError::BadRequest(format!("missing {} header", USER_ID_HEADER)))?
            .parse::<UserId>()
            .map_err(|_| AppError::BadRequest(format!("{} must be an integer", USER_ID_HEADER)))?;
        let role = header(USER_ROLE_HEADER)
            .map(|r| Role::parse(&r))
            .ok_or_else(|| AppError::BadRequest(format!("missing {} header", USER_ROLE_HEADER)))?;
        let display_name = header(USER_NAME_HEADER).unwrap_or_else(|| format!("user #{}", user_id));

        Ok(Actor {
            user_id,
            role,
            display_name,
        })
    }
}
