//! Fire-and-forget messages to users. A failed notification is logged and
//! never changes the outcome of the operation that triggered it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::approval::UserId;
use crate::store::ChangeStore;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: UserId,
        kind: &str,
        message: &str,
        link: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Persists notifications into the inbox table of the active store.
pub struct StoreNotifier {
    store: Arc<dyn ChangeStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn ChangeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(
        &self,
        user_id: UserId,
        kind: &str,
        message: &str,
        link: Option<&str>,
    ) -> anyhow::Result<()> {
        self.store
            .create_notification(user_id, kind, message, link)
            .await?;
        Ok(())
    }
}

/// Deliver one notification, logging instead of failing.
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    user_id: UserId,
    kind: &str,
    message: &str,
    link: Option<&str>,
) {
    if let Err(e) = notifier.notify(user_id, kind, message, link).await {
        tracing::warn!(user_id, kind, error = %e, "notification failed");
    }
}
