pub mod applier;
pub mod notifier;
pub mod queue;
pub mod staging;

use std::sync::Arc;

use crate::metrics::WorkflowMetrics;
use crate::notification::webhook::WebhookNotifier;
use crate::store::ChangeStore;

pub use applier::{BatchItem, DecisionApplier};
pub use notifier::{Notifier, StoreNotifier};
pub use queue::ApprovalQueue;
pub use staging::Staging;

/// The workflow components wired to one store.
pub struct Workflow {
    pub staging: Staging,
    pub queue: ApprovalQueue,
    pub applier: DecisionApplier,
}

impl Workflow {
    /// Wire the components with the store-backed notifier.
    pub fn new(
        store: Arc<dyn ChangeStore>,
        webhooks: Option<WebhookNotifier>,
        metrics: WorkflowMetrics,
    ) -> Self {
        let notifier: Arc<dyn Notifier> = Arc::new(StoreNotifier::new(store.clone()));
        Self::with_notifier(store, notifier, webhooks, metrics)
    }

    pub fn with_notifier(
        store: Arc<dyn ChangeStore>,
        notifier: Arc<dyn Notifier>,
        webhooks: Option<WebhookNotifier>,
        metrics: WorkflowMetrics,
    ) -> Self {
        Self {
            staging: Staging::new(store.clone(), notifier.clone(), metrics.clone()),
            queue: ApprovalQueue::new(store.clone()),
            applier: DecisionApplier::new(store, notifier, webhooks, metrics),
        }
    }
}
