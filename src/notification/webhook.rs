use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::approval::Decided;

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// "request_approved" or "request_rejected".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    pub request_id: String,
    /// The user who filed the request.
    pub user_id: i64,
    pub target_date: String,
    /// Event-specific details (decider, note, mutation counts).
    pub details: serde_json::Value,
}

impl WebhookEvent {
    pub fn decision(decided: &Decided, admin_name: &str) -> Self {
        let request = &decided.request;
        Self {
            event_type: format!("request_{}", request.status.as_str()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: request.id.to_string(),
            user_id: request.user_id,
            target_date: request.target_date.to_string(),
            details: serde_json::json!({
                "request_type": request.request_type.as_str(),
                "decided_by": request.decided_by,
                "decided_by_name": admin_name,
                "note": request.decision_note,
                "mutations": decided.mutations,
                "skipped": decided.skipped,
            }),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid webhook secret: {}", e))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Fans decision events out to the configured URLs.
/// Supports:
/// - HMAC-SHA256 signing (X-Qadesk-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    secret: Option<String>,
    backoff_secs: Vec<u64>,
    /// Deliveries spawned by `dispatch` and not yet awaited by `drain`.
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Qadesk-Webhook/1.0")
            .build()?;
        Ok(Self {
            client,
            urls,
            secret,
            backoff_secs: vec![0, 1, 5, 25],
            in_flight: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Replace the retry schedule. The first entry is the delay before the
    /// first attempt.
    pub fn with_backoff(mut self, backoff_secs: Vec<u64>) -> Self {
        self.backoff_secs = backoff_secs;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Send a webhook event to a single URL with retry.
    ///
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &WebhookEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match &self.secret {
            Some(s) => Some(hmac_sha256_hex(s, &payload)?),
            None => None,
        };

        for (attempt, &delay) in self.backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-qadesk-delivery-id", &delivery_id)
                .header("x-qadesk-timestamp", &timestamp)
                .header("x-qadesk-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-qadesk-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff_secs.len(),
            url
        ))
    }

    /// Dispatch an event to every configured URL on a background task.
    ///
    /// Each URL is attempted independently with retry; failures in one do not block others.
    /// Call [`drain`](Self::drain) before the runtime shuts down.
    pub fn dispatch(&self, event: WebhookEvent) {
        if self.urls.is_empty() {
            return;
        }

        let notifier = self.clone();
        let handle = tokio::spawn(async move {
            for url in &notifier.urls {
                if let Err(e) = notifier.send(url, &event).await {
                    warn!(url, error = %e, "webhook dispatch ultimately failed");
                }
            }
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Wait up to `limit` for every dispatched delivery to finish.
    ///
    /// Returns `false` if deliveries were still running when the limit hit.
    pub async fn drain(&self, limit: Duration) -> bool {
        let handles: Vec<JoinHandle<()>> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.drain(..).collect()
        };
        if handles.is_empty() {
            return true;
        }

        let pending = handles.len();
        let finished = tokio::time::timeout(limit, async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "webhook delivery task failed");
                }
            }
        })
        .await
        .is_ok();
        if !finished {
            warn!(pending, "gave up waiting for webhook deliveries");
        }
        finished
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::{ChangeRequest, RequestStatus, RequestType};
    use chrono::{NaiveDate, Utc};
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn decided(status: RequestStatus) -> Decided {
        Decided {
            request: ChangeRequest {
                id: uuid::Uuid::new_v4(),
                user_id: 7,
                target_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                request_type: RequestType::Edit,
                reason: "forgot to log".into(),
                status,
                decided_by: Some(1),
                decision_note: Some("ok".into()),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            mutations: 2,
            skipped: vec![],
        }
    }

    #[test]
    fn test_decision_event_type_follows_status() {
        let event = WebhookEvent::decision(&decided(RequestStatus::Approved), "Ana");
        assert_eq!(event.event_type, "request_approved");
        assert_eq!(event.user_id, 7);
        assert_eq!(event.target_date, "2024-03-01");
        assert_eq!(event.details["decided_by_name"], "Ana");
        assert_eq!(event.details["mutations"], 2);

        let event = WebhookEvent::decision(&decided(RequestStatus::Rejected), "Ana");
        assert_eq!(event.event_type, "request_rejected");
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret123", b"payload").unwrap();
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
        assert_ne!(sig1, hmac_sha256_hex("secret124", b"payload").unwrap());
    }

    #[tokio::test]
    async fn test_send_signs_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-qadesk-event", "request_approved"))
            .and(header_exists("x-qadesk-signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let notifier = WebhookNotifier::new(vec![url.clone()], Some("s3cret".into())).unwrap();
        let event = WebhookEvent::decision(&decided(RequestStatus::Approved), "Ana");
        notifier.send(&url, &event).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let notifier = WebhookNotifier::new(vec![url.clone()], None)
            .unwrap()
            .with_backoff(vec![0, 0, 0]);
        let event = WebhookEvent::decision(&decided(RequestStatus::Rejected), "Ana");
        assert!(notifier.send(&url, &event).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_waits_for_dispatched_deliveries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .expect(2)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let notifier = WebhookNotifier::new(vec![url], None).unwrap();
        notifier.dispatch(WebhookEvent::decision(&decided(RequestStatus::Approved), "Ana"));
        notifier.dispatch(WebhookEvent::decision(&decided(RequestStatus::Rejected), "Ana"));

        assert!(notifier.drain(Duration::from_secs(5)).await);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
        // Nothing left to wait for.
        assert!(notifier.drain(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(vec![server.uri()], None).unwrap();
        notifier.dispatch(WebhookEvent::decision(&decided(RequestStatus::Approved), "Ana"));
        assert!(!notifier.drain(Duration::from_millis(50)).await);
    }
}
