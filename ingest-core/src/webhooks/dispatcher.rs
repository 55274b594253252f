//! Webhook Dispatcher (spec §4.5, C5): fans published events out to every
//! subscription whose topic set matches, as signed HTTP POST deliveries
//! with bounded exponential-backoff retries.
//!
//! Built in the teacher's idiom with no direct counterpart: `reqwest::Client`
//! for delivery, `hmac`/`sha2` for signing, and delivery outcomes tracked
//! through the subscription store's counters.
//!
//! Deliveries are sharded across `dispatcher_concurrency` lanes by
//! subscription id (spec §4.5/§5: "within a single subscription, deliveries
//! are attempted in event-publication order"). Each lane has exactly one
//! consuming task draining its own channel, so a given subscription's
//! deliveries are strictly serialized even though different subscriptions'
//! deliveries run in parallel across lanes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{Config, WEBHOOK_BACKOFF_SECONDS};
use crate::events::{Event, EventBus};

use super::signing::sign;
use super::subscription::{Subscription, SubscriptionStore};

#[derive(Debug, Clone, Serialize)]
struct WireEvent<'a> {
    event: &'a str,
    timestamp: String,
    data: serde_json::Value,
    id: Uuid,
}

struct DeliveryTask {
    subscription: Subscription,
    secret: String,
    body: Vec<u8>,
    event_type: String,
    delivery_id: Uuid,
    attempt: u32,
}

/// Delivery outcome (spec §4.5): `permanent_fail` is reserved for a future
/// version and never produced today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    TransientFail,
}

#[derive(Clone)]
pub struct Dispatcher {
    lanes: Arc<[mpsc::Sender<DeliveryTask>]>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

/// Deterministically route a subscription to one of `lane_count` lanes, so
/// every delivery for that subscription lands on the same serial queue.
fn lane_for(subscription_id: Uuid, lane_count: usize) -> usize {
    (subscription_id.as_u128() % lane_count as u128) as usize
}

impl Dispatcher {
    /// Spawn `config.dispatcher_concurrency` delivery lanes, each with its
    /// own channel and a single consuming task (so deliveries within a lane
    /// — and hence within a subscription — run strictly in order), subscribe
    /// to every event the Event Bus carries (spec §9's control flow: "C7
    /// carries progress/terminal events, C5 fans events out to subscriber
    /// webhooks"), and return a handle callers can also `dispatch`/
    /// `send_test_event` against directly.
    pub fn spawn(config: Arc<Config>, subscriptions: Arc<dyn SubscriptionStore>, bus: EventBus) -> Self {
        let client = Arc::new(
            reqwest::Client::builder()
                .timeout(config.webhook_timeout)
                .build()
                .expect("reqwest client builds with static config"),
        );

        let lane_count = config.dispatcher_concurrency.max(1);
        let mut senders = Vec::with_capacity(lane_count);
        for lane_id in 0..lane_count {
            let (tx, mut rx) = mpsc::channel::<DeliveryTask>(1024);
            let client = client.clone();
            let subscriptions = subscriptions.clone();
            let config = config.clone();
            tokio::spawn(async move {
                tracing::debug!(lane_id, "webhook dispatch lane started");
                while let Some(task) = rx.recv().await {
                    deliver_with_retries(&client, &subscriptions, &config, task).await;
                }
                tracing::debug!(lane_id, "webhook dispatch lane stopped");
            });
            senders.push(tx);
        }

        let dispatcher = Self {
            lanes: senders.into(),
            subscriptions,
        };

        let forwarder = dispatcher.clone();
        tokio::spawn(async move {
            let subscriber = bus.subscribe("*").await;
            loop {
                let event = subscriber.recv().await;
                forwarder.dispatch(event).await;
            }
        });

        dispatcher
    }

    async fn enqueue(&self, subscription_id: Uuid, task: DeliveryTask) {
        let lane = lane_for(subscription_id, self.lanes.len());
        if self.lanes[lane].send(task).await.is_err() {
            tracing::error!(%subscription_id, "webhook dispatch lane closed, dropping delivery");
        }
    }

    /// Route a published event to every matching subscription, one
    /// delivery task per subscription (spec §4.5: "deliveries are
    /// independent").
    pub async fn dispatch(&self, event: Event) {
        let matches = self.subscriptions.matching(&event.topic).await;
        if matches.is_empty() {
            return;
        }

        let body = serde_json::to_vec(&WireEvent {
            event: &event.topic,
            timestamp: Utc::now().to_rfc3339(),
            data: event.payload.clone(),
            id: Uuid::new_v4(),
        })
        .unwrap_or_default();

        for (subscription, secret) in matches {
            let subscription_id = subscription.id;
            let task = DeliveryTask {
                subscription,
                secret,
                body: body.clone(),
                event_type: event.topic.clone(),
                delivery_id: Uuid::new_v4(),
                attempt: 1,
            };
            self.enqueue(subscription_id, task).await;
        }
    }

    /// Enqueue one `test`-typed delivery to a single subscription, so an
    /// operator can verify signature wiring before relying on it
    /// (SPEC_FULL supplemented feature).
    pub async fn send_test_event(&self, subscription_id: Uuid) -> crate::error::IngestResult<()> {
        let subscription = self.subscriptions.get(subscription_id).await?;
        let secret = self.subscriptions.secret_for(subscription_id).await?;

        let body = serde_json::to_vec(&WireEvent {
            event: "test",
            timestamp: Utc::now().to_rfc3339(),
            data: serde_json::json!({ "message": "this is a test delivery" }),
            id: Uuid::new_v4(),
        })
        .unwrap_or_default();

        let task = DeliveryTask {
            subscription,
            secret,
            body,
            event_type: "test".to_string(),
            delivery_id: Uuid::new_v4(),
            attempt: 1,
        };
        let lane = lane_for(subscription_id, self.lanes.len());
        self.lanes[lane]
            .send(task)
            .await
            .map_err(|_| crate::error::IngestError::internal("dispatch lane closed"))
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let idx = (attempt.saturating_sub(1) as usize).min(WEBHOOK_BACKOFF_SECONDS.len() - 1);
    Duration::from_secs(WEBHOOK_BACKOFF_SECONDS[idx])
}

async fn deliver_with_retries(
    client: &reqwest::Client,
    subscriptions: &Arc<dyn SubscriptionStore>,
    config: &Config,
    mut task: DeliveryTask,
) {
    loop {
        let outcome = attempt_delivery(client, &task).await;
        match outcome {
            DeliveryOutcome::Delivered => {
                subscriptions
                    .record_delivery(task.subscription.id, true)
                    .await;
                tracing::info!(
                    subscription_id = %task.subscription.id,
                    delivery_id = %task.delivery_id,
                    attempt = task.attempt,
                    "webhook delivered"
                );
                return;
            }
            DeliveryOutcome::TransientFail => {
                subscriptions
                    .record_delivery(task.subscription.id, false)
                    .await;
                if task.attempt >= config.webhook_max_attempts {
                    tracing::warn!(
                        subscription_id = %task.subscription.id,
                        delivery_id = %task.delivery_id,
                        attempts = task.attempt,
                        "webhook delivery exhausted retries, dropping"
                    );
                    return;
                }
                let delay = backoff_for(task.attempt);
                tracing::warn!(
                    subscription_id = %task.subscription.id,
                    delivery_id = %task.delivery_id,
                    attempt = task.attempt,
                    delay_secs = delay.as_secs(),
                    "webhook delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
                task.attempt += 1;
            }
        }
    }
}

async fn attempt_delivery(client: &reqwest::Client, task: &DeliveryTask) -> DeliveryOutcome {
    let signature = sign(&task.secret, &task.body);

    let response = client
        .post(&task.subscription.target_url)
        .header("X-Webhook-Signature", signature)
        .header("X-Webhook-Event", task.event_type.clone())
        .header("X-Webhook-Delivery", task.delivery_id.to_string())
        .header("X-Webhook-Attempt", task.attempt.to_string())
        .header("User-Agent", "ingest-core-webhooks/1.0")
        .header("Content-Type", "application/json")
        .body(task.body.clone())
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => DeliveryOutcome::Delivered,
        Ok(_) => DeliveryOutcome::TransientFail,
        Err(_) => DeliveryOutcome::TransientFail,
    }
}
