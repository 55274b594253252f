//! Webhook Subscription CRUD (spec §3, §6).
//!
//! Same trait-for-pluggable-backend seam as the Job Store, same
//! `Arc<RwLock<HashMap<..>>>` tracker idiom for the in-memory reference
//! implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub tenant_id: String,
    pub target_url: String,
    pub topics: HashSet<String>,
}

/// A registered webhook subscription. `secret` is only populated on the
/// `create` response; subsequent reads omit it (spec §3: "HMAC secret
/// (opaque)").
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: String,
    pub target_url: String,
    pub topics: HashSet<String>,
    pub active: bool,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

struct StoredSubscription {
    subscription: Subscription,
    secret: String,
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Create a subscription, returning the record and its secret. The
    /// secret is returned exactly once; it is not retrievable afterward.
    async fn create(&self, req: CreateSubscription) -> (Subscription, String);

    async fn get(&self, id: Uuid) -> IngestResult<Subscription>;

    /// Internal accessor used by the dispatcher to sign deliveries
    /// (including the `send_test_event` self-check) — distinct from the
    /// external CRUD surface, which never returns a secret after create.
    async fn secret_for(&self, id: Uuid) -> IngestResult<String>;

    /// Subscriptions matching `topic` for a tenant (exact or `prefix.*`).
    async fn matching(&self, topic: &str) -> Vec<(Subscription, String)>;

    async fn list(&self, tenant_id: &str) -> Vec<Subscription>;

    async fn delete(&self, id: Uuid) -> IngestResult<()>;

    async fn record_delivery(&self, id: Uuid, succeeded: bool);
}

pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<Uuid, StoredSubscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => topic.starts_with(prefix) && topic[prefix.len()..].starts_with('.'),
        None => pattern == topic,
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn create(&self, req: CreateSubscription) -> (Subscription, String) {
        let secret = generate_secret();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            target_url: req.target_url,
            topics: req.topics,
            active: true,
            total: 0,
            succeeded: 0,
            failed: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        };
        self.subscriptions.write().await.insert(
            subscription.id,
            StoredSubscription {
                subscription: subscription.clone(),
                secret: secret.clone(),
            },
        );
        (subscription, secret)
    }

    async fn get(&self, id: Uuid) -> IngestResult<Subscription> {
        self.subscriptions
            .read()
            .await
            .get(&id)
            .map(|s| s.subscription.clone())
            .ok_or_else(|| IngestError::NotFound {
                message: format!("subscription not found: {id}"),
            })
    }

    async fn secret_for(&self, id: Uuid) -> IngestResult<String> {
        self.subscriptions
            .read()
            .await
            .get(&id)
            .map(|s| s.secret.clone())
            .ok_or_else(|| IngestError::NotFound {
                message: format!("subscription not found: {id}"),
            })
    }

    async fn matching(&self, topic: &str) -> Vec<(Subscription, String)> {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|s| {
                s.subscription.active
                    && s.subscription
                        .topics
                        .iter()
                        .any(|pattern| topic_matches(pattern, topic))
            })
            .map(|s| (s.subscription.clone(), s.secret.clone()))
            .collect()
    }

    async fn list(&self, tenant_id: &str) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.subscription.tenant_id == tenant_id)
            .map(|s| s.subscription.clone())
            .collect()
    }

    /// Soft-delete: flips `active` to `false` rather than removing the
    /// record (spec §3: "deletion soft (active=false)"). `matching` already
    /// filters on `active`, so a deleted subscription simply stops
    /// receiving deliveries without losing its history.
    async fn delete(&self, id: Uuid) -> IngestResult<()> {
        let mut subs = self.subscriptions.write().await;
        let stored = subs.get_mut(&id).ok_or_else(|| IngestError::NotFound {
            message: format!("subscription not found: {id}"),
        })?;
        stored.subscription.active = false;
        Ok(())
    }

    async fn record_delivery(&self, id: Uuid, succeeded: bool) {
        let mut subs = self.subscriptions.write().await;
        if let Some(stored) = subs.get_mut(&id) {
            stored.subscription.total += 1;
            if succeeded {
                stored.subscription.succeeded += 1;
            } else {
                stored.subscription.failed += 1;
            }
            stored.subscription.last_triggered_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(topics: &[&str]) -> CreateSubscription {
        CreateSubscription {
            tenant_id: "tenant-1".to_string(),
            target_url: "https://example.com/hook".to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn create_returns_secret_once() {
        let store = InMemorySubscriptionStore::new();
        let (sub, secret) = store.create(req(&["processing.completed"])).await;
        assert_eq!(secret.len(), 64);
        let fetched = store.get(sub.id).await.unwrap();
        assert_eq!(fetched.id, sub.id);
    }

    #[tokio::test]
    async fn matching_respects_wildcard_topics() {
        let store = InMemorySubscriptionStore::new();
        store.create(req(&["processing.*"])).await;
        let matches = store.matching("processing.completed").await;
        assert_eq!(matches.len(), 1);
        let no_matches = store.matching("webhook.test").await;
        assert!(no_matches.is_empty());
    }

    #[tokio::test]
    async fn delete_is_soft_and_stops_matching() {
        let store = InMemorySubscriptionStore::new();
        let (sub, _) = store.create(req(&["processing.completed"])).await;
        store.delete(sub.id).await.unwrap();

        let fetched = store.get(sub.id).await.unwrap();
        assert!(!fetched.active);
        assert!(store.matching("processing.completed").await.is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_id_errors() {
        let store = InMemorySubscriptionStore::new();
        assert!(store.delete(Uuid::new_v4()).await.is_err());
    }
}
