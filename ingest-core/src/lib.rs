//! Ingest Core - document ingestion pipeline
//!
//! This crate contains the core functionality for the ingestion service:
//! - Parser Registry (§4.1): declared-kind-to-capability extraction
//! - Extraction Pipeline (§4.2): Identify/Parse/Field-extract/Persist
//! - Job Store (§4.3): durable job lifecycle
//! - Worker pool (§4.4): drains the Job Store against the pipeline
//! - Webhook Dispatcher (§4.5): signed, retried event fan-out
//! - Rate Limiter (§4.6): sliding-window-log admission control
//! - Event Bus (§4.7): in-process topic pub/sub

pub mod blobstore;
pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod ratelimit;
pub mod webhooks;

use std::sync::Arc;

use uuid::Uuid;

pub use blobstore::BlobStore;
pub use config::Config;
pub use error::{IngestError, IngestResult};
pub use events::{Event, EventBus};
pub use jobs::{FailOutcome, Job, JobFilter, JobStore, Pagination, SubmitJob, WorkerPool};
pub use models::{BlobRef, CanonicalRecord, JobState, Kind, ResultSummary, Tier};
pub use parsers::{OcrEngine, ParserRegistry};
pub use ratelimit::{Admission, RateLimiter};
pub use webhooks::{CreateSubscription, Dispatcher, Subscription, SubscriptionStore};

use jobs::InMemoryJobStore;
use parsers::NullOcrEngine;
use webhooks::InMemorySubscriptionStore;

/// Wires C1-C7 together into the single object a CLI or HTTP surface holds.
///
/// `IngestCore` owns no network listener of its own; it's the shared state
/// a front door (the CLI's command handlers, or an HTTP router) drives.
#[derive(Clone)]
pub struct IngestCore {
    pub config: Arc<Config>,
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<ParserRegistry>,
    pub ocr: Arc<dyn OcrEngine>,
    pub bus: EventBus,
    pub rate_limiter: RateLimiter,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub blobs: Arc<BlobStore>,
    dispatcher: Arc<Dispatcher>,
    worker_pool: Arc<WorkerPool>,
}

impl IngestCore {
    /// Build the default in-memory-backed core and start its worker pool
    /// and webhook dispatcher. A real deployment would swap `InMemoryJobStore`
    /// / `InMemorySubscriptionStore` for durable backends (spec §6) without
    /// touching the pipeline or dispatcher.
    pub fn start(config: Config) -> Self {
        let ocr: Arc<dyn OcrEngine> = Arc::new(NullOcrEngine);
        let registry = Arc::new(ParserRegistry::default_registry(ocr.clone()));
        Self::start_with(config, registry, ocr)
    }

    /// Same as `start`, but with a caller-supplied Parser Registry and OCR
    /// engine — the seam integration tests use to substitute deterministic
    /// parsers for real document formats (spec §8's scenarios).
    pub fn start_with(config: Config, registry: Arc<ParserRegistry>, ocr: Arc<dyn OcrEngine>) -> Self {
        let config = Arc::new(config);
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(&config));
        let bus = EventBus::new();
        let rate_limiter = RateLimiter::new(config.rate_limiter_fail_open);
        let subscriptions: Arc<dyn SubscriptionStore> = Arc::new(InMemorySubscriptionStore::new());
        let blobs = Arc::new(BlobStore::new(config.blob_root.clone()));

        let dispatcher = Arc::new(Dispatcher::spawn(
            config.clone(),
            subscriptions.clone(),
            bus.clone(),
        ));
        let worker_pool = Arc::new(WorkerPool::spawn(
            config.clone(),
            store.clone(),
            registry.clone(),
            ocr.clone(),
            bus.clone(),
        ));

        Self {
            config,
            store,
            registry,
            ocr,
            bus,
            rate_limiter,
            subscriptions,
            blobs,
            dispatcher,
            worker_pool,
        }
    }

    /// Submit a job and return its id (spec §4.3). The caller is expected to
    /// have already admitted the request through `rate_limiter`.
    pub async fn submit_job(&self, req: SubmitJob) -> IngestResult<Uuid> {
        self.store.submit(req).await
    }

    pub async fn job(&self, id: Uuid) -> IngestResult<Job> {
        self.store.get(id).await
    }

    /// Cancel a job in any non-terminal state (spec §4.4).
    pub async fn cancel_job(&self, id: Uuid) -> IngestResult<()> {
        jobs::cancel_job(self.store.as_ref(), self.worker_pool.active_job_registry(), id).await
    }

    /// Create a webhook subscription and publish `webhook.created` on the
    /// bus (SPEC_FULL supplemented feature for observability parity with
    /// the rest of the lifecycle events).
    pub async fn subscribe(&self, req: CreateSubscription) -> (Subscription, String) {
        let (subscription, secret) = self.subscriptions.create(req).await;
        self.bus
            .publish(Event::new(
                "webhook.created",
                serde_json::json!({ "subscription_id": subscription.id }),
            ))
            .await;
        (subscription, secret)
    }

    pub async fn send_test_webhook(&self, subscription_id: Uuid) -> IngestResult<()> {
        self.dispatcher.send_test_event(subscription_id).await
    }

    /// Publish a domain event onto the Event Bus (§4.7). The Dispatcher
    /// (§4.5) is itself a bus subscriber, so this is the single fan-out
    /// point for both in-process subscribers and webhook deliveries.
    pub async fn publish(&self, event: Event) {
        self.bus.publish(event).await;
    }

    /// Request cooperative shutdown of the worker pool. In-flight jobs run
    /// to their next checkpoint and stop; already-enqueued webhook
    /// deliveries still drain since the dispatcher has its own lifecycle.
    pub fn shutdown_workers(&self) {
        self.worker_pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn core_starts_and_submits_a_job() {
        let core = IngestCore::start(Config::load_or_default());
        let id = core
            .submit_job(SubmitJob {
                tenant_id: "tenant-1".to_string(),
                blob: BlobRef {
                    content_hash: "deadbeef".to_string(),
                    locator: "blobs/deadbeef".to_string(),
                },
                kind: Kind::Csv,
                priority: 0,
                max_attempts: 3,
            })
            .await
            .unwrap();
        let job = core.job(id).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
    }

    #[tokio::test]
    async fn subscribing_returns_a_secret_once() {
        let core = IngestCore::start(Config::load_or_default());
        let (subscription, secret) = core
            .subscribe(CreateSubscription {
                tenant_id: "tenant-1".to_string(),
                target_url: "https://example.com/hook".to_string(),
                topics: ["processing.*".to_string()].into_iter().collect(),
            })
            .await;
        assert_eq!(secret.len(), 64);
        assert!(core.subscriptions.get(subscription.id).await.is_ok());
    }
}
