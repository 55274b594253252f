//! Worker pool (spec §4.4, C4): polls the Job Store, drives each acquired
//! job through the Extraction Pipeline, and applies the back-off/
//! dead-letter transition table on failure.
//!
//! Structured like the teacher's `jobs/processing.rs::spawn_processing_worker`
//! (`tokio::spawn` + `while let Some(doc) = rx.recv().await` loop), but this
//! pool polls `JobStore::acquire` instead of reading an mpsc channel — there
//! is no upstream producer to block on, so an idle worker backs off with
//! jittered `tokio::time::sleep` instead of awaiting a channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::IngestResult;
use crate::events::{Event, EventBus};
use crate::models::JobError;
use crate::parsers::{OcrEngine, ParserRegistry};
use crate::pipeline::{self, PipelineContext};

use super::store::{FailOutcome, JobStore};

/// Upper bound on the idle-poll back-off (spec §4.4: "bounded").
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(2);
const MIN_POLL_BACKOFF: Duration = Duration::from_millis(50);

/// Per-job cancellation tokens for jobs currently `active` on some worker,
/// so an external cancel request (spec §4.4) can reach the worker holding
/// the job without the Job Store knowing about tokio internals.
#[derive(Clone, Default)]
pub struct ActiveJobRegistry {
    tokens: Arc<tokio::sync::RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl ActiveJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, id: Uuid, token: CancellationToken) {
        self.tokens.write().await.insert(id, token);
    }

    async fn unregister(&self, id: Uuid) {
        self.tokens.write().await.remove(&id);
    }

    /// Signal cancellation for an active job. A no-op if the job is not
    /// currently held by any worker (it already finished or was never
    /// active) — the caller falls back to `JobStore::cancel` for the
    /// queued case.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.tokens.read().await.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

pub struct WorkerPool {
    shutdown: CancellationToken,
    registry: ActiveJobRegistry,
}

impl WorkerPool {
    /// Spawn `config.worker_pool_size` worker tasks, each independently
    /// polling `store.acquire` (spec §4.4's bounded-concurrency policy).
    pub fn spawn(
        config: Arc<Config>,
        store: Arc<dyn JobStore>,
        registry: Arc<ParserRegistry>,
        ocr: Arc<dyn OcrEngine>,
        bus: EventBus,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let active = ActiveJobRegistry::new();

        for worker_id in 0..config.worker_pool_size {
            let config = config.clone();
            let store = store.clone();
            let registry = registry.clone();
            let ocr = ocr.clone();
            let bus = bus.clone();
            let active = active.clone();
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                tracing::debug!(worker_id, "ingestion worker started");
                run_worker_loop(worker_id, config, store, registry, ocr, bus, active, shutdown)
                    .await;
                tracing::debug!(worker_id, "ingestion worker stopped");
            });
        }

        Self {
            shutdown,
            registry: active,
        }
    }

    /// Request cooperative shutdown of every worker; in-flight jobs run
    /// their current stage to its next checkpoint, then stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn active_job_registry(&self) -> &ActiveJobRegistry {
        &self.registry
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker_loop(
    worker_id: usize,
    config: Arc<Config>,
    store: Arc<dyn JobStore>,
    registry: Arc<ParserRegistry>,
    ocr: Arc<dyn OcrEngine>,
    bus: EventBus,
    active: ActiveJobRegistry,
    shutdown: CancellationToken,
) {
    let mut backoff = MIN_POLL_BACKOFF;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        let Some(job) = store.acquire(store.now(), config.lease_timeout).await else {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_POLL_BACKOFF);
            continue;
        };
        backoff = MIN_POLL_BACKOFF;

        tracing::info!(worker_id, job_id = %job.id, kind = ?job.kind, "job acquired");
        bus.publish(Event::new(
            "processing.started",
            serde_json::json!({ "job_id": job.id, "attempt": job.attempts }),
        ))
        .await;

        let job_cancel = shutdown.child_token();
        active.register(job.id, job_cancel.clone()).await;

        let blob = match load_blob(&job).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "failed to load blob for job");
                let _ = store
                    .fail(
                        job.id,
                        JobError {
                            code: "PARSER_IO".to_string(),
                            message: err.to_string(),
                        },
                        true,
                    )
                    .await;
                active.unregister(job.id).await;
                continue;
            }
        };

        let ctx = PipelineContext {
            job_id: job.id,
            blob,
            declared_kind: job.kind,
            store: store.clone(),
            registry: registry.clone(),
            ocr: ocr.clone(),
            bus: bus.clone(),
            cancel: job_cancel,
        };

        let result = pipeline::run(ctx, &config).await;
        active.unregister(job.id).await;

        if let Err(err) = result {
            handle_failure(&store, &bus, job.id, err).await;
        }
    }
}

async fn load_blob(job: &super::Job) -> anyhow::Result<bytes::Bytes> {
    let bytes = tokio::fs::read(&job.blob.locator).await?;
    Ok(bytes::Bytes::from(bytes))
}

async fn handle_failure(
    store: &Arc<dyn JobStore>,
    bus: &EventBus,
    job_id: Uuid,
    err: crate::error::IngestError,
) {
    let retryable = err.is_retryable();
    let job_error = JobError {
        code: err.code().to_string(),
        message: err.to_string(),
    };

    match store.fail(job_id, job_error, retryable).await {
        Ok(FailOutcome::Requeued) => {
            tracing::warn!(job_id = %job_id, error = %err, "job failed, requeued for retry");
        }
        Ok(FailOutcome::Dead) => {
            tracing::error!(job_id = %job_id, error = %err, "job exhausted retries, routed to dead letter");
            bus.publish(Event::new(
                "processing.failed",
                serde_json::json!({ "job_id": job_id, "error": err.code(), "dead": true }),
            ))
            .await;
        }
        Ok(FailOutcome::Failed) => {
            tracing::error!(job_id = %job_id, error = %err, "job permanently failed");
            bus.publish(Event::new(
                "processing.failed",
                serde_json::json!({ "job_id": job_id, "error": err.code(), "dead": false }),
            ))
            .await;
        }
        Err(store_err) => {
            tracing::error!(job_id = %job_id, error = %store_err, "failed to record job failure");
        }
    }
}

/// Cancel a job regardless of its current state (spec §4.4): queued jobs
/// transition to `failed` immediately via the store; active jobs are
/// signalled through their worker's token and transition at the next
/// checkpoint.
pub async fn cancel_job(
    store: &dyn JobStore,
    registry: &ActiveJobRegistry,
    id: Uuid,
) -> IngestResult<()> {
    let job = store.get(id).await?;
    if job.state == crate::models::JobState::Active {
        registry.cancel(id).await;
        Ok(())
    } else {
        store.cancel(id).await
    }
}
