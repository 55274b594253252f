//! End-to-end scenarios exercised against the public `IngestCore` facade
//! rather than internals, using swapped-in deterministic parsers in place
//! of real document formats.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ingest_core::models::{Fragment, Kind, ParserOutput};
use ingest_core::parsers::{NullOcrEngine, OcrEngine, ParseOptions, Parser, ParserRegistry};
use ingest_core::{Config, CreateSubscription, IngestCore, Job, JobState, SubmitJob};

fn test_config() -> Config {
    let mut config = Config::load_or_default();
    config.blob_root = tempfile::tempdir().unwrap().into_path();
    config
}

async fn wait_for_terminal(core: &IngestCore, id: uuid::Uuid) -> Job {
    for _ in 0..400 {
        let job = core.job(id).await.unwrap();
        if job.state.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {id} did not reach a terminal state in time");
}

/// Always returns the same raw text, regardless of input bytes.
struct FixedTextParser {
    text: String,
}

#[async_trait]
impl Parser for FixedTextParser {
    async fn parse(&self, _blob: &[u8], _options: &ParseOptions) -> ingest_core::IngestResult<ParserOutput> {
        Ok(ParserOutput {
            raw_text: self.text.clone(),
            fragments: Vec::<Fragment>::new(),
            confidence: 0.95,
        })
    }
}

/// Fails with a retryable error on its first `fail_count` invocations, then
/// succeeds with fixed text.
struct FlakyParser {
    fail_count: usize,
    calls: AtomicUsize,
    text: String,
}

#[async_trait]
impl Parser for FlakyParser {
    async fn parse(&self, _blob: &[u8], _options: &ParseOptions) -> ingest_core::IngestResult<ParserOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_count {
            Err(ingest_core::IngestError::ParserIo {
                message: format!("injected failure on attempt {}", call + 1),
            })
        } else {
            Ok(ParserOutput {
                raw_text: self.text.clone(),
                fragments: Vec::new(),
                confidence: 0.9,
            })
        }
    }
}

/// Sleeps long enough for a cancellation to land mid-parse.
struct SlowParser {
    delay: Duration,
}

#[async_trait]
impl Parser for SlowParser {
    async fn parse(&self, _blob: &[u8], _options: &ParseOptions) -> ingest_core::IngestResult<ParserOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(ParserOutput {
            raw_text: "unreachable if cancelled".to_string(),
            fragments: Vec::new(),
            confidence: 1.0,
        })
    }
}

fn registry_with(kind: Kind, parser: Arc<dyn Parser>) -> Arc<ParserRegistry> {
    let ocr: Arc<dyn OcrEngine> = Arc::new(NullOcrEngine);
    Arc::new(ParserRegistry::default_registry(ocr).with_parser(kind, parser))
}

async fn submit_pdf_blob(core: &IngestCore, tenant: &str) -> uuid::Uuid {
    let blob = core.blobs.put(b"%PDF-1.4 fixture content").await.unwrap();
    core.submit_job(SubmitJob {
        tenant_id: tenant.to_string(),
        blob,
        kind: Kind::Pdf,
        priority: 0,
        max_attempts: 3,
    })
    .await
    .unwrap()
}

// S1 — PDF happy path.
#[tokio::test]
async fn s1_pdf_happy_path_extracts_property_inspector_and_finding() {
    let ocr: Arc<dyn OcrEngine> = Arc::new(NullOcrEngine);
    let registry = Arc::new(ParserRegistry::default_registry(ocr.clone()).with_parser(
        Kind::Pdf,
        Arc::new(FixedTextParser {
            text: "Address: 123 Main St, Anytown, CA 90210\n\
                   Inspector: Jane Smith, License NY789012\n\
                   critical electrical hazard at main panel"
                .to_string(),
        }),
    ));
    let core = IngestCore::start_with(test_config(), registry, ocr);

    let id = submit_pdf_blob(&core, "tenant-1").await;
    let job = wait_for_terminal(&core, id).await;

    assert_eq!(job.state, JobState::Completed);
    let record = job.result.expect("completed job carries a result");
    assert_eq!(record.property.address_line1.as_deref(), Some("123 Main St"));
    assert_eq!(record.property.city.as_deref(), Some("Anytown"));
    assert_eq!(record.property.state.as_deref(), Some("CA"));
    assert_eq!(record.property.zip.as_deref(), Some("90210"));
    assert_eq!(record.findings.len(), 1);
    assert_eq!(
        record.findings[0].category,
        ingest_core::models::Category::Electrical
    );
    assert_eq!(
        record.findings[0].severity,
        ingest_core::models::Severity::Critical
    );
}

// S2 — transient-then-success.
#[tokio::test]
async fn s2_transient_failure_then_success_retries_once() {
    let flaky = Arc::new(FlakyParser {
        fail_count: 1,
        calls: AtomicUsize::new(0),
        text: "Address: 1 Test Way, Someplace, TX 75001".to_string(),
    });
    let registry = registry_with(Kind::Pdf, flaky);
    let core = IngestCore::start_with(test_config(), registry, Arc::new(NullOcrEngine));

    let id = submit_pdf_blob(&core, "tenant-1").await;
    let job = wait_for_terminal(&core, id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
}

// S3 — exhaustion.
#[tokio::test(start_paused = true)]
async fn s3_exhausting_all_attempts_routes_to_dead() {
    let always_fails = Arc::new(FlakyParser {
        fail_count: usize::MAX,
        calls: AtomicUsize::new(0),
        text: String::new(),
    });
    let registry = registry_with(Kind::Pdf, always_fails);
    let core = IngestCore::start_with(test_config(), registry, Arc::new(NullOcrEngine));

    let started = core.bus.subscribe("processing.started").await;

    let blob = core.blobs.put(b"%PDF-1.4 fixture content").await.unwrap();
    let id = core
        .submit_job(SubmitJob {
            tenant_id: "tenant-1".to_string(),
            blob,
            kind: Kind::Pdf,
            priority: 0,
            max_attempts: 3,
        })
        .await
        .unwrap();

    // Record when each attempt starts. With the runtime's clock paused, the
    // worker's poll/backoff sleeps and the Job Store's lease/backoff timers
    // auto-advance to the next pending deadline instead of burning real
    // wall-clock time, so this converges instantly while still producing the
    // real ≥1s/≥5s gaps the back-off schedule calls for (spec §8 S3).
    let mut attempt_started_at = Vec::new();
    for _ in 0..3 {
        started.recv().await;
        attempt_started_at.push(tokio::time::Instant::now());
    }

    let job = wait_for_terminal(&core, id).await;
    assert_eq!(job.state, JobState::Dead);
    assert_eq!(job.attempts, 3);

    assert!(
        attempt_started_at[1] - attempt_started_at[0] >= Duration::from_secs(1),
        "attempt 1->2 gap was {:?}",
        attempt_started_at[1] - attempt_started_at[0]
    );
    assert!(
        attempt_started_at[2] - attempt_started_at[1] >= Duration::from_secs(5),
        "attempt 2->3 gap was {:?}",
        attempt_started_at[2] - attempt_started_at[1]
    );
}

// S4 — rate limit.
#[tokio::test(start_paused = true)]
async fn s4_free_tier_denies_after_quota() {
    let core = IngestCore::start(test_config());

    for _ in 0..100 {
        let admission = core
            .rate_limiter
            .admit("tenant-1", ingest_core::models::Bucket::Api, ingest_core::Tier::Free)
            .await;
        assert!(admission.allowed);
    }

    let denied = core
        .rate_limiter
        .admit("tenant-1", ingest_core::models::Bucket::Api, ingest_core::Tier::Free)
        .await;
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 100);
    assert_eq!(denied.remaining, 0);

    tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;
    let allowed_again = core
        .rate_limiter
        .admit("tenant-1", ingest_core::models::Bucket::Api, ingest_core::Tier::Free)
        .await;
    assert!(allowed_again.allowed);
}

// S5 — webhook retry.
#[tokio::test]
async fn s5_webhook_delivery_retries_until_success() {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let registry = registry_with(
        Kind::Pdf,
        Arc::new(FixedTextParser {
            text: "Address: 1 Test Way, Someplace, TX 75001".to_string(),
        }),
    );
    let core = IngestCore::start_with(test_config(), registry, Arc::new(NullOcrEngine));

    let (subscription, _secret) = core
        .subscribe(CreateSubscription {
            tenant_id: "tenant-1".to_string(),
            target_url: server.uri(),
            topics: HashSet::from(["processing.completed".to_string()]),
        })
        .await;

    let _id = submit_pdf_blob(&core, "tenant-1").await;

    let mut attempts_seen = 0;
    for _ in 0..200 {
        let current = core.subscriptions.get(subscription.id).await.unwrap();
        attempts_seen = current.total;
        if current.succeeded == 1 && current.failed == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let final_state = core.subscriptions.get(subscription.id).await.unwrap();
    assert_eq!(final_state.succeeded, 1, "attempts observed so far: {attempts_seen}");
    assert_eq!(final_state.failed, 2);
}

// S6 — cancellation of an active job.
#[tokio::test]
async fn s6_cancelling_an_active_job_fails_with_cancelled() {
    let slow = Arc::new(SlowParser {
        delay: Duration::from_secs(2),
    });
    let registry = registry_with(Kind::Pdf, slow);
    let core = IngestCore::start_with(test_config(), registry, Arc::new(NullOcrEngine));

    let id = submit_pdf_blob(&core, "tenant-1").await;

    // Give the worker time to acquire the job and enter the Parse stage.
    tokio::time::sleep(Duration::from_millis(200)).await;
    core.cancel_job(id).await.unwrap();

    let job = wait_for_terminal(&core, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().code, "CANCELLED");
    assert!(job.result.is_none());
}
