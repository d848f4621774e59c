//! Worker loop scenarios against the in-memory photo store
//!
//! Run with: cargo test --test worker_test

mod fixtures;
mod helpers;

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fixtures::*;
use helpers::*;
use photo_findings::db::memory::MemoryPhotoStore;
use photo_findings::db::PhotoStore;
use photo_findings::models::findings::{Findings, ProviderStatus};
use photo_findings::models::photo::{FindingsStatus, NewPhoto, PhotoRecord};
use photo_findings::services::backoff::MAX_ATTEMPTS;
use photo_findings::services::orchestrator::FALLBACK_CONFIDENCE;
use photo_findings::services::provider_error::ProviderError;
use photo_findings::services::worker::PhotoOutcome;

async fn upload(store: &MemoryPhotoStore, kind: &str) -> PhotoRecord {
    store
        .insert_pending(NewPhoto {
            job_id: Uuid::new_v4(),
            storage_key: format!("photos/{}.jpg", Uuid::new_v4()),
            kind: kind.to_string(),
        })
        .await
        .expect("Failed to insert photo")
}

async fn reload(store: &MemoryPhotoStore, id: Uuid) -> PhotoRecord {
    store.get(id).await.unwrap().expect("Photo not found")
}

fn findings_of(record: &PhotoRecord) -> Findings {
    serde_json::from_value(record.findings.clone().expect("No findings")).unwrap()
}

#[tokio::test]
async fn test_both_providers_succeed_marks_ready() {
    let store = Arc::new(MemoryPhotoStore::new());
    let worker = build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::ok(detector_labels())),
        Arc::new(FakeVision::ok(vision_judgment())),
    );
    let photo = upload(&store, "before").await;

    let (id, outcome) = worker.tick(Utc::now()).await.unwrap().expect("Nothing claimed");
    assert_eq!(id, photo.id);
    assert_eq!(outcome, PhotoOutcome::Ready);

    let record = reload(&store, photo.id).await;
    assert_eq!(record.findings_status, FindingsStatus::Ready);
    assert_eq!(record.attempts, 1);
    assert!(record.analyzed_at.is_some());
    assert!(record.locked_by.is_none());
    assert!(record.next_attempt_at.is_none());

    let findings = findings_of(&record);
    assert_eq!(findings.version, 1);
    assert_eq!(findings.detector.status, ProviderStatus::Ready);
    assert_eq!(findings.llm.status, ProviderStatus::Ready);

    let combined = &findings.combined;
    assert!(combined.summary_labels.len() <= 10);
    let unique: HashSet<String> = combined.summary_labels.iter().map(|l| l.to_lowercase()).collect();
    assert_eq!(unique.len(), combined.summary_labels.len());
    assert!((combined.confidence - (0.85 * 0.9 + 0.1)).abs() < 1e-9);
    assert_eq!(combined.needs_more_photos, vision_judgment().needs_more_photos);
    assert!(combined.scope.needs_clarification);
}

#[tokio::test]
async fn test_single_provider_success_is_enough() {
    let store = Arc::new(MemoryPhotoStore::new());
    let worker = build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::ok(detector_labels())),
        Arc::new(FakeVision::failing(|| ProviderError::Server { status: 500 })),
    );
    let photo = upload(&store, "site").await;

    worker.tick(Utc::now()).await.unwrap();

    let record = reload(&store, photo.id).await;
    assert_eq!(record.findings_status, FindingsStatus::Ready);
    let findings = findings_of(&record);
    assert_eq!(findings.llm.status, ProviderStatus::Failed);
    assert_eq!(findings.combined.confidence, FALLBACK_CONFIDENCE);
    assert!((0.1..=1.0).contains(&findings.combined.confidence));
    assert_eq!(
        findings.combined.summary_labels,
        vec!["Bathroom", "Tile", "Shower", "Mold", "Grout"]
    );
    assert!(findings.combined.needs_more_photos.is_empty());
}

#[tokio::test]
async fn test_rate_limited_photo_is_rescheduled() {
    let store = Arc::new(MemoryPhotoStore::new());
    let worker = build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::failing(|| ProviderError::Server { status: 502 })),
        Arc::new(FakeVision::failing(|| ProviderError::RateLimited)),
    );
    let photo = upload(&store, "site").await;
    let now = Utc::now();

    let (_, outcome) = worker.tick(now).await.unwrap().unwrap();
    assert!(matches!(outcome, PhotoOutcome::Retry { .. }));

    let record = reload(&store, photo.id).await;
    assert_eq!(record.findings_status, FindingsStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert!(record.locked_by.is_none());
    assert!(record.error.is_some());
    let next = record.next_attempt_at.expect("Retry not scheduled");
    assert!(next >= now + Duration::seconds(1));
    assert!(next < now + Duration::seconds(2));

    // Not due yet.
    assert!(worker.tick(now).await.unwrap().is_none());
}

#[tokio::test]
async fn test_repeated_failures_end_in_failed() {
    let store = Arc::new(MemoryPhotoStore::new());
    let worker = build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::failing(|| ProviderError::RateLimited)),
        Arc::new(FakeVision::failing(|| ProviderError::EmptyResponse)),
    );
    let photo = upload(&store, "site").await;

    let mut now = Utc::now();
    let mut last_next = None;
    for attempt in 1..MAX_ATTEMPTS {
        let (_, outcome) = worker.tick(now).await.unwrap().expect("Photo not claimed");
        let record = reload(&store, photo.id).await;
        assert_eq!(record.findings_status, FindingsStatus::Pending);
        assert_eq!(record.attempts, attempt);

        let next = match outcome {
            PhotoOutcome::Retry { next_attempt_at } => next_attempt_at,
            other => panic!("Expected retry, got {:?}", other),
        };
        assert_eq!(record.next_attempt_at, Some(next));
        if let Some(prev) = last_next {
            assert!(next > prev);
        }
        last_next = Some(next);
        now = next;
    }

    let (_, outcome) = worker.tick(now).await.unwrap().unwrap();
    assert_eq!(outcome, PhotoOutcome::Failed);

    let record = reload(&store, photo.id).await;
    assert_eq!(record.findings_status, FindingsStatus::Failed);
    assert_eq!(record.attempts, MAX_ATTEMPTS);
    assert!(record.next_attempt_at.is_none());
    assert!(record.locked_by.is_none());

    // Terminal: never picked up again.
    assert!(worker.tick(now + Duration::hours(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_non_retryable_failures_fail_immediately() {
    let store = Arc::new(MemoryPhotoStore::new());
    let worker = build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::failing(|| {
            ProviderError::UnsupportedFormat("Gif".to_string())
        })),
        Arc::new(FakeVision::failing(|| ProviderError::Quota("billing".to_string()))),
    );
    let photo = upload(&store, "site").await;

    let (_, outcome) = worker.tick(Utc::now()).await.unwrap().unwrap();
    assert_eq!(outcome, PhotoOutcome::Failed);

    let record = reload(&store, photo.id).await;
    assert_eq!(record.findings_status, FindingsStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert!(record.next_attempt_at.is_none());
}

#[tokio::test]
async fn test_concurrent_workers_never_share_a_photo() {
    let store = Arc::new(MemoryPhotoStore::new());
    let detector = Arc::new(FakeDetector::ok(detector_labels()));
    let vision = Arc::new(FakeVision::ok(vision_judgment()).with_delay(std::time::Duration::from_millis(50)));
    let w1 = build_worker("w1", store.clone(), detector.clone(), vision.clone());
    let w2 = build_worker("w2", store.clone(), detector.clone(), vision.clone());
    let photo = upload(&store, "site").await;
    let now = Utc::now();

    let (a, b) = futures::join!(w1.tick(now), w2.tick(now));
    let processed: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].0, photo.id);

    let record = reload(&store, photo.id).await;
    assert_eq!(record.attempts, 1);
    assert_eq!(detector.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_claims_single_winner() {
    let store = Arc::new(MemoryPhotoStore::new());
    let photo = upload(&store, "site").await;
    let now = Utc::now();
    let expiry = Duration::minutes(2);

    let claims = futures::future::join_all(
        (0..8).map(|i| {
            let store = store.clone();
            let id = photo.id;
            async move { store.claim(id, &format!("w{i}"), now, expiry).await.unwrap() }
        }),
    )
    .await;

    assert_eq!(claims.iter().filter(|c| c.is_some()).count(), 1);
}

#[tokio::test]
async fn test_expired_lock_recovered_by_other_worker() {
    let store = Arc::new(MemoryPhotoStore::new());
    let photo = upload(&store, "site").await;

    // w1 claimed three minutes ago and never reported back.
    let crashed_at = Utc::now() - Duration::minutes(3);
    store
        .claim(photo.id, "w1", crashed_at, Duration::minutes(2))
        .await
        .unwrap()
        .expect("Initial claim failed");

    let w2 = build_worker(
        "w2",
        store.clone(),
        Arc::new(FakeDetector::ok(detector_labels())),
        Arc::new(FakeVision::ok(vision_judgment())),
    );

    let (id, outcome) = w2.tick(Utc::now()).await.unwrap().expect("Expired lock not reclaimed");
    assert_eq!(id, photo.id);
    assert_eq!(outcome, PhotoOutcome::Ready);

    let record = reload(&store, photo.id).await;
    assert_eq!(record.attempts, 2);
    assert_eq!(record.findings_status, FindingsStatus::Ready);
}

#[tokio::test]
async fn test_live_lock_is_respected() {
    let store = Arc::new(MemoryPhotoStore::new());
    let photo = upload(&store, "site").await;
    let now = Utc::now();
    store
        .claim(photo.id, "w1", now - Duration::seconds(30), Duration::minutes(2))
        .await
        .unwrap()
        .unwrap();

    let w2 = build_worker(
        "w2",
        store.clone(),
        Arc::new(FakeDetector::ok(detector_labels())),
        Arc::new(FakeVision::ok(vision_judgment())),
    );
    assert!(w2.tick(now).await.unwrap().is_none());
    assert_eq!(reload(&store, photo.id).await.locked_by.as_deref(), Some("w1"));
}

#[tokio::test]
async fn test_one_photo_per_iteration_newest_first() {
    let store = Arc::new(MemoryPhotoStore::new());
    let older = upload(&store, "site").await;
    let mut newer = upload(&store, "site").await;
    newer.created_at = older.created_at + Duration::seconds(5);
    store.put(newer.clone()).await;

    let worker = build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::ok(detector_labels())),
        Arc::new(FakeVision::ok(vision_judgment())),
    );

    let now = Utc::now() + Duration::seconds(10);
    let (first, _) = worker.tick(now).await.unwrap().unwrap();
    assert_eq!(first, newer.id);
    assert_eq!(reload(&store, older.id).await.findings_status, FindingsStatus::Pending);

    let (second, _) = worker.tick(now).await.unwrap().unwrap();
    assert_eq!(second, older.id);
    assert!(worker.tick(now).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reanalysis_requeues_ready_photo() {
    let store = Arc::new(MemoryPhotoStore::new());
    let worker = build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::ok(detector_labels())),
        Arc::new(FakeVision::ok(vision_judgment())),
    );
    let photo = upload(&store, "site").await;
    worker.tick(Utc::now()).await.unwrap();

    let reset = store.request_reanalysis(photo.id).await.unwrap().unwrap();
    assert_eq!(reset.findings_status, FindingsStatus::Pending);
    assert!(reset.findings.is_some());

    let (_, outcome) = worker.tick(Utc::now()).await.unwrap().unwrap();
    assert_eq!(outcome, PhotoOutcome::Ready);
    assert_eq!(reload(&store, photo.id).await.attempts, 1);
}

#[tokio::test]
async fn test_run_processes_until_cancelled() {
    let store = Arc::new(MemoryPhotoStore::new());
    let worker = Arc::new(build_worker(
        "w1",
        store.clone(),
        Arc::new(FakeDetector::ok(detector_labels())),
        Arc::new(FakeVision::ok(vision_judgment())),
    ));
    let photo = upload(&store, "site").await;

    let shutdown = CancellationToken::new();
    let handle = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if reload(&store, photo.id).await.findings_status == FindingsStatus::Ready {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "Photo was never processed");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("Worker did not stop after cancellation")
        .expect("Worker task panicked");
}
