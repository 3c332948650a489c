// libs/offline-sync-cell/tests/sync_queue_test.rs

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use case_booking_cell::*;
use offline_sync_cell::*;

use common::{advance, fast_settings, sample_case, FlakyRepository};

fn queue_over(repository: Arc<FlakyRepository>) -> (Arc<SyncQueueManager>, Arc<LocalPersistence>) {
    let persistence = Arc::new(LocalPersistence::in_memory());
    let queue = Arc::new(SyncQueueManager::new(
        persistence.clone(),
        repository,
        UiEventBus::default(),
        &fast_settings(),
    ));
    (queue, persistence)
}

#[tokio::test]
async fn test_flush_replays_in_order_and_matches_direct_write() {
    let repository = Arc::new(FlakyRepository::new());
    let (queue, _) = queue_over(repository.clone());

    let mut case = sample_case("Singapore", 1);
    queue
        .enqueue(SyncOperation::CreateCase { case: case.clone(), quantities: vec![] })
        .await
        .unwrap();
    let entry = advance(&mut case, CaseStatus::OrderPreparation);
    queue
        .enqueue(SyncOperation::UpdateCaseStatus { case: case.clone(), entry })
        .await
        .unwrap();

    let report = queue.flush().await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(queue.pending_count().await.unwrap(), 0);

    let stored = repository.inner.get_case(case.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CaseStatus::OrderPreparation);
    assert_eq!(stored.status_history.len(), 2);
    assert_eq!(stored.status_history.last().unwrap().status, stored.status);
}

#[tokio::test]
async fn test_failed_item_stays_queued_with_retry_count() {
    let repository = Arc::new(FlakyRepository::new());
    let (queue, _) = queue_over(repository.clone());
    queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Malaysia", 1), quantities: vec![] })
        .await
        .unwrap();

    repository.set_unreachable(true);
    let report = queue.flush().await.unwrap();

    assert_eq!(report.retried, 1);
    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retries, 1);
    assert!(pending[0].last_error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_retry_exhaustion_moves_item_to_dead_letters() {
    let repository = Arc::new(FlakyRepository::new());
    let (queue, _) = queue_over(repository.clone());
    let item = queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Malaysia", 1), quantities: vec![] })
        .await
        .unwrap();

    repository.set_unreachable(true);
    for _ in 0..3 {
        queue.flush().await.unwrap();
    }

    assert_eq!(queue.pending_count().await.unwrap(), 0);
    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].item.id, item.id);
    assert_eq!(dead[0].item.retries, 3);

    // Never resurfaces on later passes
    repository.set_unreachable(false);
    let report = queue.flush().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(repository.inner.case_count().await, 0);
}

#[tokio::test]
async fn test_requeue_and_discard_dead_letters() {
    let repository = Arc::new(FlakyRepository::new());
    let (queue, _) = queue_over(repository.clone());
    let first = queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Singapore", 1), quantities: vec![] })
        .await
        .unwrap();
    let second = queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Singapore", 2), quantities: vec![] })
        .await
        .unwrap();

    repository.set_unreachable(true);
    for _ in 0..3 {
        queue.flush().await.unwrap();
    }
    assert_eq!(queue.dead_letters().await.unwrap().len(), 2);

    let requeued = queue.requeue_dead_letter(first.id).await.unwrap();
    assert_eq!(requeued.retries, 0);
    assert!(requeued.last_error.is_none());

    queue.discard_dead_letter(second.id).await.unwrap();
    assert!(queue.dead_letters().await.unwrap().is_empty());
    assert_matches!(
        queue.discard_dead_letter(second.id).await,
        Err(SyncError::DeadLetterNotFound(id)) if id == second.id
    );

    repository.set_unreachable(false);
    assert_eq!(queue.flush().await.unwrap().synced, 1);
    assert_eq!(repository.inner.case_count().await, 1);
}

#[tokio::test]
async fn test_unknown_dead_letter_is_reported() {
    let (queue, _) = queue_over(Arc::new(FlakyRepository::new()));
    assert_matches!(
        queue.requeue_dead_letter(Uuid::new_v4()).await,
        Err(SyncError::DeadLetterNotFound(_))
    );
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let repository = Arc::new(FlakyRepository::new());
    let (queue, persistence) = queue_over(repository.clone());
    queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Vietnam", 4), quantities: vec![] })
        .await
        .unwrap();
    drop(queue);

    let restarted = SyncQueueManager::new(persistence, repository, UiEventBus::default(), &fast_settings());
    assert_eq!(restarted.pending_count().await.unwrap(), 1);
    assert_eq!(restarted.flush().await.unwrap().synced, 1);
}

#[tokio::test]
async fn test_clear_keeps_dead_letters() {
    let repository = Arc::new(FlakyRepository::new());
    let (queue, _) = queue_over(repository.clone());
    queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Thailand", 1), quantities: vec![] })
        .await
        .unwrap();

    assert_eq!(queue.clear().await.unwrap(), 1);
    assert_eq!(queue.pending_count().await.unwrap(), 0);
    assert!(queue.dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_flush_is_skipped() {
    let repository = Arc::new(FlakyRepository::new());
    let persistence = Arc::new(LocalPersistence::in_memory());
    let settings = shared_config::SyncSettings {
        sync_item_delay_ms: 50,
        ..fast_settings()
    };
    let queue = Arc::new(SyncQueueManager::new(persistence, repository, UiEventBus::default(), &settings));
    for n in 1..=3 {
        queue
            .enqueue(SyncOperation::CreateCase { case: sample_case("Singapore", n), quantities: vec![] })
            .await
            .unwrap();
    }

    let background = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.flush().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = queue.flush().await.unwrap();
    assert!(second.skipped);

    let first = background.await.unwrap().unwrap();
    assert_eq!(first.synced, 3);
    assert!(!queue.is_processing());
}

#[tokio::test]
async fn test_enqueue_during_flush_is_not_lost() {
    let repository = Arc::new(FlakyRepository::new());
    let persistence = Arc::new(LocalPersistence::in_memory());
    let settings = shared_config::SyncSettings {
        sync_item_delay_ms: 50,
        ..fast_settings()
    };
    let queue = Arc::new(SyncQueueManager::new(persistence, repository, UiEventBus::default(), &settings));
    for n in 1..=2 {
        queue
            .enqueue(SyncOperation::CreateCase { case: sample_case("Singapore", n), quantities: vec![] })
            .await
            .unwrap();
    }

    let background = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.flush().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let late = queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Singapore", 9), quantities: vec![] })
        .await
        .unwrap();

    background.await.unwrap().unwrap();
    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, late.id);
}

#[tokio::test]
async fn test_worker_flushes_when_connection_returns() {
    let repository = Arc::new(FlakyRepository::new());
    let (queue, _) = queue_over(repository.clone());
    queue
        .enqueue(SyncOperation::CreateCase { case: sample_case("Indonesia", 1), quantities: vec![] })
        .await
        .unwrap();

    let (online_tx, online_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(queue.clone().run(online_rx, shutdown_rx));

    online_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), async {
        while queue.pending_count().await.unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue should drain after reconnect");

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();
    assert_eq!(repository.inner.case_count().await, 1);
}
