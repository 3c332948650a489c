// libs/offline-sync-cell/tests/hybrid_storage_test.rs

mod common;

use assert_matches::assert_matches;
use tokio::sync::broadcast::error::TryRecvError;

use case_booking_cell::*;
use offline_sync_cell::*;

use common::{advance, sample_case, Harness};

fn coordinator(id: &str) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        username: format!("{}-login", id),
        name: "Wei Ling Chua".to_string(),
        email: Some(format!("{}@clinic.sg", id)),
        role: "operations".to_string(),
        departments: vec!["Orthopedics".to_string()],
        countries: vec!["Singapore".to_string()],
        enabled: true,
    }
}

#[tokio::test]
async fn test_online_write_goes_straight_to_backend() {
    let harness = Harness::new();
    let case = sample_case("Singapore", 1);

    let outcome = harness.storage.create_case(&case, &[]).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Synced);
    assert_eq!(harness.repository.inner.case_count().await, 1);
    assert_eq!(harness.queue().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreachable_backend_queues_write_and_warns() {
    let harness = Harness::new();
    let mut events = harness.events.subscribe();
    harness.repository.set_unreachable(true);

    let outcome = harness
        .storage
        .create_case(&sample_case("Singapore", 1), &[])
        .await
        .unwrap();

    assert_eq!(outcome, WriteOutcome::Queued);
    assert_eq!(harness.queue().pending_count().await.unwrap(), 1);
    // One attempt plus three retries
    assert_eq!(harness.repository.call_count(), 4);

    let event = events.try_recv().unwrap();
    assert_eq!(event.level(), UiLevel::Warning);
    assert!(event.message().contains("saved locally"));
}

#[tokio::test]
async fn test_goes_offline_after_three_failed_writes() {
    let harness = Harness::new();
    harness.repository.set_unreachable(true);

    for n in 1..=3 {
        harness
            .storage
            .create_case(&sample_case("Singapore", n), &[])
            .await
            .unwrap();
    }
    assert!(!harness.storage.monitor().is_online());

    // Offline writes skip the backend entirely
    let calls_before = harness.repository.call_count();
    let outcome = harness
        .storage
        .create_case(&sample_case("Singapore", 4), &[])
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Queued);
    assert_eq!(harness.repository.call_count(), calls_before);

    let status = harness.storage.connection_status().await.unwrap();
    assert!(!status.is_online);
    assert_eq!(status.offline_resources, vec![CASES_RESOURCE.to_string()]);
    assert_eq!(status.pending_sync_items, 4);
    assert_eq!(status.metrics[CASES_RESOURCE].failures, 3);
    assert!(!status.is_syncing);
}

#[tokio::test]
async fn test_probe_recovers_and_queue_drains() {
    let harness = Harness::new();
    harness.repository.set_unreachable(true);
    for n in 1..=3 {
        harness
            .storage
            .create_case(&sample_case("Malaysia", n), &[])
            .await
            .unwrap();
    }
    assert!(!harness.storage.probe().await);
    assert!(!harness.storage.monitor().is_online());

    harness.repository.set_unreachable(false);
    assert!(harness.storage.probe().await);
    assert!(harness.storage.monitor().is_online());

    let report = harness.queue().flush().await.unwrap();
    assert_eq!(report.synced, 3);
    assert_eq!(harness.repository.inner.case_count().await, 3);

    let status = harness.storage.connection_status().await.unwrap();
    assert!(status.offline_resources.is_empty());
    assert_eq!(status.pending_sync_items, 0);
}

#[tokio::test]
async fn test_permission_denied_is_surfaced_not_queued() {
    let harness = Harness::new();
    let mut events = harness.events.subscribe();
    harness.repository.set_forbidden(true);

    let result = harness.storage.create_case(&sample_case("Singapore", 1), &[]).await;

    assert_matches!(result, Err(SyncError::PermissionDenied(_)));
    assert_eq!(harness.repository.call_count(), 1);
    assert_eq!(harness.queue().pending_count().await.unwrap(), 0);
    assert!(harness.storage.monitor().is_online());

    let event = events.try_recv().unwrap();
    assert_eq!(event.level(), UiLevel::Error);
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_status_update_syncs_with_history() {
    let harness = Harness::new();
    let mut case = sample_case("Singapore", 1);
    harness.storage.create_case(&case, &[]).await.unwrap();

    let entry = advance(&mut case, CaseStatus::OrderPreparation);
    let outcome = harness.storage.update_case_status(&case, &entry).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Synced);
    let stored = harness.repository.inner.get_case(case.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CaseStatus::OrderPreparation);
    assert_eq!(stored.status_history.last().unwrap().id, entry.id);
}

#[tokio::test]
async fn test_status_update_waits_behind_queued_create() {
    let harness = Harness::new();
    let mut case = sample_case("Singapore", 1);
    harness.repository.set_unreachable(true);
    assert_eq!(harness.storage.create_case(&case, &[]).await.unwrap(), WriteOutcome::Queued);

    // Backend is back but the create has not been flushed yet
    harness.repository.set_unreachable(false);
    let mut events = harness.events.subscribe();
    let calls_before = harness.repository.call_count();
    let entry = advance(&mut case, CaseStatus::OrderPreparation);

    let outcome = harness.storage.update_case_status(&case, &entry).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Queued);
    assert_eq!(harness.repository.call_count(), calls_before);
    assert_eq!(harness.queue().pending_count().await.unwrap(), 2);
    let event = events.try_recv().unwrap();
    assert_eq!(event.level(), UiLevel::Warning);
    assert!(event.message().contains("queued behind"));

    let report = harness.queue().flush().await.unwrap();
    assert_eq!(report.synced, 2);
    let stored = harness.repository.inner.get_case(case.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CaseStatus::OrderPreparation);
    assert_eq!(stored.status_history.last().unwrap().id, entry.id);
}

#[tokio::test]
async fn test_writes_to_other_cases_are_not_held_back() {
    let harness = Harness::new();
    harness.repository.set_unreachable(true);
    harness
        .storage
        .create_case(&sample_case("Singapore", 1), &[])
        .await
        .unwrap();
    harness.repository.set_unreachable(false);

    let outcome = harness
        .storage
        .create_case(&sample_case("Singapore", 2), &[])
        .await
        .unwrap();

    assert_eq!(outcome, WriteOutcome::Synced);
    assert_eq!(harness.queue().pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rejected_status_update_restores_cached_case() {
    let harness = Harness::new();
    let mut case = sample_case("Singapore", 1);
    harness.storage.create_case(&case, &[]).await.unwrap();

    harness.repository.set_forbidden(true);
    let entry = advance(&mut case, CaseStatus::OrderPreparation);
    assert_matches!(
        harness.storage.update_case_status(&case, &entry).await,
        Err(SyncError::PermissionDenied(_))
    );

    harness.repository.set_forbidden(false);
    harness.repository.set_unreachable(true);
    let cached = harness.storage.get_case(case.id).await.unwrap().unwrap();
    assert_eq!(cached.status, CaseStatus::CaseBooked);
}

#[tokio::test]
async fn test_rejected_create_leaves_nothing_cached() {
    let harness = Harness::new();
    let case = sample_case("Singapore", 1);
    let quantities = vec![CaseQuantity {
        case_id: case.id,
        item_type: ItemType::SurgerySet,
        item_name: "Knee Set A".to_string(),
        quantity: 1,
    }];

    harness.repository.set_forbidden(true);
    assert!(harness.storage.create_case(&case, &quantities).await.is_err());

    assert!(harness.persistence.keys("cache:").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_case_serves_cache_when_backend_is_down() {
    let harness = Harness::new();
    let case = sample_case("Singapore", 1);
    harness.storage.create_case(&case, &[]).await.unwrap();

    harness.repository.set_unreachable(true);
    let loaded = harness.storage.get_case(case.id).await.unwrap().unwrap();

    assert_eq!(loaded.id, case.id);
    assert_eq!(loaded.case_reference_number, case.case_reference_number);
}

#[tokio::test]
async fn test_get_case_falls_back_to_unsynced_local_copy() {
    let harness = Harness::new();
    let case = sample_case("Singapore", 1);
    harness.repository.set_unreachable(true);
    harness.storage.create_case(&case, &[]).await.unwrap();
    harness.repository.set_unreachable(false);

    // Backend reports no such case yet
    let loaded = harness.storage.get_case(case.id).await.unwrap();
    assert_eq!(loaded.map(|c| c.id), Some(case.id));
}

#[tokio::test]
async fn test_list_cases_includes_pending_creates() {
    let harness = Harness::new();
    let synced = sample_case("Singapore", 1);
    harness.storage.create_case(&synced, &[]).await.unwrap();

    harness.repository.set_unreachable(true);
    let pending = sample_case("Singapore", 2);
    harness.storage.create_case(&pending, &[]).await.unwrap();
    let elsewhere = sample_case("Malaysia", 1);
    harness.storage.create_case(&elsewhere, &[]).await.unwrap();
    harness.repository.set_unreachable(false);

    let cases = harness.storage.list_cases(Some("Singapore")).await.unwrap();
    let mut ids: Vec<_> = cases.iter().map(|c| c.id).collect();
    ids.sort();
    let mut expected = vec![synced.id, pending.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_list_cases_offline_reads_cache() {
    let harness = Harness::new();
    harness.repository.set_unreachable(true);
    for n in 1..=3 {
        harness
            .storage
            .create_case(&sample_case("Thailand", n), &[])
            .await
            .unwrap();
    }

    let cases = harness.storage.list_cases(Some("Thailand")).await.unwrap();
    assert_eq!(cases.len(), 3);
    assert!(harness.storage.list_cases(Some("Vietnam")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_users_falls_back_to_cache() {
    let harness = Harness::new();
    harness.storage.create_user(&coordinator("u-1")).await.unwrap();
    assert_eq!(harness.storage.list_users().await.unwrap().len(), 1);

    harness.repository.set_unreachable(true);
    let users = harness.storage.list_users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, "u-1");
}

#[tokio::test]
async fn test_list_users_offline_without_cache_is_unavailable() {
    let harness = Harness::new();
    harness.repository.set_unreachable(true);
    for n in 1..=3 {
        harness
            .storage
            .create_user(&coordinator(&format!("u-{}", n)))
            .await
            .unwrap();
    }
    // Queued users are cached, drop them to model a cold start
    harness.persistence.remove("cache:users").await.unwrap();
    let mut events = harness.events.subscribe();

    assert_matches!(harness.storage.list_users().await, Err(SyncError::Unavailable(_)));
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_list_users_failure_raises_no_toast() {
    let harness = Harness::new();
    let mut events = harness.events.subscribe();
    harness.repository.set_unreachable(true);

    assert_matches!(harness.storage.list_users().await, Err(SyncError::Unavailable(_)));
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));

    harness.repository.set_unreachable(false);
    harness.repository.set_forbidden(true);
    assert_matches!(harness.storage.list_users().await, Err(SyncError::PermissionDenied(_)));
    assert_matches!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn test_update_user_permission_error_is_not_queued() {
    let harness = Harness::new();
    harness.storage.create_user(&coordinator("u-2")).await.unwrap();

    harness.repository.set_forbidden(true);
    let mut renamed = coordinator("u-2");
    renamed.name = "Wei Ling Chua-Tan".to_string();
    assert_matches!(
        harness.storage.update_user(&renamed).await,
        Err(SyncError::PermissionDenied(_))
    );
    assert_eq!(harness.queue().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_next_sequence_never_reuses_local_references() {
    let harness = Harness::new();
    harness.repository.set_unreachable(true);
    harness
        .storage
        .create_case(&sample_case("Singapore", 7), &[])
        .await
        .unwrap();

    // Backend has nothing yet, the locally cached case still counts
    harness.repository.set_unreachable(false);
    assert_eq!(harness.storage.next_case_sequence("Singapore").await.unwrap(), 8);
    assert_eq!(harness.storage.next_case_sequence("Malaysia").await.unwrap(), 1);

    harness.repository.set_unreachable(true);
    assert_eq!(harness.storage.next_case_sequence("Singapore").await.unwrap(), 8);
}

#[tokio::test]
async fn test_quantities_available_before_sync() {
    let harness = Harness::new();
    let case = sample_case("Singapore", 1);
    let quantities = vec![CaseQuantity {
        case_id: case.id,
        item_type: ItemType::SurgerySet,
        item_name: "Knee Set A".to_string(),
        quantity: 2,
    }];

    harness.repository.set_unreachable(true);
    harness.storage.create_case(&case, &quantities).await.unwrap();
    assert_eq!(harness.storage.get_case_quantities(case.id).await.unwrap(), quantities);

    harness.repository.set_unreachable(false);
    assert_eq!(harness.storage.get_case_quantities(case.id).await.unwrap(), quantities);

    harness.queue().flush().await.unwrap();
    assert_eq!(
        harness.repository.inner.get_case_quantities(case.id).await.unwrap(),
        quantities
    );
}
