//! Integration tests for consentgen
//!
//! End-to-end runs against the in-memory connector, under paused tokio time.

use std::time::Duration;

use consentgen::connector::{FailureKind, InMemoryConnector};
use consentgen::runner::{self, batch};
use consentgen::{
    Cancellation, ConsentCategory, EntityType, ExistenceChecker, Expander, RateLimitConfig, RateLimiter,
    SnapshotMode, Status, TemplateStore, TriggerKind, Writer, cancellation,
};
use serde_json::json;

fn writer(normalize_order: bool) -> Writer {
    Writer::new(
        RateLimiter::new(&RateLimitConfig::default()),
        ExistenceChecker::new(normalize_order),
        SnapshotMode::PerBatch,
    )
}

fn full_batch(store: &TemplateStore) -> Vec<consentgen::Entity> {
    batch(store, &Expander::new(store))
}

// =============================================================================
// Rate budget
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_no_more_than_ten_creates_per_second() {
    let connector = InMemoryConnector::new();
    let store = TemplateStore::default();

    let report = runner::run(
        &connector,
        "Consent",
        full_batch(&store),
        &mut writer(false),
        &Cancellation::never(),
    )
    .await
    .expect("run should succeed");
    assert_eq!(report.summary.created, 41);

    let stamps: Vec<_> = connector.create_calls().into_iter().map(|c| c.at).collect();
    assert_eq!(stamps.len(), 41);
    for (i, &start) in stamps.iter().enumerate() {
        let in_window = stamps[i..]
            .iter()
            .filter(|&&t| t < start + Duration::from_secs(1))
            .count();
        assert!(in_window <= 10, "{} creates within one second", in_window);
    }

    let span = *stamps.last().unwrap() - stamps[0];
    assert_eq!(span, Duration::from_secs(4));
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rerun_is_all_skipped() {
    let connector = InMemoryConnector::new();
    let store = TemplateStore::default();

    runner::run(
        &connector,
        "Consent",
        full_batch(&store),
        &mut writer(false),
        &Cancellation::never(),
    )
    .await
    .expect("first run");
    let creates = connector.create_calls().len();

    let report = runner::run(
        &connector,
        "Consent",
        full_batch(&store),
        &mut writer(false),
        &Cancellation::never(),
    )
    .await
    .expect("second run");

    assert_eq!(report.summary.skipped, 41);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(connector.create_calls().len(), creates);
    assert_eq!(connector.workspaces().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_after_partial_failure_fills_gaps() {
    let connector = InMemoryConnector::new();
    let store = TemplateStore::default();
    let failing = "Evidon Consent Blocking - Click - Functional";
    connector.fail_create(failing, FailureKind::Quota);

    let first = runner::run(
        &connector,
        "Consent",
        full_batch(&store),
        &mut writer(false),
        &Cancellation::never(),
    )
    .await
    .expect("first run");
    assert_eq!(first.summary.failed, 1);
    assert_eq!(first.summary.created, 40);
    assert_eq!(first.outcomes.len(), 41);
    let failed = first.outcomes.iter().find(|o| o.status == Status::Failed).unwrap();
    assert_eq!(failed.entity.name(), failing);
    assert_eq!(first.exit_code(), 1);

    // Quota recovered
    connector.clear_failures();

    let creates_before = connector.create_calls().len();
    let second = runner::run(
        &connector,
        "Consent",
        full_batch(&store),
        &mut writer(false),
        &Cancellation::never(),
    )
    .await
    .expect("second run");
    assert_eq!(second.summary.created, 1);
    assert_eq!(second.summary.skipped, 40);
    let retried: Vec<_> = connector.create_calls()[creates_before..]
        .iter()
        .map(|c| c.name.clone())
        .collect();
    assert_eq!(retried, vec![failing.to_string()]);
}

// =============================================================================
// Order normalization
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reordered_remote_variable() {
    let store = TemplateStore::default();
    let variable = json!({
        "name": "MPX - DLV - consentCategories",
        "type": "v",
        "parameter": [
            {"type": "template", "key": "name", "value": "consentCategories"},
            {"type": "boolean", "key": "setDefaultValue", "value": "false"},
            {"type": "integer", "key": "dataLayerVersion", "value": "2"}
        ],
        "path": "accounts/1/containers/1/workspaces/1/variables/7"
    });
    let only_variable = vec![consentgen::Entity::Variable(store.variable())];

    // Order-sensitive comparison misses it and the remote rejects the duplicate name
    let connector = InMemoryConnector::new();
    let info = connector.add_workspace("Consent");
    connector.seed(&info.path, EntityType::Variable, variable.clone()).unwrap();
    let report = runner::run(
        &connector,
        "Consent",
        only_variable.clone(),
        &mut writer(false),
        &Cancellation::never(),
    )
    .await
    .unwrap();
    assert_eq!(report.outcomes[0].status, Status::Failed);
    assert!(report.outcomes[0].error.as_deref().unwrap().contains("duplicate name"));

    // Order-insensitive comparison recognises it
    let connector = InMemoryConnector::new();
    let info = connector.add_workspace("Consent");
    connector.seed(&info.path, EntityType::Variable, variable).unwrap();
    let report = runner::run(
        &connector,
        "Consent",
        only_variable,
        &mut writer(true),
        &Cancellation::never(),
    )
    .await
    .unwrap();
    assert_eq!(report.outcomes[0].status, Status::Skipped);
    assert!(connector.create_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_remote_entity_still_creates() {
    let store = TemplateStore::default();
    let connector = InMemoryConnector::new();
    let info = connector.add_workspace("Consent");
    connector
        .seed(
            &info.path,
            EntityType::Trigger,
            json!({"name": "Legacy", "type": "pageview", "filter": {"oops": true}}),
        )
        .unwrap();

    let entities = batch(
        &store,
        &Expander::new(&store)
            .with_kinds([TriggerKind::Pageview])
            .with_categories([ConsentCategory::Analytics]),
    );
    let report = runner::run(&connector, "Consent", entities, &mut writer(true), &Cancellation::never())
        .await
        .unwrap();
    assert_eq!(report.summary.created, 2);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_batch() {
    let connector = InMemoryConnector::new();
    let store = TemplateStore::default();
    let (handle, cancel) = cancellation();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.cancel();
    });

    let report = runner::run(&connector, "Consent", full_batch(&store), &mut writer(false), &cancel)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 41);
    assert_eq!(report.summary.created, 20);
    assert_eq!(report.summary.cancelled, 21);
    assert_eq!(report.exit_code(), 1);
    assert!(
        report.outcomes[20..]
            .iter()
            .all(|o| o.status == Status::Cancelled)
    );
    assert_eq!(connector.create_calls().len(), 20);
}

// =============================================================================
// Plan
// =============================================================================

#[tokio::test]
async fn test_plan_never_writes() {
    let connector = InMemoryConnector::new();
    let info = connector.add_workspace("Consent");
    let store = TemplateStore::default();
    let entities = full_batch(&store);
    connector
        .seed(&info.path, EntityType::Variable, entities[0].body().unwrap())
        .unwrap();

    let report = runner::plan(&connector, "Consent", entities, &writer(false)).await.unwrap();
    assert_eq!(report.skips(), 1);
    assert_eq!(report.creates(), 40);
    assert!(connector.create_calls().is_empty());
}
