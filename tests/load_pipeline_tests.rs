//! End-to-end load runs against an in-memory DuckDB store

#![cfg(feature = "duckdb-backend")]

mod common;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{RecordingStore, document, entity, options};
use raw_entity_loader::{
    DuckDBBackend, LoadContext, LoadError, LoadOptions, LoadStatus, LoadStore,
    MalformedInputError, WriteError,
};
use serde_json::json;

async fn context(batch_size: usize) -> LoadContext<RecordingStore> {
    LoadContext::new(RecordingStore::new().await, options(batch_size))
}

#[tokio::test]
async fn test_three_records_in_batches_of_two() {
    let ctx = context(2).await;
    let doc = document(&[entity(1, "A"), entity(2, "B"), entity(3, "C")]);

    let summary = ctx.run_reader(doc.as_bytes()).await.unwrap();

    assert_eq!(ctx.store().batch_sizes(), vec![2, 1]);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.records_decoded, 3);
    assert_eq!(summary.rows_committed, 3);

    let entry = ctx.store().get_load(summary.load_id).await.unwrap().unwrap();
    assert_eq!(entry.status, LoadStatus::Completed);
    assert_eq!(entry.records_processed, 3);
    assert!(entry.error_message.is_none());
    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 3);

    let row = ctx.store().get_raw_row(2).await.unwrap().unwrap();
    assert_eq!(row.secondary_id.as_deref(), Some("CH0002"));
    assert_eq!(row.payload, entity(2, "B"));
}

#[tokio::test]
async fn test_rerun_of_unchanged_content_keeps_timestamps() {
    let ctx = context(2).await;
    let doc = document(&[entity(1, "A"), entity(2, "B"), entity(3, "C")]);

    ctx.run_reader(doc.as_bytes()).await.unwrap();
    let mut before = Vec::new();
    for id in 1..=3 {
        before.push(ctx.store().get_raw_row(id).await.unwrap().unwrap());
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = ctx.run_reader(doc.as_bytes()).await.unwrap();

    for (id, earlier) in (1..=3).zip(&before) {
        let now = ctx.store().get_raw_row(id).await.unwrap().unwrap();
        assert_eq!(now.loaded_at, earlier.loaded_at, "row {id} was rewritten");
        assert_eq!(now.content_hash, earlier.content_hash);
    }
    assert_eq!(second.rows_committed, 3);
    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_rerun_updates_only_changed_record() {
    let ctx = context(2).await;
    ctx.run_reader(document(&[entity(1, "A"), entity(2, "B"), entity(3, "C")]).as_bytes())
        .await
        .unwrap();
    let row1 = ctx.store().get_raw_row(1).await.unwrap().unwrap();
    let row2 = ctx.store().get_raw_row(2).await.unwrap().unwrap();
    let row3 = ctx.store().get_raw_row(3).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    ctx.run_reader(document(&[entity(1, "A"), entity(2, "B2"), entity(3, "C")]).as_bytes())
        .await
        .unwrap();

    assert_eq!(
        ctx.store().get_raw_row(1).await.unwrap().unwrap().loaded_at,
        row1.loaded_at
    );
    assert_eq!(
        ctx.store().get_raw_row(3).await.unwrap().unwrap().loaded_at,
        row3.loaded_at
    );

    let updated = ctx.store().get_raw_row(2).await.unwrap().unwrap();
    assert!(updated.loaded_at > row2.loaded_at);
    assert_ne!(updated.content_hash, row2.content_hash);
    assert_eq!(updated.payload["name"], "B2");
}

#[tokio::test]
async fn test_key_order_does_not_trigger_update() {
    let ctx = context(10).await;
    let first = r#"{"coveredEntities": [{"ceId": 1, "name": "A", "state": "IL"}]}"#;
    let reordered = r#"{"coveredEntities": [{"state": "IL", "name": "A", "ceId": 1}]}"#;

    ctx.run_reader(first.as_bytes()).await.unwrap();
    let before = ctx.store().get_raw_row(1).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    ctx.run_reader(reordered.as_bytes()).await.unwrap();

    let after = ctx.store().get_raw_row(1).await.unwrap().unwrap();
    assert_eq!(after.loaded_at, before.loaded_at);
    assert_eq!(after.content_hash, before.content_hash);
}

#[tokio::test]
async fn test_duplicate_ids_within_batch_keep_last() {
    let ctx = context(5).await;
    let doc = document(&[entity(1, "first"), entity(2, "B"), entity(1, "last")]);

    let summary = ctx.run_reader(doc.as_bytes()).await.unwrap();

    assert_eq!(ctx.store().batch_sizes(), vec![2]);
    assert_eq!(summary.records_decoded, 3);
    assert_eq!(summary.duplicates_replaced, 1);
    assert_eq!(summary.rows_committed, 2);

    let row = ctx.store().get_raw_row(1).await.unwrap().unwrap();
    assert_eq!(row.payload["name"], "last");
}

#[tokio::test]
async fn test_duplicate_ids_across_batches_last_write_wins() {
    let ctx = context(1).await;
    let doc = document(&[entity(1, "first"), entity(1, "last")]);

    ctx.run_reader(doc.as_bytes()).await.unwrap();

    assert_eq!(ctx.store().batch_sizes(), vec![1, 1]);
    let row = ctx.store().get_raw_row(1).await.unwrap().unwrap();
    assert_eq!(row.payload["name"], "last");
}

#[tokio::test]
async fn test_empty_array_completes_with_zero() {
    let ctx = context(2).await;

    let summary = ctx
        .run_reader(r#"{"coveredEntities": []}"#.as_bytes())
        .await
        .unwrap();

    assert!(ctx.store().batch_sizes().is_empty());
    let entry = ctx.store().get_load(summary.load_id).await.unwrap().unwrap();
    assert_eq!(entry.status, LoadStatus::Completed);
    assert_eq!(entry.records_processed, 0);
}

#[tokio::test]
async fn test_malformed_input_seals_error() {
    let ctx = context(2).await;
    let mut doc = document(&[entity(1, "A"), entity(2, "B"), entity(3, "C")]);
    doc.truncate(doc.len() - 20);

    let err = ctx.run_reader(doc.as_bytes()).await.unwrap_err();
    assert!(matches!(err, LoadError::MalformedInput(_)));

    // The first batch was committed before the stream broke
    assert_eq!(ctx.store().batch_sizes(), vec![2]);
    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::Error);
    assert_eq!(entries[0].records_processed, 2);
    assert!(entries[0].error_message.as_deref().unwrap().contains("malformed input"));
}

#[tokio::test]
async fn test_missing_records_array_seals_error() {
    let ctx = context(2).await;

    let err = ctx
        .run_reader(r#"{"somethingElse": [1, 2]}"#.as_bytes())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoadError::MalformedInput(MalformedInputError::MissingArray { .. })
    ));
    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::Error);
    assert_eq!(entries[0].records_processed, 0);
}

#[tokio::test]
async fn test_record_without_id_seals_error() {
    let ctx = context(2).await;

    let err = ctx
        .run_reader(document(&[json!({"name": "no id"})]).as_bytes())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoadError::MalformedInput(MalformedInputError::InvalidRecord { index: 0, .. })
    ));
    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_write_failure_seals_error_with_committed_rows() {
    let store = RecordingStore::new().await.fail_on_call(2);
    let ctx = LoadContext::new(store, options(2));
    let doc = document(&[entity(1, "A"), entity(2, "B"), entity(3, "C"), entity(4, "D")]);

    let err = ctx.run_reader(doc.as_bytes()).await.unwrap_err();
    assert!(matches!(err, LoadError::Write(WriteError::Store(_))));

    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 2);
    assert!(ctx.store().get_raw_row(3).await.unwrap().is_none());

    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::Error);
    assert_eq!(entries[0].records_processed, 2);
    assert!(entries[0].error_message.as_deref().unwrap().contains("injected failure"));
}

#[tokio::test]
async fn test_write_timeout_is_a_write_error() {
    let store = RecordingStore::new()
        .await
        .write_delay(Duration::from_millis(200));
    let ctx = LoadContext::new(
        store,
        LoadOptions {
            batch_size: 2,
            write_timeout: Duration::from_millis(20),
            ..Default::default()
        },
    );

    let err = ctx
        .run_reader(document(&[entity(1, "A")]).as_bytes())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoadError::Write(WriteError::Timeout { rows: 1, .. })
    ));
    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 0);
    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::Error);
    assert_eq!(entries[0].records_processed, 0);
}

#[tokio::test]
async fn test_cancellation_stops_at_batch_boundary() {
    let flag = Arc::new(AtomicBool::new(false));
    let store = RecordingStore::new().await.cancel_after(1, Arc::clone(&flag));
    let ctx = LoadContext::new(store, options(2)).with_cancel_flag(flag);
    let doc = document(&[entity(1, "A"), entity(2, "B"), entity(3, "C"), entity(4, "D")]);

    let err = ctx.run_reader(doc.as_bytes()).await.unwrap_err();

    assert!(matches!(err, LoadError::Cancelled { batches: 1 }));
    assert_eq!(ctx.store().batch_sizes(), vec![2]);
    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::Error);
    assert_eq!(entries[0].records_processed, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn test_spawned_task_can_cancel_a_synchronous_store() {
    let store = DuckDBBackend::in_memory().unwrap();
    store.initialize().await.unwrap();
    let ctx = LoadContext::new(store, options(1));
    let records: Vec<_> = (1..=50).map(|id| entity(id, "X")).collect();
    let doc = document(&records);

    let cancel = ctx.cancel_flag();
    tokio::spawn(async move {
        cancel.store(true, Ordering::SeqCst);
    });

    let err = ctx.run_reader(doc.as_bytes()).await.unwrap_err();

    assert!(matches!(err, LoadError::Cancelled { batches: 0 }));
    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 0);
    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::Error);
}

#[tokio::test]
async fn test_audit_failure_on_error_path_returns_load_error() {
    let store = RecordingStore::new().await.fail_on_call(1).fail_seal();
    let ctx = LoadContext::new(store, options(2));

    let err = ctx
        .run_reader(document(&[entity(1, "A")]).as_bytes())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Write(_)));
    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::InProgress);
}

#[tokio::test]
async fn test_audit_failure_on_success_path_is_reported() {
    let store = RecordingStore::new().await.fail_seal();
    let ctx = LoadContext::new(store, options(2));

    let err = ctx
        .run_reader(document(&[entity(1, "A")]).as_bytes())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Audit(_)));
    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_run_reads_source_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let records: Vec<_> = (1..=2500).map(|id| entity(id, "bulk")).collect();
    file.write_all(document(&records).as_bytes()).unwrap();
    file.flush().unwrap();

    let store = RecordingStore::new().await;
    let ctx = LoadContext::new(
        store,
        LoadOptions {
            source_path: file.path().to_path_buf(),
            ..Default::default()
        },
    );

    let summary = ctx.run().await.unwrap();

    assert_eq!(ctx.store().batch_sizes(), vec![1000, 1000, 500]);
    assert_eq!(summary.rows_committed, 2500);
    assert_eq!(ctx.store().raw_row_count().await.unwrap(), 2500);
}

#[tokio::test]
async fn test_missing_source_file_is_audited() {
    let store = RecordingStore::new().await;
    let ctx = LoadContext::new(
        store,
        LoadOptions {
            source_path: "/nonexistent/OPA_CE_DAILY_PUBLIC.JSON".into(),
            ..Default::default()
        },
    );

    let err = ctx.run().await.unwrap_err();

    assert!(matches!(err, LoadError::SourceOpen { .. }));
    let entries = ctx.store().recent_loads(1).await.unwrap();
    assert_eq!(entries[0].status, LoadStatus::Error);
    assert!(entries[0].error_message.as_deref().unwrap().contains("failed to open source"));
}
