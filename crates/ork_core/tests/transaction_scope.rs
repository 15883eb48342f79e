use ork_core::builtin;
use ork_core::{
    AppContext, Criteria, EngineError, ErrorKind, PoolConfig, Record, ResourceEngine, TxState,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn config(dir: &TempDir, file: &str) -> PoolConfig {
    PoolConfig::new(dir.path().join(file).to_str().unwrap())
}

fn record(value: Value) -> Record {
    value.as_object().unwrap().clone()
}

fn line_count(context: &AppContext) -> u64 {
    ResourceEngine::new(builtin::descriptor("line").unwrap(), context)
        .count(&Default::default())
        .unwrap()
}

#[test]
fn engines_sharing_a_transaction_commit_together() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::with_config(config(&dir, "ork.db")).unwrap();
    let city = builtin::descriptor("city").unwrap();
    let line = builtin::descriptor("line").unwrap();

    let tx = context.begin_transaction().unwrap();
    assert_eq!(tx.state(), TxState::Acquired);
    ResourceEngine::with_handle(city, &tx)
        .create(record(json!({"uuid": "c-1", "id": "sh", "name": "Shanghai"})))
        .unwrap();
    ResourceEngine::with_handle(line, &tx)
        .create(record(json!({"name": "Metro 1", "city_id": "c-1"})))
        .unwrap();
    assert_eq!(tx.state(), TxState::Acquired);
    assert_eq!(tx.depth(), 0);
    assert_eq!(line_count(&context), 0);

    tx.commit().unwrap();
    assert_eq!(line_count(&context), 1);
    assert!(ResourceEngine::new(city, &context).get("c-1").is_ok());
}

#[test]
fn rolled_back_or_dropped_transactions_leave_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::with_config(config(&dir, "ork.db")).unwrap();
    let line = builtin::descriptor("line").unwrap();

    let tx = context.begin_transaction().unwrap();
    ResourceEngine::with_handle(line, &tx)
        .create(record(json!({"name": "Ghost"})))
        .unwrap();
    tx.rollback().unwrap();
    assert_eq!(line_count(&context), 0);

    {
        let tx = context.begin_transaction().unwrap();
        ResourceEngine::with_handle(line, &tx)
            .create(record(json!({"name": "Ghost"})))
            .unwrap();
    }
    assert_eq!(line_count(&context), 0);
    assert_eq!(context.status().unwrap().in_use, 0);
}

#[test]
fn scoped_transaction_rolls_back_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::with_config(config(&dir, "ork.db")).unwrap();
    let line = builtin::descriptor("line").unwrap();

    let result: Result<(), EngineError> = context.transaction(|tx| {
        let engine = ResourceEngine::with_handle(line, tx);
        engine.create(record(json!({"name": "First"})))?;
        tx.enter(|_| {
            assert_eq!(tx.depth(), 1);
            Ok::<_, EngineError>(())
        })?;
        engine.create(record(json!({"name": "First"})))?;
        Ok(())
    });
    assert_eq!(result.unwrap_err().kind(), ErrorKind::ConstraintViolation);
    assert_eq!(line_count(&context), 0);

    context
        .transaction(|tx| {
            ResourceEngine::with_handle(line, tx).create(record(json!({"name": "Kept"})))?;
            Ok::<_, EngineError>(())
        })
        .unwrap();
    assert_eq!(line_count(&context), 1);
}

#[test]
fn session_handle_commits_each_write() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::with_config(config(&dir, "ork.db")).unwrap();
    let line = builtin::descriptor("line").unwrap();

    let session = context.get_session().unwrap();
    let engine = ResourceEngine::with_handle(line, &session);
    engine.create(record(json!({"name": "Loop"}))).unwrap();
    assert_eq!(engine.count(&Default::default()).unwrap(), 1);
    assert_eq!(line_count(&context), 1);
    session.release();
}

#[test]
fn uninitialized_context_fails_fast_until_refreshed() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::new();
    let engine = ResourceEngine::new(builtin::descriptor("line").unwrap(), &context);

    let err = engine.list(&Criteria::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);
    assert!(!context.is_initialized());

    context.refresh(config(&dir, "first.db")).unwrap();
    engine.create(record(json!({"name": "Central"}))).unwrap();
    assert_eq!(engine.count(&Default::default()).unwrap(), 1);

    context.refresh(config(&dir, "second.db")).unwrap();
    assert_eq!(engine.count(&Default::default()).unwrap(), 0);

    context.shutdown();
    let err = engine.count(&Default::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CriticalConfiguration);
}

#[test]
fn exhausted_pool_reports_storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::with_config(PoolConfig {
        pool_size: 1,
        max_overflow: 0,
        pool_timeout_secs: 1,
        ..config(&dir, "ork.db")
    })
    .unwrap();

    let held = context.begin_transaction().unwrap();
    let err = ResourceEngine::new(builtin::descriptor("line").unwrap(), &context)
        .list(&Criteria::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    assert_eq!(err.status_code(), 503);

    held.rollback().unwrap();
    assert_eq!(line_count(&context), 0);
}

#[test]
fn concurrent_writers_on_distinct_rows_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let context = AppContext::with_config(config(&dir, "ork.db")).unwrap();
    let line = builtin::descriptor("line").unwrap();
    let engine = ResourceEngine::new(line, &context);
    let uuids: Vec<String> = (0..8)
        .map(|worker| {
            let created = engine
                .create(record(json!({ "name": format!("Line {worker}") })))
                .unwrap();
            created["uuid"].as_str().unwrap().to_string()
        })
        .collect();

    let failures: Vec<EngineError> = std::thread::scope(|scope| {
        let workers: Vec<_> = uuids
            .iter()
            .enumerate()
            .map(|(worker, uuid)| {
                let context = &context;
                scope.spawn(move || {
                    let engine = ResourceEngine::new(line, context);
                    (0..20)
                        .filter_map(|round| {
                            let name = format!("Line {worker} round {round}");
                            engine
                                .update(uuid.as_str(), record(json!({ "name": name })))
                                .err()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect()
    });

    assert!(
        failures.is_empty(),
        "{} writes failed, first: {}",
        failures.len(),
        failures[0]
    );
    for (worker, uuid) in uuids.iter().enumerate() {
        let stored = engine.get(uuid.as_str()).unwrap();
        assert_eq!(stored["name"], json!(format!("Line {worker} round 19")));
    }
}

#[test]
fn memory_pool_keeps_rows_across_connections() {
    let context = AppContext::with_config(PoolConfig {
        pool_recycle_secs: 0,
        ..PoolConfig::new(":memory:")
    })
    .unwrap();
    let engine = ResourceEngine::new(builtin::descriptor("line").unwrap(), &context);

    engine.create(record(json!({"name": "Central"}))).unwrap();
    assert_eq!(engine.count(&Default::default()).unwrap(), 1);

    let held = context.get_session().unwrap();
    let other = ResourceEngine::new(builtin::descriptor("line").unwrap(), &context);
    assert_eq!(other.count(&Default::default()).unwrap(), 1);
    let via_held = ResourceEngine::with_handle(builtin::descriptor("line").unwrap(), &held);
    assert_eq!(via_held.count(&Default::default()).unwrap(), 1);
}
