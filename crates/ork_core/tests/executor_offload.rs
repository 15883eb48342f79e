use ork_core::builtin;
use ork_core::{
    AppContext, BlockingExecutor, Criteria, ErrorKind, PoolConfig, Record, ResourceEngine,
};
use serde_json::json;
use std::sync::Arc;

fn shared_context(dir: &tempfile::TempDir) -> (PoolConfig, Arc<AppContext>) {
    let config = PoolConfig::new(dir.path().join("ork.db").to_str().unwrap());
    let context = Arc::new(AppContext::with_config(config.clone()).unwrap());
    (config, context)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_calls_run_on_blocking_threads() {
    let dir = tempfile::tempdir().unwrap();
    let (config, context) = shared_context(&dir);
    let executor = BlockingExecutor::for_pool(&config);

    let mut handles = Vec::new();
    for name in ["North", "South", "East"] {
        let context = Arc::clone(&context);
        handles.push(executor.run(move || {
            let line = builtin::descriptor("line")?;
            let mut input = Record::new();
            input.insert("name".to_string(), json!(name));
            ResourceEngine::new(line, &context).create(input)
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let listed = {
        let context = Arc::clone(&context);
        executor
            .run(move || {
                let line = builtin::descriptor("line")?;
                ResourceEngine::new(line, &context).list(&Criteria::new().orders(["+name"]))
            })
            .await
            .unwrap()
    };
    let names: Vec<&str> = listed
        .iter()
        .map(|record| record["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["East", "North", "South"]);
    assert_eq!(executor.available_permits(), config.capacity());
}

#[tokio::test]
async fn engine_errors_pass_through_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (config, context) = shared_context(&dir);
    let executor = BlockingExecutor::for_pool(&config);

    let err = executor
        .run(move || {
            let line = builtin::descriptor("line")?;
            ResourceEngine::new(line, &context).get("line-missing")
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
