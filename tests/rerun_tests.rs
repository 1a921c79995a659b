mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::*;
use step_engine::engine::{RerunError, RerunResolver};
use step_engine::plan::{EngineConfig, Parameters, Plan, Step};
use step_engine::queue::{BrokerJobQueue, ChannelBroker, InMemoryJobQueue};
use step_engine::store::{ExecutionStore, MemoryStepSource, RecordRef};
use step_engine::{MemoryStore, RunStatus, StepExecutorRegistry, StepResult};
use uuid::Uuid;

fn catalog() -> Vec<Step> {
    vec![
        Step::new("f", "fail"),
        Step::new("d1", "noop").depends_on("f"),
        Step::new("d2", "noop").depends_on("d1"),
        Step::new("unrelated", "noop"),
    ]
}

async fn failed_records(store: &MemoryStore, step_ids: &[&str]) -> (Uuid, Vec<Uuid>) {
    let execution_id = Uuid::new_v4();
    store
        .create_execution(execution_id, Some("test-42"), RunStatus::Running)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for step_id in step_ids {
        let id = Uuid::new_v4();
        store
            .create_execution_step(id, execution_id, step_id, RunStatus::Queued)
            .await
            .unwrap();
        store
            .update_execution_step_result(id, RunStatus::Failed, r#"{"output":null,"error":"x"}"#, 1)
            .await
            .unwrap();
        ids.push(id);
    }
    (execution_id, ids)
}

fn step_ids(plan: &Plan) -> Vec<&str> {
    plan.steps().iter().map(|s| s.id.as_str()).collect()
}

#[tokio::test]
async fn test_rerun_includes_transitive_dependents() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemoryStepSource::new(store.clone()));
    source.add_steps(catalog()).await;
    let queue = CapturingQueue::default();
    let resolver = RerunResolver::new(store.clone(), source, Arc::new(queue.clone()));

    let (execution_id, failed) = failed_records(&store, &["f"]).await;
    let rerun = resolver
        .rerun_failed_steps(execution_id, &failed)
        .await
        .unwrap();

    assert_ne!(rerun.execution_id, execution_id);
    assert!(rerun.handle.is_detached());

    let plans = queue.plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].execution_id(), rerun.execution_id);
    assert_eq!(step_ids(&plans[0]), vec!["f", "d1", "d2"]);
    assert_eq!(plans[0].test_id(), Some("test-42"));
    assert_eq!(plans[0].get_step("d1").unwrap().depends_on.as_deref(), Some("f"));

    let record = store.execution(rerun.execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Queued);
    assert_eq!(record.test_id.as_deref(), Some("test-42"));
}

#[tokio::test]
async fn test_rerun_deduplicates_failed_dependents() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemoryStepSource::new(store.clone()));
    source.add_steps(catalog()).await;
    let queue = CapturingQueue::default();
    let resolver = RerunResolver::new(store.clone(), source, Arc::new(queue.clone()));

    let (execution_id, failed) = failed_records(&store, &["f", "d1"]).await;
    resolver
        .rerun_failed_steps(execution_id, &failed)
        .await
        .unwrap();

    assert_eq!(step_ids(&queue.plans()[0]), vec!["f", "d1", "d2"]);
}

#[tokio::test]
async fn test_rerun_clears_dependency_on_succeeded_predecessor() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemoryStepSource::new(store.clone()));
    source
        .add_steps(vec![
            Step::new("setup", "noop"),
            Step::new("assert", "fail").depends_on("setup"),
            Step::new("report", "noop").depends_on("assert"),
        ])
        .await;
    let queue = CapturingQueue::default();
    let resolver = RerunResolver::new(store.clone(), source, Arc::new(queue.clone()));

    let (execution_id, failed) = failed_records(&store, &["assert"]).await;
    resolver
        .rerun_failed_steps(execution_id, &failed)
        .await
        .unwrap();

    let plan = &queue.plans()[0];
    assert_eq!(step_ids(plan), vec!["assert", "report"]);
    assert!(plan.get_step("assert").unwrap().depends_on.is_none());
    assert_eq!(
        plan.get_step("report").unwrap().depends_on.as_deref(),
        Some("assert")
    );
}

#[tokio::test]
async fn test_nothing_to_rerun() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemoryStepSource::new(store.clone()));
    let resolver = RerunResolver::new(
        store.clone(),
        source,
        Arc::new(CapturingQueue::default()),
    );

    let (execution_id, _) = failed_records(&store, &[]).await;
    let err = resolver.rerun_failed(execution_id).await.unwrap_err();

    assert!(matches!(err, RerunError::NothingToRerun(id) if id == execution_id));
}

#[tokio::test]
async fn test_rerun_after_engine_run_through_in_memory_queue() {
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    let registry = StepExecutorRegistry::with_builtins();
    registry.register(
        "payment",
        move |_: &str, _: &Parameters| -> anyhow::Result<StepResult> {
            if flag.load(Ordering::SeqCst) {
                Ok(StepResult::success(Default::default()))
            } else {
                Ok(StepResult::failure("payment gateway down"))
            }
        },
    );

    let store = Arc::new(MemoryStore::new());
    let engine = engine_with_registry(registry, store.clone(), EngineConfig::default());
    let source = Arc::new(MemoryStepSource::new(store.clone()));

    let plan = Plan::for_test(
        "checkout",
        vec![
            Step::new("pay", "payment"),
            Step::new("receipt", "noop").depends_on("pay"),
            Step::new("email", "noop").depends_on("receipt"),
        ],
    )
    .unwrap();
    source.add_plan(&plan).await;

    let first = engine.run(plan).await.unwrap();
    assert_eq!(first.status, RunStatus::Failed);
    assert_eq!(first.step_results.len(), 1);

    healthy.store(true, Ordering::SeqCst);
    let queue = Arc::new(InMemoryJobQueue::new(engine.clone()));
    let resolver = RerunResolver::new(store.clone(), source, queue);

    let rerun = resolver.rerun_failed(first.execution_id).await.unwrap();
    let result = rerun.handle.wait().await.unwrap();

    assert_eq!(result.execution_id, rerun.execution_id);
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.step_results.len(), 3);

    let record = store.execution(rerun.execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.test_id.as_deref(), Some("checkout"));
}

#[tokio::test]
async fn test_failed_submission_is_reported_and_marked_failed() {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(MemoryStepSource::new(store.clone()));
    source.add_steps(catalog()).await;

    let broker = Arc::new(ChannelBroker::new(4));
    broker.close();
    let resolver = RerunResolver::new(
        store.clone(),
        source,
        Arc::new(BrokerJobQueue::new(broker)),
    );

    let (execution_id, failed) = failed_records(&store, &["f"]).await;
    let err = resolver
        .rerun_failed_steps(execution_id, &failed)
        .await
        .unwrap_err();
    assert!(matches!(err, RerunError::Queue(_)));

    let journal = store.journal().await;
    let last = journal.last().unwrap();
    assert_eq!(last.status, RunStatus::Failed);
    match &last.record {
        RecordRef::Execution(id) => assert_ne!(*id, execution_id),
        other => panic!("unexpected journal entry: {:?}", other),
    }
}
