use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use parasel_catalog::{run_task, Contract, FieldType, RunRequest, TaskCatalog, TaskSpec};
use parasel_core::error::ParaselError;
use parasel_engine::{
    ByArgs, ByKeys, Concurrent, ErrorMode, ExecutionPolicy, Executor, Leaf, LeafInput, Sequence,
    Step, StepStatus,
};

fn executor() -> Executor {
    Executor::new(ExecutionPolicy::new().with_retry_backoff(Duration::from_millis(10)))
}

fn constant(name: &str, key: &str, value: Value) -> Leaf {
    Leaf::new(name, move |_: LeafInput| Ok(Some(value.clone()))).with_output(key)
}

fn failing(name: &str) -> Leaf {
    let message = format!("{} broke", name);
    Leaf::new(name, move |_: LeafInput| Err(anyhow::anyhow!(message.clone())))
}

#[tokio::test]
async fn test_nested_tree_end_to_end() {
    let double = Leaf::new("double", |input: LeafInput| {
        let n = input.require_arg("n")?.as_i64().unwrap_or(0);
        Ok(Some(json!(n * 2)))
    })
    .with_output("doubled");

    let sum = Leaf::new("sum", |input: LeafInput| {
        let total: i64 = input
            .context
            .get("doubled")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_i64)
            .sum();
        Ok(Some(json!(total)))
    })
    .with_output("total");

    let pipeline: Step = Sequence::new(vec![
        constant("seed", "label", json!("first")).into(),
        Concurrent::by_args(ByArgs::new(double).with_param("n", [json!(1), json!(2), json!(3)]))
            .into(),
        sum.into(),
        constant("relabel", "label", json!("second")).into(),
    ])
    .named("pipeline")
    .into();

    let result = executor().run(&pipeline, Default::default()).await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.get("total"), Some(json!(12)));
    // Later writer wins within a sequence.
    assert_eq!(result.get("label"), Some(json!("second")));

    let mut doubled: Vec<i64> = result
        .get("doubled")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .collect();
    doubled.sort();
    assert_eq!(doubled, vec![2, 4, 6]);

    assert!(result.record("double[n=2]").is_some());
    assert!(result
        .steps
        .iter()
        .all(|r| r.status == StepStatus::Succeeded));
}

#[tokio::test]
async fn test_fail_fast_and_collect_with_middle_failure() {
    let group = || -> Vec<Step> {
        vec![
            constant("ok_a", "a", json!(1)).into(),
            failing("bad").into(),
            constant("ok_b", "b", json!(2)).into(),
        ]
    };

    let fail_fast: Step = Concurrent::new(group()).named("group").into();
    let result = executor().run(&fail_fast, Default::default()).await;
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].step(), Some("group"));
    assert_eq!(result.errors[0].cause_message(), "bad broke");

    let collect: Step = Concurrent::new(group()).named("group").collect().into();
    let executor = Executor::new(ExecutionPolicy::new().with_error_mode(ErrorMode::Collect));
    let result = executor.run(&collect, Default::default()).await;
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].step(), Some("group"));
    assert_eq!(result.errors[0].root_cause().step(), Some("bad"));
    // Siblings of the failing child still ran to completion.
    assert_eq!(result.get("a"), Some(json!(1)));
    assert_eq!(result.get("b"), Some(json!(2)));
}

#[tokio::test]
async fn test_retry_then_succeed_waits_for_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let flaky: Step = Leaf::new("flaky", move |_: LeafInput| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            anyhow::bail!("not yet");
        }
        Ok(Some(json!("done")))
    })
    .with_output("status")
    .with_retries(2)
    .into();

    let started = Instant::now();
    let result = executor().run(&flaky, Default::default()).await;
    assert!(result.success);
    assert_eq!(result.get("status"), Some(json!("done")));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 10ms after the first failure, 20ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(result.record("flaky").unwrap().attempts, 3);
}

#[tokio::test]
async fn test_dynamic_fan_out_preconditions() {
    let echo = Leaf::new("echo", |input: LeafInput| Ok(input.arg("item").cloned()))
        .with_output("echoed");

    let empty: Step = ByKeys::new(echo.clone(), ["items"], "item").into();
    let result = executor()
        .run_with(&empty, HashMap::from([("items".to_string(), json!([]))]))
        .await;
    assert!(result.success);
    assert_eq!(result.get("echoed"), None);

    let missing: Step = ByKeys::new(echo, ["items"], "item").into();
    let result = executor().run(&missing, Default::default()).await;
    assert!(!result.success);
    assert!(matches!(
        result.errors[0].root_cause(),
        ParaselError::KeyNotFound(key) if key == "items"
    ));
}

#[tokio::test]
async fn test_catalog_run_checks_contracts() {
    let greet = Leaf::new("greet", |input: LeafInput| {
        let name = input.context.get_string("name").unwrap_or_default();
        Ok(Some(json!(format!("hi {}", name))))
    })
    .with_output("greeting");

    let mut catalog = TaskCatalog::new();
    catalog
        .register(
            TaskSpec::new("greet", "1.0.0", greet)
                .unwrap()
                .with_input(Contract::new().field("name", FieldType::String))
                .produces(["greeting", "farewell"]),
        )
        .unwrap();

    let bad_input = RunRequest::new(HashMap::from([("name".to_string(), json!(3))]));
    let err = run_task(&catalog, &executor(), Some("greet"), bad_input)
        .await
        .unwrap_err();
    assert!(matches!(err, ParaselError::Contract(_)));

    // The task runs but never writes `farewell`.
    let request = RunRequest::new(HashMap::from([("name".to_string(), json!("ada"))]))
        .with_task("greet");
    let err = run_task(&catalog, &executor(), None, request).await.unwrap_err();
    assert!(err.to_string().contains("farewell"));
}

#[tokio::test]
async fn test_run_deadline_reports_timeout() {
    let slow: Step = Leaf::new_async("slow", |_: LeafInput| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(None)
    })
    .into();

    let executor = Executor::new(ExecutionPolicy::new().with_timeout(Duration::from_millis(50)));
    let started = Instant::now();
    let result = executor.run(&slow, Default::default()).await;
    assert!(!result.success);
    assert!(result.errors[0].is_timeout());
    assert!(started.elapsed() < Duration::from_secs(2));
}
