//! Test: Success Chain - items run in order and every step reports SUCCESS

use crate::helpers::*;
use jobflow::core::{FlowConfig, ItemState, ItemStatus, RunStatus};
use jobflow::remote::Credential;
use std::sync::Arc;
use std::time::Duration;

fn instances_yaml(url: &str) -> String {
    format!(
        r#"
instances:
  ci:
    url: "{}"
    token: "{}"
"#,
        url, TEST_CREDENTIAL
    )
}

const RELEASE_WORKFLOW: &str = r#"
name: "Release"
inputs:
  version: "1.0"
workflow:
  - name: "build"
    instance: "ci"
    job: "/job/build"
    params:
      VERSION: "${version}"
  - parallel:
      name: "deploy"
      steps:
        - name: "deploy-eu"
          instance: "ci"
          job: "/job/deploy-eu"
        - name: "deploy-us"
          instance: "ci"
          job: "/job/deploy-us"
  - name: "notify"
    instance: "ci"
    job: "/job/notify"
"#;

/// A YAML workflow runs against the build server end to end
#[tokio::test]
async fn test_yaml_workflow_runs_in_order() {
    let mock = MockJenkins::start().await;
    let config = FlowConfig::from_yaml(&instances_yaml(&mock.url), RELEASE_WORKFLOW)
        .unwrap()
        .with_inputs([("version".to_string(), "2.0".to_string())]);
    let pipeline = config.to_pipeline().unwrap();
    let registry = jobflow::remote::TargetRegistry::from_config(&config)
        .unwrap()
        .with_poll_intervals(FAST_POLL, FAST_POLL);
    let engine = jobflow::execution::ExecutionEngine::new(Arc::new(registry));

    let outcome = run_pipeline(&engine, &pipeline).await;

    assert!(outcome.result.is_ok(), "run failed: {:?}", outcome.result);
    assert_eq!(outcome.state.status, RunStatus::Success);
    assert!(outcome.state.error.is_none());

    let jobs = mock.triggered_jobs();
    assert_eq!(jobs.len(), 4);
    assert_eq!(jobs[0], "/job/build");
    assert!(jobs[1..3].contains(&"/job/deploy-eu".to_string()));
    assert!(jobs[1..3].contains(&"/job/deploy-us".to_string()));
    assert_eq!(jobs[3], "/job/notify");

    let triggers = mock.triggers();
    assert!(triggers[0].parameterized);
    assert_eq!(triggers[0].query.as_deref(), Some("VERSION=2.0"));
    assert!(!triggers[3].parameterized);
    let expected_auth = Credential::parse(TEST_CREDENTIAL).header_value();
    assert!(triggers
        .iter()
        .all(|t| t.authorization.as_deref() == Some(expected_auth.as_str())));

    for item in &outcome.state.items {
        assert_eq!(item.status(), ItemStatus::Success, "item {}", item.name());
    }
    let build = outcome.state.step(0, 0).unwrap();
    assert_eq!(build.result.as_deref(), Some("SUCCESS"));
    assert!(build.target_url.as_deref().unwrap().starts_with(&mock.url));
    assert!(build.started_at.is_some() && build.ended_at.is_some());
}

#[tokio::test]
async fn test_step_events_carry_build_url() {
    let mock = MockJenkins::start().await;
    let engine = jobflow::execution::ExecutionEngine::new(Arc::new(mock.registry(FAST_POLL)));
    let pipeline = pipeline("events", vec![single("build", "/job/build")]);

    let outcome = run_pipeline(&engine, &pipeline).await;
    assert!(outcome.result.is_ok());

    // queued, then started with the build URL, then completed
    assert_eq!(outcome.events.len(), 3);
    match &outcome.events[0] {
        jobflow::ProgressEvent::StepStarted { target_url, .. } => assert!(target_url.is_none()),
        other => panic!("unexpected first event {:?}", other),
    }
    match &outcome.events[1] {
        jobflow::ProgressEvent::StepStarted { target_url, .. } => {
            assert!(target_url.as_deref().unwrap().contains("/builds/"))
        }
        other => panic!("unexpected second event {:?}", other),
    }
    match &outcome.events[2] {
        jobflow::ProgressEvent::StepCompleted { result, error, .. } => {
            assert_eq!(result, "SUCCESS");
            assert!(error.is_none());
        }
        other => panic!("unexpected last event {:?}", other),
    }
}

/// Three members with queue and build time all finish successfully
#[tokio::test]
async fn test_parallel_group_all_succeed() {
    let mock = MockJenkins::builder()
        .default_behavior(JobBehavior::timed(
            Duration::from_millis(50),
            Duration::from_millis(50),
        ))
        .start()
        .await;
    let engine = jobflow::execution::ExecutionEngine::new(Arc::new(mock.registry(FAST_POLL)));
    let pipeline = pipeline(
        "fan-out",
        vec![group(
            "deploy",
            vec![
                step("eu", "/job/eu"),
                step("us", "/job/us"),
                step("ap", "/job/ap"),
            ],
        )],
    );

    let outcome = run_pipeline(&engine, &pipeline).await;

    assert!(outcome.result.is_ok(), "run failed: {:?}", outcome.result);
    assert_eq!(mock.triggers().len(), 3);
    match &outcome.state.items[0] {
        ItemState::Parallel(group) => {
            assert_eq!(group.status, ItemStatus::Success);
            for member in &group.steps {
                assert_eq!(member.status, ItemStatus::Success);
                assert_eq!(member.result.as_deref(), Some("SUCCESS"));
            }
        }
        other => panic!("expected a parallel group, got {:?}", other),
    }
}

/// Members overlap instead of running one after another
#[tokio::test]
async fn test_parallel_members_overlap() {
    let jobs = Arc::new(ScriptedJobs::new(Script::finishing(
        "SUCCESS",
        Duration::from_millis(300),
    )));
    let engine = scripted_engine(&jobs);
    let pipeline = pipeline(
        "overlap",
        vec![group(
            "all",
            vec![step("a", "/job/a"), step("b", "/job/b"), step("c", "/job/c")],
        )],
    );

    let outcome = run_pipeline(&engine, &pipeline).await;

    assert!(outcome.result.is_ok());
    assert!(
        outcome.elapsed < Duration::from_millis(800),
        "members ran sequentially: {:?}",
        outcome.elapsed
    );
    assert_eq!(jobs.triggered().len(), 3);
}

#[tokio::test]
async fn test_params_reach_the_trigger() {
    let jobs = Arc::new(ScriptedJobs::new(Script::finishing("SUCCESS", Duration::ZERO)));
    let engine = scripted_engine(&jobs);
    let mut build = step("build", "/job/build");
    build.params.insert("BRANCH".to_string(), "main".to_string());

    let outcome = run_pipeline(
        &engine,
        &pipeline("params", vec![jobflow::core::PipelineItem::Step(build)]),
    )
    .await;

    assert!(outcome.result.is_ok());
    let params = jobs.params_for("/job/build").unwrap();
    assert_eq!(params.get("BRANCH").map(String::as_str), Some("main"));
}
