//! Test utilities for jobflow
//!
//! Two in-process HTTP mocks built on axum (a build server and a review API)
//! plus a scripted in-memory job backend for engine-level scenarios.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use jobflow::core::config::{ConfigError, InstanceConfig};
use jobflow::core::{ParallelGroup, Pipeline, PipelineItem, PrGate, PrRef, Step, TargetState, WorkflowState};
use jobflow::execution::{ChannelSink, EngineError, ExecutionEngine, ProgressEvent, RunHandle};
use jobflow::remote::error::Result as RemoteResult;
use jobflow::remote::{JobTrigger, RemoteError, TargetRegistry, TargetResolver};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Poll interval used by scenarios that do not care about real timings
pub const FAST_POLL: Duration = Duration::from_millis(25);

/// Credential every mock instance is configured with
pub const TEST_CREDENTIAL: &str = "ci-bot:s3cret";

// ---------------------------------------------------------------------------
// Mock build server
// ---------------------------------------------------------------------------

/// How the mock build server treats one job
#[derive(Debug, Clone)]
pub struct JobBehavior {
    pub queue_delay: Duration,
    pub build_duration: Duration,
    pub result: String,
    pub cancel_in_queue: bool,
    pub omit_location: bool,
    pub trigger_status: u16,
}

impl Default for JobBehavior {
    fn default() -> Self {
        Self {
            queue_delay: Duration::ZERO,
            build_duration: Duration::ZERO,
            result: "SUCCESS".to_string(),
            cancel_in_queue: false,
            omit_location: false,
            trigger_status: 201,
        }
    }
}

impl JobBehavior {
    pub fn finishing_with(result: &str) -> Self {
        Self {
            result: result.to_string(),
            ..Default::default()
        }
    }

    pub fn timed(queue_delay: Duration, build_duration: Duration) -> Self {
        Self {
            queue_delay,
            build_duration,
            ..Default::default()
        }
    }
}

/// One trigger request as the server saw it
#[derive(Debug, Clone)]
pub struct TriggerRecord {
    pub job: String,
    pub parameterized: bool,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

struct QueuedBuild {
    behavior: JobBehavior,
    queued_at: Instant,
}

struct JenkinsState {
    base_url: String,
    default: JobBehavior,
    jobs: HashMap<String, JobBehavior>,
    required_auth: Option<String>,
    builds: Mutex<HashMap<u64, QueuedBuild>>,
    triggers: Mutex<Vec<TriggerRecord>>,
    polls: AtomicUsize,
    next_id: AtomicU64,
}

impl JenkinsState {
    fn trigger(&self, job: &str, parameterized: bool, query: Option<&str>, authorization: Option<String>) -> Response {
        let behavior = self
            .jobs
            .get(job)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        self.triggers.lock().unwrap().push(TriggerRecord {
            job: job.to_string(),
            parameterized,
            query: query.map(str::to_string),
            authorization,
        });

        if behavior.trigger_status != 201 && behavior.trigger_status != 202 {
            let status = StatusCode::from_u16(behavior.trigger_status).unwrap();
            return (status, "trigger rejected").into_response();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let omit_location = behavior.omit_location;
        self.builds.lock().unwrap().insert(
            id,
            QueuedBuild {
                behavior,
                queued_at: Instant::now(),
            },
        );

        if omit_location {
            return StatusCode::CREATED.into_response();
        }
        let location = format!("{}/queue/item/{}/", self.base_url, id);
        (StatusCode::CREATED, [(header::LOCATION, location)], "").into_response()
    }

    fn queue_item(&self, id: u64) -> Response {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let builds = self.builds.lock().unwrap();
        let Some(build) = builds.get(&id) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        if build.behavior.cancel_in_queue {
            return Json(json!({ "id": id, "cancelled": true, "executable": null })).into_response();
        }
        if build.queued_at.elapsed() < build.behavior.queue_delay {
            return Json(json!({ "id": id, "cancelled": false, "executable": null })).into_response();
        }
        Json(json!({
            "id": id,
            "cancelled": false,
            "executable": { "number": id, "url": format!("{}/builds/{}/", self.base_url, id) }
        }))
        .into_response()
    }

    fn build(&self, id: u64) -> Response {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let builds = self.builds.lock().unwrap();
        let Some(build) = builds.get(&id) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        let finishes_after = build.behavior.queue_delay + build.behavior.build_duration;
        if build.queued_at.elapsed() < finishes_after {
            Json(json!({ "number": id, "building": true, "result": null })).into_response()
        } else {
            Json(json!({ "number": id, "building": false, "result": build.behavior.result }))
                .into_response()
        }
    }
}

fn id_from(rest: &str) -> Option<u64> {
    rest.trim_end_matches("api/json")
        .trim_end_matches('/')
        .parse()
        .ok()
}

async fn jenkins_handler(
    State(state): State<Arc<JenkinsState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(required) = &state.required_auth {
        if authorization.as_deref() != Some(required.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let path = uri.path();
    if method == Method::POST {
        if let Some(job) = path.strip_suffix("/buildWithParameters") {
            return state.trigger(job, true, uri.query(), authorization);
        }
        if let Some(job) = path.strip_suffix("/build") {
            return state.trigger(job, false, uri.query(), authorization);
        }
    }
    if method == Method::GET {
        if let Some(id) = path.strip_prefix("/queue/item/").and_then(id_from) {
            return state.queue_item(id);
        }
        if let Some(id) = path.strip_prefix("/builds/").and_then(id_from) {
            return state.build(id);
        }
    }
    StatusCode::NOT_FOUND.into_response()
}

pub struct MockJenkinsBuilder {
    default: JobBehavior,
    jobs: HashMap<String, JobBehavior>,
    required_auth: Option<String>,
}

impl MockJenkinsBuilder {
    /// Behavior for every job without its own entry
    pub fn default_behavior(mut self, behavior: JobBehavior) -> Self {
        self.default = behavior;
        self
    }

    /// Behavior for one job path, e.g. `/job/deploy`
    pub fn job(mut self, path: &str, behavior: JobBehavior) -> Self {
        self.jobs.insert(path.to_string(), behavior);
        self
    }

    /// Reject requests whose Authorization header differs from `value`
    pub fn require_auth(mut self, value: &str) -> Self {
        self.required_auth = Some(value.to_string());
        self
    }

    pub async fn start(self) -> MockJenkins {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(JenkinsState {
            base_url: url.clone(),
            default: self.default,
            jobs: self.jobs,
            required_auth: self.required_auth,
            builds: Mutex::new(HashMap::new()),
            triggers: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        });
        let app = Router::new()
            .fallback(jenkins_handler)
            .with_state(Arc::clone(&state));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        MockJenkins { url, state, server }
    }
}

/// In-process build server speaking the queue/build JSON API
pub struct MockJenkins {
    pub url: String,
    state: Arc<JenkinsState>,
    server: JoinHandle<()>,
}

impl MockJenkins {
    pub fn builder() -> MockJenkinsBuilder {
        MockJenkinsBuilder {
            default: JobBehavior::default(),
            jobs: HashMap::new(),
            required_auth: None,
        }
    }

    /// Server finishing every job immediately with SUCCESS
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn triggers(&self) -> Vec<TriggerRecord> {
        self.state.triggers.lock().unwrap().clone()
    }

    pub fn triggered_jobs(&self) -> Vec<String> {
        self.triggers().into_iter().map(|t| t.job).collect()
    }

    /// Number of queue and build polls served so far
    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    /// Registry with a single `ci` instance pointing at this server
    pub fn registry(&self, poll: Duration) -> TargetRegistry {
        let mut instances = HashMap::new();
        instances.insert(
            "ci".to_string(),
            InstanceConfig {
                url: self.url.clone(),
                auth_env: None,
                token: Some(TEST_CREDENTIAL.to_string()),
            },
        );
        TargetRegistry::new(instances, None)
            .unwrap()
            .with_poll_intervals(poll, poll)
    }
}

impl Drop for MockJenkins {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// ---------------------------------------------------------------------------
// Mock review API
// ---------------------------------------------------------------------------

/// Pull request JSON in the shape the review API returns
pub fn pr_json(number: u64, state: &str, merged: bool, branch: &str) -> Value {
    json!({
        "number": number,
        "state": state,
        "merged": merged,
        "title": format!("Release train #{}", number),
        "html_url": format!("https://github.test/org/app/pull/{}", number),
        "head": { "ref": branch, "sha": "0123abc" }
    })
}

struct GitHubState {
    statuses: Mutex<HashMap<u64, VecDeque<Value>>>,
    pulls: Vec<Value>,
    missing_repos: Vec<String>,
    status_requests: AtomicUsize,
    list_queries: Mutex<Vec<Option<String>>>,
}

fn has_user_agent(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .is_some_and(|v| !v.is_empty())
}

async fn get_pull(
    State(state): State<Arc<GitHubState>>,
    Path((_owner, _repo, number)): Path<(String, String, u64)>,
    headers: HeaderMap,
) -> Response {
    if !has_user_agent(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    state.status_requests.fetch_add(1, Ordering::SeqCst);

    let mut statuses = state.statuses.lock().unwrap();
    let Some(sequence) = statuses.get_mut(&number) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    // The last entry repeats forever
    let body = if sequence.len() > 1 {
        sequence.pop_front()
    } else {
        sequence.front().cloned()
    };
    match body {
        Some(body) => Json(body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn list_pulls(
    State(state): State<Arc<GitHubState>>,
    Path((_owner, repo)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    if !has_user_agent(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if state.missing_repos.contains(&repo) {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.list_queries.lock().unwrap().push(query);
    Json(Value::Array(state.pulls.clone())).into_response()
}

#[derive(Default)]
pub struct MockGitHubBuilder {
    statuses: HashMap<u64, VecDeque<Value>>,
    pulls: Vec<Value>,
    missing_repos: Vec<String>,
}

impl MockGitHubBuilder {
    /// Successive `(state, merged)` answers for one PR; the last one repeats
    pub fn pr(mut self, number: u64, branch: &str, sequence: &[(&str, bool)]) -> Self {
        let answers = sequence
            .iter()
            .map(|(state, merged)| pr_json(number, state, *merged, branch))
            .collect();
        self.statuses.insert(number, answers);
        self
    }

    /// An entry in the open pull-request listing
    pub fn open_pull(mut self, number: u64, branch: &str) -> Self {
        self.pulls.push(pr_json(number, "open", false, branch));
        self
    }

    /// Answer 404 for the pull-request listing of `repo`
    pub fn missing_repo(mut self, repo: &str) -> Self {
        self.missing_repos.push(repo.to_string());
        self
    }

    pub async fn start(self) -> MockGitHub {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(GitHubState {
            statuses: Mutex::new(self.statuses),
            pulls: self.pulls,
            missing_repos: self.missing_repos,
            status_requests: AtomicUsize::new(0),
            list_queries: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/repos/{owner}/{repo}/pulls", get(list_pulls))
            .route("/repos/{owner}/{repo}/pulls/{number}", get(get_pull))
            .with_state(Arc::clone(&state));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        MockGitHub { url, state, server }
    }
}

/// In-process review API serving scripted pull-request states
pub struct MockGitHub {
    pub url: String,
    state: Arc<GitHubState>,
    server: JoinHandle<()>,
}

impl MockGitHub {
    pub fn builder() -> MockGitHubBuilder {
        MockGitHubBuilder::default()
    }

    pub fn status_requests(&self) -> usize {
        self.state.status_requests.load(Ordering::SeqCst)
    }

    pub fn list_queries(&self) -> Vec<Option<String>> {
        self.state.list_queries.lock().unwrap().clone()
    }

    pub fn client(&self) -> jobflow::remote::GitHubClient {
        jobflow::remote::GitHubClient::new(None, reqwest::Client::new()).with_api_url(&self.url)
    }
}

impl Drop for MockGitHub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// ---------------------------------------------------------------------------
// Scripted job backend
// ---------------------------------------------------------------------------

/// Timeline and outcome of one scripted job
#[derive(Debug, Clone)]
pub struct Script {
    pub queue: Duration,
    pub run: Duration,
    pub result: String,
    pub trigger_status: Option<u16>,
    /// Keep running to completion even after cancellation
    pub ignores_cancel: bool,
}

impl Script {
    pub fn finishing(result: &str, run: Duration) -> Self {
        Self {
            queue: Duration::ZERO,
            run,
            result: result.to_string(),
            trigger_status: None,
            ignores_cancel: false,
        }
    }

    /// A job the server finishes regardless of any cancel request
    pub fn stubborn(result: &str, run: Duration) -> Self {
        Self {
            ignores_cancel: true,
            ..Self::finishing(result, run)
        }
    }

    pub fn rejected(status: u16) -> Self {
        Self {
            queue: Duration::ZERO,
            run: Duration::ZERO,
            result: String::new(),
            trigger_status: Some(status),
            ignores_cancel: false,
        }
    }
}

/// In-memory job trigger; every wait honors cancellation
pub struct ScriptedJobs {
    scripts: HashMap<String, Script>,
    default: Script,
    triggered: Mutex<Vec<(String, HashMap<String, String>)>>,
    cancelled: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedJobs {
    pub fn new(default: Script) -> Self {
        Self {
            scripts: HashMap::new(),
            default,
            triggered: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, job: &str, script: Script) -> Self {
        self.scripts.insert(job.to_string(), script);
        self
    }

    fn script(&self, job: &str) -> Script {
        self.scripts
            .get(job)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn triggered(&self) -> Vec<String> {
        self.triggered
            .lock()
            .unwrap()
            .iter()
            .map(|(job, _)| job.clone())
            .collect()
    }

    pub fn params_for(&self, job: &str) -> Option<HashMap<String, String>> {
        self.triggered
            .lock()
            .unwrap()
            .iter()
            .find(|(j, _)| j == job)
            .map(|(_, params)| params.clone())
    }

    /// Jobs that observed cancellation, with the instant they did
    pub fn cancelled(&self) -> Vec<(String, Instant)> {
        self.cancelled.lock().unwrap().clone()
    }

    async fn wait(&self, cancel: &CancellationToken, job: &str, duration: Duration) -> RemoteResult<()> {
        if self.script(job).ignores_cancel {
            tokio::time::sleep(duration).await;
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                self.cancelled.lock().unwrap().push((job.to_string(), Instant::now()));
                Err(RemoteError::Cancelled)
            }
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[async_trait]
impl JobTrigger for ScriptedJobs {
    async fn trigger(
        &self,
        _cancel: &CancellationToken,
        job_path: &str,
        params: &HashMap<String, String>,
    ) -> RemoteResult<String> {
        self.triggered
            .lock()
            .unwrap()
            .push((job_path.to_string(), params.clone()));
        if let Some(status) = self.script(job_path).trigger_status {
            return Err(RemoteError::UnexpectedStatus {
                url: job_path.to_string(),
                status,
                body: String::new(),
            });
        }
        Ok(job_path.to_string())
    }

    async fn await_start(&self, cancel: &CancellationToken, queue_handle: &str) -> RemoteResult<String> {
        let script = self.script(queue_handle);
        self.wait(cancel, queue_handle, script.queue).await?;
        Ok(format!("scripted://{}", queue_handle))
    }

    async fn await_completion(&self, cancel: &CancellationToken, target_url: &str) -> RemoteResult<String> {
        let job = target_url.trim_start_matches("scripted://");
        let script = self.script(job);
        self.wait(cancel, job, script.run).await?;
        Ok(script.result)
    }
}

/// Resolves every target to the same scripted backend
pub struct ScriptedTargets(pub Arc<ScriptedJobs>);

impl TargetResolver for ScriptedTargets {
    fn client_for(&self, target: &str) -> Result<Arc<dyn JobTrigger>, ConfigError> {
        if target == "missing" {
            return Err(ConfigError::UnknownTarget(target.to_string()));
        }
        Ok(Arc::clone(&self.0) as Arc<dyn JobTrigger>)
    }
}

pub fn scripted_engine(jobs: &Arc<ScriptedJobs>) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(ScriptedTargets(Arc::clone(jobs))))
}

// ---------------------------------------------------------------------------
// Pipeline builders and run helpers
// ---------------------------------------------------------------------------

pub fn step(name: &str, job: &str) -> Step {
    Step {
        name: name.to_string(),
        target: "ci".to_string(),
        job: job.to_string(),
        params: HashMap::new(),
    }
}

pub fn single(name: &str, job: &str) -> PipelineItem {
    PipelineItem::Step(step(name, job))
}

pub fn group(name: &str, steps: Vec<Step>) -> PipelineItem {
    PipelineItem::Parallel(ParallelGroup {
        name: name.to_string(),
        steps,
    })
}

pub fn gate(name: &str, pr: PrRef, target_state: TargetState, poll_interval: Duration) -> PipelineItem {
    PipelineItem::Gate(PrGate {
        name: name.to_string(),
        owner: "org".to_string(),
        repo: "app".to_string(),
        pr,
        target_state,
        poll_interval,
    })
}

pub fn pipeline(name: &str, items: Vec<PipelineItem>) -> Pipeline {
    Pipeline {
        name: name.to_string(),
        inputs: BTreeMap::new(),
        items,
    }
}

/// Everything a scenario might want to assert on after a run
pub struct RunOutcome {
    pub result: Result<(), EngineError>,
    pub state: WorkflowState,
    pub events: Vec<ProgressEvent>,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Names of steps that got a start event, in order, counted once each
    pub fn started_steps(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for event in &self.events {
            if let ProgressEvent::StepStarted { name, .. } = event {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Item indexes that produced any event
    pub fn touched_items(&self) -> Vec<usize> {
        let mut items: Vec<usize> = self.events.iter().map(ProgressEvent::item).collect();
        items.dedup();
        items
    }
}

pub fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn run_pipeline(engine: &ExecutionEngine, pipeline: &Pipeline) -> RunOutcome {
    let run = RunHandle::new(pipeline);
    run_with_handle(engine, pipeline, &run).await
}

pub async fn run_with_handle(engine: &ExecutionEngine, pipeline: &Pipeline, run: &RunHandle) -> RunOutcome {
    let (sink, mut rx) = ChannelSink::new();
    let started = Instant::now();
    let result = engine.execute(pipeline, run, Arc::new(sink)).await;
    let elapsed = started.elapsed();
    RunOutcome {
        result,
        state: run.snapshot(),
        events: drain(&mut rx),
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobflow::core::ItemStatus;
    use jobflow::remote::PullRequestApi;

    #[tokio::test]
    async fn test_mock_jenkins_round_trip() {
        let mock = MockJenkins::start().await;
        let client = jobflow::remote::JenkinsClient::with_client(&mock.url, TEST_CREDENTIAL, reqwest::Client::new())
            .with_poll_intervals(FAST_POLL, FAST_POLL);
        let cancel = CancellationToken::new();

        let queue = client.trigger(&cancel, "/job/app", &HashMap::new()).await.unwrap();
        assert!(queue.starts_with(&mock.url));
        let build = client.await_start(&cancel, &queue).await.unwrap();
        let result = client.await_completion(&cancel, &build).await.unwrap();

        assert_eq!(result, "SUCCESS");
        assert_eq!(mock.triggered_jobs(), vec!["/job/app".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_github_sequence_repeats_last() {
        let mock = MockGitHub::builder()
            .pr(5, "feature", &[("open", false), ("closed", true)])
            .start()
            .await;
        let client = mock.client();
        let cancel = CancellationToken::new();

        let first = client.get_status(&cancel, "org", "app", 5).await.unwrap();
        let second = client.get_status(&cancel, "org", "app", 5).await.unwrap();
        let third = client.get_status(&cancel, "org", "app", 5).await.unwrap();

        assert!(!first.merged);
        assert!(second.merged);
        assert!(third.merged);
        assert_eq!(mock.status_requests(), 3);
    }

    #[tokio::test]
    async fn test_scripted_pipeline_runs() {
        let jobs = Arc::new(ScriptedJobs::new(Script::finishing("SUCCESS", Duration::ZERO)));
        let engine = scripted_engine(&jobs);
        let outcome = run_pipeline(&engine, &pipeline("p", vec![single("a", "/job/a")])).await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.state.items[0].status(), ItemStatus::Success);
        assert_eq!(outcome.started_steps(), vec!["a".to_string()]);
    }
}
