//! End-to-end tests over the HTTP surface.
//!
//! Drives the full deploy flow through the router with mocked scheduler and
//! platform backends: request intake, payload submission, webhook and
//! poll-driven status reconciliation, and the state read paths.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use forge_control::api::{router, AppState};
use forge_control::config::ArtifactConfig;
use forge_control::platform::MockPlatform;
use forge_control::reconcile::PollerRegistry;
use forge_control::scheduler::{MockScheduler, StatusReport, WorkflowSubmission};
use forge_control::staging::SourceStager;
use forge_control::state::{MemoryStateStore, StateStore};
use forge_control::workflow::WorkflowContext;
use forge_control::{BuildStatus, JobId};

struct TestControl {
    app: Router,
    scheduler: Arc<MockScheduler>,
    _checkouts: TempDir,
}

fn control(max_concurrent: u32) -> TestControl {
    let scheduler = Arc::new(MockScheduler::new());
    let platform = Arc::new(MockPlatform::new());
    let checkouts = tempfile::tempdir().expect("tempdir");

    let artifacts = ArtifactConfig {
        storage_type: "memory".to_owned(),
        ..ArtifactConfig::default()
    };
    let stager = Arc::new(SourceStager::new(&artifacts, checkouts.path()).expect("stager"));

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let pollers = Arc::new(PollerRegistry::new(
        Arc::clone(&store),
        scheduler.clone(),
        Duration::from_millis(10),
        50,
    ));

    let state = AppState {
        store,
        workflows: WorkflowContext {
            scheduler: scheduler.clone(),
            stager,
            platform,
            cloud_provider: "aws".to_owned(),
        },
        pollers,
        max_concurrent,
    };

    TestControl {
        app: router(state),
        scheduler,
        _checkouts: checkouts,
    }
}

async fn send(app: &Router, method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("request");
    app.clone().oneshot(request).await.expect("infallible")
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = send(app, method, uri, bearer, body).await;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = serde_json::from_slice(&bytes).expect("JSON body");
    (status, value)
}

fn git_deploy(token: &str, project: &str) -> Value {
    json!({
        "token": token,
        "type": "git",
        "args": {
            "githubRepository": format!("acme/{project}"),
            "projectName": project,
            "region": "eu-west-1"
        }
    })
}

fn report(status: BuildStatus, message: &str) -> StatusReport {
    StatusReport {
        status,
        message: message.to_owned(),
        time: None,
    }
}

/// Pull the webhook secret out of a submitted payload, the way the build
/// workflow would on the other side.
fn webhook_secret(submission: &WorkflowSubmission) -> String {
    let raw = BASE64.decode(&submission.payload).expect("payload is base64");
    let payload: Value = serde_json::from_slice(&raw).expect("payload is JSON");
    payload["webhookSecret"]
        .as_str()
        .expect("payload carries a webhook secret")
        .to_owned()
}

async fn wait_for_status(app: &Router, job_id: &str, token: &str, wanted: &str) -> Value {
    for _ in 0..300 {
        let (status, body) = send_json(app, "GET", &format!("/state/{job_id}"), Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["buildStatus"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {wanted}");
}

#[tokio::test]
async fn git_deploy_reports_progress_through_the_webhook() {
    let control = control(8);

    let (status, accepted) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(git_deploy("owner-token", "site")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(accepted["status"], "PENDING");
    let job_id = accepted["jobID"].as_str().expect("job id").to_owned();

    let submissions = control.scheduler.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].name, job_id);
    assert_eq!(submissions[0].template, "git-build");
    let secret = webhook_secret(&submissions[0]);

    let (status, body) = send_json(
        &control.app,
        "POST",
        "/status",
        Some(&secret),
        Some(json!({"status": "BUILDING", "message": "compiling", "time": "2026-08-21T10:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    let (status, state) = send_json(
        &control.app,
        "GET",
        &format!("/state/{job_id}"),
        Some("owner-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["buildEngine"], "external-scheduler");
    assert_eq!(state["buildStatus"], "BUILDING");
    let transitions = state["transitions"].as_array().expect("transitions");
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0]["from"], "PROCESSING");
    assert_eq!(transitions[0]["to"], "PENDING");
    assert_eq!(transitions[1]["to"], "BUILDING");
    assert_eq!(transitions[1]["reason"], "compiling");

    let (status, _) = send_json(
        &control.app,
        "POST",
        "/status",
        Some(&secret),
        Some(json!({"status": "SUCCEEDED", "message": "deployed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let state = wait_for_status(&control.app, &job_id, "owner-token", "SUCCEEDED").await;
    assert_eq!(state["transitions"].as_array().expect("transitions").len(), 3);
}

#[tokio::test]
async fn concurrency_ceiling_frees_on_terminal_reports() {
    let control = control(2);

    for project in ["one", "two"] {
        let (status, _) = send_json(
            &control.app,
            "POST",
            "/deploy",
            None,
            Some(git_deploy("owner-token", project)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(git_deploy("owner-token", "three")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body["error"].as_str().expect("error message");
    assert!(error.contains("concurrent build limit"), "got: {error}");

    // A different caller is not affected by this caller's ceiling.
    let (status, _) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(git_deploy("other-token", "theirs")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Finishing one job frees its slot.
    let secret = webhook_secret(&control.scheduler.submissions()[0]);
    let (status, _) = send_json(
        &control.app,
        "POST",
        "/status",
        Some(&secret),
        Some(json!({"status": "FAILED", "message": "build broke"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(git_deploy("owner-token", "three")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn quiet_jobs_are_reconciled_by_scheduler_polling() {
    let control = control(8);

    let (status, accepted) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(git_deploy("owner-token", "site")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = accepted["jobID"].as_str().expect("job id").to_owned();

    let id = JobId::new(job_id.clone());
    control.scheduler.push_poll_answer(&id, None);
    control.scheduler.push_poll_answer(
        &id,
        Some(vec![report(BuildStatus::Scheduled, "workflow started")]),
    );
    control.scheduler.push_poll_answer(
        &id,
        Some(vec![
            report(BuildStatus::Scheduled, "workflow started"),
            report(BuildStatus::Building, "compiling"),
            report(BuildStatus::Succeeded, "deployed"),
        ]),
    );

    let state = wait_for_status(&control.app, &job_id, "owner-token", "SUCCEEDED").await;
    let transitions = state["transitions"].as_array().expect("transitions");
    let moves: Vec<&str> = transitions
        .iter()
        .map(|t| t["to"].as_str().expect("status"))
        .collect();
    assert_eq!(moves, ["PENDING", "SCHEDULED", "BUILDING", "SUCCEEDED"]);
}

#[tokio::test]
async fn state_is_scoped_to_the_owning_token() {
    let control = control(8);

    let (_, accepted) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(git_deploy("owner-token", "site")),
    )
    .await;
    let job_id = accepted["jobID"].as_str().expect("job id").to_owned();

    let (status, body) = send_json(
        &control.app,
        "GET",
        &format!("/state/{job_id}"),
        Some("someone-else"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error = body["error"].as_str().expect("error message");
    assert!(error.contains(&job_id));

    let (status, _) = send_json(
        &control.app,
        "GET",
        "/state/no-such-job",
        Some("owner-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn stream_follows_a_job_to_completion() {
    let control = control(8);

    let (_, accepted) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(git_deploy("owner-token", "site")),
    )
    .await;
    let job_id = accepted["jobID"].as_str().expect("job id").to_owned();
    let secret = webhook_secret(&control.scheduler.submissions()[0]);

    let response = send(
        &control.app,
        "GET",
        &format!("/state/{job_id}/stream"),
        Some("owner-token"),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    // The subscription is live; reports arriving now are buffered for it,
    // and the terminal one ends the stream so the body can be collected.
    for (status, message) in [("BUILDING", "compiling"), ("SUCCEEDED", "deployed")] {
        let (code, _) = send_json(
            &control.app,
            "POST",
            "/status",
            Some(&secret),
            Some(json!({"status": status, "message": message})),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
    }

    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let frames = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert_eq!(frames.matches("data:").count(), 3);
    assert!(frames.contains("PENDING"));
    assert!(frames.contains("BUILDING"));
    assert!(frames.contains("SUCCEEDED"));
}

#[tokio::test]
async fn inline_code_deploys_stage_an_archive() {
    let control = control(8);

    let (status, _) = send_json(
        &control.app,
        "POST",
        "/deploy",
        None,
        Some(json!({
            "token": "owner-token",
            "type": "archive",
            "args": {
                "projectName": "site",
                "region": "eu-west-1",
                "code": {
                    "index.js": {"content": "console.log('hi')"}
                }
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let submissions = control.scheduler.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].template, "archive-build");

    let raw = BASE64.decode(&submissions[0].payload).expect("payload is base64");
    let payload: Value = serde_json::from_slice(&raw).expect("payload is JSON");
    let url = payload["archiveDownloadURL"].as_str().expect("staged URL");
    assert!(url.contains("/site/prod/"), "got: {url}");
    assert!(url.ends_with(".tar.zst"), "got: {url}");
}
