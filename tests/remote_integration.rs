//! Purpose: End-to-end tests for the blocking service client against a mock API.
//! Exports: None (integration test module).
//! Role: Validate submit, poll, result, status, log, and error propagation over TCP.
//! Invariants: Uses a loopback-only axum server on an ephemeral port.
//! Invariants: Poll delays are shrunk so waits stay bounded.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use thamos::api::{
    AdviseOptions, AnalysisOutcome, ImageAnalysisOptions, PollPolicy, ProvenanceOptions,
    ThothClient,
};
use thamos::config::{RecommendationType, ThothConfig};
use thamos::stack::PythonStack;
use thamos::ErrorKind;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Default)]
struct Recorded {
    queries: Vec<HashMap<String, String>>,
    bodies: Vec<Value>,
    status_calls: usize,
}

type Shared = Arc<Mutex<Recorded>>;

struct MockServer {
    addr: SocketAddr,
    recorded: Shared,
}

impl MockServer {
    fn start() -> TestResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let recorded: Shared = Arc::new(Mutex::new(Recorded::default()));
        let app = router(recorded.clone());
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
                axum::serve(listener, app).await.expect("serve");
            });
        });
        Ok(Self { addr, recorded })
    }

    fn client(&self) -> TestResult<ThothClient> {
        let client = ThothClient::new(format!("http://{}", self.addr), true)?;
        Ok(client.with_poll_policy(PollPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            timeout: Some(Duration::from_secs(10)),
        }))
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn router(recorded: Shared) -> Router {
    Router::new()
        .route("/api/v1/advise/python", post(submit_advise))
        .route("/api/v1/advise/python/:id", get(advise_result))
        .route("/api/v1/advise/python/:id/status", get(analysis_status))
        .route("/api/v1/advise/python/:id/log", get(analysis_log))
        .route("/api/v1/provenance/python", post(submit_provenance))
        .route("/api/v1/provenance/python/:id", get(provenance_result))
        .route("/api/v1/provenance/python/:id/status", get(analysis_status))
        .route("/api/v1/analyze", post(submit_image))
        .with_state(recorded)
}

fn record(state: &Shared, query: HashMap<String, String>, body: Option<Value>) {
    let mut recorded = state.lock().unwrap_or_else(|poison| poison.into_inner());
    recorded.queries.push(query);
    if let Some(body) = body {
        recorded.bodies.push(body);
    }
}

async fn submit_advise(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(&state, query, Some(body));
    Json(json!({ "analysis_id": "adviser-210301-abc", "cached": false }))
}

async fn submit_provenance(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(&state, query, Some(body));
    Json(json!({ "analysis_id": "provenance-checker-210301-abc" }))
}

async fn submit_image(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    record(&state, query, None);
    Json(json!({ "analysis_id": "package-extract-210301-abc" }))
}

async fn analysis_status(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    if id.ends_with("missing") {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("analysis {id} not found") })),
        )
            .into_response();
    }
    if id.ends_with("stuck") {
        return Json(json!({ "status": { "state": "running", "finished_at": null } }))
            .into_response();
    }
    let calls = {
        let mut recorded = state.lock().unwrap_or_else(|poison| poison.into_inner());
        recorded.status_calls += 1;
        recorded.status_calls
    };
    let status = if calls < 3 {
        json!({ "state": "running", "started_at": "2021-03-01T12:00:00Z", "finished_at": null })
    } else {
        json!({
            "state": "terminated",
            "started_at": "2021-03-01T12:00:00Z",
            "finished_at": "2021-03-01T12:01:00Z",
            "exit_code": 0,
            "container": "adviser"
        })
    };
    Json(json!({ "status": status })).into_response()
}

async fn advise_result(Path(id): Path<String>) -> Response {
    if id.ends_with("unsolvable") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "resolver did not find any stack" })),
        )
            .into_response();
    }
    Json(json!({
        "result": {
            "error": false,
            "report": [[1.0, {"requirements": {}, "requirements_locked": {}}]]
        },
        "metadata": { "document_id": id }
    }))
    .into_response()
}

async fn provenance_result() -> Json<Value> {
    Json(json!({
        "result": { "error": true, "report": [{ "type": "ERROR", "justification": "unknown index" }] },
        "metadata": {}
    }))
}

async fn analysis_log(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "log": format!("log of {id}\nresolver finished\n") }))
}

fn stack() -> PythonStack {
    PythonStack::new(
        "[packages]\nflask = \"*\"\n",
        "{\"_meta\": {}, \"default\": {}}",
    )
}

fn document() -> TestResult<ThothConfig> {
    Ok(ThothConfig::from_yaml_str(
        r#"
host: localhost
tls_verify: false
requirements_format: pipenv
runtime_environments:
  - name: "fedora:39"
    operating_system:
      name: fedora
      version: "39"
    python_version: "3.12"
    recommendation_type: latest
"#,
    )?)
}

#[test]
fn advise_waits_for_result() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let config = document()?;
    let options = AdviseOptions::default().with_config_environment(&config, None)?;

    let outcome = client.advise(&stack(), &options, config.recommendation_type)?;
    let AnalysisOutcome::Completed(report) = outcome else {
        panic!("expected completed outcome");
    };
    assert_eq!(report.analysis_id, "adviser-210301-abc");
    assert!(!report.has_error());
    assert!(report.report().is_some());
    assert_eq!(report.metadata["document_id"], "adviser-210301-abc");

    let recorded = server.recorded();
    assert!(recorded.status_calls >= 3);
    let query = &recorded.queries[0];
    assert_eq!(query.get("recommendation_type").map(String::as_str), Some("latest"));
    assert_eq!(query.get("count").map(String::as_str), Some("1"));
    assert_eq!(query.get("force").map(String::as_str), Some("false"));
    let body = &recorded.bodies[0];
    assert_eq!(body["application_stack"]["requirements"], "[packages]\nflask = \"*\"\n");
    assert_eq!(body["runtime_environment"]["name"], "fedora:39");
    assert_eq!(body["runtime_environment"]["python_version"], "3.12");
    assert!(body["runtime_environment"].get("recommendation_type").is_none());
    Ok(())
}

#[test]
fn advise_explicit_type_wins_and_nowait_returns_id() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let config = document()?;
    let options = AdviseOptions {
        recommendation_type: Some(RecommendationType::Testing),
        limit: Some(100),
        nowait: true,
        ..AdviseOptions::default()
    }
    .with_config_environment(&config, Some("fedora:39"))?;

    let outcome = client.advise(&stack(), &options, Some(RecommendationType::Stable))?;
    assert_eq!(
        outcome,
        AnalysisOutcome::Submitted {
            analysis_id: "adviser-210301-abc".to_string()
        }
    );

    let recorded = server.recorded();
    assert_eq!(recorded.status_calls, 0);
    let query = &recorded.queries[0];
    assert_eq!(query.get("recommendation_type").map(String::as_str), Some("testing"));
    assert_eq!(query.get("limit").map(String::as_str), Some("100"));
    Ok(())
}

#[test]
fn advise_rejects_empty_pipfile_before_sending() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let err = client
        .advise(&PythonStack::new("  ", ""), &AdviseOptions::default(), None)
        .expect_err("empty pipfile");
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(server.recorded().queries.is_empty());
    Ok(())
}

#[test]
fn provenance_result_with_error_flag() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let outcome = client.provenance_check(&stack(), &ProvenanceOptions::default())?;
    let AnalysisOutcome::Completed(report) = outcome else {
        panic!("expected completed outcome");
    };
    assert_eq!(report.analysis_id, "provenance-checker-210301-abc");
    assert!(report.has_error());

    let recorded = server.recorded();
    assert_eq!(recorded.bodies[0]["requirements_lock"], "{\"_meta\": {}, \"default\": {}}");
    Ok(())
}

#[test]
fn image_analysis_sends_credentials_in_query() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let options = ImageAnalysisOptions {
        registry_user: Some("builder".to_string()),
        registry_password: Some("secret".to_string()),
        nowait: true,
        ..ImageAnalysisOptions::default()
    };
    let outcome = client.image_analysis("quay.io/thoth-station/s2i-thoth:v1", &options)?;
    assert_eq!(outcome.analysis_id(), "package-extract-210301-abc");

    let recorded = server.recorded();
    let query = &recorded.queries[0];
    assert_eq!(
        query.get("image").map(String::as_str),
        Some("quay.io/thoth-station/s2i-thoth:v1")
    );
    assert_eq!(query.get("registry_user").map(String::as_str), Some("builder"));
    assert_eq!(query.get("registry_password").map(String::as_str), Some("secret"));
    assert_eq!(query.get("verify_tls").map(String::as_str), Some("true"));
    Ok(())
}

#[test]
fn status_and_log_by_analysis_id() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;

    let status = client.status("adviser-210301-abc")?;
    assert_eq!(status.state.as_deref(), Some("running"));
    assert!(!status.is_finished());

    let log = client.log("adviser-210301-abc")?;
    assert!(log.starts_with("log of adviser-210301-abc"));
    Ok(())
}

#[test]
fn missing_analysis_maps_to_not_found() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let err = client.status("adviser-missing").expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.analysis_id(), Some("adviser-missing"));
    assert!(err.message().unwrap_or_default().contains("not found"));
    Ok(())
}

#[test]
fn failed_result_maps_to_analysis_error() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let err = client.result("adviser-unsolvable").expect_err("unsolvable");
    assert_eq!(err.kind(), ErrorKind::Analysis);
    assert_eq!(err.message(), Some("resolver did not find any stack"));
    Ok(())
}

#[test]
fn unknown_prefix_is_rejected_without_request() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?;
    let err = client.status("solver-210301-abc").expect_err("unknown prefix");
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(server.recorded().status_calls, 0);
    Ok(())
}

#[test]
fn discover_accepts_explicit_scheme() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = ThothClient::discover(&format!("http://{}", server.addr), true)?;
    assert_eq!(
        client.api_url().as_str(),
        format!("http://{}/api/v1", server.addr)
    );
    Ok(())
}

#[test]
fn discover_falls_back_to_http() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = ThothClient::discover(&server.addr.to_string(), true)?;
    assert_eq!(client.api_url().scheme(), "http");
    Ok(())
}

#[test]
fn unreachable_service_is_io_error() -> TestResult<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    let client = ThothClient::new(format!("http://{addr}"), true)?;
    let err = client.status("adviser-1").expect_err("refused");
    assert_eq!(err.kind(), ErrorKind::Io);
    Ok(())
}

#[test]
fn wait_gives_up_after_timeout() -> TestResult<()> {
    let server = MockServer::start()?;
    let client = server.client()?.with_poll_policy(PollPolicy {
        initial: Duration::from_millis(5),
        max: Duration::from_millis(20),
        timeout: Some(Duration::from_millis(100)),
    });

    let err = client
        .wait_for_analysis("adviser-stuck")
        .expect_err("never finishes");
    assert_eq!(err.kind(), ErrorKind::Remote);
    assert_eq!(err.analysis_id(), Some("adviser-stuck"));
    assert_eq!(err.message(), Some("analysis did not finish within 100ms"));
    assert!(err.hint().unwrap_or_default().contains("thamos status adviser-stuck"));
    Ok(())
}
