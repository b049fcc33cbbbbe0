use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use envelo_agent::{
    Agent, AgentConfig, AgentError, AuthorityConfig, SessionAck, SessionRegistration,
    SessionSummary, TelemetryBatch,
};
use envelo_boundary::{BoundaryDef, BoundaryDocument, NumericSpec, RuleSpec, StateSpec};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

fn params(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[derive(Default)]
struct MockAuthority {
    sessions: Mutex<Vec<SessionRegistration>>,
    telemetry: Mutex<Vec<TelemetryBatch>>,
    ended: Mutex<Vec<(String, SessionSummary)>>,
}

fn initial_document() -> BoundaryDocument {
    BoundaryDocument::from_defs([BoundaryDef::new(
        "speed_limit",
        "speed",
        RuleSpec::Numeric(NumericSpec::range(Some(0.0), Some(30.0))),
    )])
}

fn resync_document() -> BoundaryDocument {
    BoundaryDocument::from_defs([
        BoundaryDef::new(
            "speed_limit",
            "speed",
            RuleSpec::Numeric(NumericSpec::range(Some(0.0), Some(10.0))),
        ),
        BoundaryDef::new("modes", "mode", RuleSpec::State(StateSpec::allow(["auto", "idle"]))),
    ])
}

async fn register(
    State(mock): State<Arc<MockAuthority>>,
    Json(registration): Json<SessionRegistration>,
) -> Json<SessionAck> {
    mock.sessions.lock().push(registration);
    Json(SessionAck {
        boundaries: Some(initial_document()),
    })
}

async fn telemetry(State(mock): State<Arc<MockAuthority>>, Json(batch): Json<TelemetryBatch>) -> StatusCode {
    mock.telemetry.lock().push(batch);
    StatusCode::ACCEPTED
}

async fn end_session(
    State(mock): State<Arc<MockAuthority>>,
    Path(id): Path<String>,
    Json(summary): Json<SessionSummary>,
) -> StatusCode {
    mock.ended.lock().push((id, summary));
    StatusCode::NO_CONTENT
}

async fn boundaries(Path(_id): Path<String>) -> Json<BoundaryDocument> {
    Json(resync_document())
}

async fn spawn_authority() -> (String, Arc<MockAuthority>) {
    let mock = Arc::new(MockAuthority::default());
    let app = Router::new()
        .route("/sessions", post(register))
        .route("/heartbeat", post(|| async { StatusCode::OK }))
        .route("/telemetry", post(telemetry))
        .route("/sessions/:id/end", post(end_session))
        .route("/sessions/:id/boundaries", get(boundaries))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), mock)
}

fn unreachable_config(fail_closed: bool) -> AgentConfig {
    let mut authority = AuthorityConfig::new("http://127.0.0.1:1");
    authority.request_timeout_ms = 500;
    AgentConfig {
        fail_closed,
        reconnect_attempts: 2,
        reconnect_delay_ms: 10,
        fallback_path: None,
        shutdown_timeout_ms: 1_000,
        ..AgentConfig::standalone("rover-1").with_authority(authority)
    }
}

#[tokio::test]
async fn fail_closed_refuses_to_start() {
    let err = Agent::start(unreachable_config(true)).await.err().unwrap();
    match err {
        AgentError::ConnectivityLost { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn fail_open_starts_disconnected() {
    let agent = Agent::start(unreachable_config(false)).await.unwrap();
    assert!(agent.is_running());
    assert!(!agent.is_connected());
    assert!(!agent.is_standalone());

    // Local enforcement keeps working without the authority.
    agent
        .add_boundary(
            envelo_boundary::Boundary::new(BoundaryDef::new(
                "speed_limit",
                "speed",
                RuleSpec::Numeric(NumericSpec::range(None, Some(5.0))),
            ))
            .unwrap(),
        )
        .unwrap();
    assert!(!agent.evaluate(&params(json!({"speed": 9}))).allowed);
    agent.stop().await;
}

#[tokio::test]
async fn session_lifecycle_against_authority() {
    let (url, mock) = spawn_authority().await;
    let dir = tempfile::tempdir().unwrap();
    let config = AgentConfig {
        telemetry_interval_ms: 3_600_000,
        telemetry_batch_size: 2,
        fallback_path: Some(dir.path().join("fallback.jsonl")),
        ..AgentConfig::standalone("rover-7").with_authority(AuthorityConfig::new(url))
    };
    let agent = Agent::start(config).await.unwrap();
    assert!(agent.is_connected());
    assert_eq!(agent.boundaries().len(), 1, "boundaries installed from the ack");

    {
        let sessions = mock.sessions.lock();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].system_id, "rover-7");
        assert_eq!(sessions[0].session_id, agent.session_id());
    }

    assert!(agent.evaluate(&params(json!({"speed": 12}))).allowed);
    assert!(!agent.evaluate(&params(json!({"speed": 45}))).allowed);
    assert!(agent.evaluate(&params(json!({"speed": 3}))).allowed);
    agent.stop().await;

    let batches = mock.telemetry.lock();
    let records: Vec<_> = batches.iter().flat_map(|b| b.records.iter()).collect();
    assert_eq!(records.len(), 3);
    assert!(batches.iter().all(|b| b.session_id == agent.session_id()));
    assert_eq!(records.iter().filter(|r| !r.allowed).count(), 1);

    let ended = mock.ended.lock();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].0, agent.session_id());
    assert_eq!(ended[0].1.pass_count, 2);
    assert_eq!(ended[0].1.block_count, 1);

    assert!(agent.fallback_log().unwrap().read_all().await.unwrap().is_empty());
    assert_eq!(agent.stats().telemetry.shipped, 3);
}

#[tokio::test]
async fn resync_replaces_boundary_set() {
    let (url, _mock) = spawn_authority().await;
    let config = AgentConfig {
        fallback_path: None,
        ..AgentConfig::standalone("rover-8").with_authority(AuthorityConfig::new(url))
    };
    let agent = Agent::start(config).await.unwrap();
    assert!(agent.evaluate(&params(json!({"speed": 20}))).allowed);

    assert_eq!(agent.resync().await.unwrap(), 2);
    assert!(!agent.evaluate(&params(json!({"speed": 20}))).allowed);
    assert!(!agent.evaluate(&params(json!({"speed": 5, "mode": "manual"}))).allowed);
    assert!(agent.evaluate(&params(json!({"speed": 5, "mode": "auto"}))).allowed);
    agent.stop().await;
}

/// Registers sessions normally but never answers a telemetry post.
async fn spawn_hung_authority() -> String {
    let app = Router::new()
        .route("/sessions", post(register))
        .route("/heartbeat", post(|| async { StatusCode::OK }))
        .route(
            "/telemetry",
            post(|| async { std::future::pending::<StatusCode>().await }),
        )
        .route("/sessions/:id/end", post(end_session))
        .route("/sessions/:id/boundaries", get(boundaries))
        .with_state(Arc::new(MockAuthority::default()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn hung_config(url: String, fallback: Option<std::path::PathBuf>) -> AgentConfig {
    AgentConfig {
        telemetry_interval_ms: 3_600_000,
        fallback_path: fallback,
        shutdown_timeout_ms: 400,
        ..AgentConfig::standalone("rover-9").with_authority(AuthorityConfig::new(url))
    }
}

#[tokio::test]
async fn stop_with_hung_authority_recovers_telemetry_to_fallback() {
    let url = spawn_hung_authority().await;
    let dir = tempfile::tempdir().unwrap();
    let agent = Agent::start(hung_config(url, Some(dir.path().join("fallback.jsonl"))))
        .await
        .unwrap();

    for speed in [1, 2, 3, 4, 50] {
        agent.evaluate(&params(json!({ "speed": speed })));
    }
    let started = std::time::Instant::now();
    agent.stop().await;
    assert!(started.elapsed() < std::time::Duration::from_secs(3));

    let stats = agent.stats().telemetry;
    assert_eq!(stats.enqueued, 5);
    assert_eq!(stats.recovered, 5);
    assert_eq!(stats.shipped + stats.recovered + stats.dropped, stats.enqueued);
    let lines = agent.fallback_log().unwrap().read_all().await.unwrap();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines.iter().filter(|r| !r.allowed).count(), 1);
}

#[tokio::test]
async fn stop_with_hung_authority_and_no_fallback_counts_every_record() {
    let url = spawn_hung_authority().await;
    let agent = Agent::start(hung_config(url, None)).await.unwrap();

    for speed in [1, 2, 3] {
        agent.evaluate(&params(json!({ "speed": speed })));
    }
    agent.stop().await;

    let stats = agent.stats().telemetry;
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.dropped, 3);
    assert_eq!(stats.shipped + stats.recovered, 0);
}
