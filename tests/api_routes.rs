//! HTTP surface tests against the full router

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::*;
use crash_engine::{api::ApiServer, round::MultiplierCurve};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tower::ServiceExt;

fn app_with_seeds(seeds: Vec<crash_engine::fairness::ServerSeed>) -> (Router, crash_engine::EngineHandle) {
    let (engine, _wallet) = engine_with_seeds(seeds);
    let handle = engine.start();
    let router = ApiServer::new(engine.config().api.clone(), engine.clone()).router();
    (router, handle)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_health_and_request_ids() {
    let (app, handle) = app_with_seeds(vec![]);

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let response = app
        .clone()
        .oneshot(
            Request::get("/health")
                .header("x-request-id", "trace-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-123");

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roundId"], 1);
    assert_eq!(body["phase"], "betting");

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_live_phase_between_samples() {
    let (engine, _wallet) = engine_with_seeds(vec![seed_for(1, between(300, 10_000))]);
    // Clock never started, so the launch is not committed
    let app = ApiServer::new(engine.config().api.clone(), engine.clone()).router();
    tokio::time::advance(Duration::from_secs(6)).await;

    let (_, health) = send(&app, Method::GET, "/health", None).await;
    let (_, current) = send(&app, Method::GET, "/api/crash/current", None).await;
    assert_eq!(current["phase"], "flying");
    assert_eq!(health["phase"], current["phase"]);
}

#[tokio::test(start_paused = true)]
async fn test_current_round_snapshot() {
    let (app, handle) = app_with_seeds(vec![]);

    let (status, body) = send(&app, Method::GET, "/api/crash/current", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roundId"], 1);
    assert_eq!(body["phase"], "betting");
    assert_eq!(body["multiplier"], json!(1.0));
    assert_eq!(body["serverSeedHash"].as_str().unwrap().len(), 64);
    assert!(body["countdownMs"].as_u64().unwrap() <= 5_000);
    assert!(body.get("serverSeed").is_none());
    assert!(body.get("crashPoint").is_none());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bet_and_cash_out_over_http() {
    let t0 = Instant::now();
    let (app, handle) = app_with_seeds(vec![seed_for(1, between(300, 10_000))]);

    let (status, placed) = send(
        &app,
        Method::POST,
        "/api/crash/bet",
        Some(json!({ "accountId": "alice", "amount": 1000, "roundId": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(placed["roundId"], 1);
    assert_eq!(placed["newBalance"], STARTING_BALANCE - 1_000);
    let bet_id = placed["betId"].as_u64().unwrap();

    let (status, bet) = send(
        &app,
        Method::GET,
        &format!("/api/crash/bets/{}?accountId=alice", bet_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bet["status"]["state"], "pending");
    assert_eq!(bet["accountId"], "alice");

    // Another account cannot see it, and an anonymous lookup is refused
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/crash/bets/{}?accountId=bob", bet_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "BET_NOT_FOUND");

    let (status, body) = send(&app, Method::GET, &format!("/api/crash/bets/{}", bet_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "BAD_REQUEST");

    // Too early: the round is still betting
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/crash/cashout",
        Some(json!({ "accountId": "alice", "betId": bet_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "ROUND_NOT_ACCEPTING_BETS");

    sleep_until(t0 + Duration::from_secs(10)).await;

    // A client-supplied multiplier is ignored
    let (status, receipt) = send(
        &app,
        Method::POST,
        "/api/crash/cashout",
        Some(json!({ "accountId": "alice", "betId": bet_id, "multiplier": 50.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["multiplier"], json!(1.34));
    assert_eq!(receipt["winAmount"], 1_340);
    assert_eq!(receipt["newBalance"], STARTING_BALANCE - 1_000 + 1_340);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/crash/cashout",
        Some(json!({ "accountId": "alice", "betId": bet_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "BET_ALREADY_RESOLVED");

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_error_responses() {
    let (app, handle) = app_with_seeds(vec![]);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/crash/bet",
        Some(json!({ "accountId": "alice", "amount": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_STAKE");
    assert!(body["requestId"].as_str().is_some());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/crash/bet",
        Some(json!({ "accountId": "mallory", "amount": 1000 })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(error_code(&body), "INSUFFICIENT_FUNDS");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/crash/bet",
        Some(json!({ "accountId": "alice", "amount": STARTING_BALANCE + 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(error_code(&body), "INSUFFICIENT_FUNDS");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/crash/bet",
        Some(json!({ "accountId": "alice", "amount": 1000, "roundId": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "ROUND_NOT_ACCEPTING_BETS");

    let (status, body) = send(&app, Method::POST, "/api/crash/bet", Some(json!({ "amount": "lots" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "BAD_REQUEST");

    let (status, body) = send(&app, Method::GET, "/api/crash/bets/999?accountId=alice", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "BET_NOT_FOUND");

    let (status, body) = send(&app, Method::GET, "/api/crash/rounds/42/verify", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "ROUND_NOT_FOUND");

    let (status, body) = send(&app, Method::GET, "/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_history_and_verification() {
    let t0 = Instant::now();
    let seed = seed_for(1, between(150, 300));
    let crash = crash_of(&seed, 1);
    let (app, handle) = app_with_seeds(vec![seed.clone()]);

    let (_, current) = send(&app, Method::GET, "/api/crash/current", None).await;
    let published_hash = current["serverSeedHash"].clone();

    let (status, body) = send(&app, Method::GET, "/api/crash/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalReturned"], 0);

    let flight = MultiplierCurve::default().time_to_reach(crash);
    sleep_until(t0 + Duration::from_secs(5) + flight + Duration::from_secs(1)).await;

    let (status, body) = send(&app, Method::GET, "/api/crash/history?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalReturned"], 1);
    let revealed = &body["rounds"][0];
    assert_eq!(revealed["roundId"], 1);
    assert_eq!(revealed["serverSeed"], seed.to_hex());
    assert_eq!(revealed["serverSeedHash"], published_hash);
    assert_eq!(revealed["crashPoint"], json!(crash.as_f64()));

    let (status, report) = send(&app, Method::GET, "/api/crash/rounds/1/verify", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["hashMatches"], true);
    assert_eq!(report["crashPointMatches"], true);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_metrics_exposition() {
    let (app, handle) = app_with_seeds(vec![]);
    send(
        &app,
        Method::POST,
        "/api/crash/bet",
        Some(json!({ "accountId": "bob", "amount": 500 })),
    )
    .await;

    let response = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("crash_engine_bets_placed_total 1"));
    assert!(text.contains("# TYPE crash_engine_rounds_started_total counter"));

    handle.shutdown().await.unwrap();
}
