//! Integration tests for the REST API.
//!
//! Tests use `tower::ServiceExt::oneshot()` to drive the axum router in-process
//! over an in-memory store, so no database is needed.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use keyledger_core::store::MemoryStore;
use keyledger_telemetry::MetricsRegistry;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::{create_router, ApiConfig, AppState};

// ---------------------------------------------------------------------------
// Test harness
// ---------------------------------------------------------------------------

const AGENT_KEY: &str = "NFX-AAAA-BBBB";

/// A platform, one funded agent holding a key, and a standalone key.
fn seeded_tree() -> Value {
    json!({
        "platforms": {
            "netflix": {"title": "Netflix", "prefix": "NFX", "pattern": [4, 4]},
            "spotify": {"title": "Spotify", "prefix": "SPO", "apiEnabled": false}
        },
        "agents": {
            "agent_1": {
                "username": "alice",
                "password": "pw",
                "credits": 100,
                "createdAt": "2024-01-01T00:00:00Z",
                "keys": {
                    "netflix": [
                        {"key": AGENT_KEY, "tokens_remaining": 10, "status": "active"},
                        {"key": "NFX-SUSP-ENDD", "tokens_remaining": 10, "status": "inactive"}
                    ]
                }
            },
            "agent_2": {"username": "bob", "password": "pw", "credits": 5}
        },
        "standalone_keys": {
            "key_1": {"key": "NFX-STAN-DALO", "tokens_remaining": 4, "platformId": "netflix", "platformTitle": "Netflix"}
        }
    })
}

/// Build the router over a store holding `tree`.
fn make_app_with(tree: Value) -> (Router, Arc<MemoryStore>) {
    let db = Arc::new(MemoryStore::with_tree(tree));
    let state = AppState::new(
        db.clone(),
        ApiConfig::default(),
        Arc::new(MetricsRegistry::new()),
    );
    (create_router(state), db)
}

fn make_app() -> (Router, Arc<MemoryStore>) {
    make_app_with(seeded_tree())
}

/// Send one request through the router and return the status + body bytes.
async fn send(app: &Router, req: Request<Body>) -> (StatusCode, bytes::Bytes) {
    let resp: Response = app.clone().oneshot(req).await.expect("router returned error");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

/// Parse body bytes as JSON.
fn json_body(body: &bytes::Bytes) -> Value {
    serde_json::from_slice(body).expect("response is not valid JSON")
}

/// Build a JSON request, optionally authenticated.
fn json_req(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Build a request with no body, optionally authenticated.
fn empty_req(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn raw_post(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        json_req(
            Method::POST,
            "/auth/login",
            None,
            json!({"username": username, "password": password}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {}", String::from_utf8_lossy(&body));
    json_body(&body)["token"].as_str().unwrap().to_string()
}

async fn use_tokens(app: &Router, platform: &str, key: &str, tokens: i64) -> (StatusCode, Value) {
    let (status, body) = send(
        app,
        json_req(
            Method::POST,
            &format!("/api/{}/use", platform),
            None,
            json!({"key": key, "tokens": tokens}),
        ),
    )
    .await;
    (status, json_body(&body))
}

// ---------------------------------------------------------------------------
// Operational
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_200() {
    let (app, _) = make_app();
    let (status, body) = send(&app, empty_req(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    let j = json_body(&body);
    assert_eq!(j["status"], "healthy");
    assert!(j["version"].is_string());
}

#[tokio::test]
async fn metrics_expose_http_and_key_counters() {
    let (app, _) = make_app();
    send(&app, empty_req(Method::GET, "/health", None)).await;
    use_tokens(&app, "netflix", AGENT_KEY, 1).await;

    let (status, body) = send(&app, empty_req(Method::GET, "/metrics", None)).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("keyledger_http_requests_total"));
    assert!(text.contains("route=\"/health\""));
    assert!(text.contains("keyledger_tokens_consumed_total"));
}

// ---------------------------------------------------------------------------
// Public key API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn credit_reports_remaining_tokens() {
    let (app, db) = make_app();
    let (status, body) = send(
        &app,
        empty_req(Method::GET, &format!("/api/netflix/credit?key={}", AGENT_KEY), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let j = json_body(&body);
    assert_eq!(j["ok"], true);
    assert_eq!(j["tokens_remaining"], 10);
    assert_eq!(j["status"], "active");

    // Credit checks are logged without a token count.
    let logs = db.snapshot()["key_logs"].clone();
    let entry = logs.as_object().unwrap().values().next().unwrap();
    assert_eq!(entry["agentId"], "agent_1");
    assert!(entry.get("tokensUsed").is_none());
}

#[tokio::test]
async fn credit_without_key_is_missing_params() {
    let (app, _) = make_app();
    let (status, body) = send(&app, empty_req(Method::GET, "/api/netflix/credit", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let j = json_body(&body);
    assert_eq!(j["ok"], false);
    assert_eq!(j["error"], "MISSING_PARAMS");
}

#[tokio::test]
async fn credit_unknown_key_is_404() {
    let (app, _) = make_app();
    let (status, body) = send(
        &app,
        empty_req(Method::GET, "/api/netflix/credit?key=NFX-NOPE-NOPE", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"], "KEY_NOT_FOUND");
}

#[tokio::test]
async fn unusable_platform_id_is_key_not_found() {
    let (app, _) = make_app();
    let (status, body) = send(
        &app,
        empty_req(Method::GET, &format!("/api/bad.id/credit?key={}", AGENT_KEY), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"], "KEY_NOT_FOUND");

    let (status, j) = use_tokens(&app, "bad$id", AGENT_KEY, 1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(j["error"], "KEY_NOT_FOUND");
}

#[tokio::test]
async fn use_debits_agent_key() {
    let (app, db) = make_app();
    let (status, j) = use_tokens(&app, "netflix", AGENT_KEY, 3).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["ok"], true);
    assert_eq!(j["tokens_remaining"], 7);
    assert!(j["message"].is_string());

    let stored = &db.snapshot()["agents"]["agent_1"]["keys"]["netflix"][0];
    assert_eq!(stored["tokens_remaining"], 7);
}

#[tokio::test]
async fn use_more_than_remaining_is_refused() {
    let (app, db) = make_app();
    let (status, j) = use_tokens(&app, "netflix", AGENT_KEY, 11).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["error"], "INSUFFICIENT_TOKENS");
    assert_eq!(
        db.snapshot()["agents"]["agent_1"]["keys"]["netflix"][0]["tokens_remaining"],
        10
    );
}

#[tokio::test]
async fn use_rejects_malformed_bodies() {
    let (app, _) = make_app();

    let (status, body) = send(&app, raw_post("/api/netflix/use", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "INVALID_JSON");

    let (status, body) = send(&app, raw_post("/api/netflix/use", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "MISSING_PARAMS");

    let (status, body) = send(
        &app,
        raw_post("/api/netflix/use", r#"{"key": "NFX-AAAA-BBBB", "tokens": "3"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "MISSING_PARAMS");

    let (status, j) = use_tokens(&app, "netflix", AGENT_KEY, -2).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["error"], "INVALID_TOKENS");
}

#[tokio::test]
async fn use_refuses_suspended_key_and_disabled_platform() {
    let (app, _) = make_app();
    let (status, j) = use_tokens(&app, "netflix", "NFX-SUSP-ENDD", 1).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(j["error"], "KEY_SUSPENDED");

    let (status, j) = use_tokens(&app, "spotify", "SPO-AAAA-BBBB", 1).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(j["error"], "PLATFORM_DISABLED");
}

#[tokio::test]
async fn use_refuses_admin_banned_ip() {
    let mut tree = seeded_tree();
    tree["ip_bans"] = json!({"admin": {"ban_1": {"ip": "9.9.9.9"}}});
    let (app, _) = make_app_with(tree);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/netflix/use")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "9.9.9.9, 10.0.0.1")
        .body(Body::from(r#"{"key": "NFX-AAAA-BBBB", "tokens": 1}"#))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json_body(&body)["error"], "IP_BANNED");

    // Other clients are unaffected.
    let (status, _) = use_tokens(&app, "netflix", AGENT_KEY, 1).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn use_debits_standalone_key() {
    let (app, db) = make_app();
    let (status, j) = use_tokens(&app, "netflix", "NFX-STAN-DALO", 4).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["tokens_remaining"], 0);
    assert_eq!(db.snapshot()["standalone_keys"]["key_1"]["tokens_remaining"], 0);

    let (status, j) = use_tokens(&app, "netflix", "NFX-STAN-DALO", 1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["error"], "INSUFFICIENT_TOKENS");
}

#[tokio::test]
async fn concurrent_use_never_overdraws() {
    let (app, db) = make_app();
    let mut handles = Vec::new();
    for _ in 0..15 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            use_tokens(&app, "netflix", AGENT_KEY, 1).await.0
        }));
    }
    let mut ok = 0;
    for handle in handles {
        let status = handle.await.unwrap();
        if status == StatusCode::OK {
            ok += 1;
        } else {
            assert!(
                status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT,
                "unexpected status {}",
                status
            );
        }
    }
    let remaining = db.snapshot()["agents"]["agent_1"]["keys"]["netflix"][0]["tokens_remaining"]
        .as_u64()
        .unwrap();
    assert_eq!(remaining + ok, 10);
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_login_and_me() {
    let (app, _) = make_app();
    let token = login(&app, "admin", "admin").await;
    assert!(token.starts_with("kls_"));

    let (status, body) = send(&app, empty_req(Method::GET, "/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    let j = json_body(&body);
    assert_eq!(j["role"], "admin");
    assert!(j.get("agent").is_none());
}

#[tokio::test]
async fn login_failures_use_problem_details() {
    let (app, _) = make_app();
    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/auth/login",
            None,
            json!({"username": "alice", "password": "wrong"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let j = json_body(&body);
    assert_eq!(j["type"], "urn:keyledger:error:unauthorized");
    assert_eq!(j["status"], 401);
}

#[tokio::test]
async fn agent_login_returns_profile_without_password() {
    let (app, _) = make_app();
    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/auth/login",
            None,
            json!({"username": "alice", "password": "pw"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let j = json_body(&body);
    assert_eq!(j["role"], "agent");
    assert_eq!(j["agent"]["id"], "agent_1");
    assert_eq!(j["agent"]["credits"], 100);
    assert!(j["agent"].get("password").is_none());
}

#[tokio::test]
async fn routes_require_matching_role() {
    let (app, _) = make_app();
    let (status, body) = send(&app, empty_req(Method::GET, "/admin/agents", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["status"], 401);

    let agent = login(&app, "alice", "pw").await;
    let (status, _) = send(&app, empty_req(Method::GET, "/admin/agents", Some(&agent))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = login(&app, "admin", "admin").await;
    let (status, _) = send(&app, empty_req(Method::GET, "/agent/profile", Some(&admin))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_revokes_token() {
    let (app, _) = make_app();
    let token = login(&app, "alice", "pw").await;
    let (status, _) = send(&app, empty_req(Method::POST, "/auth/logout", Some(&token))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, empty_req(Method::GET, "/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_password_change_takes_effect() {
    let (app, _) = make_app();
    let token = login(&app, "admin", "admin").await;

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/auth/password",
            Some(&token),
            json!({"current": "admin", "new": "n3w", "confirm": "mismatch"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/auth/password",
            Some(&token),
            json!({"current": "admin", "new": "n3w", "confirm": "n3w"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    login(&app, "admin", "n3w").await;
}

#[tokio::test]
async fn maintenance_blocks_agent_login() {
    let (app, _) = make_app();
    let admin = login(&app, "admin", "admin").await;
    let (status, body) = send(
        &app,
        json_req(
            Method::PUT,
            "/admin/maintenance",
            Some(&admin),
            json!({"enabled": true, "message": "upgrading", "allowedAdminIps": "10.0.0.1\n10.0.0.2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["allowedAdminIps"], json!(["10.0.0.1", "10.0.0.2"]));

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/auth/login",
            None,
            json!({"username": "alice", "password": "pw"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(&body)["detail"], "upgrading");

    // The admin is limited to the allowlist.
    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/auth/login",
            None,
            json!({"username": "admin", "password": "admin"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Admin API
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_platform_crud() {
    let (app, _) = make_app();
    let admin = login(&app, "admin", "admin").await;

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/platforms",
            Some(&admin),
            json!({"id": "disney", "title": "Disney+", "prefix": "dsn", "pattern": "4-4-4"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", String::from_utf8_lossy(&body));
    let j = json_body(&body);
    assert_eq!(j["id"], "disney");
    assert_eq!(j["prefix"], "DSN");
    assert_eq!(j["pattern"], json!([4, 4, 4]));

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/platforms",
            Some(&admin),
            json!({"id": "disney", "title": "Disney+", "prefix": "DSN"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/platforms/disney/api",
            Some(&admin),
            json!({"enabled": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, empty_req(Method::GET, "/admin/platforms/disney", Some(&admin))).await;
    assert_eq!(json_body(&body)["apiEnabled"], false);

    let (status, _) = send(
        &app,
        empty_req(Method::DELETE, "/admin/platforms/disney", Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, empty_req(Method::GET, "/admin/platforms/disney", Some(&admin))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_platform_validation_is_problem_json() {
    let (app, _) = make_app();
    let admin = login(&app, "admin", "admin").await;
    let resp = app
        .clone()
        .oneshot(json_req(
            Method::POST,
            "/admin/platforms",
            Some(&admin),
            json!({"id": "x1", "title": "X", "prefix": "TOOLONG"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
}

#[tokio::test]
async fn admin_agent_lifecycle() {
    let (app, db) = make_app();
    let admin = login(&app, "admin", "admin").await;

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/agents",
            Some(&admin),
            json!({"username": "carol", "password": "pw", "credits": 50}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", String::from_utf8_lossy(&body));
    let carol = json_body(&body);
    let id = carol["id"].as_str().unwrap().to_string();
    assert_eq!(carol["credits"], 50);

    // Usernames are unique regardless of case.
    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/agents",
            Some(&admin),
            json!({"username": "CAROL", "password": "pw"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            &format!("/admin/agents/{}/credits", id),
            Some(&admin),
            json!({"amount": 25}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["credits"], 75);

    let (_, body) = send(
        &app,
        empty_req(Method::GET, &format!("/admin/agents/{}/history", id), Some(&admin)),
    )
    .await;
    let history = json_body(&body);
    assert_eq!(history[0]["action"], "admin top-up");
    assert_eq!(history[0]["balanceAfter"], 75);

    // Banning ends the agent's sessions.
    let carol_token = login(&app, "carol", "pw").await;
    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            &format!("/admin/agents/{}/status", id),
            Some(&admin),
            json!({"status": "banned"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, empty_req(Method::GET, "/agent/profile", Some(&carol_token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        empty_req(Method::DELETE, &format!("/admin/agents/{}", id), Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(db.snapshot()["agents"].get(&id).is_none());
}

#[tokio::test]
async fn admin_toggles_and_deletes_agent_key() {
    let (app, db) = make_app();
    let admin = login(&app, "admin", "admin").await;
    let uri = format!("/admin/agents/agent_1/keys/netflix/{}", AGENT_KEY);

    // No body toggles.
    let (status, body) = send(&app, empty_req(Method::PUT, &uri, Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "inactive");

    let (status, body) = send(
        &app,
        json_req(Method::PUT, &uri, Some(&admin), json!({"status": "active"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "active");

    let (status, _) = send(&app, empty_req(Method::DELETE, &uri, Some(&admin))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let keys = &db.snapshot()["agents"]["agent_1"]["keys"]["netflix"];
    assert_eq!(keys.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, empty_req(Method::DELETE, &uri, Some(&admin))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_standalone_keys() {
    let (app, _) = make_app();
    let admin = login(&app, "admin", "admin").await;

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/keys",
            Some(&admin),
            json!({"platformId": "netflix", "tokens": 5}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = json_body(&body);
    let key = created["key"].as_str().unwrap().to_string();
    let id = created["id"].as_str().unwrap().to_string();
    assert!(key.starts_with("NFX-"));
    assert_eq!(created["platformTitle"], "Netflix");

    let (status, j) = use_tokens(&app, "netflix", &key, 2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["tokens_remaining"], 3);

    let (_, body) = send(&app, empty_req(Method::GET, "/admin/keys?platform=netflix", Some(&admin))).await;
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);

    let (status, _) = send(
        &app,
        json_req(
            Method::PUT,
            &format!("/admin/keys/{}", id),
            Some(&admin),
            json!({"status": "inactive"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, j) = use_tokens(&app, "netflix", &key, 1).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(j["error"], "KEY_SUSPENDED");

    let (status, _) = send(&app, empty_req(Method::DELETE, &format!("/admin/keys/{}", id), Some(&admin))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/keys",
            Some(&admin),
            json!({"platformId": "nowhere", "tokens": 5}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_bots_logs_and_ip_bans() {
    let (app, _) = make_app();
    let admin = login(&app, "admin", "admin").await;

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/bots",
            Some(&admin),
            json!({"name": "helper", "url": "https://t.me/helper"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let bot_id = json_body(&body)["id"].as_str().unwrap().to_string();
    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/bots",
            Some(&admin),
            json!({"name": "bad", "url": "ftp://x"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, empty_req(Method::DELETE, &format!("/admin/bots/{}", bot_id), Some(&admin))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    use_tokens(&app, "netflix", AGENT_KEY, 1).await;
    let (status, body) = send(&app, empty_req(Method::GET, "/admin/logs", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    let logs = json_body(&body);
    assert_eq!(logs[0]["key"], AGENT_KEY);
    assert_eq!(logs[0]["tokensUsed"], 1);

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/ip-bans",
            Some(&admin),
            json!({"ips": "1.1.1.1, 2.2.2.2"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let added = json_body(&body);
    assert_eq!(added.as_array().unwrap().len(), 2);
    let ban_id = added[0]["id"].as_str().unwrap().to_string();

    let (_, body) = send(&app, empty_req(Method::GET, "/admin/ip-bans", Some(&admin))).await;
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);
    let (status, _) = send(&app, empty_req(Method::DELETE, &format!("/admin/ip-bans/{}", ban_id), Some(&admin))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn admin_dashboard_counts() {
    let (app, _) = make_app();
    let admin = login(&app, "admin", "admin").await;
    let (status, body) = send(&app, empty_req(Method::GET, "/admin/dashboard", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    let j = json_body(&body);
    assert_eq!(j["agentCount"], 2);
    assert_eq!(j["platformCount"], 2);
    assert_eq!(j["standaloneKeyCount"], 1);
    assert_eq!(j["recentPlatforms"][0]["id"], "spotify");
}

// ---------------------------------------------------------------------------
// Agent portal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn agent_issues_key_with_credits() {
    let (app, db) = make_app();
    let token = login(&app, "alice", "pw").await;

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/agent/keys",
            Some(&token),
            json!({"platformId": "netflix", "tokens": 30}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", String::from_utf8_lossy(&body));
    let issued = json_body(&body);
    let key = issued["key"].as_str().unwrap().to_string();
    assert_eq!(issued["platformId"], "netflix");
    assert_eq!(issued["tokens_remaining"], 30);
    assert_eq!(key.len(), "NFX-AAAA-AAAA".len());
    assert_eq!(db.snapshot()["agents"]["agent_1"]["credits"], 70);

    let (_, body) = send(&app, empty_req(Method::GET, "/agent/dashboard", Some(&token))).await;
    let dashboard = json_body(&body);
    assert_eq!(dashboard["credits"], 70);
    assert_eq!(dashboard["totalKeys"], 3);

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/agent/keys",
            Some(&token),
            json!({"platformId": "netflix", "tokens": 500}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, j) = use_tokens(&app, "netflix", &key, 30).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["tokens_remaining"], 0);

    let (_, body) = send(&app, empty_req(Method::GET, "/agent/logs", Some(&token))).await;
    assert_eq!(json_body(&body)[0]["key"], key);
}

#[tokio::test]
async fn agent_sub_agents_and_transfers() {
    let (app, db) = make_app();
    let token = login(&app, "alice", "pw").await;

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            "/agent/agents",
            Some(&token),
            json!({"username": "dave", "password": "pw", "credits": 20, "expirationAt": "2099-01-01T00:00:00Z"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", String::from_utf8_lossy(&body));
    let dave = json_body(&body);
    let dave_id = dave["id"].as_str().unwrap().to_string();
    assert_eq!(dave["parentId"], "agent_1");
    assert_eq!(db.snapshot()["agents"]["agent_1"]["credits"], 80);

    let (status, body) = send(
        &app,
        json_req(
            Method::POST,
            &format!("/agent/agents/{}/credits", dave_id),
            Some(&token),
            json!({"amount": 30}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let receipt = json_body(&body);
    assert_eq!(receipt["balance"], 50);
    assert_eq!(receipt["subAgentBalance"], 50);

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            &format!("/agent/agents/{}/credits", dave_id),
            Some(&token),
            json!({"amount": 51}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Only direct sub-agents can be managed.
    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/agent/agents/agent_2/credits",
            Some(&token),
            json!({"amount": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&app, empty_req(Method::GET, "/agent/agents", Some(&token))).await;
    assert_eq!(json_body(&body).as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        json_req(
            Method::PUT,
            &format!("/agent/agents/{}/expiration", dave_id),
            Some(&token),
            json!({"expirationAt": null}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json_body(&body)["expirationAt"].is_null());

    let (status, _) = send(
        &app,
        empty_req(Method::DELETE, &format!("/agent/agents/{}", dave_id), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(db.snapshot()["agents"].get(&dave_id).is_none());
}

#[tokio::test]
async fn agent_ip_bans_require_permission() {
    let (app, _) = make_app();
    let admin = login(&app, "admin", "admin").await;
    let token = login(&app, "alice", "pw").await;

    let (status, _) = send(&app, empty_req(Method::GET, "/agent/ip-bans", Some(&token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        json_req(
            Method::POST,
            "/admin/agents/agent_1/ip-ban",
            Some(&admin),
            json!({"enabled": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        json_req(Method::POST, "/agent/ip-bans", Some(&token), json!({"ip": "7.7.7.7"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // The ban applies to the agent's own keys.
    let req = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/netflix/credit?key={}", AGENT_KEY))
        .header("x-real-ip", "7.7.7.7")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json_body(&body)["error"], "IP_BANNED");
}

#[tokio::test]
async fn agent_reads_platforms_and_bots() {
    let mut tree = seeded_tree();
    tree["bots"] = json!({"bot_1": {"name": "helper", "url": "https://t.me/helper"}});
    let (app, _) = make_app_with(tree);
    let token = login(&app, "alice", "pw").await;

    let (status, body) = send(&app, empty_req(Method::GET, "/agent/platforms", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);

    let (status, body) = send(&app, empty_req(Method::GET, "/agent/bots", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)[0]["name"], "helper");

    let (status, body) = send(&app, empty_req(Method::GET, "/agent/keys?platform=netflix", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body).as_array().unwrap().len(), 2);
}
