//! End-to-end tests of the MCP resource router: bearer enforcement and
//! session lifecycle over the `mcp-session-id` header.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceExt;

use mcp_oauth_server::auth::{
    AuthState, AuthorizationAuthority, AuthorizeRequest, Client, LocalVerifier,
};
use mcp_oauth_server::config::Config;
use mcp_oauth_server::server::serve_with_shutdown;
use mcp_oauth_server::server::session::{SessionRegistry, SessionTransport};
use mcp_oauth_server::server::transport::{McpState, SESSION_ID_HEADER, mcp_router};

struct Harness {
    router: Router,
    state: Arc<McpState>,
    token: String,
}

/// Register a client, run the grant flow against the authority directly, and
/// build an MCP router whose verifier accepts the resulting token.
async fn harness() -> Harness {
    let authority = AuthorizationAuthority::new(&Config::for_testing());
    let client = authority
        .clients()
        .register(Client {
            client_id: "abc".into(),
            client_secret: None,
            redirect_uris: vec!["https://cb/".into()],
            grant_types: vec!["authorization_code".into()],
            response_types: vec!["code".into()],
        })
        .await;

    let target = authority
        .authorize(
            "abc",
            AuthorizeRequest {
                redirect_uri: "https://cb/".into(),
                code_challenge: "X".into(),
                scopes: vec!["mcp:tools".into()],
                state: None,
            },
        )
        .await
        .unwrap();
    let code = target
        .location
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    let token = authority.exchange_code(&client, &code).await.unwrap().access_token;

    let state = Arc::new(McpState {
        sessions: SessionRegistry::new(),
        verifier: Arc::new(LocalVerifier::new(authority)),
        base_url: "http://localhost:3090".into(),
        auth_base_url: "http://localhost:3091".into(),
    });

    Harness { router: mcp_router(Arc::clone(&state)), state, token }
}

fn initialize_body() -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": "initialize",
        "params": { "protocolVersion": "2024-11-05" },
        "id": 1
    })
    .to_string()
}

fn post_mcp(token: &str, session_id: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    if let Some(sid) = session_id {
        builder = builder.header(SESSION_ID_HEADER, sid);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_initialize_creates_session() {
    let h = harness().await;

    let response =
        h.router.clone().oneshot(post_mcp(&h.token, None, initialize_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let session_id =
        response.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap().to_owned();
    assert!(!session_id.is_empty());

    // The transport was registered before the response was observable.
    let transport = h.state.sessions.get(&session_id).await.unwrap();
    assert_eq!(transport.session_id(), session_id);

    let body = body_json(response).await;
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(body["id"], 1);
}

#[tokio::test]
async fn test_two_initializations_get_distinct_sessions() {
    let h = harness().await;

    let first = h.router.clone().oneshot(post_mcp(&h.token, None, initialize_body())).await.unwrap();
    let second =
        h.router.clone().oneshot(post_mcp(&h.token, None, initialize_body())).await.unwrap();

    let id1 = first.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap();
    let id2 = second.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap();
    assert_ne!(id1, id2);
    assert_eq!(h.state.sessions.len().await, 2);
}

#[tokio::test]
async fn test_request_with_session_id_reaches_same_transport() {
    let h = harness().await;

    let init =
        h.router.clone().oneshot(post_mcp(&h.token, None, initialize_body())).await.unwrap();
    let session_id = init.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap().to_owned();
    let transport = h.state.sessions.get(&session_id).await.unwrap();

    let ping = serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 2}).to_string();
    let response =
        h.router.clone().oneshot(post_mcp(&h.token, Some(&session_id), ping)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap(),
        session_id
    );

    // Same transport instance, not a replacement.
    let again = h.state.sessions.get(&session_id).await.unwrap();
    assert!(Arc::ptr_eq(&transport, &again));
}

#[tokio::test]
async fn test_non_initialize_without_session_is_protocol_error() {
    let h = harness().await;

    let ping = serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 1}).to_string();
    let response = h.router.clone().oneshot(post_mcp(&h.token, None, ping)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["error"]["code"], -32000);
    assert!(body["id"].is_null());
}

#[tokio::test]
async fn test_unknown_session_id_is_protocol_error() {
    let h = harness().await;

    let ping = serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 1}).to_string();
    let response =
        h.router.clone().oneshot(post_mcp(&h.token, Some("no-such-session"), ping)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert!(body["id"].is_null());
}

#[tokio::test]
async fn test_delete_closes_and_removes_session() {
    let h = harness().await;

    let init =
        h.router.clone().oneshot(post_mcp(&h.token, None, initialize_body())).await.unwrap();
    let session_id = init.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap().to_owned();
    let transport = h.state.sessions.get(&session_id).await.unwrap();

    let request = Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header(header::AUTHORIZATION, format!("Bearer {}", h.token))
        .header(SESSION_ID_HEADER, &session_id)
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert!(transport.is_closed());
    assert!(h.state.sessions.get(&session_id).await.is_none());
}

#[tokio::test]
async fn test_missing_bearer_is_unauthorized_with_challenge() {
    let h = harness().await;

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(initialize_body()))
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let challenge =
        response.headers().get(header::WWW_AUTHENTICATE).unwrap().to_str().unwrap();
    assert!(challenge.contains("resource_metadata"));
    assert!(challenge.contains("/.well-known/oauth-protected-resource"));
}

#[tokio::test]
async fn test_invalid_bearer_is_unauthorized() {
    let h = harness().await;

    let response = h
        .router
        .clone()
        .oneshot(post_mcp("never-issued-token", None, initialize_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_protected_resource_metadata_is_public() {
    let h = harness().await;

    let request = Request::builder()
        .method("GET")
        .uri("/.well-known/oauth-protected-resource")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["resource"], "http://localhost:3090");
    assert_eq!(body["authorization_servers"][0], "http://localhost:3091");
}

#[tokio::test]
async fn test_shutdown_completes_while_sse_stream_is_open() {
    let h = harness().await;

    let auth_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mcp_addr = mcp_listener.local_addr().unwrap();

    let auth_state = Arc::new(AuthState {
        authority: AuthorizationAuthority::new(&Config::for_testing()),
        base_url: "http://localhost:3091".into(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let server = tokio::spawn(serve_with_shutdown(
        auth_listener,
        mcp_listener,
        auth_state,
        Arc::clone(&h.state),
        Duration::from_millis(100),
        shutdown_rx,
    ));

    let client = reqwest::Client::new();
    let init = client
        .post(format!("http://{mcp_addr}/mcp"))
        .bearer_auth(&h.token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(initialize_body())
        .send()
        .await
        .unwrap();
    assert_eq!(init.status().as_u16(), 200);
    let session_id =
        init.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap().to_owned();

    // Hold an SSE stream open across shutdown; its body only completes once
    // the sweep drops the transport.
    let sse = client
        .get(format!("http://{mcp_addr}/mcp"))
        .bearer_auth(&h.token)
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(sse.status().as_u16(), 200);

    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("shutdown stalled on open SSE stream")
        .unwrap()
        .unwrap();
    assert!(h.state.sessions.is_empty().await);
    drop(sse);
}

#[tokio::test]
async fn test_unknown_method_gets_method_not_found() {
    let h = harness().await;

    let init =
        h.router.clone().oneshot(post_mcp(&h.token, None, initialize_body())).await.unwrap();
    let session_id = init.headers().get(SESSION_ID_HEADER).unwrap().to_str().unwrap().to_owned();

    let call =
        serde_json::json!({"jsonrpc": "2.0", "method": "tools/call", "id": 7}).to_string();
    let response =
        h.router.clone().oneshot(post_mcp(&h.token, Some(&session_id), call)).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);
}
